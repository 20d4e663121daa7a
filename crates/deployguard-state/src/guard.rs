//! State guard: orchestration over an injected `StateBackend`.

use crate::backend::{LeaseStatus, Snapshot, StateBackend, StateLock};
use crate::health::{self, BackendHealth};
use chrono::Utc;
use deployguard_kernel::{Categorized, ErrorCategory};
use std::io::{self, BufRead, Write};

#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Backend failures are passed through untouched.
    #[error(transparent)]
    Backend(E),

    #[error("snapshot of {key} failed: {source}")]
    SnapshotAll {
        key: String,
        #[source]
        source: E,
    },

    #[error("break-lease on {key} aborted: confirmation did not match")]
    BreakLeaseAborted { key: String },

    #[error("state {key} is locked by another operation")]
    Locked { key: String },

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

impl<E: Categorized + 'static> Categorized for GuardError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Backend(err) | Self::SnapshotAll { source: err, .. } => err.category(),
            Self::Locked { .. } => ErrorCategory::SecurityBlock,
            Self::BreakLeaseAborted { .. } | Self::Prompt(_) => ErrorCategory::Generic,
        }
    }
}

/// Reads a typed confirmation from a human.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> io::Result<String>;
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> io::Result<String> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

/// How a destructive lease break is authorized.
pub enum BreakMode<'a> {
    /// The operator must type the exact key.
    Interactive(&'a dyn Confirm),
    /// The caller already gated this mode behind its own authorization.
    NonInteractive,
}

impl<'a> BreakMode<'a> {
    /// Non-interactive when `assume_yes` is set or `CI` is truthy.
    pub fn detect(assume_yes: bool, confirm: &'a dyn Confirm) -> Self {
        if assume_yes || ci_env_enabled(std::env::var("CI").ok().as_deref()) {
            Self::NonInteractive
        } else {
            Self::Interactive(confirm)
        }
    }
}

fn ci_env_enabled(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !(v.eq_ignore_ascii_case("false") || v == "0"),
    }
}

pub struct StateGuard<B> {
    backend: B,
    prefix: String,
}

impl<B: StateBackend> StateGuard<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            prefix: String::new(),
        }
    }

    /// Restrict `snapshot_all` to keys under `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create a new tagged version of `key`. Repeated calls never overwrite.
    pub fn create_snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, GuardError<B::Error>> {
        let tag = resolve_tag(tag);
        let snapshot = self
            .backend
            .snapshot(key, &tag)
            .map_err(GuardError::Backend)?;
        tracing::info!(key, version = %snapshot.version_id, tag = %snapshot.tag, "state snapshot created");
        Ok(snapshot)
    }

    /// Snapshot every tracked state object. Stops at the first failure.
    pub fn snapshot_all(&self, tag: &str) -> Result<Vec<Snapshot>, GuardError<B::Error>> {
        let tag = resolve_tag(tag);
        let keys = self
            .backend
            .list(&self.prefix)
            .map_err(GuardError::Backend)?;
        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            let snapshot = self
                .backend
                .snapshot(&key, &tag)
                .map_err(|source| GuardError::SnapshotAll {
                    key: key.clone(),
                    source,
                })?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    pub fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, GuardError<B::Error>> {
        self.backend.list_versions(key).map_err(GuardError::Backend)
    }

    pub fn lock_status(&self, key: &str) -> Result<StateLock, GuardError<B::Error>> {
        let lease_status = self
            .backend
            .lease_status(key)
            .map_err(GuardError::Backend)?;
        Ok(StateLock {
            blob_key: key.to_string(),
            lease_status,
        })
    }

    /// Fail if another operation currently holds the lease on `key`.
    pub fn ensure_unlocked(&self, key: &str) -> Result<StateLock, GuardError<B::Error>> {
        let lock = self.lock_status(key)?;
        if lock.lease_status == LeaseStatus::Locked {
            return Err(GuardError::Locked {
                key: key.to_string(),
            });
        }
        Ok(lock)
    }

    /// Forcibly break the lease on `key`.
    ///
    /// Destructive: a concurrent writer holding the lease loses its
    /// exclusivity. Interactive mode requires the operator to type `key`.
    pub fn break_lease(&self, key: &str, mode: BreakMode<'_>) -> Result<(), GuardError<B::Error>> {
        if let BreakMode::Interactive(confirm) = mode {
            let prompt = format!(
                "Breaking the lease on {key} can corrupt state if another deployment is running.\nType the state key to confirm: "
            );
            let answer = confirm.confirm(&prompt).map_err(GuardError::Prompt)?;
            if answer.trim() != key {
                return Err(GuardError::BreakLeaseAborted {
                    key: key.to_string(),
                });
            }
        }

        tracing::warn!(key, "breaking state lease");
        self.backend.break_lease(key).map_err(GuardError::Backend)
    }

    /// Run the posture battery. An unreachable backend becomes one failing check.
    pub fn check_health(&self, key: &str) -> BackendHealth {
        match self.backend.properties(key) {
            Ok(flags) => health::evaluate(key, &flags),
            Err(err) => {
                tracing::warn!(key, error = %err, "state backend unreachable during health check");
                BackendHealth::unreachable(key, format!("backend unreachable: {err}"))
            }
        }
    }
}

fn resolve_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() {
        format!("deployguard-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
    } else {
        tag.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PostureFlags;
    use crate::health::HealthStatus;
    use crate::local::{LocalBackend, LocalError};
    use deployguard_kernel::testing::TempDirGuard;
    use std::cell::RefCell;
    use std::fs;

    struct Answer(&'static str);

    impl Confirm for Answer {
        fn confirm(&self, _prompt: &str) -> io::Result<String> {
            Ok(format!("{}\n", self.0))
        }
    }

    struct NeverAsked;

    impl Confirm for NeverAsked {
        fn confirm(&self, _prompt: &str) -> io::Result<String> {
            panic!("non-interactive mode must not prompt");
        }
    }

    fn seeded(dir: &TempDirGuard, keys: &[&str]) -> LocalBackend {
        let backend = LocalBackend::new(dir.path());
        for key in keys {
            let path = dir.path().join(key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("parent should be created");
            }
            fs::write(&path, format!("{{\"key\":\"{key}\"}}")).expect("state should be written");
        }
        backend
    }

    #[test]
    fn repeated_snapshots_are_distinct_and_retained() {
        let dir = TempDirGuard::new("guard-snapshots");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));

        let first = guard
            .create_snapshot("prod.tfstate", "pre-apply")
            .expect("first snapshot");
        let second = guard
            .create_snapshot("prod.tfstate", "pre-apply")
            .expect("second snapshot");
        assert_ne!(first.version_id, second.version_id);

        let versions = guard.list_versions("prod.tfstate").expect("versions");
        assert_eq!(versions, vec![first, second]);
    }

    #[test]
    fn empty_tag_gets_default() {
        let dir = TempDirGuard::new("guard-tag");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        let snapshot = guard.create_snapshot("prod.tfstate", "  ").expect("snapshot");
        assert!(snapshot.tag.starts_with("deployguard-"));
    }

    #[test]
    fn snapshot_all_covers_every_key_under_prefix() {
        let dir = TempDirGuard::new("guard-all");
        let guard = StateGuard::new(seeded(
            &dir,
            &["app/a.tfstate", "app/b.tfstate", "other/c.tfstate"],
        ))
        .with_prefix("app/");

        let snapshots = guard.snapshot_all("nightly").expect("snapshot all");
        let keys: Vec<&str> = snapshots.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["app/a.tfstate", "app/b.tfstate"]);
        assert!(snapshots.iter().all(|s| s.tag == "nightly"));
    }

    struct FailOn {
        inner: LocalBackend,
        key: &'static str,
        calls: RefCell<Vec<String>>,
    }

    impl StateBackend for FailOn {
        type Error = LocalError;

        fn list(&self, prefix: &str) -> Result<Vec<String>, LocalError> {
            self.inner.list(prefix)
        }

        fn snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, LocalError> {
            self.calls.borrow_mut().push(key.to_string());
            if key == self.key {
                return Err(LocalError::NotFound {
                    key: key.to_string(),
                });
            }
            self.inner.snapshot(key, tag)
        }

        fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, LocalError> {
            self.inner.list_versions(key)
        }

        fn lease_status(&self, key: &str) -> Result<LeaseStatus, LocalError> {
            self.inner.lease_status(key)
        }

        fn try_lock(&self, key: &str) -> Result<Option<String>, LocalError> {
            self.inner.try_lock(key)
        }

        fn break_lease(&self, key: &str) -> Result<(), LocalError> {
            self.inner.break_lease(key)
        }

        fn properties(&self, key: &str) -> Result<PostureFlags, LocalError> {
            self.inner.properties(key)
        }
    }

    #[test]
    fn snapshot_all_aborts_naming_the_failing_key() {
        let dir = TempDirGuard::new("guard-abort");
        let backend = FailOn {
            inner: seeded(&dir, &["a.tfstate", "b.tfstate", "c.tfstate"]),
            key: "b.tfstate",
            calls: RefCell::new(Vec::new()),
        };
        let guard = StateGuard::new(&backend);

        let err = guard.snapshot_all("tag").expect_err("batch must abort");
        assert!(matches!(err, GuardError::SnapshotAll { ref key, .. } if key == "b.tfstate"));
        assert!(err.to_string().contains("b.tfstate"));
        assert_eq!(*backend.calls.borrow(), vec!["a.tfstate", "b.tfstate"]);
    }

    #[test]
    fn interactive_break_requires_exact_key() {
        let dir = TempDirGuard::new("guard-break-wrong");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        guard
            .backend()
            .try_lock("prod.tfstate")
            .expect("lock")
            .expect("lease acquired");

        let err = guard
            .break_lease("prod.tfstate", BreakMode::Interactive(&Answer("yes")))
            .expect_err("wrong confirmation must abort");
        assert!(matches!(err, GuardError::BreakLeaseAborted { .. }));
        assert_eq!(
            guard.lock_status("prod.tfstate").expect("status").lease_status,
            LeaseStatus::Locked
        );

        guard
            .break_lease("prod.tfstate", BreakMode::Interactive(&Answer("prod.tfstate")))
            .expect("matching confirmation breaks lease");
        assert_eq!(
            guard.lock_status("prod.tfstate").expect("status").lease_status,
            LeaseStatus::Unlocked
        );
    }

    #[test]
    fn non_interactive_break_does_not_prompt() {
        let dir = TempDirGuard::new("guard-break-ci");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        guard.backend().try_lock("prod.tfstate").expect("lock");

        guard
            .break_lease("prod.tfstate", BreakMode::NonInteractive)
            .expect("break should succeed");
        assert!(guard.ensure_unlocked("prod.tfstate").is_ok());
    }

    #[test]
    fn break_lease_backend_error_is_propagated_unmodified() {
        let dir = TempDirGuard::new("guard-break-none");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        let err = guard
            .break_lease("prod.tfstate", BreakMode::NonInteractive)
            .expect_err("no lease to break");
        assert!(matches!(err, GuardError::Backend(LocalError::NoLease { .. })));
    }

    #[test]
    fn ensure_unlocked_reports_security_block() {
        let dir = TempDirGuard::new("guard-locked");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        guard.backend().try_lock("prod.tfstate").expect("lock");

        let err = guard
            .ensure_unlocked("prod.tfstate")
            .expect_err("locked state must be reported");
        assert_eq!(err.category(), ErrorCategory::SecurityBlock);
        assert!(err.to_string().contains("locked by another operation"));
    }

    #[test]
    fn backend_category_survives_classification() {
        let dir = TempDirGuard::new("guard-classify");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));

        let err = guard
            .create_snapshot("missing.tfstate", "tag")
            .expect_err("missing key");
        assert_eq!(
            deployguard_kernel::classify_categorized(&err),
            ErrorCategory::Validation
        );

        guard.backend().try_lock("prod.tfstate").expect("lock");
        let locked = guard.ensure_unlocked("prod.tfstate").expect_err("locked");
        assert_eq!(
            deployguard_kernel::classify_categorized(&locked),
            ErrorCategory::SecurityBlock
        );
    }

    #[test]
    fn detect_mode_honors_flag() {
        assert!(matches!(
            BreakMode::detect(true, &NeverAsked),
            BreakMode::NonInteractive
        ));
    }

    #[test]
    fn ci_env_values() {
        assert!(!ci_env_enabled(None));
        assert!(!ci_env_enabled(Some("")));
        assert!(!ci_env_enabled(Some("false")));
        assert!(!ci_env_enabled(Some("0")));
        assert!(ci_env_enabled(Some("true")));
        assert!(ci_env_enabled(Some("1")));
    }

    #[test]
    fn health_uses_backend_posture() {
        let dir = TempDirGuard::new("guard-health");
        let guard = StateGuard::new(seeded(&dir, &["prod.tfstate"]));
        let health = guard.check_health("prod.tfstate");
        // No posture file: everything is reported as disabled.
        assert!(!health.healthy);
        assert_eq!(health.checks.len(), 6);

        let flags = PostureFlags {
            https_only: true,
            min_tls_version: Some("TLS1_2".into()),
            infrastructure_encryption: false,
            versioning: true,
            blob_soft_delete: true,
            container_soft_delete: false,
        };
        guard.backend().write_posture(&flags).expect("posture written");
        let health = guard.check_health("prod.tfstate");
        assert!(health.healthy);
        assert_eq!(
            health
                .checks
                .iter()
                .filter(|c| c.status == HealthStatus::Warn)
                .count(),
            2
        );
    }

    #[test]
    fn health_on_unreachable_backend_is_single_failure() {
        let dir = TempDirGuard::new("guard-unreachable");
        let guard = StateGuard::new(LocalBackend::new(dir.path().join("absent")));
        let health = guard.check_health("prod.tfstate");
        assert!(!health.healthy);
        assert_eq!(health.checks.len(), 1);
        assert_eq!(health.checks[0].status, HealthStatus::Fail);
    }
}
