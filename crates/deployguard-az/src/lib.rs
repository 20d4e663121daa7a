//! Azure CLI adapter for remote state stored in blob storage.
//!
//! This crate is intentionally thin: it shells out to `az` through the
//! injected `CommandRunner` and maps JSON output onto the
//! `StateBackend` capability. It keeps no orchestration policy.

use chrono::{DateTime, Utc};
use deployguard_kernel::{Categorized, CommandRunner, CommandSpec, ErrorCategory, RunnerError};
use deployguard_state::{LeaseStatus, PostureFlags, Snapshot, StateBackend};
use serde::Deserialize;
use serde_json::Value;

pub const TAG_METADATA_KEY: &str = "deployguard_tag";
pub const LEASE_DURATION_SECONDS: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AzError {
    #[error("az cli {0}")]
    Command(#[from] RunnerError),

    #[error("unable to parse az cli output for {operation}: {message}")]
    Parse { operation: String, message: String },

    #[error("snapshot tag {tag:?} may only contain letters, digits, '.', '_', ':' or '-'")]
    InvalidTag { tag: String },
}

impl Categorized for AzError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Command(err) => err.category(),
            Self::Parse { .. } => ErrorCategory::ExternalToolFailure,
            Self::InvalidTag { .. } => ErrorCategory::Validation,
        }
    }
}

/// Blob container location of the state objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzLocation {
    pub account: String,
    pub container: String,
}

pub struct AzBackend<R> {
    runner: R,
    az_bin: String,
    location: AzLocation,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    name: String,
    #[serde(default)]
    snapshot: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    properties: Option<BlobProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobProperties {
    #[serde(default)]
    lease: Option<LeaseProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct LeaseProperties {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    snapshot: String,
}

impl<R: CommandRunner> AzBackend<R> {
    pub fn new(runner: R, location: AzLocation) -> Self {
        Self {
            runner,
            az_bin: "az".to_string(),
            location,
        }
    }

    pub fn with_az_bin(mut self, bin: impl Into<String>) -> Self {
        self.az_bin = bin.into();
        self
    }

    fn run_blob(&self, args: &[&str]) -> Result<String, AzError> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        full.extend([
            "--account-name".to_string(),
            self.location.account.clone(),
            "--container-name".to_string(),
            self.location.container.clone(),
            "--auth-mode".to_string(),
            "login".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]);
        Ok(self.runner.run(&CommandSpec::new(self.az_bin.clone(), full))?)
    }

    fn run_account(&self, args: &[&str]) -> Result<Value, AzError> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        full.extend(["--output".to_string(), "json".to_string()]);
        let stdout = self
            .runner
            .run(&CommandSpec::new(self.az_bin.clone(), full))?;
        parse_json(args.join(" "), &stdout)
    }

    fn blob_entries(&self, prefix: &str, include_snapshots: bool) -> Result<Vec<BlobEntry>, AzError> {
        let mut args = vec!["storage", "blob", "list", "--prefix", prefix];
        if include_snapshots {
            args.extend(["--include", "sm"]);
        }
        let stdout = self.run_blob(&args)?;
        parse_json("storage blob list", &stdout)
    }
}

impl<R: CommandRunner> StateBackend for AzBackend<R> {
    type Error = AzError;

    fn list(&self, prefix: &str) -> Result<Vec<String>, AzError> {
        let mut keys: Vec<String> = self
            .blob_entries(prefix, false)?
            .into_iter()
            .filter(|entry| entry.snapshot.is_none())
            .map(|entry| entry.name)
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, AzError> {
        if !is_metadata_safe(tag) {
            return Err(AzError::InvalidTag {
                tag: tag.to_string(),
            });
        }
        let metadata = format!("{TAG_METADATA_KEY}={tag}");
        let stdout = self.run_blob(&[
            "storage",
            "blob",
            "snapshot",
            "--name",
            key,
            "--metadata",
            &metadata,
        ])?;
        let response: SnapshotResponse = parse_json("storage blob snapshot", &stdout)?;
        Ok(Snapshot {
            key: key.to_string(),
            created_at: parse_timestamp(&response.snapshot).unwrap_or_else(Utc::now),
            version_id: response.snapshot,
            tag: tag.to_string(),
        })
    }

    fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, AzError> {
        let mut versions: Vec<Snapshot> = self
            .blob_entries(key, true)?
            .into_iter()
            .filter(|entry| entry.name == key)
            .filter_map(|entry| {
                let version_id = entry.snapshot?;
                let tag = entry
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get(TAG_METADATA_KEY))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(Snapshot {
                    key: entry.name,
                    created_at: parse_timestamp(&version_id)
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    version_id,
                    tag,
                })
            })
            .collect();
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_id.cmp(&b.version_id))
        });
        Ok(versions)
    }

    fn lease_status(&self, key: &str) -> Result<LeaseStatus, AzError> {
        let stdout = self.run_blob(&["storage", "blob", "show", "--name", key])?;
        let entry: BlobEntry = parse_json("storage blob show", &stdout)?;
        let status = entry
            .properties
            .and_then(|p| p.lease)
            .and_then(|l| l.status)
            .unwrap_or_default();
        Ok(if status.eq_ignore_ascii_case("locked") {
            LeaseStatus::Locked
        } else {
            LeaseStatus::Unlocked
        })
    }

    fn try_lock(&self, key: &str) -> Result<Option<String>, AzError> {
        let duration = LEASE_DURATION_SECONDS.to_string();
        let result = self.run_blob(&[
            "storage",
            "blob",
            "lease",
            "acquire",
            "--blob-name",
            key,
            "--lease-duration",
            &duration,
        ]);
        match result {
            Ok(stdout) => {
                let lease_id: String = parse_json("storage blob lease acquire", &stdout)?;
                Ok(Some(lease_id))
            }
            Err(AzError::Command(RunnerError::CommandFailed { message, .. }))
                if is_lease_conflict(&message) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn break_lease(&self, key: &str) -> Result<(), AzError> {
        self.run_blob(&[
            "storage",
            "blob",
            "lease",
            "break",
            "--blob-name",
            key,
            "--lease-break-period",
            "0",
        ])?;
        Ok(())
    }

    fn properties(&self, _key: &str) -> Result<PostureFlags, AzError> {
        let account = self.location.account.as_str();
        let account_props =
            self.run_account(&["storage", "account", "show", "--name", account])?;
        let service_props = self.run_account(&[
            "storage",
            "account",
            "blob-service-properties",
            "show",
            "--account-name",
            account,
        ])?;
        Ok(posture_from_json(&account_props, &service_props))
    }
}

fn posture_from_json(account: &Value, service: &Value) -> PostureFlags {
    let flag = |value: &Value, pointer: &str| {
        value
            .pointer(pointer)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    PostureFlags {
        https_only: flag(account, "/enableHttpsTrafficOnly"),
        min_tls_version: account
            .pointer("/minimumTlsVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
        infrastructure_encryption: flag(account, "/encryption/requireInfrastructureEncryption"),
        versioning: flag(service, "/isVersioningEnabled"),
        blob_soft_delete: flag(service, "/deleteRetentionPolicy/enabled"),
        container_soft_delete: flag(service, "/containerDeleteRetentionPolicy/enabled"),
    }
}

/// `az --metadata` splits on whitespace, so a tag must stay a single token.
fn is_metadata_safe(tag: &str) -> bool {
    tag.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

fn is_lease_conflict(message: &str) -> bool {
    message.contains("LeaseAlreadyPresent") || message.contains("already a lease present")
}

fn parse_json<T: serde::de::DeserializeOwned>(
    operation: impl Into<String>,
    stdout: &str,
) -> Result<T, AzError> {
    serde_json::from_str(stdout.trim()).map_err(|err| AzError::Parse {
        operation: operation.into(),
        message: err.to_string(),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
