//! Directory-backed state store for local runs and tests.
//!
//! Layout under `root`:
//!
//! ```text
//! <key>                              state object
//! <key>.lease                        lease marker (create_new is the lock)
//! .snapshots/<key>/<version_id>      immutable copy
//! .snapshots/<key>/versions.jsonl    one Snapshot per line, append-only
//! posture.json                       PostureFlags for health checks
//! ```

use crate::backend::{LeaseStatus, PostureFlags, Snapshot, StateBackend};
use chrono::Utc;
use deployguard_kernel::{Categorized, ErrorCategory};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

pub const SNAPSHOT_DIR: &str = ".snapshots";
pub const VERSIONS_FILE: &str = "versions.jsonl";
pub const POSTURE_FILE: &str = "posture.json";
pub const LEASE_EXTENSION: &str = ".lease";

#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("state root {} is unreachable", .root.display())]
    Unreachable { root: PathBuf },

    #[error("invalid state key {key:?}")]
    InvalidKey { key: String },

    #[error("state object {key} not found")]
    NotFound { key: String },

    #[error("there is currently no lease on {key}")]
    NoLease { key: String },

    #[error("state store I/O on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("corrupt snapshot metadata in {} line {line}: {message}", .path.display())]
    Metadata {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl LocalError {
    fn io(path: &Path, err: impl ToString) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl Categorized for LocalError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidKey { .. } | Self::NotFound { .. } => ErrorCategory::Validation,
            Self::Unreachable { .. }
            | Self::NoLease { .. }
            | Self::Io { .. }
            | Self::Metadata { .. } => ErrorCategory::Generic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_posture(&self, flags: &PostureFlags) -> Result<(), LocalError> {
        self.ensure_root()?;
        let path = self.root.join(POSTURE_FILE);
        let body = serde_json::to_string_pretty(flags).map_err(|e| LocalError::io(&path, e))?;
        fs::write(&path, body).map_err(|e| LocalError::io(&path, e))
    }

    fn ensure_root(&self) -> Result<(), LocalError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(LocalError::Unreachable {
                root: self.root.clone(),
            })
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, LocalError> {
        let relative = Path::new(key);
        let well_formed = !key.trim().is_empty()
            && !key.ends_with(LEASE_EXTENSION)
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
            && relative
                .components()
                .next()
                .is_some_and(|first| first.as_os_str() != SNAPSHOT_DIR);
        if !well_formed {
            return Err(LocalError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn existing_object(&self, key: &str) -> Result<PathBuf, LocalError> {
        self.ensure_root()?;
        let path = self.object_path(key)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(LocalError::NotFound {
                key: key.to_string(),
            })
        }
    }

    fn lease_path(object: &Path) -> PathBuf {
        let mut path: OsString = object.as_os_str().to_os_string();
        path.push(LEASE_EXTENSION);
        PathBuf::from(path)
    }

    fn snapshot_dir(&self, key: &str) -> PathBuf {
        self.root.join(SNAPSHOT_DIR).join(key)
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), LocalError> {
        let entries = fs::read_dir(dir).map_err(|e| LocalError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| LocalError::io(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| LocalError::io(&path, e))?;
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if file_type.is_dir() {
                if key != SNAPSHOT_DIR {
                    self.collect_keys(&path, out)?;
                }
            } else if file_type.is_file()
                && key != POSTURE_FILE
                && !key.ends_with(LEASE_EXTENSION)
            {
                out.push(key);
            }
        }
        Ok(())
    }

    fn append_version(dir: &Path, snapshot: &Snapshot) -> Result<(), LocalError> {
        let versions_path = dir.join(VERSIONS_FILE);
        let line =
            serde_json::to_string(snapshot).map_err(|e| LocalError::io(&versions_path, e))?;
        let mut versions = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&versions_path)
            .map_err(|e| LocalError::io(&versions_path, e))?;
        writeln!(versions, "{line}").map_err(|e| LocalError::io(&versions_path, e))
    }

    fn next_version_id(dir: &Path) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut candidate = base.clone();
        let mut counter = 1;
        while dir.join(&candidate).exists() {
            candidate = format!("{base}-{counter}");
            counter += 1;
        }
        candidate
    }
}

impl StateBackend for LocalBackend {
    type Error = LocalError;

    fn list(&self, prefix: &str) -> Result<Vec<String>, LocalError> {
        self.ensure_root()?;
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, LocalError> {
        let object = self.existing_object(key)?;
        let bytes = fs::read(&object).map_err(|e| LocalError::io(&object, e))?;
        let dir = self.snapshot_dir(key);
        fs::create_dir_all(&dir).map_err(|e| LocalError::io(&dir, e))?;

        let version_id = Self::next_version_id(&dir);
        let copy_path = dir.join(&version_id);
        // create_new: an existing version is never overwritten.
        let mut copy = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&copy_path)
            .map_err(|e| LocalError::io(&copy_path, e))?;

        let snapshot = Snapshot {
            key: key.to_string(),
            version_id,
            created_at: Utc::now(),
            tag: tag.to_string(),
        };
        let recorded = copy
            .write_all(&bytes)
            .map_err(|e| LocalError::io(&copy_path, e))
            .and_then(|()| Self::append_version(&dir, &snapshot));
        if let Err(err) = recorded {
            // Every version on disk must also be in the history.
            let _ = fs::remove_file(&copy_path);
            return Err(err);
        }
        Ok(snapshot)
    }

    fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, LocalError> {
        self.ensure_root()?;
        self.object_path(key)?;
        let path = self.snapshot_dir(key).join(VERSIONS_FILE);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LocalError::io(&path, err)),
        };

        let mut versions = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| LocalError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let snapshot: Snapshot =
                serde_json::from_str(&line).map_err(|e| LocalError::Metadata {
                    path: path.clone(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            versions.push(snapshot);
        }
        Ok(versions)
    }

    fn lease_status(&self, key: &str) -> Result<LeaseStatus, LocalError> {
        let object = self.existing_object(key)?;
        if Self::lease_path(&object).exists() {
            Ok(LeaseStatus::Locked)
        } else {
            Ok(LeaseStatus::Unlocked)
        }
    }

    fn try_lock(&self, key: &str) -> Result<Option<String>, LocalError> {
        let object = self.existing_object(key)?;
        let lease_path = Self::lease_path(&object);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lease_path)
        {
            Ok(mut file) => {
                let now = Utc::now();
                let lease_id = format!(
                    "lease1_{}_{}",
                    std::process::id(),
                    now.timestamp_nanos_opt().unwrap_or_default()
                );
                writeln!(
                    file,
                    "lease_id={lease_id}\npid={}\nutc={}",
                    std::process::id(),
                    now.to_rfc3339()
                )
                .map_err(|e| LocalError::io(&lease_path, e))?;
                Ok(Some(lease_id))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(LocalError::io(&lease_path, err)),
        }
    }

    fn break_lease(&self, key: &str) -> Result<(), LocalError> {
        let object = self.existing_object(key)?;
        let lease_path = Self::lease_path(&object);
        match fs::remove_file(&lease_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(LocalError::NoLease {
                key: key.to_string(),
            }),
            Err(err) => Err(LocalError::io(&lease_path, err)),
        }
    }

    fn properties(&self, _key: &str) -> Result<PostureFlags, LocalError> {
        self.ensure_root()?;
        let path = self.root.join(POSTURE_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| LocalError::Metadata {
                path: path.clone(),
                line: e.line(),
                message: e.to_string(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PostureFlags::default()),
            Err(err) => Err(LocalError::io(&path, err)),
        }
    }
}
