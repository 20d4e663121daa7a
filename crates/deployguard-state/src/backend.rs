//! The storage-backend capability the state guard is written against.

use chrono::{DateTime, Utc};
use deployguard_kernel::Categorized;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Locked,
    Unlocked,
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("locked"),
            Self::Unlocked => f.write_str("unlocked"),
        }
    }
}

/// Observed lease on one state object. The backend owns the lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLock {
    pub blob_key: String,
    pub lease_status: LeaseStatus,
}

/// One immutable point-in-time version of a state object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: String,
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub tag: String,
}

/// Security-relevant storage settings read from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureFlags {
    pub https_only: bool,
    /// e.g. `TLS1_2`. `None` when the backend does not report one.
    pub min_tls_version: Option<String>,
    pub infrastructure_encryption: bool,
    pub versioning: bool,
    pub blob_soft_delete: bool,
    pub container_soft_delete: bool,
}

/// A keyed blob store with lease and versioning semantics.
///
/// Implementations own locking; callers only observe, break, or (for the
/// apply step itself) try to take a lease.
pub trait StateBackend {
    type Error: Categorized + Send + Sync + 'static;

    /// Keys of all state objects starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error>;

    /// Create a new immutable version of `key`. Never replaces an existing one.
    fn snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, Self::Error>;

    /// Snapshot history of `key`, oldest first.
    fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, Self::Error>;

    fn lease_status(&self, key: &str) -> Result<LeaseStatus, Self::Error>;

    /// Try to take the lease. `None` when another holder has it.
    fn try_lock(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Forcibly release whatever lease is held on `key`.
    fn break_lease(&self, key: &str) -> Result<(), Self::Error>;

    fn properties(&self, key: &str) -> Result<PostureFlags, Self::Error>;
}

impl<B: StateBackend + ?Sized> StateBackend for &B {
    type Error = B::Error;

    fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        (**self).list(prefix)
    }

    fn snapshot(&self, key: &str, tag: &str) -> Result<Snapshot, Self::Error> {
        (**self).snapshot(key, tag)
    }

    fn list_versions(&self, key: &str) -> Result<Vec<Snapshot>, Self::Error> {
        (**self).list_versions(key)
    }

    fn lease_status(&self, key: &str) -> Result<LeaseStatus, Self::Error> {
        (**self).lease_status(key)
    }

    fn try_lock(&self, key: &str) -> Result<Option<String>, Self::Error> {
        (**self).try_lock(key)
    }

    fn break_lease(&self, key: &str) -> Result<(), Self::Error> {
        (**self).break_lease(key)
    }

    fn properties(&self, key: &str) -> Result<PostureFlags, Self::Error> {
        (**self).properties(key)
    }
}
