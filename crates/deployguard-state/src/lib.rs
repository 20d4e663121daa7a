//! # deployguard-state
//!
//! Guard over shared remote deployment state.
//!
//! This crate provides:
//! - the `StateBackend` capability (list, snapshot, versions, lease, posture)
//! - `StateGuard`, the orchestration the pipeline calls
//! - the posture health battery
//! - `LocalBackend`, a directory-backed store for local runs and tests
//!
//! Locking itself belongs to the backend. The guard observes leases and,
//! on explicit operator request, breaks them; it has no retry loop and no
//! lock protocol of its own.

pub mod backend;
pub mod guard;
pub mod health;
pub mod local;

pub use backend::{LeaseStatus, PostureFlags, Snapshot, StateBackend, StateLock};
pub use guard::{BreakMode, Confirm, GuardError, StateGuard, StdinConfirm};
pub use health::{BackendHealth, HealthCheck, HealthStatus};
pub use local::{LocalBackend, LocalError};
