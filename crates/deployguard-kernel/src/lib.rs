//! # Deployguard Kernel
//!
//! Trust-boundary checks run between planning and applying an
//! infrastructure change:
//!
//! ```text
//! sign ──(later invocation)──▶ verify ──▶ scope ──▶ identity ──▶ apply
//!   │                            │          │          │
//!   └─ integrity ────────────────┘          │          │
//!                                 scope ────┘          │
//!                                 identity ────────────┘
//!
//! every failure ──▶ classify ──▶ ErrorCategory ──▶ exit code
//! ```
//!
//! The remote-state guard lives in `deployguard-state`; backends that shell
//! out to a cloud CLI live in their own adapter crates.

pub mod classify;
pub mod config;
pub mod error;
pub mod identity;
pub mod integrity;
pub mod runner;
pub mod scope;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{classify, classify_categorized, classify_message};
pub use config::{BackendKind, ConfigError, ProjectConfig};
pub use error::{Categorized, ErrorCategory, TaggedError};
pub use identity::{
    BindingError, Credential, PostAuthOutcome, PreAuthOutcome, ProjectBinding, check_post_auth,
    check_pre_auth,
};
pub use integrity::{Digest, IntegrityError, Verification, sign, verify};
pub use runner::{CommandRunner, CommandSpec, RunnerError, SystemRunner};
pub use scope::{AllowedScope, ScopeError, ScopeReport, ScopeValidator, ScopeViolation};
