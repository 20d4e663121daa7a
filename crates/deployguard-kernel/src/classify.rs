//! Error classifier.
//!
//! Resolution order:
//! 1. an explicit category carried by the error or anything in its source
//!    chain (`TaggedError` or one of the kernel's typed errors)
//! 2. a priority-ordered marker table matched against the lowercase message
//!    chain
//! 3. `Generic`
//!
//! Security markers are evaluated strictly before every other group. A
//! message mentioning both `terraform` and a lease conflict must classify as
//! a security block, never as a tool failure.

use crate::config::ConfigError;
use crate::error::{Categorized, ErrorCategory, TaggedError};
use crate::identity::BindingError;
use crate::integrity::IntegrityError;
use crate::runner::RunnerError;
use crate::scope::ScopeError;
use std::error::Error as StdError;

/// Marker table in evaluation order. Do not reorder groups.
pub const MARKERS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::SecurityBlock,
        &[
            "integrity",
            "tamper",
            "not signed",
            "scope violation",
            "outside allowed scope",
            "binding violation",
            "binding mismatch",
            "tenant mismatch",
            "client mismatch",
            "locked by another",
        ],
    ),
    (
        ErrorCategory::DriftDetected,
        &["drift detected", "configuration drift"],
    ),
    (
        ErrorCategory::PolicyFailure,
        &["policy violation", "policy check failed", "denied by policy"],
    ),
    (
        ErrorCategory::ExternalToolFailure,
        &[
            "terraform",
            "az cli",
            "command failed",
            "not installed",
            "exit status",
        ],
    ),
    (
        ErrorCategory::Validation,
        &["invalid", "validation", "missing required", "malformed"],
    ),
];

/// Classify any error, typed or legacy.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorCategory {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(category) = explicit_category(e) {
            return category;
        }
        current = e.source();
    }
    classify_message(&message_chain(err))
}

/// Classify an error whose producer already knows its category.
///
/// Errors from other crates cannot be downcast here, so callers holding a
/// concrete `Categorized` value use this entry point. A `Generic` category
/// still falls through to the source chain and the marker table.
pub fn classify_categorized<E: Categorized + 'static>(err: &E) -> ErrorCategory {
    match err.category() {
        ErrorCategory::Generic => classify(err),
        category => category,
    }
}

/// Classify a bare message using the marker table only.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|marker| lower.contains(marker)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Generic)
}

/// The first marker that matched, for diagnostics.
pub fn matched_marker(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    MARKERS
        .iter()
        .flat_map(|(_, markers)| markers.iter())
        .find(|marker| lower.contains(*marker))
        .copied()
}

fn explicit_category(e: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    if let Some(tagged) = e.downcast_ref::<TaggedError>() {
        return Some(tagged.category());
    }
    if let Some(err) = e.downcast_ref::<IntegrityError>() {
        return Some(err.category());
    }
    if let Some(err) = e.downcast_ref::<BindingError>() {
        return Some(err.category());
    }
    if let Some(err) = e.downcast_ref::<ScopeError>() {
        return Some(err.category());
    }
    if let Some(err) = e.downcast_ref::<RunnerError>() {
        return Some(err.category());
    }
    if let Some(err) = e.downcast_ref::<ConfigError>() {
        return Some(err.category());
    }
    None
}

fn message_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
