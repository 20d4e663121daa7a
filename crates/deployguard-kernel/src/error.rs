//! Error categories shared by every deployguard component.

use std::fmt;

/// The closed set of categories a calling pipeline can act on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    ExternalToolFailure,
    DriftDetected,
    PolicyFailure,
    /// Integrity, scope and binding violations. Never downgraded.
    SecurityBlock,
    Generic,
}

impl ErrorCategory {
    pub const ALL: [Self; 6] = [
        Self::Validation,
        Self::ExternalToolFailure,
        Self::DriftDetected,
        Self::PolicyFailure,
        Self::SecurityBlock,
        Self::Generic,
    ];

    /// Process exit code for scripting. Each category maps to exactly one code.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Generic => 1,
            Self::Validation => 2,
            Self::ExternalToolFailure => 3,
            Self::DriftDetected => 4,
            Self::PolicyFailure => 5,
            Self::SecurityBlock => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ExternalToolFailure => "external_tool_failure",
            Self::DriftDetected => "drift_detected",
            Self::PolicyFailure => "policy_failure",
            Self::SecurityBlock => "security_block",
            Self::Generic => "generic",
        }
    }

    pub fn is_security_block(self) -> bool {
        self == Self::SecurityBlock
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown error category: {s}"))
    }
}

/// An error whose producer knows its category.
///
/// Typed errors implement this so the classifier never has to fall back to
/// message matching for them.
pub trait Categorized: std::error::Error {
    fn category(&self) -> ErrorCategory;
}

/// An error carrying an explicit category attached by its producer.
///
/// Wrapping a foreign error in `TaggedError` pins its category regardless of
/// what its message says.
#[derive(Debug)]
pub struct TaggedError {
    category: ErrorCategory,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TaggedError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn wrap<E>(category: ErrorCategory, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            category,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaggedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl Categorized for TaggedError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}
