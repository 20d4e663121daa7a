//! Plan integrity: sign a plan artifact at plan time, verify it at apply time.
//!
//! The signature is a plain SHA-256 content digest stored next to the plan in
//! `<plan>.sha256`. It detects modification between two pipeline steps; it is
//! not a keyed signature and proves nothing about who produced the plan.

use crate::error::{Categorized, ErrorCategory};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SIGNATURE_EXTENSION: &str = ".sha256";

/// Lowercase hex SHA-256 of the exact plan bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl Digest {
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{hash:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let well_formed = trimmed.len() == 64
            && trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        well_formed.then(|| Self(trimmed.to_string()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write signature {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "plan {} is not signed: {} is missing",
        .path.display(),
        .signature_path.display()
    )]
    NotSigned { path: PathBuf, signature_path: PathBuf },

    #[error("malformed plan signature in {}", .signature_path.display())]
    MalformedSignature { signature_path: PathBuf },

    #[error(
        "plan integrity check failed for {}: expected sha256 {expected}, got {actual} (plan was tampered with after signing)",
        .path.display()
    )]
    Tampered {
        path: PathBuf,
        expected: Digest,
        actual: Digest,
    },
}

impl IntegrityError {
    /// The failed comparison behind a `Tampered` error, with `valid: false`.
    pub fn verification(&self) -> Option<Verification> {
        match self {
            Self::Tampered {
                path,
                expected,
                actual,
            } => Some(Verification {
                path: path.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
                valid: false,
            }),
            _ => None,
        }
    }
}

impl Categorized for IntegrityError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Read { .. } | Self::Write { .. } => ErrorCategory::Generic,
            Self::NotSigned { .. } | Self::MalformedSignature { .. } | Self::Tampered { .. } => {
                ErrorCategory::SecurityBlock
            }
        }
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub path: PathBuf,
    pub expected: Digest,
    pub actual: Digest,
    pub valid: bool,
}

pub fn signature_path(plan_file: &Path) -> PathBuf {
    let mut path: OsString = plan_file.as_os_str().to_os_string();
    path.push(SIGNATURE_EXTENSION);
    PathBuf::from(path)
}

/// Hash the plan and write the digest sidecar with owner-only permissions.
pub fn sign(plan_file: impl AsRef<Path>) -> Result<Digest, IntegrityError> {
    let plan_file = plan_file.as_ref();
    let digest = digest_file(plan_file)?;
    let sidecar = signature_path(plan_file);
    write_owner_only(&sidecar, digest.as_str()).map_err(|source| IntegrityError::Write {
        path: sidecar.clone(),
        source,
    })?;
    tracing::debug!(plan = %plan_file.display(), digest = %digest, "signed plan");
    Ok(digest)
}

/// Re-hash the plan and compare against its sidecar.
///
/// A mismatch is an error, not a `valid: false` result, so a caller cannot
/// ignore it by forgetting to inspect the flag. The error carries both
/// digests and the path; it never carries plan content.
pub fn verify(plan_file: impl AsRef<Path>) -> Result<Verification, IntegrityError> {
    let plan_file = plan_file.as_ref();
    let sidecar = signature_path(plan_file);
    let raw = match fs::read_to_string(&sidecar) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(IntegrityError::NotSigned {
                path: plan_file.to_path_buf(),
                signature_path: sidecar,
            });
        }
        Err(source) => {
            return Err(IntegrityError::Read {
                path: sidecar,
                source,
            });
        }
    };
    let expected = Digest::parse(&raw).ok_or_else(|| IntegrityError::MalformedSignature {
        signature_path: sidecar.clone(),
    })?;

    let actual = digest_file(plan_file)?;
    if expected != actual {
        return Err(IntegrityError::Tampered {
            path: plan_file.to_path_buf(),
            expected,
            actual,
        });
    }

    Ok(Verification {
        path: plan_file.to_path_buf(),
        expected,
        actual,
        valid: true,
    })
}

fn digest_file(path: &Path) -> Result<Digest, IntegrityError> {
    let bytes = fs::read(path).map_err(|source| IntegrityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Digest::from_bytes(&bytes))
}

fn write_owner_only(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;

    // `mode` only applies on creation; re-signing must not keep looser bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
