//! Backend security-posture health report.

use crate::backend::PostureFlags;
use serde::{Deserialize, Serialize};

/// Lowest acceptable `min_tls_version`.
pub const MIN_TLS_VERSION: &str = "TLS1_2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fix: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub key: String,
    pub checks: Vec<HealthCheck>,
    pub healthy: bool,
}

impl BackendHealth {
    pub fn from_checks(key: impl Into<String>, checks: Vec<HealthCheck>) -> Self {
        let healthy = checks
            .iter()
            .filter(|check| check.required)
            .all(|check| check.status == HealthStatus::Pass);
        Self {
            key: key.into(),
            checks,
            healthy,
        }
    }

    /// The report when the backend could not be reached at all.
    pub fn unreachable(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::from_checks(
            key,
            vec![HealthCheck {
                name: "backend_reachable".to_string(),
                status: HealthStatus::Fail,
                message: message.into(),
                fix: "check credentials and network access to the state storage account"
                    .to_string(),
                required: true,
            }],
        )
    }

    pub fn failing(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks
            .iter()
            .filter(|check| check.status != HealthStatus::Pass)
    }
}

struct Rule {
    name: &'static str,
    required: bool,
    ok: fn(&PostureFlags) -> bool,
    pass: &'static str,
    fail: &'static str,
    fix: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        name: "https_only",
        required: true,
        ok: |flags| flags.https_only,
        pass: "only encrypted transport is accepted",
        fail: "plain HTTP transport is allowed",
        fix: "az storage account update --https-only true",
    },
    Rule {
        name: "min_tls_version",
        required: true,
        ok: |flags| tls_at_least(flags.min_tls_version.as_deref(), MIN_TLS_VERSION),
        pass: "minimum TLS version is 1.2 or later",
        fail: "minimum TLS version is below 1.2 or unset",
        fix: "az storage account update --min-tls-version TLS1_2",
    },
    Rule {
        name: "infrastructure_encryption",
        required: false,
        ok: |flags| flags.infrastructure_encryption,
        pass: "infrastructure (double) encryption at rest is enabled",
        fail: "infrastructure encryption is disabled",
        fix: "recreate the account with --require-infrastructure-encryption",
    },
    Rule {
        name: "versioning",
        required: true,
        ok: |flags| flags.versioning,
        pass: "blob versioning is enabled",
        fail: "blob versioning is disabled",
        fix: "az storage account blob-service-properties update --enable-versioning true",
    },
    Rule {
        name: "blob_soft_delete",
        required: true,
        ok: |flags| flags.blob_soft_delete,
        pass: "blob soft delete is enabled",
        fail: "blob soft delete is disabled",
        fix: "az storage account blob-service-properties update --enable-delete-retention true --delete-retention-days 30",
    },
    Rule {
        name: "container_soft_delete",
        required: false,
        ok: |flags| flags.container_soft_delete,
        pass: "container soft delete is enabled",
        fail: "container soft delete is disabled",
        fix: "az storage account blob-service-properties update --enable-container-delete-retention true --container-delete-retention-days 30",
    },
];

/// Run every posture rule. Each check is independent of the others.
pub fn evaluate(key: impl Into<String>, flags: &PostureFlags) -> BackendHealth {
    let checks = RULES
        .iter()
        .map(|rule| {
            let ok = (rule.ok)(flags);
            let status = match (ok, rule.required) {
                (true, _) => HealthStatus::Pass,
                (false, true) => HealthStatus::Fail,
                (false, false) => HealthStatus::Warn,
            };
            HealthCheck {
                name: rule.name.to_string(),
                status,
                message: if ok { rule.pass } else { rule.fail }.to_string(),
                fix: if ok { String::new() } else { rule.fix.to_string() },
                required: rule.required,
            }
        })
        .collect();
    BackendHealth::from_checks(key, checks)
}

/// Compare `TLS1_0`-style versions.
fn tls_at_least(actual: Option<&str>, minimum: &str) -> bool {
    match (actual.and_then(tls_rank), tls_rank(minimum)) {
        (Some(actual), Some(minimum)) => actual >= minimum,
        _ => false,
    }
}

fn tls_rank(version: &str) -> Option<(u32, u32)> {
    let normalized = version.trim().to_ascii_uppercase().replace('.', "_");
    let rest = normalized.strip_prefix("TLS")?;
    let rest = rest.trim_start_matches(['_', 'V']);
    let (major, minor) = rest.split_once('_').unwrap_or((rest, "0"));
    Some((major.parse().ok()?, minor.parse().ok()?))
}
