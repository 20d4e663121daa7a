//! Identity binding: does the active credential belong to the project?
//!
//! Two stacked checks answer the same question:
//!
//! - **pre-auth** compares the configured client id against the client id
//!   active in the environment, before any token exists. It only fires when
//!   both sides are known.
//! - **post-auth** decodes the acquired access token's claims and compares
//!   tenant and application ids against the project binding.
//!
//! # Precondition
//!
//! Post-auth decoding does **not** verify the token signature. The token must
//! come from a signature-verified acquisition flow upstream; this check is a
//! second line and must never be the only authentication gate.

use crate::error::{Categorized, ErrorCategory};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// The credential executing the deployment. Read-only to this layer.
#[derive(Debug)]
pub struct Credential {
    pub tenant_id: String,
    pub client_id: String,
    pub raw_token: SecretString,
}

/// The declared association between a project and its service identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBinding {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error(
        "identity binding mismatch (pre-auth): project expects client {expected_client}, environment has {actual_client}"
    )]
    PreAuthMismatch {
        expected_client: String,
        actual_client: String,
    },

    #[error(
        "identity binding violation: tenant mismatch, project expects {expected_tenant}, token tid is {actual_tenant_claim:?}"
    )]
    PostAuthTenantMismatch {
        expected_tenant: String,
        actual_tenant_claim: String,
    },

    #[error(
        "identity binding violation: client mismatch, project expects {expected_client}, token appid/azp is {actual_claim:?}"
    )]
    PostAuthClientMismatch {
        expected_client: String,
        actual_claim: String,
    },
}

impl Categorized for BindingError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::SecurityBlock
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreAuthOutcome {
    Matched,
    /// One side had no client id configured.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostAuthOutcome {
    Verified {
        tenant_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// The token could not be decoded; the check was not performed.
    Degraded { reason: String },
}

/// The subset of access-token claims the binding check reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub appid: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenDecodeError {
    #[error("token is not a three-part JWT")]
    Shape,
    #[error("token payload is not base64url: {0}")]
    Base64(String),
    #[error("token payload is not a JSON claims object: {0}")]
    Json(String),
}

/// Pre-auth check. Skips unless both client ids are present and non-empty.
pub fn check_pre_auth(
    expected_client: Option<&str>,
    active_client: Option<&str>,
) -> Result<PreAuthOutcome, BindingError> {
    let expected = expected_client.map(str::trim).filter(|s| !s.is_empty());
    let active = active_client.map(str::trim).filter(|s| !s.is_empty());
    let (Some(expected), Some(active)) = (expected, active) else {
        return Ok(PreAuthOutcome::Skipped);
    };

    if same_id(expected, active) {
        Ok(PreAuthOutcome::Matched)
    } else {
        Err(BindingError::PreAuthMismatch {
            expected_client: expected.to_string(),
            actual_client: active.to_string(),
        })
    }
}

/// Post-auth check against the decoded (unverified) token claims.
pub fn check_post_auth(
    binding: &ProjectBinding,
    token: &SecretString,
) -> Result<PostAuthOutcome, BindingError> {
    let claims = match decode_claims(token.expose_secret()) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(error = %err, "access token could not be decoded; post-auth binding check degraded");
            return Ok(PostAuthOutcome::Degraded {
                reason: err.to_string(),
            });
        }
    };
    check_claims(binding, &claims)
}

/// Compare already-decoded claims against the binding.
pub fn check_claims(
    binding: &ProjectBinding,
    claims: &TokenClaims,
) -> Result<PostAuthOutcome, BindingError> {
    let actual_tenant = claims.tid.as_deref().unwrap_or_default();
    if !same_id(&binding.tenant_id, actual_tenant) {
        return Err(BindingError::PostAuthTenantMismatch {
            expected_tenant: binding.tenant_id.clone(),
            actual_tenant_claim: actual_tenant.to_string(),
        });
    }

    let expected_client = binding
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(expected_client) = expected_client else {
        return Ok(PostAuthOutcome::Verified {
            tenant_id: actual_tenant.to_string(),
            client_id: claims.appid.clone().or_else(|| claims.azp.clone()),
        });
    };

    let matched = [claims.appid.as_deref(), claims.azp.as_deref()]
        .into_iter()
        .flatten()
        .find(|claim| same_id(expected_client, claim));
    match matched {
        Some(client) => Ok(PostAuthOutcome::Verified {
            tenant_id: actual_tenant.to_string(),
            client_id: Some(client.to_string()),
        }),
        None => Err(BindingError::PostAuthClientMismatch {
            expected_client: expected_client.to_string(),
            actual_claim: claims
                .appid
                .clone()
                .or_else(|| claims.azp.clone())
                .unwrap_or_default(),
        }),
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenDecodeError> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenDecodeError::Shape);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenDecodeError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenDecodeError::Json(e.to_string()))
}

impl Credential {
    /// Run both binding checks for this credential.
    ///
    /// The credential's own `client_id` is the active client for pre-auth;
    /// an empty one skips that stage. Must only be called with a credential
    /// obtained through a signature-verified flow.
    pub fn check_binding(
        &self,
        binding: &ProjectBinding,
    ) -> Result<PostAuthOutcome, BindingError> {
        tracing::debug!(
            tenant = %self.tenant_id,
            client = %self.client_id,
            "checking credential binding"
        );
        check_pre_auth(binding.client_id.as_deref(), Some(&self.client_id))?;
        check_post_auth(binding, &self.raw_token)
    }
}

fn same_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_with(claims: serde_json::Value) -> SecretString {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        SecretString::from(format!("{header}.{payload}.c2lnbmF0dXJl"))
    }

    fn binding(tenant: &str, client: Option<&str>) -> ProjectBinding {
        ProjectBinding {
            tenant_id: tenant.to_string(),
            client_id: client.map(str::to_string),
        }
    }

    #[test]
    fn pre_auth_equal_ids_match() {
        assert_eq!(
            check_pre_auth(Some("client-1"), Some("CLIENT-1")),
            Ok(PreAuthOutcome::Matched)
        );
    }

    #[test]
    fn pre_auth_unequal_ids_mismatch() {
        assert_eq!(
            check_pre_auth(Some("client-1"), Some("client-2")),
            Err(BindingError::PreAuthMismatch {
                expected_client: "client-1".into(),
                actual_client: "client-2".into(),
            })
        );
    }

    #[test]
    fn pre_auth_skips_when_either_side_empty() {
        assert_eq!(check_pre_auth(None, Some("client-2")), Ok(PreAuthOutcome::Skipped));
        assert_eq!(check_pre_auth(Some("client-1"), None), Ok(PreAuthOutcome::Skipped));
        assert_eq!(check_pre_auth(Some("  "), Some("client-2")), Ok(PreAuthOutcome::Skipped));
        assert_eq!(check_pre_auth(Some("client-1"), Some("")), Ok(PreAuthOutcome::Skipped));
    }

    #[test]
    fn post_auth_tenant_mismatch_is_fatal() {
        let token = token_with(json!({ "tid": "tenant-other", "appid": "client-1" }));
        let err = check_post_auth(&binding("tenant-1", Some("client-1")), &token)
            .expect_err("tenant mismatch must fail");
        assert_eq!(
            err,
            BindingError::PostAuthTenantMismatch {
                expected_tenant: "tenant-1".into(),
                actual_tenant_claim: "tenant-other".into(),
            }
        );
        assert_eq!(err.category(), ErrorCategory::SecurityBlock);
    }

    #[test]
    fn post_auth_matching_claims_verify() {
        let token = token_with(json!({ "tid": "tenant-1", "appid": "client-1" }));
        let outcome = check_post_auth(&binding("tenant-1", Some("client-1")), &token)
            .expect("matching claims should verify");
        assert_eq!(
            outcome,
            PostAuthOutcome::Verified {
                tenant_id: "tenant-1".into(),
                client_id: Some("client-1".into()),
            }
        );
    }

    #[test]
    fn post_auth_accepts_azp_when_appid_absent() {
        let token = token_with(json!({ "tid": "tenant-1", "azp": "client-1" }));
        assert!(check_post_auth(&binding("tenant-1", Some("client-1")), &token).is_ok());
    }

    #[test]
    fn post_auth_client_mismatch_is_fatal() {
        let token = token_with(json!({ "tid": "tenant-1", "appid": "client-9" }));
        let err = check_post_auth(&binding("tenant-1", Some("client-1")), &token)
            .expect_err("client mismatch must fail");
        assert!(matches!(err, BindingError::PostAuthClientMismatch { ref actual_claim, .. } if actual_claim == "client-9"));
    }

    #[test]
    fn post_auth_missing_client_claims_is_mismatch() {
        let token = token_with(json!({ "tid": "tenant-1" }));
        let err = check_post_auth(&binding("tenant-1", Some("client-1")), &token)
            .expect_err("absent client claim must fail");
        assert!(matches!(err, BindingError::PostAuthClientMismatch { ref actual_claim, .. } if actual_claim.is_empty()));
    }

    #[test]
    fn post_auth_without_configured_client_checks_tenant_only() {
        let token = token_with(json!({ "tid": "tenant-1", "appid": "anything" }));
        assert!(check_post_auth(&binding("tenant-1", None), &token).is_ok());
    }

    #[test]
    fn malformed_token_degrades_without_error() {
        let outcome = check_post_auth(
            &binding("tenant-1", Some("client-1")),
            &SecretString::from("not-a-jwt".to_string()),
        )
        .expect("decode failure must not block");
        assert!(matches!(outcome, PostAuthOutcome::Degraded { .. }));

        let garbage_payload = SecretString::from("aGVhZGVy.@@@.c2ln".to_string());
        let outcome = check_post_auth(&binding("tenant-1", None), &garbage_payload)
            .expect("decode failure must not block");
        assert!(matches!(outcome, PostAuthOutcome::Degraded { .. }));
    }

    #[test]
    fn decode_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"tid":"t"}"#);
        let claims = decode_claims(&format!("h.{payload}.s")).expect("padded payload decodes");
        assert_eq!(claims.tid.as_deref(), Some("t"));
    }

    fn credential(client: &str, claims: serde_json::Value) -> Credential {
        Credential {
            tenant_id: "tenant-1".into(),
            client_id: client.into(),
            raw_token: token_with(claims),
        }
    }

    #[test]
    fn credential_client_drives_pre_auth() {
        let claims = json!({ "tid": "tenant-1", "appid": "client-1" });
        let binding = binding("tenant-1", Some("client-1"));

        assert!(credential("client-1", claims.clone()).check_binding(&binding).is_ok());
        assert_eq!(
            credential("client-2", claims).check_binding(&binding),
            Err(BindingError::PreAuthMismatch {
                expected_client: "client-1".into(),
                actual_client: "client-2".into(),
            })
        );
    }

    #[test]
    fn credential_without_client_falls_through_to_token() {
        let binding = binding("tenant-1", Some("client-1"));
        let foreign = credential("", json!({ "tid": "tenant-9", "appid": "client-1" }));
        assert!(matches!(
            foreign.check_binding(&binding),
            Err(BindingError::PostAuthTenantMismatch { .. })
        ));
    }
}
