use crate::support::{
    ACCESS_TOKEN_ENV, active_client_id, fail, load_config_or_exit, print_json, read_token,
};
use deployguard_kernel::{
    ConfigError, ErrorCategory, PostAuthOutcome, PreAuthOutcome, ProjectBinding, ProjectConfig,
    TaggedError, check_post_auth, check_pre_auth,
};
use serde_json::json;
use std::path::{Path, PathBuf};

pub fn run_pre_auth(config_path: &Path, client_id: Option<String>, json_output: bool) {
    let config = load_config_or_exit(config_path);
    let expected = config.project.client_id.clone();
    let active = active_client_id(client_id);
    let outcome = check_pre_auth(expected.as_deref(), active.as_deref())
        .unwrap_or_else(|err| fail(&err));

    if json_output {
        print_json(&json!({
            "check": "pre_auth",
            "outcome": outcome,
            "expected_client": expected,
            "active_client": active,
        }));
    } else {
        println!("deployguard identity pre-auth");
        println!("  Expected client: {}", expected.as_deref().unwrap_or("(unset)"));
        println!("  Active client: {}", active.as_deref().unwrap_or("(unset)"));
        println!("  Outcome: {}", describe_pre_auth(outcome));
    }
}

pub fn run_post_auth(config_path: &Path, token_file: Option<PathBuf>, json_output: bool) {
    let config = load_config_or_exit(config_path);
    let binding = require_binding(&config).unwrap_or_else(|err| fail(&err));
    let token = match read_token(token_file.as_deref()) {
        Ok(Some(token)) => token,
        Ok(None) => fail(&missing_token()),
        Err(err) => fail(&err),
    };
    let outcome = check_post_auth(&binding, &token).unwrap_or_else(|err| fail(&err));

    if json_output {
        print_json(&json!({
            "check": "post_auth",
            "tenant_id": binding.tenant_id,
            "outcome": outcome,
        }));
    } else {
        println!("deployguard identity post-auth");
        println!("  Tenant: {}", binding.tenant_id);
        println!("  Outcome: {}", describe_post_auth(&outcome));
    }
}

pub fn require_binding(config: &ProjectConfig) -> Result<ProjectBinding, ConfigError> {
    config.binding().ok_or_else(|| {
        ConfigError::Invalid(
            "project.tenant_id is required for the post-auth binding check".to_string(),
        )
    })
}

pub fn missing_token() -> TaggedError {
    TaggedError::new(
        ErrorCategory::Validation,
        format!("no access token: pass --token-file or set {ACCESS_TOKEN_ENV}"),
    )
}

pub fn describe_pre_auth(outcome: PreAuthOutcome) -> &'static str {
    match outcome {
        PreAuthOutcome::Matched => "matched",
        PreAuthOutcome::Skipped => "skipped (client id not configured or not active)",
    }
}

pub fn describe_post_auth(outcome: &PostAuthOutcome) -> String {
    match outcome {
        PostAuthOutcome::Verified {
            tenant_id,
            client_id,
        } => match client_id {
            Some(client_id) => format!("verified (tenant {tenant_id}, client {client_id})"),
            None => format!("verified (tenant {tenant_id})"),
        },
        PostAuthOutcome::Degraded { reason } => format!("degraded ({reason})"),
    }
}
