use deployguard_kernel::{
    Categorized, ErrorCategory, ProjectConfig, TaggedError, classify_categorized,
};
use secrecy::SecretString;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Environment variable naming the client id active in this process.
pub const ACTIVE_CLIENT_ENV: &str = "ARM_CLIENT_ID";
/// Environment variable holding an already-acquired access token.
pub const ACCESS_TOKEN_ENV: &str = "ARM_ACCESS_TOKEN";

/// Report `err` on stderr and exit with its category's code.
pub fn fail<E: Categorized + 'static>(err: &E) -> ! {
    let category = classify_categorized(err);
    eprintln!("error: {err}");
    tracing::debug!(%category, "exiting with categorized failure");
    std::process::exit(category.exit_code());
}

pub fn load_config_or_exit(path: &Path) -> ProjectConfig {
    ProjectConfig::load(path).unwrap_or_else(|err| fail(&err))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|err| {
        fail(&TaggedError::wrap(ErrorCategory::Generic, err))
    });
    println!("{rendered}");
}

pub fn active_client_id(explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| env_nonempty(ACTIVE_CLIENT_ENV))
}

/// Read the access token from `token_file`, else from the environment.
pub fn read_token(token_file: Option<&Path>) -> Result<Option<SecretString>, TaggedError> {
    if let Some(path) = token_file {
        let raw = fs::read_to_string(path).map_err(|err| {
            TaggedError::new(
                ErrorCategory::Validation,
                format!("failed to read token file {}: {err}", path.display()),
            )
        })?;
        return Ok(Some(SecretString::from(raw.trim().to_string())));
    }
    Ok(env_nonempty(ACCESS_TOKEN_ENV).map(SecretString::from))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
