//! Project configuration loaded from `.deployguard/project.toml`.

use crate::error::{Categorized, ErrorCategory};
use crate::identity::ProjectBinding;
use crate::scope::{AllowedScope, DEFAULT_TERRAFORM_BIN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = ".deployguard/project.toml";
pub const DEFAULT_LOCAL_STATE_ROOT: &str = ".deployguard/state";
pub const DEFAULT_AZ_BIN: &str = "az";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Categorized for ConfigError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Read { .. } => ErrorCategory::Generic,
            Self::Parse { .. } | Self::Invalid(_) => ErrorCategory::Validation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub allowed_subscriptions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Local,
    Azure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSection {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_state_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default)]
    pub prefix: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            root: default_state_root(),
            account: None,
            container: default_container(),
            prefix: String::new(),
        }
    }
}

fn default_state_root() -> PathBuf {
    PathBuf::from(DEFAULT_LOCAL_STATE_ROOT)
}

fn default_container() -> String {
    "tfstate".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsSection {
    #[serde(default = "default_terraform")]
    pub terraform: String,
    #[serde(default = "default_az")]
    pub az: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            terraform: default_terraform(),
            az: default_az(),
        }
    }
}

fn default_terraform() -> String {
    DEFAULT_TERRAFORM_BIN.to_string()
}

fn default_az() -> String {
    DEFAULT_AZ_BIN.to_string()
}

impl ProjectConfig {
    /// Load and validate a config file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no project config; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state.backend == BackendKind::Azure
            && self
                .state
                .account
                .as_deref()
                .is_none_or(|account| account.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "state.account is required when state.backend = \"azure\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn allowed_scope(&self) -> AllowedScope {
        AllowedScope::new(&self.project.allowed_subscriptions)
    }

    /// The project binding, if a tenant is configured.
    pub fn binding(&self) -> Option<ProjectBinding> {
        let tenant_id = self.project.tenant_id.trim();
        if tenant_id.is_empty() {
            return None;
        }
        Some(ProjectBinding {
            tenant_id: tenant_id.to_string(),
            client_id: self.project.client_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TempDirGuard;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDirGuard::new("config-missing");
        let config = ProjectConfig::load(dir.path().join("project.toml")).expect("defaults");
        assert_eq!(config, ProjectConfig::default());
        assert!(config.allowed_scope().is_empty());
        assert!(config.binding().is_none());
        assert_eq!(config.tools.terraform, "terraform");
        assert_eq!(config.state.container, "tfstate");
    }

    #[test]
    fn full_file_parses() {
        let dir = TempDirGuard::new("config-full");
        let path = dir.path().join("project.toml");
        fs::write(
            &path,
            r#"
[project]
name = "payments"
tenant_id = "tenant-1"
client_id = "client-1"
allowed_subscriptions = ["sub-a", "SUB-B"]

[state]
backend = "azure"
account = "tfstateacct"
container = "state"
prefix = "payments/"

[tools]
terraform = "tofu"
"#,
        )
        .expect("config should be written");

        let config = ProjectConfig::load(&path).expect("config should parse");
        assert_eq!(config.state.backend, BackendKind::Azure);
        assert_eq!(config.tools.terraform, "tofu");
        assert_eq!(config.tools.az, "az");
        assert!(config.allowed_scope().contains("sub-b"));
        assert_eq!(
            config.binding(),
            Some(ProjectBinding {
                tenant_id: "tenant-1".into(),
                client_id: Some("client-1".into()),
            })
        );
    }

    #[test]
    fn azure_backend_requires_account() {
        let dir = TempDirGuard::new("config-azure");
        let path = dir.path().join("project.toml");
        fs::write(&path, "[state]\nbackend = \"azure\"\n").expect("config should be written");
        let err = ProjectConfig::load(&path).expect_err("account is required");
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDirGuard::new("config-unknown");
        let path = dir.path().join("project.toml");
        fs::write(&path, "[project]\ntenant = \"typo\"\n").expect("config should be written");
        assert!(matches!(
            ProjectConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
