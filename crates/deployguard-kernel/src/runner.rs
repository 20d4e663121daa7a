//! Injected subprocess seam.
//!
//! Components that shell out (plan introspection, the Azure CLI backend)
//! receive a `CommandRunner` at construction. Tests hand in a scripted
//! runner; production code uses `SystemRunner`.

use crate::classify::classify_message;
use crate::error::{Categorized, ErrorCategory};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("{program} is not installed or not in PATH")]
    NotInstalled { program: String },

    #[error("command failed: {program} {args} ({message})")]
    CommandFailed {
        program: String,
        args: String,
        message: String,
    },
}

impl Categorized for RunnerError {
    /// A failed command is a tool failure unless its own output names a
    /// security, drift or policy condition.
    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotInstalled { .. } => ErrorCategory::ExternalToolFailure,
            Self::CommandFailed { message, .. } => match classify_message(message) {
                category @ (ErrorCategory::SecurityBlock
                | ErrorCategory::DriftDetected
                | ErrorCategory::PolicyFailure) => category,
                _ => ErrorCategory::ExternalToolFailure,
            },
        }
    }
}

/// One fully-specified invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn current_dir(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn display_args(&self) -> String {
        self.args.join(" ")
    }
}

/// Runs a command to completion and returns its stdout on success.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<String, RunnerError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<String, RunnerError> {
        (**self).run(spec)
    }
}

/// Blocking runner over `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<String, RunnerError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RunnerError::NotInstalled {
                    program: spec.program.clone(),
                }
            } else {
                RunnerError::CommandFailed {
                    program: spec.program.clone(),
                    args: spec.display_args(),
                    message: err.to_string(),
                }
            }
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr
            };
            Err(RunnerError::CommandFailed {
                program: spec.program.clone(),
                args: spec.display_args(),
                message,
            })
        }
    }
}
