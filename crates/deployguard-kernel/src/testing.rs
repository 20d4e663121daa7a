//! Test support shared by the deployguard crates.

use crate::runner::{CommandRunner, CommandSpec, RunnerError};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique directory under the system temp dir, removed on drop.
pub struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    pub fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "deployguard-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Replays canned responses in order and records every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: RefCell<Vec<Result<String, RunnerError>>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn replying(responses: Vec<Result<String, RunnerError>>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: RefCell::new(responses),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<String, RunnerError> {
        self.calls.borrow_mut().push(spec.clone());
        self.responses.borrow_mut().pop().unwrap_or_else(|| {
            panic!(
                "unexpected command: {} {}",
                spec.program,
                spec.display_args()
            )
        })
    }
}
