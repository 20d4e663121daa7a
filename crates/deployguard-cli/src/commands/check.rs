use crate::commands::identity::{describe_post_auth, describe_pre_auth};
use crate::support::{active_client_id, fail, load_config_or_exit, print_json, read_token};
use deployguard_kernel::{
    Categorized, PostAuthOutcome, PreAuthOutcome, ScopeValidator, SystemRunner, check_post_auth,
    check_pre_auth, integrity,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

pub struct Args {
    pub config_path: PathBuf,
    pub plan: PathBuf,
    pub work_dir: PathBuf,
    pub token_file: Option<PathBuf>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct Stage {
    name: &'static str,
    status: &'static str,
    detail: String,
}

struct Run {
    plan: PathBuf,
    json: bool,
    stages: Vec<Stage>,
}

impl Run {
    fn passed(&mut self, name: &'static str, detail: impl Into<String>) {
        self.stages.push(Stage {
            name,
            status: "passed",
            detail: detail.into(),
        });
    }

    fn skipped(&mut self, name: &'static str, detail: impl Into<String>) {
        self.stages.push(Stage {
            name,
            status: "skipped",
            detail: detail.into(),
        });
    }

    fn degraded(&mut self, name: &'static str, detail: impl Into<String>) {
        self.stages.push(Stage {
            name,
            status: "degraded",
            detail: detail.into(),
        });
    }

    fn blocked<E: Categorized + 'static>(mut self, name: &'static str, err: &E) -> ! {
        self.stages.push(Stage {
            name,
            status: "failed",
            detail: err.to_string(),
        });
        self.emit(false);
        fail(err)
    }

    fn emit(&self, passed: bool) {
        if self.json {
            print_json(&json!({
                "plan": self.plan.display().to_string(),
                "passed": passed,
                "stages": self.stages,
            }));
        } else {
            println!("deployguard check {}", self.plan.display());
            for stage in &self.stages {
                println!("  {}: {} ({})", stage.name, stage.status, stage.detail);
            }
        }
    }
}

/// Verify, then scope, then identity. The first failure ends the run.
pub fn run(args: Args) {
    let config = load_config_or_exit(&args.config_path);
    let mut run = Run {
        plan: args.plan.clone(),
        json: args.json,
        stages: Vec::new(),
    };

    match integrity::verify(&args.plan) {
        Ok(verification) => run.passed("verify", format!("sha256 {}", verification.actual)),
        Err(err) => run.blocked("verify", &err),
    }

    let report = ScopeValidator::new(SystemRunner)
        .with_terraform_bin(config.tools.terraform.clone())
        .validate_scope(&args.plan, &config.allowed_scope(), &args.work_dir);
    match report.into_result() {
        Ok(report) => match report.skipped {
            Some(reason) => run.skipped("scope", reason),
            None => run.passed("scope", "all subscription references allowed"),
        },
        Err(err) => run.blocked("scope", &err),
    }

    let active = active_client_id(None);
    match check_pre_auth(config.project.client_id.as_deref(), active.as_deref()) {
        Ok(outcome @ PreAuthOutcome::Skipped) => {
            run.skipped("identity_pre_auth", describe_pre_auth(outcome))
        }
        Ok(outcome) => run.passed("identity_pre_auth", describe_pre_auth(outcome)),
        Err(err) => run.blocked("identity_pre_auth", &err),
    }

    match config.binding() {
        None => run.skipped("identity_post_auth", "project.tenant_id is not configured"),
        Some(binding) => match read_token(args.token_file.as_deref()) {
            Err(err) => run.blocked("identity_post_auth", &err),
            Ok(None) => run.skipped("identity_post_auth", "no access token available"),
            Ok(Some(token)) => match check_post_auth(&binding, &token) {
                Ok(outcome @ PostAuthOutcome::Degraded { .. }) => {
                    run.degraded("identity_post_auth", describe_post_auth(&outcome))
                }
                Ok(outcome) => run.passed("identity_post_auth", describe_post_auth(&outcome)),
                Err(err) => run.blocked("identity_post_auth", &err),
            },
        },
    }

    run.emit(true);
}
