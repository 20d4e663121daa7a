use crate::support::{fail, load_config_or_exit, print_json};
use deployguard_kernel::{ScopeReport, ScopeValidator, SystemRunner};
use serde_json::json;
use std::path::{Path, PathBuf};

pub fn run(config_path: &Path, plan: PathBuf, work_dir: PathBuf, json_output: bool) {
    let config = load_config_or_exit(config_path);
    let allowed = config.allowed_scope();
    let report = ScopeValidator::new(SystemRunner)
        .with_terraform_bin(config.tools.terraform.clone())
        .validate_scope(&plan, &allowed, &work_dir);

    if json_output {
        print_json(&json!({
            "plan": plan.display().to_string(),
            "allowed_subscriptions": allowed.len(),
            "violations": report.violations,
            "skipped": report.skipped,
        }));
    } else {
        print_report(&plan, &report);
    }

    if let Err(err) = report.into_result() {
        fail(&err);
    }
}

pub fn print_report(plan: &Path, report: &ScopeReport) {
    println!("deployguard scope {}", plan.display());
    if let Some(reason) = &report.skipped {
        println!("  Skipped: {reason}");
        return;
    }
    println!("  Violations: {}", report.violations.len());
    for violation in &report.violations {
        println!(
            "    - {} -> {}",
            violation.resource_address, violation.subscription_id
        );
    }
}
