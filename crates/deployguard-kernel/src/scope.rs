//! Subscription scope validation over a plan's JSON representation.
//!
//! The plan is introspected with `terraform show -json <plan>` and walked for
//! two kinds of subscription references:
//!
//! ```text
//! configuration.provider_config.<name>.expressions.subscription_id.constant_value
//! planned_values.root_module(.child_modules[])*.resources[].values.subscription_id
//! ```
//!
//! Every id outside the allow-list is reported; the walk never stops at the
//! first hit. Introspection failures degrade to a skipped check because the
//! validator does not own the availability of the planning tool.

use crate::error::{Categorized, ErrorCategory};
use crate::runner::{CommandRunner, CommandSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Address reported for subscription ids declared on a provider block.
pub const PROVIDER_CONFIG_ADDRESS: &str = "(provider config)";

pub const DEFAULT_TERRAFORM_BIN: &str = "terraform";

/// Case-insensitive set of authorized subscription ids.
///
/// An empty scope disables the check entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedScope {
    ids: BTreeSet<String>,
}

impl AllowedScope {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|id| normalize_subscription_id(id.as_ref()))
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.ids.contains(&normalize_subscription_id(subscription_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeViolation {
    pub subscription_id: String,
    pub resource_address: String,
}

/// Result of one scope validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeReport {
    pub violations: Vec<ScopeViolation>,
    /// Why the check did not run, if it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl ScopeReport {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            violations: Vec::new(),
            skipped: Some(reason.into()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turn violations into an error for callers that block on them.
    pub fn into_result(self) -> Result<Self, ScopeError> {
        if self.violations.is_empty() {
            Ok(self)
        } else {
            Err(ScopeError::Violations(self.violations))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error(
        "scope violation: {} reference(s) outside allowed scope: {}",
        .0.len(),
        summarize(.0)
    )]
    Violations(Vec<ScopeViolation>),
}

impl Categorized for ScopeError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::SecurityBlock
    }
}

fn summarize(violations: &[ScopeViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} -> {}", v.resource_address, v.subscription_id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scope validator bound to an introspection tool.
pub struct ScopeValidator<R> {
    runner: R,
    terraform_bin: String,
}

impl<R: CommandRunner> ScopeValidator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            terraform_bin: DEFAULT_TERRAFORM_BIN.to_string(),
        }
    }

    pub fn with_terraform_bin(mut self, bin: impl Into<String>) -> Self {
        self.terraform_bin = bin.into();
        self
    }

    /// Introspect `plan_file` from `work_dir` and report out-of-scope ids.
    pub fn validate_scope(
        &self,
        plan_file: &Path,
        allowed: &AllowedScope,
        work_dir: &Path,
    ) -> ScopeReport {
        if allowed.is_empty() {
            return ScopeReport::skipped("allow-list is empty");
        }

        let spec = CommandSpec::new(
            self.terraform_bin.clone(),
            [
                "show".to_string(),
                "-json".to_string(),
                plan_file.display().to_string(),
            ],
        )
        .current_dir(work_dir);

        let stdout = match self.runner.run(&spec) {
            Ok(stdout) => stdout,
            Err(err) => {
                tracing::warn!(plan = %plan_file.display(), error = %err, "plan introspection unavailable; scope check skipped");
                return ScopeReport::skipped(format!("plan introspection failed: {err}"));
            }
        };

        match serde_json::from_str::<Value>(&stdout) {
            Ok(plan) => ScopeReport {
                violations: scan_plan_json(&plan, allowed),
                skipped: None,
            },
            Err(err) => {
                tracing::warn!(plan = %plan_file.display(), error = %err, "plan JSON unparseable; scope check skipped");
                ScopeReport::skipped(format!("plan JSON could not be parsed: {err}"))
            }
        }
    }
}

/// Walk an already-parsed plan document.
pub fn scan_plan_json(plan: &Value, allowed: &AllowedScope) -> Vec<ScopeViolation> {
    let mut violations = Vec::new();

    if let Some(providers) = plan
        .pointer("/configuration/provider_config")
        .and_then(Value::as_object)
    {
        for provider in providers.values() {
            let declared = provider
                .pointer("/expressions/subscription_id/constant_value")
                .and_then(Value::as_str);
            if let Some(id) = declared {
                check_id(id, PROVIDER_CONFIG_ADDRESS, allowed, &mut violations);
            }
        }
    }

    if let Some(root) = plan.pointer("/planned_values/root_module") {
        walk_module(root, allowed, &mut violations);
    }

    violations
}

fn walk_module(module: &Value, allowed: &AllowedScope, violations: &mut Vec<ScopeViolation>) {
    for resource in module
        .get("resources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(id) = resource
            .pointer("/values/subscription_id")
            .and_then(Value::as_str)
        else {
            continue;
        };
        let address = resource
            .get("address")
            .and_then(Value::as_str)
            .unwrap_or("(unknown address)");
        check_id(id, address, allowed, violations);
    }

    for child in module
        .get("child_modules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        walk_module(child, allowed, violations);
    }
}

fn check_id(
    raw: &str,
    address: &str,
    allowed: &AllowedScope,
    violations: &mut Vec<ScopeViolation>,
) {
    let id = normalize_subscription_id(raw);
    if id.is_empty() || allowed.contains(&id) {
        return;
    }
    violations.push(ScopeViolation {
        subscription_id: id,
        resource_address: address.to_string(),
    });
}

/// Lowercase and strip a leading `/subscriptions/` resource-id prefix.
fn normalize_subscription_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    match lower.strip_prefix("/subscriptions/") {
        Some(rest) => rest.split('/').next().unwrap_or_default().to_string(),
        None => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerError;
    use crate::testing::ScriptedRunner;
    use serde_json::json;

    fn resource(address: &str, subscription: &str) -> Value {
        json!({ "address": address, "values": { "subscription_id": subscription } })
    }

    fn plan_with_root(resources: Vec<Value>) -> Value {
        json!({ "planned_values": { "root_module": { "resources": resources } } })
    }

    #[test]
    fn allowed_subscription_has_no_violation() {
        let plan = plan_with_root(vec![resource("azurerm_resource_group.main", "sub-a")]);
        let allowed = AllowedScope::new(["sub-a"]);
        assert!(scan_plan_json(&plan, &allowed).is_empty());
    }

    #[test]
    fn rogue_subscription_reports_resource_address() {
        let plan = plan_with_root(vec![
            resource("azurerm_resource_group.main", "sub-a"),
            resource("azurerm_storage_account.exfil", "rogue"),
        ]);
        let allowed = AllowedScope::new(["sub-a"]);
        let violations = scan_plan_json(&plan, &allowed);
        assert_eq!(
            violations,
            vec![ScopeViolation {
                subscription_id: "rogue".into(),
                resource_address: "azurerm_storage_account.exfil".into(),
            }]
        );
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        let plan = plan_with_root(vec![resource("azurerm_resource_group.main", "SUB-A")]);
        let allowed = AllowedScope::new(["Sub-A"]);
        assert!(scan_plan_json(&plan, &allowed).is_empty());
    }

    #[test]
    fn resource_id_style_subscription_is_normalized() {
        let plan = plan_with_root(vec![resource(
            "azurerm_subscription_policy_assignment.p",
            "/subscriptions/sub-a",
        )]);
        assert!(scan_plan_json(&plan, &AllowedScope::new(["sub-a"])).is_empty());
    }

    #[test]
    fn violation_three_levels_deep_is_detected() {
        let plan = json!({
            "planned_values": {
                "root_module": {
                    "child_modules": [{
                        "address": "module.a",
                        "child_modules": [{
                            "address": "module.a.module.b",
                            "child_modules": [{
                                "address": "module.a.module.b.module.c",
                                "resources": [
                                    resource("module.a.module.b.module.c.azurerm_key_vault.kv", "rogue")
                                ]
                            }]
                        }]
                    }]
                }
            }
        });
        let violations = scan_plan_json(&plan, &AllowedScope::new(["sub-a"]));
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].resource_address,
            "module.a.module.b.module.c.azurerm_key_vault.kv"
        );
    }

    #[test]
    fn provider_config_and_resources_are_aggregated() {
        let plan = json!({
            "configuration": {
                "provider_config": {
                    "azurerm": { "expressions": { "subscription_id": { "constant_value": "rogue-provider" } } },
                    "azurerm.ok": { "expressions": { "subscription_id": { "constant_value": "sub-a" } } }
                }
            },
            "planned_values": {
                "root_module": {
                    "resources": [resource("azurerm_resource_group.one", "rogue-1")],
                    "child_modules": [{ "resources": [resource("module.m.azurerm_resource_group.two", "rogue-2")] }]
                }
            }
        });
        let violations = scan_plan_json(&plan, &AllowedScope::new(["sub-a"]));
        let addresses: Vec<&str> = violations
            .iter()
            .map(|v| v.resource_address.as_str())
            .collect();
        assert_eq!(
            addresses,
            vec![
                PROVIDER_CONFIG_ADDRESS,
                "azurerm_resource_group.one",
                "module.m.azurerm_resource_group.two"
            ]
        );
    }

    #[test]
    fn missing_sections_are_tolerated() {
        let allowed = AllowedScope::new(["sub-a"]);
        assert!(scan_plan_json(&json!({}), &allowed).is_empty());
        assert!(scan_plan_json(&json!({ "planned_values": {} }), &allowed).is_empty());
        let no_values = json!({ "planned_values": { "root_module": { "resources": [{ "address": "x" }] } } });
        assert!(scan_plan_json(&no_values, &allowed).is_empty());
    }

    #[test]
    fn empty_allow_list_never_invokes_tool() {
        let runner = ScriptedRunner::default();
        let validator = ScopeValidator::new(&runner);
        let report = validator.validate_scope(
            Path::new("main.tfplan"),
            &AllowedScope::default(),
            Path::new("."),
        );
        assert!(report.is_clean());
        assert!(report.skipped.is_some());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn validate_scope_runs_terraform_show_in_work_dir() {
        let plan = plan_with_root(vec![resource("azurerm_resource_group.main", "rogue")]);
        let runner = ScriptedRunner::replying(vec![Ok(plan.to_string())]);
        let validator = ScopeValidator::new(&runner).with_terraform_bin("tofu");

        let report = validator.validate_scope(
            Path::new("main.tfplan"),
            &AllowedScope::new(["sub-a"]),
            Path::new("/work"),
        );
        assert_eq!(report.violations.len(), 1);
        assert!(report.skipped.is_none());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "tofu");
        assert_eq!(calls[0].display_args(), "show -json main.tfplan");
        assert_eq!(calls[0].cwd.as_deref(), Some(Path::new("/work")));

        let err = report.into_result().expect_err("violations should block");
        assert_eq!(err.category(), ErrorCategory::SecurityBlock);
        assert!(err.to_string().contains("azurerm_resource_group.main -> rogue"));
    }

    #[test]
    fn introspection_failure_is_soft() {
        let runner = ScriptedRunner::replying(vec![Err(RunnerError::NotInstalled {
            program: "terraform".into(),
        })]);
        let report = ScopeValidator::new(&runner).validate_scope(
            Path::new("main.tfplan"),
            &AllowedScope::new(["sub-a"]),
            Path::new("."),
        );
        assert!(report.is_clean());
        assert!(report.skipped.is_some());
    }

    #[test]
    fn unparseable_output_is_soft() {
        let runner = ScriptedRunner::replying(vec![Ok("not json".into())]);
        let report = ScopeValidator::new(&runner).validate_scope(
            Path::new("main.tfplan"),
            &AllowedScope::new(["sub-a"]),
            Path::new("."),
        );
        assert!(report.is_clean());
        assert!(
            report
                .skipped
                .as_deref()
                .is_some_and(|reason| reason.contains("could not be parsed"))
        );
    }
}
