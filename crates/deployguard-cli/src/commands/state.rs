use crate::cli::StateCommands;
use crate::support::{fail, load_config_or_exit, print_json, yes_no};
use deployguard_az::{AzBackend, AzLocation};
use deployguard_kernel::{BackendKind, ConfigError, ErrorCategory, SystemRunner, TaggedError};
use deployguard_state::{
    BreakMode, HealthStatus, LocalBackend, Snapshot, StateBackend, StateGuard, StdinConfirm,
};
use serde_json::json;
use std::path::Path;

pub fn run(config_path: &Path, command: StateCommands) {
    let config = load_config_or_exit(config_path);
    let prefix = config.state.prefix.clone();

    match config.state.backend {
        BackendKind::Local => {
            let backend = LocalBackend::new(&config.state.root);
            dispatch(&StateGuard::new(backend).with_prefix(prefix), command);
        }
        BackendKind::Azure => {
            let Some(account) = config.state.account.clone() else {
                fail(&ConfigError::Invalid(
                    "state.account is required when state.backend = \"azure\"".to_string(),
                ))
            };
            let location = AzLocation {
                account,
                container: config.state.container.clone(),
            };
            let backend =
                AzBackend::new(SystemRunner, location).with_az_bin(config.tools.az.clone());
            dispatch(&StateGuard::new(backend).with_prefix(prefix), command);
        }
    }
}

fn dispatch<B: StateBackend>(guard: &StateGuard<B>, command: StateCommands) {
    match command {
        StateCommands::Snapshot { key, tag, json } => {
            let snapshot = guard
                .create_snapshot(&key, &tag)
                .unwrap_or_else(|err| fail(&err));
            if json {
                print_json(&snapshot);
            } else {
                println!("deployguard state snapshot {key}");
                print_snapshot(&snapshot);
            }
        }

        StateCommands::SnapshotAll { tag, json } => {
            let snapshots = guard.snapshot_all(&tag).unwrap_or_else(|err| fail(&err));
            if json {
                print_json(&json!({
                    "count": snapshots.len(),
                    "snapshots": snapshots,
                }));
            } else {
                println!("deployguard state snapshot-all");
                println!("  Snapshots: {}", snapshots.len());
                for snapshot in &snapshots {
                    print_snapshot(snapshot);
                }
            }
        }

        StateCommands::Versions { key, json } => {
            let versions = guard.list_versions(&key).unwrap_or_else(|err| fail(&err));
            if json {
                print_json(&json!({
                    "key": key,
                    "versions": versions,
                }));
            } else {
                println!("deployguard state versions {key}");
                println!("  Versions: {}", versions.len());
                for version in &versions {
                    print_snapshot(version);
                }
            }
        }

        StateCommands::LockStatus { key, json } => {
            let lock = guard.lock_status(&key).unwrap_or_else(|err| fail(&err));
            if json {
                print_json(&lock);
            } else {
                println!("deployguard state lock-status {key}");
                println!("  Lease: {}", lock.lease_status);
            }
        }

        StateCommands::BreakLease { key, yes, json } => {
            let confirm = StdinConfirm;
            guard
                .break_lease(&key, BreakMode::detect(yes, &confirm))
                .unwrap_or_else(|err| fail(&err));
            if json {
                print_json(&json!({
                    "key": key,
                    "broken": true,
                }));
            } else {
                println!("deployguard state break-lease {key}");
                println!("  Lease broken: yes");
            }
        }

        StateCommands::Health { key, json } => {
            let health = guard.check_health(&key);
            if json {
                print_json(&health);
            } else {
                println!("deployguard state health {key}");
                println!("  Healthy: {}", yes_no(health.healthy));
                for check in &health.checks {
                    let marker = match check.status {
                        HealthStatus::Pass => "pass",
                        HealthStatus::Fail => "FAIL",
                        HealthStatus::Warn => "warn",
                    };
                    println!("    [{marker}] {}: {}", check.name, check.message);
                    if !check.fix.is_empty() {
                        println!("           fix: {}", check.fix);
                    }
                }
            }

            if !health.healthy {
                let failing: Vec<&str> = health
                    .failing()
                    .filter(|check| check.required)
                    .map(|check| check.name.as_str())
                    .collect();
                fail(&TaggedError::new(
                    ErrorCategory::PolicyFailure,
                    format!(
                        "state backend posture check failed for {key}: {}",
                        failing.join(", ")
                    ),
                ));
            }
        }
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!(
        "    - {} @ {} [{}] {}",
        snapshot.key,
        snapshot.version_id,
        snapshot.tag,
        snapshot.created_at.to_rfc3339()
    );
}
