use crate::support::{fail, print_json};
use deployguard_kernel::integrity;
use serde_json::json;
use std::path::PathBuf;

pub fn run(plan: PathBuf, json_output: bool) {
    let digest = integrity::sign(&plan).unwrap_or_else(|err| fail(&err));
    let signature = integrity::signature_path(&plan);

    if json_output {
        print_json(&json!({
            "plan": plan.display().to_string(),
            "signature": signature.display().to_string(),
            "sha256": digest,
        }));
    } else {
        println!("deployguard sign {}", plan.display());
        println!("  SHA-256: {digest}");
        println!("  Signature: {}", signature.display());
    }
}
