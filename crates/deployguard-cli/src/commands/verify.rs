use crate::support::{fail, print_json};
use deployguard_kernel::integrity;
use std::path::PathBuf;

pub fn run(plan: PathBuf, json_output: bool) {
    let verification = match integrity::verify(&plan) {
        Ok(verification) => verification,
        Err(err) => {
            if json_output {
                if let Some(failed) = err.verification() {
                    print_json(&failed);
                }
            }
            fail(&err)
        }
    };

    if json_output {
        print_json(&verification);
    } else {
        println!("deployguard verify {}", plan.display());
        println!("  Expected: {}", verification.expected);
        println!("  Actual: {}", verification.actual);
        println!("  Valid: yes");
    }
}
