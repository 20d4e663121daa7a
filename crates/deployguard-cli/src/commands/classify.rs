use crate::support::print_json;
use deployguard_kernel::classify::{classify_message, matched_marker};
use serde_json::json;

pub fn run(message: String, json_output: bool) {
    let category = classify_message(&message);
    let marker = matched_marker(&message);

    if json_output {
        print_json(&json!({
            "message": message,
            "category": category,
            "exit_code": category.exit_code(),
            "marker": marker,
        }));
    } else {
        println!("{category} (exit {})", category.exit_code());
        if let Some(marker) = marker {
            println!("  Marker: {marker}");
        }
    }
}
