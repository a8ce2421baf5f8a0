use crate::client::ApiClient;
use crate::output::print_json;
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

/// Long enough for a full sweep plus a superseding wait.
const SCAN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub fn run(server: &str, owner: &str, supersede: bool, json: bool) -> Result<()> {
    let client = ApiClient::new(server, SCAN_TIMEOUT);
    let path = if supersede {
        format!("/api/jobs/scan/{owner}?supersede=true")
    } else {
        format!("/api/jobs/scan/{owner}")
    };
    let report = client.post(&path)?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &Value) {
    println!(
        "{} {} for {}: {}",
        report["class"].as_str().unwrap_or("scan"),
        report["job_id"].as_str().unwrap_or("-"),
        report["owner"].as_str().unwrap_or("-"),
        report["status"].as_str().unwrap_or("unknown"),
    );
    println!(
        "  processed {}/{} in {}ms (analyzed {}, cached {}, busy {})",
        report["processed"], report["total"], report["elapsed_ms"], report["analyzed"],
        report["cached"], report["busy"],
    );
    if report["hit_timeout"].as_bool().unwrap_or(false) {
        println!("  stopped at the deadline; run again to continue");
    }
    if let Some(errors) = report["errors"].as_array() {
        for e in errors {
            println!(
                "  error: {}: {}",
                e["item"].as_str().unwrap_or("?"),
                e["message"].as_str().unwrap_or("")
            );
        }
    }
}
