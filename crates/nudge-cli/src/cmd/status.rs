use crate::client::ApiClient;
use crate::output::print_json;
use anyhow::Result;
use std::time::Duration;

pub fn run(server: &str, owner: &str, json: bool) -> Result<()> {
    let client = ApiClient::new(server, Duration::from_secs(15));
    let status = client.get(&format!("/api/jobs/scan/{owner}"))?;

    if json {
        return print_json(&status);
    }
    match status["active"].as_object() {
        Some(active) => println!(
            "Running: {} (started {})",
            active["job_id"].as_str().unwrap_or("-"),
            active["started_at"].as_str().unwrap_or("-")
        ),
        None => println!("No sweep running for {owner}."),
    }
    if status["last_report"].is_object() {
        println!("Last sweep:");
        super::scan::print_report(&status["last_report"]);
    }
    Ok(())
}
