use crate::client::ApiClient;
use crate::output::print_json;
use anyhow::Result;
use std::time::Duration;

pub fn run(server: &str, owner: &str, json: bool) -> Result<()> {
    let client = ApiClient::new(server, Duration::from_secs(15));
    let result = client.post(&format!("/api/jobs/scan/{owner}/cancel"))?;

    if json {
        return print_json(&result);
    }
    if result["cancelled"].as_bool().unwrap_or(false) {
        println!("Cancellation requested for {owner}; the sweep stops after its current batch.");
    } else {
        println!("No sweep is running for {owner}.");
    }
    Ok(())
}
