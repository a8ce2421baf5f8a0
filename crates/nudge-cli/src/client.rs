//! Blocking JSON client for the server's job endpoints.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

pub struct ApiClient {
    base: String,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(base: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base: base.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        read(self.agent.get(&url).call(), &url)
    }

    pub fn post(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        read(
            self.agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_string("{}"),
            &url,
        )
    }
}

fn read(result: std::result::Result<ureq::Response, ureq::Error>, url: &str) -> Result<Value> {
    match result {
        Ok(resp) => {
            let body = resp
                .into_string()
                .with_context(|| format!("failed to read response from {url}"))?;
            serde_json::from_str(&body).with_context(|| format!("invalid JSON from {url}"))
        }
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(String::from))
                .unwrap_or(body);
            Err(anyhow!("server returned {code}: {message}"))
        }
        Err(e) => Err(anyhow!("could not reach nudge server at {url}: {e}")),
    }
}
