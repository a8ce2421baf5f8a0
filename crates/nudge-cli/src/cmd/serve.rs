use anyhow::{Context, Result};
use nudge_core::config::Config;
use nudge_server::AppState;
use std::path::Path;

pub fn run(config_path: &Path, port: u16, webhook_secret: Option<String>) -> Result<()> {
    let config = load(config_path)?;

    let warnings = config
        .ensure_valid()
        .context("refusing to start; run `nudge config validate`")?;
    for w in &warnings {
        tracing::warn!("{}", w.message);
    }
    if webhook_secret.is_none() {
        tracing::warn!("NUDGE_WEBHOOK_SECRET not set; inbound events are not authenticated");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let state = AppState::open(config)?.with_webhook_secret(webhook_secret);
        nudge_server::serve(state, port).await?;
        anyhow::Ok(())
    })
}

/// Load the config (defaults when absent) with store paths anchored to the
/// config file's directory.
pub fn load(config_path: &Path) -> Result<Config> {
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok(config.resolve_paths(base))
}
