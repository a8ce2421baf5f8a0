//! Seams to the systems nudge talks to but does not own.
//!
//! The chat transport, the source-hosting API and the analysis backend live
//! outside this workspace. Each is a trait here with a logging stand-in so
//! the server runs end to end without them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nudge_core::config::RepoConfig;
use nudge_core::job::{ItemFailure, SweepItem, SweepWorker};
use serde::Serialize;
use tracing::info;

// ---------------------------------------------------------------------------
// RepoSource
// ---------------------------------------------------------------------------

/// Lists an owner's repositories with their last-modified timestamps.
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn list(&self, owner: &str) -> anyhow::Result<Vec<SweepItem>>;
}

/// Repositories from the `repos:` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticRepoSource {
    repos: BTreeMap<String, Vec<RepoConfig>>,
}

impl StaticRepoSource {
    pub fn new(repos: BTreeMap<String, Vec<RepoConfig>>) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl RepoSource for StaticRepoSource {
    async fn list(&self, owner: &str) -> anyhow::Result<Vec<SweepItem>> {
        Ok(self
            .repos
            .get(owner)
            .map(|repos| {
                repos
                    .iter()
                    .map(|r| SweepItem {
                        name: r.name.clone(),
                        last_modified: r.last_modified,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// SweepWorker stand-in
// ---------------------------------------------------------------------------

/// Records that an item would have been analyzed.
#[derive(Debug, Clone, Default)]
pub struct LogWorker;

#[async_trait]
impl SweepWorker for LogWorker {
    async fn analyze(&self, owner: &str, item: &SweepItem) -> Result<(), ItemFailure> {
        info!(owner, repo = %item.name, last_modified = %item.last_modified, "analyze");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// An interactive message. Buttons carry `session_id`, `version` and one of
/// `actions`; a press against an older version is rejected as stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub session_id: String,
    pub version: u64,
    pub text: String,
    pub actions: Vec<String>,
}

/// Outbound chat messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, owner: &str, text: &str) -> anyhow::Result<()>;

    async fn send_card(&self, owner: &str, card: &Card) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, owner: &str, text: &str) -> anyhow::Result<()> {
        info!(owner, text, "notify");
        Ok(())
    }

    async fn send_card(&self, owner: &str, card: &Card) -> anyhow::Result<()> {
        info!(owner, session_id = %card.session_id, text = %card.text, "notify card");
        Ok(())
    }
}

/// The stand-ins bundled together.
pub struct Collaborators {
    pub repos: Arc<dyn RepoSource>,
    pub worker: Arc<dyn SweepWorker>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn logging(repos: BTreeMap<String, Vec<RepoConfig>>) -> Self {
        Self {
            repos: Arc::new(StaticRepoSource::new(repos)),
            worker: Arc::new(LogWorker),
            notifier: Arc::new(LogNotifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn static_source_lists_configured_repos() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut repos = BTreeMap::new();
        repos.insert(
            "alice".to_string(),
            vec![RepoConfig {
                name: "web".into(),
                last_modified: t,
            }],
        );
        let source = StaticRepoSource::new(repos);
        let items = source.list("alice").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "web");
        assert_eq!(items[0].last_modified, t);
        assert!(source.list("bob").await.unwrap().is_empty());
    }
}
