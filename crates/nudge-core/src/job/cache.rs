//! Last-analyzed timestamps, kept in the shared store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{keys, SetOptions, SharedStore, StoreExt};

/// Whether an item can reuse its cached analysis.
///
/// Cached iff the resource has not been modified after it was last analyzed:
/// `last_modified <= last_analyzed`. Exact comparison, no tolerance window.
pub fn is_cached(last_modified: DateTime<Utc>, last_analyzed: Option<DateTime<Utc>>) -> bool {
    match last_analyzed {
        Some(analyzed) => last_modified <= analyzed,
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// When the analysis began. A change landing while it ran is newer than
    /// this and is never mistaken for cached.
    pub analyzed_at: DateTime<Utc>,
    /// Resource timestamp observed when the analysis ran.
    pub source_modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AnalysisCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn lookup(&self, owner: &str, item: &str) -> Result<Option<AnalysisRecord>> {
        self.store.get_json(&keys::analysis(owner, item)).await
    }

    pub async fn record(
        &self,
        owner: &str,
        item: &str,
        analyzed_at: DateTime<Utc>,
        source_modified: DateTime<Utc>,
    ) -> Result<()> {
        let record = AnalysisRecord {
            analyzed_at,
            source_modified,
        };
        self.store
            .set_json(
                &keys::analysis(owner, item),
                &record,
                SetOptions::expiring(self.ttl),
            )
            .await?;
        Ok(())
    }
}
