//! Duplicate-delivery suppression for inbound events.
//!
//! Upstream delivery is at-least-once. Before any handler logic runs, the
//! event id goes through [`IdempotencyGuard::should_process`], which performs
//! a single insert-if-absent of a [`ProcessedEventMarker`]: the caller that
//! lands the write owns the event, everyone else sees a duplicate.
//!
//! Store outages fail open. Blocking every delivery during an outage is worse
//! than an occasional double-process, which downstream locks tolerate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{keys, SetOptions, SharedStore, StoreExt};

/// Identifier of one inbound event. Integer ids (chat update ids) and string
/// ids (webhook delivery ids) normalise to the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for EventId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Stored under `event:<id>` once an event has been claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEventMarker {
    pub event_id: String,
    pub marked_at: DateTime<Utc>,
}

impl ProcessedEventMarker {
    fn new(event_id: &EventId) -> Self {
        Self {
            event_id: event_id.to_string(),
            marked_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// `ttl` must outlast the upstream redelivery window.
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Whether a marker exists for `event_id`. Fails open (`false`).
    pub async fn seen(&self, event_id: &EventId) -> bool {
        let key = keys::event(&event_id.to_string());
        match self.store.exists(&key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "idempotency check failed, treating event as new");
                false
            }
        }
    }

    /// Write the marker unconditionally.
    pub async fn mark_seen(&self, event_id: &EventId) -> Result<()> {
        let key = keys::event(&event_id.to_string());
        self.store
            .set_json(
                &key,
                &ProcessedEventMarker::new(event_id),
                SetOptions::expiring(self.ttl),
            )
            .await?;
        Ok(())
    }

    /// Claim `event_id` for processing.
    ///
    /// Returns `true` exactly once per event id within the TTL window, and
    /// `true` whenever the store cannot be reached.
    pub async fn should_process(&self, event_id: &EventId) -> bool {
        let key = keys::event(&event_id.to_string());
        let marker = ProcessedEventMarker::new(event_id);
        match self
            .store
            .set_json(&key, &marker, SetOptions::if_absent(self.ttl))
            .await
        {
            Ok(outcome) if outcome.is_written() => true,
            Ok(_) => {
                debug!(key = %key, "duplicate delivery skipped");
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "idempotency claim failed, processing anyway");
                true
            }
        }
    }

    /// Give up a claim whose handler failed, so the next delivery runs.
    pub async fn release(&self, event_id: &EventId) {
        let key = keys::event(&event_id.to_string());
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "failed to release idempotency claim");
        }
    }
}
