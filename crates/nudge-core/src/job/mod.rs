//! Bounded, cancellable batch sweeps over a list of repositories.
//!
//! Provides the data model ([`SweepItem`], [`JobSpec`], [`JobReport`],
//! [`ActiveJobMarker`]) and the [`JobOrchestrator`] that runs a sweep.
//!
//! Lifecycle of one instance: `Idle → Running → Completed | Cancelled | TimedOut`.
//!
//! ```text
//! start ── coarse lock ── write marker ──┐
//!                                        ▼
//!            ┌──── wave boundary: elapsed >= deadline?  → TimedOut
//!            │                    marker != job_id?      → Cancelled
//!            │     wave: batch_size items concurrently
//!            └──── (repeat until items exhausted)        → Completed
//! ```

pub mod cache;
pub mod orchestrator;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CoordinationConfig;

pub use cache::{is_cached, AnalysisCache};
pub use orchestrator::{JobOrchestrator, REPORT_TTL};

/// Job class for the repository scan.
pub const SCAN: &str = "scan";

// ---------------------------------------------------------------------------
// Work items and the worker seam
// ---------------------------------------------------------------------------

/// One unit of sweep work: a repository and its remote last-modified time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepItem {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

/// Failure of a single item. Recorded in the report, never aborts the sweep.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ItemFailure(pub String);

impl ItemFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Performs the expensive per-item analysis. Implemented outside this crate.
#[async_trait]
pub trait SweepWorker: Send + Sync {
    async fn analyze(&self, owner: &str, item: &SweepItem) -> Result<(), ItemFailure>;
}

// ---------------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Job class, e.g. [`SCAN`]. One active job per (class, owner).
    pub class: String,
    pub owner: String,
    pub batch_size: usize,
    pub deadline: Duration,
    /// TTL of the coarse `class:owner` lock and of the active-job marker.
    pub lock_ttl: Duration,
    /// TTL of the fine per-item lock.
    pub item_lock_ttl: Duration,
    /// How long a superseding start waits for the previous sweep to yield.
    pub supersede_wait: Duration,
}

impl JobSpec {
    pub fn from_config(
        class: impl Into<String>,
        owner: impl Into<String>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            class: class.into(),
            owner: owner.into(),
            batch_size: config.batch_size,
            deadline: config.deadline(),
            lock_ttl: config.scan_lock_ttl(),
            item_lock_ttl: config.analyze_lock_ttl(),
            supersede_wait: config.supersede_wait(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActiveJobMarker
// ---------------------------------------------------------------------------

/// The sweep currently authorised to run for a (class, owner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJobMarker {
    pub job_id: Uuid,
    pub class: String,
    pub owner: String,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JobReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub class: String,
    pub owner: String,
    pub status: JobStatus,
    pub total: usize,
    /// Items that went through a wave: analyzed + cached + busy + failed.
    pub processed: usize,
    pub analyzed: usize,
    pub cached: usize,
    /// Skipped because another execution held the item's lock.
    pub busy: usize,
    pub errors: Vec<ItemError>,
    pub hit_timeout: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl JobReport {
    fn new(job_id: Uuid, spec: &JobSpec, total: usize) -> Self {
        Self {
            job_id,
            class: spec.class.clone(),
            owner: spec.owner.clone(),
            status: JobStatus::Completed,
            total,
            processed: 0,
            analyzed: 0,
            cached: 0,
            busy: 0,
            errors: Vec::new(),
            hit_timeout: false,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    fn record(&mut self, item: &SweepItem, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Analyzed => self.analyzed += 1,
            ItemOutcome::Cached => self.cached += 1,
            ItemOutcome::Busy => self.busy += 1,
            ItemOutcome::Failed(message) => self.errors.push(ItemError {
                item: item.name.clone(),
                message,
            }),
        }
    }
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Analyzed,
    Cached,
    Busy,
    Failed(String),
}

/// Result of asking the orchestrator to start a sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStart {
    /// The sweep ran; the report says how it ended.
    Finished(JobReport),
    /// Another sweep for the same (class, owner) holds the coarse lock.
    Busy,
}

impl JobStart {
    pub fn report(&self) -> Option<&JobReport> {
        match self {
            Self::Finished(r) => Some(r),
            Self::Busy => None,
        }
    }
}
