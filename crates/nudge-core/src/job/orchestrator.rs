use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    is_cached, ActiveJobMarker, AnalysisCache, ItemOutcome, JobReport, JobSpec, JobStart,
    JobStatus, SweepItem, SweepWorker,
};
use crate::error::Result;
use crate::lock::{lock_name, ExclusionLock, LockOutcome};
use crate::store::{keys, SetOptions, SharedStore, StoreExt};

/// How long the last report of a (class, owner) stays readable.
pub const REPORT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const SUPERSEDE_POLL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn SharedStore>,
    locks: ExclusionLock,
    cache: AnalysisCache,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn SharedStore>, analysis_ttl: Duration) -> Self {
        Self {
            locks: ExclusionLock::new(store.clone()),
            cache: AnalysisCache::new(store.clone(), analysis_ttl),
            store,
        }
    }

    /// Run a sweep unless one is already running for the same (class, owner).
    pub async fn start(
        &self,
        spec: &JobSpec,
        items: Vec<SweepItem>,
        worker: &dyn SweepWorker,
    ) -> Result<JobStart> {
        let lock = lock_name(&spec.class, &spec.owner);
        if !self.locks.acquire(&lock, spec.lock_ttl).await {
            info!(class = %spec.class, owner = %spec.owner, "sweep already running");
            return Ok(JobStart::Busy);
        }
        let job_id = Uuid::new_v4();
        if let Err(e) = self.write_marker(spec, job_id).await {
            self.locks.release(&lock).await;
            return Err(e);
        }
        self.run_locked(spec, job_id, items, worker).await.map(JobStart::Finished)
    }

    /// Run a sweep, cancelling any sweep already running for the same
    /// (class, owner).
    ///
    /// The new marker is written first; the running sweep notices at its next
    /// wave boundary and yields the coarse lock. Returns [`JobStart::Busy`] if
    /// the lock is not free within `supersede_wait`.
    pub async fn start_superseding(
        &self,
        spec: &JobSpec,
        items: Vec<SweepItem>,
        worker: &dyn SweepWorker,
    ) -> Result<JobStart> {
        let job_id = Uuid::new_v4();
        self.write_marker(spec, job_id).await?;

        let lock = lock_name(&spec.class, &spec.owner);
        let give_up = Instant::now() + spec.supersede_wait;
        loop {
            if self.locks.acquire(&lock, spec.lock_ttl).await {
                break;
            }
            if Instant::now() >= give_up {
                warn!(
                    class = %spec.class,
                    owner = %spec.owner,
                    %job_id,
                    "previous sweep did not yield in time"
                );
                self.clear_marker_if_ours(spec, job_id).await;
                return Ok(JobStart::Busy);
            }
            tokio::time::sleep(SUPERSEDE_POLL).await;
        }

        // A concurrent superseder may have replaced our marker while we waited.
        if !self.marker_is(spec, job_id).await {
            self.locks.release(&lock).await;
            return Ok(JobStart::Busy);
        }
        self.run_locked(spec, job_id, items, worker).await.map(JobStart::Finished)
    }

    /// Withdraw the active marker so the running sweep stops at its next wave
    /// boundary. Returns whether a sweep was actually running: a marker left
    /// by a timed-out sweep is removed but does not count.
    pub async fn cancel(&self, class: &str, owner: &str) -> Result<bool> {
        let key = keys::active_job(class, owner);
        let marked = self.store.exists(&key).await?;
        self.store.delete(&key).await?;
        let running = marked && self.locks.holder(&lock_name(class, owner)).await?.is_some();
        if running {
            info!(class, owner, "sweep cancellation requested");
        }
        Ok(running)
    }

    pub async fn active(&self, class: &str, owner: &str) -> Result<Option<ActiveJobMarker>> {
        self.store.get_json(&keys::active_job(class, owner)).await
    }

    pub async fn last_report(&self, class: &str, owner: &str) -> Result<Option<JobReport>> {
        self.store.get_json(&keys::job_report(class, owner)).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn write_marker(&self, spec: &JobSpec, job_id: Uuid) -> Result<()> {
        let marker = ActiveJobMarker {
            job_id,
            class: spec.class.clone(),
            owner: spec.owner.clone(),
            started_at: Utc::now(),
        };
        self.store
            .set_json(
                &keys::active_job(&spec.class, &spec.owner),
                &marker,
                SetOptions::expiring(spec.lock_ttl),
            )
            .await?;
        Ok(())
    }

    /// Whether `job_id` is still the authorised sweep. A store error keeps
    /// the sweep going.
    async fn marker_is(&self, spec: &JobSpec, job_id: Uuid) -> bool {
        match self.active(&spec.class, &spec.owner).await {
            Ok(marker) => marker.is_some_and(|m| m.job_id == job_id),
            Err(e) => {
                warn!(%job_id, error = %e, "marker check failed; continuing");
                true
            }
        }
    }

    async fn clear_marker_if_ours(&self, spec: &JobSpec, job_id: Uuid) {
        let key = keys::active_job(&spec.class, &spec.owner);
        match self.store.get_json::<ActiveJobMarker>(&key).await {
            Ok(Some(m)) if m.job_id == job_id => {
                if let Err(e) = self.store.delete(&key).await {
                    warn!(key = %key, error = %e, "marker cleanup failed; record will expire");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "marker cleanup skipped"),
        }
    }

    /// Run with the coarse lock held, then clean up on every exit path.
    async fn run_locked(
        &self,
        spec: &JobSpec,
        job_id: Uuid,
        items: Vec<SweepItem>,
        worker: &dyn SweepWorker,
    ) -> Result<JobReport> {
        let lock = lock_name(&spec.class, &spec.owner);
        let result = AssertUnwindSafe(self.run(spec, job_id, items, worker))
            .catch_unwind()
            .await;
        let report = match result {
            Ok(report) => report,
            Err(panic) => {
                self.locks.release(&lock).await;
                std::panic::resume_unwind(panic);
            }
        };

        // Cancelled and timed-out sweeps leave the marker to the canceller or the next start
        if report.status == JobStatus::Completed {
            self.clear_marker_if_ours(spec, job_id).await;
        }
        self.locks.release(&lock).await;

        if let Err(e) = self
            .store
            .set_json(
                &keys::job_report(&spec.class, &spec.owner),
                &report,
                SetOptions::expiring(REPORT_TTL),
            )
            .await
        {
            warn!(%job_id, error = %e, "failed to persist sweep report");
        }

        info!(
            %job_id,
            class = %spec.class,
            owner = %spec.owner,
            status = %report.status,
            total = report.total,
            processed = report.processed,
            analyzed = report.analyzed,
            cached = report.cached,
            busy = report.busy,
            errors = report.errors.len(),
            elapsed_ms = report.elapsed_ms,
            "sweep finished"
        );
        Ok(report)
    }

    async fn run(
        &self,
        spec: &JobSpec,
        job_id: Uuid,
        items: Vec<SweepItem>,
        worker: &dyn SweepWorker,
    ) -> JobReport {
        let started = Instant::now();
        let mut report = JobReport::new(job_id, spec, items.len());
        info!(%job_id, class = %spec.class, owner = %spec.owner, total = items.len(), "sweep started");

        for wave in items.chunks(spec.batch_size.max(1)) {
            if started.elapsed() >= spec.deadline {
                report.status = JobStatus::TimedOut;
                report.hit_timeout = true;
                warn!(%job_id, processed = report.processed, "sweep deadline reached");
                break;
            }
            if !self.marker_is(spec, job_id).await {
                report.status = JobStatus::Cancelled;
                info!(%job_id, processed = report.processed, "sweep superseded or cancelled");
                break;
            }
            let outcomes = join_all(
                wave.iter()
                    .map(|item| self.process_item(&spec.owner, item, spec.item_lock_ttl, worker)),
            )
            .await;
            for (item, outcome) in wave.iter().zip(outcomes) {
                report.record(item, outcome);
            }
            debug!(%job_id, processed = report.processed, "wave finished");
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        report
    }

    /// Analyze one item unless it is cached or another execution holds its
    /// `analyze:<owner>/<item>` lock.
    pub async fn process_item(
        &self,
        owner: &str,
        item: &SweepItem,
        lock_ttl: Duration,
        worker: &dyn SweepWorker,
    ) -> ItemOutcome {
        let previous = match self.cache.lookup(owner, &item.name).await {
            Ok(record) => record,
            Err(e) => {
                warn!(item = %item.name, error = %e, "cache lookup failed; analyzing");
                None
            }
        };
        if let Some(record) = previous
            .as_ref()
            .filter(|r| is_cached(item.last_modified, Some(r.analyzed_at)))
        {
            debug!(
                item = %item.name,
                analyzed_at = %record.analyzed_at,
                source_modified = %record.source_modified,
                "unchanged since last analysis"
            );
            return ItemOutcome::Cached;
        }

        let lock = lock_name("analyze", &format!("{owner}/{}", item.name));
        let analysis = async {
            // Stamped before the worker runs
            let started_at = Utc::now();
            worker.analyze(owner, item).await.map(|()| started_at)
        };
        match self.locks.with_lock(&lock, lock_ttl, analysis).await {
            LockOutcome::Busy => ItemOutcome::Busy,
            LockOutcome::Ran(Err(failure)) => {
                warn!(item = %item.name, error = %failure, "item analysis failed");
                ItemOutcome::Failed(failure.to_string())
            }
            LockOutcome::Ran(Ok(started_at)) => {
                if let Err(e) = self
                    .cache
                    .record(owner, &item.name, started_at, item.last_modified)
                    .await
                {
                    warn!(item = %item.name, error = %e, "failed to record analysis");
                }
                ItemOutcome::Analyzed
            }
        }
    }
}
