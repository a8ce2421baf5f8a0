use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nudge_core::config::{Config, StoreConfig};
use nudge_core::idempotency::IdempotencyGuard;
use nudge_core::job::{JobOrchestrator, JobSpec, SweepWorker};
use nudge_core::lock::ExclusionLock;
use nudge_core::session::SessionStore;
use nudge_core::store::{MemoryStore, RedbStore, SharedStore};
use tracing::{debug, warn};

use crate::collaborators::{Card, Collaborators, Notifier, RepoSource};

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shared application state passed to all route handlers.
///
/// Holds no per-request or per-session data: everything that must survive
/// between requests lives in `store`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SharedStore>,
    pub guard: IdempotencyGuard,
    pub locks: ExclusionLock,
    pub sessions: SessionStore,
    pub jobs: JobOrchestrator,
    pub repos: Arc<dyn RepoSource>,
    pub worker: Arc<dyn SweepWorker>,
    pub notifier: Arc<dyn Notifier>,
    /// When set, `POST /api/events` requires a valid signature header.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SharedStore>, collaborators: Collaborators) -> Self {
        let c = &config.coordination;
        Self {
            guard: IdempotencyGuard::new(store.clone(), c.idempotency_ttl()),
            locks: ExclusionLock::new(store.clone()),
            sessions: SessionStore::new(store.clone()),
            jobs: JobOrchestrator::new(store.clone(), c.analysis_ttl()),
            repos: collaborators.repos,
            worker: collaborators.worker,
            notifier: collaborators.notifier,
            webhook_secret: None,
            config: Arc::new(config),
            store,
        }
    }

    /// Open the configured store and wire the logging collaborators.
    ///
    /// A redb store gets a background task that purges expired records.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn SharedStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Redb { path } => {
                let redb = Arc::new(
                    RedbStore::open(path)
                        .with_context(|| format!("opening store at {}", path.display()))?,
                );
                // Guard: only spawn inside a Tokio runtime (skipped in sync tests).
                if tokio::runtime::Handle::try_current().is_ok() {
                    spawn_purge(redb.clone());
                }
                redb
            }
        };
        let collaborators = Collaborators::logging(config.repos.clone());
        Ok(Self::new(config, store, collaborators))
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty()).map(Arc::from);
        self
    }

    pub fn job_spec(&self, class: &str, owner: &str) -> JobSpec {
        JobSpec::from_config(class, owner, &self.config.coordination)
    }

    pub fn session_ttl(&self) -> Duration {
        self.config.coordination.session_ttl()
    }

    /// Chat delivery is best effort; a failed message never fails the request.
    pub async fn notify(&self, owner: &str, text: &str) {
        if let Err(e) = self.notifier.send(owner, text).await {
            warn!(owner, error = %e, "failed to deliver message");
        }
    }

    pub async fn deliver_card(&self, owner: &str, card: &Card) {
        if let Err(e) = self.notifier.send_card(owner, card).await {
            warn!(owner, session_id = %card.session_id, error = %e, "failed to deliver card");
        }
    }
}

fn spawn_purge(store: Arc<RedbStore>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PURGE_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            match store.purge_expired().await {
                Ok(removed) => debug!(removed, "purged expired records"),
                Err(e) => warn!(error = %e, "store purge failed"),
            }
        }
    });
}
