//! Named, TTL-bounded mutual exclusion over the shared store.
//!
//! A lock is a record under `lock:<operation>:<scope>` written with
//! insert-if-absent. Ownership is established only by that conditional write,
//! never by read-then-write. A holder that crashes leaves the record to
//! expire, so a forgotten lock heals itself after its TTL.
//!
//! Contention and infrastructure failure are different channels:
//!
//! - contention (record already live) always fails closed: `false` / [`LockOutcome::Busy`]
//! - a store error is resolved by the caller's [`FailPolicy`]; the default is
//!   [`FailPolicy::Open`] so a storage hiccup cannot wedge every operation
//!
//! Locks typically come in two layers: a coarse one (`scan:<owner>`) and a
//! fine one (`analyze:<owner>/<repo>`). Both follow the same contract.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{keys, SetOptions, SharedStore, StoreExt};

/// Build a lock name from an operation and the target it applies to.
pub fn lock_name(operation: &str, scope: &str) -> String {
    format!("{operation}:{scope}")
}

/// What to do when the store errors during acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Treat the lock as acquired. Only for idempotent or low-cost work.
    Open,
    /// Treat the lock as held by someone else.
    Closed,
}

/// Result of [`ExclusionLock::with_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The lock was acquired and the work ran to completion.
    Ran(T),
    /// Another execution holds the lock; nothing ran.
    Busy,
}

impl<T> LockOutcome<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Stored lock contents. Informational: only the key's existence matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

#[derive(Clone)]
pub struct ExclusionLock {
    store: Arc<dyn SharedStore>,
    holder: String,
}

impl ExclusionLock {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Identifier written into every record this instance acquires.
    pub fn holder_id(&self) -> &str {
        &self.holder
    }

    /// Attempt the conditional write, surfacing store errors.
    ///
    /// `Ok(true)` means this caller now holds the lock, `Ok(false)` is
    /// contention.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<bool> {
        let key = keys::lock(name);
        let record = LockRecord {
            name: name.to_string(),
            holder: self.holder.clone(),
            acquired_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        };
        let outcome = self
            .store
            .set_json(&key, &record, SetOptions::if_absent(ttl))
            .await?;
        if outcome.is_written() {
            debug!(key = %key, "lock acquired");
        } else {
            debug!(key = %key, "lock busy");
        }
        Ok(outcome.is_written())
    }

    /// Acquire with the default fail-open policy.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> bool {
        self.acquire_with(name, ttl, FailPolicy::Open).await
    }

    pub async fn acquire_with(&self, name: &str, ttl: Duration, policy: FailPolicy) -> bool {
        match self.try_acquire(name, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                let acquired = policy == FailPolicy::Open;
                warn!(
                    lock = %name,
                    error = %e,
                    ?policy,
                    acquired,
                    "lock store unavailable"
                );
                acquired
            }
        }
    }

    /// Unconditionally delete the lock. Safe when it already expired or was
    /// never held. Store errors are logged, the TTL cleans up.
    pub async fn release(&self, name: &str) {
        let key = keys::lock(name);
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "lock release failed; record will expire");
        } else {
            debug!(key = %key, "lock released");
        }
    }

    /// Current record under `name`, if the lock is held.
    pub async fn holder(&self, name: &str) -> Result<Option<LockRecord>> {
        self.store.get_json(&keys::lock(name)).await
    }

    /// Run `work` while holding `name`, with the fail-open policy.
    pub async fn with_lock<F, T>(&self, name: &str, ttl: Duration, work: F) -> LockOutcome<T>
    where
        F: Future<Output = T>,
    {
        self.with_lock_policy(name, ttl, FailPolicy::Open, work)
            .await
    }

    /// Run `work` while holding `name`.
    ///
    /// The lock is released on every exit path. A panic inside `work` releases
    /// the lock before the unwind continues.
    pub async fn with_lock_policy<F, T>(
        &self,
        name: &str,
        ttl: Duration,
        policy: FailPolicy,
        work: F,
    ) -> LockOutcome<T>
    where
        F: Future<Output = T>,
    {
        if !self.acquire_with(name, ttl, policy).await {
            return LockOutcome::Busy;
        }
        let result = AssertUnwindSafe(work).catch_unwind().await;
        self.release(name).await;
        match result {
            Ok(value) => LockOutcome::Ran(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
