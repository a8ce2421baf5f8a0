use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{NudgeError, Result};

use super::{SetOptions, SetOutcome, SharedStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local [`SharedStore`].
///
/// Expiry is measured on the tokio clock, so tests running with a paused
/// runtime can advance past TTLs deterministically. The whole map sits behind
/// one mutex, which makes `only_if_absent` writes atomic.
///
/// `set_offline(true)` makes every call fail with [`NudgeError::Store`],
/// simulating an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage mode.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live (unexpired) records.
    #[cfg(test)]
    async fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    fn check_online(&self, op: &'static str, key: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NudgeError::store(op, key, "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online("get", key)?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, opts: SetOptions) -> Result<SetOutcome> {
        self.check_online("set", key)?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if opts.only_if_absent && entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(SetOutcome::Rejected);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + opts.expiry,
            },
        );
        Ok(SetOutcome::Written)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online("delete", key)?;
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
