//! Durable [`SharedStore`] on a single redb file.
//!
//! # Table design
//!
//! One `RECORDS` table maps the store key to a JSON envelope:
//!
//! ```text
//! key   : &str                       e.g. "lock:scan:alice"
//! value : {"value": "...", "expires_at_ms": 1760000000000}
//! ```
//!
//! Expiry is wall-clock (`expires_at_ms` is a Unix timestamp) so records keep
//! their deadline across process restarts. Expired records are invisible to
//! reads and are physically removed by [`RedbStore::purge_expired`] or when a
//! write lands on the same key.
//!
//! redb serialises write transactions, so the read-check-insert inside one
//! write transaction is an atomic insert-if-absent.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{NudgeError, Result};

use super::{duration_ms, SetOptions, SetOutcome, SharedStore};

const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    expires_at_ms: i64,
}

impl Envelope {
    fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

fn store_err<'a, E: Display>(op: &'static str, key: &'a str) -> impl FnOnce(E) -> NudgeError + 'a {
    move |e| NudgeError::store(op, key, e)
}

fn decode(op: &'static str, key: &str, raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw).map_err(store_err(op, key))
}

/// Persistent store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        let label = path.display().to_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err("open", &label))?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(store_err("open", &label))?;
        wt.open_table(RECORDS).map_err(store_err("open", &label))?;
        wt.commit().map_err(store_err("open", &label))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Delete every expired record. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let now_ms = Utc::now().timestamp_millis();
            let wt = db.begin_write().map_err(store_err("purge", "*"))?;
            let removed = {
                let mut table = wt.open_table(RECORDS).map_err(store_err("purge", "*"))?;
                let mut expired = Vec::new();
                for entry in table.iter().map_err(store_err("purge", "*"))? {
                    let (k, v) = entry.map_err(store_err("purge", "*"))?;
                    let envelope = decode("purge", k.value(), v.value())?;
                    if !envelope.is_live(now_ms) {
                        expired.push(k.value().to_string());
                    }
                }
                for key in &expired {
                    table
                        .remove(key.as_str())
                        .map_err(store_err("purge", key))?;
                }
                expired.len()
            };
            wt.commit().map_err(store_err("purge", "*"))?;
            Ok::<_, NudgeError>(removed)
        })
        .await
        .map_err(store_err("purge", "*"))?
    }

    async fn blocking<T, F>(&self, op: &'static str, key: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &str) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || f(&db, &owned_key))
            .await
            .map_err(store_err(op, key))?
    }
}

#[async_trait]
impl SharedStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.blocking("get", key, |db, key| {
            let rt = db.begin_read().map_err(store_err("get", key))?;
            let table = rt.open_table(RECORDS).map_err(store_err("get", key))?;
            let Some(raw) = table.get(key).map_err(store_err("get", key))? else {
                return Ok(None);
            };
            let envelope = decode("get", key, raw.value())?;
            if envelope.is_live(Utc::now().timestamp_millis()) {
                Ok(Some(envelope.value))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: String, opts: SetOptions) -> Result<SetOutcome> {
        self.blocking("set", key, move |db, key| {
            let now_ms = Utc::now().timestamp_millis();
            let envelope = Envelope {
                value,
                expires_at_ms: now_ms.saturating_add(duration_ms(opts.expiry)),
            };
            let encoded = serde_json::to_string(&envelope).map_err(store_err("set", key))?;

            let wt = db.begin_write().map_err(store_err("set", key))?;
            let outcome = {
                let mut table = wt.open_table(RECORDS).map_err(store_err("set", key))?;
                let occupied = match table.get(key).map_err(store_err("set", key))? {
                    Some(existing) => decode("set", key, existing.value())?.is_live(now_ms),
                    None => false,
                };
                if opts.only_if_absent && occupied {
                    SetOutcome::Rejected
                } else {
                    table
                        .insert(key, encoded.as_str())
                        .map_err(store_err("set", key))?;
                    SetOutcome::Written
                }
            };
            wt.commit().map_err(store_err("set", key))?;
            Ok(outcome)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blocking("delete", key, |db, key| {
            let wt = db.begin_write().map_err(store_err("delete", key))?;
            {
                let mut table = wt.open_table(RECORDS).map_err(store_err("delete", key))?;
                table.remove(key).map_err(store_err("delete", key))?;
            }
            wt.commit().map_err(store_err("delete", key))?;
            Ok(())
        })
        .await
    }
}
