//! Versioned, TTL-bound session state for multi-step interactive flows.
//!
//! A session threads one interaction (a card carousel, an image awaiting
//! approval) across stateless request/response cycles. The external
//! messaging layer only ever holds the session id, embedded in a button
//! payload; every read and write goes through the shared store.
//!
//! Invariants:
//!
//! - `version` starts at 1 and increases by exactly 1 per mutation
//! - a mutation re-reads the record and writes a whole new one with a refreshed
//!   TTL; there is no partial-field write
//! - [`SessionStore::update`] is the only mutation path and it rejects a
//!   caller whose `expected_version` is not the current one
//! - [`SessionStore::replace`] retires an id, so buttons rendered against the
//!   old id resolve to [`NudgeError::SessionNotFound`]
//!
//! Version checks catch stale writers but do not serialise concurrent
//! read-modify-write cycles on their own. Callers needing that wrap the cycle
//! in an [`ExclusionLock`](crate::lock::ExclusionLock) keyed to the session id.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::{NudgeError, Result};
use crate::store::{keys, SetOptions, SharedStore, StoreExt};

/// Length of generated session ids. Short enough for chat callback payloads.
pub const SESSION_ID_LEN: usize = 10;

const CREATE_ATTEMPTS: usize = 3;

/// A payload type that can live in a session. `KIND` is the stored type tag.
pub trait SessionPayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session<T> {
    pub id: String,
    pub kind: String,
    pub data: T,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generate a random alphanumeric session id.
pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn SharedStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Create a session at version 1 and return its id.
    pub async fn create<T: SessionPayload>(&self, data: T, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let mut session = Session {
            id: String::new(),
            kind: T::KIND.to_string(),
            data,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        for _ in 0..CREATE_ATTEMPTS {
            session.id = generate_session_id();
            let key = keys::session(&session.id);
            let outcome = self
                .store
                .set_json(&key, &session, SetOptions::if_absent(ttl))
                .await?;
            if outcome.is_written() {
                debug!(session_id = %session.id, kind = T::KIND, "session created");
                return Ok(session.id);
            }
        }
        Err(NudgeError::store(
            "create",
            keys::session("*"),
            "could not allocate a unique session id",
        ))
    }

    /// Load a session, or `None` if unknown or expired.
    pub async fn get<T: SessionPayload>(&self, id: &str) -> Result<Option<Session<T>>> {
        let key = keys::session(id);
        let Some(raw) = self.store.get_json::<Session<serde_json::Value>>(&key).await? else {
            return Ok(None);
        };
        if raw.kind != T::KIND {
            return Err(NudgeError::SessionKindMismatch {
                id: id.to_string(),
                expected: T::KIND.to_string(),
                actual: raw.kind,
            });
        }
        let data = serde_json::from_value(raw.data).map_err(|e| NudgeError::store("decode", &key, e))?;
        Ok(Some(Session {
            id: raw.id,
            kind: raw.kind,
            data,
            version: raw.version,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        }))
    }

    /// Like [`get`](Self::get), but a missing session is an error.
    pub async fn resolve<T: SessionPayload>(&self, id: &str) -> Result<Session<T>> {
        self.get(id)
            .await?
            .ok_or_else(|| NudgeError::SessionNotFound(id.to_string()))
    }

    /// Mutate a session the caller last read at `expected_version`.
    ///
    /// Fails with `SessionNotFound` if the id is unknown or expired and with
    /// `StaleSession` if someone else wrote since.
    ///
    /// The read and the write are separate store calls. A `delete` landing
    /// between them is overwritten and the session reappears. Callers that
    /// race deletes against updates hold an [`ExclusionLock`] on
    /// `session:<id>` around the whole cycle.
    ///
    /// [`ExclusionLock`]: crate::lock::ExclusionLock
    pub async fn update<T, F>(
        &self,
        id: &str,
        expected_version: u64,
        ttl: Duration,
        apply: F,
    ) -> Result<Session<T>>
    where
        T: SessionPayload,
        F: FnOnce(&mut T) + Send,
    {
        let mut session = self.resolve::<T>(id).await?;
        if session.version != expected_version {
            return Err(NudgeError::StaleSession {
                id: id.to_string(),
                expected: expected_version,
                actual: session.version,
            });
        }
        apply(&mut session.data);
        session.version += 1;
        session.updated_at = Utc::now();
        self.store
            .set_json(&keys::session(id), &session, SetOptions::expiring(ttl))
            .await?;
        debug!(session_id = %id, version = session.version, "session updated");
        Ok(session)
    }

    /// Retire `old_id` and start a fresh session holding `data`.
    pub async fn replace<T: SessionPayload>(
        &self,
        old_id: &str,
        data: T,
        ttl: Duration,
    ) -> Result<String> {
        self.delete(old_id).await?;
        self.create(data, ttl).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&keys::session(id)).await
    }
}
