//! Shared key-value store abstraction.
//!
//! Every coordination primitive in this crate is expressed purely in terms of
//! [`SharedStore`]: get, set-with-expiry, delete, exists, and an atomic
//! insert-if-absent (`SetOptions::only_if_absent`). Any key-value service that
//! offers a conditional write and a TTL can back it.
//!
//! Two adapters ship with the crate:
//!
//! - [`MemoryStore`]: process-local, expiry on the tokio clock
//! - [`RedbStore`]: durable, single-file redb database
//!
//! In-process state is never a coordination mechanism across invocations.
//! Only what lives behind this trait is shared.

pub mod keys;
pub mod memory;
pub mod redb_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{NudgeError, Result};

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

/// Options for [`SharedStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Time after which the store drops the record on its own.
    pub expiry: Duration,
    /// Write only if no live record exists under the key.
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Unconditional write with the given expiry.
    pub fn expiring(expiry: Duration) -> Self {
        Self {
            expiry,
            only_if_absent: false,
        }
    }

    /// Conditional write: succeeds only when the key is absent or expired.
    pub fn if_absent(expiry: Duration) -> Self {
        Self {
            expiry,
            only_if_absent: true,
        }
    }
}

/// Result of a [`SharedStore::set`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Written,
    /// `only_if_absent` was requested and a live record already exists.
    Rejected,
}

impl SetOutcome {
    pub fn is_written(self) -> bool {
        matches!(self, Self::Written)
    }
}

/// The boundary contract every store adapter satisfies.
///
/// All methods are network-shaped: they may block for an unbounded time and
/// may fail transiently. Callers decide per primitive whether a failure fails
/// open or closed.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, opts: SetOptions) -> Result<SetOutcome>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Typed JSON helpers layered over any [`SharedStore`].
#[async_trait]
pub trait StoreExt: SharedStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| NudgeError::store("decode", key, e)),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, opts: SetOptions) -> Result<SetOutcome>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value).map_err(|e| NudgeError::store("encode", key, e))?;
        self.set(key, raw, opts).await
    }
}

impl<S: SharedStore + ?Sized> StoreExt for S {}

/// Milliseconds of a duration, saturating, for on-disk expiry stamps.
pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
