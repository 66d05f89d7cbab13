//! Storage port for lock payloads.
//!
//! The engine drives the store through three operations on opaque string
//! keys and values: a read, a compare-and-put, and a compare-and-delete.
//! The comparison witness is the exact payload last observed for the key,
//! with "the key did not exist" as a first-class witness of its own; a
//! read that failed travels the error channel instead.

use std::sync::Arc;

use async_trait::async_trait;
use snafu::Snafu;

mod etcd;
mod memory;
mod retry;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use retry::RetryingStore;

/// A key's state as last observed, used as the CAS witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Witness {
    /// The key did not exist.
    Absent,
    /// The key held exactly this value.
    Present(String),
}

impl Witness {
    /// The stored payload, if the key existed.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Witness::Absent => None,
            Witness::Present(payload) => Some(payload),
        }
    }
}

/// Outcome of a compare-and-put or compare-and-delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The witness matched and the write was applied.
    Committed,
    /// The witness did not match. `current` carries what the store holds
    /// now, populated only when the caller asked to fetch on conflict.
    Conflict {
        /// The key's state at conflict time, when fetched.
        current: Option<Witness>,
    },
}

/// Errors from the storage backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The backend was unreachable or timed out; safe to retry.
    #[snafu(display("store unavailable: {message}"))]
    Unavailable {
        /// Description of the transient failure.
        message: String,
    },
    /// Any other backend failure; not retried.
    #[snafu(display("store request failed: {message}"))]
    Request {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Port over a consistent key-value store with atomic compare-and-swap.
///
/// An absent key and an empty value are distinguishable: reads report
/// [`Witness::Absent`] rather than an empty string, and a write conditioned
/// on [`Witness::Absent`] must translate to the backend's
/// create-only-if-absent primitive.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read the current state of `key`.
    async fn get(&self, key: &str) -> Result<Witness, StoreError>;

    /// Write `value` to `key` iff the stored state equals `witness`.
    ///
    /// With `fetch_on_conflict`, a failed comparison reports the state the
    /// key holds now so the caller can fold it into its next attempt.
    async fn put_if(
        &self,
        key: &str,
        value: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError>;

    /// Delete `key` iff the stored state equals `witness`.
    async fn delete_if(
        &self,
        key: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: LockStore + ?Sized> LockStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Witness, StoreError> {
        (**self).get(key).await
    }

    async fn put_if(
        &self,
        key: &str,
        value: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        (**self).put_if(key, value, witness, fetch_on_conflict).await
    }

    async fn delete_if(
        &self,
        key: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        (**self).delete_if(key, witness, fetch_on_conflict).await
    }
}
