//! In-memory store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::CasOutcome;
use super::LockStore;
use super::StoreError;
use super::Witness;

/// In-memory implementation of [`LockStore`] for unit tests.
///
/// Stores values in a HashMap behind a single mutex, so every operation is
/// atomic without network I/O. Mirrors the compare semantics of the
/// production backend exactly: an absent key only matches the
/// [`Witness::Absent`] witness, never an empty string.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn matches(witness: &Witness, current: Option<&String>) -> bool {
        match (witness, current) {
            (Witness::Absent, None) => true,
            (Witness::Present(expected), Some(stored)) => expected == stored,
            _ => false,
        }
    }

    fn observe(current: Option<&String>) -> Witness {
        match current {
            Some(stored) => Witness::Present(stored.clone()),
            None => Witness::Absent,
        }
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Witness, StoreError> {
        let inner = self.inner.lock().await;
        Ok(Self::observe(inner.get(key)))
    }

    async fn put_if(
        &self,
        key: &str,
        value: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if Self::matches(witness, inner.get(key)) {
            inner.insert(key.to_string(), value.to_string());
            Ok(CasOutcome::Committed)
        } else {
            let current = fetch_on_conflict.then(|| Self::observe(inner.get(key)));
            Ok(CasOutcome::Conflict { current })
        }
    }

    async fn delete_if(
        &self,
        key: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if Self::matches(witness, inner.get(key)) {
            inner.remove(key);
            Ok(CasOutcome::Committed)
        } else {
            let current = fetch_on_conflict.then(|| Self::observe(inner.get(key)));
            Ok(CasOutcome::Conflict { current })
        }
    }
}
