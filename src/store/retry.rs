//! Availability retry over the storage port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::CasOutcome;
use super::LockStore;
use super::StoreError;
use super::Witness;

/// Wraps a [`LockStore`], retrying each call a bounded number of times on
/// transient failures with a fixed delay between attempts.
///
/// Non-retryable errors propagate immediately; once the retry budget is
/// spent the last transient error propagates. Logical CAS conflicts are
/// results, not errors, and pass through untouched; contention back-off
/// belongs to the engine.
pub struct RetryingStore<S: ?Sized> {
    max_retries: u32,
    delay: Duration,
    inner: Arc<S>,
}

impl<S: LockStore + ?Sized> RetryingStore<S> {
    /// Wrap `inner`, allowing `max_retries` extra attempts per call with
    /// `delay` between them.
    pub fn new(inner: Arc<S>, max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            inner,
        }
    }
}

impl<S: ?Sized> Clone for RetryingStore<S> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            delay: self.delay,
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl<S: LockStore + ?Sized> LockStore for RetryingStore<S> {
    async fn get(&self, key: &str) -> Result<Witness, StoreError> {
        let mut attempt = 0;
        loop {
            match self.inner.get(key).await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(key, attempt, error = %err, "get failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }

    async fn put_if(
        &self,
        key: &str,
        value: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            match self.inner.put_if(key, value, witness, fetch_on_conflict).await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(key, attempt, error = %err, "put_if failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }

    async fn delete_if(
        &self,
        key: &str,
        witness: &Witness,
        fetch_on_conflict: bool,
    ) -> Result<CasOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            match self.inner.delete_if(key, witness, fetch_on_conflict).await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(key, attempt, error = %err, "delete_if failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }
}
