//! Caller-facing error types.

use snafu::Snafu;

use crate::store::StoreError;

/// Errors surfaced by lock operations.
///
/// An `acquire` that returns `Ok(false)` is not an error: the wait time
/// elapsed while the resource stayed incompatible. Likewise `refresh`
/// reports contention as `Ok(false)`; the caller must treat the lock as
/// lost and reacquire.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LockError {
    /// The store stayed unreachable through every availability retry.
    #[snafu(display("store unavailable after {attempts} attempts: {source}"))]
    Unavailable {
        /// Storage attempts made, counting the first.
        attempts: u32,
        /// The last transient failure observed.
        source: StoreError,
    },

    /// Contention on the key did not resolve within the save-retry bound.
    #[snafu(display("gave up saving lock state for '{key}' after {retries} contended attempts"))]
    TooManySaveRetries {
        /// The caller's lock key.
        key: String,
        /// Contended attempts made.
        retries: u32,
    },

    /// Non-retryable storage failure, propagated unchanged.
    #[snafu(display("{source}"))]
    Store {
        /// The backend failure.
        source: StoreError,
    },

    /// The entry list could not be encoded as JSON.
    #[snafu(display("failed to encode lock payload: {source}"))]
    EncodePayload {
        /// The underlying serialization error.
        source: serde_json::Error,
    },
}
