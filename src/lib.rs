//! Distributed shared and exclusive advisory locks over a compare-and-swap
//! key-value store.
//!
//! Cooperating processes name a resource by an opaque string key and
//! coordinate through a single JSON-encoded list of holder entries stored
//! under that key. There is no queue and no watch: contenders poll,
//! mutate the list locally, and commit it with a compare-and-swap against
//! the exact payload they last read. Shared holds coexist; an exclusive
//! hold excludes every other live holder. Each entry carries an absolute
//! expiry, so a crashed holder releases itself once its hold lapses.
//!
//! Production deployments back the lock with an etcd cluster via
//! [`EtcdStore`]; tests run against the in-memory [`MemoryStore`].
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use lockset::{EtcdStore, LockManager, LockOptions};
//!
//! let store = std::sync::Arc::new(EtcdStore::connect(["http://localhost:2379"]).await?);
//! let manager = LockManager::new(store);
//!
//! let mut lock = manager.lock_with(
//!     "reports/2024",
//!     LockOptions::exclusive().hold_time(Duration::from_secs(60)),
//! );
//! if lock.acquire().await? {
//!     // Critical section. Call `lock.refresh()` from long-running work;
//!     // the stored expiry releases the resource if this process dies.
//!     lock.release().await?;
//! }
//! ```

#![warn(missing_docs)]

/// Lock entry model.
pub mod entry;
/// Caller-facing error types.
pub mod error;
/// Handle factory and process-default identity.
pub mod manager;
/// Wire codec for the per-key lock set.
pub mod payload;
/// Shared settings and per-handle options.
pub mod settings;
/// Storage port and its implementations.
pub mod store;

mod lock;

pub use entry::LockEntry;
pub use error::LockError;
pub use lock::Lock;
pub use manager::LockManager;
pub use settings::LockOptions;
pub use settings::LockSettings;
pub use store::CasOutcome;
pub use store::EtcdStore;
pub use store::LockStore;
pub use store::MemoryStore;
pub use store::RetryingStore;
pub use store::StoreError;
pub use store::Witness;
