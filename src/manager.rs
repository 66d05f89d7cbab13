//! Handle factory and process-default identity.

use std::sync::Arc;

use uuid::Uuid;

use crate::lock::Lock;
use crate::settings::LockOptions;
use crate::settings::LockSettings;
use crate::store::LockStore;

/// Builds [`Lock`] handles over one store with shared settings.
///
/// The manager owns the process-default holder identifier: handles built
/// without an explicit identifier all share it, so repeated acquires for
/// the same key within one process collapse onto a single holder slot
/// instead of accumulating entries. Callers that want per-handle isolation
/// set an identifier in [`LockOptions`] or via the handle's setter.
pub struct LockManager<S: LockStore + ?Sized> {
    store: Arc<S>,
    settings: LockSettings,
    default_identifier: String,
}

impl<S: LockStore + ?Sized + 'static> LockManager<S> {
    /// Create a manager with default [`LockSettings`].
    pub fn new(store: Arc<S>) -> Self {
        Self::with_settings(store, LockSettings::default())
    }

    /// Create a manager with explicit settings.
    pub fn with_settings(store: Arc<S>, settings: LockSettings) -> Self {
        Self {
            store,
            settings,
            default_identifier: Uuid::new_v4().to_string(),
        }
    }

    /// The settings every handle of this manager uses.
    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// The identifier handles fall back to.
    pub fn default_identifier(&self) -> &str {
        &self.default_identifier
    }

    /// Replace the process-default identifier. Call during bootstrap,
    /// before handles are built; handles already constructed keep the
    /// identifier they resolved.
    pub fn set_default_identifier(&mut self, identifier: impl Into<String>) {
        self.default_identifier = identifier.into();
    }

    /// Build a handle for `key` with default options (shared mode).
    pub fn lock(&self, key: impl Into<String>) -> Lock<S> {
        self.lock_with(key, LockOptions::default())
    }

    /// Build a handle for `key` with explicit options.
    pub fn lock_with(&self, key: impl Into<String>, options: LockOptions) -> Lock<S> {
        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(|| self.default_identifier.clone());
        Lock::new(
            self.store.clone(),
            key.into(),
            identifier,
            self.settings.clone(),
            options,
        )
    }
}
