//! The optimistic lock engine.
//!
//! A handle keeps a local view of the entry list stored under its key and
//! funnels every mutation through a compare-and-swap against the exact
//! payload it last observed. A lost race refreshes the view and retries;
//! sustained contention adds a jittered back-off. The stored `until`
//! timestamp is the server-side safety net: an entry whose holder vanishes
//! releases itself by expiring.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use snafu::ResultExt;
use tracing::debug;
use tracing::warn;

use crate::entry::LockEntry;
use crate::entry::now_unix_secs;
use crate::error::EncodePayloadSnafu;
use crate::error::LockError;
use crate::error::TooManySaveRetriesSnafu;
use crate::payload;
use crate::settings::LockOptions;
use crate::settings::LockSettings;
use crate::store::CasOutcome;
use crate::store::LockStore;
use crate::store::RetryingStore;
use crate::store::StoreError;
use crate::store::Witness;

/// Contended save attempts tolerated before the engine switches to
/// jittered back-off and plain refetch.
const DELAY_AFTER_RETRIES: u32 = 3;

/// What a save attempt produced.
#[derive(Debug)]
enum SaveOutcome {
    /// The payload was committed; the local view is authoritative.
    Saved,
    /// The payload changed under us; the view was brought up to date and
    /// the caller decides whether conditions still permit another attempt.
    Contended,
}

/// Handle for one resource key.
///
/// Single-threaded per handle: operations take `&mut self` and may sleep.
/// Contending handles, here or in other processes, coordinate solely
/// through the store's CAS.
pub struct Lock<S: LockStore + ?Sized + 'static> {
    store: RetryingStore<S>,
    key: String,
    key_in_store: String,
    identifier: String,
    settings: LockSettings,
    options: LockOptions,
    entries: Vec<LockEntry>,
    previous_payload: Witness,
    retries: u32,
}

impl<S: LockStore + ?Sized + 'static> Lock<S> {
    pub(crate) fn new(
        store: Arc<S>,
        key: String,
        identifier: String,
        settings: LockSettings,
        options: LockOptions,
    ) -> Self {
        let key_in_store = format!("{}{}", settings.prefix, key);
        let store = RetryingStore::new(
            store,
            settings.max_unavailable_retries,
            settings.delay_per_unavailable_retry,
        );
        Self {
            store,
            key,
            key_in_store,
            identifier,
            settings,
            options,
            entries: Vec::new(),
            previous_payload: Witness::Absent,
            retries: 0,
        }
    }

    /// Acquire the lock, waiting up to the configured wait time for
    /// incompatible holders to clear.
    ///
    /// Returns whether the handle holds a live entry afterwards. `false`
    /// means the wait elapsed while the resource stayed incompatible; that
    /// is not an error.
    pub async fn acquire(&mut self) -> Result<bool, LockError> {
        self.retries = 0;
        loop {
            if !self.wait_for_other_locks(None).await? {
                break;
            }
            match self.add_or_update(self.options.hold_time).await? {
                SaveOutcome::Saved => break,
                SaveOutcome::Contended => continue,
            }
        }
        let held = self.is_locked();
        if held {
            debug!(key = %self.key, identifier = %self.identifier,
                exclusive = self.options.exclusive, "lock acquired");
        }
        Ok(held)
    }

    /// Extend the own entry's expiry.
    ///
    /// A no-op while more than `refresh_threshold` of the hold remains.
    /// Returns `Ok(false)` when a contending holder appeared since the
    /// last touch; the caller must treat the lock as lost and reacquire.
    /// When the own entry is already gone and the view permits it, the
    /// refresh writes a fresh one, so `refresh` doubles as an
    /// unconditional heartbeat.
    pub async fn refresh(&mut self) -> Result<bool, LockError> {
        let threshold = self.options.refresh_threshold.as_secs() as i64;
        if threshold > 0
            && let Some(remaining) = self.remaining_hold()
            && remaining > threshold
        {
            return Ok(true);
        }
        self.refresh_view().await?;
        self.retries = 0;
        loop {
            if !self.can_lock() {
                debug!(key = %self.key, identifier = %self.identifier,
                    "refresh blocked by contending holder");
                return Ok(false);
            }
            let duration = self.options.refresh_time.unwrap_or(self.options.hold_time);
            match self.add_or_update(duration).await? {
                SaveOutcome::Saved => return Ok(true),
                SaveOutcome::Contended => continue,
            }
        }
    }

    /// Drop every entry this handle owns.
    ///
    /// Idempotent: a handle that holds nothing issues no store traffic.
    pub async fn release(&mut self) -> Result<(), LockError> {
        if !self.is_locked() {
            return Ok(());
        }
        self.refresh_view().await?;
        self.retries = 0;
        loop {
            let identifier = self.identifier.clone();
            self.entries.retain(|entry| !entry.held_by(&identifier));
            match self.save_locks().await? {
                SaveOutcome::Saved => {
                    debug!(key = %self.key, identifier = %self.identifier, "lock released");
                    return Ok(());
                }
                SaveOutcome::Contended => continue,
            }
        }
    }

    /// Poll the store until the view permits acquiring or `wait` elapses.
    ///
    /// `None` waits the configured wait time. Returns whether acquiring is
    /// permitted right now.
    pub async fn wait_for_other_locks(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<bool, LockError> {
        let wait = wait.unwrap_or(self.options.wait_time);
        let start = Instant::now();
        self.refresh_view().await?;
        while !self.can_lock() && start.elapsed() < wait {
            tokio::time::sleep(self.settings.wait_retry_interval).await;
            self.refresh_view().await?;
        }
        Ok(self.can_lock())
    }

    /// Whether the local view permits this handle to take or keep the
    /// lock: no live foreign entry is incompatible with the requested mode
    /// (shared holds coexist; exclusivity on either side excludes).
    pub fn can_lock(&self) -> bool {
        let now = now_unix_secs();
        !self.entries.iter().any(|entry| {
            !entry.held_by(&self.identifier)
                && !entry.is_expired(now)
                && (entry.exclusive || self.options.exclusive)
        })
    }

    /// Whether the handle holds a live entry in the last local view.
    pub fn is_locked(&self) -> bool {
        let now = now_unix_secs();
        self.entries
            .iter()
            .any(|entry| entry.held_by(&self.identifier) && !entry.is_expired(now))
    }

    /// Seconds until the own entry expires, non-positive once it has.
    /// `None` when no own entry exists in the last view, distinguishing
    /// "never held" from "held and expired".
    pub fn remaining_hold(&self) -> Option<i64> {
        let now = now_unix_secs();
        self.entries
            .iter()
            .find(|entry| entry.held_by(&self.identifier))
            .map(|entry| entry.remaining(now))
    }

    /// A live entry of another holder exists in the last local view.
    pub fn is_locked_by_other(&self) -> bool {
        let now = now_unix_secs();
        self.entries
            .iter()
            .any(|entry| !entry.held_by(&self.identifier) && !entry.is_expired(now))
    }

    /// A live exclusive entry of another holder exists in the last local
    /// view.
    pub fn is_locked_by_other_exclusively(&self) -> bool {
        let now = now_unix_secs();
        self.entries.iter().any(|entry| {
            !entry.held_by(&self.identifier) && !entry.is_expired(now) && entry.exclusive
        })
    }

    /// The caller's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The prefixed key used in the store.
    pub fn store_key(&self) -> &str {
        &self.key_in_store
    }

    /// The holder identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Change the holder identifier. An entry already written under the
    /// previous identifier is left to expire.
    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    /// Whether the handle requests exclusive access.
    pub fn is_exclusive(&self) -> bool {
        self.options.exclusive
    }

    /// Request shared or exclusive access for subsequent operations.
    pub fn set_exclusive(&mut self, exclusive: bool) {
        self.options.exclusive = exclusive;
    }

    /// The hold duration applied by `acquire`.
    pub fn hold_time(&self) -> Duration {
        self.options.hold_time
    }

    /// Set the hold duration.
    pub fn set_hold_time(&mut self, hold_time: Duration) {
        self.options.hold_time = hold_time;
    }

    /// How long `acquire` waits for the resource to free up.
    pub fn wait_time(&self) -> Duration {
        self.options.wait_time
    }

    /// Set the acquire wait time.
    pub fn set_wait_time(&mut self, wait_time: Duration) {
        self.options.wait_time = wait_time;
    }

    /// The hold duration applied by `refresh`, when configured.
    pub fn refresh_time(&self) -> Option<Duration> {
        self.options.refresh_time
    }

    /// Set the hold duration applied by `refresh`.
    pub fn set_refresh_time(&mut self, refresh_time: Option<Duration>) {
        self.options.refresh_time = refresh_time;
    }

    /// The remaining-hold threshold above which `refresh` is a no-op.
    pub fn refresh_threshold(&self) -> Duration {
        self.options.refresh_threshold
    }

    /// Set the refresh threshold. Zero disables the short-circuit.
    pub fn set_refresh_threshold(&mut self, refresh_threshold: Duration) {
        self.options.refresh_threshold = refresh_threshold;
    }

    /// Whether the handle releases its entry when dropped.
    pub fn release_on_drop(&self) -> bool {
        self.options.release_on_drop
    }

    /// Enable or disable the best-effort release on drop.
    pub fn set_release_on_drop(&mut self, release_on_drop: bool) {
        self.options.release_on_drop = release_on_drop;
    }

    /// Write the own entry into the local view and save. An existing own
    /// entry is updated in place; a holder never occupies two slots.
    async fn add_or_update(&mut self, duration: Duration) -> Result<SaveOutcome, LockError> {
        let until = now_unix_secs() + duration.as_secs() as i64;
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.held_by(&self.identifier))
        {
            Some(own) => own.until = until,
            None => self.entries.push(LockEntry::new(
                self.identifier.clone(),
                until,
                self.options.exclusive,
            )),
        }
        self.save_locks().await
    }

    /// Commit the local view with a CAS against the last observed payload.
    async fn save_locks(&mut self) -> Result<SaveOutcome, LockError> {
        let witness = self.previous_payload.clone();
        payload::purge_expired(&mut self.entries, now_unix_secs());

        // From the third lost round on: jittered sleep plus a plain
        // refetch, no folding of the returned value.
        let delay = self.retries >= DELAY_AFTER_RETRIES;
        let fetch_on_conflict = !delay;

        let (outcome, committed) = if self.entries.is_empty() {
            let outcome = self
                .store
                .delete_if(&self.key_in_store, &witness, fetch_on_conflict)
                .await
                .map_err(|err| storage_error(&self.settings, err))?;
            (outcome, Witness::Absent)
        } else {
            let encoded = payload::encode(&self.entries).context(EncodePayloadSnafu)?;
            let outcome = self
                .store
                .put_if(&self.key_in_store, &encoded, &witness, fetch_on_conflict)
                .await
                .map_err(|err| storage_error(&self.settings, err))?;
            (outcome, Witness::Present(encoded))
        };

        match outcome {
            CasOutcome::Committed => {
                self.previous_payload = committed;
                Ok(SaveOutcome::Saved)
            }
            CasOutcome::Conflict { current } => {
                let witness = after_conflict(
                    &self.store,
                    &self.settings,
                    &self.key,
                    &self.key_in_store,
                    &mut self.retries,
                    current,
                )
                .await?;
                self.update_from_payload(witness);
                Ok(SaveOutcome::Contended)
            }
        }
    }

    /// Fetch the current payload and make it the local view.
    async fn refresh_view(&mut self) -> Result<(), LockError> {
        let witness = self
            .store
            .get(&self.key_in_store)
            .await
            .map_err(|err| storage_error(&self.settings, err))?;
        self.update_from_payload(witness);
        Ok(())
    }

    /// Install `witness` as the authoritative local view.
    fn update_from_payload(&mut self, witness: Witness) {
        self.entries = payload::decode(&witness);
        self.previous_payload = witness;
    }
}

impl<S: LockStore + ?Sized + 'static> Drop for Lock<S> {
    fn drop(&mut self) {
        if !self.options.release_on_drop || !self.is_locked() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key_in_store,
                "no runtime at teardown, entry left to expire");
            return;
        };

        let store = self.store.clone();
        let settings = self.settings.clone();
        let key = self.key.clone();
        let key_in_store = self.key_in_store.clone();
        let identifier = self.identifier.clone();
        let witness = std::mem::replace(&mut self.previous_payload, Witness::Absent);
        let entries = std::mem::take(&mut self.entries);

        runtime.spawn(async move {
            match remove_holder(
                &store,
                &settings,
                &key,
                &key_in_store,
                &identifier,
                witness,
                entries,
            )
            .await
            {
                Ok(()) => {
                    debug!(key = %key_in_store, identifier = %identifier, "lock released on drop")
                }
                Err(err) => warn!(key = %key_in_store, error = %err,
                    "release on drop failed, entry left to expire"),
            }
        });
    }
}

fn storage_error(settings: &LockSettings, err: StoreError) -> LockError {
    if err.is_retryable() {
        LockError::Unavailable {
            attempts: settings.max_unavailable_retries + 1,
            source: err,
        }
    } else {
        LockError::Store { source: err }
    }
}

/// Bring a conflicted save up to date under the shared save-retry policy:
/// bounded attempts, fold the returned value while losses are fresh, and
/// switch to jittered back-off with a plain refetch once they persist.
async fn after_conflict<S: LockStore + ?Sized>(
    store: &RetryingStore<S>,
    settings: &LockSettings,
    key: &str,
    key_in_store: &str,
    retries: &mut u32,
    current: Option<Witness>,
) -> Result<Witness, LockError> {
    if *retries >= settings.max_save_retries {
        return TooManySaveRetriesSnafu {
            key: key.to_string(),
            retries: *retries,
        }
        .fail();
    }
    let witness = if *retries >= DELAY_AFTER_RETRIES {
        let ceiling =
            settings.max_delay_per_save_retry.as_micros() as u64 * u64::from(*retries);
        let pause = rand::rng().random_range(0..=ceiling);
        debug!(key, retries = *retries, pause_us = pause, "save contended, backing off");
        tokio::time::sleep(Duration::from_micros(pause)).await;
        store
            .get(key_in_store)
            .await
            .map_err(|err| storage_error(settings, err))?
    } else {
        match current {
            Some(current) => current,
            None => store
                .get(key_in_store)
                .await
                .map_err(|err| storage_error(settings, err))?,
        }
    };
    *retries += 1;
    Ok(witness)
}

/// Best-effort removal of `identifier`'s entries, used by the drop path
/// where no handle state survives. Conflicts run through the same
/// save-retry policy as every other save.
async fn remove_holder<S: LockStore + ?Sized>(
    store: &RetryingStore<S>,
    settings: &LockSettings,
    key: &str,
    key_in_store: &str,
    identifier: &str,
    mut witness: Witness,
    mut entries: Vec<LockEntry>,
) -> Result<(), LockError> {
    let mut retries = 0;
    loop {
        let now = now_unix_secs();
        entries.retain(|entry| !entry.held_by(identifier) && !entry.is_expired(now));

        let delay = retries >= DELAY_AFTER_RETRIES;
        let fetch_on_conflict = !delay;
        let outcome = if entries.is_empty() {
            store.delete_if(key_in_store, &witness, fetch_on_conflict).await
        } else {
            let encoded = payload::encode(&entries).context(EncodePayloadSnafu)?;
            store.put_if(key_in_store, &encoded, &witness, fetch_on_conflict).await
        }
        .map_err(|err| storage_error(settings, err))?;

        match outcome {
            CasOutcome::Committed => return Ok(()),
            CasOutcome::Conflict { current } => {
                witness =
                    after_conflict(store, settings, key, key_in_store, &mut retries, current)
                        .await?;
                entries = payload::decode(&witness);
            }
        }
    }
}
