//! Shared settings and per-handle options.

use std::time::Duration;

/// Settings shared by every handle built from one [`crate::LockManager`].
///
/// Immutable after the manager is constructed; set them during bootstrap.
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Store-key prefix prepended to every caller key.
    pub prefix: String,
    /// Poll interval while waiting for incompatible holders to clear.
    pub wait_retry_interval: Duration,
    /// Upper bound on contended save attempts before giving up.
    pub max_save_retries: u32,
    /// Base of the jittered back-off once a save keeps losing the race.
    pub max_delay_per_save_retry: Duration,
    /// Extra attempts per storage call on transient failures.
    pub max_unavailable_retries: u32,
    /// Sleep between those attempts.
    pub delay_per_unavailable_retry: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            prefix: "lock/".to_string(),
            wait_retry_interval: Duration::from_secs(1),
            max_save_retries: 100,
            max_delay_per_save_retry: Duration::from_micros(1000),
            max_unavailable_retries: 3,
            delay_per_unavailable_retry: Duration::from_secs(1),
        }
    }
}

/// Per-handle configuration.
///
/// All fields can also be adjusted later through the handle's setters.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Holder identifier; falls back to the manager's process default.
    pub identifier: Option<String>,
    /// Request exclusive (true) or shared (false) access.
    pub exclusive: bool,
    /// How long an acquired entry lives before the store releases it.
    pub hold_time: Duration,
    /// How long `acquire` waits for incompatible holders to clear.
    pub wait_time: Duration,
    /// Hold duration applied by `refresh`; falls back to `hold_time`.
    pub refresh_time: Option<Duration>,
    /// Remaining hold above which `refresh` is a no-op. Zero disables the
    /// short-circuit.
    pub refresh_threshold: Duration,
    /// Release the held entry (best effort) when the handle is dropped.
    pub release_on_drop: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            identifier: None,
            exclusive: false,
            hold_time: Duration::from_secs(120),
            wait_time: Duration::from_secs(300),
            refresh_time: None,
            refresh_threshold: Duration::from_secs(30),
            release_on_drop: true,
        }
    }
}

impl LockOptions {
    /// Options for an exclusive hold with otherwise default values.
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::default()
        }
    }

    /// Set the holder identifier.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Set the hold duration.
    pub fn hold_time(mut self, hold_time: Duration) -> Self {
        self.hold_time = hold_time;
        self
    }

    /// Set how long `acquire` waits for the resource to free up.
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Set the hold duration used by `refresh`.
    pub fn refresh_time(mut self, refresh_time: Duration) -> Self {
        self.refresh_time = Some(refresh_time);
        self
    }

    /// Set the remaining-hold threshold below which `refresh` goes to the
    /// store.
    pub fn refresh_threshold(mut self, refresh_threshold: Duration) -> Self {
        self.refresh_threshold = refresh_threshold;
        self
    }

    /// Enable or disable the best-effort release on drop.
    pub fn release_on_drop(mut self, release_on_drop: bool) -> Self {
        self.release_on_drop = release_on_drop;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = LockSettings::default();
        assert_eq!(settings.prefix, "lock/");
        assert_eq!(settings.wait_retry_interval, Duration::from_secs(1));
        assert_eq!(settings.max_save_retries, 100);
        assert_eq!(settings.max_delay_per_save_retry, Duration::from_micros(1000));
        assert_eq!(settings.max_unavailable_retries, 3);
        assert_eq!(settings.delay_per_unavailable_retry, Duration::from_secs(1));
    }

    #[test]
    fn test_options_defaults() {
        let options = LockOptions::default();
        assert!(!options.exclusive);
        assert_eq!(options.hold_time, Duration::from_secs(120));
        assert_eq!(options.wait_time, Duration::from_secs(300));
        assert_eq!(options.refresh_time, None);
        assert_eq!(options.refresh_threshold, Duration::from_secs(30));
        assert!(options.release_on_drop);
    }

    #[test]
    fn test_options_builders() {
        let options = LockOptions::exclusive()
            .identifier("worker-7")
            .hold_time(Duration::from_secs(10))
            .wait_time(Duration::ZERO)
            .refresh_time(Duration::from_secs(5));
        assert!(options.exclusive);
        assert_eq!(options.identifier.as_deref(), Some("worker-7"));
        assert_eq!(options.hold_time, Duration::from_secs(10));
        assert_eq!(options.wait_time, Duration::ZERO);
        assert_eq!(options.refresh_time, Some(Duration::from_secs(5)));
    }
}
