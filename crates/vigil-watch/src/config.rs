//! Watcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_scan::IgnoreOptions;

use crate::WatchMethod;

/// Default poll period. Deliberately prime so many pollers drift apart
/// instead of stat-ing in lockstep.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5007);

/// Default quiescence window before a batch of raw notifications is
/// reconciled.
pub const DEFAULT_CATCHUP_DELAY: Duration = Duration::from_millis(2000);

/// Configuration for a watcher node, inherited by every child it spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Poll period for the poll backend.
    pub interval: Duration,

    /// Historical flag from runtimes where a poller keeps the process
    /// alive. Tokio tasks do not, so this is carried for API completeness
    /// and has no runtime effect.
    pub persistent: bool,

    /// Debounce window: raw notifications arriving within this interval of
    /// each other collapse into a single reconciliation pass.
    pub catchup_delay: Duration,

    /// Backends to try at bind time, in order.
    pub preferred_methods: Vec<WatchMethod>,

    /// Resolve symlinks when taking stat snapshots and recursing.
    pub follow_links: bool,

    /// Path filtering options, evaluated by `vigil-scan`.
    pub ignore: IgnoreOptions,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            persistent: true,
            catchup_delay: DEFAULT_CATCHUP_DELAY,
            preferred_methods: vec![WatchMethod::Event, WatchMethod::Poll],
            follow_links: true,
            ignore: IgnoreOptions::default(),
        }
    }
}

impl WatchConfig {
    /// Create a configuration with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the debounce window.
    pub fn with_catchup_delay(mut self, delay: Duration) -> Self {
        self.catchup_delay = delay;
        self
    }

    /// Replace the backend fallback order.
    pub fn with_preferred_methods(mut self, methods: Vec<WatchMethod>) -> Self {
        self.preferred_methods = methods;
        self
    }

    /// Toggle symlink following.
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Replace the ignore options.
    pub fn with_ignore(mut self, ignore: IgnoreOptions) -> Self {
        self.ignore = ignore;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = WatchConfig::default();
        assert_eq!(config.interval, Duration::from_millis(5007));
        assert_eq!(config.catchup_delay, Duration::from_millis(2000));
        assert_eq!(
            config.preferred_methods,
            vec![WatchMethod::Event, WatchMethod::Poll]
        );
        assert!(config.persistent);
        assert!(config.follow_links);
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = WatchConfig::new()
            .with_interval(Duration::from_millis(100))
            .with_catchup_delay(Duration::from_millis(50))
            .with_preferred_methods(vec![WatchMethod::Poll])
            .with_follow_links(false);

        assert_eq!(config.interval, Duration::from_millis(100));
        assert_eq!(config.catchup_delay, Duration::from_millis(50));
        assert_eq!(config.preferred_methods, vec![WatchMethod::Poll]);
        assert!(!config.follow_links);
    }
}
