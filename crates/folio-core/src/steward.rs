//! Periodic size cap for the retained notification list.
//!
//! Best-effort memory bound, independent of business logic. The steward
//! decides *whether* and *what* to keep; the driver runs it on its interval
//! and applies the result through the registry so listeners observe it.

use std::time::Duration;

use crate::notification::{Notification, NotificationSet};

/// Interval between steward runs.
pub const DEFAULT_STEWARD_INTERVAL: Duration = Duration::from_secs(60);

/// Trim once the list grows beyond this many entries.
pub const DEFAULT_HIGH_WATER: usize = 200;

/// Size the list is trimmed down to.
pub const DEFAULT_LOW_WATER: usize = 100;

/// Steward configuration.
#[derive(Debug, Clone)]
pub struct StewardConfig {
    /// Interval between runs.
    pub interval: Duration,
    /// Trim threshold.
    pub high_water: usize,
    /// Entries kept after a trim (most recent first).
    pub low_water: usize,
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_STEWARD_INTERVAL,
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_LOW_WATER,
        }
    }
}

/// Memory steward.
#[derive(Debug, Clone, Default)]
pub struct MemorySteward {
    config: StewardConfig,
}

impl MemorySteward {
    /// Create a steward.
    pub fn new(config: StewardConfig) -> Self {
        debug_assert!(config.low_water <= config.high_water);
        Self { config }
    }

    /// Run interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Trimmed list if `set` is above the high-water mark, `None` otherwise.
    pub fn trim(&self, set: &NotificationSet) -> Option<Vec<Notification>> {
        if set.len() <= self.config.high_water {
            return None;
        }

        let mut trimmed = set.clone();
        trimmed.retain_most_recent(self.config.low_water);
        tracing::debug!(before = set.len(), after = trimmed.len(), "trimmed notification cache");
        Some(trimmed.into_vec())
    }
}
