//! Capped exponential backoff for reconnect attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped exponential backoff: `initial * factor^attempt`, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry.
    #[serde(default = "default_initial", with = "humantime_serde")]
    pub initial: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max", with = "humantime_serde")]
    pub max: Duration,

    /// Growth factor between consecutive attempts.
    #[serde(default = "default_factor")]
    pub factor: u32,
}

fn default_initial() -> Duration {
    Duration::from_millis(250)
}

fn default_max() -> Duration {
    Duration::from_secs(30)
}

fn default_factor() -> u32 {
    2
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            max: default_max(),
            factor: default_factor(),
        }
    }
}

impl Backoff {
    /// Create a backoff with the given bounds and a factor of 2.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: default_factor(),
        }
    }

    /// Delay to wait before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let growth = self.factor.max(1).saturating_pow(attempt);
        self.initial.saturating_mul(growth).min(self.max)
    }
}
