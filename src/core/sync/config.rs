/*!
 * Synchronization Configuration
 *
 * Runtime configuration for the acquire engine
 */

use crate::core::limits::{DEFAULT_MAX_SPINS, ENV_MAX_SPINS, ENV_METRICS, LOW_LATENCY_MAX_SPINS};
use tracing::warn;

/// Synchronizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for spins of the head successor before it parks again
    pub max_spins: u32,
    /// Record per-synchronizer counters
    pub metrics: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_spins: DEFAULT_MAX_SPINS,
            metrics: true,
        }
    }
}

impl SyncConfig {
    /// Configuration optimized for short critical sections
    pub const fn low_latency() -> Self {
        Self {
            max_spins: LOW_LATENCY_MAX_SPINS,
            metrics: true,
        }
    }

    /// Park immediately, never spin (useful on oversubscribed machines)
    pub const fn no_spin() -> Self {
        Self {
            max_spins: 0,
            metrics: true,
        }
    }

    /// Disable metric collection
    pub const fn without_metrics(mut self) -> Self {
        self.metrics = false;
        self
    }

    /// Build from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - SYNC_MAX_SPINS: spin bound (default: 255)
    /// - SYNC_METRICS: "0" or "false" disables counters (default: enabled)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ENV_MAX_SPINS) {
            match raw.trim().parse::<u32>() {
                Ok(spins) => config.max_spins = spins,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {}", ENV_MAX_SPINS),
            }
        }

        if let Ok(raw) = std::env::var(ENV_METRICS) {
            config.metrics = !matches!(raw.trim(), "0" | "false" | "off");
        }

        config
    }
}
