//! Booking policy configuration.
//!
//! Loads from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default hold duration (15 minutes)
pub const DEFAULT_HOLD_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default maximum seats per order
pub const DEFAULT_MAX_SEATS_PER_ORDER: usize = 10;

/// Policy knobs for the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    /// How long an unpaid order holds its seats. Fixed at creation, not renewable.
    pub hold_duration: Duration,
    /// Upper bound on seats in a single order
    pub max_seats_per_order: usize,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_duration: DEFAULT_HOLD_DURATION,
            max_seats_per_order: DEFAULT_MAX_SEATS_PER_ORDER,
        }
    }
}

impl BookingConfig {
    /// Load configuration from environment variables.
    ///
    /// - `BOOKING_HOLD_DURATION_SECS` (default: 900)
    /// - `BOOKING_MAX_SEATS_PER_ORDER` (default: 10)
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            hold_duration: env::var("BOOKING_HOLD_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(DEFAULT_HOLD_DURATION, Duration::from_secs),
            max_seats_per_order: env::var("BOOKING_MAX_SEATS_PER_ORDER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_SEATS_PER_ORDER),
        }
    }

    /// Set the hold duration.
    #[must_use]
    pub const fn with_hold_duration(mut self, hold_duration: Duration) -> Self {
        self.hold_duration = hold_duration;
        self
    }

    /// Set the per-order seat limit.
    #[must_use]
    pub const fn with_max_seats_per_order(mut self, max: usize) -> Self {
        self.max_seats_per_order = max;
        self
    }

    /// Hold duration as a `chrono` duration for deadline arithmetic.
    ///
    /// Saturates at `chrono::Duration::MAX`; callers add it with `checked_add_signed`.
    #[must_use]
    pub fn hold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.hold_duration).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BookingConfig::default();
        assert_eq!(config.hold_duration, Duration::from_secs(900));
        assert_eq!(config.max_seats_per_order, 10);
        assert_eq!(config.hold(), chrono::Duration::minutes(15));
    }

    #[test]
    fn builder_overrides() {
        let config = BookingConfig::default()
            .with_hold_duration(Duration::from_secs(60))
            .with_max_seats_per_order(4);
        assert_eq!(config.hold(), chrono::Duration::seconds(60));
        assert_eq!(config.max_seats_per_order, 4);
    }

    #[test]
    fn oversized_hold_saturates() {
        let config = BookingConfig::default().with_hold_duration(Duration::MAX);
        assert_eq!(config.hold(), chrono::Duration::MAX);
    }
}
