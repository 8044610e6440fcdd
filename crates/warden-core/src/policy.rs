//! Admission policies and fixed-window math.

use serde::{Deserialize, Serialize};

/// Identifies a fixed-length time bucket: `timestamp / window_secs`.
pub type WindowIndex = i64;

/// A named admission rule: at most `capacity` admitted calls per subject key
/// per `window_secs`-second window.
///
/// Policies are never configured locally. They exist only as data pushed down
/// from the quota authority and are unknown until the first successful
/// reconciliation that mentions their config key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Name of the rate-limiting rule (e.g. an API or action class).
    pub config_key: String,

    /// Window length in seconds. Always positive.
    pub window_secs: i64,

    /// Maximum admitted count per subject key per window.
    pub capacity: i64,
}

impl Policy {
    /// Window bucket containing `ts` (unix seconds).
    #[must_use]
    pub const fn window_index(&self, ts: i64) -> WindowIndex {
        ts / self.window_secs
    }

    /// Window-aligned start timestamp of bucket `index`.
    #[must_use]
    pub const fn window_start(&self, index: WindowIndex) -> i64 {
        index * self.window_secs
    }

    /// Fraction of the window containing `ts` that has not yet elapsed,
    /// in `[0, 1]`. Used to decay the previous window's contribution in the
    /// sliding-window-counter approximation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn remaining_fraction(&self, ts: i64) -> f64 {
        (self.window_secs - ts % self.window_secs) as f64 / self.window_secs as f64
    }

    /// `true` when `window_secs` and `capacity` are values the limiter can
    /// act on. Entities failing this check are dropped at merge time.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.window_secs > 0 && self.capacity >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(window_secs: i64, capacity: i64) -> Policy {
        Policy {
            config_key: "login".to_string(),
            window_secs,
            capacity,
        }
    }

    #[test]
    fn window_index_is_integer_division() {
        let p = policy(60, 5);
        assert_eq!(p.window_index(0), 0);
        assert_eq!(p.window_index(59), 0);
        assert_eq!(p.window_index(60), 1);
        assert_eq!(p.window_index(61), 1);
        assert_eq!(p.window_start(1), 60);
    }

    #[test]
    fn remaining_fraction_decays_linearly() {
        let p = policy(60, 5);
        assert!((p.remaining_fraction(0) - 1.0).abs() < f64::EPSILON);
        assert!((p.remaining_fraction(30) - 0.5).abs() < f64::EPSILON);
        assert!((p.remaining_fraction(61) - 59.0 / 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validity_rejects_degenerate_windows() {
        assert!(policy(60, 0).is_valid());
        assert!(!policy(0, 5).is_valid());
        assert!(!policy(-1, 5).is_valid());
        assert!(!policy(60, -1).is_valid());
    }
}
