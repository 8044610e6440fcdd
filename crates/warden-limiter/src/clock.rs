//! Time source abstraction.
//!
//! Admission decisions bucket by unix seconds. The clock is a trait so tests
//! can pin or step time without sleeping through real windows.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix timestamp in seconds.
pub trait UnixClock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall-clock time from the system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl UnixClock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_unix() > 1_577_836_800);
    }
}
