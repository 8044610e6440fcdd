//! The `RateLimiter` facade: admission decisions and reconcile cycles.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use warden_core::{AdmissionError, AuthorityError};

use crate::authority::QuotaAuthority;
use crate::clock::{SystemClock, UnixClock};
use crate::store::{Decision, UsageStore};

/// Default reconcile interval matching the fleet-wide convention.
pub(crate) const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Client-side distributed rate limiter.
///
/// One instance owns all limiter state for a process; share it via `Arc`.
/// [`RateLimiter::limit_rate`] is the hot-path entry point and never touches
/// the network. [`RateLimiter::spawn_reconciler`] starts the background task
/// that keeps local state converging with the quota authority.
pub struct RateLimiter {
    store: Mutex<UsageStore>,
    authority: Arc<dyn QuotaAuthority>,
    clock: Arc<dyn UnixClock>,
    reconcile_interval: Duration,
    rpc_timeout: Duration,
    counters: Counters,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("reconcile_interval", &self.reconcile_interval)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Start building a limiter talking to `authority`.
    #[must_use]
    pub fn builder(authority: Arc<dyn QuotaAuthority>) -> RateLimiterBuilder {
        RateLimiterBuilder {
            authority,
            clock: Arc::new(SystemClock),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            rpc_timeout: None,
        }
    }

    /// Decide admission for one call of `subject_key` under `config_key`.
    ///
    /// Runs the whole read-decide-increment sequence atomically under the
    /// store lock and performs no I/O. Safe to call before any reconciliation
    /// has ever succeeded: an unknown config key is admitted fail-open and
    /// buffered as orphan usage.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::TooManyRequests`] when the sliding-window estimate
    /// exceeds the policy capacity, and [`AdmissionError::DecisionPanicked`]
    /// if the decision closure panicked; the lock is released either way.
    pub fn limit_rate(&self, config_key: &str, subject_key: &str) -> Result<(), AdmissionError> {
        // parking_lot mutexes do not poison, so an unwinding decision leaves
        // the store usable for the next caller.
        let decision = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut store = self.store.lock();
            let ts = self.clock.now_unix();
            store.decide(config_key, subject_key, ts)
        }));

        match decision {
            Ok(Decision::Admit) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Decision::AdmitOrphan) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.counters.orphaned.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Decision::Reject) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(AdmissionError::TooManyRequests {
                    config_key: config_key.to_string(),
                    subject_key: subject_key.to_string(),
                })
            }
            Err(payload) => Err(AdmissionError::DecisionPanicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Run one reconcile cycle: prune, snapshot-and-clear, transmit, merge.
    ///
    /// The store lock is held for prune + snapshot + clear, dropped for the
    /// RPC, and re-acquired for the merge; it is never held across I/O. A
    /// failed RPC changes no state beyond the already-cleared batch and is
    /// retried by simply running the next cycle.
    ///
    /// # Errors
    ///
    /// Any [`AuthorityError`] from the transmit step. Callers of
    /// [`RateLimiter::limit_rate`] never see these.
    pub async fn reconcile(&self) -> Result<(), AuthorityError> {
        let request = {
            let mut store = self.store.lock();
            let now = self.clock.now_unix();
            store.prune(now);
            store.snapshot_and_clear(now)
        };

        let Some(request) = request else {
            debug!("reconcile skipped, nothing to report");
            return Ok(());
        };

        let deadline = self.rpc_timeout;
        let result = tokio::time::timeout(deadline, self.authority.reconcile(request))
            .await
            .unwrap_or_else(|_| {
                Err(AuthorityError::DeadlineExceeded {
                    deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                })
            });

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.counters.reconcile_failures.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        };

        self.store.lock().merge(response);
        Ok(())
    }

    /// Interval between reconcile cycles.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        self.reconcile_interval
    }

    /// Snapshot of the in-process admission counters.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            orphaned: self.counters.orphaned.load(Ordering::Relaxed),
            reconcile_failures: self.counters.reconcile_failures.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "non-string panic payload".to_string())
        },
        ToString::to_string,
    )
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    authority: Arc<dyn QuotaAuthority>,
    clock: Arc<dyn UnixClock>,
    reconcile_interval: Duration,
    rpc_timeout: Option<Duration>,
}

impl RateLimiterBuilder {
    /// Replace the time source. Tests use this to pin window boundaries.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn UnixClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Interval between reconcile cycles. Default 30s.
    #[must_use]
    pub const fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Deadline for each reconcile RPC. Defaults to the reconcile interval so
    /// a hung call cannot delay the next cycle.
    #[must_use]
    pub const fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    /// Build the limiter.
    #[must_use]
    pub fn build(self) -> RateLimiter {
        let rpc_timeout = self.rpc_timeout.unwrap_or(self.reconcile_interval);
        RateLimiter {
            store: Mutex::new(UsageStore::default()),
            authority: self.authority,
            clock: self.clock,
            reconcile_interval: self.reconcile_interval,
            rpc_timeout,
            counters: Counters::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    orphaned: AtomicU64,
    reconcile_failures: AtomicU64,
}

/// Point-in-time view of the admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Calls admitted, including fail-open admits.
    pub admitted: u64,
    /// Calls rejected over capacity.
    pub rejected: u64,
    /// Fail-open admits recorded before the policy was known.
    pub orphaned: u64,
    /// Reconcile cycles that failed to reach the authority.
    pub reconcile_failures: u64,
}
