//! Background reconcile loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::limiter::RateLimiter;

impl RateLimiter {
    /// Spawn the background reconciler task.
    ///
    /// Runs [`RateLimiter::reconcile`] once per configured interval until
    /// `shutdown` flips to `true` (or its sender is dropped). Failures are
    /// logged and retried on the next tick; they never surface to admission
    /// callers.
    #[must_use]
    pub fn spawn_reconciler(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.reconcile_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the first
            // cycle runs a full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = limiter.reconcile().await {
                            warn!(%error, "reconcile cycle failed, retrying next cycle");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("reconciler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
