//! Test doubles for the warden admission control client.
//!
//! [`FakeAuthority`] is an in-memory quota authority that aggregates reported
//! usage the way the real service does, letting integration tests drive full
//! reconcile cycles without a network. [`ManualClock`] pins unix time so
//! window boundaries can be crossed without sleeping.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

mod tracing_config;

pub use tracing_config::init_test_tracing;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use warden_core::{
    AuthorityError, PolicyEntity, ReconcileRequest, ReconcileResponse, UsageWindow, WindowIndex,
};
use warden_limiter::{QuotaAuthority, UnixClock};

/// In-memory quota authority.
///
/// Policies are configured up front with [`FakeAuthority::set_policy`];
/// reported usage is merged into per-window buckets and every configured
/// policy is returned on each reconcile, mirroring the real authority's
/// "authoritative view per known config key" contract.
#[derive(Debug, Default)]
pub struct FakeAuthority {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    /// config key -> (window_secs, capacity).
    policies: HashMap<String, (i64, i64)>,
    /// config key -> window index -> subject key -> aggregated usage.
    usage: HashMap<String, HashMap<WindowIndex, HashMap<String, i64>>>,
    /// Every request received, failures included.
    requests: Vec<ReconcileRequest>,
    /// Number of upcoming reconcile calls to fail with a transport error.
    fail_next: u32,
}

impl FakeAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure (or replace) a policy the authority will push down.
    pub fn set_policy(&self, config_key: &str, window_secs: i64, capacity: i64) {
        self.state
            .lock()
            .policies
            .insert(config_key.to_string(), (window_secs, capacity));
    }

    /// Make the next `count` reconcile calls fail with a transport error.
    /// The failing requests are still recorded.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    /// All reconcile requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ReconcileRequest> {
        self.state.lock().requests.clone()
    }

    /// Aggregated usage for one `(config key, window index, subject)`.
    #[must_use]
    pub fn usage(&self, config_key: &str, index: WindowIndex, subject_key: &str) -> i64 {
        self.state
            .lock()
            .usage
            .get(config_key)
            .and_then(|buckets| buckets.get(&index))
            .and_then(|subjects| subjects.get(subject_key))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl QuotaAuthority for FakeAuthority {
    async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<ReconcileResponse, AuthorityError> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(AuthorityError::Transport(
                "injected authority failure".to_string(),
            ));
        }

        let FakeState {
            policies, usage, ..
        } = &mut *state;

        for entity in &request.entities {
            let Some(&(window_secs, _)) = policies.get(&entity.config_key) else {
                continue;
            };
            for window in &entity.windows {
                let index = window.timestamp / window_secs;
                *usage
                    .entry(entity.config_key.clone())
                    .or_default()
                    .entry(index)
                    .or_default()
                    .entry(window.key.clone())
                    .or_insert(0) += window.usage;
            }
        }

        let mut entities = Vec::new();
        for (config_key, &(window_secs, capacity)) in &*policies {
            let mut windows = Vec::new();
            if let Some(buckets) = usage.get(config_key) {
                for (&index, subjects) in buckets {
                    for (subject_key, &count) in subjects {
                        windows.push(UsageWindow {
                            key: subject_key.clone(),
                            timestamp: index * window_secs,
                            usage: count,
                        });
                    }
                }
            }
            entities.push(PolicyEntity {
                config_key: config_key.clone(),
                window_secs,
                capacity,
                windows,
            });
        }

        Ok(ReconcileResponse { entities })
    }
}

/// A pinnable unix clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, ts: i64) {
        self.now.store(ts, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl UnixClock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
