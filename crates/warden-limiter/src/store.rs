//! In-memory usage state shared by the admission path and the reconciler.
//!
//! Four sparse maps guarded, at the [`crate::RateLimiter`] level, by a single
//! mutex: policies, confirmed ("cold") usage from the authority, pending
//! ("hot") increments not yet shipped, and orphan increments recorded before
//! a policy was known. Nothing in here performs I/O; every method runs while
//! the caller holds the store lock.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;
use warden_core::{
    Policy, PolicyEntity, ReconcileRequest, ReconcileResponse, UsageEntity, UsageWindow,
    WindowIndex,
};

/// Outcome of one locked admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Within capacity; a pending increment was recorded.
    Admit,
    /// Policy unknown; admitted fail-open and buffered as orphan usage.
    AdmitOrphan,
    /// Sliding-window estimate exceeded the policy capacity.
    Reject,
}

#[derive(Debug, Default)]
pub(crate) struct UsageStore {
    /// config key -> policy. Written only by merge; replaced as a whole.
    policies: HashMap<String, Policy>,

    /// config key -> window index -> subject key -> confirmed count.
    confirmed: HashMap<String, HashMap<WindowIndex, HashMap<String, i64>>>,

    /// config key -> subject key -> window index -> unsent count.
    pending: HashMap<String, HashMap<String, HashMap<WindowIndex, i64>>>,

    /// config key -> subject key -> raw timestamp -> unsent count.
    /// Kept by raw timestamp because the window length was unknown when the
    /// increment was recorded.
    orphan: HashMap<String, HashMap<String, HashMap<i64, i64>>>,
}

impl UsageStore {
    /// Confirmed plus pending usage for one `(config key, subject, window)`.
    ///
    /// Sums a possibly-stale authoritative value with the definitely-current
    /// local value; this is the only read path for admission decisions.
    fn usage(&self, config_key: &str, subject_key: &str, index: WindowIndex) -> i64 {
        let cold = self
            .confirmed
            .get(config_key)
            .and_then(|buckets| buckets.get(&index))
            .and_then(|subjects| subjects.get(subject_key))
            .copied()
            .unwrap_or(0);

        let hot = self
            .pending
            .get(config_key)
            .and_then(|subjects| subjects.get(subject_key))
            .and_then(|buckets| buckets.get(&index))
            .copied()
            .unwrap_or(0);

        cold + hot
    }

    /// Read-decide-increment, atomically with respect to the caller's lock.
    ///
    /// The decayed previous-window term is truncated to an integer before the
    /// comparison, and the comparison is strict and excludes the in-flight
    /// call, so up to `capacity + 1` admits can land in a fresh window. Both
    /// behaviors match the authority's arithmetic and must not be changed
    /// unilaterally.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub(crate) fn decide(&mut self, config_key: &str, subject_key: &str, ts: i64) -> Decision {
        let Some(policy) = self.policies.get(config_key) else {
            // Fail-open: infrastructure not yet knowing a policy must never
            // block a caller.
            self.bump_orphan(config_key, subject_key, ts);
            return Decision::AdmitOrphan;
        };

        let index = policy.window_index(ts);
        let remaining = policy.remaining_fraction(ts);
        let capacity = policy.capacity;

        let last = self.usage(config_key, subject_key, index - 1);
        let current = self.usage(config_key, subject_key, index);
        let estimate = (last as f64 * remaining) as i64 + current;

        if estimate > capacity {
            return Decision::Reject;
        }

        self.bump_pending(config_key, subject_key, index);
        Decision::Admit
    }

    fn bump_pending(&mut self, config_key: &str, subject_key: &str, index: WindowIndex) {
        *self
            .pending
            .entry(config_key.to_string())
            .or_default()
            .entry(subject_key.to_string())
            .or_default()
            .entry(index)
            .or_insert(0) += 1;
    }

    fn bump_orphan(&mut self, config_key: &str, subject_key: &str, ts: i64) {
        *self
            .orphan
            .entry(config_key.to_string())
            .or_default()
            .entry(subject_key.to_string())
            .or_default()
            .entry(ts)
            .or_insert(0) += 1;
    }

    /// Drop confirmed buckets older than two window-widths.
    ///
    /// Admission only ever consults the current and immediately prior window,
    /// so anything older is dead weight. The current and prior windows are
    /// never touched.
    pub(crate) fn prune(&mut self, now: i64) {
        let policies = &self.policies;
        self.confirmed.retain(|config_key, buckets| {
            if let Some(policy) = policies.get(config_key) {
                let horizon = policy.window_index(now) - 2;
                buckets.retain(|index, _| *index >= horizon);
            }
            !buckets.is_empty()
        });
    }

    /// Build the outgoing reconcile batch and clear hot state, in one step.
    ///
    /// Pending usage is reported with window-aligned timestamps, orphan usage
    /// with the raw timestamps it was recorded at. Subject keys present in
    /// confirmed state but absent from the batch are added as zero-usage
    /// entries so the authority keeps full visibility for its own expiry.
    ///
    /// Pending and orphan state are emptied before the caller releases the
    /// lock, which closes the race between snapshotting and new increments
    /// arriving. The cleared batch is lost if the transmit later fails; the
    /// loss is bounded to one cycle's worth.
    pub(crate) fn snapshot_and_clear(&mut self, now: i64) -> Option<ReconcileRequest> {
        let pending = std::mem::take(&mut self.pending);
        let orphan = std::mem::take(&mut self.orphan);

        let mut batch: BTreeMap<String, Vec<UsageWindow>> = BTreeMap::new();

        for (config_key, subjects) in pending {
            let Some(policy) = self.policies.get(&config_key) else {
                continue;
            };
            let windows = batch.entry(config_key.clone()).or_default();
            for (subject_key, buckets) in subjects {
                for (index, usage) in buckets {
                    windows.push(UsageWindow {
                        key: subject_key.clone(),
                        timestamp: policy.window_start(index),
                        usage,
                    });
                }
            }
        }

        for (config_key, subjects) in orphan {
            let windows = batch.entry(config_key).or_default();
            for (subject_key, stamps) in subjects {
                for (timestamp, usage) in stamps {
                    windows.push(UsageWindow {
                        key: subject_key.clone(),
                        timestamp,
                        usage,
                    });
                }
            }
        }

        for (config_key, buckets) in &self.confirmed {
            let Some(policy) = self.policies.get(config_key) else {
                continue;
            };
            let aligned_now = policy.window_start(policy.window_index(now));

            let reported: HashSet<String> = batch
                .get(config_key)
                .map(|windows| windows.iter().map(|w| w.key.clone()).collect())
                .unwrap_or_default();

            let mut fillers = Vec::new();
            let mut filled: HashSet<&str> = HashSet::new();
            for subjects in buckets.values() {
                for subject_key in subjects.keys() {
                    if !reported.contains(subject_key) && filled.insert(subject_key) {
                        fillers.push(UsageWindow {
                            key: subject_key.clone(),
                            timestamp: aligned_now,
                            usage: 0,
                        });
                    }
                }
            }
            if !fillers.is_empty() {
                batch.entry(config_key.clone()).or_default().extend(fillers);
            }
        }

        let entities: Vec<UsageEntity> = batch
            .into_iter()
            .map(|(config_key, mut windows)| {
                windows.sort_by(|a, b| (&a.key, a.timestamp).cmp(&(&b.key, b.timestamp)));
                UsageEntity {
                    config_key,
                    windows,
                }
            })
            .collect();

        if entities.is_empty() {
            None
        } else {
            Some(ReconcileRequest { entities })
        }
    }

    /// Apply an authority response: replace each returned policy as a whole
    /// and rebuild that config key's confirmed buckets from the returned
    /// windows. The remote view is authoritative and supersedes stale local
    /// confirmed entries outright.
    pub(crate) fn merge(&mut self, response: ReconcileResponse) {
        for entity in response.entities {
            let PolicyEntity {
                config_key,
                window_secs,
                capacity,
                windows,
            } = entity;

            let policy = Policy {
                config_key: config_key.clone(),
                window_secs,
                capacity,
            };
            if !policy.is_valid() {
                warn!(
                    config_key = %config_key,
                    window_secs,
                    capacity,
                    "dropping invalid policy entity from authority response"
                );
                continue;
            }

            let mut buckets: HashMap<WindowIndex, HashMap<String, i64>> = HashMap::new();
            for window in windows {
                let index = window.timestamp / window_secs;
                buckets
                    .entry(index)
                    .or_default()
                    .insert(window.key, window.usage);
            }

            self.confirmed.insert(config_key.clone(), buckets);
            self.policies.insert(config_key, policy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_policy(window_secs: i64, capacity: i64) -> UsageStore {
        let mut store = UsageStore::default();
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs,
                capacity,
                windows: Vec::new(),
            }],
        });
        store
    }

    #[test]
    fn usage_sums_confirmed_and_pending() {
        let mut store = store_with_policy(60, 10);
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 10,
                windows: vec![UsageWindow {
                    key: "user-a".to_string(),
                    timestamp: 120,
                    usage: 4,
                }],
            }],
        });
        store.bump_pending("login", "user-a", 2);
        store.bump_pending("login", "user-a", 2);

        assert_eq!(store.usage("login", "user-a", 2), 6);
        assert_eq!(store.usage("login", "user-a", 1), 0);
        assert_eq!(store.usage("login", "user-b", 2), 0);
    }

    #[test]
    fn unknown_policy_records_orphan_and_admits() {
        let mut store = UsageStore::default();
        assert_eq!(store.decide("unseen", "user-a", 17), Decision::AdmitOrphan);
        assert_eq!(store.decide("unseen", "user-a", 17), Decision::AdmitOrphan);

        let request = store.snapshot_and_clear(17).expect("orphans to ship");
        assert_eq!(request.entities.len(), 1);
        assert_eq!(request.entities[0].config_key, "unseen");
        assert_eq!(
            request.entities[0].windows,
            vec![UsageWindow {
                key: "user-a".to_string(),
                timestamp: 17,
                usage: 2,
            }]
        );
    }

    #[test]
    fn decide_rejects_only_past_capacity() {
        let mut store = store_with_policy(60, 3);

        // Strict comparison before incrementing: capacity + 1 admits land in
        // a fresh window before the first rejection.
        for _ in 0..4 {
            assert_eq!(store.decide("login", "user-a", 10), Decision::Admit);
        }
        assert_eq!(store.decide("login", "user-a", 10), Decision::Reject);
        assert_eq!(store.decide("login", "user-a", 11), Decision::Reject);
    }

    #[test]
    fn previous_window_decays_with_truncation() {
        let mut store = store_with_policy(60, 5);
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 5,
                windows: vec![UsageWindow {
                    key: "user-a".to_string(),
                    timestamp: 0,
                    usage: 6,
                }],
            }],
        });

        // t=61: floor(6 * 59/60) = 5, not past capacity 5.
        assert_eq!(store.decide("login", "user-a", 61), Decision::Admit);
    }

    #[test]
    fn prune_keeps_current_and_prior_windows() {
        let mut store = store_with_policy(60, 5);
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 5,
                windows: vec![
                    UsageWindow {
                        key: "old".to_string(),
                        timestamp: 0,
                        usage: 1,
                    },
                    UsageWindow {
                        key: "prior".to_string(),
                        timestamp: 540,
                        usage: 1,
                    },
                    UsageWindow {
                        key: "current".to_string(),
                        timestamp: 600,
                        usage: 1,
                    },
                ],
            }],
        });

        store.prune(630);

        assert_eq!(store.usage("login", "old", 0), 0);
        assert_eq!(store.usage("login", "prior", 9), 1);
        assert_eq!(store.usage("login", "current", 10), 1);
    }

    #[test]
    fn snapshot_clears_pending_unconditionally() {
        let mut store = store_with_policy(60, 5);
        assert_eq!(store.decide("login", "user-a", 70), Decision::Admit);

        let first = store.snapshot_and_clear(70).expect("batch");
        assert_eq!(first.entities[0].windows[0].usage, 1);
        assert_eq!(first.entities[0].windows[0].timestamp, 60);

        // Nothing accumulated since the clear and no confirmed subjects:
        // nothing to transmit.
        assert!(store.snapshot_and_clear(71).is_none());
    }

    #[test]
    fn snapshot_reports_idle_confirmed_subjects_as_zero_usage() {
        let mut store = store_with_policy(60, 5);
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 5,
                windows: vec![UsageWindow {
                    key: "idle-user".to_string(),
                    timestamp: 60,
                    usage: 2,
                }],
            }],
        });
        assert_eq!(store.decide("login", "busy-user", 70), Decision::Admit);

        let request = store.snapshot_and_clear(70).expect("batch");
        let windows = &request.entities[0].windows;
        assert_eq!(windows.len(), 2);
        assert!(windows
            .iter()
            .any(|w| w.key == "busy-user" && w.usage == 1 && w.timestamp == 60));
        assert!(windows
            .iter()
            .any(|w| w.key == "idle-user" && w.usage == 0 && w.timestamp == 60));
    }

    #[test]
    fn merge_replaces_confirmed_rather_than_adding() {
        let mut store = store_with_policy(60, 5);
        let window = |usage| {
            vec![UsageWindow {
                key: "user-a".to_string(),
                timestamp: 120,
                usage,
            }]
        };

        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 5,
                windows: window(4),
            }],
        });
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 60,
                capacity: 5,
                windows: window(2),
            }],
        });

        assert_eq!(store.usage("login", "user-a", 2), 2);
    }

    #[test]
    fn merge_drops_invalid_policies() {
        let mut store = UsageStore::default();
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "broken".to_string(),
                window_secs: 0,
                capacity: 5,
                windows: Vec::new(),
            }],
        });

        // Still fail-open: no policy was installed.
        assert_eq!(store.decide("broken", "user-a", 10), Decision::AdmitOrphan);
    }

    #[test]
    fn merge_replaces_policy_as_a_pair() {
        let mut store = store_with_policy(60, 5);
        store.merge(ReconcileResponse {
            entities: vec![PolicyEntity {
                config_key: "login".to_string(),
                window_secs: 10,
                capacity: 2,
                windows: Vec::new(),
            }],
        });

        for _ in 0..3 {
            assert_eq!(store.decide("login", "user-a", 25), Decision::Admit);
        }
        assert_eq!(store.decide("login", "user-a", 25), Decision::Reject);
    }
}
