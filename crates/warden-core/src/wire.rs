//! Wire contract for the quota authority's reconcile RPC.
//!
//! JSON shapes exchanged with the authority. Requests carry the usage this
//! process buffered since the last cycle; responses carry the authoritative,
//! cluster-wide merged view plus the policy parameters themselves.

use serde::{Deserialize, Serialize};

/// One subject's usage observation.
///
/// `timestamp` is window-aligned (`window_index * window_secs`) when the
/// policy was known at record time, or a raw per-call timestamp for orphaned
/// usage recorded before the policy arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Subject key being limited (e.g. an account id or IP).
    pub key: String,

    /// Unix seconds.
    pub timestamp: i64,

    /// Admitted count attributed to this subject at this timestamp.
    pub usage: i64,
}

/// Usage reported for one config key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntity {
    pub config_key: String,

    #[serde(default)]
    pub windows: Vec<UsageWindow>,
}

/// Outgoing reconcile batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub entities: Vec<UsageEntity>,
}

impl ReconcileRequest {
    /// `true` when the batch carries nothing worth transmitting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Authoritative view of one config key: the policy plus the cluster-wide
/// merged usage windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntity {
    pub config_key: String,
    pub window_secs: i64,
    pub capacity: i64,

    #[serde(default)]
    pub windows: Vec<UsageWindow>,
}

/// Reconcile response: one entity per config key the client reported on or
/// previously knew about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    #[serde(default)]
    pub entities: Vec<PolicyEntity>,
}
