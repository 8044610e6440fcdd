//! Error taxonomy for the admission path and the authority client.

use thiserror::Error;

/// Outcome of a failed admission decision.
///
/// `TooManyRequests` is the normal, expected rejection outcome, not a system
/// fault. Remote-call failures never appear here: the admission path does no
/// I/O and the reconciler contains authority errors entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The sliding-window estimate exceeded the policy's capacity.
    #[error("too many requests for `{config_key}` / `{subject_key}`")]
    TooManyRequests {
        config_key: String,
        subject_key: String,
    },

    /// The decision closure panicked. The store lock was released and the
    /// panic is surfaced to the immediate caller instead of crashing the
    /// process.
    #[error("admission decision panicked: {message}")]
    DecisionPanicked { message: String },
}

/// Failures talking to the quota authority. Contained inside the reconciler;
/// resolved by retrying on the next cycle.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Connection, DNS, or request transport failure.
    #[error("authority transport failure: {0}")]
    Transport(String),

    /// The authority answered with a non-success HTTP status.
    #[error("authority returned HTTP {status}")]
    Status { status: u16 },

    /// The response body could not be decoded.
    #[error("failed to decode reconcile response: {0}")]
    Decode(String),

    /// The reconcile call outlived its deadline.
    #[error("reconcile deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },
}
