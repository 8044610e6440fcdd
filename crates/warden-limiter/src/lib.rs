//! Client-side distributed admission control.
//!
//! This crate implements an approximate, cluster-wide rate limiter designed
//! to sit on a hot request path. Every admission decision is made locally
//! under one in-process lock, with no network round-trip; buffered usage is
//! shipped to a remote quota authority by a background reconciler, which
//! merges the authoritative cluster-wide view back into local state.
//!
//! # Design
//!
//! - [`RateLimiter::limit_rate`] runs the sliding-window-counter estimate
//!   atomically (read, decide, increment) and never blocks on I/O.
//! - Policies (window length + capacity) are pushed down from the authority;
//!   a call against an unknown config key is admitted fail-open and buffered
//!   as "orphan" usage until the policy arrives.
//! - The reconciler snapshots and clears buffered usage under the same lock
//!   acquisition, releases the lock for the RPC, then merges the response.
//!   An unreachable authority only delays convergence; callers never see it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_limiter::{HttpQuotaAuthority, RateLimiter};
//!
//! let authority = Arc::new(HttpQuotaAuthority::new("http://quota-0.quota:8443"));
//! let limiter = Arc::new(RateLimiter::builder(authority).build());
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let handle = limiter.spawn_reconciler(shutdown_rx);
//!
//! match limiter.limit_rate("login", "account-42") {
//!     Ok(()) => { /* handle the request */ }
//!     Err(rejected) => { /* respond 429 */ }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod authority;
mod clock;
mod limiter;
mod reconciler;
mod store;
mod throttle;

pub use authority::{HttpQuotaAuthority, QuotaAuthority};
pub use clock::{SystemClock, UnixClock};
pub use limiter::{CounterSnapshot, RateLimiter, RateLimiterBuilder};
pub use throttle::Throttler;

pub use warden_core::{
    AdmissionError, AuthorityError, Policy, PolicyEntity, ReconcileRequest, ReconcileResponse,
    UsageEntity, UsageWindow, WindowIndex,
};
