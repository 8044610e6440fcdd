//! Core types for the warden admission control client.
//!
//! This crate defines the canonical, transport-agnostic types shared between
//! the limiter and the quota authority client: admission policies and window
//! math, the reconcile wire contract, and the error taxonomy. Enforcement
//! lives in `warden-limiter`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod policy;
mod wire;

pub use error::{AdmissionError, AuthorityError};
pub use policy::{Policy, WindowIndex};
pub use wire::{PolicyEntity, ReconcileRequest, ReconcileResponse, UsageEntity, UsageWindow};
