//! Keymart, a self-hosted storefront for digital access credentials.
//!
//! Sells access to recurring digital products (streaming/service logins).
//! Customers buy a priced product variation, pay through an external
//! provider, and automatically receive a previously stocked credential.
//! Each order is delivered at most once.
//!
//! ## Core
//! - Credential inventory with per-credential reuse capacity
//! - Live stock projection per variation (always derived, never stored)
//! - Atomic credential allocation: exactly one unit per paid order,
//!   safe under concurrent webhook delivery and admin edits
//! - Order lifecycle: `pending -> paid -> delivered` (or `cancelled`)

pub mod config;
pub mod domain;
pub mod engine;
pub mod import;
pub mod notify;
pub mod service;
pub mod stock;
pub mod store;

use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Out-of-stock is deliberately *not* here: payment already succeeded, so a
/// missing credential is a backlog signal, modeled as
/// [`engine::AllocationOutcome::NoCredentialAvailable`].
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input. Surfaced synchronously, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The operation would violate an invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("notification error: {0}")]
    Notify(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
