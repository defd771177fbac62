// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Mizzle SDK.
//!
//! The SDK raises errors only for integrator mistakes (referencing an
//! interaction that is no longer active, invalid configuration). Transient
//! infrastructure failures - send failures, plugin panics, oversized or
//! evicted events - are logged and swallowed so that telemetry never breaks
//! the host application's control flow.

use thiserror::Error;

/// Errors surfaced to SDK callers.
#[derive(Error, Debug)]
pub enum Error {
    /// The referenced interaction is unknown or already finished.
    ///
    /// Returned by [`crate::Mizzle::resume_interaction`]. This reflects a
    /// programming error by the integrator, not a transient condition.
    #[error("no active interaction with id: {0}")]
    UnknownInteraction(String),

    /// Invalid or missing configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;
