//! Error types for the worker bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use worker_bridge::{Result, Worker};
//!
//! async fn example(worker: &Worker) -> Result<()> {
//!     worker.post_json(&"ping!")?;
//!     worker.terminate()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Host | [`Error::HostCall`], [`Error::InvalidEndpoint`] |
//! | Events | [`Error::Decode`] |
//! | Setup | [`Error::Runtime`], [`Error::Config`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Host Errors
    // ========================================================================
    /// A get/call/construct against the host failed.
    ///
    /// Returned by every [`HostBridge`](crate::host::HostBridge) operation
    /// that the host rejects.
    #[error("Host call failed: {operation}: {message}")]
    HostCall {
        /// The operation that failed (e.g. `call postMessage`).
        operation: String,
        /// Host-provided failure description.
        message: String,
    },

    /// A handle presented for wrapping lacks a required capability.
    ///
    /// Returned when a port has no callable `postMessage`, or a
    /// global scope exposes neither message nor connect capability.
    #[error("Invalid endpoint: {message}")]
    InvalidEndpoint {
        /// Description of the missing capability.
        message: String,
    },

    // ========================================================================
    // Event Errors
    // ========================================================================
    /// An event's expected fields are missing or malformed.
    ///
    /// Attached to the individual event value, never used to
    /// terminate a stream.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// No async runtime is available to schedule dispatch tasks.
    #[error("Runtime error: {message}")]
    Runtime {
        /// Description of the runtime failure.
        message: String,
    },

    /// Configuration error.
    ///
    /// Returned when worker options or construction arguments are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a host call error.
    #[inline]
    pub fn host_call(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostCall {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a runtime error.
    #[inline]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the host rejected an operation.
    #[inline]
    #[must_use]
    pub fn is_host_error(&self) -> bool {
        matches!(self, Self::HostCall { .. })
    }

    /// Returns `true` if this is a per-event decode error.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if a handle could not be used as an endpoint.
    #[inline]
    #[must_use]
    pub fn is_endpoint_error(&self) -> bool {
        matches!(self, Self::InvalidEndpoint { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
