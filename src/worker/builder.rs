//! Builder pattern for dedicated workers.
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::Worker;
//!
//! let worker = Worker::builder(host)
//!     .name("indexer")
//!     .module()
//!     .spawn("indexer.js")?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::Result;
use crate::host::Host;

use super::core::Worker;
use super::options::{Credentials, WorkerOptions};

// ============================================================================
// WorkerBuilder
// ============================================================================

/// Builder for configuring a [`Worker`].
///
/// Use [`Worker::builder()`] to create a new builder.
#[derive(Clone)]
pub struct WorkerBuilder {
    host: Host,
    options: WorkerOptions,
}

impl fmt::Debug for WorkerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WorkerBuilder Implementation
// ============================================================================

impl WorkerBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new(host: Host) -> Self {
        Self {
            host,
            options: WorkerOptions::new(),
        }
    }

    /// Sets the worker name.
    #[inline]
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Loads the script as an ES module.
    #[inline]
    #[must_use]
    pub fn module(mut self) -> Self {
        self.options = self.options.with_module();
        self
    }

    /// Sets the credentials mode for a module script.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.options = self.options.with_credentials(credentials);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts the worker from a script URL.
    ///
    /// # Errors
    ///
    /// See [`Worker::new`].
    pub fn spawn(self, url: impl Into<String>) -> Result<Worker> {
        Worker::new(self.host, url, self.options)
    }

    /// Starts the worker from inline script text.
    ///
    /// # Errors
    ///
    /// See [`Worker::from_script`].
    pub fn spawn_script(self, source: &str) -> Result<Worker> {
        Worker::from_script(self.host, source, self.options)
    }
}

// ============================================================================
// Tests
// ============================================================================
