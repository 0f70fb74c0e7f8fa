//! Dedicated worker construction options.
//!
//! Marshalled to the host as the second `new Worker(url, options)`
//! argument. Fields left at their defaults are omitted, so empty options
//! become `{}`.
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::WorkerOptions;
//!
//! let options = WorkerOptions::new().with_name("indexer").with_module();
//! let json = options.to_json()?;
//! // {"name": "indexer", "type": "module"}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::host::{Host, HostValue};

// ============================================================================
// WorkerType
// ============================================================================

/// How the worker script is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    /// Plain script.
    #[default]
    Classic,
    /// ES module.
    Module,
}

impl WorkerType {
    #[inline]
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Credentials mode used when fetching a module worker's script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    /// Never send credentials.
    Omit,
    /// Send credentials to same-origin URLs only.
    #[default]
    SameOrigin,
    /// Always send credentials.
    Include,
}

impl Credentials {
    #[inline]
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// WorkerOptions
// ============================================================================

/// Options for a dedicated worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerOptions {
    /// Name reported by the worker's global scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Script kind.
    #[serde(rename = "type", skip_serializing_if = "WorkerType::is_default")]
    pub kind: WorkerType,

    /// Credentials mode for module scripts.
    #[serde(skip_serializing_if = "Credentials::is_default")]
    pub credentials: Credentials,
}

// ============================================================================
// Constructors
// ============================================================================

impl WorkerOptions {
    /// Creates options with every field at its default.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: None,
            kind: WorkerType::Classic,
            credentials: Credentials::SameOrigin,
        }
    }

    /// Creates options carrying only a name.
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WorkerOptions {
    /// Sets the worker name.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Loads the script as an ES module.
    #[inline]
    #[must_use]
    pub fn with_module(mut self) -> Self {
        self.kind = WorkerType::Module;
        self
    }

    /// Sets the credentials mode.
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl WorkerOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a credentials mode is set on a classic
    /// worker, where the host would ignore it.
    pub fn validate(&self) -> Result<()> {
        if self.kind == WorkerType::Classic && !self.credentials.is_default() {
            return Err(Error::config(
                "credentials only apply to module workers; add .with_module()",
            ));
        }
        Ok(())
    }

    /// Returns the options as plain data.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if validation fails
    /// - [`Error::Json`] if serialization fails
    pub fn to_json(&self) -> Result<Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }

    /// Builds the host options object.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if validation fails
    /// - [`Error::HostCall`] if the host cannot build the object
    pub fn to_host(&self, host: &Host) -> Result<HostValue> {
        let json = self.to_json()?;
        host.from_json(&json)
    }

    /// Returns the name, or `""` when unset.
    #[inline]
    #[must_use]
    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_new_creates_default() {
        let options = WorkerOptions::new();
        assert_eq!(options, WorkerOptions::default());
        assert!(options.name.is_none());
        assert_eq!(options.kind, WorkerType::Classic);
        assert_eq!(options.credentials, Credentials::SameOrigin);
    }

    #[test]
    fn test_empty_options_marshal_to_empty_object() {
        assert_eq!(WorkerOptions::new().to_json().expect("json"), json!({}));
    }

    #[test]
    fn test_name_marshals_alone() {
        let options = WorkerOptions::named("foo");
        assert_eq!(options.to_json().expect("json"), json!({"name": "foo"}));
    }

    #[test]
    fn test_builder_chain() {
        let options = WorkerOptions::new()
            .with_name("indexer")
            .with_module()
            .with_credentials(Credentials::Include);

        assert_eq!(
            options.to_json().expect("json"),
            json!({"name": "indexer", "type": "module", "credentials": "include"})
        );
    }

    #[test]
    fn test_credentials_names() {
        let omit = WorkerOptions::new()
            .with_module()
            .with_credentials(Credentials::Omit);
        assert_eq!(omit.to_json().expect("json")["credentials"], "omit");
    }

    #[test]
    fn test_validate_rejects_classic_credentials() {
        let options = WorkerOptions::new().with_credentials(Credentials::Omit);
        assert!(matches!(options.validate(), Err(Error::Config { .. })));
        assert!(options.to_json().is_err());
    }

    #[test]
    fn test_name_or_default() {
        assert_eq!(WorkerOptions::new().name_or_default(), "");
        assert_eq!(WorkerOptions::named("w").name_or_default(), "w");
    }
}
