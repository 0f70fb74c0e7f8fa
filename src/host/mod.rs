//! Host boundary: opaque values and the bridge capability.
//!
//! Everything this crate does to a worker, port, or global scope goes
//! through a [`HostBridge`]. The bridge is the only component that knows
//! how the host represents objects; the rest of the crate sees
//! [`HostValue`] handles and named operations.
//!
//! # Capabilities
//!
//! | Capability | Method |
//! |------------|--------|
//! | Global lookup | [`HostBridge::global`] |
//! | Property read | [`HostBridge::get`] |
//! | Method call | [`HostBridge::call`] |
//! | Construction | [`HostBridge::construct`] |
//! | Truthiness | [`HostBridge::truthy`] |
//! | Callbacks | [`HostBridge::register_callback`], [`HostBridge::release_callback`] |
//! | Plain data | [`HostBridge::from_json`], [`HostBridge::to_json`] |
//!
//! The `memory` submodule provides a complete in-process host for tests
//! and benchmarks. It is compiled with the `memory-host` feature.

// ============================================================================
// Submodules
// ============================================================================

/// In-process host with Rust-scripted workers.
#[cfg(any(test, feature = "memory-host"))]
pub mod memory;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::ObjectId;

// ============================================================================
// Types
// ============================================================================

/// Shared handle to the current context's host bridge.
pub type Host = Arc<dyn HostBridge>;

/// Callback invoked by the host when a registered event fires.
///
/// The host calls it synchronously from its own dispatch loop, so it
/// must return promptly.
pub type HostCallback = Arc<dyn Fn(&[HostValue]) + Send + Sync>;

// ============================================================================
// HostValue
// ============================================================================

/// A value as seen through the host boundary.
///
/// Primitives are copied across; objects stay on the host side and are
/// referenced by [`ObjectId`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    /// The host's "no value" marker.
    #[default]
    Undefined,
    /// The host's explicit null.
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Numeric primitive.
    Number(f64),
    /// String primitive.
    String(Arc<str>),
    /// Reference to a host object.
    Object(ObjectId),
}

impl HostValue {
    /// Returns the string contents if this is a string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a number.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the object reference if this is an object.
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns `true` for `undefined` and `null`.
    #[inline]
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(id) => write!(f, "[object {id}]"),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ObjectId> for HostValue {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

// ============================================================================
// HostBridge
// ============================================================================

/// Safe call surface into the host.
///
/// Implementations must report every failure as [`Error::HostCall`]
/// rather than panicking. A bridge is bound to one execution context:
/// [`global("self")`](HostBridge::global) resolves to that context's
/// global scope.
pub trait HostBridge: Send + Sync + 'static {
    /// Looks up a global binding. Missing globals are `undefined`.
    fn global(&self, name: &str) -> Result<HostValue>;

    /// Reads a property. Missing properties are `undefined`.
    fn get(&self, target: &HostValue, property: &str) -> Result<HostValue>;

    /// Calls a method on `target`.
    fn call(&self, target: &HostValue, method: &str, args: &[HostValue]) -> Result<HostValue>;

    /// Invokes `constructor` with `new`.
    fn construct(&self, constructor: &HostValue, args: &[HostValue]) -> Result<HostValue>;

    /// Applies the host's truthiness rules.
    fn truthy(&self, value: &HostValue) -> Result<bool>;

    /// Exposes `callback` to the host as a function value.
    ///
    /// The host keeps the callback alive until
    /// [`release_callback`](HostBridge::release_callback) is called.
    fn register_callback(&self, callback: HostCallback) -> Result<HostValue>;

    /// Releases a function value returned by
    /// [`register_callback`](HostBridge::register_callback).
    fn release_callback(&self, callback: &HostValue) -> Result<()>;

    /// Builds a host value from plain data.
    fn from_json(&self, value: &Value) -> Result<HostValue>;

    /// Copies a host value out as plain data.
    fn to_json(&self, value: &HostValue) -> Result<Value>;

    // ========================================================================
    // Provided helpers
    // ========================================================================

    /// Reads the `length` of a list-like value.
    fn length(&self, list: &HostValue) -> Result<usize> {
        let len = self.get(list, "length")?;
        match len.as_f64() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
            _ => Err(Error::host_call(
                "get length",
                format!("not a valid length: {len}"),
            )),
        }
    }

    /// Reads element `index` of a list-like value.
    fn index(&self, list: &HostValue, index: usize) -> Result<HostValue> {
        self.get(list, &index.to_string())
    }

    /// Reads a property that must hold a string.
    fn get_string(&self, target: &HostValue, property: &str) -> Result<String> {
        match self.get(target, property)? {
            HostValue::String(s) => Ok(s.to_string()),
            other => Err(Error::decode(format!(
                "property `{property}` is not a string: {other}"
            ))),
        }
    }

    /// Returns `true` if `target.property` exists and is truthy.
    fn has_capability(&self, target: &HostValue, property: &str) -> Result<bool> {
        let value = self.get(target, property)?;
        self.truthy(&value)
    }

    /// Builds a host array holding `items`, via `Array.of`.
    fn array_of(&self, items: &[HostValue]) -> Result<HostValue> {
        let array = self.global("Array")?;
        self.call(&array, "of", items)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = HostValue::from("ping!");
        assert_eq!(s.as_str(), Some("ping!"));
        assert_eq!(s.as_f64(), None);

        let n = HostValue::from(2.0);
        assert_eq!(n.as_f64(), Some(2.0));

        let o = HostValue::from(ObjectId::new(7));
        assert_eq!(o.as_object(), Some(ObjectId::new(7)));
    }

    #[test]
    fn test_nullish() {
        assert!(HostValue::Undefined.is_nullish());
        assert!(HostValue::Null.is_nullish());
        assert!(!HostValue::Bool(false).is_nullish());
        assert_eq!(HostValue::default(), HostValue::Undefined);
    }

    #[test]
    fn test_display() {
        assert_eq!(HostValue::from("a").to_string(), "\"a\"");
        assert_eq!(HostValue::Object(ObjectId::new(3)).to_string(), "[object #3]");
        assert_eq!(HostValue::Null.to_string(), "null");
    }
}
