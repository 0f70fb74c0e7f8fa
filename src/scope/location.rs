//! Worker location.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::host::{Host, HostValue};

// ============================================================================
// WorkerLocation
// ============================================================================

/// URL components of a worker's script, as reported by the host.
///
/// Every field is copied verbatim; nothing is parsed or normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerLocation {
    /// Fragment including the leading `#`, or empty.
    pub hash: String,
    /// Host name and port.
    pub host: String,
    /// Host name.
    pub hostname: String,
    /// The full URL.
    pub href: String,
    /// Scheme, host, and port.
    pub origin: String,
    /// Path.
    pub pathname: String,
    /// Port, or empty.
    pub port: String,
    /// Scheme including the trailing `:`.
    pub protocol: String,
    /// Query including the leading `?`, or empty.
    pub search: String,
}

impl WorkerLocation {
    /// Reads every field from a host location object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`](crate::Error::Decode) if a field is not a
    /// string, or [`Error::HostCall`](crate::Error::HostCall) if a read fails.
    pub(crate) fn read(host: &Host, location: &HostValue) -> Result<Self> {
        let field = |name: &str| host.get_string(location, name);
        Ok(Self {
            hash: field("hash")?,
            host: field("host")?,
            hostname: field("hostname")?,
            href: field("href")?,
            origin: field("origin")?,
            pathname: field("pathname")?,
            port: field("port")?,
            protocol: field("protocol")?,
            search: field("search")?,
        })
    }
}

impl fmt::Display for WorkerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::host::HostBridge;
    use crate::host::memory::MemoryHost;

    #[test]
    fn test_read_copies_verbatim() {
        let memory = MemoryHost::new();
        // Deliberately inconsistent values: nothing may be recomputed.
        let raw = memory
            .from_json(&json!({
                "hash": "#A", "host": "EXAMPLE.com:80", "hostname": "EXAMPLE.com",
                "href": "weird href", "origin": "o", "pathname": "/p//q",
                "port": "80", "protocol": "http:", "search": "?x=1"
            }))
            .expect("raw");

        let location = WorkerLocation::read(&memory.host(), &raw).expect("location");
        assert_eq!(location.host, "EXAMPLE.com:80");
        assert_eq!(location.pathname, "/p//q");
        assert_eq!(location.port, "80");
        assert_eq!(location.to_string(), "weird href");
    }

    #[test]
    fn test_read_rejects_missing_field() {
        let memory = MemoryHost::new();
        let raw = memory.from_json(&json!({"href": "x"})).expect("raw");

        let err = WorkerLocation::read(&memory.host(), &raw).unwrap_err();
        assert!(err.is_decode_error());
    }
}
