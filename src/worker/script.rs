//! Inline script materialization.
//!
//! Workers load from a URL, so inline source text is wrapped in a
//! `text/javascript` blob and handed out as an object URL. The URL is
//! never revoked: a shared worker instance is keyed by it, and a dedicated
//! worker may still be fetching it.

// ============================================================================
// Imports
// ============================================================================

use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::{Host, HostValue};

// ============================================================================
// Constants
// ============================================================================

/// MIME type given to inline script blobs.
const SCRIPT_MIME: &str = "text/javascript";

// ============================================================================
// Functions
// ============================================================================

/// Returns an object URL serving `source` as a script.
///
/// # Errors
///
/// Returns [`Error::HostCall`] if the blob or URL cannot be created.
pub(crate) fn object_url(host: &Host, source: &str) -> Result<String> {
    let parts = host.array_of(&[HostValue::from(source)])?;
    let options = host.from_json(&json!({ "type": SCRIPT_MIME }))?;
    let blob = host.construct(&host.global("Blob")?, &[parts, options])?;

    let url = host.call(&host.global("URL")?, "createObjectURL", &[blob])?;
    let url = url.as_str().map(str::to_string).ok_or_else(|| {
        Error::host_call(
            "call createObjectURL",
            format!("expected a string URL, got {url}"),
        )
    })?;

    debug!(url = %url, bytes = source.len(), "Inline script materialized");
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::host::memory::MemoryHost;

    #[test]
    fn test_object_url_is_blob_url() {
        let memory = MemoryHost::new();
        let url = object_url(&memory.host(), "self.close()").expect("url");
        assert!(url.starts_with("blob:http://localhost/"));
    }

    #[test]
    fn test_each_call_gets_a_fresh_url() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let a = object_url(&host, "x").expect("a");
        let b = object_url(&host, "x").expect("b");
        assert_ne!(a, b);
    }
}
