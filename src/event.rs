//! Decoded event payloads.
//!
//! Decoding never fails outright. An event whose fields are missing or
//! malformed is still delivered, carrying its decode error, so one bad
//! occurrence never ends a stream.
//!
//! | Type | Fired as | Fields |
//! |------|----------|--------|
//! | [`MessageEvent`] | `message`, `messageerror` | data, target, ports |
//! | [`ConnectEvent`] | `connect` | ports |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::host::{Host, HostValue};
use crate::port::Endpoint;

// ============================================================================
// MessageEvent
// ============================================================================

/// One `message` or `messageerror` occurrence.
#[derive(Clone)]
pub struct MessageEvent {
    host: Host,
    data: HostValue,
    target: Option<Endpoint>,
    ports: Vec<Endpoint>,
    error: Option<String>,
}

impl MessageEvent {
    /// Returns the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the event could not be decoded.
    pub fn data(&self) -> Result<&HostValue> {
        match &self.error {
            Some(message) => Err(Error::decode(message.clone())),
            None => Ok(&self.data),
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] if the event could not be decoded
    /// - [`Error::HostCall`] if the payload is not plain data
    /// - [`Error::Json`] if the payload does not match `T`
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let json = self.host.to_json(self.data()?)?;
        Ok(serde_json::from_value(json)?)
    }

    /// Returns the endpoint the event was delivered to.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&Endpoint> {
        self.target.as_ref()
    }

    /// Returns ports transferred with the message.
    #[inline]
    #[must_use]
    pub fn ports(&self) -> &[Endpoint] {
        &self.ports
    }

    /// Returns the decode error, if decoding failed.
    #[must_use]
    pub fn decode_error(&self) -> Option<Error> {
        self.error.clone().map(Error::decode)
    }

    /// Returns `true` if the event decoded cleanly.
    #[inline]
    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("data", &self.data)
            .field("target", &self.target)
            .field("ports", &self.ports.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectEvent
// ============================================================================

/// One `connect` occurrence on a shared worker's global scope.
///
/// By convention the first port is the new client's channel.
#[derive(Debug, Clone)]
pub struct ConnectEvent {
    ports: Vec<Endpoint>,
    error: Option<String>,
}

impl ConnectEvent {
    /// Returns the attached ports.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the event could not be decoded.
    pub fn ports(&self) -> Result<&[Endpoint]> {
        match &self.error {
            Some(message) => Err(Error::decode(message.clone())),
            None => Ok(&self.ports),
        }
    }

    /// Returns the new client's port, the first attached one.
    #[must_use]
    pub fn client(&self) -> Option<&Endpoint> {
        self.ports.first()
    }

    /// Returns the decode error, if decoding failed.
    #[must_use]
    pub fn decode_error(&self) -> Option<Error> {
        self.error.clone().map(Error::decode)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a raw `message` / `messageerror` event.
///
/// Reads `target`, then `data`, then `ports`, stopping at the first failure.
pub(crate) fn decode_message(host: &Host, raw: &HostValue) -> MessageEvent {
    let mut event = MessageEvent {
        host: host.clone(),
        data: HostValue::Undefined,
        target: None,
        ports: Vec::new(),
        error: None,
    };

    let decoded = (|| -> Result<()> {
        let target = host.get(raw, "target")?;
        event.target = Some(Endpoint::wrap(host.clone(), target)?);
        event.data = host.get(raw, "data")?;
        event.ports = decode_ports(host, raw)?;
        Ok(())
    })();

    if let Err(e) = decoded {
        event.error = Some(describe(&e));
    }
    event
}

/// Decodes a raw `connect` event.
pub(crate) fn decode_connect(host: &Host, raw: &HostValue) -> ConnectEvent {
    match decode_ports(host, raw) {
        Ok(ports) => ConnectEvent { ports, error: None },
        Err(e) => ConnectEvent {
            ports: Vec::new(),
            error: Some(describe(&e)),
        },
    }
}

/// Wraps every entry of `raw.ports` as an endpoint.
fn decode_ports(host: &Host, raw: &HostValue) -> Result<Vec<Endpoint>> {
    let list = host.get(raw, "ports")?;
    let len = host.length(&list)?;
    (0..len)
        .map(|i| Endpoint::wrap(host.clone(), host.index(&list, i)?))
        .collect()
}

/// Message stored on an event; decode errors keep their bare message.
fn describe(error: &Error) -> String {
    match error {
        Error::Decode { message } => message.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    use crate::host::HostBridge;
    use crate::host::memory::MemoryHost;

    fn port(host: &MemoryHost) -> HostValue {
        let ctor = host.global("MessageChannel").expect("global");
        let pair = host.construct(&ctor, &[]).expect("construct");
        host.get(&pair, "port1").expect("port1")
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        text: String,
        count: u32,
    }

    #[test]
    fn test_malformed_message_carries_error() {
        let memory = MemoryHost::new();
        let host = memory.host();

        let decoded = decode_message(&host, &HostValue::Null);
        assert!(!decoded.is_decoded());
        assert!(decoded.data().unwrap_err().is_decode_error());
        assert!(decoded.decode_error().is_some());
        assert!(decoded.ports().is_empty());
    }

    #[test]
    fn test_message_target_must_be_endpoint() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let raw = memory
            .from_json(&json!({"target": {}, "data": "x", "ports": []}))
            .expect("raw");

        let decoded = decode_message(&host, &raw);
        let err = decoded.data().unwrap_err();
        assert!(err.to_string().contains("postMessage"));
    }

    #[test]
    fn test_connect_with_zero_ports() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let raw = memory.from_json(&json!({"ports": []})).expect("raw");

        let decoded = decode_connect(&host, &raw);
        assert!(decoded.decode_error().is_none());
        assert!(decoded.ports().expect("ports").is_empty());
        assert!(decoded.client().is_none());
    }

    #[test]
    fn test_connect_without_ports_list() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let raw = memory.from_json(&json!({})).expect("raw");

        // `ports` reads as undefined, which has no length.
        let decoded = decode_connect(&host, &raw);
        assert!(decoded.ports().is_err());
        assert!(decoded.decode_error().is_some());
    }

    #[test]
    fn test_connect_wraps_ports() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let client = port(&memory);
        let ports = memory.array_of(std::slice::from_ref(&client)).expect("ports");
        let raw = memory.object([("ports", ports)]);

        let decoded = decode_connect(&host, &raw);
        assert_eq!(decoded.ports().expect("ports").len(), 1);
        assert_eq!(decoded.client().map(Endpoint::handle), Some(&client));
    }

    #[test]
    fn test_data_as_deserializes() {
        let memory = MemoryHost::new();
        let host = memory.host();
        let target = port(&memory);
        let data = memory
            .from_json(&json!({"text": "hi", "count": 2}))
            .expect("data");
        let ports = memory.array_of(&[]).expect("ports");
        let raw = memory.object([("target", target), ("data", data), ("ports", ports)]);

        let decoded = decode_message(&host, &raw);
        assert!(decoded.is_decoded());
        assert_eq!(
            decoded.data_as::<Greeting>().expect("greeting"),
            Greeting {
                text: "hi".into(),
                count: 2
            }
        );
        assert!(decoded.data_as::<u32>().unwrap_err().to_string().contains("JSON"));
    }
}
