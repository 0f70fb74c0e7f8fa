//! Message endpoints.
//!
//! An [`Endpoint`] wraps any host object that can `postMessage`: a
//! channel port, a dedicated worker, or a dedicated worker's own scope.
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::MessageChannel;
//!
//! let (local, remote) = MessageChannel::new(&host)?.into_ports();
//! let mut events = remote.listen(std::future::pending())?;
//!
//! local.post_json(&"hello")?;
//! let event = events.recv().await.expect("open stream");
//! assert_eq!(event.data_as::<String>()?, "hello");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{MessageEvent, decode_message};
use crate::host::{Host, HostValue};
use crate::stream::{self, EventStream};

// ============================================================================
// Constants
// ============================================================================

/// Events an endpoint stream listens for.
const MESSAGE_EVENTS: [&str; 2] = ["message", "messageerror"];

// ============================================================================
// Endpoint
// ============================================================================

/// Bidirectional message handle over a host object.
///
/// Whether the endpoint is open is tracked by the host, not here: after
/// [`close`](Self::close), sends fail at the host.
#[derive(Clone)]
pub struct Endpoint {
    host: Host,
    handle: HostValue,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

// ============================================================================
// Endpoint - Constructor
// ============================================================================

impl Endpoint {
    /// Wraps `handle` as an endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if `handle` has no callable `postMessage`
    /// - [`Error::HostCall`] if the capability check itself fails
    pub fn wrap(host: Host, handle: HostValue) -> Result<Self> {
        if !host.has_capability(&handle, "postMessage")? {
            return Err(Error::invalid_endpoint(format!(
                "{handle} has no postMessage"
            )));
        }
        Ok(Self { host, handle })
    }
}

// ============================================================================
// Endpoint - Messaging
// ============================================================================

impl Endpoint {
    /// Sends `data` to the remote side.
    ///
    /// Every item in `transfer` is moved to the receiver and becomes
    /// unusable here. An explicit `null` or `undefined` in `transfer` is
    /// rejected by the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses the message.
    pub fn post_message(&self, data: &HostValue, transfer: &[HostValue]) -> Result<()> {
        let mut args = Vec::with_capacity(2);
        args.push(data.clone());
        if !transfer.is_empty() {
            args.push(self.host.array_of(transfer)?);
        }
        self.host.call(&self.handle, "postMessage", &args)?;
        Ok(())
    }

    /// Serializes `value` to plain data and sends it.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if `value` cannot be serialized
    /// - [`Error::HostCall`] if the host refuses the message
    pub fn post_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let data = self.host.from_json(&json)?;
        self.post_message(&data, &[])
    }

    /// Streams `message` and `messageerror` events until `cancel` completes.
    ///
    /// Ports that queue deliveries are started once listeners are in place.
    ///
    /// # Errors
    ///
    /// - [`Error::Runtime`] if called outside a tokio runtime
    /// - [`Error::HostCall`] if registration fails
    pub fn listen<C>(&self, cancel: C) -> Result<EventStream<MessageEvent>>
    where
        C: Future<Output = ()> + Send + 'static,
    {
        stream::listen(&self.host, &self.handle, &MESSAGE_EVENTS, decode_message, cancel)
    }

    /// Disconnects the endpoint.
    ///
    /// Streams returned by [`listen`](Self::listen) stay open until their
    /// own cancellation signal fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    pub fn close(&self) -> Result<()> {
        self.host.call(&self.handle, "close", &[])?;
        debug!(handle = %self.handle, "Endpoint closed");
        Ok(())
    }
}

// ============================================================================
// Endpoint - Accessors
// ============================================================================

impl Endpoint {
    /// Returns the wrapped host handle, e.g. to list it in a transfer.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &HostValue {
        &self.handle
    }

    /// Returns the host this endpoint talks through.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &Host {
        &self.host
    }
}

// ============================================================================
// MessageChannel
// ============================================================================

/// A pair of entangled ports.
#[derive(Debug, Clone)]
pub struct MessageChannel {
    port1: Endpoint,
    port2: Endpoint,
}

impl MessageChannel {
    /// Creates a new channel.
    ///
    /// # Errors
    ///
    /// - [`Error::HostCall`] if the host cannot construct a channel
    /// - [`Error::InvalidEndpoint`] if either side cannot post messages
    pub fn new(host: &Host) -> Result<Self> {
        let constructor = host.global("MessageChannel")?;
        let channel = host.construct(&constructor, &[])?;
        let port1 = Endpoint::wrap(host.clone(), host.get(&channel, "port1")?)?;
        let port2 = Endpoint::wrap(host.clone(), host.get(&channel, "port2")?)?;
        Ok(Self { port1, port2 })
    }

    /// Returns the first port.
    #[inline]
    #[must_use]
    pub fn port1(&self) -> &Endpoint {
        &self.port1
    }

    /// Returns the second port.
    #[inline]
    #[must_use]
    pub fn port2(&self) -> &Endpoint {
        &self.port2
    }

    /// Splits the channel into its two ports.
    #[inline]
    #[must_use]
    pub fn into_ports(self) -> (Endpoint, Endpoint) {
        (self.port1, self.port2)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use crate::host::HostBridge;
    use crate::host::memory::MemoryHost;

    const WAIT: Duration = Duration::from_secs(1);

    fn pair(memory: &MemoryHost) -> (Endpoint, Endpoint) {
        MessageChannel::new(&memory.host())
            .expect("channel")
            .into_ports()
    }

    #[test]
    fn test_wrap_rejects_plain_object() {
        let memory = MemoryHost::new();
        let plain = memory.from_json(&json!({"name": "x"})).expect("plain");

        let err = Endpoint::wrap(memory.host(), plain).unwrap_err();
        assert!(err.is_endpoint_error());
    }

    #[test]
    fn test_wrap_rejects_primitive() {
        let memory = MemoryHost::new();
        let err = Endpoint::wrap(memory.host(), HostValue::from("port")).unwrap_err();
        assert!(err.is_endpoint_error());
    }

    #[tokio::test]
    async fn test_round_trip_with_json() {
        let memory = MemoryHost::new();
        let (local, remote) = pair(&memory);
        let mut events = remote.listen(std::future::pending()).expect("listen");

        local.post_json(&json!({"kind": "ping", "seq": 1})).expect("post");
        let event = timeout(WAIT, events.recv()).await.expect("event").expect("open");

        assert!(event.is_decoded());
        assert_eq!(event.target(), Some(&remote));
        assert!(event.ports().is_empty());
        assert_eq!(
            event.data_as::<serde_json::Value>().expect("json"),
            json!({"kind": "ping", "seq": 1})
        );
    }

    #[tokio::test]
    async fn test_integer_payload_reads_back_as_integer() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Counter {
            seq: u64,
            delta: i32,
        }

        let memory = MemoryHost::new();
        let (local, remote) = pair(&memory);
        let mut events = remote.listen(std::future::pending()).expect("listen");

        local.post_json(&7u32).expect("post number");
        local.post_json(&json!({"seq": 42, "delta": -3})).expect("post struct");

        let first = timeout(WAIT, events.recv()).await.expect("first").expect("open");
        let second = timeout(WAIT, events.recv()).await.expect("second").expect("open");
        let (number, counter) = match first.data_as::<u32>() {
            Ok(number) => (number, second.data_as::<Counter>().expect("counter")),
            Err(_) => (
                second.data_as::<u32>().expect("number"),
                first.data_as::<Counter>().expect("counter"),
            ),
        };
        assert_eq!(number, 7);
        assert_eq!(counter, Counter { seq: 42, delta: -3 });
    }

    #[tokio::test]
    async fn test_messageerror_reaches_stream() {
        let memory = MemoryHost::new();
        let (_local, remote) = pair(&memory);
        let mut events = remote.listen(std::future::pending()).expect("listen");

        let ports = memory.array_of(&[]).expect("ports");
        let raw = memory.object([
            ("target", remote.handle().clone()),
            ("data", HostValue::Null),
            ("ports", ports),
        ]);
        memory
            .dispatch_event(remote.handle(), "messageerror", raw)
            .expect("dispatch");

        let event = timeout(WAIT, events.recv()).await.expect("event").expect("open");
        assert!(event.is_decoded());
        assert_eq!(event.target(), Some(&remote));
        assert_eq!(event.data().expect("data"), &HostValue::Null);
    }

    #[tokio::test]
    async fn test_transfer_detaches_buffer() {
        let memory = MemoryHost::new();
        let (local, remote) = pair(&memory);
        let mut events = remote.listen(std::future::pending()).expect("listen");

        let buffer = memory.new_buffer(b"payload");
        local
            .post_message(&buffer, std::slice::from_ref(&buffer))
            .expect("post");
        assert!(memory.is_detached(&buffer));

        let event = timeout(WAIT, events.recv()).await.expect("event").expect("open");
        let data = event.data().expect("data");
        assert_eq!(memory.buffer_bytes(data), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_transferred_port_is_usable() {
        let memory = MemoryHost::new();
        let (local, remote) = pair(&memory);
        let (kept, moved) = pair(&memory);
        let mut events = remote.listen(std::future::pending()).expect("listen");

        local
            .post_message(&HostValue::from("here"), std::slice::from_ref(moved.handle()))
            .expect("post");
        let event = timeout(WAIT, events.recv()).await.expect("event").expect("open");
        let received = event.ports().first().expect("one port").clone();
        assert_eq!(&received, &moved);

        let mut replies = kept.listen(std::future::pending()).expect("listen");
        received.post_json("over the new channel").expect("post");
        let reply = timeout(WAIT, replies.recv()).await.expect("reply").expect("open");
        assert_eq!(reply.data_as::<String>().expect("text"), "over the new channel");
    }

    #[test]
    fn test_null_transfer_rejected() {
        let memory = MemoryHost::new();
        let (local, _remote) = pair(&memory);

        let err = local
            .post_message(&HostValue::from("x"), &[HostValue::Null])
            .unwrap_err();
        assert!(err.is_host_error());
    }

    #[tokio::test]
    async fn test_close_fails_later_sends_but_keeps_stream() {
        let memory = MemoryHost::new();
        let (local, remote) = pair(&memory);
        let (stop, stopped) = oneshot::channel::<()>();
        let mut events = remote
            .listen(async move {
                let _ = stopped.await;
            })
            .expect("listen");

        local.close().expect("close");
        assert!(local.post_json("late").unwrap_err().is_host_error());

        tokio::task::yield_now().await;
        assert!(events.try_recv().is_none());

        stop.send(()).expect("cancel");
        assert!(timeout(WAIT, events.recv()).await.expect("closed").is_none());
    }
}
