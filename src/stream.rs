//! Event-to-stream bridge.
//!
//! [`listen`] turns named host events on one source object into an
//! [`EventStream`] that ordinary async code can pull from.
//!
//! # Lifecycle
//!
//! | Phase | What happens |
//! |-------|--------------|
//! | Registration | One callback per event name, then `start()` if the source has one |
//! | Firing | The callback spawns a dispatch task and returns to the host immediately |
//! | Dispatch | The task decodes the raw event and pushes it onto the stream |
//! | Cancellation | Listeners are removed, callbacks released, then the stream closes |
//!
//! A failure at any registration step rolls back what was already wired
//! and returns the error.
//!
//! # Ordering
//!
//! Each firing gets its own task. Events that fire close together may
//! reach the stream in a different order than they fired.
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::stream::listen;
//!
//! let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
//! let mut events = listen(
//!     &host,
//!     &port,
//!     &["message"],
//!     |host, raw| host.get_string(raw, "data"),
//!     async move { let _ = stopped.await; },
//! )?;
//!
//! while let Some(data) = events.recv().await {
//!     println!("{data:?}");
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::host::{Host, HostCallback, HostValue};
use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Sending half of a stream, emptied exactly once at teardown.
type Slot<T> = Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>;

// ============================================================================
// EventStream
// ============================================================================

/// Pull side of one subscription.
///
/// Yields decoded events until the subscription's cancellation signal
/// fires and every event dispatched before it has been drained.
pub struct EventStream<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription has been torn down.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Returns the subscription ID, as it appears in log fields.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Listeners registered by one [`listen`] call.
struct Subscription {
    id: SubscriptionId,
    host: Host,
    source: HostValue,
    /// `(event name, callback handle)` in registration order.
    listeners: Vec<(String, HostValue)>,
}

impl Subscription {
    /// Removes every listener and releases its callback.
    ///
    /// A callback whose listener could not be removed may still fire, so
    /// it is leaked instead of released.
    fn detach(&mut self) {
        for (event, callback) in std::mem::take(&mut self.listeners) {
            let args = [HostValue::from(event.as_str()), callback.clone()];
            if let Err(e) = self.host.call(&self.source, "removeEventListener", &args) {
                warn!(
                    subscription = %self.id,
                    event = %event,
                    error = %e,
                    "Failed to remove listener, leaking its callback"
                );
                continue;
            }
            if let Err(e) = self.host.release_callback(&callback) {
                warn!(
                    subscription = %self.id,
                    event = %event,
                    error = %e,
                    "Failed to release callback"
                );
            }
        }
    }
}

// ============================================================================
// listen
// ============================================================================

/// Bridges `events` fired on `source` into an [`EventStream`].
///
/// `decode` runs on a dispatch task, once per firing, and turns the raw
/// host event into a `T`. Decode failures belong inside `T`; they never
/// end the stream.
///
/// The stream ends only when `cancel` completes. Teardown removes every
/// listener and releases every callback before the stream is closed.
///
/// # Errors
///
/// - [`Error::Runtime`] if called outside a tokio runtime
/// - [`Error::HostCall`] if registering a listener or calling `start()`
///   fails; listeners registered so far are removed first
pub fn listen<T, D, C>(
    host: &Host,
    source: &HostValue,
    events: &[&str],
    decode: D,
    cancel: C,
) -> Result<EventStream<T>>
where
    T: Send + 'static,
    D: Fn(&Host, &HostValue) -> T + Send + Sync + 'static,
    C: Future<Output = ()> + Send + 'static,
{
    let runtime = Handle::try_current()
        .map_err(|e| Error::runtime(format!("listen requires a tokio runtime: {e}")))?;

    let id = SubscriptionId::next();
    let (tx, rx) = mpsc::unbounded_channel();
    let slot: Slot<T> = Arc::new(Mutex::new(Some(tx)));
    let decode = Arc::new(decode);

    let mut subscription = Subscription {
        id,
        host: Arc::clone(host),
        source: source.clone(),
        listeners: Vec::with_capacity(events.len()),
    };

    for &event in events {
        let callback = dispatcher(id, event, host, &runtime, &slot, &decode);
        let handle = match host.register_callback(callback) {
            Ok(handle) => handle,
            Err(e) => {
                subscription.detach();
                return Err(e);
            }
        };

        let args = [HostValue::from(event), handle.clone()];
        if let Err(e) = host.call(source, "addEventListener", &args) {
            if let Err(release) = host.release_callback(&handle) {
                warn!(subscription = %id, event, error = %release, "Failed to release callback");
            }
            subscription.detach();
            return Err(e);
        }
        subscription.listeners.push((event.to_string(), handle));
    }

    if let Err(e) = start(host, source) {
        subscription.detach();
        return Err(e);
    }

    debug!(subscription = %id, events = ?events, "Subscription registered");

    runtime.spawn(async move {
        cancel.await;
        subscription.detach();
        slot.lock().take();
        debug!(subscription = %subscription.id, "Subscription torn down");
    });

    Ok(EventStream { id, rx })
}

/// Calls `start()` on sources that hold deliveries until started.
fn start(host: &Host, source: &HostValue) -> Result<()> {
    if host.has_capability(source, "start")? {
        host.call(source, "start", &[])?;
    }
    Ok(())
}

/// Builds the host callback for one event name.
///
/// The callback only spawns; decoding and pushing happen on the task.
fn dispatcher<T, D>(
    id: SubscriptionId,
    event: &str,
    host: &Host,
    runtime: &Handle,
    slot: &Slot<T>,
    decode: &Arc<D>,
) -> HostCallback
where
    T: Send + 'static,
    D: Fn(&Host, &HostValue) -> T + Send + Sync + 'static,
{
    let event: Arc<str> = Arc::from(event);
    let host = Arc::clone(host);
    let runtime = runtime.clone();
    let slot = Arc::clone(slot);
    let decode = Arc::clone(decode);

    Arc::new(move |args: &[HostValue]| {
        let raw = args.first().cloned().unwrap_or_default();
        let event = Arc::clone(&event);
        let host = Arc::clone(&host);
        let slot = Arc::clone(&slot);
        let decode = Arc::clone(&decode);

        runtime.spawn(async move {
            let value = decode(&host, &raw);
            if let Some(tx) = slot.lock().as_ref()
                && tx.send(value).is_ok()
            {
                trace!(subscription = %id, event = %event, "Event dispatched");
            }
        });
    })
}

// ============================================================================
// Tests
// ============================================================================
