//! Dedicated worker handle.
//!
//! A dedicated worker is its own message endpoint: messages posted to the
//! handle reach the worker's global scope, and the scope's posts arrive
//! as `message` events on the handle.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::MessageEvent;
use crate::host::{Host, HostValue};
use crate::port::Endpoint;
use crate::stream::EventStream;

use super::builder::WorkerBuilder;
use super::options::WorkerOptions;
use super::script;

// ============================================================================
// Worker
// ============================================================================

/// Parent-side handle of a dedicated worker.
///
/// Dropping the handle does not stop the worker; call
/// [`terminate`](Self::terminate).
#[derive(Clone)]
pub struct Worker {
    url: String,
    name: Option<String>,
    endpoint: Endpoint,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker - Constructors
// ============================================================================

impl Worker {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder(host: Host) -> WorkerBuilder {
        WorkerBuilder::new(host)
    }

    /// Starts a worker running the script at `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is empty or `options` are invalid
    /// - [`Error::HostCall`] if the host cannot start the worker
    /// - [`Error::InvalidEndpoint`] if the created object cannot post messages
    pub fn new(host: Host, url: impl Into<String>, options: WorkerOptions) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::config("worker script URL must not be empty"));
        }

        let host_options = options.to_host(&host)?;
        let constructor = host.global("Worker")?;
        let handle = host.construct(&constructor, &[HostValue::from(url.as_str()), host_options])?;

        let endpoint = match Endpoint::wrap(host.clone(), handle.clone()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Err(terminate) = host.call(&handle, "terminate", &[]) {
                    warn!(url = %url, error = %terminate, "Failed to terminate unusable worker");
                }
                return Err(e);
            }
        };

        debug!(url = %url, name = options.name_or_default(), "Worker started");

        Ok(Self {
            url,
            name: options.name,
            endpoint,
        })
    }

    /// Starts a worker running inline `source` text.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), plus [`Error::HostCall`] if the script
    /// blob cannot be created.
    pub fn from_script(host: Host, source: &str, options: WorkerOptions) -> Result<Self> {
        let url = script::object_url(&host, source)?;
        Self::new(host, url, options)
    }
}

// ============================================================================
// Worker - Accessors
// ============================================================================

impl Worker {
    /// Returns the script URL the worker was started from.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the name given at construction, if any.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the underlying endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

// ============================================================================
// Worker - Messaging
// ============================================================================

impl Worker {
    /// Sends `data` to the worker. See [`Endpoint::post_message`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses the message.
    #[inline]
    pub fn post_message(&self, data: &HostValue, transfer: &[HostValue]) -> Result<()> {
        self.endpoint.post_message(data, transfer)
    }

    /// Serializes `value` and sends it to the worker.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::post_json`].
    #[inline]
    pub fn post_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.endpoint.post_json(value)
    }

    /// Streams messages from the worker until `cancel` completes.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::listen`].
    #[inline]
    pub fn listen<C>(&self, cancel: C) -> Result<EventStream<MessageEvent>>
    where
        C: Future<Output = ()> + Send + 'static,
    {
        self.endpoint.listen(cancel)
    }

    /// Stops the worker immediately.
    ///
    /// Streams from [`listen`](Self::listen) are not closed; cancel them
    /// to release their listeners.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    pub fn terminate(&self) -> Result<()> {
        self.endpoint
            .host()
            .call(self.endpoint.handle(), "terminate", &[])?;
        debug!(url = %self.url, "Worker terminated");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::pending;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    use crate::host::memory::MemoryHost;
    use crate::host::{HostBridge, HostCallback};
    use crate::scope::GlobalSelf;

    const WAIT: Duration = Duration::from_secs(1);

    /// Appends " pong!" to every string it receives and posts it back.
    fn register_pong(memory: &MemoryHost, source: &str) {
        memory.register_script(source, |host| async move {
            let Ok(GlobalSelf::Dedicated(scope)) = GlobalSelf::init(host) else {
                return;
            };
            let Ok(mut events) = scope.listen(pending()) else {
                return;
            };
            while let Some(event) = events.recv().await {
                if let Ok(text) = event.data_as::<String>() {
                    let _ = scope.post_json(&format!("{text} pong!"));
                }
            }
        });
    }

    async fn next_text(events: &mut EventStream<MessageEvent>) -> String {
        timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("stream open")
            .data_as::<String>()
            .expect("string payload")
    }

    #[tokio::test]
    async fn test_ping_listen_before_send() {
        let memory = MemoryHost::new();
        register_pong(&memory, "pong.js");
        let worker = Worker::new(memory.host(), "pong.js", WorkerOptions::new()).expect("worker");

        let mut events = worker.listen(pending()).expect("listen");
        worker.post_json("ping!").expect("post");

        assert_eq!(next_text(&mut events).await, "ping! pong!");
    }

    #[tokio::test]
    async fn test_ping_send_before_listen() {
        let memory = MemoryHost::new();
        register_pong(&memory, "pong.js");
        let worker = Worker::new(memory.host(), "pong.js", WorkerOptions::new()).expect("worker");

        worker.post_json("ping!").expect("post");
        let mut events = worker.listen(pending()).expect("listen");

        assert_eq!(next_text(&mut events).await, "ping! pong!");
    }

    #[tokio::test]
    async fn test_from_script() {
        let memory = MemoryHost::new();
        let source = "self.onmessage = e => self.postMessage(e.data + ' pong!')";
        register_pong(&memory, source);

        let worker = Worker::from_script(memory.host(), source, WorkerOptions::new())
            .expect("worker");
        assert!(worker.url().starts_with("blob:"));

        let mut events = worker.listen(pending()).expect("listen");
        worker.post_json("ping!").expect("post");
        assert_eq!(next_text(&mut events).await, "ping! pong!");
    }

    #[tokio::test]
    async fn test_terminate_stops_delivery() {
        let memory = MemoryHost::new();
        memory.register_script("delayed.js", |host| async move {
            let Ok(GlobalSelf::Dedicated(scope)) = GlobalSelf::init(host) else {
                return;
            };
            let _ = scope.post_json("start");
            sleep(Duration::from_millis(200)).await;
            let _ = scope.post_json("too late");
        });

        let worker =
            Worker::new(memory.host(), "delayed.js", WorkerOptions::new()).expect("worker");
        let mut events = worker.listen(pending()).expect("listen");
        assert_eq!(next_text(&mut events).await, "start");

        worker.terminate().expect("terminate");
        let late = timeout(Duration::from_millis(400), events.recv()).await;
        assert!(late.is_err(), "no message may arrive after terminate");
    }

    #[tokio::test]
    async fn test_stop_listening() {
        let memory = MemoryHost::new();
        register_pong(&memory, "pong.js");
        let worker = Worker::new(memory.host(), "pong.js", WorkerOptions::new()).expect("worker");

        let (stop, stopped) = oneshot::channel::<()>();
        let mut events = worker
            .listen(async move {
                let _ = stopped.await;
            })
            .expect("listen");

        stop.send(()).expect("cancel");
        assert!(timeout(WAIT, events.recv()).await.expect("closed").is_none());
        assert_eq!(memory.listener_count(worker.endpoint().handle(), "message"), 0);
    }

    #[tokio::test]
    async fn test_name_is_kept() {
        let memory = MemoryHost::new();
        register_pong(&memory, "pong.js");
        let worker =
            Worker::new(memory.host(), "pong.js", WorkerOptions::named("w1")).expect("worker");
        assert_eq!(worker.name(), Some("w1"));
        assert_eq!(worker.url(), "pong.js");
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let memory = MemoryHost::new();
        let err = Worker::new(memory.host(), "", WorkerOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    /// Hides `postMessage` on every object and refuses `terminate`.
    struct Mute {
        inner: MemoryHost,
        terminations: AtomicUsize,
    }

    impl HostBridge for Mute {
        fn global(&self, name: &str) -> Result<HostValue> {
            self.inner.global(name)
        }

        fn get(&self, target: &HostValue, property: &str) -> Result<HostValue> {
            if property == "postMessage" {
                return Ok(HostValue::Undefined);
            }
            self.inner.get(target, property)
        }

        fn call(&self, target: &HostValue, method: &str, args: &[HostValue]) -> Result<HostValue> {
            if method == "terminate" {
                self.terminations.fetch_add(1, Ordering::SeqCst);
                return Err(Error::host_call("call terminate", "refused"));
            }
            self.inner.call(target, method, args)
        }

        fn construct(&self, constructor: &HostValue, args: &[HostValue]) -> Result<HostValue> {
            self.inner.construct(constructor, args)
        }

        fn truthy(&self, value: &HostValue) -> Result<bool> {
            self.inner.truthy(value)
        }

        fn register_callback(&self, callback: HostCallback) -> Result<HostValue> {
            self.inner.register_callback(callback)
        }

        fn release_callback(&self, callback: &HostValue) -> Result<()> {
            self.inner.release_callback(callback)
        }

        fn from_json(&self, value: &Value) -> Result<HostValue> {
            self.inner.from_json(value)
        }

        fn to_json(&self, value: &HostValue) -> Result<Value> {
            self.inner.to_json(value)
        }
    }

    #[tokio::test]
    async fn test_unusable_worker_is_terminated() {
        let memory = MemoryHost::new();
        memory.register_script("idle.js", |_host| async {});
        let mute = Arc::new(Mute {
            inner: memory.clone(),
            terminations: AtomicUsize::new(0),
        });
        let host: Host = mute.clone();

        let err = Worker::new(host, "idle.js", WorkerOptions::new()).unwrap_err();
        assert!(err.is_endpoint_error());
        assert_eq!(mute.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_script_fails() {
        let memory = MemoryHost::new();
        let err = Worker::new(memory.host(), "nowhere.js", WorkerOptions::new()).unwrap_err();
        assert!(err.is_host_error());
    }
}
