//! In-process host with Rust-scripted workers.
//!
//! [`MemoryHost`] implements [`HostBridge`] entirely in memory. It is the
//! host the crate's tests and benchmarks run against, and a reference for
//! what a real bridge must provide.
//!
//! # Model
//!
//! | Concept | Behavior |
//! |---------|----------|
//! | Contexts | The creating handle is the main context; each worker gets its own |
//! | Scripts | Registered by source key; object URLs resolve to their blob text |
//! | Delivery | Listeners run after the host lock is released |
//! | Ports | Queue messages until `start()` |
//! | Workers and scopes | Queue events until the first listener is added |
//! | `postMessage` | Structured clone with transfer; buffers detach on success |
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::host::memory::MemoryHost;
//!
//! let host = MemoryHost::new();
//! host.register_script("echo.js", |scope| async move {
//!     // drive the worker through `GlobalSelf::init(scope)`
//! });
//! let worker = Worker::new(host.host(), "echo.js", WorkerOptions::default())?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod object;
mod state;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::host::{Host, HostBridge, HostCallback, HostValue};
use crate::identifiers::ContextId;

use self::object::Native;
use self::state::{Dispatch, State};

// ============================================================================
// Constants
// ============================================================================

/// Origin used by [`MemoryHost::new`].
pub const DEFAULT_ORIGIN: &str = "http://localhost/";

// ============================================================================
// Types
// ============================================================================

/// Body of a worker: receives the worker context's host and runs until done.
pub type WorkerScript = Arc<dyn Fn(Host) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared {
    state: Mutex<State>,
    scripts: RwLock<FxHashMap<String, WorkerScript>>,
}

// ============================================================================
// MemoryHost
// ============================================================================

/// In-memory [`HostBridge`] bound to one execution context.
///
/// Clones share the same host; each worker script receives a bridge bound
/// to its own context.
///
/// Host objects are never reclaimed, so memory grows with every delivered
/// message. Use it for tests and benchmarks, not long-running processes.
#[derive(Clone)]
pub struct MemoryHost {
    shared: Arc<Shared>,
    context: ContextId,
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryHost - Constructors
// ============================================================================

impl MemoryHost {
    /// Creates a host whose worker locations resolve against
    /// [`DEFAULT_ORIGIN`].
    #[must_use]
    pub fn new() -> Self {
        Self::from_state(State::new(DEFAULT_ORIGIN))
    }

    /// Creates a host with a custom origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `origin` is not an absolute URL.
    pub fn with_origin(origin: &str) -> Result<Self> {
        let url = Url::parse(origin)
            .map_err(|e| Error::config(format!("invalid origin `{origin}`: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::config(format!("origin `{origin}` cannot be a base")));
        }
        Ok(Self::from_state(State::new(url.as_str())))
    }

    fn from_state(state: State) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                scripts: RwLock::new(FxHashMap::default()),
            }),
            context: ContextId::main(),
        }
    }

    /// Returns this handle as a shared [`Host`].
    #[must_use]
    pub fn host(&self) -> Host {
        Arc::new(self.clone())
    }

    /// Returns the context this handle is bound to.
    #[inline]
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

// ============================================================================
// MemoryHost - Scripts
// ============================================================================

impl MemoryHost {
    /// Registers the body run by workers created from `source`.
    ///
    /// `source` is matched against the worker URL, or against the text
    /// of the blob an object URL points at.
    pub fn register_script<F, Fut>(&self, source: impl Into<String>, script: F)
    where
        F: Fn(Host) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let script: WorkerScript = Arc::new(move |host| script(host).boxed());
        self.shared.scripts.write().insert(source.into(), script);
    }

    fn resolve_script(&self, url: &str) -> Result<WorkerScript> {
        let key = self.shared.state.lock().script_key(url);
        self.shared
            .scripts
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                Error::host_call("construct", format!("NetworkError: failed to load `{url}`"))
            })
    }

    fn spawn(&self, runtime: &Handle, context: ContextId, script: &WorkerScript) {
        let host: Host = Arc::new(Self {
            shared: Arc::clone(&self.shared),
            context,
        });
        let task = runtime.spawn(script(host));
        self.shared.state.lock().set_task(context, task.abort_handle());
        debug!(%context, "Worker script started");
    }

    fn construct_worker(&self, native: Native, args: &[HostValue]) -> Result<HostValue> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::host_call("construct", format!("no event loop: {e}")))?;
        let url = args
            .first()
            .and_then(HostValue::as_str)
            .ok_or_else(|| Error::host_call("construct", "TypeError: script URL must be a string"))?;
        let name = self.construct_name(args.get(1))?;
        let script = self.resolve_script(url)?;

        let mut out = Dispatch::new();
        let (handle, spawn) = {
            let mut state = self.shared.state.lock();
            match native {
                Native::SharedWorker => state.attach_shared_worker(self.context, url, &name, &mut out),
                _ => {
                    let (handle, context) = state.create_worker(self.context, url, &name);
                    (handle, Some(context))
                }
            }
        };
        if let Some(context) = spawn {
            self.spawn(&runtime, context, &script);
        }
        Self::run(out);
        Ok(handle)
    }

    /// Reads the worker name from a name string or `{ name }` options.
    fn construct_name(&self, arg: Option<&HostValue>) -> Result<String> {
        match arg {
            None | Some(HostValue::Undefined) => Ok(String::new()),
            Some(HostValue::String(name)) => Ok(name.to_string()),
            Some(options @ HostValue::Object(_)) => match self.get(options, "name")? {
                HostValue::Undefined => Ok(String::new()),
                name => Ok(name.as_str().map_or_else(|| name.to_string(), str::to_string)),
            },
            Some(other) => Ok(other.to_string()),
        }
    }

    fn run(out: Dispatch) {
        for (callback, event) in out {
            callback(std::slice::from_ref(&event));
        }
    }
}

// ============================================================================
// MemoryHost - Inspection
// ============================================================================

impl MemoryHost {
    /// Fires `event` on `target` with an arbitrary event object.
    ///
    /// Useful for delivering malformed events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if `target` is not an event target.
    pub fn dispatch_event(&self, target: &HostValue, event: &str, value: HostValue) -> Result<()> {
        let mut out = Dispatch::new();
        let result = self.shared.state.lock().dispatch_raw(target, event, value, &mut out);
        Self::run(out);
        result
    }

    /// Number of listeners currently registered for `event` on `target`.
    #[must_use]
    pub fn listener_count(&self, target: &HostValue, event: &str) -> usize {
        self.shared.state.lock().listener_count(target, event)
    }

    /// Number of registered, unreleased callbacks.
    #[must_use]
    pub fn live_callbacks(&self) -> usize {
        self.shared.state.lock().live_callbacks()
    }

    /// Number of running contexts, the main one included.
    #[must_use]
    pub fn live_contexts(&self) -> usize {
        self.shared.state.lock().live_contexts()
    }

    /// Allocates a plain object; fields may hold handles.
    pub fn object<'a>(&self, fields: impl IntoIterator<Item = (&'a str, HostValue)>) -> HostValue {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        self.shared.state.lock().new_object(fields)
    }

    /// Allocates a transferable byte buffer.
    #[must_use]
    pub fn new_buffer(&self, bytes: &[u8]) -> HostValue {
        self.shared.state.lock().new_buffer(bytes)
    }

    /// Returns the contents of a buffer, or `None` if `value` is not one.
    #[must_use]
    pub fn buffer_bytes(&self, value: &HostValue) -> Option<Vec<u8>> {
        self.shared.state.lock().buffer(value).map(|b| b.bytes.clone())
    }

    /// Returns `true` if `value` is a buffer that was transferred away.
    #[must_use]
    pub fn is_detached(&self, value: &HostValue) -> bool {
        self.shared
            .state
            .lock()
            .buffer(value)
            .is_some_and(|b| b.detached)
    }
}

// ============================================================================
// HostBridge Implementation
// ============================================================================

impl HostBridge for MemoryHost {
    fn global(&self, name: &str) -> Result<HostValue> {
        Ok(self.shared.state.lock().global(self.context, name))
    }

    fn get(&self, target: &HostValue, property: &str) -> Result<HostValue> {
        self.shared.state.lock().get(target, property)
    }

    fn call(&self, target: &HostValue, method: &str, args: &[HostValue]) -> Result<HostValue> {
        let mut out = Dispatch::new();
        let result = self.shared.state.lock().call(target, method, args, &mut out);
        Self::run(out);
        result
    }

    fn construct(&self, constructor: &HostValue, args: &[HostValue]) -> Result<HostValue> {
        let native = self.shared.state.lock().native_of(constructor);
        match native {
            Some(native @ (Native::Worker | Native::SharedWorker)) => {
                self.construct_worker(native, args)
            }
            other => self.shared.state.lock().construct(self.context, other, args),
        }
    }

    fn truthy(&self, value: &HostValue) -> Result<bool> {
        Ok(object::truthy(value))
    }

    fn register_callback(&self, callback: HostCallback) -> Result<HostValue> {
        Ok(self.shared.state.lock().register_callback(callback))
    }

    fn release_callback(&self, callback: &HostValue) -> Result<()> {
        self.shared.state.lock().release_callback(callback)
    }

    fn from_json(&self, value: &Value) -> Result<HostValue> {
        Ok(self.shared.state.lock().from_json(value))
    }

    fn to_json(&self, value: &HostValue) -> Result<Value> {
        self.shared.state.lock().to_json(value)
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
    use tokio::sync::mpsc;

    fn recorder(host: &MemoryHost) -> (HostValue, mpsc::UnboundedReceiver<HostValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: HostCallback = Arc::new(move |args: &[HostValue]| {
            let _ = tx.send(args.first().cloned().unwrap_or_default());
        });
        let value = host.register_callback(callback).expect("register");
        (value, rx)
    }

    fn channel(host: &MemoryHost) -> (HostValue, HostValue) {
        let ctor = host.global("MessageChannel").expect("global");
        let pair = host.construct(&ctor, &[]).expect("construct");
        (
            host.get(&pair, "port1").expect("port1"),
            host.get(&pair, "port2").expect("port2"),
        )
    }

    #[test]
    fn test_json_conversion_preserves_structure() {
        let host = MemoryHost::new();
        let value = json!({"kind": "ping", "items": [1, 2.5, "two", null, true]});
        let handle = host.from_json(&value).expect("from_json");

        assert_eq!(host.get_string(&handle, "kind").expect("kind"), "ping");
        let items = host.get(&handle, "items").expect("items");
        assert_eq!(host.length(&items).expect("length"), 5);
        assert_eq!(host.to_json(&handle).expect("to_json"), value);
    }

    #[test]
    fn test_whole_numbers_convert_to_integers() {
        let host = MemoryHost::new();
        let json = |n: f64| host.to_json(&HostValue::Number(n)).expect("to_json");

        assert_eq!(json(7.0), json!(7));
        assert!(json(7.0).is_u64());
        assert_eq!(json(-3.0), json!(-3));
        assert_eq!(json(0.5), json!(0.5));
        assert_eq!(json(1e300), json!(1e300));
        assert_eq!(json(f64::NAN), Value::Null);
        assert_eq!(json(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_read_from_undefined_fails() {
        let host = MemoryHost::new();
        let err = host.get(&HostValue::Undefined, "data").unwrap_err();
        assert!(err.is_host_error());
        assert!(err.to_string().contains("TypeError"));
    }

    #[test]
    fn test_globals() {
        let host = MemoryHost::new();
        assert!(host.global("self").expect("self").as_object().is_some());
        assert!(host.global("Worker").expect("Worker").as_object().is_some());
        assert_eq!(host.global("Nope").expect("nope"), HostValue::Undefined);

        let scope = host.global("self").expect("self");
        assert!(!host.has_capability(&scope, "postMessage").expect("capability"));
        assert!(!host.has_capability(&scope, "SharedWorkerGlobalScope").expect("capability"));
    }

    #[test]
    fn test_port_queues_until_started() {
        let host = MemoryHost::new();
        let (port1, port2) = channel(&host);
        let (listener, mut rx) = recorder(&host);

        host.call(&port2, "addEventListener", &["message".into(), listener])
            .expect("listen");
        host.call(&port1, "postMessage", &["hello".into()]).expect("post");
        assert!(rx.try_recv().is_err());

        host.call(&port2, "start", &[]).expect("start");
        let event = rx.try_recv().expect("delivered after start");
        assert_eq!(host.get_string(&event, "data").expect("data"), "hello");
    }

    #[test]
    fn test_transfer_detaches_buffer() {
        let host = MemoryHost::new();
        let (port1, port2) = channel(&host);
        let (listener, mut rx) = recorder(&host);
        host.call(&port2, "addEventListener", &["message".into(), listener])
            .expect("listen");
        host.call(&port2, "start", &[]).expect("start");

        let buffer = host.new_buffer(&[1, 2, 3]);
        let transfer = host.array_of(std::slice::from_ref(&buffer)).expect("array");
        host.call(&port1, "postMessage", &[buffer.clone(), transfer])
            .expect("post");

        assert!(host.is_detached(&buffer));
        assert_eq!(host.buffer_bytes(&buffer), Some(Vec::new()));
        let event = rx.try_recv().expect("event");
        let data = host.get(&event, "data").expect("data");
        assert_eq!(host.buffer_bytes(&data), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_failed_clone_changes_nothing() {
        let host = MemoryHost::new();
        let (port1, _port2) = channel(&host);
        let buffer = host.new_buffer(&[9]);
        let (callback, _rx) = recorder(&host);

        // Functions cannot be cloned, so the buffer must stay attached.
        let payload = host.array_of(&[buffer.clone(), callback]).expect("payload");
        let transfer = host.array_of(std::slice::from_ref(&buffer)).expect("transfer");
        let err = host
            .call(&port1, "postMessage", &[payload, transfer])
            .unwrap_err();

        assert!(err.to_string().contains("DataCloneError"));
        assert!(!host.is_detached(&buffer));
    }

    #[test]
    fn test_null_in_transfer_list_is_rejected() {
        let host = MemoryHost::new();
        let (port1, _port2) = channel(&host);
        let transfer = host.array_of(&[HostValue::Null]).expect("transfer");
        let err = host
            .call(&port1, "postMessage", &["x".into(), transfer])
            .unwrap_err();
        assert!(err.to_string().contains("DataCloneError"));
    }

    #[test]
    fn test_post_after_close_fails() {
        let host = MemoryHost::new();
        let (port1, port2) = channel(&host);
        host.call(&port1, "close", &[]).expect("close");

        assert!(host.call(&port1, "postMessage", &["x".into()]).is_err());
        // The other side is disentangled and posts go nowhere.
        assert!(host.call(&port2, "postMessage", &["x".into()]).is_ok());
    }

    #[test]
    fn test_release_callback() {
        let host = MemoryHost::new();
        let (callback, _rx) = recorder(&host);
        assert_eq!(host.live_callbacks(), 1);
        host.release_callback(&callback).expect("release");
        assert_eq!(host.live_callbacks(), 0);
        assert!(host.release_callback(&callback).is_err());
    }

    #[test]
    fn test_worker_construction_needs_runtime() {
        let host = MemoryHost::new();
        host.register_script("idle.js", |_scope| async {});
        let ctor = host.global("Worker").expect("Worker");
        let err = host.construct(&ctor, &["idle.js".into()]).unwrap_err();
        assert!(err.is_host_error());
        assert_eq!(host.live_contexts(), 1);
    }

    #[tokio::test]
    async fn test_unknown_script_fails_to_load() {
        let host = MemoryHost::new();
        let ctor = host.global("Worker").expect("Worker");
        let err = host.construct(&ctor, &["missing.js".into()]).unwrap_err();
        assert!(err.to_string().contains("NetworkError"));
    }

    #[tokio::test]
    async fn test_blob_url_resolves_to_script() {
        let host = MemoryHost::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        host.register_script("self.postMessage('up')", move |_scope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });

        let blob_ctor = host.global("Blob").expect("Blob");
        let parts = host.array_of(&["self.postMessage('up')".into()]).expect("parts");
        let blob = host.construct(&blob_ctor, &[parts]).expect("blob");
        let url_ns = host.global("URL").expect("URL");
        let url = host.call(&url_ns, "createObjectURL", &[blob]).expect("url");
        assert!(url.as_str().is_some_and(|u| u.starts_with("blob:http://localhost/")));

        let ctor = host.global("Worker").expect("Worker");
        host.construct(&ctor, &[url]).expect("worker");
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("script ran")
            .expect("signal");
    }

    #[tokio::test]
    async fn test_shared_instance_is_reused() {
        let host = MemoryHost::new();
        host.register_script("shared.js", |_scope| std::future::pending());
        let ctor = host.global("SharedWorker").expect("SharedWorker");

        host.construct(&ctor, &["shared.js".into(), "a".into()]).expect("first");
        host.construct(&ctor, &["shared.js".into(), "a".into()]).expect("second");
        assert_eq!(host.live_contexts(), 2);

        host.construct(&ctor, &["shared.js".into(), "b".into()]).expect("third");
        assert_eq!(host.live_contexts(), 3);
    }

    #[tokio::test]
    async fn test_worker_location() {
        let host = MemoryHost::with_origin("https://example.com/app/").expect("origin");
        let (tx, mut rx) = mpsc::unbounded_channel();
        host.register_script("worker.js", move |scope| {
            let tx = tx.clone();
            async move {
                let global = scope.global("self").expect("self");
                let location = scope.get(&global, "location").expect("location");
                let _ = tx.send(scope.to_json(&location).expect("json"));
            }
        });

        let ctor = host.global("Worker").expect("Worker");
        host.construct(&ctor, &["worker.js?v=2#top".into()]).expect("worker");
        let location = rx.recv().await.expect("location");

        assert_eq!(location["href"], "https://example.com/app/worker.js?v=2#top");
        assert_eq!(location["pathname"], "/app/worker.js");
        assert_eq!(location["search"], "?v=2");
        assert_eq!(location["hash"], "#top");
        assert_eq!(location["origin"], "https://example.com");
        assert_eq!(location["protocol"], "https:");
        assert_eq!(location["port"], "");
    }

    #[test]
    fn test_invalid_origin() {
        assert!(matches!(
            MemoryHost::with_origin("not a url"),
            Err(Error::Config { .. })
        ));
    }
}
