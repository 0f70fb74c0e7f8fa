//! Object table, contexts, and event delivery of the in-memory host.
//!
//! All mutation happens under one lock held by
//! [`MemoryHost`](super::MemoryHost). Operations that fire events collect
//! `(callback, event)` pairs into a [`Dispatch`] list; the caller invokes
//! them after releasing the lock, the way a host runs listeners from its
//! event loop rather than from inside `postMessage`.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Number, Value};
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::host::{HostCallback, HostValue};
use crate::identifiers::{ContextId, ObjectId};

use super::object::{Buffer, Native, Object, Target, TargetKind};

// ============================================================================
// Constants
// ============================================================================

/// Maximum nesting depth accepted by [`State::to_json`].
const MAX_JSON_DEPTH: usize = 64;

/// Fields of a worker location object.
const LOCATION_FIELDS: [&str; 9] = [
    "hash", "host", "hostname", "href", "origin", "pathname", "port", "protocol", "search",
];

// ============================================================================
// Types
// ============================================================================

/// Listener invocations produced while the state lock was held.
pub(super) type Dispatch = Vec<(HostCallback, HostValue)>;

/// One execution context.
#[derive(Debug)]
pub(super) struct Context {
    /// The context's global scope object.
    pub scope: ObjectId,
    /// Task running the context's script, if any.
    pub task: Option<AbortHandle>,
    /// Set by `close()` / `terminate()`.
    pub closed: bool,
}

// ============================================================================
// Error Helpers
// ============================================================================

fn type_error(operation: impl Into<String>, message: impl std::fmt::Display) -> Error {
    Error::host_call(operation, format!("TypeError: {message}"))
}

fn data_clone_error(message: impl std::fmt::Display) -> Error {
    Error::host_call("call postMessage", format!("DataCloneError: {message}"))
}

// ============================================================================
// Number Conversion
// ============================================================================

/// Whole numbers convert to JSON integers; everything else stays a float.
///
/// `NaN` and infinities have no JSON form and become `null`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 {
        if n >= i64::MIN as f64 && n < i64::MAX as f64 {
            return Value::from(n as i64);
        }
        if n >= 0.0 && n < u64::MAX as f64 {
            return Value::from(n as u64);
        }
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

// ============================================================================
// State
// ============================================================================

/// Everything the in-memory host knows.
pub(super) struct State {
    objects: FxHashMap<ObjectId, Object>,
    natives: FxHashMap<Native, ObjectId>,
    contexts: FxHashMap<ContextId, Context>,
    /// Running shared instances keyed by `(url, name)`.
    shared: FxHashMap<(String, String), ContextId>,
    /// Object URL to blob text.
    blobs: FxHashMap<String, String>,
    next_object: u64,
    next_context: u64,
    origin: String,
}

// ============================================================================
// State - Constructor
// ============================================================================

impl State {
    /// Creates a host with built-ins and a main context.
    pub(super) fn new(origin: impl Into<String>) -> Self {
        let mut state = Self {
            objects: FxHashMap::default(),
            natives: FxHashMap::default(),
            contexts: FxHashMap::default(),
            shared: FxHashMap::default(),
            blobs: FxHashMap::default(),
            next_object: 1,
            next_context: 1,
            origin: origin.into(),
        };

        for native in Native::ALL {
            let id = state.alloc(Object::Native(native));
            state.natives.insert(native, id);
        }

        let main = ContextId::main();
        let window = Target::new(TargetKind::Window, main).with_prop("name", "".into());
        let scope = state.alloc(Object::Target(window));
        state.contexts.insert(
            main,
            Context {
                scope,
                task: None,
                closed: false,
            },
        );

        state
    }
}

// ============================================================================
// State - Object Table
// ============================================================================

impl State {
    fn reserve(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_object);
        self.next_object += 1;
        id
    }

    pub(super) fn alloc(&mut self, object: Object) -> ObjectId {
        let id = self.reserve();
        self.objects.insert(id, object);
        id
    }

    fn object(&self, id: ObjectId) -> Result<&Object> {
        self.objects
            .get(&id)
            .ok_or_else(|| Error::host_call("resolve", format!("dangling object reference {id}")))
    }

    fn target(&self, id: ObjectId) -> Result<&Target> {
        match self.object(id)? {
            Object::Target(target) => Ok(target),
            other => Err(type_error(
                "resolve",
                format!("{} is not an event target", other.type_name()),
            )),
        }
    }

    fn target_mut(&mut self, id: ObjectId) -> Result<&mut Target> {
        match self.objects.get_mut(&id) {
            Some(Object::Target(target)) => Ok(target),
            Some(other) => Err(type_error(
                "resolve",
                format!("{} is not an event target", other.type_name()),
            )),
            None => Err(Error::host_call(
                "resolve",
                format!("dangling object reference {id}"),
            )),
        }
    }

    fn native_id(&self, native: Native) -> HostValue {
        self.natives
            .get(&native)
            .map_or(HostValue::Undefined, |id| HostValue::Object(*id))
    }

    /// Returns which built-in `value` is, if any.
    pub(super) fn native_of(&self, value: &HostValue) -> Option<Native> {
        match value.as_object().and_then(|id| self.objects.get(&id)) {
            Some(Object::Native(native)) => Some(*native),
            _ => None,
        }
    }

    fn plain(&mut self, fields: impl IntoIterator<Item = (&'static str, HostValue)>) -> HostValue {
        let map = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        HostValue::Object(self.alloc(Object::Plain(map)))
    }
}

// ============================================================================
// State - Contexts
// ============================================================================

impl State {
    fn next_context_id(&mut self) -> ContextId {
        let id = ContextId::new(self.next_context);
        self.next_context += 1;
        id
    }

    pub(super) fn context_alive(&self, context: ContextId) -> bool {
        self.contexts.get(&context).is_some_and(|c| !c.closed)
    }

    /// Number of contexts that are still running, the main one included.
    pub(super) fn live_contexts(&self) -> usize {
        self.contexts.values().filter(|c| !c.closed).count()
    }

    /// Records the task running `context`'s script.
    pub(super) fn set_task(&mut self, context: ContextId, task: AbortHandle) {
        match self.contexts.get_mut(&context) {
            Some(ctx) if !ctx.closed => ctx.task = Some(task),
            _ => task.abort(),
        }
    }

    /// Stops a context: aborts its script and drops its pending deliveries.
    pub(super) fn close_context(&mut self, context: ContextId) {
        let Some(ctx) = self.contexts.get_mut(&context) else {
            return;
        };
        if ctx.closed {
            return;
        }
        ctx.closed = true;
        if let Some(task) = ctx.task.take() {
            task.abort();
        }

        for object in self.objects.values_mut() {
            if let Object::Target(target) = object
                && target.owner == context
            {
                target.queue.clear();
            }
        }

        debug!(%context, "Context closed");
    }

    /// Builds a location object for a script URL resolved against the origin.
    fn location(&mut self, url: &str) -> HostValue {
        let parsed = Url::parse(&self.origin).and_then(|base| base.join(url));
        let fields: Vec<(&'static str, HostValue)> = match parsed {
            Ok(url) => {
                let hostname = url.host_str().unwrap_or_default().to_string();
                let port = url.port().map(|p| p.to_string()).unwrap_or_default();
                let host = if port.is_empty() {
                    hostname.clone()
                } else {
                    format!("{hostname}:{port}")
                };
                let hash = url
                    .fragment()
                    .filter(|f| !f.is_empty())
                    .map(|f| format!("#{f}"))
                    .unwrap_or_default();
                let search = url
                    .query()
                    .filter(|q| !q.is_empty())
                    .map(|q| format!("?{q}"))
                    .unwrap_or_default();
                vec![
                    ("hash", hash.into()),
                    ("host", host.into()),
                    ("hostname", hostname.into()),
                    ("href", url.as_str().into()),
                    ("origin", url.origin().ascii_serialization().into()),
                    ("pathname", url.path().into()),
                    ("port", port.into()),
                    ("protocol", format!("{}:", url.scheme()).into()),
                    ("search", search.into()),
                ]
            }
            Err(_) => LOCATION_FIELDS
                .iter()
                .map(|field| {
                    let value = if *field == "href" { url } else { "" };
                    (*field, HostValue::from(value))
                })
                .collect(),
        };
        self.plain(fields)
    }
}

// ============================================================================
// State - Reads
// ============================================================================

impl State {
    pub(super) fn global(&self, context: ContextId, name: &str) -> HostValue {
        if name == "self" {
            return self
                .contexts
                .get(&context)
                .map_or(HostValue::Undefined, |c| HostValue::Object(c.scope));
        }
        Native::ALL
            .iter()
            .find(|native| native.global_name() == Some(name))
            .map_or(HostValue::Undefined, |native| self.native_id(*native))
    }

    pub(super) fn get(&self, target: &HostValue, property: &str) -> Result<HostValue> {
        let id = match target {
            HostValue::Undefined | HostValue::Null => {
                return Err(type_error(
                    format!("get {property}"),
                    format!("cannot read properties of {target} (reading '{property}')"),
                ));
            }
            HostValue::String(s) if property == "length" => {
                return Ok(HostValue::Number(s.encode_utf16().count() as f64));
            }
            HostValue::Object(id) => *id,
            _ => return Ok(HostValue::Undefined),
        };

        let value = match self.object(id)? {
            Object::Plain(map) => map.get(property).cloned().unwrap_or_default(),
            Object::Array(items) => {
                if property == "length" {
                    HostValue::Number(items.len() as f64)
                } else {
                    property
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| items.get(index))
                        .cloned()
                        .unwrap_or_default()
                }
            }
            Object::Buffer(buffer) if property == "byteLength" => {
                HostValue::Number(buffer.bytes.len() as f64)
            }
            Object::Blob(text) if property == "size" => HostValue::Number(text.len() as f64),
            Object::Native(native) if native.methods().contains(&property) => {
                self.native_id(Native::Method)
            }
            Object::Target(target) if target.kind.methods().contains(&property) => {
                self.native_id(Native::Method)
            }
            Object::Target(target) => target.props.get(property).cloned().unwrap_or_default(),
            _ => HostValue::Undefined,
        };
        Ok(value)
    }
}

// ============================================================================
// State - Callbacks
// ============================================================================

impl State {
    pub(super) fn register_callback(&mut self, callback: HostCallback) -> HostValue {
        HostValue::Object(self.alloc(Object::Function(callback)))
    }

    pub(super) fn release_callback(&mut self, callback: &HostValue) -> Result<()> {
        let id = callback
            .as_object()
            .ok_or_else(|| type_error("release callback", format!("{callback} is not a function")))?;
        match self.objects.get(&id) {
            Some(Object::Function(_)) => {
                self.objects.remove(&id);
                Ok(())
            }
            _ => Err(type_error(
                "release callback",
                format!("{callback} is not a registered callback"),
            )),
        }
    }

    /// Number of callbacks registered and not yet released.
    pub(super) fn live_callbacks(&self) -> usize {
        self.objects
            .values()
            .filter(|object| matches!(object, Object::Function(_)))
            .count()
    }
}

// ============================================================================
// State - Plain Data
// ============================================================================

impl State {
    pub(super) fn from_json(&mut self, value: &Value) -> HostValue {
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => HostValue::from(s.as_str()),
            Value::Array(items) => {
                let items = items.iter().map(|item| self.from_json(item)).collect();
                HostValue::Object(self.alloc(Object::Array(items)))
            }
            Value::Object(map) => {
                let fields = map
                    .iter()
                    .map(|(key, value)| (key.clone(), self.from_json(value)))
                    .collect();
                HostValue::Object(self.alloc(Object::Plain(fields)))
            }
        }
    }

    pub(super) fn to_json(&self, value: &HostValue) -> Result<Value> {
        self.to_json_at(value, 0)
    }

    fn to_json_at(&self, value: &HostValue, depth: usize) -> Result<Value> {
        if depth > MAX_JSON_DEPTH {
            return Err(type_error("to json", "value is too deeply nested or cyclic"));
        }
        let id = match value {
            HostValue::Undefined | HostValue::Null => return Ok(Value::Null),
            HostValue::Bool(b) => return Ok(Value::Bool(*b)),
            HostValue::Number(n) => return Ok(number_to_json(*n)),
            HostValue::String(s) => return Ok(Value::String(s.to_string())),
            HostValue::Object(id) => *id,
        };
        match self.object(id)? {
            Object::Plain(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    map.insert(key.clone(), self.to_json_at(field, depth + 1)?);
                }
                Ok(Value::Object(map))
            }
            Object::Array(items) => items
                .iter()
                .map(|item| self.to_json_at(item, depth + 1))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Object::Buffer(buffer) => Ok(Value::Array(
                buffer.bytes.iter().map(|b| Value::from(*b)).collect(),
            )),
            Object::Blob(text) => Ok(Value::String(text.clone())),
            other => Err(type_error(
                "to json",
                format!("{} cannot be converted to plain data", other.type_name()),
            )),
        }
    }

    pub(super) fn new_object(&mut self, fields: FxHashMap<String, HostValue>) -> HostValue {
        HostValue::Object(self.alloc(Object::Plain(fields)))
    }

    pub(super) fn new_buffer(&mut self, bytes: &[u8]) -> HostValue {
        HostValue::Object(self.alloc(Object::Buffer(Buffer {
            bytes: bytes.to_vec(),
            detached: false,
        })))
    }

    pub(super) fn buffer(&self, value: &HostValue) -> Option<&Buffer> {
        match value.as_object().and_then(|id| self.objects.get(&id)) {
            Some(Object::Buffer(buffer)) => Some(buffer),
            _ => None,
        }
    }
}

// ============================================================================
// State - Built-ins
// ============================================================================

impl State {
    /// Constructs a `Blob` or `MessageChannel`.
    pub(super) fn construct(
        &mut self,
        context: ContextId,
        native: Option<Native>,
        args: &[HostValue],
    ) -> Result<HostValue> {
        match native {
            Some(Native::Blob) => self.new_blob(args),
            Some(Native::MessageChannel) => {
                let (port1, port2) = self.entangled_ports(context, context);
                Ok(self.plain([
                    ("port1", HostValue::Object(port1)),
                    ("port2", HostValue::Object(port2)),
                ]))
            }
            _ => Err(type_error("construct", "value is not a constructor")),
        }
    }

    fn new_blob(&mut self, args: &[HostValue]) -> Result<HostValue> {
        let parts = match args.first().and_then(HostValue::as_object).map(|id| self.object(id)) {
            Some(Ok(Object::Array(parts))) => parts.clone(),
            _ => return Err(type_error("construct Blob", "blob parts must be an array")),
        };
        let mut text = String::new();
        for part in parts {
            match &part {
                HostValue::String(s) => text.push_str(s),
                HostValue::Object(id) => match self.object(*id)? {
                    Object::Blob(inner) => text.push_str(inner),
                    other => text.push_str(&format!("[object {}]", other.type_name())),
                },
                other => text.push_str(&other.to_string()),
            }
        }
        Ok(HostValue::Object(self.alloc(Object::Blob(text))))
    }

    fn create_object_url(&mut self, args: &[HostValue]) -> Result<HostValue> {
        let text = match args.first().and_then(HostValue::as_object).map(|id| self.object(id)) {
            Some(Ok(Object::Blob(text))) => text.clone(),
            _ => {
                return Err(type_error(
                    "call createObjectURL",
                    "argument is not a Blob",
                ));
            }
        };
        let origin = self.origin.trim_end_matches('/');
        let url = format!("blob:{origin}/{}", Uuid::new_v4());
        self.blobs.insert(url.clone(), text);
        Ok(HostValue::from(url))
    }

    /// Maps a script URL to the key scripts are registered under.
    ///
    /// Object URLs resolve to their blob's text; anything else is its own key.
    /// Query and fragment are not part of the key.
    pub(super) fn script_key(&self, url: &str) -> String {
        if let Some(source) = self.blobs.get(url) {
            return source.clone();
        }
        url.split(['?', '#']).next().unwrap_or(url).to_string()
    }

    fn entangled_ports(&mut self, owner_a: ContextId, owner_b: ContextId) -> (ObjectId, ObjectId) {
        let a = self.reserve();
        let b = self.reserve();
        self.objects.insert(
            a,
            Object::Target(Target::new(TargetKind::Port { peer: Some(b) }, owner_a)),
        );
        self.objects.insert(
            b,
            Object::Target(Target::new(TargetKind::Port { peer: Some(a) }, owner_b)),
        );
        (a, b)
    }
}

// ============================================================================
// State - Workers
// ============================================================================

impl State {
    /// Creates a dedicated worker; the caller spawns its script.
    pub(super) fn create_worker(
        &mut self,
        caller: ContextId,
        url: &str,
        name: &str,
    ) -> (HostValue, ContextId) {
        let context = self.next_context_id();
        let location = self.location(url);
        let scope = self.reserve();
        let worker = self.reserve();

        let scope_target = Target::new(TargetKind::DedicatedScope { worker }, context)
            .with_prop("name", name.into())
            .with_prop("location", location);
        self.objects.insert(scope, Object::Target(scope_target));
        self.objects.insert(
            worker,
            Object::Target(Target::new(TargetKind::Worker { scope, context }, caller)),
        );
        self.contexts.insert(
            context,
            Context {
                scope,
                task: None,
                closed: false,
            },
        );

        debug!(%context, url, name, "Dedicated worker created");
        (HostValue::Object(worker), context)
    }

    /// Attaches a client to the shared instance for `(url, name)`.
    ///
    /// Returns the client handle and, when a new instance had to be
    /// created, the context whose script the caller must spawn.
    pub(super) fn attach_shared_worker(
        &mut self,
        caller: ContextId,
        url: &str,
        name: &str,
        out: &mut Dispatch,
    ) -> (HostValue, Option<ContextId>) {
        let key = (url.to_string(), name.to_string());
        let running = self
            .shared
            .get(&key)
            .copied()
            .filter(|context| self.context_alive(*context));

        let (context, spawn) = match running {
            Some(context) => (context, None),
            None => {
                let context = self.next_context_id();
                let location = self.location(url);
                let marker = self.native_id(Native::SharedWorkerGlobalScope);
                let scope = Target::new(TargetKind::SharedScope, context)
                    .with_prop("name", name.into())
                    .with_prop("location", location)
                    .with_prop("SharedWorkerGlobalScope", marker)
                    .with_prop("onconnect", HostValue::Null);
                let scope = self.alloc(Object::Target(scope));
                self.contexts.insert(
                    context,
                    Context {
                        scope,
                        task: None,
                        closed: false,
                    },
                );
                self.shared.insert(key, context);
                debug!(%context, url, name, "Shared worker instance created");
                (context, Some(context))
            }
        };

        let scope = self.contexts.get(&context).map(|c| c.scope);
        let (client_port, worker_port) = self.entangled_ports(caller, context);
        let handle = Target::new(TargetKind::SharedWorker, caller)
            .with_prop("port", HostValue::Object(client_port));
        let handle = self.alloc(Object::Target(handle));

        if let Some(scope) = scope {
            let event = self.event("connect", "".into(), scope, vec![HostValue::Object(worker_port)]);
            self.enqueue(scope, "connect", event, out);
        }

        (HostValue::Object(handle), spawn)
    }
}

// ============================================================================
// State - Methods
// ============================================================================

impl State {
    /// Calls a method on a built-in or event target.
    pub(super) fn call(
        &mut self,
        target: &HostValue,
        method: &str,
        args: &[HostValue],
        out: &mut Dispatch,
    ) -> Result<HostValue> {
        let operation = format!("call {method}");
        let id = target.as_object().ok_or_else(|| {
            type_error(&operation, format!("{target}.{method} is not a function"))
        })?;

        if let Object::Native(native) = self.object(id)? {
            let native = *native;
            return match (native, method) {
                (Native::Array, "of") => {
                    Ok(HostValue::Object(self.alloc(Object::Array(args.to_vec()))))
                }
                (Native::Url, "createObjectURL") => self.create_object_url(args),
                (Native::Url, "revokeObjectURL") => {
                    if let Some(url) = args.first().and_then(HostValue::as_str) {
                        self.blobs.remove(url);
                    }
                    Ok(HostValue::Undefined)
                }
                _ => Err(type_error(&operation, format!("{method} is not a function"))),
            };
        }

        let kind = self.target(id)?.kind;
        if !kind.methods().contains(&method) {
            return Err(type_error(
                &operation,
                format!("{}.{method} is not a function", kind.class_name()),
            ));
        }

        match method {
            "addEventListener" => self.add_listener(id, args, out)?,
            "removeEventListener" => self.remove_listener(id, args)?,
            "postMessage" => self.post_message(id, args, out)?,
            "start" => self.start(id, out)?,
            "close" => self.close(id)?,
            "terminate" => {
                if let TargetKind::Worker { context, .. } = kind {
                    self.close_context(context);
                }
            }
            _ => {}
        }
        Ok(HostValue::Undefined)
    }

    fn listener_args(&self, method: &str, args: &[HostValue]) -> Result<(String, ObjectId)> {
        let operation = format!("call {method}");
        let event = args
            .first()
            .and_then(HostValue::as_str)
            .ok_or_else(|| type_error(&operation, "event type must be a string"))?;
        let callback = args
            .get(1)
            .and_then(HostValue::as_object)
            .filter(|id| matches!(self.objects.get(id), Some(Object::Function(_))))
            .ok_or_else(|| type_error(&operation, "listener is not a function"))?;
        Ok((event.to_string(), callback))
    }

    fn add_listener(&mut self, id: ObjectId, args: &[HostValue], out: &mut Dispatch) -> Result<()> {
        let (event, callback) = self.listener_args("addEventListener", args)?;
        let target = self.target_mut(id)?;
        if !target
            .listeners
            .iter()
            .any(|(name, cb)| *name == event && *cb == callback)
        {
            target.listeners.push((event, callback));
        }
        if !target.is_port() {
            self.flush(id, out);
        }
        Ok(())
    }

    fn remove_listener(&mut self, id: ObjectId, args: &[HostValue]) -> Result<()> {
        let event = args
            .first()
            .and_then(HostValue::as_str)
            .ok_or_else(|| type_error("call removeEventListener", "event type must be a string"))?
            .to_string();
        let callback = args.get(1).and_then(HostValue::as_object);
        let target = self.target_mut(id)?;
        target
            .listeners
            .retain(|(name, cb)| !(*name == event && Some(*cb) == callback));
        Ok(())
    }

    fn start(&mut self, id: ObjectId, out: &mut Dispatch) -> Result<()> {
        let target = self.target_mut(id)?;
        if !target.started {
            target.started = true;
            self.flush(id, out);
        }
        Ok(())
    }

    fn close(&mut self, id: ObjectId) -> Result<()> {
        let target = self.target_mut(id)?;
        let kind = target.kind;
        match kind {
            TargetKind::Port { peer } => {
                target.closed = true;
                target.kind = TargetKind::Port { peer: None };
                target.queue.clear();
                if let Some(peer) = peer
                    && let Ok(peer) = self.target_mut(peer)
                {
                    peer.kind = TargetKind::Port { peer: None };
                }
            }
            _ => {
                let owner = target.owner;
                self.close_context(owner);
            }
        }
        Ok(())
    }
}

// ============================================================================
// State - Messaging
// ============================================================================

impl State {
    fn post_message(&mut self, sender: ObjectId, args: &[HostValue], out: &mut Dispatch) -> Result<()> {
        let target = self.target(sender)?;
        let dest = match target.kind {
            TargetKind::Port { .. } if target.closed => {
                return Err(Error::host_call(
                    "call postMessage",
                    "InvalidStateError: the port is closed",
                ));
            }
            // Disentangled: the message goes nowhere.
            TargetKind::Port { peer: None } => return Ok(()),
            TargetKind::Port { peer: Some(peer) } => peer,
            TargetKind::Worker { scope, .. } => scope,
            TargetKind::DedicatedScope { worker } => worker,
            other => {
                return Err(type_error(
                    "call postMessage",
                    format!("{}.postMessage is not a function", other.class_name()),
                ));
            }
        };
        if !self.context_alive(target.owner) {
            return Ok(());
        }

        let transfer = self.transfer_list(args.get(1))?;
        let data = args.first().cloned().unwrap_or_default();
        let receiver = self.target(dest)?.owner;
        let (data, ports) = self.structured_clone(&data, &transfer, receiver)?;
        let event = self.event("message", data, dest, ports);
        self.enqueue(dest, "message", event, out);
        Ok(())
    }

    fn transfer_list(&self, value: Option<&HostValue>) -> Result<Vec<HostValue>> {
        match value {
            None | Some(HostValue::Undefined) => Ok(Vec::new()),
            Some(HostValue::Object(id)) => match self.object(*id)? {
                Object::Array(items) => Ok(items.clone()),
                _ => Err(type_error("call postMessage", "transfer list is not an array")),
            },
            Some(other) => Err(type_error(
                "call postMessage",
                format!("transfer list {other} is not an array"),
            )),
        }
    }

    /// Deep-copies `value`, moving every item of `transfer` to `receiver`.
    ///
    /// Either the whole clone succeeds and transferred buffers are
    /// detached, or nothing observable changes.
    fn structured_clone(
        &mut self,
        value: &HostValue,
        transfer: &[HostValue],
        receiver: ContextId,
    ) -> Result<(HostValue, Vec<HostValue>)> {
        let mut seen = FxHashSet::default();
        let mut buffers = Vec::new();
        let mut ports = Vec::new();

        for item in transfer {
            let HostValue::Object(id) = item else {
                return Err(data_clone_error(format!("{item} is not transferable")));
            };
            if !seen.insert(*id) {
                return Err(data_clone_error("transfer list contains a duplicate"));
            }
            match self.object(*id)? {
                Object::Buffer(buffer) if !buffer.detached => buffers.push(*id),
                Object::Buffer(_) => {
                    return Err(data_clone_error("ArrayBuffer is already detached"));
                }
                Object::Target(target) if target.is_port() && !target.closed => ports.push(*id),
                other => {
                    return Err(data_clone_error(format!(
                        "{} is not transferable",
                        other.type_name()
                    )));
                }
            }
        }

        let mut memo = FxHashMap::default();
        let mut allocated = Vec::new();
        for &old in &buffers {
            let bytes = self.buffer(&HostValue::Object(old)).map(|b| b.bytes.clone()).unwrap_or_default();
            let new = self.alloc(Object::Buffer(Buffer {
                bytes,
                detached: false,
            }));
            allocated.push(new);
            memo.insert(old, new);
        }
        for &port in &ports {
            memo.insert(port, port);
        }

        let cloned = match self.clone_value(value, &mut memo, &mut allocated) {
            Ok(cloned) => cloned,
            Err(e) => {
                for id in allocated {
                    self.objects.remove(&id);
                }
                return Err(e);
            }
        };

        for old in buffers {
            if let Some(Object::Buffer(buffer)) = self.objects.get_mut(&old) {
                buffer.bytes.clear();
                buffer.detached = true;
            }
        }
        for &port in &ports {
            if let Ok(target) = self.target_mut(port) {
                target.owner = receiver;
            }
        }

        trace!(transferred = transfer.len(), "Structured clone complete");
        Ok((cloned, ports.into_iter().map(HostValue::Object).collect()))
    }

    fn clone_value(
        &mut self,
        value: &HostValue,
        memo: &mut FxHashMap<ObjectId, ObjectId>,
        allocated: &mut Vec<ObjectId>,
    ) -> Result<HostValue> {
        let HostValue::Object(id) = value else {
            return Ok(value.clone());
        };
        if let Some(mapped) = memo.get(id) {
            return Ok(HostValue::Object(*mapped));
        }

        enum Shape {
            Plain(Vec<(String, HostValue)>),
            Array(Vec<HostValue>),
            Leaf(Object),
        }

        let shape = match self.object(*id)? {
            Object::Plain(fields) => Shape::Plain(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            Object::Array(items) => Shape::Array(items.clone()),
            Object::Buffer(buffer) if !buffer.detached => Shape::Leaf(Object::Buffer(buffer.clone())),
            Object::Blob(text) => Shape::Leaf(Object::Blob(text.clone())),
            other => {
                return Err(data_clone_error(format!(
                    "{} could not be cloned",
                    other.type_name()
                )));
            }
        };

        let new = match shape {
            Shape::Leaf(object) => {
                let new = self.alloc(object);
                allocated.push(new);
                memo.insert(*id, new);
                new
            }
            Shape::Plain(fields) => {
                let new = self.alloc(Object::Plain(FxHashMap::default()));
                allocated.push(new);
                memo.insert(*id, new);
                let mut copy = FxHashMap::default();
                for (key, field) in fields {
                    copy.insert(key, self.clone_value(&field, memo, allocated)?);
                }
                self.objects.insert(new, Object::Plain(copy));
                new
            }
            Shape::Array(items) => {
                let new = self.alloc(Object::Array(Vec::new()));
                allocated.push(new);
                memo.insert(*id, new);
                let mut copy = Vec::with_capacity(items.len());
                for item in items {
                    copy.push(self.clone_value(&item, memo, allocated)?);
                }
                self.objects.insert(new, Object::Array(copy));
                new
            }
        };
        Ok(HostValue::Object(new))
    }

    /// Builds a message-shaped event object.
    fn event(&mut self, kind: &'static str, data: HostValue, target: ObjectId, ports: Vec<HostValue>) -> HostValue {
        let ports = HostValue::Object(self.alloc(Object::Array(ports)));
        self.plain([
            ("type", HostValue::from(kind)),
            ("data", data),
            ("target", HostValue::Object(target)),
            ("ports", ports),
        ])
    }
}

// ============================================================================
// State - Delivery
// ============================================================================

impl State {
    /// Delivers `value` to `target`'s listeners, or queues it.
    pub(super) fn enqueue(&mut self, target: ObjectId, event: &str, value: HostValue, out: &mut Dispatch) {
        let (owner, ready, callbacks) = match self.objects.get(&target) {
            Some(Object::Target(t)) => (t.owner, t.is_ready(event), t.listeners_for(event)),
            _ => return,
        };
        if !self.context_alive(owner) {
            trace!(%target, event, "Dropping delivery to a closed context");
            return;
        }

        if ready {
            for callback in callbacks {
                if let Some(Object::Function(f)) = self.objects.get(&callback) {
                    out.push((f.clone(), value.clone()));
                }
            }
        } else if let Some(Object::Target(t)) = self.objects.get_mut(&target) {
            t.queue.push_back((event.to_string(), value));
        }
    }

    /// Re-delivers queued events that have become deliverable.
    fn flush(&mut self, target: ObjectId, out: &mut Dispatch) {
        let pending = match self.objects.get_mut(&target) {
            Some(Object::Target(t)) => std::mem::take(&mut t.queue),
            _ => return,
        };
        for (event, value) in pending {
            self.enqueue(target, &event, value, out);
        }
    }

    /// Fires an arbitrary event object on `target`.
    pub(super) fn dispatch_raw(
        &mut self,
        target: &HostValue,
        event: &str,
        value: HostValue,
        out: &mut Dispatch,
    ) -> Result<()> {
        let id = target
            .as_object()
            .ok_or_else(|| type_error("dispatch", format!("{target} is not an event target")))?;
        self.target(id)?;
        self.enqueue(id, event, value, out);
        Ok(())
    }

    /// Number of listeners registered for `event` on `target`.
    pub(super) fn listener_count(&self, target: &HostValue, event: &str) -> usize {
        target
            .as_object()
            .and_then(|id| self.target(id).ok())
            .map_or(0, |t| t.listeners_for(event).len())
    }
}
