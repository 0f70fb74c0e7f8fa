//! Object model of the in-memory host.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::host::{HostCallback, HostValue};
use crate::identifiers::{ContextId, ObjectId};

// ============================================================================
// Native
// ============================================================================

/// Built-in host objects, allocated once per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Native {
    /// `Array`, used for `Array.of`.
    Array,
    /// `Blob` constructor.
    Blob,
    /// `URL` namespace (`createObjectURL`, `revokeObjectURL`).
    Url,
    /// `MessageChannel` constructor.
    MessageChannel,
    /// `Worker` constructor.
    Worker,
    /// `SharedWorker` constructor.
    SharedWorker,
    /// `SharedWorkerGlobalScope` marker exposed on shared scopes.
    SharedWorkerGlobalScope,
    /// Stand-in value returned when reading any method property.
    Method,
}

impl Native {
    /// All natives, in allocation order.
    pub(super) const ALL: [Native; 8] = [
        Native::Array,
        Native::Blob,
        Native::Url,
        Native::MessageChannel,
        Native::Worker,
        Native::SharedWorker,
        Native::SharedWorkerGlobalScope,
        Native::Method,
    ];

    /// Global binding name, if the native is reachable as a global.
    pub(super) fn global_name(self) -> Option<&'static str> {
        match self {
            Native::Array => Some("Array"),
            Native::Blob => Some("Blob"),
            Native::Url => Some("URL"),
            Native::MessageChannel => Some("MessageChannel"),
            Native::Worker => Some("Worker"),
            Native::SharedWorker => Some("SharedWorker"),
            Native::SharedWorkerGlobalScope | Native::Method => None,
        }
    }

    /// Methods readable as properties of this native.
    pub(super) fn methods(self) -> &'static [&'static str] {
        match self {
            Native::Array => &["of"],
            Native::Url => &["createObjectURL", "revokeObjectURL"],
            _ => &[],
        }
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// A transferable byte buffer.
#[derive(Debug, Clone, Default)]
pub(super) struct Buffer {
    pub bytes: Vec<u8>,
    pub detached: bool,
}

// ============================================================================
// Target
// ============================================================================

/// What kind of event target an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TargetKind {
    /// One end of a message channel.
    Port {
        /// The entangled end, `None` once either side closed.
        peer: Option<ObjectId>,
    },
    /// Parent-side handle of a dedicated worker.
    Worker {
        /// The worker's global scope.
        scope: ObjectId,
        /// The worker's execution context.
        context: ContextId,
    },
    /// Parent-side handle of a shared worker.
    SharedWorker,
    /// Global scope of a dedicated worker.
    DedicatedScope {
        /// The parent-side handle.
        worker: ObjectId,
    },
    /// Global scope of a shared worker.
    SharedScope,
    /// Global scope of the main context.
    Window,
}

impl TargetKind {
    /// Methods this kind of target answers to.
    pub(super) fn methods(self) -> &'static [&'static str] {
        match self {
            TargetKind::Port { .. } => &[
                "addEventListener",
                "removeEventListener",
                "postMessage",
                "start",
                "close",
            ],
            TargetKind::Worker { .. } => &[
                "addEventListener",
                "removeEventListener",
                "postMessage",
                "terminate",
            ],
            TargetKind::DedicatedScope { .. } => &[
                "addEventListener",
                "removeEventListener",
                "postMessage",
                "close",
            ],
            TargetKind::SharedScope => &["addEventListener", "removeEventListener", "close"],
            TargetKind::SharedWorker | TargetKind::Window => {
                &["addEventListener", "removeEventListener"]
            }
        }
    }

    /// Human-readable class name for error messages.
    pub(super) fn class_name(self) -> &'static str {
        match self {
            TargetKind::Port { .. } => "MessagePort",
            TargetKind::Worker { .. } => "Worker",
            TargetKind::SharedWorker => "SharedWorker",
            TargetKind::DedicatedScope { .. } => "DedicatedWorkerGlobalScope",
            TargetKind::SharedScope => "SharedWorkerGlobalScope",
            TargetKind::Window => "Window",
        }
    }
}

/// An object that can receive events.
#[derive(Debug)]
pub(super) struct Target {
    pub kind: TargetKind,
    /// Context whose event loop runs this target's listeners.
    pub owner: ContextId,
    /// Registered `(event name, callback object)` pairs, in order.
    pub listeners: Vec<(String, ObjectId)>,
    /// Deliveries held back until the target is ready.
    pub queue: VecDeque<(String, HostValue)>,
    /// Ports only: `start()` was called.
    pub started: bool,
    /// Ports only: `close()` was called.
    pub closed: bool,
    /// Plain data properties (`name`, `location`, `port`, ...).
    pub props: FxHashMap<String, HostValue>,
}

impl Target {
    pub(super) fn new(kind: TargetKind, owner: ContextId) -> Self {
        Self {
            kind,
            owner,
            listeners: Vec::new(),
            queue: VecDeque::new(),
            started: false,
            closed: false,
            props: FxHashMap::default(),
        }
    }

    /// Adds a data property.
    pub(super) fn with_prop(mut self, name: &str, value: HostValue) -> Self {
        self.props.insert(name.to_string(), value);
        self
    }

    /// Returns `true` if this target is one end of a channel.
    #[inline]
    pub(super) fn is_port(&self) -> bool {
        matches!(self.kind, TargetKind::Port { .. })
    }

    /// Callback objects registered for `event`.
    pub(super) fn listeners_for(&self, event: &str) -> Vec<ObjectId> {
        self.listeners
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, callback)| *callback)
            .collect()
    }

    /// Returns `true` if deliveries of `event` go straight to listeners.
    ///
    /// Ports deliver once started, whether or not anyone listens;
    /// every other target holds deliveries until a listener exists.
    pub(super) fn is_ready(&self, event: &str) -> bool {
        if self.is_port() {
            self.started
        } else {
            self.listeners.iter().any(|(name, _)| name == event)
        }
    }
}

// ============================================================================
// Object
// ============================================================================

/// One entry in the host's object table.
pub(super) enum Object {
    /// Plain key/value object.
    Plain(FxHashMap<String, HostValue>),
    /// Dense list.
    Array(Vec<HostValue>),
    /// Transferable bytes.
    Buffer(Buffer),
    /// Immutable text blob.
    Blob(String),
    /// A callback registered through the bridge.
    Function(HostCallback),
    /// A built-in.
    Native(Native),
    /// An event target.
    Target(Target),
}

impl Object {
    /// Type name for error messages.
    pub(super) fn type_name(&self) -> &'static str {
        match self {
            Object::Plain(_) => "Object",
            Object::Array(_) => "Array",
            Object::Buffer(_) => "ArrayBuffer",
            Object::Blob(_) => "Blob",
            Object::Function(_) | Object::Native(Native::Method) => "Function",
            Object::Native(_) => "Native",
            Object::Target(target) => target.kind.class_name(),
        }
    }
}

// ============================================================================
// Truthiness
// ============================================================================

/// Applies host truthiness to a value. Objects are always truthy.
pub(super) fn truthy(value: &HostValue) -> bool {
    match value {
        HostValue::Undefined | HostValue::Null => false,
        HostValue::Bool(b) => *b,
        HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
        HostValue::String(s) => !s.is_empty(),
        HostValue::Object(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&HostValue::Undefined));
        assert!(!truthy(&HostValue::Null));
        assert!(!truthy(&HostValue::Number(0.0)));
        assert!(!truthy(&HostValue::Number(f64::NAN)));
        assert!(!truthy(&HostValue::from("")));
        assert!(truthy(&HostValue::from("x")));
        assert!(truthy(&HostValue::Number(-1.0)));
        assert!(truthy(&HostValue::Object(ObjectId::new(1))));
    }

    #[test]
    fn test_port_readiness_requires_start() {
        let mut port = Target::new(TargetKind::Port { peer: None }, ContextId::main());
        port.listeners.push(("message".into(), ObjectId::new(9)));
        assert!(!port.is_ready("message"));
        port.started = true;
        assert!(port.is_ready("message"));
    }

    #[test]
    fn test_worker_readiness_requires_listener() {
        let mut worker = Target::new(
            TargetKind::Worker {
                scope: ObjectId::new(1),
                context: ContextId::new(1),
            },
            ContextId::main(),
        );
        assert!(!worker.is_ready("message"));
        worker.listeners.push(("message".into(), ObjectId::new(9)));
        assert!(worker.is_ready("message"));
        assert!(!worker.is_ready("messageerror"));
    }

    #[test]
    fn test_shared_worker_handle_cannot_post() {
        assert!(!TargetKind::SharedWorker.methods().contains(&"postMessage"));
        assert!(TargetKind::Port { peer: None }.methods().contains(&"start"));
    }
}
