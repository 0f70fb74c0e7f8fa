//! Worker Bridge - Typed, cancellable message streams over host workers.
//!
//! This library turns a host's callback-driven worker events (`message`,
//! `messageerror`, `connect`) into pull-based async streams, and wraps
//! the endpoints that produce them.
//!
//! # Architecture
//!
//! All host access goes through one capability trait:
//!
//! - **Host side**: a [`HostBridge`] performs get / call / construct and
//!   owns registered callbacks
//! - **Rust side**: [`stream::listen`] registers callbacks, spawns one
//!   dispatch task per firing, and feeds an [`EventStream`]
//!
//! Key design principles:
//!
//! - The host's dispatch loop is never blocked: callbacks only spawn
//! - A malformed event carries its decode error; the stream continues
//! - Streams end only through their cancellation signal
//! - The current scope is reached through [`GlobalSelf::init`], never ambiently
//!
//! # Quick Start
//!
//! With the `memory-host` feature enabled:
//!
//! ```ignore
//! use worker_bridge::{MemoryHost, Result, Worker, WorkerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let memory = MemoryHost::new();
//!     memory.register_script("echo.js", |host| async move {
//!         // The worker side: echo every message back.
//!         let scope = worker_bridge::DedicatedScope::init(host).expect("dedicated");
//!         let mut events = scope.listen(std::future::pending()).expect("listen");
//!         while let Some(event) = events.recv().await {
//!             let _ = scope.post_message(event.data().expect("data"), &[]);
//!         }
//!     });
//!
//!     let worker = Worker::new(memory.host(), "echo.js", WorkerOptions::new())?;
//!     let mut events = worker.listen(std::future::pending())?;
//!     worker.post_json("ping!")?;
//!
//!     if let Some(event) = events.recv().await {
//!         println!("{}", event.data_as::<String>()?);
//!     }
//!     worker.terminate()?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`host`] | [`HostBridge`], [`HostValue`], and the in-memory host (`memory-host` feature) |
//! | [`stream`] | The event-to-stream bridge |
//! | [`event`] | [`MessageEvent`] and [`ConnectEvent`] |
//! | [`port`] | [`Endpoint`] and [`MessageChannel`] |
//! | [`worker`] | Dedicated [`Worker`] and its options |
//! | [`shared`] | [`SharedWorker`] clients |
//! | [`scope`] | [`GlobalSelf`], the current worker's own scope |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Decoded event payloads.
pub mod event;

/// Host boundary and the in-memory host.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Message endpoints and channels.
pub mod port;

/// Global scope of the current worker.
pub mod scope;

/// Shared worker clients.
pub mod shared;

/// Event-to-stream bridge.
pub mod stream;

/// Dedicated workers.
///
/// Use [`Worker::builder()`] or [`Worker::new()`] to start one.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Event types
pub use event::{ConnectEvent, MessageEvent};

// Host types
#[cfg(any(test, feature = "memory-host"))]
pub use host::memory::MemoryHost;
pub use host::{Host, HostBridge, HostCallback, HostValue};

// Identifier types
pub use identifiers::{ContextId, ObjectId, SubscriptionId};

// Endpoint types
pub use port::{Endpoint, MessageChannel};

// Scope types
pub use scope::{DedicatedScope, GlobalSelf, SharedScope, WorkerLocation};

// Worker types
pub use shared::SharedWorker;
pub use stream::EventStream;
pub use worker::{Credentials, Worker, WorkerBuilder, WorkerOptions, WorkerType};
