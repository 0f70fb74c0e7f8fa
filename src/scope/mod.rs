//! The current context's own global scope.
//!
//! Code running inside a worker reaches its scope through
//! [`GlobalSelf::init`], never through ambient state. The variant is
//! picked from what the host's `self` exposes:
//!
//! | Variant | Detected by | `listen` yields |
//! |---------|-------------|-----------------|
//! | [`GlobalSelf::Shared`] | a truthy `SharedWorkerGlobalScope` | [`ConnectEvent`] per new client |
//! | [`GlobalSelf::Dedicated`] | a callable `postMessage` | [`MessageEvent`] from the parent |
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::GlobalSelf;
//!
//! match GlobalSelf::init(host)? {
//!     GlobalSelf::Dedicated(scope) => {
//!         let mut events = scope.listen(std::future::pending())?;
//!         while let Some(event) = events.recv().await {
//!             scope.post_json(&event.data_as::<String>()?)?;
//!         }
//!     }
//!     GlobalSelf::Shared(scope) => {
//!         let mut connections = scope.listen(std::future::pending())?;
//!         while let Some(connect) = connections.recv().await {
//!             if let Some(client) = connect.client() {
//!                 client.post_json("welcome")?;
//!             }
//!         }
//!     }
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Script location reported by a worker scope.
pub mod location;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{ConnectEvent, MessageEvent, decode_connect};
use crate::host::{Host, HostValue};
use crate::port::Endpoint;
use crate::stream::{self, EventStream};

pub use location::WorkerLocation;

// ============================================================================
// Constants
// ============================================================================

/// Marker property present only on shared worker scopes.
const SHARED_MARKER: &str = "SharedWorkerGlobalScope";

/// Events a shared scope stream listens for.
const CONNECT_EVENTS: [&str; 1] = ["connect"];

// ============================================================================
// GlobalSelf
// ============================================================================

/// The current execution context's global scope.
#[derive(Debug, Clone)]
pub enum GlobalSelf {
    /// Scope of a dedicated worker; itself a message endpoint.
    Dedicated(DedicatedScope),
    /// Scope of a shared worker; receives client connections.
    Shared(SharedScope),
}

impl GlobalSelf {
    /// Resolves the scope of the context `host` is bound to.
    ///
    /// Repeated calls return equivalent views of the same scope.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the scope has neither capability,
    ///   e.g. when called outside a worker
    /// - [`Error::HostCall`] if reading the scope fails
    pub fn init(host: Host) -> Result<Self> {
        let handle = host.global("self")?;

        let scope = if host.has_capability(&handle, SHARED_MARKER)? {
            Self::Shared(SharedScope { host, handle })
        } else if host.has_capability(&handle, "postMessage")? {
            Self::Dedicated(DedicatedScope {
                endpoint: Endpoint::wrap(host, handle)?,
            })
        } else {
            return Err(Error::invalid_endpoint(
                "global scope exposes neither postMessage nor a connect capability",
            ));
        };

        debug!(shared = scope.is_shared(), "Global scope initialized");
        Ok(scope)
    }

    /// Returns `true` for a shared worker scope.
    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Returns the dedicated scope, if this is one.
    #[inline]
    #[must_use]
    pub fn as_dedicated(&self) -> Option<&DedicatedScope> {
        match self {
            Self::Dedicated(scope) => Some(scope),
            Self::Shared(_) => None,
        }
    }

    /// Returns the shared scope, if this is one.
    #[inline]
    #[must_use]
    pub fn as_shared(&self) -> Option<&SharedScope> {
        match self {
            Self::Shared(scope) => Some(scope),
            Self::Dedicated(_) => None,
        }
    }

    /// Returns the scope's name, exactly as the host reports it.
    ///
    /// # Errors
    ///
    /// See [`DedicatedScope::name`].
    pub fn name(&self) -> Result<String> {
        match self {
            Self::Dedicated(scope) => scope.name(),
            Self::Shared(scope) => scope.name(),
        }
    }

    /// Stops this context abruptly. See [`DedicatedScope::close`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    pub fn close(&self) -> Result<()> {
        match self {
            Self::Dedicated(scope) => scope.close(),
            Self::Shared(scope) => scope.close(),
        }
    }
}

// ============================================================================
// DedicatedScope
// ============================================================================

/// Global scope of a dedicated worker.
#[derive(Debug, Clone)]
pub struct DedicatedScope {
    endpoint: Endpoint,
}

impl DedicatedScope {
    /// Resolves the current scope, which must be a dedicated worker's.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEndpoint`] if the scope is not a dedicated worker's.
    pub fn init(host: Host) -> Result<Self> {
        match GlobalSelf::init(host)? {
            GlobalSelf::Dedicated(scope) => Ok(scope),
            GlobalSelf::Shared(_) => Err(Error::invalid_endpoint(
                "global scope belongs to a shared worker",
            )),
        }
    }

    /// Sends `data` to the parent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses the message.
    #[inline]
    pub fn post_message(&self, data: &HostValue, transfer: &[HostValue]) -> Result<()> {
        self.endpoint.post_message(data, transfer)
    }

    /// Serializes `value` and sends it to the parent.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::post_json`].
    #[inline]
    pub fn post_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.endpoint.post_json(value)
    }

    /// Streams messages from the parent until `cancel` completes.
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

    /// Returns the name the parent gave this worker.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] if the host's `name` is not a string
    /// - [`Error::HostCall`] if the read fails
    pub fn name(&self) -> Result<String> {
        self.endpoint
            .host()
            .get_string(self.endpoint.handle(), "name")
    }

    /// Stops this worker. Pending work on its event loop is discarded,
    /// not drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    pub fn close(&self) -> Result<()> {
        self.endpoint
            .host()
            .call(self.endpoint.handle(), "close", &[])?;
        debug!("Dedicated scope closed");
        Ok(())
    }

    /// Returns the scope as an endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

// ============================================================================
// SharedScope
// ============================================================================

/// Global scope of a shared worker.
#[derive(Clone)]
pub struct SharedScope {
    host: Host,
    handle: HostValue,
}

impl fmt::Debug for SharedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScope")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl SharedScope {
    /// Resolves the current scope, which must be a shared worker's.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEndpoint`] if the scope is not a shared worker's.
    pub fn init(host: Host) -> Result<Self> {
        match GlobalSelf::init(host)? {
            GlobalSelf::Shared(scope) => Ok(scope),
            GlobalSelf::Dedicated(_) => Err(Error::invalid_endpoint(
                "global scope belongs to a dedicated worker",
            )),
        }
    }

    /// Streams client connections until `cancel` completes.
    ///
    /// Wrap nothing yourself: each event's ports are already endpoints, and
    /// [`ConnectEvent::client`] is the new client's channel.
    ///
    /// # Errors
    ///
    /// - [`Error::Runtime`] if called outside a tokio runtime
    /// - [`Error::HostCall`] if registration fails
    pub fn listen<C>(&self, cancel: C) -> Result<EventStream<ConnectEvent>>
    where
        C: Future<Output = ()> + Send + 'static,
    {
        stream::listen(&self.host, &self.handle, &CONNECT_EVENTS, decode_connect, cancel)
    }

    /// Returns the instance name, exactly as the host reports it.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] if the host's `name` is not a string
    /// - [`Error::HostCall`] if the read fails
    pub fn name(&self) -> Result<String> {
        self.host.get_string(&self.handle, "name")
    }

    /// Returns the script location, exactly as the host reports it.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] if a location field is not a string
    /// - [`Error::HostCall`] if a read fails
    pub fn location(&self) -> Result<WorkerLocation> {
        let location = self.host.get(&self.handle, "location")?;
        WorkerLocation::read(&self.host, &location)
    }

    /// Stops this instance. Pending work is discarded, not drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    pub fn close(&self) -> Result<()> {
        self.host.call(&self.handle, "close", &[])?;
        debug!("Shared scope closed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
