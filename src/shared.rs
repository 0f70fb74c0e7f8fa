//! Shared workers.
//!
//! A [`SharedWorker`] is a client of a host-wide instance keyed by
//! `(url, name)`. Every construction gets its own port to the instance;
//! the instance sees each one arrive as a `connect` event on its
//! [`SharedScope`](crate::scope::SharedScope).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::MessageEvent;
use crate::host::{Host, HostValue};
use crate::port::Endpoint;
use crate::stream::EventStream;
use crate::worker::script;

// ============================================================================
// SharedWorker
// ============================================================================

/// Client-side handle of a shared worker instance.
#[derive(Clone)]
pub struct SharedWorker {
    url: String,
    name: String,
    endpoint: Endpoint,
}

impl fmt::Debug for SharedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWorker")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SharedWorker - Constructors
// ============================================================================

impl SharedWorker {
    /// Connects to the shared instance for `(url, name)`, starting it if
    /// none is running.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is empty
    /// - [`Error::HostCall`] if the host cannot create or attach the instance
    /// - [`Error::InvalidEndpoint`] if the instance's port cannot post messages
    pub fn new(host: Host, url: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let name = name.into();
        if url.is_empty() {
            return Err(Error::config("shared worker script URL must not be empty"));
        }

        let constructor = host.global("SharedWorker")?;
        let handle = host.construct(
            &constructor,
            &[HostValue::from(url.as_str()), HostValue::from(name.as_str())],
        )?;
        let port = host.get(&handle, "port")?;
        let endpoint = Endpoint::wrap(host, port)?;

        debug!(url = %url, name = %name, "Shared worker attached");

        Ok(Self {
            url,
            name,
            endpoint,
        })
    }

    /// Connects to a shared instance running inline `source` text.
    ///
    /// Every call materializes a new object URL, so each call starts a
    /// separate instance.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), plus [`Error::HostCall`] if the script
    /// blob cannot be created.
    pub fn from_script(host: Host, source: &str, name: impl Into<String>) -> Result<Self> {
        let url = script::object_url(&host, source)?;
        Self::new(host, url, name)
    }
}

// ============================================================================
// SharedWorker - Accessors
// ============================================================================

impl SharedWorker {
    /// Returns the script URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the instance name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns this client's port.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

// ============================================================================
// SharedWorker - Messaging
// ============================================================================

impl SharedWorker {
    /// Sends `data` to the instance over this client's port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses the message.
    #[inline]
    pub fn post_message(&self, data: &HostValue, transfer: &[HostValue]) -> Result<()> {
        self.endpoint.post_message(data, transfer)
    }

    /// Serializes `value` and sends it to the instance.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::post_json`].
    #[inline]
    pub fn post_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.endpoint.post_json(value)
    }

    /// Streams messages the instance sends to this client.
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

    /// Disconnects this client's port. The instance keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostCall`] if the host refuses.
    #[inline]
    pub fn close(&self) -> Result<()> {
        self.endpoint.close()
    }
}

// ============================================================================
// Tests
// ============================================================================
