//! Dedicated workers.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Worker`] | Parent-side handle of a running worker |
//! | [`WorkerBuilder`] | Fluent configuration builder |
//! | [`WorkerOptions`] | Construction options marshalled to the host |
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::{Result, Worker};
//!
//! # async fn example(host: worker_bridge::Host) -> Result<()> {
//! let worker = Worker::builder(host).name("echo").spawn("echo.js")?;
//! let mut events = worker.listen(std::future::pending())?;
//!
//! worker.post_json("ping!")?;
//! if let Some(event) = events.recv().await {
//!     println!("{}", event.data_as::<String>()?);
//! }
//! worker.terminate()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for worker configuration.
pub mod builder;

/// Core worker handle.
pub mod core;

/// Worker construction options.
pub mod options;

/// Inline scripts served from object URLs.
pub(crate) mod script;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WorkerBuilder;
pub use self::core::Worker;
pub use options::{Credentials, WorkerOptions, WorkerType};
