//! # seine-core
//!
//! Platform-agnostic types for the seine connection runtime:
//! the error taxonomy, runtime configuration, and the capability
//! traits (`Listens`, `Dispatches`, `Poller`) that the runtime
//! crate implements.
//!
//! No platform code lives here — `seine-runtime` provides the
//! epoll/kqueue pollers, the slab, the pool, and the dispatcher.

pub mod config;
pub mod error;
pub mod traits;

pub use config::{DispatcherConfig, ListenerConfig};
pub use error::{Error, Result};
pub use traits::{Dispatches, Handler, Listens, Poller};
