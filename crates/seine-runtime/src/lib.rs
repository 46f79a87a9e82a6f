//! # seine-runtime
//!
//! The machinery behind the capability traits in `seine-core`:
//!
//! - [`queue::BoundedQueue`] — blocking MPMC queue, the runtime's one
//!   backpressure mechanism
//! - [`pool::WorkerPool`] — fixed OS-thread pool returning
//!   [`pool::TaskHandle`]s
//! - [`slab::SlabAllocator`] — per-connection context memory without
//!   hot-path heap allocation
//! - [`listener::TcpListener`] — the passive socket
//! - [`poller`] — epoll/kqueue readiness multiplexers behind one trait
//! - [`dispatcher::Dispatcher`] — accept loop + dispatch + recycler
//! - [`log`] — the asynchronous leveled log service

pub mod dispatcher;
pub mod listener;
pub mod log;
pub mod pool;
pub mod poller;
pub mod queue;
pub mod slab;

pub use dispatcher::Dispatcher;
pub use listener::TcpListener;
pub use log::{Level, LogConfig, LogService, Logger};
pub use pool::{TaskHandle, WorkerPool};
pub use queue::BoundedQueue;
pub use slab::{SlabAllocator, SlabRef};
