//! Capability traits — the seams between the runtime pieces.
//!
//! Concrete types are chosen at compile time (no trait objects on the
//! accept/dispatch hot path); the traits exist so a poller backend or
//! a listener can be swapped without touching the dispatcher.

use crate::error::Result;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Per-connection handler supplied by the application.
///
/// Invoked once per dispatch with exclusive access to the connection's
/// context slot. Returns `true` to close the connection, `false` to
/// keep it registered for further readiness events. The handler may
/// block on the descriptor but must not retain the context reference
/// past its return.
pub type Handler<C> = Arc<dyn Fn(&mut C, RawFd) -> bool + Send + Sync>;

/// Something that owns a passive socket.
pub trait Listens {
    /// Create, configure, bind and listen. Idempotent once running.
    fn bind_and_listen(&mut self) -> Result<()>;

    /// The listening descriptor, binding lazily if needed.
    fn descriptor(&mut self) -> Result<RawFd>;
}

/// Something that fans ready connections out to handlers.
pub trait Dispatches<C> {
    /// Register `listen_fd`, start the dispatch and recycle loops.
    fn start(&mut self, listen_fd: RawFd, handler: Handler<C>) -> Result<()>;

    /// Stop accepting, finish in-flight handlers, recycle everything.
    fn stop(&mut self);
}

/// A readiness-event multiplexer over read-readiness, level-triggered.
///
/// `wait` blocks until at least one registered descriptor is readable
/// and writes the ready descriptors into `ready`. Level-triggered
/// semantics: a descriptor with unread data is reported again on the
/// next wait, so no re-arm is needed after a handler keeps a
/// connection open.
pub trait Poller: Send + Sync {
    fn add(&self, fd: RawFd) -> Result<()>;
    fn delete(&self, fd: RawFd) -> Result<()>;
    fn wait(&self, ready: &mut [RawFd]) -> Result<usize>;
}
