//! Runtime error types.
//!
//! Setup failures carry the raw `errno` so operators can tell a port
//! conflict (EADDRINUSE on bind) from a privilege error (EACCES).

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Stream socket creation failed.
    SocketCreate(i32),
    /// setsockopt failed.
    SocketOption(i32),
    /// bind() failed.
    Bind(i32),
    /// listen() failed.
    Listen(i32),
    /// Poller instance creation failed (epoll_create1 / kqueue).
    PollerCreate(i32),
    /// Registering or deregistering a descriptor with the poller failed.
    PollerRegister(i32),
    /// The poller wait call failed. Fatal to the dispatch loop.
    PollerWait(i32),
    /// accept() failed. Non-fatal, isolated to one readiness event.
    Accept(i32),
    /// enqueue() on a pool that has begun stopping.
    PoolStopped,
    /// The task backing a handle was dropped before it ran.
    TaskAborted,
    /// Deallocation into a block that was already fully reclaimed.
    DoubleFree,
    /// A slab handle whose block has since been reset and reused.
    StaleHandle,
    /// Other OS error with errno.
    Os(i32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocketCreate(e) => write!(f, "socket creation failed: errno {}", e),
            Self::SocketOption(e) => write!(f, "setsockopt failed: errno {}", e),
            Self::Bind(e) => write!(f, "bind failed: errno {}", e),
            Self::Listen(e) => write!(f, "listen failed: errno {}", e),
            Self::PollerCreate(e) => write!(f, "poller creation failed: errno {}", e),
            Self::PollerRegister(e) => write!(f, "poller registration failed: errno {}", e),
            Self::PollerWait(e) => write!(f, "poller wait failed: errno {}", e),
            Self::Accept(e) => write!(f, "accept failed: errno {}", e),
            Self::PoolStopped => write!(f, "enqueue on stopped worker pool"),
            Self::TaskAborted => write!(f, "task dropped before execution"),
            Self::DoubleFree => write!(f, "deallocate into an already reclaimed block"),
            Self::StaleHandle => write!(f, "stale slab handle (block was reset)"),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Grab the calling thread's errno.
pub fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_errno() {
        let e = Error::Bind(98); // EADDRINUSE
        assert_eq!(e.to_string(), "bind failed: errno 98");
        let e = Error::Accept(24); // EMFILE
        assert_eq!(e.to_string(), "accept failed: errno 24");
    }

    #[test]
    fn setup_variants_are_distinct() {
        assert_ne!(Error::SocketCreate(1), Error::SocketOption(1));
        assert_ne!(Error::Bind(1), Error::Listen(1));
    }
}
