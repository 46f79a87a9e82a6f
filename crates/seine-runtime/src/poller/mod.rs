//! Readiness multiplexer backends.
//!
//! One `Poller` trait (in `seine-core`), one backend per platform
//! event API, selected at compile time. Both backends are
//! level-triggered on read-readiness, so a kept-open connection needs
//! no re-arm after recycling.

pub mod wake;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
        pub use epoll::EpollPoller;
        pub type DefaultPoller = EpollPoller;
    } else if #[cfg(any(target_os = "macos", target_os = "freebsd"))] {
        pub mod kqueue;
        pub use kqueue::KqueuePoller;
        pub type DefaultPoller = KqueuePoller;
    } else {
        compile_error!("no readiness multiplexer backend for this platform");
    }
}

pub use wake::Waker;

#[cfg(test)]
mod tests {
    use super::*;
    use seine_core::Poller;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn reports_readable_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (server, _) = listener.accept().unwrap();

        let poller = DefaultPoller::new(8).unwrap();
        poller.add(server.as_raw_fd()).unwrap();

        client.write_all(b"x").unwrap();
        let mut ready = [0; 8];
        let n = poller.wait(&mut ready).unwrap();
        assert_eq!(n, 1);
        assert_eq!(ready[0], server.as_raw_fd());

        // Level-triggered: unread data is reported again.
        let n = poller.wait(&mut ready).unwrap();
        assert_eq!(n, 1);

        poller.delete(server.as_raw_fd()).unwrap();
    }

    #[test]
    fn waker_interrupts_wait() {
        let poller = DefaultPoller::new(8).unwrap();
        let waker = Waker::new().unwrap();
        poller.add(waker.fd()).unwrap();

        waker.wake().unwrap();
        let mut ready = [0; 8];
        let n = poller.wait(&mut ready).unwrap();
        assert_eq!(n, 1);
        assert_eq!(ready[0], waker.fd());
        waker.drain();
    }
}
