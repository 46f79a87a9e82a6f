//! epoll backend (Linux).

use seine_core::error::last_errno;
use seine_core::{Error, Poller, Result};

use std::os::unix::io::RawFd;
use std::sync::Mutex;

pub struct EpollPoller {
    epfd: RawFd,
    /// Kernel event buffer. Only the dispatch thread waits, so this
    /// mutex is uncontended; it exists to keep `wait(&self)`.
    events: Mutex<Vec<libc::epoll_event>>,
}

impl EpollPoller {
    /// `max_events`: most readiness events returned per wait call.
    pub fn new(max_events: usize) -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::PollerCreate(last_errno()));
        }
        let events = vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)];
        Ok(Self {
            epfd,
            events: Mutex::new(events),
        })
    }
}

impl Poller for EpollPoller {
    fn add(&self, fd: RawFd) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret != 0 {
            return Err(Error::PollerRegister(last_errno()));
        }
        Ok(())
    }

    fn delete(&self, fd: RawFd) -> Result<()> {
        // The event argument is ignored for DEL but must be non-null
        // on pre-2.6.9 kernels.
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
        if ret != 0 {
            return Err(Error::PollerRegister(last_errno()));
        }
        Ok(())
    }

    fn wait(&self, ready: &mut [RawFd]) -> Result<usize> {
        let mut events = self.events.lock().unwrap();
        let max = events.len().min(ready.len()).max(1) as libc::c_int;
        let n = loop {
            let n = unsafe { libc::epoll_wait(self.epfd, events.as_mut_ptr(), max, -1) };
            if n >= 0 {
                break n as usize;
            }
            let errno = last_errno();
            if errno == libc::EINTR {
                continue;
            }
            return Err(Error::PollerWait(errno));
        };
        for i in 0..n {
            ready[i] = events[i].u64 as RawFd;
        }
        Ok(n)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
