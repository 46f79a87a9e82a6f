//! kqueue backend (macOS / BSD).

use seine_core::error::last_errno;
use seine_core::{Error, Poller, Result};

use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Mutex;

pub struct KqueuePoller {
    kq: RawFd,
    events: Mutex<Vec<libc::kevent>>,
}

// libc::kevent holds a raw udata pointer we never use.
unsafe impl Send for KqueuePoller {}
unsafe impl Sync for KqueuePoller {}

impl KqueuePoller {
    pub fn new(max_events: usize) -> Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Error::PollerCreate(last_errno()));
        }
        let events = vec![unsafe { std::mem::zeroed::<libc::kevent>() }; max_events.max(1)];
        Ok(Self {
            kq,
            events: Mutex::new(events),
        })
    }

    fn change(&self, fd: RawFd, flags: u16) -> Result<()> {
        let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
        ev.ident = fd as libc::uintptr_t;
        ev.filter = libc::EVFILT_READ;
        ev.flags = flags;
        let ret = unsafe { libc::kevent(self.kq, &ev, 1, ptr::null_mut(), 0, ptr::null()) };
        if ret < 0 {
            return Err(Error::PollerRegister(last_errno()));
        }
        Ok(())
    }
}

impl Poller for KqueuePoller {
    fn add(&self, fd: RawFd) -> Result<()> {
        self.change(fd, libc::EV_ADD)
    }

    fn delete(&self, fd: RawFd) -> Result<()> {
        self.change(fd, libc::EV_DELETE)
    }

    fn wait(&self, ready: &mut [RawFd]) -> Result<usize> {
        let mut events = self.events.lock().unwrap();
        let max = events.len().min(ready.len()).max(1) as libc::c_int;
        let n = loop {
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    ptr::null(),
                    0,
                    events.as_mut_ptr(),
                    max,
                    ptr::null(),
                )
            };
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
            ready[i] = events[i].ident as RawFd;
        }
        Ok(n)
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
