//! Poller wakeup.
//!
//! A descriptor registered with the poller that another thread can
//! make readable, so `stop()` can interrupt a blocked wait. eventfd
//! on Linux; a non-blocking self-pipe elsewhere.

use seine_core::error::last_errno;
use seine_core::{Error, Result};

use std::os::unix::io::RawFd;

pub struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        impl Waker {
            pub fn new() -> Result<Self> {
                let fd = unsafe {
                    libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC)
                };
                if fd < 0 {
                    return Err(Error::Os(last_errno()));
                }
                Ok(Self { read_fd: fd, write_fd: fd })
            }
        }
    } else {
        impl Waker {
            pub fn new() -> Result<Self> {
                let mut fds = [0 as RawFd; 2];
                let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
                if ret != 0 {
                    return Err(Error::Os(last_errno()));
                }
                for fd in fds {
                    unsafe {
                        libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                    }
                }
                Ok(Self { read_fd: fds[0], write_fd: fds[1] })
            }
        }
    }
}

impl Waker {
    /// The descriptor to register with the poller.
    pub fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Make the descriptor readable. Coalesces: repeated wakes before
    /// a drain produce one readiness event.
    pub fn wake(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.write_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // EAGAIN: a wake is already pending. That is enough.
            if errno == libc::EAGAIN {
                return Ok(());
            }
            return Err(Error::Os(errno));
        }
        Ok(())
    }

    /// Consume pending wakes so the descriptor stops reading ready.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        loop {
            let ret = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if ret <= 0 {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            if self.write_fd != self.read_fd {
                libc::close(self.write_fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_then_drain() {
        let waker = Waker::new().unwrap();
        waker.wake().unwrap();
        waker.wake().unwrap();
        waker.drain();
        // Drained: a non-blocking read sees nothing.
        let mut buf = [0u8; 8];
        let ret = unsafe {
            libc::read(
                waker.fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        assert!(ret <= 0);
    }
}
