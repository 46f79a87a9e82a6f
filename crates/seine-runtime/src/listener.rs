//! Passive TCP socket.
//!
//! Raw `libc` socket setup: create, `SO_REUSEADDR`+`SO_REUSEPORT`,
//! bind, listen with `SOMAXCONN`. Each step fails with its own error
//! variant and its own log line so a port conflict reads differently
//! from a privilege error.

use crate::log::Logger;
use seine_core::error::last_errno;
use seine_core::{Error, Listens, ListenerConfig, Result};

use std::os::unix::io::RawFd;

pub struct TcpListener {
    config: ListenerConfig,
    fd: RawFd,
    running: bool,
    log: Logger,
}

impl TcpListener {
    pub fn new(config: ListenerConfig, log: Logger) -> Self {
        Self {
            config,
            fd: -1,
            running: false,
            log,
        }
    }

    /// The port actually bound — meaningful after `bind_and_listen`
    /// when the configured port was 0.
    pub fn local_port(&self) -> Result<u16> {
        if !self.running {
            return Err(Error::Os(libc::EBADF));
        }
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                self.fd,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret != 0 {
            return Err(Error::Os(last_errno()));
        }
        Ok(u16::from_be(addr.sin_port))
    }
}

impl Listens for TcpListener {
    fn bind_and_listen(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP) };
        if fd < 0 {
            let errno = last_errno();
            self.log.error(format!("socket creation failed: errno {}", errno));
            return Err(Error::SocketCreate(errno));
        }
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };

        let opt: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        let ret2 = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &opt as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 || ret2 != 0 {
            let errno = last_errno();
            self.log.error(format!("setsockopt failed: errno {}", errno));
            unsafe { libc::close(fd) };
            return Err(Error::SocketOption(errno));
        }

        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from(self.config.addr).to_be();
        addr.sin_port = self.config.port.to_be();

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            let errno = last_errno();
            self.log.error(format!(
                "bind to {}:{} failed: errno {}",
                self.config.addr, self.config.port, errno
            ));
            unsafe { libc::close(fd) };
            return Err(Error::Bind(errno));
        }

        let ret = unsafe { libc::listen(fd, libc::SOMAXCONN) };
        if ret != 0 {
            let errno = last_errno();
            self.log.error(format!("listen failed: errno {}", errno));
            unsafe { libc::close(fd) };
            return Err(Error::Listen(errno));
        }

        self.fd = fd;
        self.running = true;
        self.log.info(format!(
            "listening on {}:{}",
            self.config.addr, self.config.port
        ));
        Ok(())
    }

    fn descriptor(&mut self) -> Result<RawFd> {
        if !self.running {
            self.bind_and_listen()?;
        }
        Ok(self.fd)
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        if self.running && self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}
