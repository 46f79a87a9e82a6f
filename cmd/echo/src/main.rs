//! TCP echo server.
//!
//! One read per dispatch: EOF closes the connection, anything else is
//! written back and the connection stays registered.
//!
//! Usage:
//!     seine-echo [addr] [port]
//!
//! Test with:
//!     echo "hello" | nc 127.0.0.1 8864

use seine_core::{Dispatches, DispatcherConfig, Handler, Listens, ListenerConfig};
use seine_runtime::log::{LogConfig, LogService};
use seine_runtime::{Dispatcher, TcpListener};

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::sync::Arc;

#[derive(Default)]
struct EchoCtx {
    echoes: u64,
}

fn echo_handler(ctx: &mut EchoCtx, fd: RawFd) -> bool {
    let mut buf = [0u8; 512];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n <= 0 {
        return true;
    }
    ctx.echoes += 1;
    unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, n as usize) };
    false
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut listener_cfg = ListenerConfig::from_env();
    if let Some(addr) = args.get(1).and_then(|a| a.parse::<Ipv4Addr>().ok()) {
        listener_cfg.addr = addr;
    }
    if let Some(port) = args.get(2).and_then(|p| p.parse::<u16>().ok()) {
        listener_cfg.port = port;
    }

    let logs = match LogService::start(LogConfig::from_env()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("seine-echo: log service failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let mut listener = TcpListener::new(listener_cfg.clone(), logs.logger("listener"));
    let listen_fd = match listener.descriptor() {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("seine-echo: {}", e);
            std::process::exit(1);
        }
    };

    let handler: Handler<EchoCtx> = Arc::new(echo_handler);
    let mut dispatcher =
        match Dispatcher::new(DispatcherConfig::from_env(), logs.logger("dispatcher")) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("seine-echo: {}", e);
                std::process::exit(1);
            }
        };
    if let Err(e) = dispatcher.start(listen_fd, handler) {
        eprintln!("seine-echo: {}", e);
        std::process::exit(1);
    }

    println!(
        "seine-echo: serving on {}:{}",
        listener_cfg.addr, listener_cfg.port
    );
    loop {
        std::thread::park();
    }
}
