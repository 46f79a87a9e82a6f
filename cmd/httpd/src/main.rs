//! Static-file HTTP server.
//!
//! Each readiness dispatch reads one request head, serves a file from
//! the document root and closes the connection.
//!
//! Usage:
//!     seine-httpd [addr] [port] [root]
//!
//! The document root defaults to ./static.

mod http;

use seine_core::{Dispatches, DispatcherConfig, Handler, Listens, ListenerConfig};
use seine_runtime::log::{LogConfig, LogService, Logger};
use seine_runtime::{Dispatcher, TcpListener};

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Default)]
struct HttpCtx {
    requests: u64,
}

fn write_all_fd(fd: RawFd, mut buf: &[u8]) {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n <= 0 {
            return;
        }
        buf = &buf[n as usize..];
    }
}

fn serve(root: &PathBuf, log: &Logger, ctx: &mut HttpCtx, fd: RawFd) -> bool {
    let mut buf = [0u8; 8192];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n <= 0 {
        return true;
    }
    ctx.requests += 1;

    let response = match http::Request::parse(&buf[..n as usize]) {
        Some(req) if req.method != "GET" => {
            log.warning(&format!("{} {} -> 405", req.method, req.path));
            http::method_not_allowed_response()
        }
        Some(req) => match http::resolve_path(root, &req.path) {
            Some(path) => match std::fs::read(&path) {
                Ok(body) => {
                    log.info(&format!("GET {} -> 200 ({} bytes)", req.path, body.len()));
                    http::ok_response(&path, &body)
                }
                Err(_) => {
                    log.info(&format!("GET {} -> 404", req.path));
                    http::not_found_response()
                }
            },
            None => {
                log.warning(&format!("GET {} -> 404 (rejected path)", req.path));
                http::not_found_response()
            }
        },
        None => http::not_found_response(),
    };
    write_all_fd(fd, &response);
    // One request per connection.
    true
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
    let root = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./static"));

    let logs = match LogService::start(LogConfig::from_env()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("seine-httpd: log service failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let mut listener = TcpListener::new(listener_cfg.clone(), logs.logger("listener"));
    let listen_fd = match listener.descriptor() {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("seine-httpd: {}", e);
            std::process::exit(1);
        }
    };

    let handler: Handler<HttpCtx> = {
        let log = logs.logger("httpd");
        Arc::new(move |ctx: &mut HttpCtx, fd: RawFd| serve(&root, &log, ctx, fd))
    };
    let mut dispatcher =
        match Dispatcher::new(DispatcherConfig::from_env(), logs.logger("dispatcher")) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("seine-httpd: {}", e);
                std::process::exit(1);
            }
        };
    if let Err(e) = dispatcher.start(listen_fd, handler) {
        eprintln!("seine-httpd: {}", e);
        std::process::exit(1);
    }

    println!(
        "seine-httpd: serving on {}:{}",
        listener_cfg.addr, listener_cfg.port
    );
    loop {
        std::thread::park();
    }
}
