//! End-to-end runtime tests over loopback sockets.

use seine_core::{Dispatches, DispatcherConfig, Handler, Listens, ListenerConfig};
use seine_runtime::log::{Level, LogConfig, LogService};
use seine_runtime::{Dispatcher, TcpListener};

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn read_fd(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> isize {
    unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) }
}

fn start_server<C: Default + Send + 'static>(
    handler: Handler<C>,
) -> (LogService, TcpListener, Dispatcher<C>, u16) {
    let service = LogService::start(LogConfig::default().min_level(Level::Fatal)).unwrap();
    let mut listener = TcpListener::new(
        ListenerConfig::new(Ipv4Addr::LOCALHOST, 0),
        service.logger("listener"),
    );
    let listen_fd = listener.descriptor().unwrap();
    let port = listener.local_port().unwrap();

    let mut dispatcher = Dispatcher::new(
        DispatcherConfig::default().max_events(10).workers(2),
        service.logger("dispatcher"),
    )
    .unwrap();
    dispatcher.start(listen_fd, handler).unwrap();
    (service, listener, dispatcher, port)
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[derive(Default)]
struct EchoCtx {
    reads: u32,
}

#[test]
fn echo_round_trip_and_context_recycling() {
    let handler: Handler<EchoCtx> = Arc::new(|ctx: &mut EchoCtx, fd: RawFd| {
        let mut buf = [0u8; 512];
        let n = read_fd(fd, &mut buf);
        if n <= 0 {
            return true;
        }
        ctx.reads += 1;
        write_fd(fd, &buf[..n as usize]);
        // One read, echo, then close.
        true
    });
    let (_svc, _listener, mut dispatcher, port) = start_server(handler);
    assert_eq!(dispatcher.live_contexts(), 0);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"ping").unwrap();

    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"ping");

    // The handler returned true: the connection's context slot must
    // come back to its pre-connection count.
    assert!(wait_until(Duration::from_secs(5), || {
        dispatcher.live_contexts() == 0
    }));

    // The runtime closed its end.
    let mut rest = [0u8; 1];
    assert_eq!(client.read(&mut rest).unwrap(), 0);

    dispatcher.stop();
    assert_eq!(dispatcher.live_contexts(), 0);
}

#[test]
fn several_sequential_clients_recycle_to_baseline() {
    let handler: Handler<EchoCtx> = Arc::new(|_ctx: &mut EchoCtx, fd: RawFd| {
        let mut buf = [0u8; 64];
        let n = read_fd(fd, &mut buf);
        if n > 0 {
            write_fd(fd, &buf[..n as usize]);
        }
        true
    });
    let (_svc, _listener, mut dispatcher, port) = start_server(handler);

    for i in 0..5 {
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let msg = format!("hello {}", i);
        client.write_all(msg.as_bytes()).unwrap();
        let mut reply = vec![0u8; msg.len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, msg.as_bytes());
    }

    assert!(wait_until(Duration::from_secs(5), || {
        dispatcher.live_contexts() == 0
    }));
    dispatcher.stop();
}

#[test]
fn at_most_one_handler_in_flight_per_descriptor() {
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let handler: Handler<EchoCtx> = {
        let active = Arc::clone(&active);
        let max_seen = Arc::clone(&max_seen);
        Arc::new(move |_ctx: &mut EchoCtx, fd: RawFd| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            // Stay in flight while more data arrives; readiness
            // events during this window must be skipped.
            thread::sleep(Duration::from_millis(100));
            let mut buf = [0u8; 512];
            let n = read_fd(fd, &mut buf);
            active.fetch_sub(1, Ordering::SeqCst);
            n <= 0
        })
    };
    let (_svc, _listener, mut dispatcher, port) = start_server(handler);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(b"first").unwrap();
    thread::sleep(Duration::from_millis(30));
    client.write_all(b"second").unwrap();
    thread::sleep(Duration::from_millis(30));
    client.write_all(b"third").unwrap();

    // Close so the handler eventually sees EOF and the connection is
    // recycled.
    drop(client);
    assert!(wait_until(Duration::from_secs(5), || {
        dispatcher.live_contexts() == 0
    }));

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    dispatcher.stop();
}

#[test]
fn stop_lets_in_flight_handler_finish_and_recycle() {
    let finished = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));

    let handler: Handler<EchoCtx> = {
        let finished = Arc::clone(&finished);
        let entered = Arc::clone(&entered);
        Arc::new(move |_ctx: &mut EchoCtx, fd: RawFd| {
            entered.store(true, Ordering::SeqCst);
            let mut buf = [0u8; 64];
            read_fd(fd, &mut buf);
            thread::sleep(Duration::from_millis(300));
            finished.store(true, Ordering::SeqCst);
            true
        })
    };
    let (_svc, _listener, mut dispatcher, port) = start_server(handler);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(b"work").unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        entered.load(Ordering::SeqCst)
    }));

    // Stop mid-execution: the handler must run to completion and its
    // connection must be recycled before stop returns.
    dispatcher.stop();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(dispatcher.live_contexts(), 0);
}

#[test]
fn dropping_dispatcher_runs_context_destructors() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct DropCtx;

    impl Drop for DropCtx {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handler: Handler<DropCtx> = Arc::new(|_ctx: &mut DropCtx, fd: RawFd| {
        let mut buf = [0u8; 64];
        let n = read_fd(fd, &mut buf);
        if n > 0 {
            write_fd(fd, &buf[..n as usize]);
        }
        false
    });
    let (_svc, _listener, dispatcher, port) = start_server(handler);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"hi").unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).unwrap();

    // The connection is still registered: dropping without stop()
    // must still run the context's destructor.
    drop(dispatcher);
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

#[test]
fn context_state_survives_across_dispatches() {
    #[derive(Default)]
    struct CountingCtx {
        seen: u32,
    }

    let total = Arc::new(AtomicUsize::new(0));
    let handler: Handler<CountingCtx> = {
        let total = Arc::clone(&total);
        Arc::new(move |ctx: &mut CountingCtx, fd: RawFd| {
            let mut buf = [0u8; 64];
            let n = read_fd(fd, &mut buf);
            if n <= 0 {
                total.store(ctx.seen as usize, Ordering::SeqCst);
                return true;
            }
            // Per-connection state lives in the slab slot between
            // dispatches.
            ctx.seen += 1;
            write_fd(fd, &buf[..n as usize]);
            false
        })
    };
    let (_svc, _listener, mut dispatcher, port) = start_server(handler);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    for msg in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        client.write_all(msg).unwrap();
        let mut reply = vec![0u8; msg.len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, msg);
    }
    drop(client);

    assert!(wait_until(Duration::from_secs(5), || {
        dispatcher.live_contexts() == 0
    }));
    assert_eq!(total.load(Ordering::SeqCst), 3);
    dispatcher.stop();
}
