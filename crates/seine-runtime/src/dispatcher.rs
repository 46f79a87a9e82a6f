//! The dispatcher: accept loop, dispatch, and completion recycling.
//!
//! Two dedicated threads per dispatcher. The accept/dispatch thread
//! blocks in the poller: listener readiness turns into an accepted
//! descriptor with a slab-backed context slot; connection readiness
//! turns into a worker-pool task, guarded by a per-descriptor
//! in-flight marker so a descriptor never has two concurrent handler
//! invocations. The recycler thread drains the completion queue,
//! awaits each task's result, and either clears the in-flight marker
//! (keep open) or tears the connection down (deregister, reclaim the
//! context slot, close the socket).
//!
//! Per-descriptor states: Unregistered -> Registered -> Dispatched ->
//! {Registered | Closing}. Closing is terminal.
//!
//! The completion queue's capacity is the runtime's backpressure
//! bound: a flooded completion path blocks the dispatch side instead
//! of growing memory.

use crate::log::Logger;
use crate::poller::{DefaultPoller, Waker};
use crate::pool::{TaskHandle, WorkerPool};
use crate::queue::BoundedQueue;
use crate::slab::SlabAllocator;
use seine_core::{Dispatches, DispatcherConfig, Error, Handler, Poller, Result};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

struct ConnEntry {
    slot: crate::slab::SlabRef,
    /// True while exactly one handler invocation is outstanding.
    inflight: bool,
}

/// Raw context pointer handed to a worker task. Exclusive access is
/// guaranteed by the in-flight marker.
struct CtxPtr<C>(*mut C);
unsafe impl<C> Send for CtxPtr<C> {}

struct Shared<C> {
    poller: DefaultPoller,
    waker: Waker,
    slab: SlabAllocator,
    /// Descriptor -> context slot mapping plus the in-flight marker,
    /// under one lock. Mutated only by the two dispatcher loops.
    conns: Mutex<HashMap<RawFd, ConnEntry>>,
    completions: BoundedQueue<(RawFd, TaskHandle<bool>)>,
    pool: WorkerPool,
    running: AtomicBool,
    _ctx: PhantomData<fn(C)>,
}

impl<C: Send + 'static> Shared<C> {
    /// Terminal transition: deregister, reclaim the slot, close the
    /// socket, erase the mapping. The entry leaves the table in one
    /// critical section so a readiness event cannot race ahead of
    /// recycling.
    fn close_connection(&self, fd: RawFd, log: &Logger) {
        let mut conns = self.conns.lock().unwrap();
        let entry = match conns.remove(&fd) {
            Some(entry) => entry,
            None => return,
        };
        if let Err(e) = self.poller.delete(fd) {
            log.warning(format!("deregister of fd {} failed: {}", fd, e));
        }
        if let Some(p) = self.slab.resolve(&entry.slot) {
            // Safety: the slot holds a live C constructed at accept;
            // the entry was just removed, so no handler can reach it.
            unsafe { ptr::drop_in_place(p.as_ptr() as *mut C) };
        }
        if let Err(e) = self.slab.deallocate(entry.slot) {
            log.error(format!("context reclaim for fd {} failed: {}", fd, e));
        }
        unsafe { libc::close(fd) };
        drop(conns);
        log.debug(format!("closed connection fd {}", fd));
    }

    fn clear_inflight(&self, fd: RawFd) {
        if let Some(entry) = self.conns.lock().unwrap().get_mut(&fd) {
            entry.inflight = false;
        }
    }
}

pub struct Dispatcher<C> {
    shared: Arc<Shared<C>>,
    config: DispatcherConfig,
    accept_thread: Option<JoinHandle<()>>,
    recycle_thread: Option<JoinHandle<()>>,
    log: Logger,
    started: bool,
}

impl<C: Default + Send + 'static> Dispatcher<C> {
    pub fn new(config: DispatcherConfig, log: Logger) -> Result<Self> {
        let poller = DefaultPoller::new(config.max_events)?;
        let waker = Waker::new()?;
        let slab = SlabAllocator::new(
            std::mem::size_of::<C>().max(1),
            config.context_blocks,
        );
        slab.initialize();
        let shared = Arc::new(Shared {
            poller,
            waker,
            slab,
            conns: Mutex::new(HashMap::new()),
            completions: BoundedQueue::with_capacity(config.completion_capacity),
            pool: WorkerPool::new(config.workers),
            running: AtomicBool::new(false),
            _ctx: PhantomData,
        });
        Ok(Self {
            shared,
            config,
            accept_thread: None,
            recycle_thread: None,
            log,
            started: false,
        })
    }

    /// Outstanding context slots, pool and heap fallback combined.
    pub fn live_contexts(&self) -> usize {
        self.shared.slab.live_allocations()
    }

    /// Times the context slab was exhausted and the heap stood in.
    pub fn context_fallbacks(&self) -> u64 {
        self.shared.slab.fallback_allocations()
    }
}

impl<C: Default + Send + 'static> Dispatches<C> for Dispatcher<C> {
    fn start(&mut self, listen_fd: RawFd, handler: Handler<C>) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.shared.poller.add(self.shared.waker.fd())?;
        self.shared.poller.add(listen_fd)?;
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let log = self.log.for_component("dispatch");
        let max_events = self.config.max_events;
        self.accept_thread = Some(
            thread::Builder::new()
                .name("seine-dispatch".into())
                .spawn(move || accept_loop(shared, listen_fd, handler, log, max_events))
                .expect("failed to spawn dispatch thread"),
        );

        let shared = Arc::clone(&self.shared);
        let log = self.log.for_component("recycle");
        self.recycle_thread = Some(
            thread::Builder::new()
                .name("seine-recycle".into())
                .spawn(move || recycle_loop(shared, log))
                .expect("failed to spawn recycle thread"),
        );

        self.started = true;
        self.log.info("dispatcher started");
        Ok(())
    }

    /// Ordered teardown: stop dispatch first so no new work is
    /// submitted, finish in-flight handlers, drain the completion
    /// queue, then reclaim whatever is still open. No allocation
    /// outlives the dispatcher.
    fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;

        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.waker.wake();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }

        self.shared.pool.shutdown();

        self.shared.completions.close();
        if let Some(handle) = self.recycle_thread.take() {
            let _ = handle.join();
        }

        // Connections that never reached the completion path.
        let remaining: Vec<RawFd> = self.shared.conns.lock().unwrap().keys().copied().collect();
        for fd in remaining {
            self.shared.close_connection(fd, &self.log);
        }
        self.log.info("dispatcher stopped");
    }
}

impl<C> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        if self.started {
            // Same ordering as stop().
            self.shared.running.store(false, Ordering::Release);
            let _ = self.shared.waker.wake();
            if let Some(handle) = self.accept_thread.take() {
                let _ = handle.join();
            }
            self.shared.pool.shutdown();
            self.shared.completions.close();
            if let Some(handle) = self.recycle_thread.take() {
                let _ = handle.join();
            }
            let mut conns = self.shared.conns.lock().unwrap();
            for (fd, entry) in conns.drain() {
                let _ = self.shared.poller.delete(fd);
                if let Some(p) = self.shared.slab.resolve(&entry.slot) {
                    // Safety: both loops are joined, so no handler can
                    // still reach the context.
                    unsafe { ptr::drop_in_place(p.as_ptr() as *mut C) };
                }
                let _ = self.shared.slab.deallocate(entry.slot);
                unsafe { libc::close(fd) };
            }
        }
    }
}

fn accept_loop<C: Default + Send + 'static>(
    shared: Arc<Shared<C>>,
    listen_fd: RawFd,
    handler: Handler<C>,
    log: Logger,
    max_events: usize,
) {
    let wake_fd = shared.waker.fd();
    let mut ready = vec![0 as RawFd; max_events.max(1)];
    while shared.running.load(Ordering::Acquire) {
        let n = match shared.poller.wait(&mut ready) {
            Ok(n) => n,
            Err(e) => {
                // Cannot proceed without readiness data; an external
                // supervisor is expected to restart the process.
                log.fatal(format!("poller wait failed, dispatch loop exiting: {}", e));
                break;
            }
        };
        for &fd in &ready[..n] {
            if fd == wake_fd {
                shared.waker.drain();
            } else if fd == listen_fd {
                accept_connection(&shared, listen_fd, &log);
            } else {
                dispatch_ready(&shared, fd, &handler, &log);
            }
        }
    }
}

fn accept_connection<C: Default + Send + 'static>(
    shared: &Shared<C>,
    listen_fd: RawFd,
    log: &Logger,
) {
    let client = unsafe { libc::accept(listen_fd, ptr::null_mut(), ptr::null_mut()) };
    if client < 0 {
        // Non-fatal: log and keep serving.
        let e = Error::Accept(seine_core::error::last_errno());
        log.error(format!("{}", e));
        return;
    }
    unsafe { libc::fcntl(client, libc::F_SETFD, libc::FD_CLOEXEC) };

    let slot = shared.slab.allocate(std::mem::size_of::<C>().max(1));
    let ctx = match shared.slab.resolve(&slot) {
        Some(p) => p.as_ptr() as *mut C,
        None => {
            let _ = shared.slab.deallocate(slot);
            unsafe { libc::close(client) };
            return;
        }
    };
    // Safety: the slot is freshly allocated, exclusively ours, and at
    // least size_of::<C>() bytes with suitable alignment.
    unsafe { ctx.write(C::default()) };

    if let Err(e) = shared.poller.add(client) {
        // Registration failure is isolated to this connection.
        log.error(format!("registration of fd {} failed: {}", client, e));
        unsafe { ptr::drop_in_place(ctx) };
        let _ = shared.slab.deallocate(slot);
        unsafe { libc::close(client) };
        return;
    }

    shared.conns.lock().unwrap().insert(
        client,
        ConnEntry {
            slot,
            inflight: false,
        },
    );
    log.debug(format!("accepted connection fd {}", client));
}

fn dispatch_ready<C: Default + Send + 'static>(
    shared: &Arc<Shared<C>>,
    fd: RawFd,
    handler: &Handler<C>,
    log: &Logger,
) {
    let ctx = {
        let mut conns = shared.conns.lock().unwrap();
        let entry = match conns.get_mut(&fd) {
            Some(entry) => entry,
            // Recycled between wait and dispatch.
            None => return,
        };
        if entry.inflight {
            // At most one concurrent handler per descriptor; this
            // readiness pass skips it, level-triggering reports again.
            return;
        }
        let p = match shared.slab.resolve(&entry.slot) {
            Some(p) => p,
            None => {
                log.error(format!("stale context slot for fd {}", fd));
                return;
            }
        };
        entry.inflight = true;
        CtxPtr(p.as_ptr() as *mut C)
    };

    let handler = Arc::clone(handler);
    let task = move || {
        let ctx = ctx;
        // Safety: the in-flight marker gives this task exclusive
        // access to the context slot until its completion is recycled.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            handler(&mut *ctx.0, fd)
        }));
        // A panicking handler closes its own connection, nothing else.
        result.unwrap_or(true)
    };

    match shared.pool.enqueue(task) {
        Ok(handle) => {
            // Backpressure point: blocks while the completion queue is
            // at capacity.
            if shared.completions.push((fd, handle)).is_err() {
                // Queue closed mid-shutdown; stop() reclaims the fd.
                shared.clear_inflight(fd);
            }
        }
        Err(_) => shared.clear_inflight(fd),
    }
}

fn recycle_loop<C: Send + 'static>(shared: Arc<Shared<C>>, log: Logger) {
    while let Some((fd, handle)) = shared.completions.wait_and_pop() {
        // Await the result before branching — never treat an
        // unpopulated completion as a close signal. An aborted task
        // (pool shutdown) closes the connection.
        let should_close = handle.wait().unwrap_or(true);
        if should_close {
            shared.close_connection(fd, &log);
        } else {
            // Keep open: the marker leaves the in-flight set last,
            // after the handler's completion has been fully consumed.
            shared.clear_inflight(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Level, LogConfig, LogService};

    #[derive(Default)]
    struct Ctx {
        count: u32,
    }

    fn quiet_logger() -> (LogService, Logger) {
        let service =
            LogService::start(LogConfig::default().min_level(Level::Fatal)).unwrap();
        let log = service.logger("test");
        (service, log)
    }

    #[test]
    fn new_dispatcher_has_no_live_contexts() {
        let (_svc, log) = quiet_logger();
        let d: Dispatcher<Ctx> =
            Dispatcher::new(DispatcherConfig::default().workers(2), log).unwrap();
        assert_eq!(d.live_contexts(), 0);
        assert_eq!(d.context_fallbacks(), 0);
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let (_svc, log) = quiet_logger();
        let mut d: Dispatcher<Ctx> =
            Dispatcher::new(DispatcherConfig::default().workers(2), log).unwrap();
        d.stop();
        d.stop();
    }
}
