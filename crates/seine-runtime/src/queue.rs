//! Blocking bounded MPMC queue.
//!
//! `Mutex<VecDeque>` + two condvars, one per direction. This is the
//! sole backpressure mechanism in the runtime: a full completion
//! queue blocks the dispatch side rather than growing memory
//! unboundedly.
//!
//! `empty()` and `len()` are point-in-time snapshots for diagnostics,
//! not synchronization primitives.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
}

pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Unbounded queue — no backpressure until a capacity is set.
    pub fn new() -> Self {
        Self::with_bound(None)
    }

    /// Queue bounded at `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_bound(Some(capacity))
    }

    fn with_bound(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Change the capacity after construction. Waiting pushers are
    /// woken to re-check.
    pub fn set_capacity(&self, capacity: usize) {
        let mut st = self.state.lock().unwrap();
        st.capacity = Some(capacity);
        drop(st);
        self.not_full.notify_all();
    }

    /// Enqueue, blocking while the queue is at capacity. Returns the
    /// item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.closed {
                return Err(item);
            }
            match st.capacity {
                Some(cap) if st.items.len() >= cap => {
                    st = self.not_full.wait(st).unwrap();
                }
                _ => break,
            }
        }
        st.items.push_back(item);
        drop(st);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue in FIFO order, blocking until an element is available.
    /// Returns `None` only once the queue is closed and drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut st = self.state.lock().unwrap();
        loop {
            if let Some(item) = st.items.pop_front() {
                drop(st);
                self.not_full.notify_one();
                return Some(item);
            }
            if st.closed {
                return None;
            }
            st = self.not_empty.wait(st).unwrap();
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<T> {
        let mut st = self.state.lock().unwrap();
        let item = st.items.pop_front();
        drop(st);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue: blocked pushers get their item back, poppers
    /// drain what remains and then see `None`.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        drop(st);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn empty(&self) -> bool {
        self.state.lock().unwrap().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = BoundedQueue::new();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.wait_and_pop(), Some(1));
        assert_eq!(q.wait_and_pop(), Some(2));
        assert_eq!(q.wait_and_pop(), Some(3));
    }

    #[test]
    fn try_pop_on_empty() {
        let q: BoundedQueue<u32> = BoundedQueue::new();
        assert_eq!(q.try_pop(), None);
        q.push(7).unwrap();
        assert_eq!(q.try_pop(), Some(7));
    }

    #[test]
    fn push_blocks_at_capacity() {
        let q = Arc::new(BoundedQueue::with_capacity(2));
        q.push('a').unwrap();
        q.push('b').unwrap();

        let blocked = Arc::new(AtomicBool::new(true));
        let q2 = Arc::clone(&q);
        let b2 = Arc::clone(&blocked);
        let pusher = thread::spawn(move || {
            q2.push('c').unwrap();
            b2.store(false, Ordering::SeqCst);
        });

        // The third push must still be blocked.
        thread::sleep(Duration::from_millis(100));
        assert!(blocked.load(Ordering::SeqCst));

        // One pop unblocks it.
        assert_eq!(q.wait_and_pop(), Some('a'));
        pusher.join().unwrap();
        assert!(!blocked.load(Ordering::SeqCst));
        assert_eq!(q.wait_and_pop(), Some('b'));
        assert_eq!(q.wait_and_pop(), Some('c'));
    }

    #[test]
    fn close_wakes_poppers() {
        let q: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new());
        let q2 = Arc::clone(&q);
        let popper = thread::spawn(move || q2.wait_and_pop());
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn close_drains_before_none() {
        let q = BoundedQueue::new();
        q.push(1).unwrap();
        assert!(!q.is_closed());
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.wait_and_pop(), Some(1));
        assert_eq!(q.wait_and_pop(), None);
        assert_eq!(q.push(2), Err(2));
    }

    #[test]
    fn set_capacity_after_construction() {
        let q = BoundedQueue::new();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.set_capacity(1);
        // Existing overflow is tolerated; new pushes block until drained.
        assert_eq!(q.len(), 2);
    }
}
