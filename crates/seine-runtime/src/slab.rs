//! Slab allocator for per-connection context memory.
//!
//! A fixed pool of fixed-size blocks, reserved once. Sub-allocations
//! bump an offset inside a block and hold a ref-count on it; a block
//! is only reset and reused once its ref-count is provably zero
//! (lazy reclamation on a later allocation scan). Under total
//! exhaustion the allocator degrades to the global heap and bumps a
//! counter — allocation never blocks and never fails the caller.
//!
//! Handles are generation-tagged: a [`SlabRef`] into a block that has
//! since been reset fails validation instead of aliasing the block's
//! new tenant.
//!
//! A single pool-wide mutex guards every mutating operation.
//! Correctness over throughput: context slots are small and
//! allocation happens once per accepted connection, not per byte.

use seine_core::{Error, Result};

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Per-allocation length header. 16 bytes keeps user regions aligned
/// for any context type up to 16-byte alignment.
const HEADER: usize = 16;

/// Pool memory alignment.
const POOL_ALIGN: usize = 16;

/// Blocks skipped for lack of space before the front index advances
/// and the skipped block is marked `Deallocating`.
const SKIP_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Accepting bump allocations.
    Allocatable,
    /// Excluded from allocation, waiting for its ref-count to drain.
    Deallocating,
    /// Ref-count zero; reset lazily on a later allocation pass.
    Deallocatable,
}

struct Block {
    state: BlockState,
    ref_count: u32,
    offset: usize,
    generation: u32,
}

impl Block {
    fn new() -> Self {
        Self {
            state: BlockState::Allocatable,
            ref_count: 0,
            offset: 0,
            generation: 0,
        }
    }

    fn reset(&mut self) {
        self.state = BlockState::Allocatable;
        self.ref_count = 0;
        self.offset = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

struct PoolMemory {
    base: NonNull<u8>,
    layout: Layout,
}

// The raw pool pointer is only touched under the pool mutex or
// through validated handles into disjoint regions.
unsafe impl Send for PoolMemory {}

impl Drop for PoolMemory {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

struct SlabInner {
    memory: Option<PoolMemory>,
    blocks: Vec<Block>,
    /// Rotating scan start, so reclamation wear spreads across blocks.
    front: usize,
}

/// Where a [`SlabRef`] points.
#[derive(Debug)]
enum Loc {
    Pool {
        block: usize,
        offset: usize,
        generation: u32,
    },
    Heap {
        ptr: NonNull<u8>,
        layout: Layout,
    },
}

/// Generation-tagged handle to one allocation.
///
/// Resolve through [`SlabAllocator::resolve`] before dereferencing;
/// a handle whose block has been reset resolves to `None` instead of
/// aliasing reused memory.
#[derive(Debug)]
pub struct SlabRef {
    loc: Loc,
}

// A SlabRef is an exclusive handle; the memory it names is touched by
// one owner at a time per the dispatcher's in-flight discipline.
unsafe impl Send for SlabRef {}

impl SlabRef {
    /// True if this allocation fell back to the general heap.
    pub fn is_fallback(&self) -> bool {
        matches!(self.loc, Loc::Heap { .. })
    }
}

pub struct SlabAllocator {
    block_size: usize,
    num_blocks: usize,
    inner: Mutex<SlabInner>,
    initialized: AtomicBool,
    live: AtomicUsize,
    fallbacks: AtomicU64,
    double_frees: AtomicU64,
}

impl SlabAllocator {
    /// Describe a pool of `num_blocks` blocks of `block_size` usable
    /// bytes each. No memory is reserved until [`initialize`].
    ///
    /// [`initialize`]: SlabAllocator::initialize
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        // Room for one maximal allocation plus its header, rounded so
        // every block keeps the pool alignment.
        let block_size = align_up(block_size.max(HEADER) + HEADER, POOL_ALIGN);
        Self {
            block_size,
            num_blocks: num_blocks.max(1),
            inner: Mutex::new(SlabInner {
                memory: None,
                blocks: Vec::new(),
                front: 0,
            }),
            initialized: AtomicBool::new(false),
            live: AtomicUsize::new(0),
            fallbacks: AtomicU64::new(0),
            double_frees: AtomicU64::new(0),
        }
    }

    /// Reserve the pool memory exactly once. Idempotent and
    /// thread-safe: an atomic fast path in front of the pool mutex.
    pub fn initialize(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        self.initialize_locked(&mut inner);
    }

    fn initialize_locked(&self, inner: &mut SlabInner) {
        if inner.memory.is_some() {
            return;
        }
        let total = self.block_size * self.num_blocks;
        let layout = Layout::from_size_align(total, POOL_ALIGN).expect("pool layout");
        // Safety: layout has non-zero size (block_size >= 32, num_blocks >= 1).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw).expect("pool reservation failed");
        inner.memory = Some(PoolMemory { base, layout });
        inner.blocks = (0..self.num_blocks).map(|_| Block::new()).collect();
        self.initialized.store(true, Ordering::Release);
    }

    /// Allocate at least `size` usable bytes. Never blocks beyond the
    /// pool mutex and never fails: exhaustion degrades to the heap.
    pub fn allocate(&self, size: usize) -> SlabRef {
        let size = size.max(1);
        let mut guard = self.inner.lock().unwrap();
        self.initialize_locked(&mut guard);
        let inner = &mut *guard;

        let needed = HEADER + align_up(size, HEADER);
        let mut skips = 0usize;
        if needed <= self.block_size {
            for step in 0..self.num_blocks {
                let idx = (inner.front + step) % self.num_blocks;

                if inner.blocks[idx].state == BlockState::Deallocatable {
                    inner.blocks[idx].reset();
                }
                if inner.blocks[idx].state != BlockState::Allocatable {
                    continue;
                }
                let cur_offset = inner.blocks[idx].offset;
                if cur_offset + needed > self.block_size {
                    skips += 1;
                    if skips > SKIP_LIMIT {
                        // Hasten reclamation of the crowded block and
                        // rotate the scan start past it.
                        let b = &mut inner.blocks[idx];
                        b.state = if b.ref_count == 0 {
                            BlockState::Deallocatable
                        } else {
                            BlockState::Deallocating
                        };
                        inner.front = (idx + 1) % self.num_blocks;
                        skips = 0;
                    }
                    continue;
                }

                let generation = inner.blocks[idx].generation;
                // Length header precedes the user region.
                // Safety: idx and cur_offset are in bounds; the pool
                // memory was reserved by initialize_locked above.
                unsafe {
                    let base = inner.memory.as_ref().unwrap().base.as_ptr();
                    let header = base.add(idx * self.block_size + cur_offset) as *mut u64;
                    header.write(size as u64);
                }
                let block = &mut inner.blocks[idx];
                block.offset += needed;
                block.ref_count += 1;
                inner.front = idx;

                self.live.fetch_add(1, Ordering::Relaxed);
                return SlabRef {
                    loc: Loc::Pool {
                        block: idx,
                        offset: cur_offset + HEADER,
                        generation,
                    },
                };
            }
        }
        drop(guard);

        // Pool exhausted or request oversized: degrade to the heap.
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        let layout = Layout::from_size_align(align_up(size, POOL_ALIGN), POOL_ALIGN)
            .expect("fallback layout");
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).expect("heap fallback failed");
        SlabRef {
            loc: Loc::Heap { ptr, layout },
        }
    }

    /// Validate a handle and yield its pointer. `None` for a stale
    /// handle whose block has been reset or fully reclaimed.
    pub fn resolve(&self, slab_ref: &SlabRef) -> Option<NonNull<u8>> {
        match slab_ref.loc {
            Loc::Heap { ptr, .. } => Some(ptr),
            Loc::Pool {
                block,
                offset,
                generation,
            } => {
                let inner = self.inner.lock().unwrap();
                let memory = inner.memory.as_ref()?;
                let b = inner.blocks.get(block)?;
                if b.generation != generation || b.state == BlockState::Deallocatable {
                    return None;
                }
                // Safety: block/offset validated against live pool state.
                let ptr = unsafe {
                    memory
                        .base
                        .as_ptr()
                        .add(block * self.block_size + offset)
                };
                NonNull::new(ptr)
            }
        }
    }

    /// Return an allocation. A handle into an already reclaimed block
    /// is a caller bug: reported as an error, counted, and otherwise a
    /// no-op — pool state stays consistent and the process continues.
    pub fn deallocate(&self, slab_ref: SlabRef) -> Result<()> {
        match slab_ref.loc {
            Loc::Heap { ptr, layout } => {
                // Safety: pointer and layout come from allocate()'s
                // fallback path and are freed exactly once (SlabRef is
                // consumed by value).
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                self.live.fetch_sub(1, Ordering::Relaxed);
                Ok(())
            }
            Loc::Pool {
                block, generation, ..
            } => {
                let mut inner = self.inner.lock().unwrap();
                let b = match inner.blocks.get_mut(block) {
                    Some(b) => b,
                    None => {
                        self.double_frees.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::StaleHandle);
                    }
                };
                if b.generation != generation {
                    self.double_frees.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::StaleHandle);
                }
                if b.state == BlockState::Deallocatable || b.ref_count == 0 {
                    self.double_frees.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::DoubleFree);
                }
                b.ref_count -= 1;
                if b.ref_count == 0 {
                    b.state = BlockState::Deallocatable;
                }
                self.live.fetch_sub(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Outstanding (un-deallocated) allocations, pool and fallback.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Times the pool was exhausted and the heap stood in.
    pub fn fallback_allocations(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Reported double-free / stale-handle incidents.
    pub fn double_frees(&self) -> u64 {
        self.double_frees.load(Ordering::Relaxed)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
