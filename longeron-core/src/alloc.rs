//! Allocation primitives for Longeron
//!
//! This module is the ONLY place where unsafe memory manipulation is allowed.
//! All invariants are enforced here so the rest of the system can remain 100% safe.
//!
//! The slab is carved into fixed-size units at construction. A unit is either
//! in the free list or leased to exactly one [`ByteBuf`]. Leases are returned
//! by `Drop`: when the last handle over a unit's memory goes away, the unit
//! index is pushed back onto the owning pool's free list. Exhaustion degrades
//! to plain heap allocation and bumps a counter; it never blocks or fails.
//!
//! Everything here is loop-local by construction (`Rc`, `Cell`, `RefCell`),
//! so the hot allocate/release path takes no locks. Cross-thread use is a
//! compile error, not a data race.

#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use compio::buf::{IoBuf, IoBufMut, SetBufInit};
use thiserror::Error;

/// Cache-line alignment for the slab base to avoid false sharing with
/// neighboring allocations.
pub const SLAB_ALIGN: usize = 128;

/// Writing past a fixed-capacity pooled buffer.
///
/// Heap-backed buffers grow instead of producing this error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("buffer overflow: need {need} bytes, {writable} writable")]
pub struct BufferOverflow {
    /// Bytes the caller attempted to append
    pub need: usize,
    /// Writable bytes remaining in the fixed-capacity buffer
    pub writable: usize,
}

/// Pool sizing parameters.
///
/// `capacity` units of `unit` bytes each are reserved per worker at loop
/// startup and never grown afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of one pool unit in bytes
    pub unit: usize,
    /// Number of units held by each worker's pool
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            unit: 512,
            capacity: 4096,
        }
    }
}

impl PoolConfig {
    /// Create a config with explicit unit size and unit count.
    ///
    /// # Panics
    ///
    /// Panics if `unit` is zero.
    #[must_use]
    pub fn new(unit: usize, capacity: usize) -> Self {
        assert!(unit > 0, "pool unit size must be non-zero");
        Self { unit, capacity }
    }

    /// Derive per-worker capacity from a total memory budget.
    ///
    /// `capacity = total_budget / (unit * workers * overcommit_rate)`,
    /// clamped to at least one unit. The overcommit rate models how much of
    /// the nominal budget is expected to be in flight at once.
    #[must_use]
    pub fn derive(total_budget: usize, unit: usize, workers: usize, overcommit_rate: usize) -> Self {
        assert!(unit > 0, "pool unit size must be non-zero");
        let denom = unit * workers.max(1) * overcommit_rate.max(1);
        let capacity = (total_budget / denom).max(1);
        Self { unit, capacity }
    }

    /// Small units, latency-oriented (512 B x 1024).
    #[must_use]
    pub const fn small() -> Self {
        Self {
            unit: 512,
            capacity: 1024,
        }
    }

    /// Large units, throughput-oriented (4 KiB x 8192).
    #[must_use]
    pub const fn large() -> Self {
        Self {
            unit: 4096,
            capacity: 8192,
        }
    }

    /// Total bytes the slab will reserve.
    #[must_use]
    pub const fn slab_bytes(&self) -> usize {
        self.unit * self.capacity
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Unit size in bytes
    pub unit: usize,
    /// Total units owned by the pool
    pub capacity: usize,
    /// Units currently leased out
    pub leased: usize,
    /// Allocations that fell back to the heap because the pool was empty
    pub unpooled_fallbacks: u64,
}

/// The contiguous slab backing one pool.
///
/// Invariant:
/// - Memory is allocated once and never moved.
/// - Freed only when the owning `PoolInner` is dropped, which cannot happen
///   while any lease is alive (leases hold an `Rc` to the pool).
struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Slab {
    fn reserve(bytes: usize) -> Self {
        let layout = Layout::from_size_align(bytes.max(1), SLAB_ALIGN)
            .expect("slab layout parameters are validated by PoolConfig");
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            std::alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

struct PoolInner {
    slab: Slab,
    unit: usize,
    capacity: usize,
    free: RefCell<Vec<u32>>,
    leased: Cell<usize>,
    unpooled_fallbacks: Cell<u64>,
}

impl PoolInner {
    /// Lease one unit from the free list, if any.
    fn lease(inner: &Rc<Self>) -> Option<Rc<UnitMem>> {
        let index = inner.free.borrow_mut().pop()?;
        inner.leased.set(inner.leased.get() + 1);
        debug_assert!(inner.leased.get() <= inner.capacity);

        // The index came off the free list, so this unit's memory has no
        // other live handle over it.
        let ptr = unsafe {
            NonNull::new_unchecked(inner.slab.ptr.as_ptr().add(index as usize * inner.unit))
        };
        Some(Rc::new(UnitMem {
            ptr,
            cap: inner.unit,
            owner: MemOwner::Pooled {
                pool: Rc::clone(inner),
                index,
            },
        }))
    }
}

/// One fixed-unit slab pool, owned by a single worker loop.
///
/// Cloning the handle is cheap and shares the same pool. The type is not
/// `Send`: each worker constructs its own pool and no free list is ever
/// shared across threads.
#[derive(Clone)]
pub struct PagePool {
    inner: Rc<PoolInner>,
}

impl PagePool {
    /// Build a pool, reserving `config.slab_bytes()` up front.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let slab = Slab::reserve(config.slab_bytes());
        // LIFO free list: the most recently released unit is the next
        // leased, keeping hot units cache-warm.
        let free: Vec<u32> = (0..config.capacity as u32).rev().collect();
        Self {
            inner: Rc::new(PoolInner {
                slab,
                unit: config.unit,
                capacity: config.capacity,
                free: RefCell::new(free),
                leased: Cell::new(0),
                unpooled_fallbacks: Cell::new(0),
            }),
        }
    }

    /// Allocate a buffer of at least `size_hint` bytes.
    ///
    /// Requests that fit one unit are served from the pool when a free unit
    /// exists (the returned buffer's capacity is the full unit size).
    /// Larger requests, and requests made while the pool is empty, fall back
    /// to the heap; the fallback count is observable via [`Self::stats`] for
    /// backpressure decisions.
    #[must_use]
    pub fn allocate(&self, size_hint: usize) -> ByteBuf {
        if size_hint <= self.inner.unit {
            if let Some(mem) = PoolInner::lease(&self.inner) {
                return ByteBuf {
                    mem,
                    read: 0,
                    write: 0,
                };
            }
            self.inner
                .unpooled_fallbacks
                .set(self.inner.unpooled_fallbacks.get() + 1);
            tracing::trace!(
                "[POOL] exhausted ({} units leased), falling back to heap",
                self.inner.leased.get()
            );
        }
        ByteBuf::with_capacity(size_hint)
    }

    /// Unit size in bytes.
    #[must_use]
    pub fn unit(&self) -> usize {
        self.inner.unit
    }

    /// Snapshot the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            unit: self.inner.unit,
            capacity: self.inner.capacity,
            leased: self.inner.leased.get(),
            unpooled_fallbacks: self.inner.unpooled_fallbacks.get(),
        }
    }
}

/// Read-mostly index of per-worker pool unit sizes.
///
/// Lets code outside a loop (a connector on another thread, for instance)
/// size a buffer for the target loop without touching that loop's free
/// list. Free lists themselves are never shared.
#[derive(Debug, Clone)]
pub struct PoolGroup {
    units: Arc<[usize]>,
}

impl PoolGroup {
    #[must_use]
    pub fn new(configs: &[PoolConfig]) -> Self {
        Self {
            units: configs.iter().map(|c| c.unit).collect(),
        }
    }

    /// Unit size of the pool owned by `worker`.
    #[must_use]
    pub fn unit_of(&self, worker: usize) -> Option<usize> {
        self.units.get(worker).copied()
    }

    /// Number of workers indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Backing memory for one buffer: a pooled unit or a heap block.
///
/// Shared via `Rc` between a `ByteBuf` and any `ByteView`s carved from it.
/// Dropping the last handle releases the memory: pooled units go back to
/// their pool's free list, heap blocks are deallocated.
struct UnitMem {
    ptr: NonNull<u8>,
    cap: usize,
    owner: MemOwner,
}

enum MemOwner {
    Pooled { pool: Rc<PoolInner>, index: u32 },
    Heap { layout: Layout },
}

impl UnitMem {
    fn heap(capacity: usize) -> Rc<Self> {
        let capacity = capacity.max(1);
        let layout = Layout::from_size_align(capacity, 1).expect("non-zero heap buffer size");
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            std::alloc::handle_alloc_error(layout);
        };
        Rc::new(Self {
            ptr,
            cap: capacity,
            owner: MemOwner::Heap { layout },
        })
    }

    #[inline]
    fn is_pooled(&self) -> bool {
        matches!(self.owner, MemOwner::Pooled { .. })
    }
}

impl Drop for UnitMem {
    fn drop(&mut self) {
        match &self.owner {
            MemOwner::Pooled { pool, index } => {
                pool.free.borrow_mut().push(*index);
                pool.leased.set(pool.leased.get() - 1);
            }
            MemOwner::Heap { layout } => unsafe {
                dealloc(self.ptr.as_ptr(), *layout);
            },
        }
    }
}

/// A uniquely-owned buffer with independent read and write cursors.
///
/// Invariant: `0 <= read <= write <= capacity`. Readable bytes are
/// `[read, write)`; writable bytes are `[write, capacity)`. The type is not
/// `Clone`: sharing happens only through [`ByteBuf::split_to`] and
/// [`ByteBuf::freeze`], which hand out immutable [`ByteView`]s over already
/// written bytes. That keeps mutation and aliasing disjoint by region.
///
/// Pooled buffers have fixed capacity and report [`BufferOverflow`] when
/// full; heap buffers grow by reallocating and compacting.
pub struct ByteBuf {
    mem: Rc<UnitMem>,
    read: usize,
    write: usize,
}

impl ByteBuf {
    /// Allocate a heap-backed buffer, bypassing any pool.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mem: UnitMem::heap(capacity),
            read: 0,
            write: 0,
        }
    }

    /// Whether the backing memory is a pooled unit.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.mem.is_pooled()
    }

    /// Total capacity of the backing memory.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mem.cap
    }

    /// Bytes available to read: `write - read`.
    #[must_use]
    pub fn readable(&self) -> usize {
        self.write - self.read
    }

    /// Bytes available to write: `capacity - write`.
    #[must_use]
    pub fn writable(&self) -> usize {
        self.mem.cap - self.write
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readable() == 0
    }

    /// The readable region `[read, write)`.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // Bytes below the write cursor are initialized: they were either
        // appended through put_slice or reported by set_buf_init after a
        // completed read.
        unsafe {
            std::slice::from_raw_parts(self.mem.ptr.as_ptr().add(self.read), self.readable())
        }
    }

    /// Consume `n` readable bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.readable()`.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.readable());
        self.read += n;
    }

    /// Append `src` after the write cursor.
    ///
    /// Heap buffers grow as needed (compacting consumed bytes away in the
    /// process). Pooled buffers are fixed-size and return
    /// [`BufferOverflow`] instead.
    pub fn put_slice(&mut self, src: &[u8]) -> std::result::Result<(), BufferOverflow> {
        if src.len() > self.writable() {
            if self.mem.is_pooled() {
                return Err(BufferOverflow {
                    need: src.len(),
                    writable: self.writable(),
                });
            }
            self.grow(self.readable() + src.len());
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.mem.ptr.as_ptr().add(self.write),
                src.len(),
            );
        }
        self.write += src.len();
        Ok(())
    }

    /// Reset both cursors so the whole capacity is writable again.
    ///
    /// If views still share the backing memory, fresh memory of the same
    /// kind is taken instead so the shared bytes stay intact.
    pub fn reset(&mut self) {
        if Rc::strong_count(&self.mem) > 1 {
            self.mem = match &self.mem.owner {
                MemOwner::Pooled { pool, .. } => {
                    let pool = Rc::clone(pool);
                    PoolInner::lease(&pool).unwrap_or_else(|| UnitMem::heap(self.mem.cap))
                }
                MemOwner::Heap { .. } => UnitMem::heap(self.mem.cap),
            };
        }
        self.read = 0;
        self.write = 0;
    }

    /// Carve the first `n` readable bytes off as a shared view, consuming
    /// them from this buffer. Zero-copy: only a refcount changes hands.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.readable()`.
    #[must_use]
    pub fn split_to(&mut self, n: usize) -> ByteView {
        assert!(n <= self.readable());
        let view = ByteView {
            mem: Rc::clone(&self.mem),
            start: self.read,
            end: self.read + n,
        };
        self.read += n;
        view
    }

    /// Freeze the readable region into a shared view, giving up write
    /// access to the backing memory.
    #[must_use]
    pub fn freeze(self) -> ByteView {
        ByteView {
            start: self.read,
            end: self.write,
            mem: self.mem,
        }
    }

    /// Reallocate heap backing so at least `min_capacity` bytes fit,
    /// compacting already-consumed bytes away. Existing views keep the old
    /// memory alive through their own handles.
    fn grow(&mut self, min_capacity: usize) {
        debug_assert!(!self.mem.is_pooled());
        let new_cap = min_capacity.next_power_of_two().max(64);
        let fresh = UnitMem::heap(new_cap);
        let readable = self.readable();
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.mem.ptr.as_ptr().add(self.read),
                fresh.ptr.as_ptr(),
                readable,
            );
        }
        self.mem = fresh;
        self.read = 0;
        self.write = readable;
    }
}

impl std::fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuf")
            .field("pooled", &self.is_pooled())
            .field("read", &self.read)
            .field("write", &self.write)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// SAFETY: ByteBuf upholds IoBuf invariants:
// - as_buf_ptr() points at the start of the backing memory
// - [ptr, ptr + write) is initialized
// - The memory is pinned for the lifetime of the Rc and never moves
unsafe impl IoBuf for ByteBuf {
    #[inline]
    fn as_buf_ptr(&self) -> *const u8 {
        self.mem.ptr.as_ptr()
    }

    #[inline]
    fn buf_len(&self) -> usize {
        self.write
    }

    #[inline]
    fn buf_capacity(&self) -> usize {
        self.mem.cap
    }
}

// SAFETY: ByteBuf upholds IoBufMut invariants:
// - as_buf_mut_ptr() points at pinned, exclusively-writable memory past the
//   write cursor (views never cover unwritten bytes)
// - set_buf_init only ever extends the initialized region
unsafe impl IoBufMut for ByteBuf {
    #[inline]
    fn as_buf_mut_ptr(&mut self) -> *mut u8 {
        self.mem.ptr.as_ptr()
    }
}

impl SetBufInit for ByteBuf {
    #[inline]
    unsafe fn set_buf_init(&mut self, len: usize) {
        debug_assert!(len <= self.mem.cap);
        if len > self.write {
            self.write = len;
        }
    }
}

/// An immutable, reference-counted view over written bytes.
///
/// `clone` is the retain operation; dropping the last view (and the
/// originating buffer) releases the backing memory, returning pooled units
/// to their free list. Slicing and splitting are zero-copy.
pub struct ByteView {
    mem: Rc<UnitMem>,
    start: usize,
    end: usize,
}

impl ByteView {
    /// An empty view with no backing memory lease.
    #[must_use]
    pub fn empty() -> Self {
        // A zero-length heap block; never read through.
        Self {
            mem: UnitMem::heap(1),
            start: 0,
            end: 0,
        }
    }

    /// Copy a slice into a fresh heap-backed view.
    #[must_use]
    pub fn copy_from_slice(src: &[u8]) -> Self {
        let mut buf = ByteBuf::with_capacity(src.len());
        buf.put_slice(src)
            .expect("heap buffers grow instead of overflowing");
        buf.freeze()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mem.ptr.as_ptr().add(self.start), self.len()) }
    }

    /// Zero-copy sub-view.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        assert!(range.start <= range.end && range.end <= self.len());
        Self {
            mem: Rc::clone(&self.mem),
            start: self.start + range.start,
            end: self.start + range.end,
        }
    }

    /// Split off the first `n` bytes as their own view.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    #[must_use]
    pub fn split_to(&mut self, n: usize) -> Self {
        assert!(n <= self.len());
        let head = Self {
            mem: Rc::clone(&self.mem),
            start: self.start,
            end: self.start + n,
        };
        self.start += n;
        head
    }

    /// Drop the first `n` bytes from this view.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len());
        self.start += n;
    }
}

impl Clone for ByteView {
    /// Retain: bumps the backing memory's reference count.
    fn clone(&self) -> Self {
        Self {
            mem: Rc::clone(&self.mem),
            start: self.start,
            end: self.end,
        }
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for ByteView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteView")
            .field("len", &self.len())
            .field("pooled", &self.mem.is_pooled())
            .finish()
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteView {}

// SAFETY: ByteView is immutable over initialized bytes:
// - the region [start, end) was written before the view existed
// - no writer ever touches bytes below a live view's end
// - the Rc keeps the memory pinned and alive
unsafe impl IoBuf for ByteView {
    #[inline]
    fn as_buf_ptr(&self) -> *const u8 {
        unsafe { self.mem.ptr.as_ptr().add(self.start) }
    }

    #[inline]
    fn buf_len(&self) -> usize {
        self.len()
    }

    #[inline]
    fn buf_capacity(&self) -> usize {
        self.len()
    }
}

/// One outbound chunk: a pool-backed view or heap-shared [`Bytes`].
///
/// Lets encoders emit pooled headers and user-supplied `Bytes` bodies into
/// the same write queue without copying either.
#[derive(Debug, Clone)]
pub enum WireBuf {
    /// Pool- or heap-backed view produced inside the owning loop
    View(ByteView),
    /// Heap-shared bytes, typically a caller-provided body
    Bytes(Bytes),
}

impl WireBuf {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::View(v) => v.len(),
            Self::Bytes(b) => b.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::View(v) => v.as_slice(),
            Self::Bytes(b) => b,
        }
    }

    /// Drop the first `n` bytes, keeping the remainder queued.
    pub fn advance(&mut self, n: usize) {
        match self {
            Self::View(v) => v.advance(n),
            Self::Bytes(b) => bytes::Buf::advance(b, n),
        }
    }
}

impl From<ByteView> for WireBuf {
    fn from(view: ByteView) -> Self {
        Self::View(view)
    }
}

impl From<Bytes> for WireBuf {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

// SAFETY: both variants are immutable refcounted regions with stable
// pointers (ByteView per above; Bytes is refcounted and contiguous).
unsafe impl IoBuf for WireBuf {
    #[inline]
    fn as_buf_ptr(&self) -> *const u8 {
        match self {
            Self::View(v) => v.as_buf_ptr(),
            Self::Bytes(b) => b.as_ptr(),
        }
    }

    #[inline]
    fn buf_len(&self) -> usize {
        self.len()
    }

    #[inline]
    fn buf_capacity(&self) -> usize {
        self.len()
    }
}
