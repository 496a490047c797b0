//! Pluggable memory-allocation capability.
//!
//! Every component in this crate takes a [`MemoryResource`] at construction
//! and never touches any other memory source: slab storage, the slab
//! directory, ring buffer slots, successor lists, payload blocks and shared
//! store entries all come from (and go back to) the resource they were built
//! with. This is the single seam for arenas, instrumentation or alternative
//! allocators supplied by the embedder.
//!
//! # Implementors
//!
//! - [`SystemResource`]: the global allocator (the default).
//! - [`CountingResource`]: decorator tracking live allocations and bytes.
//! - [`TracingResource`]: decorator emitting a trace event per call.
//! - `MimallocResource`: mimalloc, behind the `mimalloc` feature.

use std::alloc::{self as StdAlloc, Layout};
use std::fmt as StdFmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tracing_helpers::trace_log;

/// Shared, type-erased handle to a [`MemoryResource`].
///
/// Components clone this so that the storage they own can always be
/// returned to the resource that produced it.
pub type SharedResource = Arc<dyn MemoryResource>;

/// Allocation capability consumed by every component.
///
/// The `(size, alignment)` pair is carried as a [`Layout`].
///
/// # Contract
///
/// - `allocate` is never called with a zero-sized layout by this crate.
/// - A pointer returned by `allocate(layout)` is passed back to
///   `deallocate` with the same `layout` exactly once.
/// - Implementations must be usable from any thread.
pub trait MemoryResource: Send + Sync {
    /// Allocate a block satisfying `layout`.
    ///
    /// Returns `None` when the resource is out of memory.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return a block to the resource.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this resource with the
    /// same `layout`, and must not have been deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Allocate `layout`, treating exhaustion of the resource as fatal.
    ///
    /// Zero-sized layouts never reach the resource; a dangling, well-aligned
    /// pointer is returned instead.
    fn allocate_or_abort(&self, layout: Layout) -> NonNull<u8> {
        if layout.size() == 0 {
            return dangling(layout);
        }

        match self.allocate(layout) {
            Some(ptr) => ptr,
            None => StdAlloc::handle_alloc_error(layout),
        }
    }

    /// Counterpart of [`allocate_or_abort`](MemoryResource::allocate_or_abort).
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](MemoryResource::deallocate), with `ptr`
    /// obtained from `allocate_or_abort(layout)`.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: Non-zero layouts went through `allocate`.
            unsafe { self.deallocate(ptr, layout) };
        }
    }
}

impl StdFmt::Debug for dyn MemoryResource {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str("dyn MemoryResource")
    }
}

/// Dangling pointer aligned for `layout`.
#[inline]
fn dangling(layout: Layout) -> NonNull<u8> {
    // Alignment is a non-zero power of two, so the address is never null.
    NonNull::new(std::ptr::without_provenance_mut(layout.align())).unwrap_or(NonNull::dangling())
}

/// Default resource backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResource;

impl SystemResource {
    /// Shared handle to the system resource.
    #[must_use]
    pub fn shared() -> SharedResource {
        Arc::new(Self)
    }
}

impl MemoryResource for SystemResource {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() != 0, "zero-sized allocation");

        // SAFETY: The crate never requests zero-sized layouts (see contract).
        NonNull::new(unsafe { StdAlloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees ptr came from `alloc` with this layout.
        unsafe { StdAlloc::dealloc(ptr.as_ptr(), layout) };
    }
}

// ============================================================================
//  CountingResource
// ============================================================================

/// Snapshot of a [`CountingResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    /// Total successful `allocate` calls.
    pub allocations: usize,
    /// Total `deallocate` calls.
    pub deallocations: usize,
    /// Bytes currently handed out.
    pub live_bytes: usize,
    /// Highest value `live_bytes` reached.
    pub peak_bytes: usize,
}

impl AllocStats {
    /// Blocks currently handed out.
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.allocations - self.deallocations
    }
}

/// Decorator that counts allocations flowing through an inner resource.
///
/// Used to check that teardown returns every byte, and by embedders as a
/// cheap memory-usage gauge.
#[derive(Debug, Default)]
pub struct CountingResource<R = SystemResource> {
    inner: R,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl<R: MemoryResource> CountingResource<R> {
    /// Wrap `inner`.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Current counters. Each field is read independently.
    #[must_use]
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
        }
    }

    /// The wrapped resource.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: MemoryResource> MemoryResource for CountingResource<R> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(layout)?;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        // SAFETY: Forwarded caller contract.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}

// ============================================================================
//  TracingResource
// ============================================================================

/// Decorator emitting a `trace` event for every allocate/deallocate.
///
/// Events carry `bytes`, `align` and `addr` fields. Without the `tracing`
/// feature this is a plain pass-through.
#[derive(Debug, Default)]
pub struct TracingResource<R = SystemResource> {
    inner: R,
}

impl<R: MemoryResource> TracingResource<R> {
    /// Wrap `inner`.
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: MemoryResource> MemoryResource for TracingResource<R> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(layout);
        trace_log!(bytes = layout.size(), align = layout.align(), addr = ?ptr, "ALLOCATED");
        ptr
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        trace_log!(bytes = layout.size(), align = layout.align(), addr = ?ptr, "DEALLOCATED");
        // SAFETY: Forwarded caller contract.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}

// ============================================================================
//  MimallocResource
// ============================================================================

/// Resource backed by mimalloc, independent of the process global allocator.
#[cfg(feature = "mimalloc")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MimallocResource;

#[cfg(feature = "mimalloc")]
impl MemoryResource for MimallocResource {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        use std::alloc::GlobalAlloc;
        // SAFETY: The crate never requests zero-sized layouts.
        NonNull::new(unsafe { mimalloc::MiMalloc.alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        use std::alloc::GlobalAlloc;
        // SAFETY: Caller guarantees ptr came from `alloc` with this layout.
        unsafe { mimalloc::MiMalloc.dealloc(ptr.as_ptr(), layout) };
    }
}

// ============================================================================
//  Tests
// ============================================================================
