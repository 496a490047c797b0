//! Handle-based slab allocator.
//!
//! [`PoolAllocator<T>`] hands out [`Handle`]s to `T`s stored in fixed-capacity
//! slabs. Slabs are appended on demand and never removed; only their slots
//! are recycled.
//!
//! # Locking
//!
//! Two levels:
//!
//! 1. The slab directory sits behind a `RwLock`. Lookups (construct into an
//!    existing slab, destroy, get) take it shared; only appending a slab
//!    takes it exclusive.
//! 2. Each slab guards its own free list with a `Mutex`, so construct and
//!    destroy on different slabs never contend.
//!
//! Lock order is always directory, then slab. Neither lock is held while
//! user code (`T`'s constructor closure or `Drop`) runs.
//!
//! # Free list
//!
//! The free list is intrusive and index-based: a free slot's storage holds
//! the index of the next free slot. It is kept sorted by index (and so by
//! address), which gives lowest-address-first reuse and lets teardown tell
//! live slots from free ones by walking the list alongside the slots.
//!
//! ```text
//! slot:   0      1      2      3      4
//!       [live] [ 3  ] [live] [ NIL] [live]      head = 1
//! ```

use std::marker::PhantomData;
use std::mem::{self as StdMem, ManuallyDrop};
use std::ptr::{self as StdPtr, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::alloc::{MemoryResource, SharedResource};
use crate::error::{ConfigError, PoolError};
use crate::handle::{Handle, HandleCodec};
use crate::options::PoolOptions;
use crate::raw_vec::{ResourceVec, array_layout};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

/// End-of-list marker. Offsets are below 2^31, so this never collides.
const NIL: u32 = u32::MAX;

// ============================================================================
//  Slot / Slab
// ============================================================================

/// One slot: either a live `T` or the index of the next free slot.
#[repr(C)]
union Slot<T> {
    value: ManuallyDrop<T>,
    next_free: u32,
}

#[derive(Debug)]
struct FreeList {
    head: u32,
    len: u32,
}

/// A contiguous block of `capacity` slots plus its free list.
struct Slab<T> {
    slots: NonNull<Slot<T>>,
    free: Mutex<FreeList>,
}

// SAFETY: A slab owns the Ts in its live slots.
unsafe impl<T: Send> Send for Slab<T> {}
// SAFETY: Free-list mutation is behind the mutex; shared access to live
// values is governed by the pool's unsafe API contracts.
unsafe impl<T: Send + Sync> Sync for Slab<T> {}

impl<T> Slab<T> {
    /// Allocate `capacity` slots and thread them all onto the free list.
    fn new(capacity: u32, resource: &dyn MemoryResource) -> Self {
        let slots = resource
            .allocate_or_abort(array_layout::<Slot<T>>(capacity as usize))
            .cast::<Slot<T>>();

        for idx in 0..capacity {
            let next = if idx + 1 == capacity { NIL } else { idx + 1 };
            // SAFETY: idx < capacity; the slot is uninitialized memory.
            unsafe { Self::write_next(slots, idx, next) };
        }

        Self {
            slots,
            free: Mutex::new(FreeList {
                head: 0,
                len: capacity,
            }),
        }
    }

    #[inline]
    fn slot(&self, idx: u32) -> NonNull<Slot<T>> {
        // SAFETY: Callers only pass offsets below the slab capacity.
        unsafe { self.slots.add(idx as usize) }
    }

    /// Pointer to the value stored in slot `idx`.
    #[inline]
    fn value_ptr(&self, idx: u32) -> NonNull<T> {
        // Union fields live at offset 0 (`repr(C)`).
        self.slot(idx).cast::<T>()
    }

    /// # Safety
    ///
    /// `idx` must be in range and the slot must not hold a live value.
    #[inline]
    unsafe fn write_next(slots: NonNull<Slot<T>>, idx: u32, next: u32) {
        // SAFETY: Caller contract.
        unsafe {
            let slot = slots.add(idx as usize).as_ptr();
            StdPtr::addr_of_mut!((*slot).next_free).write(next);
        }
    }

    /// # Safety
    ///
    /// `idx` must be a free slot.
    #[inline]
    unsafe fn read_next(&self, idx: u32) -> u32 {
        // SAFETY: Free slots hold `next_free`.
        unsafe { StdPtr::addr_of!((*self.slot(idx).as_ptr()).next_free).read() }
    }

    /// Unlink the lowest free slot.
    fn pop(&self) -> Option<u32> {
        let mut list = self.free.lock();
        if list.head == NIL {
            return None;
        }

        let idx = list.head;
        // SAFETY: The head is a free slot; the lock serializes list access.
        list.head = unsafe { self.read_next(idx) };
        list.len -= 1;
        Some(idx)
    }

    /// Re-link slot `idx` at its sorted position.
    ///
    /// O(free-list length).
    ///
    /// # Safety
    ///
    /// `idx` must be in range and no longer hold a live value.
    unsafe fn push_sorted(&self, idx: u32) {
        let mut list = self.free.lock();

        // SAFETY (whole block): every index walked is on the free list, and
        // the lock serializes all free-list reads and writes.
        unsafe {
            if list.head == NIL || idx < list.head {
                Self::write_next(self.slots, idx, list.head);
                list.head = idx;
            } else {
                debug_assert_ne!(list.head, idx, "slot {idx} released twice");
                let mut cur = list.head;
                let mut next = self.read_next(cur);
                while next != NIL && next < idx {
                    cur = next;
                    next = self.read_next(cur);
                }
                debug_assert_ne!(next, idx, "slot {idx} released twice");
                Self::write_next(self.slots, idx, next);
                Self::write_next(self.slots, cur, idx);
            }
        }

        list.len += 1;
    }

    fn free_len(&self) -> u32 {
        self.free.lock().len
    }

    /// Drop every live value and return the storage.
    ///
    /// # Safety
    ///
    /// Must be called once, with exclusive access, with the capacity and
    /// resource the slab was created with.
    unsafe fn teardown(&mut self, capacity: u32, resource: &dyn MemoryResource) {
        if StdMem::needs_drop::<T>() {
            let mut next_free = self.free.get_mut().head;
            for idx in 0..capacity {
                if idx == next_free {
                    // SAFETY: idx is on the free list.
                    next_free = unsafe { self.read_next(idx) };
                } else {
                    // SAFETY: Not on the sorted free list, so the slot is live.
                    unsafe { StdPtr::drop_in_place(self.value_ptr(idx).as_ptr()) };
                }
            }
            debug_assert_eq!(next_free, NIL, "free list not sorted");
        }

        // SAFETY: Allocated in `new` with this layout.
        unsafe {
            resource.release(
                self.slots.cast(),
                array_layout::<Slot<T>>(capacity as usize),
            );
        }
    }
}

// ============================================================================
//  PoolAllocator
// ============================================================================

/// Growable collection of fixed-capacity slabs addressed by [`Handle`].
///
/// # Example
///
/// ```rust
/// use taskweave::options::PoolOptions;
/// use taskweave::pool::PoolAllocator;
///
/// let pool: PoolAllocator<u64> = PoolAllocator::new(PoolOptions::new(64)).unwrap();
/// let h = pool.construct(51).unwrap();
///
/// // SAFETY: `h` is live and not destroyed concurrently.
/// assert_eq!(unsafe { *pool.get(h) }, 51);
/// unsafe { pool.destroy(h) };
/// ```
///
/// # Thread Safety
///
/// `construct`, `destroy` and `get` may be called concurrently from any
/// number of threads. Concurrent access to the *same* live object is the
/// caller's business; the pool only guarantees that two live handles never
/// alias the same storage.
pub struct PoolAllocator<T> {
    slabs: RwLock<ResourceVec<Slab<T>>>,
    codec: HandleCodec,
    options: PoolOptions,
    live: AtomicUsize,
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("codec", &self.codec)
            .field("slabs", &self.slab_count())
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

impl<T> PoolAllocator<T> {
    /// Empty pool; the first slab is allocated by the first `construct`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the options cannot be encoded in a handle.
    pub fn new(options: PoolOptions) -> Result<Self, ConfigError> {
        let codec = options.validate()?;
        let slabs = ResourceVec::new(SharedResource::clone(options.shared_resource()));

        Ok(Self {
            slabs: RwLock::new(slabs),
            codec,
            options,
            live: AtomicUsize::new(0),
            _marker: PhantomData,
        })
    }

    /// Move `value` into a free slot.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`] when every slab is full and no more slabs may
    /// be created. `value` is dropped in that case.
    pub fn construct(&self, value: T) -> Result<Handle, PoolError> {
        self.construct_with(|| value)
    }

    /// Claim a free slot and build the object in place with `init`.
    ///
    /// `init` runs without any pool lock held. If it panics the slot goes
    /// back on the free list before the panic continues.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`]; `init` is not called in that case.
    pub fn construct_with(&self, init: impl FnOnce() -> T) -> Result<Handle, PoolError> {
        let (slab, offset, ptr) = self.acquire_slot()?;

        let reclaim = ReclaimOnUnwind {
            pool: self,
            slab,
            offset,
        };
        let value = init();
        StdMem::forget(reclaim);

        // SAFETY: The slot was unlinked from its free list and is ours.
        unsafe { ptr.as_ptr().write(value) };
        self.live.fetch_add(1, Ordering::Relaxed);

        let handle = self.codec.encode(slab, offset);
        trace_log!(slab, offset, handle = handle.raw(), "constructed");
        Ok(handle)
    }

    /// Shared reference to the object behind `handle`.
    ///
    /// # Safety
    ///
    /// - `handle` was returned by `construct*` on this pool and has not been
    ///   destroyed or taken.
    /// - The object is not destroyed, taken, or mutably borrowed while the
    ///   returned reference is alive.
    ///
    /// # Panics
    ///
    /// If `handle` names a slab this pool never created.
    #[inline]
    pub unsafe fn get(&self, handle: Handle) -> &T {
        // SAFETY: Caller contract.
        unsafe { self.resolve(handle).as_ref() }
    }

    /// Exclusive reference to the object behind `handle`.
    ///
    /// # Safety
    ///
    /// Same as [`get`](Self::get), and no other reference to the object
    /// exists while the returned one is alive.
    ///
    /// # Panics
    ///
    /// If `handle` names a slab this pool never created.
    #[inline]
    #[allow(clippy::mut_from_ref, reason = "slots are owned by the pool, not by &self")]
    pub unsafe fn get_mut(&self, handle: Handle) -> &mut T {
        // SAFETY: Caller contract.
        unsafe { self.resolve(handle).as_mut() }
    }

    /// Drop the object behind `handle` and recycle its slot.
    ///
    /// # Safety
    ///
    /// `handle` is live (see [`get`](Self::get)), no reference to the object
    /// outlives this call, and the handle is never used again.
    ///
    /// # Panics
    ///
    /// If `handle` names a slab this pool never created.
    pub unsafe fn destroy(&self, handle: Handle) {
        let ptr = self.resolve(handle);
        // SAFETY: Caller guarantees the value is live and unreferenced.
        unsafe { StdPtr::drop_in_place(ptr.as_ptr()) };
        self.recycle(handle);
    }

    /// Move the object out of the pool and recycle its slot.
    ///
    /// # Safety
    ///
    /// Same as [`destroy`](Self::destroy).
    ///
    /// # Panics
    ///
    /// If `handle` names a slab this pool never created.
    pub unsafe fn take(&self, handle: Handle) -> T {
        let ptr = self.resolve(handle);
        // SAFETY: Caller guarantees the value is live and unreferenced; the
        // slot is recycled without dropping.
        let value = unsafe { ptr.as_ptr().read() };
        self.recycle(handle);
        value
    }

    /// Number of slabs created so far.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.read().len()
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Total slots across all slabs.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slab_count() * self.codec.slab_capacity() as usize
    }

    /// Free slots across all slabs (sum of per-slab snapshots).
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slabs.read().iter().map(|s| s.free_len() as usize).sum()
    }

    /// Handle layout used by this pool.
    #[must_use]
    pub const fn codec(&self) -> &HandleCodec {
        &self.codec
    }

    /// Options the pool was built with.
    #[must_use]
    pub const fn options(&self) -> &PoolOptions {
        &self.options
    }

    // ------------------------------------------------------------------------
    //  Internals
    // ------------------------------------------------------------------------

    /// Find a free slot in an existing slab or grow by one slab.
    fn acquire_slot(&self) -> Result<(u32, u32, NonNull<T>), PoolError> {
        {
            let slabs = self.slabs.read();
            if let Some(found) = Self::pop_any(&slabs) {
                return Ok(found);
            }
            if slabs.len() as u64 >= self.codec.max_slabs() {
                return Err(self.exhausted());
            }
        }

        self.grow_and_pop()
    }

    /// First-fit scan over the slab directory.
    #[allow(clippy::cast_possible_truncation, reason = "index < max_slabs <= 2^32")]
    fn pop_any(slabs: &ResourceVec<Slab<T>>) -> Option<(u32, u32, NonNull<T>)> {
        slabs.iter().enumerate().find_map(|(index, slab)| {
            slab.pop()
                .map(|offset| (index as u32, offset, slab.value_ptr(offset)))
        })
    }

    #[cold]
    fn grow_and_pop(&self) -> Result<(u32, u32, NonNull<T>), PoolError> {
        let capacity = self.codec.slab_capacity();
        let resource = self.options.shared_resource().as_ref();

        // Allocate before taking the exclusive lock.
        let fresh = Slab::<T>::new(capacity, resource);

        let mut slabs = self.slabs.write();

        // Another thread may have grown the pool or freed a slot meanwhile.
        let found = Self::pop_any(&slabs);
        if found.is_some() || slabs.len() as u64 >= self.codec.max_slabs() {
            drop(slabs);
            let mut fresh = fresh;
            // SAFETY: `fresh` was never shared and holds no live values.
            unsafe { fresh.teardown(capacity, resource) };
            return found.ok_or_else(|| self.exhausted());
        }

        #[allow(clippy::cast_possible_truncation, reason = "len < max_slabs <= 2^32")]
        let index = slabs.len() as u32;
        let offset = fresh.pop().unwrap_or(0);
        let ptr = fresh.value_ptr(offset);
        slabs.push(fresh);

        debug_log!(
            slab = index,
            capacity,
            bytes = StdMem::size_of::<Slot<T>>() * capacity as usize,
            "created slab"
        );
        Ok((index, offset, ptr))
    }

    fn exhausted(&self) -> PoolError {
        let max_slabs = self.codec.max_slabs();
        warn_log!(max_slabs, "pool exhausted");
        PoolError::Exhausted { max_slabs }
    }

    /// Locate the value slot for `handle`.
    fn resolve(&self, handle: Handle) -> NonNull<T> {
        let index = self.codec.slab(handle);
        let offset = self.codec.offset(handle);

        let slabs = self.slabs.read();
        let Some(slab) = slabs.get(index as usize) else {
            panic!(
                "{handle:?} refers to slab {index}, but the pool has {} slabs",
                slabs.len()
            );
        };

        // Slot storage never moves, so the pointer outlives the read guard.
        slab.value_ptr(offset)
    }

    /// Put `handle`'s slot back on its slab's free list.
    fn recycle(&self, handle: Handle) {
        self.release_slot(self.codec.slab(handle), self.codec.offset(handle));
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    fn release_slot(&self, index: u32, offset: u32) {
        let slabs = self.slabs.read();
        if let Some(slab) = slabs.get(index as usize) {
            // SAFETY: The slot no longer holds a live value.
            unsafe { slab.push_sorted(offset) };
        }
    }
}

impl<T> Drop for PoolAllocator<T> {
    fn drop(&mut self) {
        let capacity = self.codec.slab_capacity();
        let resource = SharedResource::clone(self.options.shared_resource());

        for slab in self.slabs.get_mut().as_mut_slice() {
            // SAFETY: Exclusive access; each slab is torn down exactly once
            // with the capacity and resource it was created with.
            unsafe { slab.teardown(capacity, resource.as_ref()) };
        }
    }
}

/// Returns a claimed slot to the free list if the constructor unwinds.
struct ReclaimOnUnwind<'a, T> {
    pool: &'a PoolAllocator<T>,
    slab: u32,
    offset: u32,
}

impl<T> Drop for ReclaimOnUnwind<'_, T> {
    fn drop(&mut self) {
        self.pool.release_slot(self.slab, self.offset);
    }
}

// ============================================================================
//  Tests
// ============================================================================
