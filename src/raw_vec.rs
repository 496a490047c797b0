//! Growable array whose storage lives in a [`MemoryResource`].
//!
//! Backs the pool's slab directory and the shared store's entry table, so
//! that neither reaches for the global allocator behind the embedder's back.
//! Elements may move when the array grows; callers that hand out references
//! keep them pointing at separately allocated blocks, never into the array.

use std::alloc::Layout;
use std::ptr::{self as StdPtr, NonNull};
use std::slice;

use crate::alloc::SharedResource;

const MIN_CAPACITY: usize = 4;

/// Growable array allocated from a [`SharedResource`].
pub(crate) struct ResourceVec<E> {
    ptr: NonNull<E>,
    len: usize,
    cap: usize,
    resource: SharedResource,
}

// SAFETY: ResourceVec owns its elements like Vec<E> does.
unsafe impl<E: Send> Send for ResourceVec<E> {}
// SAFETY: Shared access only hands out &E.
unsafe impl<E: Sync> Sync for ResourceVec<E> {}

impl<E> ResourceVec<E> {
    /// Empty array; nothing is allocated until the first push.
    pub(crate) fn new(resource: SharedResource) -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            cap: 0,
            resource,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[E] {
        // SAFETY: The first `len` elements are initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [E] {
        // SAFETY: The first `len` elements are initialized and uniquely borrowed.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&E> {
        self.as_slice().get(index)
    }

    #[inline]
    pub(crate) fn iter(&self) -> slice::Iter<'_, E> {
        self.as_slice().iter()
    }

    /// Append `elem`, doubling the storage when full.
    pub(crate) fn push(&mut self, elem: E) {
        if self.len == self.cap {
            self.grow();
        }

        // SAFETY: len < cap after grow; the slot is uninitialized.
        unsafe { self.ptr.as_ptr().add(self.len).write(elem) };
        self.len += 1;
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 {
            MIN_CAPACITY
        } else {
            self.cap.checked_mul(2).unwrap_or_else(|| capacity_overflow())
        };
        let new_layout = array_layout::<E>(new_cap);
        let new_ptr = self.resource.allocate_or_abort(new_layout).cast::<E>();

        if self.cap != 0 {
            // SAFETY: Old and new blocks are distinct; the first `len`
            // elements are initialized and are moved bitwise.
            unsafe {
                StdPtr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len);
                self.resource.release(self.ptr.cast(), array_layout::<E>(self.cap));
            }
        }

        self.ptr = new_ptr;
        self.cap = new_cap;
    }
}

impl<E> Drop for ResourceVec<E> {
    fn drop(&mut self) {
        // SAFETY: Elements are initialized and dropped once; the block was
        // allocated with the layout for `cap` elements.
        unsafe {
            StdPtr::drop_in_place(self.as_mut_slice());
            if self.cap != 0 {
                self.resource.release(self.ptr.cast(), array_layout::<E>(self.cap));
            }
        }
    }
}

/// Layout for `n` contiguous `E`s.
pub(crate) fn array_layout<E>(n: usize) -> Layout {
    Layout::array::<E>(n).unwrap_or_else(|_| capacity_overflow())
}

#[cold]
fn capacity_overflow() -> ! {
    panic!("capacity overflow");
}
