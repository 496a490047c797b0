//! Task-graph vertex: payload, dependency counter and successor list.
//!
//! A node is `Waiting` while its wait counter is positive, `Ready` once the
//! counter hits zero, and `Completed` after its payload has run and its
//! successors have been notified. Only the counter is stored; detecting the
//! zero crossing is what [`Node::decrement_and_check`] is for.
//!
//! # Hand-off protocol
//!
//! ```text
//! predecessor A ─┐
//! predecessor B ─┼─ decrement_and_check(S) ─► exactly one sees `true`
//! predecessor C ─┘                              └─► pushes S onto a ready ring
//! ```
//!
//! The decrement is an `AcqRel` read-modify-write. All decrements of one
//! counter form a release sequence, so the thread that observes the final
//! transition to zero also observes everything every predecessor wrote
//! before its own decrement.

use std::fmt as StdFmt;
use std::ptr::NonNull;

use crate::alloc::{MemoryResource, SharedResource};
use crate::handle::Handle;
use crate::ordering::{HANDOFF, OBSERVE};
use crate::payload::Payload;
use crate::raw_vec::array_layout;
use crate::sync::AtomicU32;

// ============================================================================
//  SuccessorList
// ============================================================================

/// Fixed-size list of successor handles in resource-owned storage.
///
/// The storage is returned explicitly with [`release`](Self::release),
/// which needs the resource it came from. [`Node`] does that in its drop.
pub struct SuccessorList {
    ptr: NonNull<Handle>,
    len: usize,
}

// SAFETY: The list is immutable after construction.
unsafe impl Send for SuccessorList {}
// SAFETY: See above.
unsafe impl Sync for SuccessorList {}

impl SuccessorList {
    /// Copy `handles` into storage from `resource`.
    pub fn new(handles: &[Handle], resource: &dyn MemoryResource) -> Self {
        let ptr = resource
            .allocate_or_abort(array_layout::<Handle>(handles.len()))
            .cast::<Handle>();

        // SAFETY: Fresh allocation of `handles.len()` elements.
        unsafe {
            std::ptr::copy_nonoverlapping(handles.as_ptr(), ptr.as_ptr(), handles.len());
        }

        Self {
            ptr,
            len: handles.len(),
        }
    }

    /// The handles, in construction order.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[Handle] {
        // SAFETY: `len` initialized elements (or a dangling pointer and 0).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Number of successors.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no successors.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the storage to `resource` and leave the list empty.
    ///
    /// A second call is a no-op.
    ///
    /// # Safety
    ///
    /// `resource` must be the resource passed to [`new`](Self::new).
    pub unsafe fn release(&mut self, resource: &dyn MemoryResource) {
        if self.len == 0 {
            return;
        }

        let layout = array_layout::<Handle>(self.len);
        // SAFETY: Allocated by `new` from `resource` with this layout.
        unsafe { resource.release(self.ptr.cast(), layout) };

        self.ptr = NonNull::dangling();
        self.len = 0;
    }
}

impl StdFmt::Debug for SuccessorList {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

// ============================================================================
//  Node
// ============================================================================

/// One vertex of a task graph.
///
/// Move-only. The payload and successor storage are released through the
/// resource the node was built with when it is dropped.
///
/// # Example
///
/// ```rust
/// use taskweave::alloc::SystemResource;
/// use taskweave::handle::Handle;
/// use taskweave::node::Node;
/// use taskweave::payload::Payload;
///
/// let resource = SystemResource::shared();
/// let payload = Payload::new(|| {}, resource.clone());
/// let node = Node::new(7, 2, payload, &[Handle::from_raw(3)], resource);
///
/// assert!(!node.decrement_and_check());
/// assert!(node.decrement_and_check());
/// assert!(node.is_ready());
/// assert!(node.run());
/// ```
pub struct Node {
    graph_id: u32,
    wait_count: AtomicU32,
    payload: Payload,
    successors: SuccessorList,
    resource: SharedResource,
}

impl Node {
    /// Node with `wait_count` unmet dependencies (0: runnable at once) that
    /// notifies `successors` on completion.
    pub fn new(
        graph_id: u32,
        wait_count: u32,
        payload: Payload,
        successors: &[Handle],
        resource: SharedResource,
    ) -> Self {
        let successors = SuccessorList::new(successors, &*resource);
        Self {
            graph_id,
            wait_count: AtomicU32::new(wait_count),
            payload,
            successors,
            resource,
        }
    }

    /// Record one satisfied dependency.
    ///
    /// Returns `true` for exactly one caller: the one whose decrement
    /// brought the counter to zero.
    ///
    /// Calling this more times than the initial wait count is a logic error
    /// (asserted in debug builds).
    #[inline]
    pub fn decrement_and_check(&self) -> bool {
        let prev = self.wait_count.fetch_sub(1, HANDOFF);
        debug_assert_ne!(
            prev, 0,
            "wait counter of a node in graph {} decremented below zero",
            self.graph_id
        );
        prev == 1
    }

    /// Whether every dependency has been satisfied.
    #[must_use]
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.wait_count.load(OBSERVE) == 0
    }

    /// Remaining unmet dependencies.
    #[must_use]
    #[inline]
    pub fn wait_count(&self) -> u32 {
        self.wait_count.load(OBSERVE)
    }

    /// Graph this node belongs to.
    #[must_use]
    #[inline]
    pub const fn graph_id(&self) -> u32 {
        self.graph_id
    }

    /// Handles notified on completion.
    #[must_use]
    #[inline]
    pub fn successors(&self) -> &[Handle] {
        self.successors.as_slice()
    }

    /// The node's work.
    #[must_use]
    #[inline]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Invoke the payload; `false` if it already ran.
    #[inline]
    pub fn run(&self) -> bool {
        self.payload.invoke()
    }

    /// Decrement every successor and report the ones that became ready.
    ///
    /// `resolve` maps a successor handle to its node (typically a pool
    /// lookup); `on_ready` receives each handle whose counter this call
    /// brought to zero (typically a ready-ring push). Returns how many
    /// successors became ready.
    pub fn notify_successors<'a, R, Q>(&self, mut resolve: R, mut on_ready: Q) -> usize
    where
        R: FnMut(Handle) -> &'a Node,
        Q: FnMut(Handle),
    {
        let mut ready = 0;
        for &succ in self.successors() {
            if resolve(succ).decrement_and_check() {
                on_ready(succ);
                ready += 1;
            }
        }
        ready
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // SAFETY: The list was allocated from `self.resource` in `new`.
        unsafe { self.successors.release(&*self.resource) };
    }
}

impl StdFmt::Debug for Node {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Node")
            .field("graph_id", &self.graph_id)
            .field("wait_count", &self.wait_count())
            .field("payload", &self.payload)
            .field("successors", &self.successors)
            .finish_non_exhaustive()
    }
}
