//! Memory orderings for the lock-free paths.
//!
//! Named constants keep the publish/observe pairing visible at each access
//! point in the ring buffer, the node wait counter and the payload claim flag.

use crate::sync::Ordering;

/// Ordering for loading a cursor or flag written by the other side.
/// Pairs with [`PUBLISH`].
pub const OBSERVE: Ordering = Ordering::Acquire;

/// Ordering for storing a cursor after the slot write it covers.
/// Pairs with [`OBSERVE`].
pub const PUBLISH: Ordering = Ordering::Release;

/// Ordering for read-modify-write hand-offs (wait counter decrement,
/// payload claim). Every decrementer releases its own writes and the one
/// that observes zero acquires all of them.
pub const HANDOFF: Ordering = Ordering::AcqRel;

/// Ordering for loading a cursor owned by the current thread.
/// Only this thread ever stores it, so no synchronization is needed.
pub const OWNED: Ordering = Ordering::Relaxed;

/// Ordering for advisory counters and snapshots with no data attached.
pub const RELAXED: Ordering = Ordering::Relaxed;
