//! Atomic primitives used by the lock-free components.
//!
//! Resolves to `std` normally and to `loom` under `RUSTFLAGS="--cfg loom"`,
//! so the ring buffer, node counter and payload claim are model-checked as
//! written rather than through a re-implementation.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
