//! # `taskweave`
//!
//! Concurrent building blocks for a task-graph execution engine.
//!
//! Worker threads build, schedule and retire interdependent units of work
//! with these primitives, without a central lock on the hot path:
//!
//! | Module | Component |
//! |--------|-----------|
//! | [`pool`] | Handle-based slab allocator ([`PoolAllocator`]) |
//! | [`ring`] | Lock-free SPSC ready queue ([`RingBuffer`]) |
//! | [`payload`] | Type-erased run-once callable ([`Payload`]) |
//! | [`node`] | Graph vertex with an atomic wait counter ([`Node`]) |
//! | [`store`] | Thread-safe heterogeneous keyed store ([`SharedStore`]) |
//!
//! Every component allocates exclusively through the [`MemoryResource`]
//! it was built with (see [`alloc`]).
//!
//! ## Flow
//!
//! ```text
//!  builder ── construct ──► PoolAllocator<Node> ──► Handle
//!                                                     │
//!  worker: pull Handle ◄── RingBuffer<Handle> ◄── push when wait count hits 0
//!     │                                               ▲
//!     └─ node.run() ─► node.notify_successors() ──────┘
//! ```
//!
//! Draining the ready queue (the executor loop) and building graphs are
//! left to the embedder.
//!
//! ## Example
//!
//! ```rust
//! use taskweave::{Handle, Node, Payload, PoolAllocator, PoolOptions, RingBuffer, SystemResource};
//!
//! let resource = SystemResource::shared();
//! let pool: PoolAllocator<Node> = PoolAllocator::new(PoolOptions::new(16)).unwrap();
//!
//! let leaf = pool
//!     .construct(Node::new(0, 1, Payload::new(|| {}, resource.clone()), &[], resource.clone()))
//!     .unwrap();
//! let root = pool
//!     .construct(Node::new(0, 0, Payload::new(|| {}, resource.clone()), &[leaf], resource.clone()))
//!     .unwrap();
//!
//! let mut ready: RingBuffer<Handle> = RingBuffer::with_capacity(8).unwrap();
//! let (mut tx, mut rx) = ready.split();
//! tx.try_push(root);
//!
//! let mut ran = 0;
//! while let Some(h) = rx.try_pull() {
//!     // SAFETY: `h` came from `pool` and is live.
//!     let node = unsafe { pool.get(h) };
//!     node.run();
//!     ran += 1;
//!     node.notify_successors(|s| unsafe { pool.get(s) }, |s| {
//!         tx.try_push(s);
//!     });
//! }
//! assert_eq!(ran, 2);
//! ```
//!
//! ## Features
//!
//! - `tracing`: structured events (slab growth, pool exhaustion, store
//!   construction, payload panics) through the `tracing` crate.
//! - `mimalloc`: adds `alloc::MimallocResource`.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::inline_always)]

pub mod alloc;
pub mod error;
pub mod handle;
pub mod node;
pub mod options;
pub mod payload;
pub mod pool;
pub mod ring;
pub mod store;

mod ordering;
mod raw_vec;
mod sync;
mod tracing_helpers;

// Re-export main types for convenience
pub use alloc::{CountingResource, MemoryResource, SharedResource, SystemResource, TracingResource};
pub use error::{ConfigError, PoolError};
pub use handle::Handle;
pub use node::{Node, SuccessorList};
pub use options::{PoolOptions, RingOptions, SlabLimit};
pub use payload::{Apply, Payload};
pub use pool::PoolAllocator;
pub use ring::{Consumer, Producer, RingBuffer};
pub use store::SharedStore;
