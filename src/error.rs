//! Error types.
//!
//! Only two things can go wrong at runtime in this crate: options that cannot
//! be honoured, and a pool that has reached its slab limit. Ring buffer
//! full/empty is a normal `false`/`None` outcome, and an out-of-memory
//! resource is fatal (`handle_alloc_error`).

use thiserror::Error;

/// Invalid pool or ring buffer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Slab capacity of zero.
    #[error("slab capacity must be non-zero")]
    ZeroSlabCapacity,

    /// Slab capacity must be a power of two so the offset fits a bit mask.
    #[error("slab capacity {0} is not a power of two")]
    SlabCapacityNotPowerOfTwo(u32),

    /// A bounded slab limit of zero can never hold an object.
    #[error("slab limit must be non-zero")]
    ZeroSlabLimit,

    /// The slab limit needs more index bits than a handle has left.
    #[error("slab limit {max_slabs} exceeds the {addressable} slabs a handle can address")]
    SlabLimitTooLarge {
        /// Requested limit.
        max_slabs: u32,
        /// Slabs addressable with the remaining handle bits.
        addressable: u64,
    },

    /// Ring buffer capacity of zero.
    #[error("ring buffer capacity must be non-zero")]
    ZeroRingCapacity,

    /// Ring buffer capacity beyond what the lap-tagged cursors can count.
    #[error("ring buffer capacity {0} exceeds the maximum of {max}", max = crate::ring::MAX_CAPACITY)]
    RingCapacityTooLarge(u32),
}

/// Failure of [`PoolAllocator::construct`](crate::pool::PoolAllocator::construct).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every slab is full and the slab limit has been reached.
    ///
    /// Recoverable: destroying any live object makes room again.
    #[error("pool exhausted: all {max_slabs} slabs are full")]
    Exhausted {
        /// Effective slab limit of the pool.
        max_slabs: u64,
    },

    /// Options rejected while setting up a pool.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
