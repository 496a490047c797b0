//! Pointer-free references to pool-allocated objects.
//!
//! A [`Handle`] is a 32-bit integer: the low bits hold the slot offset inside
//! a slab, the bits above them hold the slab index. [`HandleCodec`] derives
//! the split from the pool options.
//!
//! ```text
//!  31                    shift                 0
//! +--------------------------+------------------+
//! |       slab index         |   slot offset    |
//! +--------------------------+------------------+
//!                             <- bit_len(cap-1) ->
//! ```
//!
//! There is no generation counter. A handle is meaningless once its slot
//! has been destroyed (the slot may be reused by an unrelated object) or its
//! pool dropped.

use crate::error::ConfigError;
use crate::options::SlabLimit;

/// Width of a handle in bits.
pub const HANDLE_BITS: u32 = u32::BITS;

/// Opaque reference to an object living in a [`PoolAllocator`](crate::pool::PoolAllocator).
///
/// Copyable and comparable. Only the allocator that issued it can resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    /// Rebuild a handle from its raw bits.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw bits, e.g. for storing in an atomic or a ring buffer of `u32`.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Bit layout of the handles issued by one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCodec {
    offset_mask: u32,
    slab_mask: u32,
    slab_shift: u32,
    max_slabs: u64,
}

impl HandleCodec {
    /// Derive the layout for `slab_capacity` slots per slab and at most
    /// `limit` slabs.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroSlabCapacity`] / [`ConfigError::SlabCapacityNotPowerOfTwo`]
    /// - [`ConfigError::ZeroSlabLimit`]
    /// - [`ConfigError::SlabLimitTooLarge`] when the bounded limit needs
    ///   more index bits than remain after the offset bits.
    pub const fn new(slab_capacity: u32, limit: SlabLimit) -> Result<Self, ConfigError> {
        if slab_capacity == 0 {
            return Err(ConfigError::ZeroSlabCapacity);
        }
        if !slab_capacity.is_power_of_two() {
            return Err(ConfigError::SlabCapacityNotPowerOfTwo(slab_capacity));
        }

        let offset_mask = slab_capacity - 1;
        let slab_shift = bit_len(offset_mask);
        let index_bits = HANDLE_BITS - slab_shift;
        let addressable: u64 = 1u64 << index_bits;

        let (max_slabs, slab_bits) = match limit {
            SlabLimit::Unbounded => (addressable, index_bits),
            SlabLimit::Bounded(0) => return Err(ConfigError::ZeroSlabLimit),
            SlabLimit::Bounded(n) => {
                if n as u64 > addressable {
                    return Err(ConfigError::SlabLimitTooLarge {
                        max_slabs: n,
                        addressable,
                    });
                }
                // Enough bits to hold indices 0..n.
                (n as u64, bit_len(n - 1))
            }
        };

        let slab_mask = if slab_bits == 0 {
            0
        } else {
            (u32::MAX >> (HANDLE_BITS - slab_bits)) << slab_shift
        };

        Ok(Self {
            offset_mask,
            slab_mask,
            slab_shift,
            max_slabs,
        })
    }

    /// Pack `(slab, offset)` into a handle.
    #[inline]
    #[must_use]
    pub const fn encode(&self, slab: u32, offset: u32) -> Handle {
        debug_assert!(offset <= self.offset_mask, "offset out of range");
        debug_assert!((slab as u64) < self.max_slabs, "slab index out of range");
        Handle(((slab << self.slab_shift) & self.slab_mask) | offset)
    }

    /// Slab index of `handle`.
    #[inline]
    #[must_use]
    pub const fn slab(&self, handle: Handle) -> u32 {
        (handle.0 & self.slab_mask) >> self.slab_shift
    }

    /// Slot offset of `handle` inside its slab.
    #[inline]
    #[must_use]
    pub const fn offset(&self, handle: Handle) -> u32 {
        handle.0 & self.offset_mask
    }

    /// Slots per slab.
    #[inline]
    #[must_use]
    pub const fn slab_capacity(&self) -> u32 {
        self.offset_mask + 1
    }

    /// Number of low bits used for the offset.
    #[inline]
    #[must_use]
    pub const fn offset_bits(&self) -> u32 {
        self.slab_shift
    }

    /// Effective slab limit (the configured bound, or every index a handle
    /// can address when unbounded).
    #[inline]
    #[must_use]
    pub const fn max_slabs(&self) -> u64 {
        self.max_slabs
    }
}

/// Number of bits needed to represent `v` (0 for 0).
#[inline]
const fn bit_len(v: u32) -> u32 {
    HANDLE_BITS - v.leading_zeros()
}
