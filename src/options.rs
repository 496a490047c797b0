//! Configuration surface for the pool allocator and the ring buffer.
//!
//! Both option structs are plain builders; validation happens when the
//! component is constructed (or eagerly via `validate`).

use crate::alloc::{SharedResource, SystemResource};
use crate::error::ConfigError;
use crate::handle::HandleCodec;
use crate::ring::MAX_CAPACITY;

/// Upper bound on the number of slabs a pool may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlabLimit {
    /// At most this many slabs.
    Bounded(u32),
    /// As many slabs as a handle can address.
    #[default]
    Unbounded,
}

/// Options for [`PoolAllocator`](crate::pool::PoolAllocator).
///
/// # Example
///
/// ```rust
/// use taskweave::options::PoolOptions;
///
/// let options = PoolOptions::new(64).max_slabs(4);
/// assert_eq!(options.slab_capacity(), 64);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolOptions {
    slab_capacity: u32,
    max_slabs: SlabLimit,
    resource: SharedResource,
}

impl PoolOptions {
    /// Default slot count per slab.
    pub const DEFAULT_SLAB_CAPACITY: u32 = 128;

    /// `slab_capacity` slots per slab, unbounded slab count, system resource.
    #[must_use]
    pub fn new(slab_capacity: u32) -> Self {
        Self {
            slab_capacity,
            max_slabs: SlabLimit::Unbounded,
            resource: SystemResource::shared(),
        }
    }

    /// Bound the number of slabs.
    #[must_use]
    pub fn max_slabs(mut self, max_slabs: u32) -> Self {
        self.max_slabs = SlabLimit::Bounded(max_slabs);
        self
    }

    /// Set the slab limit explicitly.
    #[must_use]
    pub fn slab_limit(mut self, limit: SlabLimit) -> Self {
        self.max_slabs = limit;
        self
    }

    /// Allocate slabs (and the slab directory) from `resource`.
    #[must_use]
    pub fn resource(mut self, resource: SharedResource) -> Self {
        self.resource = resource;
        self
    }

    /// Slots per slab.
    #[inline]
    #[must_use]
    pub const fn slab_capacity(&self) -> u32 {
        self.slab_capacity
    }

    /// Configured slab limit.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> SlabLimit {
        self.max_slabs
    }

    /// Configured resource.
    #[inline]
    #[must_use]
    pub const fn shared_resource(&self) -> &SharedResource {
        &self.resource
    }

    /// Check the options and derive the handle layout.
    ///
    /// # Errors
    ///
    /// See [`HandleCodec::new`].
    pub const fn validate(&self) -> Result<HandleCodec, ConfigError> {
        HandleCodec::new(self.slab_capacity, self.max_slabs)
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLAB_CAPACITY)
    }
}

/// Options for [`RingBuffer`](crate::ring::RingBuffer).
#[derive(Debug, Clone)]
pub struct RingOptions {
    capacity: u32,
    resource: SharedResource,
}

impl RingOptions {
    /// `capacity` elements, system resource.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            resource: SystemResource::shared(),
        }
    }

    /// Allocate the slot array from `resource`.
    #[must_use]
    pub fn resource(mut self, resource: SharedResource) -> Self {
        self.resource = resource;
        self
    }

    /// Element count.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Configured resource.
    #[inline]
    #[must_use]
    pub const fn shared_resource(&self) -> &SharedResource {
        &self.resource
    }

    /// Check the capacity.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroRingCapacity`] or [`ConfigError::RingCapacityTooLarge`].
    pub const fn validate(&self) -> Result<(), ConfigError> {
        match self.capacity {
            0 => Err(ConfigError::ZeroRingCapacity),
            c if c > MAX_CAPACITY => Err(ConfigError::RingCapacityTooLarge(c)),
            _ => Ok(()),
        }
    }
}
