//! Thread-safe heterogeneous keyed store.
//!
//! Nodes of one graph use a [`SharedStore`] to hand typed data to each other
//! without agreeing on a schema up front: any `T: Send + Sync + 'static` can
//! live under any `u64` key.
//!
//! # Layout
//!
//! One `RwLock` over an append-only array of entries. Each entry owns one
//! resource block holding the object and remembers how to destroy it:
//!
//! ```text
//! Entry { key, object: *T, type_id, layout, drop_fn: Option<unsafe fn(*u8)> }
//! ```
//!
//! Lookup is a linear scan. Entries are never removed or replaced, so a
//! reference handed out by `get` stays valid for the store's lifetime even
//! after the lock is released.
//!
//! # Construction
//!
//! `get_or_construct` is double-checked: an optimistic lookup under the
//! shared lock, then a re-check under the exclusive lock before building
//! the object. Exactly one constructor runs per key.

use std::alloc::Layout;
use std::any::{self as StdAny, TypeId};
use std::fmt as StdFmt;
use std::mem as StdMem;
use std::ptr::NonNull;

use parking_lot::RwLock;

use crate::alloc::SharedResource;
use crate::raw_vec::ResourceVec;
use crate::tracing_helpers::debug_log;

struct Entry {
    key: u64,
    object: NonNull<u8>,
    type_id: TypeId,
    type_name: &'static str,
    layout: Layout,
    drop_fn: Option<unsafe fn(NonNull<u8>)>,
}

// SAFETY: Objects are `Send + Sync` (enforced by every inserting method).
unsafe impl Send for Entry {}
// SAFETY: See above.
unsafe impl Sync for Entry {}

impl Entry {
    /// Typed view of the object.
    ///
    /// # Panics
    ///
    /// If the entry was built with a type other than `T`.
    #[inline]
    fn downcast<T: 'static>(&self) -> NonNull<T> {
        assert!(
            self.type_id == TypeId::of::<T>(),
            "shared store key {} holds a `{}`, requested as `{}`",
            self.key,
            self.type_name,
            StdAny::type_name::<T>()
        );
        self.object.cast()
    }
}

/// # Safety
///
/// `ptr` points at a live `T` that is not used afterwards.
unsafe fn drop_object<T>(ptr: NonNull<u8>) {
    // SAFETY: Caller contract.
    unsafe { ptr.cast::<T>().drop_in_place() };
}

/// Heterogeneous map from `u64` keys to objects of arbitrary type.
///
/// # Example
///
/// ```rust
/// use taskweave::alloc::SystemResource;
/// use taskweave::store::SharedStore;
///
/// let store = SharedStore::new(SystemResource::shared());
/// assert!(store.get::<String>(1).is_none());
///
/// let greeting = store.get_or_construct(1, || String::from("hello"));
/// let again = store.get_or_construct(1, || String::from("ignored"));
///
/// assert_eq!(greeting, "hello");
/// assert!(std::ptr::eq(greeting, again));
/// ```
pub struct SharedStore {
    entries: RwLock<ResourceVec<Entry>>,
    resource: SharedResource,
}

impl SharedStore {
    /// Empty store; entries and objects come from `resource`.
    pub fn new(resource: SharedResource) -> Self {
        Self {
            entries: RwLock::new(ResourceVec::new(SharedResource::clone(&resource))),
            resource,
        }
    }

    /// Object under `key`, if any.
    ///
    /// # Panics
    ///
    /// If the object under `key` is not a `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: u64) -> Option<&T> {
        let entries = self.entries.read();
        let object = Self::find(&entries, key)?.downcast::<T>();
        // SAFETY: Objects are never moved or freed before the store drops,
        // and are only ever shared immutably.
        Some(unsafe { object.as_ref() })
    }

    /// Object under `key`, building it with `init` if there is none yet.
    ///
    /// When several threads race on the same key exactly one `init` runs;
    /// every caller gets a reference to that one object.
    ///
    /// `init` runs under the store's exclusive lock and must not access
    /// this store.
    ///
    /// # Panics
    ///
    /// If the object under `key` is not a `T`, or if `init` panics (the
    /// store is left unchanged).
    pub fn get_or_construct<T, F>(&self, key: u64, init: F) -> &T
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        let mut entries = self.entries.write();

        // Someone else may have inserted between the two locks.
        if let Some(entry) = Self::find(&entries, key) {
            // SAFETY: See `get`.
            return unsafe { entry.downcast::<T>().as_ref() };
        }

        let layout = Layout::new::<T>();
        let value = init();
        let object = self.resource.allocate_or_abort(layout).cast::<T>();
        // SAFETY: Fresh block with `T`'s layout.
        unsafe { object.write(value) };

        entries.push(Entry {
            key,
            object: object.cast(),
            type_id: TypeId::of::<T>(),
            type_name: StdAny::type_name::<T>(),
            layout,
            drop_fn: StdMem::needs_drop::<T>().then_some(drop_object::<T> as unsafe fn(NonNull<u8>)),
        });

        debug_log!(
            key,
            type_name = StdAny::type_name::<T>(),
            bytes = layout.size(),
            entries = entries.len(),
            "constructed shared entry"
        );

        // SAFETY: Just written; lives until the store drops.
        unsafe { object.as_ref() }
    }

    /// [`get_or_construct`](Self::get_or_construct) with `T::default()`.
    ///
    /// # Panics
    ///
    /// If the object under `key` is not a `T`.
    pub fn get_or_default<T>(&self, key: u64) -> &T
    where
        T: Default + Send + Sync + 'static,
    {
        self.get_or_construct(key, T::default)
    }

    /// Whether `key` has an entry (of any type).
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        Self::find(&self.entries.read(), key).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn find(entries: &ResourceVec<Entry>, key: u64) -> Option<&Entry> {
        entries.iter().find(|e| e.key == key)
    }
}

impl Drop for SharedStore {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().iter() {
            if let Some(drop_fn) = entry.drop_fn {
                // SAFETY: The object is live and no reference to it can
                // outlive `&mut self`.
                unsafe { drop_fn(entry.object) };
            }
            // SAFETY: Allocated in `get_or_construct` with `entry.layout`.
            unsafe { self.resource.release(entry.object, entry.layout) };
        }
    }
}

impl StdFmt::Debug for SharedStore {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let entries = self.entries.read();
        f.debug_map()
            .entries(entries.iter().map(|e| (e.key, e.type_name)))
            .finish()
    }
}
