//! Type-erased "callable + bound arguments" unit run by a [`Node`](crate::node::Node).
//!
//! A [`Payload`] is a single block from a [`MemoryResource`](crate::alloc::MemoryResource):
//!
//! ```text
//! +-----------------------------+------------------------+
//! | Header { vtable, spent }    | callable F (+ args)    |
//! +-----------------------------+------------------------+
//! ```
//!
//! The vtable is a `'static` table of plain function pointers generated per
//! concrete `F` (call, drop, layout), so the owner can run, destroy and
//! deallocate the block without knowing `F`.
//!
//! Invocation is one-shot: the first `invoke` atomically claims the
//! callable and moves it out of the block; later calls return `false`.

use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::fmt as StdFmt;
use std::mem::ManuallyDrop;
use std::panic::{self as StdPanic, AssertUnwindSafe};
use std::ptr::NonNull;

use crate::alloc::SharedResource;
use crate::ordering::{HANDOFF, OBSERVE};
use crate::sync::AtomicBool;
use crate::tracing_helpers::error_log;

// ============================================================================
//  Apply
// ============================================================================

/// A callable that can be applied to an argument tuple.
///
/// Implemented for every `FnOnce(A0, .., An)` with up to eight arguments,
/// which covers free functions, capturing closures and method paths
/// (`Type::method`, receiver passed as the first argument).
pub trait Apply<Args>: Send + 'static {
    /// Consume `self`, calling it with the unpacked `args`.
    fn apply(self, args: Args);
}

macro_rules! impl_apply {
    ($($arg:ident),*) => {
        impl<Func, $($arg,)*> Apply<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) + Send + 'static,
            $($arg: Send + 'static,)*
        {
            #[inline]
            #[allow(non_snake_case, clippy::unused_unit)]
            fn apply(self, ($($arg,)*): ($($arg,)*)) {
                self($($arg),*)
            }
        }
    };
}

impl_apply!();
impl_apply!(A0);
impl_apply!(A0, A1);
impl_apply!(A0, A1, A2);
impl_apply!(A0, A1, A2, A3);
impl_apply!(A0, A1, A2, A3, A4);
impl_apply!(A0, A1, A2, A3, A4, A5);
impl_apply!(A0, A1, A2, A3, A4, A5, A6);
impl_apply!(A0, A1, A2, A3, A4, A5, A6, A7);

// ============================================================================
//  Block layout
// ============================================================================

struct PayloadVTable {
    /// Move the callable out and run it. Called at most once.
    call: unsafe fn(NonNull<Header>),
    /// Drop a callable that was never run.
    drop_callable: unsafe fn(NonNull<Header>),
    /// Layout of the whole block.
    layout: Layout,
}

#[repr(C)]
struct Header {
    vtable: &'static PayloadVTable,
    spent: AtomicBool,
}

#[repr(C)]
struct Block<F> {
    header: Header,
    callable: UnsafeCell<ManuallyDrop<F>>,
}

impl<F: FnOnce() + Send + 'static> Block<F> {
    const VTABLE: &'static PayloadVTable = &PayloadVTable {
        call: Self::call,
        drop_callable: Self::drop_callable,
        layout: Layout::new::<Self>(),
    };

    /// # Safety
    ///
    /// `header` heads a live `Block<F>` whose callable has not been taken.
    unsafe fn call(header: NonNull<Header>) {
        let block = header.cast::<Self>();
        // SAFETY: Caller guarantees the callable is still in place; the
        // spent flag keeps anyone else from reading it again.
        let f = unsafe { ManuallyDrop::take(&mut *(*block.as_ptr()).callable.get()) };
        f();
    }

    /// # Safety
    ///
    /// Same as [`call`](Self::call).
    unsafe fn drop_callable(header: NonNull<Header>) {
        let block = header.cast::<Self>();
        // SAFETY: Caller guarantees the callable is still in place.
        unsafe { ManuallyDrop::drop(&mut *(*block.as_ptr()).callable.get()) };
    }
}

// ============================================================================
//  Payload
// ============================================================================

/// Owned, type-erased, run-once callable living in a resource-backed block.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use taskweave::alloc::SystemResource;
/// use taskweave::payload::Payload;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h = Arc::clone(&hits);
/// let add = move |n: usize| {
///     h.fetch_add(n, Ordering::Relaxed);
/// };
///
/// let payload = Payload::bind(add, (5,), SystemResource::shared());
/// assert!(payload.invoke());
/// assert!(!payload.invoke());
/// assert_eq!(hits.load(Ordering::Relaxed), 5);
/// ```
pub struct Payload {
    block: NonNull<Header>,
    resource: SharedResource,
}

// SAFETY: The callable is `Send`; the spent flag hands it to exactly one
// invoking thread, so shared references never touch it concurrently.
unsafe impl Send for Payload {}
// SAFETY: See above.
unsafe impl Sync for Payload {}

impl Payload {
    /// Wrap a zero-argument callable.
    pub fn new<F>(f: F, resource: SharedResource) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let vtable = Block::<F>::VTABLE;
        let block = resource.allocate_or_abort(vtable.layout).cast::<Block<F>>();

        // SAFETY: Fresh allocation with `Block<F>`'s layout.
        unsafe {
            block.write(Block {
                header: Header {
                    vtable,
                    spent: AtomicBool::new(false),
                },
                callable: UnsafeCell::new(ManuallyDrop::new(f)),
            });
        }

        Self {
            block: block.cast(),
            resource,
        }
    }

    /// Bind `args` to `f`; `invoke` will call `f(args..)`.
    pub fn bind<F, Args>(f: F, args: Args, resource: SharedResource) -> Self
    where
        F: Apply<Args>,
        Args: Send + 'static,
    {
        Self::new(move || f.apply(args), resource)
    }

    /// Run the callable if nobody has yet.
    ///
    /// Returns `true` if this call ran it. A panic escaping the callable is
    /// caught and logged; the payload still counts as spent.
    pub fn invoke(&self) -> bool {
        let header = self.header();
        if header.spent.swap(true, HANDOFF) {
            return false;
        }

        let call = header.vtable.call;
        let block = self.block;
        // SAFETY: The swap above made us the only caller, and the callable
        // has never been taken.
        let outcome = StdPanic::catch_unwind(AssertUnwindSafe(|| unsafe { call(block) }));

        if let Err(panic) = outcome {
            error_log!(
                reason = panic_message(&*panic),
                bytes = self.size_of(),
                "payload panicked during invoke"
            );
            drop(panic);
        }
        true
    }

    /// Whether the callable has been run (or claimed by a running `invoke`).
    #[must_use]
    #[inline]
    pub fn is_spent(&self) -> bool {
        self.header().spent.load(OBSERVE)
    }

    /// Exact byte size of the block (header plus callable and its arguments).
    #[must_use]
    #[inline]
    pub fn size_of(&self) -> usize {
        self.header().vtable.layout.size()
    }

    #[inline]
    fn header(&self) -> &Header {
        // SAFETY: The block lives until `drop`.
        unsafe { self.block.as_ref() }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let vtable = self.header().vtable;

        if !self.header().spent.load(OBSERVE) {
            // SAFETY: Never invoked, so the callable is still in place.
            unsafe { (vtable.drop_callable)(self.block) };
        }

        // SAFETY: Allocated in `new` from this resource with this layout;
        // `Header` needs no drop.
        unsafe { self.resource.release(self.block.cast(), vtable.layout) };
    }
}

impl StdFmt::Debug for Payload {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Payload")
            .field("bytes", &self.size_of())
            .field("spent", &self.is_spent())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tracing")]
fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
