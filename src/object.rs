//! The object header & allocator (component A) and the reference manager
//! (component B).
//!
//! An [`Obj<T>`] is a smart handle around a private record of `{ header,
//! storage }`, exactly the type-punning trick spec.md §9 sanctions: there is
//! no pointer arithmetic from a payload address back to a header anywhere in
//! this crate. Cloning an `Obj<T>` bumps the refcount; dropping one releases
//! it. The last release runs `T`'s destructor (if any — "optional
//! destructor" is simply whether `T: Drop`) and frees the allocation.

use std::cell::{RefCell, UnsafeCell};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::{ReentrantMutex, RwLock};

/// Debug-only sentinel, checked on every public entry point per spec.md
/// §3. A typed reimplementation derives no semantics from it (spec.md §9) —
/// it is kept purely as the use-after-free tripwire spec.md describes, so
/// that a stray access through an already-freed `Obj<T>` trips a debug
/// assertion instead of reading freed memory undetected.
const MAGIC: u32 = 0xA0_2C_0DE1_u32 as u32;

/// Which locking primitive an object's header carries, fixed at allocation.
///
/// Matches spec.md §6's `LOCK_NONE | LOCK_MUTEX | LOCK_RWLOCK` object option
/// bits, made into a real enum rather than a bit field — there is nothing
/// to combine, an object has exactly one flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFlavor {
    /// No synchronization at all. Access is only sound when the embedder
    /// has arranged external serialization (this is how container nodes
    /// use it: the owning container's rwlock already serializes every
    /// touch of a node's payload slot and links).
    None,
    /// A recursive mutex: the same thread may re-acquire it without
    /// deadlocking, per spec.md §5's lock discipline note.
    Mutex,
    /// A reader/writer lock, supporting the lock-level adjustment protocol
    /// in [`crate::lock`].
    RwLock,
}

pub(crate) enum ObjStorage<T> {
    None(UnsafeCell<T>),
    Mutex(ReentrantMutex<RefCell<T>>),
    RwLock(RwLock<T>),
}

// SAFETY: `ObjStorage::None` is only ever touched through the `unsafe`
// accessors in `lock.rs`, whose callers are responsible for external
// serialization (container nodes, which are always mutated under the
// owning container's write lock). `Mutex` and `RwLock` provide their own
// synchronization.
unsafe impl<T: Send> Send for ObjStorage<T> {}
unsafe impl<T: Send> Sync for ObjStorage<T> {}

struct ObjHeader {
    ref_count: AtomicIsize,
    magic: UnsafeCell<u32>,
}

struct ObjInner<T> {
    header: ObjHeader,
    storage: ObjStorage<T>,
}

/// A reference-counted handle to a `T`, with a programmable lock flavor.
///
/// This is the public handle of component A: callers never see the header,
/// only this smart reference. Refcount invariants (spec.md §8, properties
/// 1–2): immediately after `Obj::new`, `bump(0) == 1`; `n` clones and `m`
/// drops with `n - m > 0` leave `bump(0) == 1 + n - m` and never run the
/// destructor; at `n - m == 0` the destructor runs exactly once.
pub struct Obj<T> {
    ptr: NonNull<ObjInner<T>>,
}

impl<T> Obj<T> {
    /// Allocate a new object with refcount 1.
    ///
    /// There is no `destructor_fn` parameter: in the C original the
    /// destructor is an optional function pointer invoked on the last
    /// release; here it is simply whatever `Drop` impl `T` has (or none).
    /// This is spec.md's own "type-punning header trick" design note
    /// applied one step further — see `DESIGN.md`.
    pub fn new(payload: T, flavor: LockFlavor) -> Obj<T> {
        let storage = match flavor {
            LockFlavor::None => ObjStorage::None(UnsafeCell::new(payload)),
            LockFlavor::Mutex => ObjStorage::Mutex(ReentrantMutex::new(RefCell::new(payload))),
            LockFlavor::RwLock => ObjStorage::RwLock(RwLock::new(payload)),
        };
        let inner = Box::new(ObjInner {
            header: ObjHeader {
                ref_count: AtomicIsize::new(1),
                magic: UnsafeCell::new(MAGIC),
            },
            storage,
        });
        Obj {
            // SAFETY: `Box::into_raw` never returns null.
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(inner)) },
        }
    }

    fn inner(&self) -> &ObjInner<T> {
        // SAFETY: as long as any `Obj<T>` exists the refcount is >= 1, so
        // the allocation is still live.
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn storage(&self) -> &ObjStorage<T> {
        &self.inner().storage
    }

    /// Which lock flavor this object was allocated with.
    pub fn flavor(&self) -> LockFlavor {
        match &self.inner().storage {
            ObjStorage::None(_) => LockFlavor::None,
            ObjStorage::Mutex(_) => LockFlavor::Mutex,
            ObjStorage::RwLock(_) => LockFlavor::RwLock,
        }
    }

    fn check_magic(&self) {
        // SAFETY: reading a single `u32` written once at construction and
        // never mutated except by the final release (which only happens
        // after this value can no longer be observed by a live `Obj`).
        let magic = unsafe { *self.inner().header.magic.get() };
        debug_assert_eq!(magic, MAGIC, "refhash: object header corrupted or already freed");
    }

    /// The reference manager's `adjust`: atomically add `delta` to the
    /// refcount and return the refcount *before* the adjustment.
    ///
    /// `delta == 0` is a pure read with no side effects (spec.md §4.B).
    /// Reaching exactly zero runs the destructor and frees the object.
    /// Going negative is spec.md §9's Open Question (ii), decided here:
    /// made fatal rather than logged-and-continued, since silently
    /// treating an observed-negative refcount as zero risks a double free.
    pub fn bump(&self, delta: isize) -> isize {
        self.check_magic();
        if delta == 0 {
            return self.inner().header.ref_count.load(Ordering::SeqCst);
        }
        let prev = self.inner().header.ref_count.fetch_add(delta, Ordering::SeqCst);
        let new = prev + delta;
        if new == 0 {
            // SAFETY: the fetch_add above is the linearization point; we
            // are the thread that observed the transition to zero, and by
            // invariant no other `Obj<T>` can exist once that happens, so
            // destruction is single-threaded by construction.
            unsafe { self.destroy() };
        } else if new < 0 {
            panic!("refhash: refcount underflow — object released more times than acquired");
        }
        prev
    }

    /// `cleanup(handle)`: a null-safe convenience equivalent to
    /// `bump(handle, -1)`, tolerating an absent handle.
    pub fn cleanup(handle: Option<Obj<T>>) {
        drop(handle);
    }

    /// `release(handle) ≡ bump(handle, −1)`. Consumes the handle; spelled
    /// out for parity with spec.md §6, though plain `drop(obj)` does the
    /// same thing.
    pub fn release(self) {
        drop(self);
    }

    /// Whether two handles refer to the same underlying object (pointer
    /// identity, not any notion of value equality on `T`).
    pub fn ptr_eq(a: &Obj<T>, b: &Obj<T>) -> bool {
        a.ptr == b.ptr
    }

    unsafe fn destroy(&self) {
        // Zero the header's magic before the storage (and hence `T`) is
        // dropped, so a stray access through an already-dangling handle
        // trips the debug assertion instead of reading through freed
        // memory undetected in a debug build. This has no effect on
        // release-build semantics — spec.md §9 is explicit that magic
        // "derives no semantics" beyond the debug probe.
        #[cfg(debug_assertions)]
        {
            *self.inner().header.magic.get() = 0;
        }
        // Reconstruct the Box and let it drop: this runs `ObjStorage<T>`'s
        // destructor (and so `T`'s, if any) and frees the allocation.
        drop(Box::from_raw(self.ptr.as_ptr()));
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Obj<T> {
        // An extra reference to an object that is about to reach zero
        // (a half-finished release racing with this clone) cannot happen:
        // the caller must already hold a valid `Obj<T>` to call `clone` on,
        // which by invariant means the refcount is >= 1 and will not drop
        // below 1 until this call's `fetch_add` has been observed.
        self.bump(1);
        Obj { ptr: self.ptr }
    }
}

impl<T> Drop for Obj<T> {
    fn drop(&mut self) {
        self.bump(-1);
    }
}

impl<T> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Obj")
            .field("ptr", &self.ptr)
            .field("refcount", &self.bump(0))
            .finish()
    }
}

unsafe impl<T: Send + Sync> Send for Obj<T> {}
unsafe impl<T: Send + Sync> Sync for Obj<T> {}
