//! The global holder (component D): a named slot owning at most one strong
//! reference, with atomic replace/release semantics. Typically used for a
//! process-wide singleton built on top of [`crate::object::Obj`].

use parking_lot::RwLock;

use crate::object::Obj;

/// A latch containing one nullable owning reference, guarded by an rwlock.
///
/// Invariant: any reader observing a non-`None` slot sees a live object,
/// with its own refcount bump on that reader's behalf (spec.md §3).
pub struct GlobalHolder<T> {
    slot: RwLock<Option<Obj<T>>>,
}

impl<T> GlobalHolder<T> {
    /// An empty holder.
    pub fn new() -> GlobalHolder<T> {
        GlobalHolder { slot: RwLock::new(None) }
    }

    /// Write-lock, drop the stored reference (if any), clear the slot,
    /// unlock.
    pub fn release(&self) {
        let mut slot = self.slot.write();
        *slot = None;
    }

    /// Write-lock, swap the slot for `new`, unlock, and return the
    /// previous occupant — ownership of which transfers to the caller.
    ///
    /// Unlike the C original, there is no separate "bump `new`'s refcount"
    /// step: passing an owned `Obj<T>` already *is* the caller handing over
    /// one reference-count unit. A caller that wants to keep its own copy
    /// clones before calling `replace`.
    pub fn replace(&self, new: Option<Obj<T>>) -> Option<Obj<T>> {
        let mut slot = self.slot.write();
        std::mem::replace(&mut *slot, new)
    }

    /// [`GlobalHolder::replace`], immediately releasing whatever was
    /// previously held.
    pub fn replace_and_release(&self, new: Option<Obj<T>>) {
        drop(self.replace(new));
    }

    /// Read-lock, clone the slot's occupant (bumping its refcount on the
    /// caller's behalf), unlock, and return the caller-owned reference.
    pub fn acquire(&self) -> Option<Obj<T>> {
        self.slot.read().clone()
    }
}

impl<T> Default for GlobalHolder<T> {
    fn default() -> GlobalHolder<T> {
        GlobalHolder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::LockFlavor;

    #[test]
    fn empty_holder_acquires_nothing() {
        let holder: GlobalHolder<u32> = GlobalHolder::new();
        assert!(holder.acquire().is_none());
    }

    #[test]
    fn replace_returns_previous_and_bumps_new() {
        let holder = GlobalHolder::new();
        let a = Obj::new(1u32, LockFlavor::None);
        assert_eq!(a.bump(0), 1);

        let prev = holder.replace(Some(a.clone()));
        assert!(prev.is_none());
        assert_eq!(a.bump(0), 2);

        let b = Obj::new(2u32, LockFlavor::None);
        let prev = holder.replace(Some(b));
        assert!(prev.is_some());
        drop(prev);
        assert_eq!(a.bump(0), 1);
    }

    #[test]
    fn acquire_bumps_refcount() {
        let holder = GlobalHolder::new();
        let a = Obj::new(7u32, LockFlavor::RwLock);
        holder.replace(Some(a.clone()));
        assert_eq!(a.bump(0), 2);

        let acquired = holder.acquire().unwrap();
        assert_eq!(a.bump(0), 3);
        drop(acquired);
        assert_eq!(a.bump(0), 2);
    }

    #[test]
    fn release_drops_held_reference() {
        let holder = GlobalHolder::new();
        let a = Obj::new(3u32, LockFlavor::None);
        holder.replace(Some(a.clone()));
        assert_eq!(a.bump(0), 2);
        holder.release();
        assert_eq!(a.bump(0), 1);
    }
}
