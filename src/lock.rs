//! The lock module (component C): per-object mutex/rwlock/none acquisition,
//! release, try-lock, and lock-level adjustment on rwlock-flavored objects.
//!
//! Per spec.md §9's design note — "implementations that provide native
//! upgradable rwlocks should use them directly and retire the [lockers]
//! counter" — the rwlock flavor is built directly on
//! `parking_lot::RwLock`'s upgradable read guard, whose own
//! `upgrade`/`try_upgrade`/`downgrade` replace the manual lockers-count
//! bookkeeping spec.md §4.C describes. The public contract (lock/try_lock,
//! and [`Level`]'s escalate-to-write helper) is unchanged.

use std::cell::{Ref, RefMut};
use std::ops::{Deref, DerefMut};

use parking_lot::{
    RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

use crate::object::{Obj, ObjStorage};

/// Which primitive a lock request asks for.
///
/// On a mutex-flavored object this is ignored — a mutex is always
/// exclusive. On a `None`-flavored object there is no safe generic lock
/// entry point at all (see below); on an rwlock-flavored object this
/// selects the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive, mutex-style acquisition.
    Mutex,
    /// Exclusive, writer acquisition on an rwlock.
    Write,
    /// Shared, reader acquisition on an rwlock.
    Read,
}

/// A shared-access guard, usable regardless of the object's lock flavor
/// (aside from `None`, which has no safe generic accessor).
pub enum ObjReadGuard<'a, T> {
    // Field order matters: struct/enum fields drop in declaration order, so
    // `Ref` (which borrows through the `RefCell` behind the mutex) must drop
    // *before* the boxed `ReentrantMutexGuard` releases the mutex that
    // guards it. The guard is boxed so its heap address is stable even as
    // this enum value itself is moved around; `Ref` borrows from the
    // `RefCell` at that stable address, not from the `Box` handle.
    Mutex(Ref<'a, T>, Box<parking_lot::ReentrantMutexGuard<'a, std::cell::RefCell<T>>>),
    RwRead(RwLockReadGuard<'a, T>),
}

impl<'a, T> Deref for ObjReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            ObjReadGuard::Mutex(r, _) => r,
            ObjReadGuard::RwRead(g) => g,
        }
    }
}

/// An exclusive-access guard, usable regardless of the object's lock
/// flavor (aside from `None`).
pub enum ObjWriteGuard<'a, T> {
    // Same field-order constraint as `ObjReadGuard::Mutex` above.
    Mutex(RefMut<'a, T>, Box<parking_lot::ReentrantMutexGuard<'a, std::cell::RefCell<T>>>),
    RwWrite(RwLockWriteGuard<'a, T>),
}

impl<'a, T> Deref for ObjWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            ObjWriteGuard::Mutex(r, _) => r,
            ObjWriteGuard::RwWrite(g) => g,
        }
    }
}

impl<'a, T> DerefMut for ObjWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            ObjWriteGuard::Mutex(r, _) => r,
            ObjWriteGuard::RwWrite(g) => g,
        }
    }
}

impl<T> Obj<T> {
    /// Acquire shared (read) access.
    ///
    /// For a mutex-flavored object this is exclusive anyway ("mode is
    /// ignored" per spec.md §4.C); for an rwlock-flavored object this is a
    /// genuine reader acquisition. Panics if the object has lock flavor
    /// `None` — there is nothing to acquire, and handing back `&T` from a
    /// safe function with zero synchronization would be unsound. `None`
    /// flavor is for payloads this crate itself serializes externally
    /// (container nodes); see `container::hash::Node`'s `unsafe` accessors.
    pub fn lock_read(&self) -> ObjReadGuard<'_, T> {
        match self.storage() {
            ObjStorage::RwLock(lock) => ObjReadGuard::RwRead(lock.read()),
            ObjStorage::Mutex(mutex) => {
                let guard = Box::new(mutex.lock());
                // SAFETY: `guard` is boxed, so its address (and the
                // `RefCell` it derefs to, which lives inside the mutex,
                // not inside the guard) is stable regardless of where the
                // `Box` handle itself is moved to afterwards.
                let cell_ref: &std::cell::RefCell<T> = unsafe { &*(&**guard as *const _) };
                ObjReadGuard::Mutex(cell_ref.borrow(), guard)
            }
            ObjStorage::None(_) => panic!(
                "refhash: attempted to lock a None-flavored object through the generic lock API"
            ),
        }
    }

    /// Acquire exclusive (write) access. Always exclusive, regardless of
    /// flavor (mutex and rwlock both support it directly); panics on
    /// `None` flavor for the same reason as [`Obj::lock_read`].
    pub fn lock_write(&self) -> ObjWriteGuard<'_, T> {
        match self.storage() {
            ObjStorage::RwLock(lock) => ObjWriteGuard::RwWrite(lock.write()),
            ObjStorage::Mutex(mutex) => {
                let guard = Box::new(mutex.lock());
                let cell_ref: &std::cell::RefCell<T> = unsafe { &*(&**guard as *const _) };
                ObjWriteGuard::Mutex(cell_ref.borrow_mut(), guard)
            }
            ObjStorage::None(_) => panic!(
                "refhash: attempted to lock a None-flavored object through the generic lock API"
            ),
        }
    }

    /// `try_lock`: as [`Obj::lock_read`], but never blocks.
    pub fn try_lock_read(&self) -> Option<ObjReadGuard<'_, T>> {
        match self.storage() {
            ObjStorage::RwLock(lock) => lock.try_read().map(ObjReadGuard::RwRead),
            ObjStorage::Mutex(mutex) => mutex.try_lock().map(|guard| {
                let guard = Box::new(guard);
                let cell_ref: &std::cell::RefCell<T> = unsafe { &*(&**guard as *const _) };
                ObjReadGuard::Mutex(cell_ref.borrow(), guard)
            }),
            ObjStorage::None(_) => None,
        }
    }

    /// `try_lock`: as [`Obj::lock_write`], but never blocks.
    pub fn try_lock_write(&self) -> Option<ObjWriteGuard<'_, T>> {
        match self.storage() {
            ObjStorage::RwLock(lock) => lock.try_write().map(ObjWriteGuard::RwWrite),
            ObjStorage::Mutex(mutex) => mutex.try_lock().map(|guard| {
                let guard = Box::new(guard);
                let cell_ref: &std::cell::RefCell<T> = unsafe { &*(&**guard as *const _) };
                ObjWriteGuard::Mutex(cell_ref.borrow_mut(), guard)
            }),
            ObjStorage::None(_) => None,
        }
    }

    /// Direct, unsynchronized access for `None`-flavored objects.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no concurrent access — this crate's only
    /// caller is container-node storage (`container::hash::Node`), whose
    /// payload slot is always touched while the owning container's rwlock
    /// is held, never independently.
    pub(crate) unsafe fn get_unchecked(&self) -> &T {
        match self.storage() {
            ObjStorage::None(cell) => &*cell.get(),
            _ => panic!("refhash: get_unchecked called on a non-None-flavored object"),
        }
    }

    /// As [`Obj::get_unchecked`], but mutable.
    ///
    /// # Safety
    /// See [`Obj::get_unchecked`].
    pub(crate) unsafe fn get_unchecked_mut(&self) -> &mut T {
        match self.storage() {
            ObjStorage::None(cell) => &mut *cell.get(),
            _ => panic!("refhash: get_unchecked_mut called on a non-None-flavored object"),
        }
    }
}

/// The lock-level adjustment protocol (spec.md §4.C): given an
/// already-held upgradable rwlock guard and a desired mode, transiently
/// release and re-acquire in the new mode if — and only if — the current
/// mode differs. This is the mechanism the hash container uses to scan a
/// bucket under cheap, non-exclusive access and only pay for a writer
/// acquisition on the (less common) call that actually mutates something —
/// see `HashContainer::unlink`/`unlink_key` in `container::hash`.
///
/// Obtained via [`Obj::lock_upgradable`], not constructed directly.
pub enum Level<'a, T> {
    Read(RwLockReadGuard<'a, T>),
    Upgradable(RwLockUpgradableReadGuard<'a, T>),
    Write(RwLockWriteGuard<'a, T>),
}

impl<'a, T> Level<'a, T> {
    /// Escalate to `Write` if not already there.
    pub fn escalate_to_write(self) -> Level<'a, T> {
        match self {
            Level::Write(g) => Level::Write(g),
            Level::Upgradable(g) => Level::Write(RwLockUpgradableReadGuard::upgrade(g)),
            Level::Read(_) => {
                unreachable!("refhash: cannot escalate a plain read guard without upgradable lock")
            }
        }
    }
}

impl<'a, T> Deref for Level<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            Level::Read(g) => g,
            Level::Upgradable(g) => g,
            Level::Write(g) => g,
        }
    }
}

impl<'a, T> DerefMut for Level<'a, T> {
    /// Mutable access is only sound once escalated to `Write` — panics
    /// otherwise, mirroring `parking_lot`'s own "upgradable read guards
    /// don't give you `&mut`" rule.
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Level::Write(g) => g,
            _ => panic!("refhash: mutable access requires an exclusive lock level"),
        }
    }
}

impl<T> Obj<T> {
    /// Acquire an upgradable read lock: readable like [`Obj::lock_read`],
    /// but escalatable to exclusive in place via
    /// [`Level::escalate_to_write`] without an intervening unlock/relock
    /// window another writer could slip into. Only one upgradable reader
    /// may be outstanding at a time (ordinary readers may still join it),
    /// matching `parking_lot`'s own upgradable-lock semantics. Panics on
    /// non-rwlock flavors, same as [`Obj::lock_read`]/[`Obj::lock_write`].
    pub fn lock_upgradable(&self) -> Level<'_, T> {
        match self.storage() {
            ObjStorage::RwLock(lock) => Level::Upgradable(lock.upgradable_read()),
            _ => panic!(
                "refhash: lock_upgradable called on a non-rwlock-flavored object"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::LockFlavor;

    #[test]
    fn upgradable_read_sees_committed_state() {
        let obj = Obj::new(vec![1, 2, 3], LockFlavor::RwLock);
        let level = obj.lock_upgradable();
        assert_eq!(*level, vec![1, 2, 3]);
    }

    #[test]
    fn escalate_to_write_grants_mutable_access() {
        let obj = Obj::new(vec![1, 2, 3], LockFlavor::RwLock);
        let level = obj.lock_upgradable();
        let mut level = level.escalate_to_write();
        level.push(4);
        drop(level);
        assert_eq!(*obj.lock_read(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn escalating_an_already_write_level_is_a_no_op() {
        let obj = Obj::new(1u32, LockFlavor::RwLock);
        let level = obj.lock_upgradable().escalate_to_write();
        let level = level.escalate_to_write();
        assert_eq!(*level, 1);
    }

    #[test]
    #[should_panic(expected = "exclusive lock level")]
    fn mutating_an_unescalated_upgradable_level_panics() {
        let obj = Obj::new(1u32, LockFlavor::RwLock);
        let mut level = obj.lock_upgradable();
        *level = 2;
    }
}
