//! Error kinds for the fallible, non-hot-path entry points.
//!
//! Most of this crate's public API returns sentinels (`bool`, `Option`) the
//! way spec'd: `link` returns whether it linked, `find` returns whether it
//! found something, `bump` returns the previous refcount. `Error` exists
//! only for the handful of operations that have a genuine *error kind*
//! rather than a policy outcome — bad construction options, mostly.

quick_error! {
    /// Errors produced by container/object construction and locking.
    #[derive(Debug)]
    pub enum Error {
        /// An unrecognized or internally-inconsistent option was passed to
        /// a constructor (e.g. a hash container asked for zero buckets, or
        /// a lock flavor that doesn't exist).
        InvalidOption(what: &'static str) {
            display("invalid option: {}", what)
        }
        /// The underlying lock primitive reported failure.
        ///
        /// `parking_lot` locks never fail or poison, so this variant is
        /// unreachable in practice. It is kept for interface completeness:
        /// spec.md lists lock-primitive-failure as a distinct error kind,
        /// and a future lock backend might not have the same guarantee.
        LockPrimitive(what: &'static str) {
            display("lock primitive failure: {}", what)
        }
    }
}
