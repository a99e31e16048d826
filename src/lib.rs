//! `refhash` — a reference-counted object runtime with hash-bucketed
//! associative containers.
//!
//! This is the shared data-structure foundation for a long-running,
//! multi-threaded server process. Every object carries its own refcount, an
//! optional lock (none, a recursive mutex, or a reader/writer lock), and a
//! destructor; containers hold strong references to objects and coordinate
//! concurrent lookup, insertion, unlinking and iteration under a single
//! per-container lock.
//!
//! ## Layout
//!
//! - [`object`] — the refcounted object header, allocator and reference
//!   manager (`Obj<T>`).
//! - [`lock`] — the lock module: per-object mutex/rwlock/none flavor, and
//!   the lock-level adjustment (upgrade/downgrade) protocol.
//! - [`holder`] — a named slot owning at most one strong reference, with
//!   atomic replace/release semantics.
//! - [`container`] — the hash-bucketed container (and its degenerate
//!   one-bucket list form), plus the iterator protocol.
//! - [`registry`] — an optional named map of live containers, gated behind
//!   the `registry` feature (default-on).
//!
//! ## What this crate is not
//!
//! There is no persistence, serialization, or cross-process sharing. Strong
//! reference cycles leak, same as `Rc`/`Arc` cycles always do — breaking
//! them is the embedder's job. There is no lock-free container; correctness
//! comes from conventional locking, not from atomics alone.

#[macro_use]
extern crate quick_error;

pub mod object;
pub mod lock;
pub mod holder;
pub mod container;
#[cfg(feature = "registry")]
pub mod registry;

mod error;

pub use error::Error;
pub use object::{Obj, LockFlavor};
pub use holder::GlobalHolder;
pub use container::{
    ContainerIter, ContainerOptions, Direction, DupPolicy, Found, HashContainer, InsertOrder,
    IterFlags, MatchResult, Matches, TraverseFlags,
};
#[cfg(feature = "registry")]
pub use registry::{RegisteredContainer, Registry, RegistryStats};

/// Build a logger that discards everything.
///
/// Every piece of this crate that can usefully narrate itself (allocation
/// failure, a destructor firing on a corrupted refcount, registry
/// (un)registration) takes a `&slog::Logger` and defaults to this when the
/// embedder doesn't care. Hot paths — refcount bump/release, bucket
/// traversal — never log at all, not even to a discard drain, to keep them
/// free of the branch.
pub fn null_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
