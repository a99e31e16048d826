//! The container base contract (component E) and its hash-bucketed
//! implementation (component F, `hash.rs`) plus the iterator protocol
//! (component G, `iter.rs`).
//!
//! A container is, itself, just another reference-counted object
//! ([`crate::object::Obj`]) whose payload is the bucket array, fixed to
//! lock flavor [`crate::object::LockFlavor::RwLock`] — "the container's
//! write lock" of spec.md §4.F *is* the object rwlock of component C
//! applied to the container's own header. This unification is a
//! deliberate choice documented in `DESIGN.md`.

mod hash;
mod iter;
#[cfg(test)]
mod tests;

pub use hash::HashContainer;
pub use iter::ContainerIter;

/// Where a newly linked object goes within its bucket absent a sort
/// function (spec.md §6 `INSERT_BEGIN` vs default append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrder {
    Append,
    Prepend,
}

impl Default for InsertOrder {
    fn default() -> InsertOrder {
        InsertOrder::Append
    }
}

/// The rule applied when an about-to-be-inserted object compares equal
/// under the sort function to an existing node (spec.md §6
/// `DUPS_ALLOW | DUPS_REJECT | DUPS_OBJ_REJECT | DUPS_REPLACE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupPolicy {
    /// Keep both; insertion order among equal keys is preserved.
    Allow,
    /// Refuse any equal-key insertion.
    Reject,
    /// Refuse only if the payload identity (not merely the key) matches.
    RejectSameObject,
    /// Replace the held payload of the existing node.
    Replace,
}

impl Default for DupPolicy {
    fn default() -> DupPolicy {
        DupPolicy::Allow
    }
}

/// Construction-time options for a container (spec.md §3's container
/// "option bits" field, turned into a plain struct — nothing here combines
/// as a bit field, so a bit field would just be indirection).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerOptions {
    pub insert_order: InsertOrder,
    pub dup_policy: DupPolicy,
}

/// Traversal direction (spec.md §6 `ORDER_ASCENDING`/`ORDER_DESCENDING`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Default for Direction {
    fn default() -> Direction {
        Direction::Ascending
    }
}

/// Flags controlling a `callback`/`find`-style traversal (spec.md §6
/// `MULTIPLE | UNLINK | NODATA | CONTINUE | ORDER_*`).
///
/// Three bits from spec.md's traversal flag word are deliberately not
/// reified here: `POINTER`/`KEY`/`PARTIAL_KEY` (lookup mode) is encoded by
/// which method you call (`find` vs `find_by_ptr` vs `callback`) rather
/// than a flag; `NOLOCK` ("caller already holds the lock") is not
/// implemented, see `DESIGN.md` for why; and `CONTINUE` (wrap-around
/// key-scoped search past the starting bucket) is not reified either — this
/// crate's `find`/`find_key` only ever probe the one bucket the hash
/// function names, which is correct for a well-distributed hash, and
/// wrap-around search only matters for the partial-key lookup mode this
/// crate does not implement (see `DESIGN.md`'s Open Questions).
#[derive(Debug, Clone, Copy)]
pub struct TraverseFlags {
    pub direction: Direction,
    /// Gather every match, not just the first.
    pub multiple: bool,
    /// Remove matched nodes from the container as they're found.
    pub unlink: bool,
}

impl Default for TraverseFlags {
    fn default() -> TraverseFlags {
        TraverseFlags {
            direction: Direction::Ascending,
            multiple: false,
            unlink: false,
        }
    }
}

/// The two-bit result of a traversal match callback (spec.md §4.F step 5):
/// a match bit and a stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub stop: bool,
}

impl MatchResult {
    pub const CONTINUE: MatchResult = MatchResult { matched: false, stop: false };
    pub const MATCH: MatchResult = MatchResult { matched: true, stop: false };
    pub const STOP: MatchResult = MatchResult { matched: false, stop: true };
    pub const MATCH_AND_STOP: MatchResult = MatchResult { matched: true, stop: true };
}

/// Flags for the stateful iterator protocol (spec.md §6 `UNLINK | DONTLOCK
/// | MALLOCD | DESCENDING`).
///
/// `MALLOCD` ("externally allocated") is not reified: every `ContainerIter`
/// in this crate is an ordinary owned Rust value, there is no separate
/// "was this heap-allocated by the caller" concern. `DONTLOCK` is not
/// implemented, for the same reason as `TraverseFlags`'s `NOLOCK`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterFlags {
    pub descending: bool,
    pub unlink: bool,
}

/// The outcome of a traversal: nothing, exactly one match, or (when
/// `TraverseFlags::multiple` was set) every match, collected eagerly under
/// a single lock acquisition and handed back as a snapshot iterator.
///
/// spec.md §4.F step 9 describes allocating "a private list-shaped
/// container" to accumulate multiple results and wrapping it in an
/// iterator; this crate collects into a plain `Vec` instead (see
/// `DESIGN.md`) — the observable contract (an iterator yielding every
/// match once, then exhausting) is identical.
pub enum Found<P> {
    None,
    One(crate::object::Obj<P>),
    Many(Matches<P>),
}

impl<P> Found<P> {
    /// Collapse to a single match, discarding anything past the first —
    /// useful when a caller knows only one result is semantically possible.
    pub fn into_single(self) -> Option<crate::object::Obj<P>> {
        match self {
            Found::None => None,
            Found::One(obj) => Some(obj),
            Found::Many(mut matches) => matches.next(),
        }
    }
}

/// A snapshot iterator over an already-collected set of matches.
pub struct Matches<P> {
    inner: std::vec::IntoIter<crate::object::Obj<P>>,
}

impl<P> Matches<P> {
    pub(crate) fn new(items: Vec<crate::object::Obj<P>>) -> Matches<P> {
        Matches { inner: items.into_iter() }
    }
}

impl<P> Iterator for Matches<P> {
    type Item = crate::object::Obj<P>;
    fn next(&mut self) -> Option<crate::object::Obj<P>> {
        self.inner.next()
    }
}
