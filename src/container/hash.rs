//! The hash-bucketed container (component F).
//!
//! A container's bucket array is the payload of its own
//! [`Obj`]`<ContainerData<P>>`, fixed to [`LockFlavor::RwLock`] — see
//! `container::mod`'s module doc. Within each bucket, elements are kept in
//! a `Vec` of nodes rather than a hand-rolled intrusive doubly-linked list;
//! `DESIGN.md` records why, and why that choice still honors spec.md's
//! "node vs. payload refcount" design note: a node ([`Node`]) stays a
//! distinct refcounted handle from the payload it holds, so a walker that
//! captured a node before a concurrent unlink still has a live, valid
//! handle afterwards even though the node no longer appears in any
//! bucket's `Vec`.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::lock::{Level, ObjReadGuard, ObjWriteGuard};
use crate::object::{LockFlavor, Obj};
use crate::Error;

use super::{ContainerOptions, Direction, DupPolicy, Found, InsertOrder, Matches, TraverseFlags};

/// A container slot: an independently refcounted handle whose payload is
/// either `Some(object)` (linked) or `None` (tombstoned — see the module
/// doc; in this crate that state is never observable outside a single
/// locked call, but the slot still exists to match spec.md's vocabulary
/// and to leave room for a future lock-adjustment-based traversal).
pub(crate) type Node<P> = Obj<Option<Obj<P>>>;

fn new_node<P>(payload: Obj<P>) -> Node<P> {
    Obj::new(Some(payload), LockFlavor::None)
}

struct Bucket<P> {
    nodes: Vec<Node<P>>,
}

impl<P> Bucket<P> {
    fn new() -> Bucket<P> {
        Bucket { nodes: Vec::new() }
    }
}

enum LinkOutcome {
    Inserted,
    Replaced,
    Rejected,
}

type HashFn<P> = Arc<dyn Fn(&Obj<P>) -> u64 + Send + Sync>;
type SortFn<P> = Arc<dyn Fn(&Obj<P>, &Obj<P>) -> Ordering + Send + Sync>;
type MatchFn<P> = Arc<dyn Fn(&Obj<P>, &Obj<P>) -> bool + Send + Sync>;

struct ContainerData<P> {
    buckets: Vec<Bucket<P>>,
    hash_fn: HashFn<P>,
    sort_fn: Option<SortFn<P>>,
    match_fn: MatchFn<P>,
    options: ContainerOptions,
}

impl<P> Clone for ContainerData<P> {
    /// A shallow clone of the container's configuration (shared function
    /// pointers via `Arc`) with empty buckets — used by
    /// [`HashContainer::clone_container`] to build the fresh destination
    /// before copying elements across.
    fn clone(&self) -> ContainerData<P> {
        ContainerData {
            buckets: (0..self.buckets.len()).map(|_| Bucket::new()).collect(),
            hash_fn: self.hash_fn.clone(),
            sort_fn: self.sort_fn.clone(),
            match_fn: self.match_fn.clone(),
            options: self.options,
        }
    }
}

impl<P> ContainerData<P> {
    fn bucket_index(&self, obj: &Obj<P>) -> usize {
        let hash = (self.hash_fn)(obj);
        (hash as usize) % self.buckets.len()
    }
}

/// A hash-bucketed, duplicate-policy-aware, order-preserving associative
/// container of reference-counted objects (spec.md §4.F).
///
/// `HashContainer` is itself cheaply `Clone` — cloning bumps the refcount
/// on the shared bucket array and shares the lock-free element counter,
/// exactly like cloning any other [`Obj`] handle.
pub struct HashContainer<P> {
    inner: Obj<ContainerData<P>>,
    count: Arc<AtomicUsize>,
}

impl<P> Clone for HashContainer<P> {
    fn clone(&self) -> HashContainer<P> {
        HashContainer {
            inner: self.inner.clone(),
            count: self.count.clone(),
        }
    }
}

impl<P: Send + Sync + 'static> HashContainer<P> {
    /// Allocate a hash container with `n_buckets` buckets.
    ///
    /// `hash_fn`, `sort_fn`, and `match_fn` all take `&Obj<P>` rather than
    /// `&P` — they are responsible for reading through the payload's own
    /// lock flavor themselves (typically `obj.lock_read()`), since the
    /// container has no way to know how an arbitrary payload type wants to
    /// be read. `sort_fn` is optional: without one, elements within a
    /// bucket keep strict insertion order and duplicate detection only
    /// catches pointer-identical relinks the caller explicitly checks for.
    ///
    /// Fails with [`Error::InvalidOption`] if `n_buckets == 0` — spec.md
    /// §7's *invalid-option* error kind, produced here rather than a panic
    /// since a caller-supplied bucket count is exactly the kind of
    /// constructor-time mistake that error kind exists for.
    pub fn new<H, S, M>(
        options: ContainerOptions,
        n_buckets: usize,
        hash_fn: H,
        sort_fn: Option<S>,
        match_fn: M,
    ) -> Result<HashContainer<P>, Error>
    where
        H: Fn(&Obj<P>) -> u64 + Send + Sync + 'static,
        S: Fn(&Obj<P>, &Obj<P>) -> Ordering + Send + Sync + 'static,
        M: Fn(&Obj<P>, &Obj<P>) -> bool + Send + Sync + 'static,
    {
        if n_buckets == 0 {
            return Err(Error::InvalidOption("n_buckets must be at least 1"));
        }
        let data = ContainerData {
            buckets: (0..n_buckets).map(|_| Bucket::new()).collect(),
            hash_fn: Arc::new(hash_fn),
            sort_fn: sort_fn.map(|f| Arc::new(f) as SortFn<P>),
            match_fn: Arc::new(match_fn),
            options,
        };
        Ok(HashContainer {
            inner: Obj::new(data, LockFlavor::RwLock),
            count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The degenerate, single-bucket construction spec.md §4.F calls out
    /// as a "list-shaped container" — every element hashes to bucket 0, so
    /// ordering is governed entirely by `sort_fn`/insertion order.
    ///
    /// Infallible: `n_buckets = 1` can never trip [`HashContainer::new`]'s
    /// only failure case.
    pub fn list<S, M>(options: ContainerOptions, sort_fn: Option<S>, match_fn: M) -> HashContainer<P>
    where
        S: Fn(&Obj<P>, &Obj<P>) -> Ordering + Send + Sync + 'static,
        M: Fn(&Obj<P>, &Obj<P>) -> bool + Send + Sync + 'static,
    {
        HashContainer::new(options, 1, |_: &Obj<P>| 0u64, sort_fn, match_fn)
            .expect("refhash: list construction always uses n_buckets = 1, which is always valid")
    }

    /// The lock-free element counter (spec.md §4.F: "count reads the
    /// atomic element counter" without acquiring the container's lock).
    pub fn count(&self) -> usize {
        self.count.load(AtomicOrdering::SeqCst)
    }

    fn read(&self) -> ObjReadGuard<'_, ContainerData<P>> {
        self.inner.lock_read()
    }

    fn write(&self) -> ObjWriteGuard<'_, ContainerData<P>> {
        self.inner.lock_write()
    }

    /// Link `obj` into the container per its configured insert order and
    /// duplicate policy. Returns whether a new element was linked (`false`
    /// on an outright rejection; a `Replace` counts as linked but does not
    /// change [`HashContainer::count`]).
    pub fn link(&self, obj: &Obj<P>) -> bool {
        let mut data = self.write();
        let idx = data.bucket_index(obj);
        let node = new_node(obj.clone());
        let sort_fn = data.sort_fn.as_ref().map(|f| f.as_ref());
        let dup_policy = data.options.dup_policy;
        let insert_order = data.options.insert_order;
        let bucket = &mut data.buckets[idx];
        let outcome = match sort_fn {
            Some(sort_fn) => insert_sorted(bucket, node, obj, sort_fn, dup_policy, insert_order),
            None => {
                match insert_order {
                    InsertOrder::Append => bucket.nodes.push(node),
                    InsertOrder::Prepend => bucket.nodes.insert(0, node),
                }
                LinkOutcome::Inserted
            }
        };
        match outcome {
            LinkOutcome::Inserted => {
                self.count.fetch_add(1, AtomicOrdering::SeqCst);
                true
            }
            LinkOutcome::Replaced => true,
            LinkOutcome::Rejected => false,
        }
    }

    /// Look up by key: the container's bound `match_fn` decides which
    /// element (if any) in `probe`'s bucket is the one being searched for.
    pub fn find(&self, probe: &Obj<P>) -> Option<Obj<P>> {
        let data = self.read();
        let idx = data.bucket_index(probe);
        find_in_bucket(&data.buckets[idx], probe, data.match_fn.as_ref())
    }

    /// Look up by pointer identity rather than `match_fn`.
    pub fn find_by_ptr(&self, probe: &Obj<P>) -> Option<Obj<P>> {
        let data = self.read();
        let idx = data.bucket_index(probe);
        data.buckets[idx]
            .nodes
            .iter()
            .find_map(|node| payload_of(node).filter(|p| Obj::ptr_eq(p, probe)))
    }

    /// Unlink by key (`match_fn`). Returns whether an element was removed.
    ///
    /// Uses the lock-level adjustment protocol (spec.md §4.C,
    /// [`crate::lock::Level`]): the bucket is scanned under a merely
    /// upgradable read lock — which other plain readers may still join —
    /// and only escalated to a full writer acquisition once a match is
    /// actually found to remove. A miss never pays for exclusive access.
    pub fn unlink_key(&self, probe: &Obj<P>) -> bool {
        let level = self.inner.lock_upgradable();
        let idx = level.bucket_index(probe);
        let match_fn = level.match_fn.clone();
        if !level.buckets[idx].nodes.iter().any(|n| {
            payload_of(n).map(|p| match_fn(&p, probe)).unwrap_or(false)
        }) {
            return false;
        }
        let mut level = level.escalate_to_write();
        remove_where(&mut level.buckets[idx], &self.count, |candidate| match_fn(candidate, probe))
    }

    /// Unlink by pointer identity. Returns whether an element was removed.
    ///
    /// Same upgradable-then-escalate discipline as [`HashContainer::unlink_key`].
    pub fn unlink(&self, obj: &Obj<P>) -> bool {
        let level = self.inner.lock_upgradable();
        let idx = level.bucket_index(obj);
        if !level.buckets[idx].nodes.iter().any(|n| {
            payload_of(n).map(|p| Obj::ptr_eq(&p, obj)).unwrap_or(false)
        }) {
            return false;
        }
        let mut level = level.escalate_to_write();
        remove_where(&mut level.buckets[idx], &self.count, |candidate| Obj::ptr_eq(candidate, obj))
    }

    /// The general-purpose traversal (spec.md §4.F `callback`): scans every
    /// bucket, in the requested direction, invoking `f` on each live
    /// element. `flags.unlink` removes matched elements as they're found;
    /// `flags.multiple` collects every match instead of stopping at (or
    /// the callback requesting via `MatchResult::stop`) the first.
    ///
    /// Unlike `find`/`unlink`, this always performs a full scan — it has no
    /// hash to narrow the starting bucket with, since `f` is an arbitrary
    /// caller predicate rather than the container's bound `match_fn`.
    pub fn callback<F>(&self, flags: TraverseFlags, mut f: F) -> Found<P>
    where
        F: FnMut(&Obj<P>) -> super::MatchResult,
    {
        let mut out = Vec::new();
        if flags.unlink {
            let mut data = self.write();
            let n = data.buckets.len();
            let order: Box<dyn Iterator<Item = usize>> = match flags.direction {
                Direction::Ascending => Box::new(0..n),
                Direction::Descending => Box::new((0..n).rev()),
            };
            'buckets: for idx in order {
                let mut i = match flags.direction {
                    Direction::Ascending => 0,
                    Direction::Descending => data.buckets[idx].nodes.len().wrapping_sub(1),
                };
                loop {
                    let len = data.buckets[idx].nodes.len();
                    if len == 0 || i >= len {
                        break;
                    }
                    let payload = match payload_of(&data.buckets[idx].nodes[i]) {
                        Some(p) => p,
                        None => {
                            advance(&mut i, flags.direction);
                            continue;
                        }
                    };
                    let result = f(&payload);
                    if result.matched {
                        data.buckets[idx].nodes.remove(i);
                        self.count.fetch_sub(1, AtomicOrdering::SeqCst);
                        out.push(payload);
                        if !flags.multiple || result.stop {
                            break 'buckets;
                        }
                        // removal shifted everything after `i` down by one;
                        // re-examine this index on the next loop iteration.
                        if flags.direction == Direction::Descending {
                            if i == 0 {
                                break;
                            }
                            i -= 1;
                        }
                        continue;
                    }
                    if result.stop {
                        break 'buckets;
                    }
                    advance(&mut i, flags.direction);
                }
            }
        } else {
            let data = self.read();
            let n = data.buckets.len();
            let bucket_order: Box<dyn Iterator<Item = usize>> = match flags.direction {
                Direction::Ascending => Box::new(0..n),
                Direction::Descending => Box::new((0..n).rev()),
            };
            'ro_buckets: for idx in bucket_order {
                let node_iter: Box<dyn Iterator<Item = &Node<P>>> = match flags.direction {
                    Direction::Ascending => Box::new(data.buckets[idx].nodes.iter()),
                    Direction::Descending => Box::new(data.buckets[idx].nodes.iter().rev()),
                };
                for node in node_iter {
                    let payload = match payload_of(node) {
                        Some(p) => p,
                        None => continue,
                    };
                    let result = f(&payload);
                    if result.matched {
                        out.push(payload);
                        if !flags.multiple || result.stop {
                            break 'ro_buckets;
                        }
                    } else if result.stop {
                        break 'ro_buckets;
                    }
                }
            }
        }

        match out.len() {
            0 => Found::None,
            1 if !flags.multiple => Found::One(out.pop().unwrap()),
            _ => Found::Many(Matches::new(out)),
        }
    }

    /// Remove every element for which `keep` returns `false`, in a single
    /// write-lock acquisition. Supplemental to the translated interface —
    /// see `SPEC_FULL.md` §10 — grounded in `ao2_callback`'s
    /// `OBJ_MULTIPLE | OBJ_NODATA | OBJ_UNLINK` sweep idiom from
    /// `original_source/main/astobj2.c`.
    pub fn retain<F: FnMut(&Obj<P>) -> bool>(&self, mut keep: F) {
        let mut data = self.write();
        for bucket in &mut data.buckets {
            let mut i = 0;
            while i < bucket.nodes.len() {
                let should_remove = match payload_of(&bucket.nodes[i]) {
                    Some(p) => !keep(&p),
                    None => true,
                };
                if should_remove {
                    bucket.nodes.remove(i);
                    self.count.fetch_sub(1, AtomicOrdering::SeqCst);
                } else {
                    i += 1;
                }
            }
        }
    }

    /// A defensive copy: a fresh container with the same options and
    /// functions, containing clones (bumped references, not deep copies)
    /// of every currently-linked object, in the same per-bucket order.
    pub fn clone_container(&self) -> HashContainer<P>
    where
        P: 'static,
    {
        let data = self.read();
        let fresh = HashContainer {
            inner: Obj::new((*data).clone(), LockFlavor::RwLock),
            count: Arc::new(AtomicUsize::new(0)),
        };
        {
            let mut fresh_data = fresh.write();
            for (idx, bucket) in data.buckets.iter().enumerate() {
                for node in &bucket.nodes {
                    if let Some(payload) = payload_of(node) {
                        fresh_data.buckets[idx].nodes.push(new_node(payload));
                    }
                }
            }
        }
        fresh.count.store(self.count(), AtomicOrdering::SeqCst);
        fresh
    }

    /// Link every element of `src` into `self` (spec.md §4.F's `dup`: "fold
    /// a source container's elements into a destination"). Returns whether
    /// every element was accepted (a `false` means at least one was
    /// rejected by `self`'s duplicate policy).
    pub fn dup(&self, src: &HashContainer<P>) -> bool {
        let src_data = src.read();
        let mut all_linked = true;
        for bucket in &src_data.buckets {
            for node in &bucket.nodes {
                if let Some(payload) = payload_of(node) {
                    all_linked &= self.link(&payload);
                }
            }
        }
        all_linked
    }

    /// Internal consistency check (spec.md §4.F `check`): every bucket's
    /// elements hash back to that same bucket, and the lock-free counter
    /// agrees with the number of live (non-tombstoned) nodes actually
    /// present.
    pub fn check(&self) -> bool {
        let data = self.read();
        let mut actual = 0usize;
        for (idx, bucket) in data.buckets.iter().enumerate() {
            for node in &bucket.nodes {
                if let Some(payload) = payload_of(node) {
                    if data.bucket_index(&payload) != idx {
                        return false;
                    }
                    actual += 1;
                }
            }
        }
        actual == self.count()
    }

    /// How many buckets this container was allocated with.
    pub(crate) fn bucket_count(&self) -> usize {
        self.read().buckets.len()
    }

    /// Allocate a stateful iterator over this container (spec.md §4.G's
    /// `iterator_init`/`next`/`destroy` protocol). The returned
    /// [`super::ContainerIter`] holds a strong reference to this container
    /// (via `self.clone()`), so the container cannot be fully released
    /// while the iterator is alive, and holds a node reference across
    /// unlock/relock between calls so it keeps its place even as
    /// neighboring elements are linked or unlinked concurrently.
    pub fn iter(&self, flags: super::IterFlags) -> super::ContainerIter<P> {
        super::iter::ContainerIter::new(self.clone(), flags)
    }

    /// Advance `cursor` by one live element, acquiring the container's
    /// read lock (or write lock, if `unlink`) for the duration of the
    /// bucket it touches and releasing it before returning. Used by
    /// [`super::ContainerIter`]; see [`Cursor`] for the resumable-position
    /// representation this relies on.
    pub(crate) fn cursor_advance(&self, cursor: &mut Cursor<P>, descending: bool, unlink: bool) -> Option<Obj<P>> {
        loop {
            if unlink {
                let mut data = self.write();
                let n = data.buckets.len();
                if cursor.bucket >= n {
                    return None;
                }
                match advance_bucket_mut(&mut data.buckets[cursor.bucket], &cursor.anchor, descending, &self.count) {
                    Step::Found(payload, node) => {
                        cursor.anchor = Some(node);
                        return Some(payload);
                    }
                    Step::Exhausted => {
                        cursor.anchor = None;
                        if !step_bucket(&mut cursor.bucket, descending, n) {
                            return None;
                        }
                    }
                    Step::Lost => return None,
                }
            } else {
                let data = self.read();
                let n = data.buckets.len();
                if cursor.bucket >= n {
                    return None;
                }
                match advance_bucket_ro(&data.buckets[cursor.bucket], &cursor.anchor, descending) {
                    Step::Found(payload, node) => {
                        cursor.anchor = Some(node);
                        return Some(payload);
                    }
                    Step::Exhausted => {
                        cursor.anchor = None;
                        if !step_bucket(&mut cursor.bucket, descending, n) {
                            return None;
                        }
                    }
                    Step::Lost => return None,
                }
            }
        }
    }
}

fn advance(i: &mut usize, direction: Direction) {
    match direction {
        Direction::Ascending => *i += 1,
        Direction::Descending => {
            if *i == 0 {
                *i = usize::MAX;
            } else {
                *i -= 1;
            }
        }
    }
}

pub(crate) fn payload_of<P>(node: &Node<P>) -> Option<Obj<P>> {
    // SAFETY: node slots are only ever touched while the owning
    // container's rwlock is held (every call site above goes through
    // `ContainerData`'s guard first), matching the discipline
    // `Obj::get_unchecked`'s contract requires.
    unsafe { node.get_unchecked() }.clone()
}

fn find_in_bucket<P>(
    bucket: &Bucket<P>,
    probe: &Obj<P>,
    match_fn: &(dyn Fn(&Obj<P>, &Obj<P>) -> bool + Send + Sync),
) -> Option<Obj<P>> {
    bucket.nodes.iter().find_map(|node| {
        payload_of(node).filter(|candidate| match_fn(candidate, probe))
    })
}

fn remove_where<P>(
    bucket: &mut Bucket<P>,
    count: &Arc<AtomicUsize>,
    mut matches: impl FnMut(&Obj<P>) -> bool,
) -> bool {
    if let Some(i) = bucket.nodes.iter().position(|node| {
        payload_of(node).map(|p| matches(&p)).unwrap_or(false)
    }) {
        bucket.nodes.remove(i);
        count.fetch_sub(1, AtomicOrdering::SeqCst);
        true
    } else {
        false
    }
}

fn insert_sorted<P>(
    bucket: &mut Bucket<P>,
    node: Node<P>,
    new_payload: &Obj<P>,
    sort_fn: &(dyn Fn(&Obj<P>, &Obj<P>) -> Ordering + Send + Sync),
    dup_policy: DupPolicy,
    insert_order: InsertOrder,
) -> LinkOutcome {
    match insert_order {
        InsertOrder::Append => {
            let mut i = 0;
            while i < bucket.nodes.len() {
                let existing = match payload_of(&bucket.nodes[i]) {
                    Some(p) => p,
                    None => {
                        i += 1;
                        continue;
                    }
                };
                match sort_fn(&existing, new_payload) {
                    Ordering::Less => i += 1,
                    Ordering::Equal => match handle_duplicate(&bucket.nodes[i], &existing, new_payload, dup_policy) {
                        Some(outcome) => return outcome,
                        None => i += 1,
                    },
                    Ordering::Greater => break,
                }
            }
            bucket.nodes.insert(i, node);
            LinkOutcome::Inserted
        }
        InsertOrder::Prepend => {
            let mut i = bucket.nodes.len();
            loop {
                if i == 0 {
                    break;
                }
                let existing = match payload_of(&bucket.nodes[i - 1]) {
                    Some(p) => p,
                    None => {
                        i -= 1;
                        continue;
                    }
                };
                match sort_fn(&existing, new_payload) {
                    Ordering::Greater => i -= 1,
                    Ordering::Equal => {
                        match handle_duplicate(&bucket.nodes[i - 1], &existing, new_payload, dup_policy) {
                            Some(outcome) => return outcome,
                            None => i -= 1,
                        }
                    }
                    Ordering::Less => break,
                }
            }
            bucket.nodes.insert(i, node);
            LinkOutcome::Inserted
        }
    }
}

/// The stateful iterator's resumable position: which bucket it's in, and
/// (once it has yielded at least one element from that bucket) a strong
/// reference to the last node visited, used to relocate on the next call
/// regardless of concurrent insertions/removals elsewhere in the bucket.
///
/// Node identity, not payload identity, is what's tracked: a node that has
/// since been tombstoned (payload cleared, by this same iterator's own
/// unlinking) is still relocatable by pointer, letting the next call step
/// past it to the following live element — exactly the "tolerates
/// tombstoning" guarantee spec.md §4.F step 7 describes.
pub(crate) struct Cursor<P> {
    bucket: usize,
    anchor: Option<Node<P>>,
}

impl<P> Cursor<P> {
    pub(crate) fn new(descending: bool, n_buckets: usize) -> Cursor<P> {
        Cursor {
            bucket: if descending { n_buckets.saturating_sub(1) } else { 0 },
            anchor: None,
        }
    }
}

enum Step<P> {
    Found(Obj<P>, Node<P>),
    Exhausted,
    /// The anchor node is no longer present in its recorded bucket — it
    /// was fully removed by a concurrent operation other than this
    /// iterator's own unlinking. Per spec.md §8 property 7's explicit
    /// "assuming no concurrent unlinks" caveat, iteration simply stops
    /// here rather than guessing at a resumption point.
    Lost,
}

fn locate_node_index<P>(nodes: &[Node<P>], anchor: &Node<P>) -> Option<usize> {
    nodes.iter().position(|n| Obj::ptr_eq(n, anchor))
}

fn step(i: usize, descending: bool, len: usize) -> Option<usize> {
    if descending {
        if i == 0 {
            None
        } else {
            Some(i - 1)
        }
    } else if i + 1 >= len {
        None
    } else {
        Some(i + 1)
    }
}

fn step_bucket(bucket: &mut usize, descending: bool, n_buckets: usize) -> bool {
    if descending {
        if *bucket == 0 {
            false
        } else {
            *bucket -= 1;
            true
        }
    } else {
        *bucket += 1;
        *bucket < n_buckets
    }
}

fn advance_bucket_ro<P>(bucket: &Bucket<P>, anchor: &Option<Node<P>>, descending: bool) -> Step<P> {
    let mut idx = match anchor {
        None => {
            if bucket.nodes.is_empty() {
                None
            } else if descending {
                Some(bucket.nodes.len() - 1)
            } else {
                Some(0)
            }
        }
        Some(a) => match locate_node_index(&bucket.nodes, a) {
            None => return Step::Lost,
            Some(i) => step(i, descending, bucket.nodes.len()),
        },
    };
    loop {
        let i = match idx {
            Some(i) => i,
            None => return Step::Exhausted,
        };
        if let Some(p) = payload_of(&bucket.nodes[i]) {
            return Step::Found(p, bucket.nodes[i].clone());
        }
        idx = step(i, descending, bucket.nodes.len());
    }
}

fn advance_bucket_mut<P>(
    bucket: &mut Bucket<P>,
    anchor: &Option<Node<P>>,
    descending: bool,
    count: &Arc<AtomicUsize>,
) -> Step<P> {
    let mut idx = match anchor {
        None => {
            if bucket.nodes.is_empty() {
                None
            } else if descending {
                Some(bucket.nodes.len() - 1)
            } else {
                Some(0)
            }
        }
        Some(a) => match locate_node_index(&bucket.nodes, a) {
            None => return Step::Lost,
            Some(i) => {
                // The anchor was tombstoned by our own previous call and
                // is no longer needed as a position marker now that we've
                // relocated to it.
                bucket.nodes.remove(i);
                if descending {
                    if i == 0 {
                        None
                    } else {
                        Some(i - 1)
                    }
                } else if i < bucket.nodes.len() {
                    Some(i)
                } else {
                    None
                }
            }
        },
    };
    loop {
        let i = match idx {
            Some(i) => i,
            None => return Step::Exhausted,
        };
        if payload_of(&bucket.nodes[i]).is_some() {
            // SAFETY: write-locked for the duration of this call.
            let payload = unsafe { bucket.nodes[i].get_unchecked_mut() }.take().unwrap();
            count.fetch_sub(1, AtomicOrdering::SeqCst);
            let node = bucket.nodes[i].clone();
            return Step::Found(payload, node);
        }
        idx = step(i, descending, bucket.nodes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Direction, Found, InsertOrder, MatchResult};
    use crate::object::LockFlavor;

    fn int_container(options: ContainerOptions, n_buckets: usize) -> HashContainer<i32> {
        HashContainer::new(
            options,
            n_buckets,
            |obj: &Obj<i32>| *obj.lock_read() as u64,
            Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        )
        .unwrap()
    }

    fn obj(v: i32) -> Obj<i32> {
        Obj::new(v, LockFlavor::RwLock)
    }

    #[test]
    fn link_and_find_roundtrip() {
        let c = int_container(ContainerOptions::default(), 8);
        let a = obj(1);
        assert!(c.link(&a));
        assert_eq!(c.count(), 1);
        let found = c.find(&obj(1)).unwrap();
        assert_eq!(*found.lock_read(), 1);
    }

    #[test]
    fn dup_reject_keeps_first() {
        let options = ContainerOptions { dup_policy: DupPolicy::Reject, ..Default::default() };
        let c = int_container(options, 4);
        assert!(c.link(&obj(5)));
        assert!(!c.link(&obj(5)));
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn dup_reject_same_object_allows_distinct_equal_objects() {
        let options = ContainerOptions { dup_policy: DupPolicy::RejectSameObject, ..Default::default() };
        let c = int_container(options, 4);
        let a = obj(5);
        assert!(c.link(&a));
        assert!(c.link(&obj(5))); // distinct object, same key: allowed
        assert!(!c.link(&a)); // same object relinked: rejected
        assert_eq!(c.count(), 2);
    }

    #[test]
    fn dup_replace_swaps_payload_without_growing_count() {
        let options = ContainerOptions { dup_policy: DupPolicy::Replace, ..Default::default() };
        let c = int_container(options, 4);
        let a = obj(5);
        let b = obj(5);
        assert!(c.link(&a));
        assert!(c.link(&b));
        assert_eq!(c.count(), 1);
        let found = c.find(&obj(5)).unwrap();
        assert!(Obj::ptr_eq(&found, &b));
    }

    #[test]
    fn sorted_bucket_keeps_ascending_order() {
        let c = int_container(ContainerOptions::default(), 1);
        for v in [5, 1, 4, 2, 3] {
            c.link(&obj(v));
        }
        let mut seen = Vec::new();
        c.callback(TraverseFlags { multiple: true, ..Default::default() }, |o| {
            seen.push(*o.lock_read());
            MatchResult::MATCH
        });
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn unlink_by_pointer_identity() {
        let c = int_container(ContainerOptions::default(), 4);
        let a = obj(9);
        c.link(&a);
        assert!(c.unlink(&a));
        assert_eq!(c.count(), 0);
        assert!(!c.unlink(&a));
    }

    #[test]
    fn callback_multiple_unlink_collects_every_match() {
        let c = int_container(ContainerOptions::default(), 4);
        for v in 0..10 {
            c.link(&obj(v));
        }
        let flags = TraverseFlags { multiple: true, unlink: true, ..Default::default() };
        let found = c.callback(flags, |o| {
            if *o.lock_read() % 2 == 0 {
                MatchResult::MATCH
            } else {
                MatchResult::CONTINUE
            }
        });
        let evens: Vec<i32> = match found {
            Found::Many(matches) => matches.map(|o| *o.lock_read()).collect(),
            _ => panic!("expected multiple matches"),
        };
        assert_eq!(evens.len(), 5);
        assert_eq!(c.count(), 5);
        assert!(c.check());
    }

    #[test]
    fn retain_drops_everything_that_fails_the_predicate() {
        let c = int_container(ContainerOptions::default(), 4);
        for v in 0..6 {
            c.link(&obj(v));
        }
        c.retain(|o| *o.lock_read() % 2 == 0);
        assert_eq!(c.count(), 3);
        assert!(c.check());
    }

    #[test]
    fn clone_container_is_independent_of_the_source() {
        let c = int_container(ContainerOptions::default(), 4);
        c.link(&obj(1));
        c.link(&obj(2));
        let cloned = c.clone_container();
        assert_eq!(cloned.count(), 2);
        c.link(&obj(3));
        assert_eq!(c.count(), 3);
        assert_eq!(cloned.count(), 2);
        assert!(cloned.check());
    }

    #[test]
    fn dup_folds_source_elements_into_destination() {
        let src = int_container(ContainerOptions::default(), 4);
        src.link(&obj(1));
        src.link(&obj(2));

        let options = ContainerOptions { dup_policy: DupPolicy::Reject, ..Default::default() };
        let dst = int_container(options, 4);
        dst.link(&obj(2));
        assert!(!dst.dup(&src)); // `2` collides under Reject: folded in partially
        assert_eq!(dst.count(), 2);
        assert!(dst.find(&obj(1)).is_some());
    }

    #[test]
    fn descending_traversal_visits_buckets_and_nodes_in_reverse() {
        let c = int_container(ContainerOptions::default(), 1);
        for v in [1, 2, 3] {
            c.link(&obj(v));
        }
        let mut seen = Vec::new();
        let flags = TraverseFlags { multiple: true, direction: Direction::Descending, ..Default::default() };
        c.callback(flags, |o| {
            seen.push(*o.lock_read());
            MatchResult::MATCH
        });
        assert_eq!(seen, vec![3, 2, 1]);
    }

    #[test]
    fn list_constructor_uses_a_single_bucket() {
        let c: HashContainer<i32> = HashContainer::list(
            ContainerOptions::default(),
            Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        );
        assert_eq!(c.bucket_count(), 1);
        c.link(&obj(1));
        c.link(&obj(2));
        assert_eq!(c.count(), 2);
    }

    #[test]
    fn prepend_insert_order_without_sort_fn_reverses_arrival_order() {
        let c = HashContainer::new(
            ContainerOptions { insert_order: InsertOrder::Prepend, ..Default::default() },
            1,
            |_: &Obj<i32>| 0u64,
            None::<fn(&Obj<i32>, &Obj<i32>) -> Ordering>,
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        )
        .unwrap();
        for v in [1, 2, 3] {
            c.link(&obj(v));
        }
        let mut seen = Vec::new();
        c.callback(TraverseFlags { multiple: true, ..Default::default() }, |o| {
            seen.push(*o.lock_read());
            MatchResult::MATCH
        });
        assert_eq!(seen, vec![3, 2, 1]);
    }

    #[test]
    fn zero_buckets_is_an_invalid_option() {
        let err = HashContainer::new(
            ContainerOptions::default(),
            0,
            |_: &Obj<i32>| 0u64,
            None::<fn(&Obj<i32>, &Obj<i32>) -> Ordering>,
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOption(_)));
    }
}

/// On an equal-key collision, decide whether to reject, replace, or keep
/// scanning (`None` means "not resolved, keep scanning").
fn handle_duplicate<P>(
    existing_node: &Node<P>,
    existing_payload: &Obj<P>,
    new_payload: &Obj<P>,
    dup_policy: DupPolicy,
) -> Option<LinkOutcome> {
    match dup_policy {
        DupPolicy::Allow => None,
        DupPolicy::Reject => Some(LinkOutcome::Rejected),
        DupPolicy::RejectSameObject => {
            if Obj::ptr_eq(existing_payload, new_payload) {
                Some(LinkOutcome::Rejected)
            } else {
                None
            }
        }
        DupPolicy::Replace => {
            // SAFETY: same discipline as `payload_of` — the container's
            // write lock is held for the whole `link` call this is reached
            // from.
            unsafe {
                *existing_node.get_unchecked_mut() = Some(new_payload.clone());
            }
            Some(LinkOutcome::Replaced)
        }
    }
}

