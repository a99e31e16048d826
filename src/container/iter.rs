//! The stateful container iterator (component G): `iterator_init`, `next`,
//! `peek`, and `destroy` (ordinary `Drop`).
//!
//! Unlike a `callback`-driven traversal, this holds the container lock only
//! for the duration of a single bucket hop within one `next()` call, not
//! across the iterator's whole lifetime — between calls it holds nothing
//! but a strong reference to the container and to the last node it
//! visited (see [`super::hash::Cursor`]), which is enough to resume safely
//! "after arbitrary delays" per spec.md §4.G, tolerating concurrent
//! mutation elsewhere in the container.

use crate::object::Obj;

use super::hash::{Cursor, HashContainer};
use super::IterFlags;

/// A live, lazy iterator over a [`super::HashContainer`]'s elements.
///
/// Holds a strong reference to its container for as long as it lives, so
/// the container cannot be torn down out from under an in-flight
/// iteration (spec.md §4.G: "holds a strong reference to the container").
pub struct ContainerIter<P> {
    container: HashContainer<P>,
    cursor: Cursor<P>,
    descending: bool,
    unlink: bool,
    peeked: Option<Obj<P>>,
}

impl<P: Send + Sync + 'static> ContainerIter<P> {
    pub(crate) fn new(container: HashContainer<P>, flags: IterFlags) -> ContainerIter<P> {
        let n_buckets = container.bucket_count();
        ContainerIter {
            cursor: Cursor::new(flags.descending, n_buckets),
            container,
            descending: flags.descending,
            unlink: flags.unlink,
            peeked: None,
        }
    }

    /// Look at what `next()` would return without consuming it.
    ///
    /// Supplemental to the translated interface — see `SPEC_FULL.md` §10 —
    /// grounded in the one-element lookahead buffer pattern
    /// `std::iter::Peekable` uses, applied here because spec.md's own
    /// traversal callback protocol has no equivalent (the C original has
    /// no lookahead; callers simply call `next` again and back out).
    pub fn peek(&mut self) -> Option<&Obj<P>> {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.as_ref()
    }

    fn advance(&mut self) -> Option<Obj<P>> {
        self.container.cursor_advance(&mut self.cursor, self.descending, self.unlink)
    }
}

impl<P: Send + Sync + 'static> Iterator for ContainerIter<P> {
    type Item = Obj<P>;

    fn next(&mut self) -> Option<Obj<P>> {
        if let Some(p) = self.peeked.take() {
            return Some(p);
        }
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerOptions, HashContainer};
    use crate::object::LockFlavor;

    fn container() -> HashContainer<i32> {
        HashContainer::new(
            ContainerOptions::default(),
            4,
            |o: &Obj<i32>| *o.lock_read() as u64,
            Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        )
        .unwrap()
    }

    fn obj(v: i32) -> Obj<i32> {
        Obj::new(v, LockFlavor::RwLock)
    }

    #[test]
    fn iterates_every_live_element_exactly_once() {
        let c = container();
        for v in 0..20 {
            c.link(&obj(v));
        }
        let mut seen: Vec<i32> = c.iter(IterFlags::default()).map(|o| *o.lock_read()).collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn peek_does_not_consume() {
        let c = container();
        c.link(&obj(1));
        c.link(&obj(2));
        let mut iter = c.iter(IterFlags::default());
        let first = *iter.peek().unwrap().lock_read();
        assert_eq!(first, *iter.peek().unwrap().lock_read());
        assert_eq!(*iter.next().unwrap().lock_read(), first);
    }

    #[test]
    fn unlinking_iterator_removes_every_visited_element() {
        let c = container();
        for v in 0..10 {
            c.link(&obj(v));
        }
        let mut seen: Vec<i32> = c.iter(IterFlags { unlink: true, ..Default::default() })
            .map(|o| *o.lock_read())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(c.count(), 0);
        assert!(c.check());
    }

    #[test]
    fn resumes_correctly_after_a_concurrent_unlink_elsewhere_in_the_bucket() {
        let c: HashContainer<i32> = HashContainer::list(
            ContainerOptions::default(),
            Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        );
        let a = obj(1);
        let b = obj(2);
        let d = obj(3);
        c.link(&a);
        c.link(&b);
        c.link(&d);

        let mut iter = c.iter(IterFlags::default());
        assert_eq!(*iter.next().unwrap().lock_read(), 1);
        // Remove the not-yet-visited middle element out from under the
        // iterator, using the container's own unlink rather than the
        // iterator's.
        assert!(c.unlink(&b));
        assert_eq!(*iter.next().unwrap().lock_read(), 3);
        assert!(iter.next().is_none());
    }

    #[test]
    fn descending_iteration_visits_in_reverse() {
        let c: HashContainer<i32> = HashContainer::list(
            ContainerOptions::default(),
            Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
            |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
        );
        for v in [1, 2, 3] {
            c.link(&obj(v));
        }
        let seen: Vec<i32> = c
            .iter(IterFlags { descending: true, ..Default::default() })
            .map(|o| *o.lock_read())
            .collect();
        assert_eq!(seen, vec![3, 2, 1]);
    }
}
