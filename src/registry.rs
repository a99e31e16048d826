//! The registry (component H, feature `registry`, default-on): a named map
//! of live containers for operator diagnostics.
//!
//! Implemented directly on top of the component F/G machinery rather than
//! as a one-off data structure: a registry *is* a list-shaped
//! [`HashContainer`] (spec.md §4.F's `n_buckets = 1` degenerate form) whose
//! elements are `{name, container}` records, sorted case-insensitively by
//! name, with duplicate policy [`DupPolicy::Reject`] — exactly spec.md
//! §4.H's description, with no separate lookup table layered on top.

use std::fmt;
use std::sync::Arc;

use slog::{debug, o, warn, Logger};

use crate::container::{ContainerOptions, DupPolicy, HashContainer, IterFlags};
use crate::object::{LockFlavor, Obj};

/// The subset of a container's own vtable (spec.md §4.E) the registry needs
/// in order to hand back diagnostics without knowing the container's
/// element type — "invoke the container's own stats/integrity vtable entry"
/// per spec.md §4.H, reified as a small trait object rather than a second
/// ad hoc dispatch mechanism.
pub trait RegisteredContainer: Send + Sync {
    /// The container's lock-free element count.
    fn count(&self) -> usize;
    /// The container's bucket count (1 for a list-shaped container).
    fn bucket_count(&self) -> usize;
    /// The container's own internal consistency check.
    fn check(&self) -> bool;
}

impl<P: Send + Sync + 'static> RegisteredContainer for HashContainer<P> {
    fn count(&self) -> usize {
        HashContainer::count(self)
    }

    fn bucket_count(&self) -> usize {
        HashContainer::bucket_count(self)
    }

    fn check(&self) -> bool {
        HashContainer::check(self)
    }
}

/// A snapshot of `Registry::stats` — "operator commands for statistics...
/// look up by name and invoke the container's own stats... vtable entry"
/// (spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub count: usize,
    pub bucket_count: usize,
}

struct Entry {
    name: String,
    container: Arc<dyn RegisteredContainer>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry").field("name", &self.name).finish()
    }
}

fn lowercase_name(entry: &Obj<Entry>) -> String {
    entry.lock_read().name.to_lowercase()
}

fn sort_by_name(a: &Obj<Entry>, b: &Obj<Entry>) -> std::cmp::Ordering {
    lowercase_name(a).cmp(&lowercase_name(b))
}

fn match_by_name(a: &Obj<Entry>, b: &Obj<Entry>) -> bool {
    lowercase_name(a) == lowercase_name(b)
}

fn probe(name: &str) -> Obj<Entry> {
    Obj::new(
        Entry {
            name: name.to_owned(),
            // Never looked at by `sort_by_name`/`match_by_name`, which only
            // read `name` — a probe never needs a real container.
            container: Arc::new(HashContainer::<()>::list(
                ContainerOptions::default(),
                None::<fn(&Obj<()>, &Obj<()>) -> std::cmp::Ordering>,
                |_: &Obj<()>, _: &Obj<()>| false,
            )),
        },
        LockFlavor::RwLock,
    )
}

/// A named map of live containers (spec.md §4.H).
///
/// Cheaply `Clone`, like [`HashContainer`] itself — every clone shares the
/// same underlying record list.
#[derive(Clone)]
pub struct Registry {
    entries: HashContainer<Entry>,
    log: Logger,
}

impl Registry {
    /// An empty registry that logs nothing.
    pub fn new() -> Registry {
        Registry::with_logger(crate::null_logger())
    }

    /// An empty registry that narrates registration/unregistration to
    /// `log` (spec.md §1.1's ambient-stack logging guidance: narrated, not
    /// hot-path, operations only).
    pub fn with_logger(log: Logger) -> Registry {
        let options = ContainerOptions {
            dup_policy: DupPolicy::Reject,
            ..ContainerOptions::default()
        };
        Registry {
            entries: HashContainer::list(options, Some(sort_by_name), match_by_name),
            log: log.new(o!("component" => "registry")),
        }
    }

    /// Register `container` under `name`. Returns `false` (and logs a
    /// warning) if `name` is already registered — duplicate policy `REJECT`
    /// per spec.md §4.H, surfaced as a sentinel return rather than an
    /// `Error`, consistent with every other policy-outcome call in this
    /// crate (see `SPEC_FULL.md` §7).
    pub fn register<C>(&self, name: impl Into<String>, container: C) -> bool
    where
        C: RegisteredContainer + 'static,
    {
        let name = name.into();
        let entry = Obj::new(
            Entry { name: name.clone(), container: Arc::new(container) },
            LockFlavor::RwLock,
        );
        let linked = self.entries.link(&entry);
        if linked {
            debug!(self.log, "registered container"; "name" => %name);
        } else {
            warn!(self.log, "registration rejected: name already in use"; "name" => %name);
        }
        linked
    }

    /// Remove the registration for `name`, if any. Returns whether one was
    /// removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.unlink_key(&probe(name));
        if removed {
            debug!(self.log, "unregistered container"; "name" => name);
        }
        removed
    }

    /// Look up the container registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RegisteredContainer>> {
        self.entries.find(&probe(name)).map(|entry| entry.lock_read().container.clone())
    }

    /// `stats(name)`: "look up by name and invoke the container's own
    /// stats... vtable entry" (spec.md §4.H).
    pub fn stats(&self, name: &str) -> Option<RegistryStats> {
        self.lookup(name).map(|container| RegistryStats {
            count: container.count(),
            bucket_count: container.bucket_count(),
        })
    }

    /// `check(name)`: as [`Registry::stats`], for the integrity-check
    /// vtable entry.
    pub fn check(&self, name: &str) -> Option<bool> {
        self.lookup(name).map(|container| container.check())
    }

    /// Every registered name whose case-insensitive collation starts with
    /// `prefix`, in sorted order — spec.md §4.H's "match/complete helper
    /// ... supports prefix search ordered by case-insensitive collation".
    ///
    /// Walks the registry's own iterator rather than re-deriving a scan,
    /// using [`super::container::ContainerIter::peek`] (see `SPEC_FULL.md`
    /// §10) to stop as soon as collation order rules out any further match,
    /// without consuming the first non-matching element.
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        let mut iter = self.entries.iter(IterFlags::default());
        let mut out = Vec::new();
        // Entries are sorted case-insensitively by full name, not merely by
        // the prefix, so a name that happens to sort before the prefix
        // (e.g. "gadgets" before a "widg*" prefix) must be skipped rather
        // than treated as "past the matching range". Once a name's
        // lowercase collation exceeds the prefix and still doesn't match,
        // every later name (being collation-greater still) cannot match
        // either, so that's the correct point to stop.
        while let Some(entry) = iter.peek() {
            let name = entry.lock_read().name.clone();
            let lower = name.to_lowercase();
            if lower.starts_with(&prefix) {
                out.push(name);
                iter.next();
            } else if lower.as_str() < prefix.as_str() {
                iter.next();
            } else {
                break;
            }
        }
        out
    }

    /// How many containers are currently registered.
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_container() -> HashContainer<u32> {
        HashContainer::new(
            ContainerOptions::default(),
            4,
            |obj: &Obj<u32>| *obj.lock_read() as u64,
            None::<fn(&Obj<u32>, &Obj<u32>) -> std::cmp::Ordering>,
            |a: &Obj<u32>, b: &Obj<u32>| *a.lock_read() == *b.lock_read(),
        )
        .unwrap()
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let registry = Registry::new();
        assert!(registry.register("widgets", small_container()));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("widgets").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = Registry::new();
        assert!(registry.register("widgets", small_container()));
        assert!(!registry.register("widgets", small_container()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = Registry::new();
        registry.register("widgets", small_container());
        assert!(registry.unregister("widgets"));
        assert!(!registry.unregister("widgets"));
        assert!(registry.is_empty());
    }

    #[test]
    fn stats_and_check_reflect_container_state() {
        let registry = Registry::new();
        let container = small_container();
        let obj = Obj::new(7u32, LockFlavor::RwLock);
        container.link(&obj);
        registry.register("widgets", container);

        let stats = registry.stats("widgets").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.bucket_count, 4);
        assert_eq!(registry.check("widgets"), Some(true));
    }

    #[test]
    fn complete_finds_case_insensitive_prefix_matches_in_order() {
        let registry = Registry::new();
        registry.register("Widgets", small_container());
        registry.register("widget-parts", small_container());
        registry.register("gadgets", small_container());

        let matches = registry.complete("widg");
        assert_eq!(matches, vec!["widget-parts".to_string(), "Widgets".to_string()]);
    }
}
