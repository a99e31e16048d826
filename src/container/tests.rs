//! Concurrent stress tests for the hash container (spec.md §8), modeled on
//! `chashmap`'s own `Arc` + `thread::spawn` spam tests rather than a
//! property-testing crate.

use std::sync::Arc;
use std::thread;

use rand::Rng;

use crate::container::{ContainerOptions, HashContainer};
use crate::object::{LockFlavor, Obj};

fn counter() -> HashContainer<i32> {
    HashContainer::new(
        ContainerOptions::default(),
        16,
        |o: &Obj<i32>| *o.lock_read() as u64,
        Some(|a: &Obj<i32>, b: &Obj<i32>| a.lock_read().cmp(&*b.lock_read())),
        |a: &Obj<i32>, b: &Obj<i32>| *a.lock_read() == *b.lock_read(),
    )
    .unwrap()
}

#[test]
fn spam_link_from_many_threads_leaves_every_element_findable() {
    let c = Arc::new(counter());
    let mut joins = Vec::new();

    for t in 0..8 {
        let c = c.clone();
        joins.push(thread::spawn(move || {
            for i in t * 200..(t + 1) * 200 {
                c.link(&Obj::new(i, LockFlavor::RwLock));
            }
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    assert_eq!(c.count(), 1600);
    assert!(c.check());
    for i in 0..1600 {
        assert!(c.find(&Obj::new(i, LockFlavor::RwLock)).is_some());
    }
}

#[test]
fn spam_link_and_unlink_settle_on_a_consistent_count() {
    let c = Arc::new(counter());
    let mut joins = Vec::new();

    for t in 0..8 {
        let c = c.clone();
        joins.push(thread::spawn(move || {
            let objs: Vec<_> = (t * 100..(t + 1) * 100).map(|i| Obj::new(i, LockFlavor::RwLock)).collect();
            for o in &objs {
                c.link(o);
            }
            for o in &objs {
                assert!(c.unlink(o));
            }
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    assert_eq!(c.count(), 0);
    assert!(c.check());
}

#[test]
fn concurrent_traversal_and_unlink_never_observe_a_torn_bucket() {
    let c = Arc::new(counter());
    for i in 0..500 {
        c.link(&Obj::new(i, LockFlavor::RwLock));
    }

    let reader = {
        let c = c.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                assert!(c.check());
            }
        })
    };
    let writer = {
        let c = c.clone();
        thread::spawn(move || {
            for i in 0..250 {
                c.unlink(&Obj::new(i, LockFlavor::RwLock));
            }
        })
    };

    reader.join().unwrap();
    writer.join().unwrap();
    assert_eq!(c.count(), 250);
    assert!(c.check());
}

#[test]
fn iterator_holds_its_place_while_other_threads_mutate_the_container() {
    let c = Arc::new(counter());
    for i in 0..100 {
        c.link(&Obj::new(i, LockFlavor::RwLock));
    }

    let mutator = {
        let c = c.clone();
        thread::spawn(move || {
            for i in 100..200 {
                c.link(&Obj::new(i, LockFlavor::RwLock));
            }
        })
    };

    let mut iter = c.iter(Default::default());
    let mut seen = 0usize;
    while iter.next().is_some() {
        seen += 1;
    }

    mutator.join().unwrap();
    // At least the 100 elements present before iteration started were all
    // visited; concurrently-added elements may or may not have been, which
    // is the documented "assuming no concurrent unlinks" guarantee (spec.md
    // §8 property 7) — only additions race here, never a loss.
    assert!(seen >= 100);
    assert!(c.check());
}

#[test]
fn random_interleaving_of_link_and_unlink_never_corrupts_the_container() {
    let c = Arc::new(counter());
    let mut joins = Vec::new();

    for t in 0..6 {
        let c = c.clone();
        joins.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut held: Vec<Obj<i32>> = Vec::new();
            for _ in 0..500 {
                if held.is_empty() || rng.gen_bool(0.6) {
                    let v = t * 1000 + rng.gen_range(0..1000);
                    let obj = Obj::new(v, LockFlavor::RwLock);
                    if c.link(&obj) {
                        held.push(obj);
                    }
                } else {
                    let i = rng.gen_range(0..held.len());
                    let obj = held.swap_remove(i);
                    c.unlink(&obj);
                }
            }
            held.len()
        }));
    }

    let still_held: usize = joins.into_iter().map(|j| j.join().unwrap()).sum();
    assert_eq!(c.count(), still_held);
    assert!(c.check());
}
