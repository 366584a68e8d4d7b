use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeMap;

use super::*;

#[test]
fn test_tree_insert_find() {
    let seed: u64 = random();
    println!("test_tree_insert_find {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut tree: Tree<i64, u64> = Tree::new();
    let mut refmap: BTreeMap<i64, u64> = BTreeMap::new();

    for _i in 0..5_000 {
        let key: i64 = rng.gen_range(-10_000..10_000);
        let value: u64 = rng.gen();
        let (id, inserted) = tree.insert(key, value);
        assert_eq!(inserted, !refmap.contains_key(&key), "key {}", key);
        if inserted {
            refmap.insert(key, value);
        } else {
            assert_eq!(tree.node(id).as_key(), &key);
        }
    }

    tree.validate().unwrap();
    assert_eq!(tree.len(), refmap.len());

    for (key, value) in refmap.iter() {
        let id = tree.find(key).unwrap();
        let node = tree.node(id);
        assert_eq!(node.as_key(), key);
        assert_eq!(node.payload, *value);
    }
    assert_eq!(tree.find(&10_001), None);

    let keys: Vec<i64> = tree.iter().map(|(_, n)| *n.as_key()).collect();
    let ref_keys: Vec<i64> = refmap.keys().cloned().collect();
    assert_eq!(keys, ref_keys);
}

#[test]
fn test_tree_delete() {
    let seed: u64 = random();
    println!("test_tree_delete {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut tree: Tree<i32, usize> = Tree::new();
    let mut refmap: BTreeMap<i32, usize> = BTreeMap::new();

    for i in 0..4_000 {
        let key: i32 = rng.gen_range(-5_000..5_000);
        let (_, inserted) = tree.insert(key, i);
        if inserted {
            refmap.insert(key, i);
        }
    }

    for _i in 0..8_000 {
        let key: i32 = rng.gen_range(-5_000..5_000);
        match tree.find(&key) {
            Some(id) => {
                let (k, _) = tree.delete(id);
                assert_eq!(k, key);
                assert!(refmap.remove(&key).is_some(), "key {}", key);
            }
            None => assert!(!refmap.contains_key(&key), "key {}", key),
        }
        if _i % 500 == 0 {
            tree.validate().unwrap();
        }
    }

    tree.validate().unwrap();
    assert_eq!(tree.len(), refmap.len());
    let keys: Vec<i32> = tree.iter().map(|(_, n)| *n.as_key()).collect();
    let ref_keys: Vec<i32> = refmap.keys().cloned().collect();
    assert_eq!(keys, ref_keys);
}

#[test]
fn test_tree_delete_keeps_successor_handle() {
    let mut tree: Tree<i32, ()> = Tree::new();
    for key in &[50, 25, 75, 60, 90, 55, 65] {
        tree.insert(*key, ());
    }
    // node 50 has two children; its in-order successor is 55.
    let z = tree.find(&50).unwrap();
    let succ = tree.find(&55).unwrap();
    let (k, _) = tree.delete(z);
    assert_eq!(k, 50);
    tree.validate().unwrap();
    // the successor's handle still names the same key.
    assert_eq!(tree.node(succ).as_key(), &55);
    assert_eq!(tree.find(&55), Some(succ));
}

#[test]
fn test_tree_first_last_next_prev() {
    let mut tree: Tree<i32, ()> = Tree::new();
    assert_eq!(tree.first(), None);
    assert_eq!(tree.last(), None);

    let keys = vec![9, 4, 1, 7, 3, 8, 2, 6, 5];
    for key in keys.iter() {
        tree.insert(*key, ());
    }

    let first = tree.first().unwrap();
    assert_eq!(tree.node(first).as_key(), &1);
    let last = tree.last().unwrap();
    assert_eq!(tree.node(last).as_key(), &9);

    let mut cur = Some(first);
    let mut forward = vec![];
    while let Some(id) = cur {
        forward.push(*tree.node(id).as_key());
        cur = tree.next(id);
    }
    assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);

    let mut cur = Some(last);
    let mut backward = vec![];
    while let Some(id) = cur {
        backward.push(*tree.node(id).as_key());
        cur = tree.prev(id);
    }
    assert_eq!(backward, vec![9, 8, 7, 6, 5, 4, 3, 2, 1]);
}

#[test]
fn test_tree_enumerate() {
    let seed: u64 = random();
    println!("test_tree_enumerate {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut tree: Tree<i32, ()> = Tree::new();
    let mut refmap: BTreeMap<i32, ()> = BTreeMap::new();
    for _i in 0..1_000 {
        let key: i32 = rng.gen_range(0..500);
        tree.insert(key, ());
        refmap.insert(key, ());
    }

    for _i in 0..1_000 {
        let a: i32 = rng.gen_range(-10..510);
        let b: i32 = rng.gen_range(-10..510);
        let (min_incl, max_incl) = (rng.gen::<bool>(), rng.gen::<bool>());

        let got: Vec<i32> = tree
            .enumerate(Some(&a), min_incl, Some(&b), max_incl)
            .map(|(_, n)| *n.as_key())
            .collect();
        let want: Vec<i32> = refmap
            .keys()
            .cloned()
            .filter(|k| if min_incl { *k >= a } else { *k > a })
            .filter(|k| if max_incl { *k <= b } else { *k < b })
            .collect();
        assert_eq!(got, want, "bounds {} {} {} {}", a, min_incl, b, max_incl);
    }

    // unbounded on either side.
    let got: Vec<i32> = tree
        .enumerate(None, false, None, false)
        .map(|(_, n)| *n.as_key())
        .collect();
    let want: Vec<i32> = refmap.keys().cloned().collect();
    assert_eq!(got, want);

    // single-key equals query.
    let key = want[want.len() / 2];
    let got: Vec<i32> = tree
        .enumerate(Some(&key), true, Some(&key), true)
        .map(|(_, n)| *n.as_key())
        .collect();
    assert_eq!(got, vec![key]);

    // inverted bounds yield empty.
    let got: Vec<i32> = tree
        .enumerate(Some(&400), true, Some(&100), true)
        .map(|(_, n)| *n.as_key())
        .collect();
    assert!(got.is_empty());
}

#[test]
fn test_tree_with_cmp() {
    use std::cmp::Ordering;
    use std::sync::Arc;

    // reverse ordering comparator.
    let cmp: Cmp<i32> = Arc::new(|a: &i32, b: &i32| b.cmp(a));
    let mut tree: Tree<i32, ()> = Tree::with_cmp(cmp);
    for key in 0..100 {
        tree.insert(key, ());
    }
    tree.validate().unwrap();
    let keys: Vec<i32> = tree.iter().map(|(_, n)| *n.as_key()).collect();
    let want: Vec<i32> = (0..100).rev().collect();
    assert_eq!(keys, want);
    assert_eq!(
        tree.compare(&1, &2),
        Ordering::Greater,
        "injected comparator not applied"
    );
}

#[test]
fn test_tree_slot_reuse() {
    let mut tree: Tree<i32, ()> = Tree::new();
    for key in 0..100 {
        tree.insert(key, ());
    }
    for key in 0..50 {
        let id = tree.find(&key).unwrap();
        tree.delete(id);
    }
    let before = tree.slots.len();
    for key in 100..150 {
        tree.insert(key, ());
    }
    // released slots are recycled before the arena grows.
    assert_eq!(tree.slots.len(), before);
    tree.validate().unwrap();
    assert_eq!(tree.len(), 100);
}
