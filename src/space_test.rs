use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

// merged cover of a set of live ranges, the shape DataMap must hold.
fn cover(mut live: Vec<(u64, u32)>) -> Vec<Allocation> {
    live.sort_by_key(|(offset, _)| *offset);
    let mut acc: Vec<Allocation> = vec![];
    for (offset, length) in live.into_iter() {
        let end = offset + (length as u64);
        match acc.last_mut() {
            Some(last) if last.end == offset => last.end = end,
            _ => acc.push(Allocation { begin: offset, end }),
        }
    }
    acc
}

#[test]
fn test_space_first_alloc() {
    let mut map = DataMap::new();
    assert_eq!(map.max(), 0);
    assert_eq!(map.alloc(100), 0);
    assert_eq!(map.max(), 100);
    assert_eq!(map.alloc(50), 100);
    assert_eq!(map.max(), 150);
    assert_eq!(map.len(), 1);
    map.validate().unwrap();
}

#[test]
fn test_space_gap_fit() {
    let mut map = DataMap::new();
    let a = map.alloc(100); // [0, 100)
    let b = map.alloc(40); // [100, 140)
    let c = map.alloc(100); // [140, 240)
    assert_eq!((a, b, c), (0, 100, 140));

    map.free(b, 40).unwrap();
    assert_eq!(map.len(), 2);
    map.validate().unwrap();

    // smaller than the gap: placed at the gap head, extends the left
    // neighbour.
    assert_eq!(map.alloc(30), 100);
    map.validate().unwrap();
    assert_eq!(map.len(), 2);

    // exactly fills whats left of the gap: the neighbours merge.
    assert_eq!(map.alloc(10), 130);
    map.validate().unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.max(), 240);
}

#[test]
fn test_space_head_gap() {
    let mut map = DataMap::new();
    let a = map.alloc(60);
    let _b = map.alloc(60);
    map.free(a, 60).unwrap();
    assert_eq!(map.as_allocs(), &[Allocation { begin: 60, end: 120 }]);

    // head gap is eligible for first-fit.
    assert_eq!(map.alloc(20), 0);
    assert_eq!(map.len(), 2);
    // and an exact fill merges with the first allocation.
    assert_eq!(map.alloc(40), 20);
    assert_eq!(map.len(), 1);
    map.validate().unwrap();
}

#[test]
fn test_space_free_cases() {
    let mut map = DataMap::new();
    map.alloc(100); // [0, 100)

    // interior free splits.
    map.free(20, 30).unwrap();
    assert_eq!(
        map.as_allocs(),
        &[
            Allocation { begin: 0, end: 20 },
            Allocation { begin: 50, end: 100 }
        ]
    );

    // begin-match shrinks from the left.
    map.free(50, 10).unwrap();
    assert_eq!(map.as_allocs()[1], Allocation { begin: 60, end: 100 });

    // end-match shrinks from the right.
    map.free(90, 10).unwrap();
    assert_eq!(map.as_allocs()[1], Allocation { begin: 60, end: 90 });

    // whole-allocation free removes it.
    map.free(60, 30).unwrap();
    assert_eq!(map.as_allocs(), &[Allocation { begin: 0, end: 20 }]);

    // spans crossing an allocation are rejected.
    assert!(map.free(10, 30).is_err());
    assert!(map.free(500, 10).is_err());
    map.validate().unwrap();
}

#[test]
fn test_space_random_ops() {
    let seed: u64 = random();
    println!("test_space_random_ops {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut map = DataMap::new();
    let mut live: Vec<(u64, u32)> = vec![];

    for _i in 0..10_000 {
        if live.is_empty() || rng.gen_range(0..100) < 60 {
            let length: u32 = rng.gen_range(1..200);
            let offset = map.alloc(length);
            // the handed-out range must not overlap any live range.
            for (o, l) in live.iter() {
                let (b, e) = (*o, *o + (*l as u64));
                let (nb, ne) = (offset, offset + (length as u64));
                assert!(ne <= b || nb >= e, "overlap [{},{}) [{},{})", nb, ne, b, e);
            }
            live.push((offset, length));
        } else {
            let victim = rng.gen_range(0..live.len());
            let (offset, length) = live.swap_remove(victim);
            map.free(offset, length).unwrap();
        }

        map.validate().unwrap();
        assert_eq!(map.as_allocs(), &cover(live.clone())[..], "after op {}", _i);
    }
}

#[test]
fn test_space_rebuild() {
    let seed: u64 = random();
    println!("test_space_rebuild {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut map = DataMap::new();
    let mut live: Vec<(u64, u32)> = vec![];
    for _i in 0..1_000 {
        let length: u32 = rng.gen_range(1..100);
        let offset = map.alloc(length);
        live.push((offset, length));
    }
    for _i in 0..300 {
        let victim = rng.gen_range(0..live.len());
        let (offset, length) = live.swap_remove(victim);
        map.free(offset, length).unwrap();
    }

    let rebuilt = DataMap::rebuild(live.iter().cloned()).unwrap();
    rebuilt.validate().unwrap();
    assert_eq!(rebuilt.as_allocs(), map.as_allocs());
    assert_eq!(rebuilt.max(), map.max());
}

#[test]
fn test_space_rebuild_overlap() {
    let ranges = vec![(0u64, 10u32), (5u64, 10u32)];
    assert!(DataMap::rebuild(ranges.into_iter()).is_err());
}
