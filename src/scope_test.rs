use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    thread,
};

use super::*;

#[test]
fn test_latch_readers_share() {
    let latch = Arc::new(Latch::new());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _i in 0..8 {
        let (latch, active, peak) = (
            Arc::clone(&latch),
            Arc::clone(&active),
            Arc::clone(&peak),
        );
        handles.push(thread::spawn(move || {
            for _j in 0..100 {
                latch.acquire_read();
                let n = active.fetch_add(1, SeqCst) + 1;
                peak.fetch_max(n, SeqCst);
                thread::yield_now();
                active.fetch_sub(1, SeqCst);
                latch.release_read();
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }
    // readers overlapped at least once.
    assert!(peak.load(SeqCst) >= 2, "peak {}", peak.load(SeqCst));
}

#[test]
fn test_latch_writer_excludes() {
    let latch = Arc::new(Latch::new());
    let in_section = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _i in 0..4 {
        let (latch, in_section, total) =
            (Arc::clone(&latch), Arc::clone(&in_section), Arc::clone(&total));
        handles.push(thread::spawn(move || {
            for _j in 0..200 {
                latch.acquire_write();
                assert_eq!(in_section.fetch_add(1, SeqCst), 0, "writer overlap");
                total.fetch_add(1, SeqCst);
                in_section.fetch_sub(1, SeqCst);
                latch.release_write();
            }
        }));
    }
    for _i in 0..4 {
        let (latch, in_section) = (Arc::clone(&latch), Arc::clone(&in_section));
        handles.push(thread::spawn(move || {
            for _j in 0..200 {
                latch.acquire_read();
                assert_eq!(in_section.load(SeqCst), 0, "reader under writer");
                latch.release_read();
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }
    assert_eq!(total.load(SeqCst), 800);
}

#[test]
fn test_latch_write_waits_for_readers() {
    let latch = Arc::new(Latch::new());
    latch.acquire_read();

    let flag = Arc::new(AtomicUsize::new(0));
    let writer = {
        let (latch, flag) = (Arc::clone(&latch), Arc::clone(&flag));
        thread::spawn(move || {
            latch.acquire_write();
            flag.store(1, SeqCst);
            latch.release_write();
        })
    };

    // the writer spins while a reader is inside.
    thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(flag.load(SeqCst), 0);

    latch.release_read();
    writer.join().unwrap();
    assert_eq!(flag.load(SeqCst), 1);
}
