//! Broadcast invalidation.
//!
//! When a store hits a line whose sharer count exceeds the configured
//! threshold, the directory emits a single bounding-box broadcast instead
//! of per-sharer multicasts; every copy cleans up, the directory drains
//! to zero copies, and the writer's buffer completes only after the last
//! cleanup.

use dsmsim_core::common::PhysAddr;

use crate::common::harness::{idle, load, store, TestBench};

const ADDR: u32 = 0x5000;

#[test]
fn store_to_many_sharers_broadcasts_once() {
    // all 16 cores read the line; core 0 stores afterwards
    let mut scripts: Vec<_> = (0..16)
        .map(|core| vec![idle(core * 4), load(ADDR)])
        .collect();
    scripts[0] = vec![load(ADDR), idle(800), store(ADDR, 0x600D_F00D)];
    let mut bench = TestBench::new(scripts);
    bench.platform.preload_word(PhysAddr(u64::from(ADDR)), 0x1111);
    bench.run_to_completion(50_000);

    let l2 = bench.platform.memcache(0).stats;
    assert_eq!(l2.broadcasts, 1, "one bounding-box broadcast expected");
    assert_eq!(l2.multi_updates, 0, "no per-sharer update for this store");

    // every copy cleaned up: the directory drained to zero
    let entry = bench
        .platform
        .memcache(0)
        .dir_entry(PhysAddr(u64::from(ADDR)).nline(16))
        .unwrap();
    assert_eq!(entry.count, 0);

    // the write became globally visible and the write buffer drained
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(u64::from(ADDR))),
        Some(0x600D_F00D)
    );
    assert!(bench.platform.wrapper(0).wbuf_is_empty());

    // 16 data-cache copies cleaned
    let cleaned: u64 = (0..16)
        .map(|i| bench.platform.wrapper(i).stats.cleanups_data)
        .sum();
    assert_eq!(cleaned, 16);
}

#[test]
fn below_threshold_store_multicasts() {
    // three sharers: under the default threshold of 8
    let mut scripts: Vec<_> = (0..3).map(|_| vec![load(ADDR)]).collect();
    scripts[0] = vec![load(ADDR), idle(300), store(ADDR, 0x2222)];
    let mut bench = TestBench::new(scripts);
    bench.run_to_completion(30_000);

    let l2 = bench.platform.memcache(0).stats;
    assert_eq!(l2.broadcasts, 0);
    // the two other copies get updates, the writer's copy is excluded
    assert_eq!(l2.multi_updates, 2);
    assert_eq!(l2.multi_acks, 2);
}
