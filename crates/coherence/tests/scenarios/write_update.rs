//! Write that updates a second sharer.
//!
//! Two cores hold the same line; one stores. The directory opens an
//! update-table episode with one expected acknowledgement, sends a
//! MULTI_UPDT to the other copy, and the writer's write buffer completes
//! only after the acknowledgement returns. The second core then reads
//! the new value from its own (updated) copy.

use dsmsim_core::common::PhysAddr;

use crate::common::harness::{idle, load, store, TestBench};

#[test]
fn store_updates_the_other_sharer() {
    let addr = 0x2000;
    let scripts = vec![
        // core 0: read, then store once core 1 also holds the line
        vec![load(addr), idle(100), store(addr, 0xBEEF_0001)],
        // core 1: read early, read again well after the update
        vec![load(addr), idle(400), load(addr)],
    ];
    let mut bench = TestBench::new(scripts);
    bench.platform.preload_word(PhysAddr(u64::from(addr)), 0x11);
    bench.run_to_completion(20_000);

    // core 1's second read sees the store through its updated copy
    let log1 = bench.data_log(1);
    assert_eq!(log1[0].rdata, 0x11);
    assert_eq!(log1[1].rdata, 0xBEEF_0001);

    // exactly one update episode, acknowledged and closed
    let l2 = bench.platform.memcache(0).stats;
    assert_eq!(l2.multi_updates, 1);
    assert_eq!(l2.multi_acks, 1);
    assert_eq!(bench.platform.wrapper(1).stats.cc_updt_data, 1);

    // the writer's buffer drained once the episode completed
    assert!(bench.platform.wrapper(0).wbuf_is_empty());
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(u64::from(addr))),
        Some(0xBEEF_0001)
    );
}

#[test]
fn store_without_other_sharers_needs_no_episode() {
    let addr = 0x2400;
    let mut bench = TestBench::new(vec![vec![load(addr), store(addr, 5), idle(50), load(addr)]]);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    assert_eq!(log[2].rdata, 5);
    let l2 = bench.platform.memcache(0).stats;
    assert_eq!(l2.multi_updates, 0);
    assert_eq!(l2.multi_acks, 0);
}

#[test]
fn store_updates_remote_tile_sharer() {
    // cores 0 and 4 live on different tiles; the line is homed on tile 0
    let addr = 0x2800;
    let scripts = vec![
        vec![load(addr), idle(150), store(addr, 0xA5A5_0000)],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        vec![load(addr), idle(600), load(addr)],
    ];
    let mut bench = TestBench::new(scripts);
    bench.platform.preload_word(PhysAddr(u64::from(addr)), 9);
    bench.run_to_completion(30_000);

    let log4 = bench.data_log(4);
    assert_eq!(log4[0].rdata, 9);
    assert_eq!(log4[1].rdata, 0xA5A5_0000);
    assert_eq!(bench.platform.wrapper(4).stats.cc_updt_data, 1);
}
