//! Read miss on a clean line.
//!
//! A single load walks MISS_SELECT → MISS_WAIT → MISS_DATA_UPDT →
//! MISS_DIR_UPDT; the directory moves EMPTY → VALID_EXCLUSIVE with the
//! reader as only sharer, and the response carries the preloaded word.

use dsmsim_core::common::PhysAddr;
use dsmsim_core::l1::SlotState;
use dsmsim_core::l2::DirState;

use crate::common::harness::{fetch, load, TestBench};

#[test]
fn data_read_miss_fills_line_and_registers_sharer() {
    let mut bench = TestBench::new(vec![vec![load(0x1040)]]);
    bench.platform.preload_word(PhysAddr(0x1040), 0xCAFE_0040);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    assert_eq!(log.len(), 1);
    assert!(!log[0].error);
    assert_eq!(log[0].rdata, 0xCAFE_0040);

    // directory inclusion: the reader is registered as the only copy
    let nline = PhysAddr(0x1040).nline(16);
    let entry = bench.platform.memcache(0).dir_entry(nline).unwrap();
    assert_eq!(entry.state, DirState::ValidExclusive);
    assert_eq!(entry.count, 1);
    assert_eq!(
        bench.platform.wrapper(0).dcache_line_state(PhysAddr(0x1040)),
        SlotState::Valid
    );
    assert_eq!(bench.platform.wrapper(0).stats.data_misses, 1);
}

#[test]
fn second_read_hits_without_new_transaction() {
    let mut bench = TestBench::new(vec![vec![load(0x1040), load(0x1044)]]);
    bench.platform.preload_word(PhysAddr(0x1040), 7);
    bench.platform.preload_word(PhysAddr(0x1044), 8);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    assert_eq!(log[0].rdata, 7);
    assert_eq!(log[1].rdata, 8);
    assert_eq!(bench.platform.wrapper(0).stats.data_misses, 1);
    assert_eq!(bench.platform.memcache(0).stats.reads, 1);
}

#[test]
fn instruction_fetch_registers_an_instruction_copy() {
    let mut bench = TestBench::new(vec![vec![fetch(0x2080)]]);
    bench.platform.preload_word(PhysAddr(0x2080), 0x1234_5678);
    bench.run_to_completion(10_000);

    assert_eq!(
        bench.platform.wrapper(0).icache_line_state(PhysAddr(0x2080)),
        SlotState::Valid
    );
    let entry = bench
        .platform
        .memcache(0)
        .dir_entry(PhysAddr(0x2080).nline(16))
        .unwrap();
    assert_eq!(entry.count, 1);
    assert!(entry.owner.inst);
}

#[test]
fn reads_from_two_cores_share_the_line() {
    let mut bench = TestBench::new(vec![vec![load(0x3000)], vec![load(0x3000)]]);
    bench.platform.preload_word(PhysAddr(0x3000), 42);
    bench.run_to_completion(10_000);

    assert_eq!(bench.data_log(0)[0].rdata, 42);
    assert_eq!(bench.data_log(1)[0].rdata, 42);
    let entry = bench
        .platform
        .memcache(0)
        .dir_entry(PhysAddr(0x3000).nline(16))
        .unwrap();
    assert_eq!(entry.state, DirState::Valid);
    assert_eq!(entry.count, 2);
}
