//! Page-table walk and dirty-bit maintenance.
//!
//! Page tables live in coherent memory. A store to a clean page stalls
//! while the walker sets the PTE dirty bit with a CAS on the page-table
//! word; the coherence update then invalidates the stale TLB entry and
//! the retried store succeeds.

use dsmsim_core::common::PhysAddr;
use dsmsim_core::l1::mmu_mode;
use dsmsim_core::l1::tlb::pte;
use dsmsim_core::proc::XtnOp;

use crate::common::harness::{idle, load, store, xtn_write, TestBench};

// PT1 at 0x4000 (ptpr = 2), PT2 at 0x8000, data page at 0x3000
const PTPR: u32 = 2;
const PT1_ENTRY: u64 = 0x4008; // index 2 covers vaddr 0x0040_0000
const PT2_FLAGS: u64 = 0x8000;
const PT2_PPN: u64 = 0x8004;
const VPAGE: u32 = 0x0040_0000;
const PPAGE: u64 = 0x3000;

fn build_page_tables(bench: &mut TestBench, flags: u32) {
    bench
        .platform
        .preload_word(PhysAddr(PT1_ENTRY), pte::V | pte::T | (PT2_FLAGS >> 12) as u32);
    bench.platform.preload_word(PhysAddr(PT2_FLAGS), flags);
    bench
        .platform
        .preload_word(PhysAddr(PT2_PPN), (PPAGE >> 12) as u32);
}

#[test]
fn store_to_clean_page_sets_the_dirty_bit_by_cas() {
    let scripts = vec![vec![
        xtn_write(XtnOp::Ptpr, PTPR),
        xtn_write(XtnOp::TlbMode, mmu_mode::DATA_TLB | mmu_mode::DATA_CACHE | mmu_mode::INS_CACHE),
        store(VPAGE + 8, 0xDD),
        idle(100),
        load(VPAGE + 8),
    ]];
    let mut bench = TestBench::new(scripts);
    build_page_tables(&mut bench, pte::V | pte::C | pte::W | pte::L);
    bench.run_to_completion(60_000);

    let log = bench.data_log(0);
    // the retried store completed and the data is visible
    assert_eq!(log.last().unwrap().rdata, 0xDD);
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(PPAGE + 8)),
        Some(0xDD)
    );

    let stats = bench.platform.wrapper(0).stats;
    assert!(stats.dirty_bit_cas >= 1, "dirty-bit CAS not issued");
    assert!(stats.tlb_inval_scans >= 1, "stale TLB entry not scanned out");
    // the page-table word itself carries the dirty bit now
    let pte2 = bench.platform.memcache(0).peek_word(PhysAddr(PT2_FLAGS));
    assert!(pte2.unwrap() & pte::D != 0);
}

#[test]
fn store_to_dirty_page_needs_no_cas() {
    let scripts = vec![vec![
        xtn_write(XtnOp::Ptpr, PTPR),
        xtn_write(XtnOp::TlbMode, mmu_mode::DATA_TLB | mmu_mode::DATA_CACHE | mmu_mode::INS_CACHE),
        store(VPAGE + 16, 0xEE),
        idle(50),
        load(VPAGE + 16),
    ]];
    let mut bench = TestBench::new(scripts);
    build_page_tables(&mut bench, pte::V | pte::C | pte::W | pte::L | pte::D);
    bench.run_to_completion(60_000);

    assert_eq!(bench.data_log(0).last().unwrap().rdata, 0xEE);
    assert_eq!(bench.platform.wrapper(0).stats.dirty_bit_cas, 0);
}

#[test]
fn unmapped_page_faults_with_pt2_code() {
    let scripts = vec![vec![
        xtn_write(XtnOp::Ptpr, PTPR),
        xtn_write(XtnOp::TlbMode, mmu_mode::DATA_TLB | mmu_mode::DATA_CACHE | mmu_mode::INS_CACHE),
        // vaddr with a valid PT1 entry but an invalid PTE2 (index 1)
        load(VPAGE + 0x1000),
    ]];
    let mut bench = TestBench::new(scripts);
    build_page_tables(&mut bench, pte::V | pte::C | pte::W | pte::L);
    bench.run_to_completion(60_000);

    let log = bench.data_log(0);
    assert!(log[2].error, "access to an unmapped page must fault");
}

#[test]
fn write_to_readonly_page_faults() {
    let scripts = vec![vec![
        xtn_write(XtnOp::Ptpr, PTPR),
        xtn_write(XtnOp::TlbMode, mmu_mode::DATA_TLB | mmu_mode::DATA_CACHE | mmu_mode::INS_CACHE),
        // warm the TLB with a read, then attempt the store
        load(VPAGE),
        store(VPAGE, 1),
    ]];
    let mut bench = TestBench::new(scripts);
    build_page_tables(&mut bench, pte::V | pte::C | pte::L);
    bench.run_to_completion(60_000);

    let log = bench.data_log(0);
    assert!(!log[2].error);
    assert!(log[3].error, "store to a read-only page must fault");
}
