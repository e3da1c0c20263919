//! LL/SC atomicity.
//!
//! A store conditional succeeds only when presented with the key of the
//! matching linked load and no write touched the word in between; the
//! local reservation is consumed by the attempt, so repeating an SC
//! fails immediately.

use dsmsim_core::common::PhysAddr;
use dsmsim_core::proc::DataOp;

use crate::common::harness::{data, idle, TestBench};

fn ll(addr: u32) -> dsmsim_core::proc::ScriptOp {
    data(DataOp::Ll, addr, 0, 0)
}

fn sc(addr: u32, wdata: u32) -> dsmsim_core::proc::ScriptOp {
    data(DataOp::Sc, addr, wdata, 0xF)
}

#[test]
fn sc_succeeds_once_then_fails_locally() {
    let addr = 0x3000;
    let mut bench = TestBench::new(vec![vec![ll(addr), sc(addr, 0x78), sc(addr, 0x79)]]);
    bench.platform.preload_word(PhysAddr(u64::from(addr)), 0x77);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    assert_eq!(log[0].rdata, 0x77); // LL returns the current value
    assert_eq!(log[1].rdata, 0); // first SC succeeds
    assert_eq!(log[2].rdata, 1); // reservation consumed: immediate failure
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(u64::from(addr))),
        Some(0x78)
    );
}

#[test]
fn competing_sc_invalidates_the_older_reservation() {
    let addr = 0x3100;
    let scripts = vec![
        // core 0 takes its reservation first, attempts its SC last
        vec![ll(addr), idle(500), sc(addr, 0xAAAA)],
        // core 1 reserves and commits while core 0 is waiting
        vec![idle(100), ll(addr), sc(addr, 0xBBBB)],
    ];
    let mut bench = TestBench::new(scripts);
    bench.platform.preload_word(PhysAddr(u64::from(addr)), 1);
    bench.run_to_completion(20_000);

    let log0 = bench.data_log(0);
    let log1 = bench.data_log(1);
    assert_eq!(log1[1].rdata, 0); // core 1's SC commits
    assert_eq!(log0[1].rdata, 1); // core 0's SC observes the stale key
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(u64::from(addr))),
        Some(0xBBBB)
    );
    assert_eq!(bench.platform.memcache(0).stats.sc_failures, 1);
}

#[test]
fn local_store_clears_the_reservation() {
    let addr = 0x3200;
    let mut bench = TestBench::new(vec![vec![
        ll(addr),
        data(DataOp::Write, addr, 0x55, 0xF),
        sc(addr, 0x66),
    ]]);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    // the intervening store cleared the reservation: local failure
    assert_eq!(log[2].rdata, 1);
}

#[test]
fn reservation_expires_after_the_timeout() {
    let mut config = dsmsim_core::Config::default();
    config.l1.llsc_timeout = 50;
    let addr = 0x3300;
    let scripts = vec![vec![ll(addr), idle(200), sc(addr, 0x42)]];
    let mut bench = TestBench::with_config(config, scripts);
    bench.run_to_completion(10_000);

    let log = bench.data_log(0);
    assert_eq!(log[1].rdata, 1);
}
