//! Uncacheable I/O ordering and block-device DMA.
//!
//! Non-cacheable writes from one core reach their device in issue order
//! (the write buffer drains an uncacheable write before accepting any new
//! request), and the block device moves data in both directions through
//! ordinary direct-network transactions.

use pretty_assertions::assert_eq;

use dsmsim_core::common::PhysAddr;
use dsmsim_core::proc::DataOp;
use dsmsim_core::soc::block_device::{self, op, status};
use dsmsim_core::soc::map::{SEG_DISK, SEG_TTY};
use dsmsim_core::Config;

use crate::common::harness::{data, idle, load, TestBench};

fn io_tile_base(config: &Config) -> u64 {
    let shift = config.topology.paddr_width - config.topology.x_width - config.topology.y_width;
    u64::from(config.soc.io_tile) << shift
}

fn tty_base(config: &Config) -> u64 {
    io_tile_base(config) + SEG_TTY * config.soc.segment_size
}

fn disk_base(config: &Config) -> u64 {
    io_tile_base(config) + SEG_DISK * config.soc.segment_size
}

#[test]
fn uncacheable_writes_arrive_in_issue_order() {
    let config = Config::default();
    let tty = tty_base(&config) as u32;
    let script = vec![
        data(DataOp::Write, tty, u32::from(b'H'), 0xF),
        data(DataOp::Write, tty, u32::from(b'I'), 0xF),
        data(DataOp::Write, tty, u32::from(b'!'), 0xF),
    ];
    let mut bench = TestBench::with_config(config, vec![script]);
    bench.run_to_completion(10_000);

    assert_eq!(bench.platform.tty().text(), "HI!");
    assert_eq!(bench.platform.wrapper(0).stats.data_unc_writes, 3);
}

#[test]
fn disk_read_dma_lands_in_memory() {
    let config = Config::default();
    let base = disk_base(&config) as u32;
    let buffer = 0x2000u32;

    let mut script = vec![
        data(DataOp::Write, base + block_device::REG_BUFFER as u32, buffer, 0xF),
        data(DataOp::Write, base + block_device::REG_COUNT as u32, 1, 0xF),
        data(DataOp::Write, base + block_device::REG_LBA as u32, 0, 0xF),
        data(DataOp::Write, base + block_device::REG_OP as u32, op::READ, 0xF),
    ];
    for _ in 0..64 {
        script.push(idle(16));
        script.push(data(DataOp::Read, base + block_device::REG_STATUS as u32, 0, 0));
    }
    let mut bench = TestBench::with_config(config, vec![script]);
    bench.run_to_completion(60_000);

    // some status poll observed the terminal READ_SUCCESS
    let log = bench.data_log(0);
    assert!(
        log.iter().any(|r| r.rdata == status::READ_SUCCESS),
        "the DMA read never completed"
    );

    // the harness disk image holds (i % 251) at byte i
    let expect = u32::from_le_bytes([0, 1, 2, 3]);
    assert_eq!(
        bench.platform.memcache(0).peek_word(PhysAddr(u64::from(buffer))),
        Some(expect)
    );
    let expect_tail = u32::from_le_bytes([(508 % 251) as u8, (509 % 251) as u8,
        (510 % 251) as u8, (511 % 251) as u8]);
    assert_eq!(
        bench
            .platform
            .memcache(0)
            .peek_word(PhysAddr(u64::from(buffer) + 508)),
        Some(expect_tail)
    );
}

#[test]
fn disk_write_dma_copies_memory_to_disk() {
    let config = Config::default();
    let base = disk_base(&config) as u32;
    let buffer = 0x2800u32;

    let mut script = vec![
        data(DataOp::Write, base + block_device::REG_BUFFER as u32, buffer, 0xF),
        data(DataOp::Write, base + block_device::REG_COUNT as u32, 1, 0xF),
        data(DataOp::Write, base + block_device::REG_LBA as u32, 2, 0xF),
        data(DataOp::Write, base + block_device::REG_OP as u32, op::WRITE, 0xF),
    ];
    for _ in 0..64 {
        script.push(idle(16));
        script.push(data(DataOp::Read, base + block_device::REG_STATUS as u32, 0, 0));
    }
    let mut bench = TestBench::with_config(config, vec![script]);
    for word in 0..128u64 {
        bench
            .platform
            .preload_word(PhysAddr(u64::from(buffer) + word * 4), 0x5A5A_0000 + word as u32);
    }
    bench.run_to_completion(60_000);

    let log = bench.data_log(0);
    assert!(
        log.iter().any(|r| r.rdata == status::WRITE_SUCCESS),
        "the DMA write never completed"
    );
    let image = bench.platform.disk().image();
    let block = &image[2 * 512..2 * 512 + 512];
    assert_eq!(&block[0..4], &0x5A5A_0000u32.to_le_bytes());
    assert_eq!(&block[508..512], &0x5A5A_007Fu32.to_le_bytes());
}

#[test]
fn out_of_range_transfer_reports_an_error_status() {
    let config = Config::default();
    let base = disk_base(&config) as u32;
    let script = vec![
        data(DataOp::Write, base + block_device::REG_COUNT as u32, 64, 0xF),
        data(DataOp::Write, base + block_device::REG_LBA as u32, 1_000, 0xF),
        data(DataOp::Write, base + block_device::REG_OP as u32, op::READ, 0xF),
        idle(8),
        data(DataOp::Read, base + block_device::REG_STATUS as u32, 0, 0),
        load(0x40),
    ];
    let mut bench = TestBench::with_config(config, vec![script]);
    bench.run_to_completion(10_000);

    // three register writes, then the status read
    let log = bench.data_log(0);
    assert_eq!(log[3].rdata, status::READ_ERROR);
}
