//! Cleanup racing an incoming invalidate.
//!
//! The test plays the directory against a single L1 wrapper, driving the
//! five channels by hand: a refill's victim cleanup is left
//! unacknowledged while a MULTI_INVAL for the missed line arrives. The
//! wrapper must latch the race, keep the slot out of VALID, install the
//! refill in ZOMBI, and emit a second cleanup — and a slot in ZOMBI must
//! never leave it before its CLACK.

use dsmsim_core::common::{NLine, PhysAddr, VirtAddr};
use dsmsim_core::l1::{L1Wrapper, SlotState};
use dsmsim_core::noc::dhccp::{self, clack_type, m2p_type, p2m_type, FlitField};
use dsmsim_core::noc::Channel;
use dsmsim_core::proc::{DataOp, DataRequest, InstructionRequest, Mode};
use dsmsim_core::sim::ports::Ports;
use dsmsim_core::soc::AddressMap;
use dsmsim_core::vci::{PktId, VciCmd, VciRsp};
use dsmsim_core::Config;

const WORDS: usize = 16;

/// One wrapper wired to hand-driven channels; the test is the directory.
struct WrapperBench {
    wrapper: L1Wrapper,
    map: AddressMap,
    cmd: Channel<VciCmd>,
    rsp: Channel<VciRsp>,
    m2p: Channel<u64>,
    p2m: Channel<u64>,
    clack: Channel<u64>,
}

impl WrapperBench {
    fn new() -> Self {
        let config = Config::default();
        let map = AddressMap::new(&config);
        Self {
            wrapper: L1Wrapper::new(&config, 0, 0),
            cmd: Channel::new(8),
            rsp: Channel::new(map.rsp_endpoints()),
            m2p: Channel::new(map.l1_endpoints()),
            p2m: Channel::new(8),
            clack: Channel::new(map.l1_endpoints()),
            map,
        }
    }

    fn step(&mut self, dreq: &DataRequest) -> dsmsim_core::l1::L1Output {
        let out = {
            let mut ports = Ports {
                cmd: &mut self.cmd,
                rsp: &mut self.rsp,
                m2p: &mut self.m2p,
                p2m: &mut self.p2m,
                clack: &mut self.clack,
                map: &self.map,
            };
            self.wrapper
                .step(&InstructionRequest::default(), dreq, &mut ports)
                .expect("wrapper step")
        };
        self.cmd.commit();
        self.rsp.commit();
        self.m2p.commit();
        self.p2m.commit();
        self.clack.commit();
        out
    }

    fn read_req(addr: u64) -> DataRequest {
        DataRequest {
            valid: true,
            op: DataOp::Read,
            addr: VirtAddr(addr as u32),
            wdata: 0,
            be: 0,
            mode: Mode::Kernel,
        }
    }

    /// Serves one full refill: waits for the miss command, answers with
    /// `fill` repeated, and steps until the processor gets its word.
    fn fill_line(&mut self, addr: u64, fill: u32) {
        let dreq = Self::read_req(addr);
        for _ in 0..200 {
            let out = self.step(&dreq);
            if let Some(cmd) = self.cmd.pop(0) {
                assert_eq!(cmd.pktid, PktId::ReadDataMiss);
                self.rsp.push(
                    0,
                    VciRsp {
                        rsrcid: cmd.srcid,
                        rtrdid: cmd.trdid,
                        rpktid: cmd.pktid,
                        rerror: false,
                        rdata: vec![fill; WORDS],
                    },
                );
            }
            if out.drsp.valid {
                assert_eq!(out.drsp.rdata, fill);
                return;
            }
        }
        panic!("refill for {addr:#x} did not complete");
    }

    /// Pops and decodes the next CLEANUP packet from the P2M channel.
    fn expect_cleanup(&mut self) -> (NLine, usize) {
        let header = self.p2m.pop(0).expect("cleanup header");
        let ty = dhccp::get(header, FlitField::P2mType);
        assert!(ty == p2m_type::CLEANUP_DATA, "expected a data cleanup");
        let nline_flit = self.p2m.pop(0).expect("cleanup nline");
        assert_eq!(dhccp::get(nline_flit, FlitField::P2mEop), 1);
        let nline = NLine(
            (dhccp::get(header, FlitField::CleanupNlineMsb) << 32)
                | dhccp::get(nline_flit, FlitField::CleanupNlineLsb),
        );
        let way = dhccp::get(header, FlitField::CleanupWayIndex) as usize;
        (nline, way)
    }

    /// Sends the CLACK for a cleaned data-cache slot.
    fn send_clack(&mut self, nline: NLine, way: usize) {
        let mut flit = 0u64;
        dhccp::set(&mut flit, 1, FlitField::M2pEop);
        dhccp::set(&mut flit, nline.val(), FlitField::ClackSet);
        dhccp::set(&mut flit, way as u64, FlitField::ClackWay);
        dhccp::set(&mut flit, clack_type::CLACK_DATA, FlitField::ClackType);
        self.clack.push(0, flit);
    }

    /// Sends a two-flit MULTI_INVAL (data) for `nline`.
    fn send_inval(&mut self, nline: NLine) {
        let mut header = 0u64;
        dhccp::set(&mut header, m2p_type::MULTI_INVAL_DATA, FlitField::M2pType);
        let mut nline_flit = 0u64;
        dhccp::set(&mut nline_flit, 1, FlitField::M2pEop);
        dhccp::set(&mut nline_flit, nline.val(), FlitField::MultiInvalNline);
        self.m2p.push_packet(0, [header, nline_flit]);
    }
}

// four same-set lines (set 0) plus the one that evicts the first
const SET_STRIDE: u64 = 64 * 64;

#[test]
fn raced_miss_installs_zombi_and_recleans() {
    let mut bench = WrapperBench::new();

    // fill all four ways of set 0
    for way in 0..4u64 {
        bench.fill_line(way * SET_STRIDE, 0x100 + way as u32);
    }

    // a fifth same-set read forces an eviction of the LRU line
    let miss_addr = 4 * SET_STRIDE;
    let miss_nline = PhysAddr(miss_addr).nline(WORDS);
    let dreq = WrapperBench::read_req(miss_addr);
    let mut refill_cmd = None;
    for _ in 0..50 {
        let _ = bench.step(&dreq);
        if let Some(cmd) = bench.cmd.pop(0) {
            refill_cmd = Some(cmd);
            break;
        }
    }
    let refill_cmd = refill_cmd.expect("miss command");

    // the victim cleanup is on the wire; hold its CLACK back
    let mut victim = None;
    for _ in 0..20 {
        let _ = bench.step(&dreq);
        if bench.p2m.head(0).is_some() {
            victim = Some(bench.expect_cleanup());
            break;
        }
    }
    let (victim_nline, victim_way) = victim.expect("victim cleanup");
    assert_eq!(victim_nline, PhysAddr(0).nline(WORDS));
    assert_eq!(
        bench.wrapper.dcache_line_state(PhysAddr(0)),
        SlotState::Zombi
    );

    // the invalidate for the missed line arrives before the refill
    bench.send_inval(miss_nline);
    for _ in 0..10 {
        let _ = bench.step(&dreq);
    }

    // now deliver the refill
    bench.rsp.push(
        0,
        VciRsp {
            rsrcid: refill_cmd.srcid,
            rtrdid: refill_cmd.trdid,
            rpktid: refill_cmd.pktid,
            rerror: false,
            rdata: vec![0xD00D; WORDS],
        },
    );
    for _ in 0..30 {
        let _ = bench.step(&dreq);
    }

    // blocked on the victim's missing CLACK: nothing committed yet
    assert_ne!(
        bench.wrapper.dcache_line_state(PhysAddr(miss_addr)),
        SlotState::Valid
    );

    // acknowledge the victim cleanup; the refill must then commit in
    // ZOMBI and emit a fresh cleanup for the raced line
    bench.send_clack(victim_nline, victim_way);
    let mut second = None;
    for _ in 0..30 {
        let out = bench.step(&dreq);
        assert!(!out.drsp.valid, "raced refill must not answer the read");
        if bench.p2m.head(0).is_some() {
            second = Some(bench.expect_cleanup());
            break;
        }
    }
    let (second_nline, second_way) = second.expect("second cleanup");
    assert_eq!(second_nline, miss_nline);
    assert_eq!(
        bench.wrapper.dcache_line_state(PhysAddr(miss_addr)),
        SlotState::Zombi
    );

    // CLACK releases the slot; the read then retries with a fresh miss
    bench.send_clack(second_nline, second_way);
    let mut retried = false;
    for _ in 0..30 {
        let _ = bench.step(&dreq);
        if let Some(cmd) = bench.cmd.pop(0) {
            assert_eq!(cmd.address, PhysAddr(miss_addr));
            retried = true;
            break;
        }
    }
    assert!(retried, "the miss must retry after the ZOMBI slot clears");
    // exactly two cleanups for this episode, no stray traffic
    assert!(bench.p2m.head(0).is_none());
}

#[test]
fn clack_is_required_before_reuse() {
    let mut bench = WrapperBench::new();
    for way in 0..4u64 {
        bench.fill_line(way * SET_STRIDE, way as u32);
    }

    // evict one line, then immediately miss again in the same set: the
    // zombi slot must not be reselected before its CLACK
    let dreq = WrapperBench::read_req(4 * SET_STRIDE);
    for _ in 0..40 {
        let _ = bench.step(&dreq);
        if bench.p2m.head(0).is_some() {
            break;
        }
    }
    let (victim_nline, victim_way) = bench.expect_cleanup();
    assert_eq!(
        bench.wrapper.dcache_line_state(victim_nline.base(WORDS)),
        SlotState::Zombi
    );

    bench.send_clack(victim_nline, victim_way);
    for _ in 0..10 {
        let _ = bench.step(&dreq);
    }
    assert_eq!(
        bench.wrapper.dcache_line_state(victim_nline.base(WORDS)),
        SlotState::Empty
    );
}
