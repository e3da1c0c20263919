//! L1 wrapper: the per-CPU assembly of instruction cache, data cache,
//! TLBs, write buffer and coherence interfaces.
//!
//! The wrapper is a set of communicating FSMs updated once per cycle:
//! 1. **ICACHE FSM** (`icache.rs`): fetches, refills, XTN maintenance,
//!    coherence requests on instruction lines.
//! 2. **DCACHE FSM** (`dcache.rs`): loads/stores/LL/SC/CAS, the MMU
//!    table-walk sub-FSM, the dirty-bit sub-FSM, the TLB-invalidation
//!    scan, XTN dispatch, coherence requests on data lines.
//! 3. **CMD / RSP FSMs** (`cmd_rsp.rs`): direct-network command emission
//!    and response demultiplexing.
//! 4. **CC_SEND / CC_RECEIVE FSMs and the CLACK interface** (`cc.rs`):
//!    the processor side of the coherence protocol.
//!
//! All FSM registers live flat in [`L1Wrapper`], exactly as the hardware
//! holds them in flip-flops; the FSM step functions are `impl` blocks in
//! the per-concern source files.

/// Generic set-associative cache storage with coherence slot states.
pub mod cache;
/// Generic set-associative TLB with PTE1/PTE2 entries and PT2 bypass.
pub mod tlb;
/// Multi-line merging write buffer.
pub mod wbuf;

mod cc;
mod cmd_rsp;
mod dcache;
mod icache;

pub use cache::{GenericCache, SlotState};
pub use cc::{CcReceiveState, CcReqKind, CcSendKind, CcSendState, UpdtWord};
pub use cmd_rsp::{CmdState, RspState};
pub use dcache::{DcacheState, MissKind};
pub use icache::IcacheState;
pub use tlb::{GenericTlb, PteFlags};
pub use wbuf::MultiWriteBuffer;

use crate::common::{CcId, GenericFifo, MmuErrorType, NLine, PhysAddr, SimError, SrcId, VirtAddr};
use crate::config::Config;
use crate::proc::{
    DataRequest, DataResponse, InstructionRequest, InstructionResponse, XtnOp,
};
use crate::sim::ports::Ports;
use crate::stats::L1Stats;
use crate::vci::VciRsp;

/// MMU mode register bits.
pub mod mmu_mode {
    /// Instruction TLB activated.
    pub const INS_TLB: u32 = 0x8;
    /// Data TLB activated.
    pub const DATA_TLB: u32 = 0x4;
    /// Instruction cache activated.
    pub const INS_CACHE: u32 = 0x2;
    /// Data cache activated.
    pub const DATA_CACHE: u32 = 0x1;
}

/// Per-cycle outputs of the wrapper.
#[derive(Clone, Copy, Debug, Default)]
pub struct L1Output {
    /// Instruction port response.
    pub irsp: InstructionResponse,
    /// Data port response.
    pub drsp: DataResponse,
    /// Asynchronous write bus error strobe.
    pub wberr: bool,
}

/// The L1 wrapper of one processor core.
pub struct L1Wrapper {
    // ---- identity and geometry ----
    pub(crate) tile: u32,
    pub(crate) proc_id: u32,
    pub(crate) srcid: SrcId,
    pub(crate) cc_id: CcId,
    pub(crate) max_frozen_cycles: u32,
    pub(crate) llsc_timeout: u32,

    // ---- software visible MMU registers ----
    pub(crate) mmu_ptpr: u32,
    pub(crate) mmu_mode: u32,
    pub(crate) mmu_word_lo: u32,
    pub(crate) mmu_word_hi: u32,
    pub(crate) mmu_ibvar: u32,
    pub(crate) mmu_dbvar: u32,
    pub(crate) mmu_ietr: MmuErrorType,
    pub(crate) mmu_detr: MmuErrorType,
    // physical address extension (address bits above 32, MMU off)
    pub(crate) icache_paddr_ext: u32,
    pub(crate) dcache_paddr_ext: u32,

    // ---- storage ----
    pub(crate) icache: GenericCache,
    pub(crate) dcache: GenericCache,
    pub(crate) itlb: GenericTlb,
    pub(crate) dtlb: GenericTlb,
    pub(crate) wbuf: MultiWriteBuffer,
    // data cache directory extension
    pub(crate) in_tlb: Vec<bool>,
    pub(crate) contains_ptd: Vec<bool>,

    // ---- LL/SC reservation ----
    pub(crate) llsc_valid: bool,
    pub(crate) llsc_paddr: PhysAddr,
    pub(crate) llsc_key: u32,
    pub(crate) llsc_count: u32,

    // ---- ICACHE FSM registers ----
    pub(crate) icache_fsm: IcacheState,
    pub(crate) icache_fsm_save: IcacheState,
    pub(crate) icache_vci_paddr: PhysAddr,
    pub(crate) icache_vaddr_save: VirtAddr,
    pub(crate) icache_miss_way: usize,
    pub(crate) icache_miss_set: usize,
    pub(crate) icache_miss_word: usize,
    pub(crate) icache_miss_inval: bool,
    pub(crate) icache_miss_clack: bool,
    pub(crate) icache_cc_way: usize,
    pub(crate) icache_cc_set: usize,
    pub(crate) icache_cc_word: usize,
    pub(crate) icache_cc_need_write: bool,
    pub(crate) icache_clack_req: bool,
    pub(crate) icache_clack_way: usize,
    pub(crate) icache_clack_set: usize,
    pub(crate) icache_flush_count: usize,
    pub(crate) icache_miss_req: bool,
    pub(crate) icache_unc_req: bool,
    pub(crate) icache_tlb_miss_req: bool,
    pub(crate) icache_tlb_rsp_error: bool,
    pub(crate) icache_cleanup_victim_req: bool,
    pub(crate) icache_cleanup_victim_nline: NLine,
    pub(crate) icache_cc_send_req: bool,
    pub(crate) icache_cc_send_kind: CcSendKind,
    pub(crate) icache_cc_send_nline: NLine,
    pub(crate) icache_cc_send_way: usize,
    pub(crate) icache_cc_send_updt_idx: usize,

    // ---- DCACHE FSM registers ----
    pub(crate) dcache_fsm: DcacheState,
    pub(crate) dcache_fsm_cc_save: DcacheState,
    pub(crate) dcache_fsm_scan_save: DcacheState,
    pub(crate) dcache_wbuf_req: bool,
    pub(crate) dcache_updt_req: bool,
    pub(crate) dcache_save_vaddr: VirtAddr,
    pub(crate) dcache_save_wdata: u32,
    pub(crate) dcache_save_be: u8,
    pub(crate) dcache_save_paddr: PhysAddr,
    pub(crate) dcache_save_cache_way: usize,
    pub(crate) dcache_save_cache_set: usize,
    pub(crate) dcache_save_cache_word: usize,
    pub(crate) dcache_dirty_paddr: PhysAddr,
    pub(crate) dcache_vci_paddr: PhysAddr,
    pub(crate) dcache_vci_wdata: u32,
    pub(crate) dcache_vci_miss_req: bool,
    pub(crate) dcache_vci_unc_req: bool,
    pub(crate) dcache_vci_unc_be: u8,
    pub(crate) dcache_vci_unc_write: bool,
    pub(crate) dcache_vci_cas_req: bool,
    pub(crate) dcache_vci_cas_old: u32,
    pub(crate) dcache_vci_cas_new: u32,
    pub(crate) dcache_vci_ll_req: bool,
    pub(crate) dcache_vci_sc_req: bool,
    pub(crate) dcache_vci_sc_data: u32,
    pub(crate) dcache_xtn_way: usize,
    pub(crate) dcache_xtn_set: usize,
    pub(crate) dcache_miss_kind: MissKind,
    pub(crate) dcache_miss_word: usize,
    pub(crate) dcache_miss_way: usize,
    pub(crate) dcache_miss_set: usize,
    pub(crate) dcache_miss_inval: bool,
    pub(crate) dcache_miss_clack: bool,
    pub(crate) dcache_cc_way: usize,
    pub(crate) dcache_cc_set: usize,
    pub(crate) dcache_cc_word: usize,
    pub(crate) dcache_cc_need_write: bool,
    pub(crate) dcache_clack_req: bool,
    pub(crate) dcache_clack_way: usize,
    pub(crate) dcache_clack_set: usize,
    pub(crate) dcache_flush_count: usize,
    pub(crate) dcache_ll_rsp_count: usize,
    pub(crate) dcache_tlb_vaddr: VirtAddr,
    pub(crate) dcache_tlb_ins: bool,
    pub(crate) dcache_tlb_paddr: PhysAddr,
    pub(crate) dcache_tlb_pte_flags: u32,
    pub(crate) dcache_tlb_pte_ppn: u32,
    pub(crate) dcache_tlb_cache_way: usize,
    pub(crate) dcache_tlb_cache_set: usize,
    pub(crate) dcache_tlb_cache_word: usize,
    pub(crate) dcache_tlb_inval_line: NLine,
    pub(crate) dcache_tlb_inval_set: usize,
    pub(crate) dcache_xtn_req: bool,
    pub(crate) dcache_xtn_opcode: XtnOp,
    pub(crate) dcache_cleanup_victim_req: bool,
    pub(crate) dcache_cleanup_victim_nline: NLine,
    pub(crate) dcache_cc_send_req: bool,
    pub(crate) dcache_cc_send_kind: CcSendKind,
    pub(crate) dcache_cc_send_nline: NLine,
    pub(crate) dcache_cc_send_way: usize,
    pub(crate) dcache_cc_send_updt_idx: usize,

    // ---- CMD FSM registers ----
    pub(crate) cmd_fsm: CmdState,
    pub(crate) cmd_cpt: usize,
    pub(crate) cmd_imiss_prio: bool,
    pub(crate) cmd_pending: Option<crate::vci::VciCmd>,
    pub(crate) cmd_wbuf_index: usize,

    // ---- RSP FSM registers ----
    pub(crate) rsp_fsm: RspState,
    pub(crate) rsp_current: Option<VciRsp>,
    pub(crate) rsp_word: usize,
    pub(crate) rsp_ins_error: bool,
    pub(crate) rsp_data_error: bool,
    pub(crate) rsp_fifo_icache: GenericFifo<u32>,
    pub(crate) rsp_fifo_dcache: GenericFifo<u32>,
    pub(crate) wberr_strobe: bool,

    // ---- CC_SEND FSM registers ----
    pub(crate) cc_send_fsm: CcSendState,
    pub(crate) cc_send_last_client_icache: bool,
    pub(crate) cc_send_flits: Vec<u64>,

    // ---- CC_RECEIVE FSM registers ----
    pub(crate) cc_receive_fsm: CcReceiveState,
    pub(crate) cc_receive_word_idx: usize,
    pub(crate) cc_updt_fifo: GenericFifo<UpdtWord>,
    pub(crate) cc_receive_icache_req: bool,
    pub(crate) cc_receive_icache_kind: CcReqKind,
    pub(crate) cc_receive_icache_nline: NLine,
    pub(crate) cc_receive_icache_updt_idx: usize,
    pub(crate) cc_receive_dcache_req: bool,
    pub(crate) cc_receive_dcache_kind: CcReqKind,
    pub(crate) cc_receive_dcache_nline: NLine,
    pub(crate) cc_receive_dcache_updt_idx: usize,

    // ---- CLACK interface ----
    pub(crate) clack_pending: Option<u64>,

    // ---- watchdog and instrumentation ----
    pub(crate) frozen_cycles: u32,
    /// Activity counters.
    pub stats: L1Stats,
}

impl L1Wrapper {
    /// Builds the wrapper for processor `proc_id` on `tile`.
    pub fn new(config: &Config, tile: u32, proc_id: u32) -> Self {
        let l1 = &config.l1;
        let l_width = config.topology.l_width;
        let dcache_slots = l1.dcache.ways * l1.dcache.sets;
        Self {
            tile,
            proc_id,
            srcid: SrcId::new(tile, proc_id, l_width),
            cc_id: CcId::new(tile, proc_id, l_width),
            max_frozen_cycles: l1.max_frozen_cycles,
            llsc_timeout: l1.llsc_timeout,

            mmu_ptpr: 0,
            // reset with both caches on and both TLBs off
            mmu_mode: mmu_mode::INS_CACHE | mmu_mode::DATA_CACHE,
            mmu_word_lo: 0,
            mmu_word_hi: 0,
            mmu_ibvar: 0,
            mmu_dbvar: 0,
            mmu_ietr: MmuErrorType::None,
            mmu_detr: MmuErrorType::None,
            icache_paddr_ext: 0,
            dcache_paddr_ext: 0,

            icache: GenericCache::new(l1.icache.ways, l1.icache.sets, l1.icache.words),
            dcache: GenericCache::new(l1.dcache.ways, l1.dcache.sets, l1.dcache.words),
            itlb: GenericTlb::new(l1.itlb.ways, l1.itlb.sets),
            dtlb: GenericTlb::new(l1.dtlb.ways, l1.dtlb.sets),
            wbuf: MultiWriteBuffer::new(l1.wbuf_nlines, l1.wbuf_nwords),
            in_tlb: vec![false; dcache_slots],
            contains_ptd: vec![false; dcache_slots],

            llsc_valid: false,
            llsc_paddr: PhysAddr(0),
            llsc_key: 0,
            llsc_count: 0,

            icache_fsm: IcacheState::Idle,
            icache_fsm_save: IcacheState::Idle,
            icache_vci_paddr: PhysAddr(0),
            icache_vaddr_save: VirtAddr(0),
            icache_miss_way: 0,
            icache_miss_set: 0,
            icache_miss_word: 0,
            icache_miss_inval: false,
            icache_miss_clack: false,
            icache_cc_way: 0,
            icache_cc_set: 0,
            icache_cc_word: 0,
            icache_cc_need_write: false,
            icache_clack_req: false,
            icache_clack_way: 0,
            icache_clack_set: 0,
            icache_flush_count: 0,
            icache_miss_req: false,
            icache_unc_req: false,
            icache_tlb_miss_req: false,
            icache_tlb_rsp_error: false,
            icache_cleanup_victim_req: false,
            icache_cleanup_victim_nline: NLine(0),
            icache_cc_send_req: false,
            icache_cc_send_kind: CcSendKind::Cleanup,
            icache_cc_send_nline: NLine(0),
            icache_cc_send_way: 0,
            icache_cc_send_updt_idx: 0,

            dcache_fsm: DcacheState::Idle,
            dcache_fsm_cc_save: DcacheState::Idle,
            dcache_fsm_scan_save: DcacheState::Idle,
            dcache_wbuf_req: false,
            dcache_updt_req: false,
            dcache_save_vaddr: VirtAddr(0),
            dcache_save_wdata: 0,
            dcache_save_be: 0,
            dcache_save_paddr: PhysAddr(0),
            dcache_save_cache_way: 0,
            dcache_save_cache_set: 0,
            dcache_save_cache_word: 0,
            dcache_dirty_paddr: PhysAddr(0),
            dcache_vci_paddr: PhysAddr(0),
            dcache_vci_wdata: 0,
            dcache_vci_miss_req: false,
            dcache_vci_unc_req: false,
            dcache_vci_unc_be: 0,
            dcache_vci_unc_write: false,
            dcache_vci_cas_req: false,
            dcache_vci_cas_old: 0,
            dcache_vci_cas_new: 0,
            dcache_vci_ll_req: false,
            dcache_vci_sc_req: false,
            dcache_vci_sc_data: 0,
            dcache_xtn_way: 0,
            dcache_xtn_set: 0,
            dcache_miss_kind: MissKind::Proc,
            dcache_miss_word: 0,
            dcache_miss_way: 0,
            dcache_miss_set: 0,
            dcache_miss_inval: false,
            dcache_miss_clack: false,
            dcache_cc_way: 0,
            dcache_cc_set: 0,
            dcache_cc_word: 0,
            dcache_cc_need_write: false,
            dcache_clack_req: false,
            dcache_clack_way: 0,
            dcache_clack_set: 0,
            dcache_flush_count: 0,
            dcache_ll_rsp_count: 0,
            dcache_tlb_vaddr: VirtAddr(0),
            dcache_tlb_ins: false,
            dcache_tlb_paddr: PhysAddr(0),
            dcache_tlb_pte_flags: 0,
            dcache_tlb_pte_ppn: 0,
            dcache_tlb_cache_way: 0,
            dcache_tlb_cache_set: 0,
            dcache_tlb_cache_word: 0,
            dcache_tlb_inval_line: NLine(0),
            dcache_tlb_inval_set: 0,
            dcache_xtn_req: false,
            dcache_xtn_opcode: XtnOp::Sync,
            dcache_cleanup_victim_req: false,
            dcache_cleanup_victim_nline: NLine(0),
            dcache_cc_send_req: false,
            dcache_cc_send_kind: CcSendKind::Cleanup,
            dcache_cc_send_nline: NLine(0),
            dcache_cc_send_way: 0,
            dcache_cc_send_updt_idx: 0,

            cmd_fsm: CmdState::Idle,
            cmd_cpt: 0,
            cmd_imiss_prio: false,
            cmd_pending: None,
            cmd_wbuf_index: 0,

            rsp_fsm: RspState::Idle,
            rsp_current: None,
            rsp_word: 0,
            rsp_ins_error: false,
            rsp_data_error: false,
            rsp_fifo_icache: GenericFifo::new(2),
            rsp_fifo_dcache: GenericFifo::new(2),
            wberr_strobe: false,

            cc_send_fsm: CcSendState::Idle,
            cc_send_last_client_icache: false,
            cc_send_flits: Vec::new(),

            cc_receive_fsm: CcReceiveState::Idle,
            cc_receive_word_idx: 0,
            cc_updt_fifo: GenericFifo::new(2),
            cc_receive_icache_req: false,
            cc_receive_icache_kind: CcReqKind::Inval,
            cc_receive_icache_nline: NLine(0),
            cc_receive_icache_updt_idx: 0,
            cc_receive_dcache_req: false,
            cc_receive_dcache_kind: CcReqKind::Inval,
            cc_receive_dcache_nline: NLine(0),
            cc_receive_dcache_updt_idx: 0,

            clack_pending: None,

            frozen_cycles: 0,
            stats: L1Stats::default(),
        }
    }

    /// Global cache identity of this wrapper.
    #[inline]
    pub const fn cc_id(&self) -> CcId {
        self.cc_id
    }

    /// Global initiator identity of this wrapper.
    #[inline]
    pub const fn srcid(&self) -> SrcId {
        self.srcid
    }

    /// Advances the wrapper by one clock cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Frozen`] when a processor request stays blocked
    /// beyond `max_frozen_cycles`, and [`SimError::Protocol`] on malformed
    /// response packets.
    pub fn step(
        &mut self,
        ireq: &InstructionRequest,
        dreq: &DataRequest,
        ports: &mut Ports<'_>,
    ) -> Result<L1Output, SimError> {
        self.wberr_strobe = false;
        let mut irsp = InstructionResponse::default();
        let mut drsp = DataResponse::default();

        self.icache_fsm_step(ireq, &mut irsp, ports);
        self.dcache_fsm_step(dreq, &mut drsp, ports);

        // LL/SC reservation aging
        if self.llsc_valid {
            if self.llsc_count == 0 {
                self.llsc_valid = false;
            } else {
                self.llsc_count -= 1;
            }
        }

        self.cmd_fsm_step(ports);
        self.rsp_fsm_step(ports)?;
        self.cc_send_fsm_step(ports);
        self.cc_receive_fsm_step(ports);
        self.clack_iface_step(ports);

        self.wbuf.tick();
        self.stats.total_cycles += 1;

        // frozen-request watchdog
        let blocked =
            (ireq.valid && !irsp.valid) || (dreq.valid && !drsp.valid);
        if blocked {
            self.frozen_cycles += 1;
            if self.frozen_cycles > self.max_frozen_cycles {
                return Err(SimError::Frozen {
                    tile: self.tile,
                    proc: self.proc_id,
                    cycles: self.frozen_cycles,
                    fsm: "DCACHE",
                    state: self.dcache_fsm.name(),
                });
            }
        } else {
            self.frozen_cycles = 0;
        }

        Ok(L1Output {
            irsp,
            drsp,
            wberr: self.wberr_strobe,
        })
    }

    /// Clears the LL/SC reservation if `paddr` falls on the reserved
    /// word's line.
    pub(crate) fn llsc_clear_on_match(&mut self, nline: NLine) {
        let words = self.dcache.words();
        if self.llsc_valid && self.llsc_paddr.nline(words) == nline {
            self.llsc_valid = false;
        }
    }

    /// Coherence state of the data-cache slot holding `paddr` (harness
    /// and verifier interface).
    pub fn dcache_line_state(&self, paddr: PhysAddr) -> cache::SlotState {
        self.dcache.read_dir(paddr).state
    }

    /// Coherence state of the instruction-cache slot holding `paddr`.
    pub fn icache_line_state(&self, paddr: PhysAddr) -> cache::SlotState {
        self.icache.read_dir(paddr).state
    }

    /// Current word value of a resident data-cache line.
    pub fn dcache_peek(&self, paddr: PhysAddr) -> Option<u32> {
        let access = self.dcache.read_dir(paddr);
        (access.state == cache::SlotState::Valid)
            .then(|| self.dcache.read_word(access.way, access.set, access.word))
    }

    /// `true` when the write buffer holds no pending write.
    pub fn wbuf_is_empty(&self) -> bool {
        self.wbuf.is_empty()
    }
}
