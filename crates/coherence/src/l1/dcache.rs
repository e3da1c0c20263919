//! Data cache FSM.
//!
//! Serves loads, stores, LL/SC, CAS-backed housekeeping and XTN
//! maintenance; owns the MMU table-walk sub-FSM (shared by both TLBs),
//! the dirty-bit update sub-FSM, and the selective TLB-invalidation scan
//! triggered whenever a data line backing TLB entries is modified.
//!
//! Processor requests are taken in IDLE only, through a two-stage
//! pipeline: stage P0 reads the DTLB and the cache in parallel with the
//! request; stage P1 (next cycle) commits the posted write into the write
//! buffer and, on a hit, into the cache. The `dcache_wbuf_req` and
//! `dcache_updt_req` flip-flops carry the work from P0 to P1.

use tracing::trace;

use super::cache::SlotState;
use super::cc::{CcReqKind, CcSendKind};
use super::tlb::{pte, PteFlags};
use super::{mmu_mode, L1Wrapper};
use crate::common::{MmuErrorType, NLine, PhysAddr, VirtAddr};
use crate::proc::{DataOp, DataRequest, DataResponse, Mode, XtnOp};
use crate::sim::ports::Ports;

/// What a pending data-cache refill is for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissKind {
    /// Ordinary processor load miss.
    #[default]
    Proc,
    /// Table walker fetching a first-level PTE.
    Pte1,
    /// Table walker fetching a second-level PTE.
    Pte2,
}

/// DCACHE FSM states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DcacheState {
    /// Serve processor requests; entry point for all sub-FSMs.
    #[default]
    Idle,
    /// Table-walk entry point: decide PT1 access or PT2 bypass.
    TlbMiss,
    /// Read the PTE1 from the data cache.
    TlbPte1Get,
    /// Select a TLB slot for the PTE1.
    TlbPte1Select,
    /// Install the PTE1 after testing the access bit.
    TlbPte1Updt,
    /// Read the PTE2 (two words) from the data cache.
    TlbPte2Get,
    /// Select a TLB slot for the PTE2.
    TlbPte2Select,
    /// Install the PTE2 after testing the access bit.
    TlbPte2Updt,
    /// Post the access-bit CAS.
    TlbLrUpdt,
    /// Wait for the access-bit CAS response.
    TlbLrWait,
    /// Hand the walk result back to the requester.
    TlbReturn,
    /// XTN: PTPR switch, flush the DTLB (the ICACHE flushes the ITLB).
    XtnSwitch,
    /// XTN: wait until the write buffer drains.
    XtnSync,
    /// XTN: wait for the ICACHE FSM to flush its cache.
    XtnIcFlush,
    /// XTN: wait for the ICACHE FSM to invalidate by virtual address.
    XtnIcInvalVa,
    /// XTN: wait for the ICACHE FSM to invalidate by physical address.
    XtnIcInvalPa,
    /// XTN: wait for the ICACHE FSM to invalidate an ITLB entry.
    XtnItInval,
    /// XTN: wait for the ICACHE FSM to take its address-extension write.
    XtnIcPaddrExt,
    /// XTN: walk all data cache slots, sending cleanups.
    XtnDcFlush,
    /// XTN: switch the selected slot to ZOMBI during a flush.
    XtnDcFlushGo,
    /// XTN: selective data line invalidate by virtual address.
    XtnDcInvalVa,
    /// XTN: selective data line invalidate by physical address.
    XtnDcInvalPa,
    /// XTN: switch the selected slot to ZOMBI for an invalidate.
    XtnDcInvalGo,
    /// XTN: acknowledge the invalidate to the processor.
    XtnDcInvalEnd,
    /// XTN: invalidate one DTLB entry.
    XtnDtInval,
    /// Dirty-bit sub-FSM: fetch the PTE and post the CAS.
    DirtyGetPte,
    /// Dirty-bit sub-FSM: wait for the CAS response.
    DirtyWait,
    /// Select a victim slot for a refill.
    MissSelect,
    /// Switch the victim slot to ZOMBI.
    MissClean,
    /// Wait for the refill response.
    MissWait,
    /// Fill the line, one word per cycle.
    MissDataUpdt,
    /// Commit the refill in the directory (or ZOMBI on a raced inval).
    MissDirUpdt,
    /// Wait for an uncacheable read/write response.
    UncWait,
    /// Wait for the two-flit LL response.
    LlWait,
    /// Wait for the SC response.
    ScWait,
    /// Entry point of the coherence sub-FSM.
    CcCheck,
    /// Coherence invalidate hit: TLB housekeeping, ZOMBI, cleanup.
    CcInval,
    /// Coherence update hit: TLB housekeeping, write words, acknowledge.
    CcUpdt,
    /// Scan both TLBs set by set, dropping entries backed by one line.
    InvalTlbScan,
}

impl DcacheState {
    /// State name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "DCACHE_IDLE",
            Self::TlbMiss => "DCACHE_TLB_MISS",
            Self::TlbPte1Get => "DCACHE_TLB_PTE1_GET",
            Self::TlbPte1Select => "DCACHE_TLB_PTE1_SELECT",
            Self::TlbPte1Updt => "DCACHE_TLB_PTE1_UPDT",
            Self::TlbPte2Get => "DCACHE_TLB_PTE2_GET",
            Self::TlbPte2Select => "DCACHE_TLB_PTE2_SELECT",
            Self::TlbPte2Updt => "DCACHE_TLB_PTE2_UPDT",
            Self::TlbLrUpdt => "DCACHE_TLB_LR_UPDT",
            Self::TlbLrWait => "DCACHE_TLB_LR_WAIT",
            Self::TlbReturn => "DCACHE_TLB_RETURN",
            Self::XtnSwitch => "DCACHE_XTN_SWITCH",
            Self::XtnSync => "DCACHE_XTN_SYNC",
            Self::XtnIcFlush => "DCACHE_XTN_IC_FLUSH",
            Self::XtnIcInvalVa => "DCACHE_XTN_IC_INVAL_VA",
            Self::XtnIcInvalPa => "DCACHE_XTN_IC_INVAL_PA",
            Self::XtnItInval => "DCACHE_XTN_IT_INVAL",
            Self::XtnIcPaddrExt => "DCACHE_XTN_IC_PADDR_EXT",
            Self::XtnDcFlush => "DCACHE_XTN_DC_FLUSH",
            Self::XtnDcFlushGo => "DCACHE_XTN_DC_FLUSH_GO",
            Self::XtnDcInvalVa => "DCACHE_XTN_DC_INVAL_VA",
            Self::XtnDcInvalPa => "DCACHE_XTN_DC_INVAL_PA",
            Self::XtnDcInvalGo => "DCACHE_XTN_DC_INVAL_GO",
            Self::XtnDcInvalEnd => "DCACHE_XTN_DC_INVAL_END",
            Self::XtnDtInval => "DCACHE_XTN_DT_INVAL",
            Self::DirtyGetPte => "DCACHE_DIRTY_GET_PTE",
            Self::DirtyWait => "DCACHE_DIRTY_WAIT",
            Self::MissSelect => "DCACHE_MISS_SELECT",
            Self::MissClean => "DCACHE_MISS_CLEAN",
            Self::MissWait => "DCACHE_MISS_WAIT",
            Self::MissDataUpdt => "DCACHE_MISS_DATA_UPDT",
            Self::MissDirUpdt => "DCACHE_MISS_DIR_UPDT",
            Self::UncWait => "DCACHE_UNC_WAIT",
            Self::LlWait => "DCACHE_LL_WAIT",
            Self::ScWait => "DCACHE_SC_WAIT",
            Self::CcCheck => "DCACHE_CC_CHECK",
            Self::CcInval => "DCACHE_CC_INVAL",
            Self::CcUpdt => "DCACHE_CC_UPDT",
            Self::InvalTlbScan => "DCACHE_INVAL_TLB_SCAN",
        }
    }
}

impl L1Wrapper {
    /// Takes a pending coherence interrupt. Returns `true` when the FSM
    /// switched to `CcCheck`.
    fn dcache_take_cc(&mut self) -> bool {
        if self.dcache_clack_req {
            self.dcache_fsm_cc_save = self.dcache_fsm;
            self.dcache_fsm = DcacheState::CcCheck;
            return true;
        }
        if self.cc_receive_dcache_req && !self.dcache_cc_send_req {
            self.dcache_fsm_cc_save = self.dcache_fsm;
            self.dcache_fsm = DcacheState::CcCheck;
            return true;
        }
        false
    }

    /// Posts the buffered cleanup-victim request when the CC_SEND port
    /// frees up.
    fn dcache_flush_cleanup_victim(&mut self) {
        if self.dcache_cleanup_victim_req && !self.dcache_cc_send_req {
            self.dcache_cc_send_req = true;
            self.dcache_cc_send_nline = self.dcache_cleanup_victim_nline;
            self.dcache_cc_send_way = self.dcache_miss_way;
            self.dcache_cc_send_kind = CcSendKind::Cleanup;
            self.dcache_cleanup_victim_req = false;
        }
    }

    /// Reports an MMU fault on the data port.
    fn dcache_mmu_fault(
        &mut self,
        drsp: &mut DataResponse,
        code: MmuErrorType,
        vaddr: VirtAddr,
    ) {
        self.mmu_detr = code;
        self.mmu_dbvar = vaddr.val();
        drsp.valid = true;
        drsp.error = true;
        drsp.rdata = 0;
        self.dcache_fsm = DcacheState::Idle;
    }

    /// Routes a finished (or aborted) table walk back to its requester.
    fn tlb_walk_error(&mut self, drsp: &mut DataResponse, code: MmuErrorType) {
        if self.dcache_tlb_ins {
            self.mmu_ietr = code;
            self.mmu_ibvar = self.dcache_tlb_vaddr.val();
            self.icache_tlb_miss_req = false;
            self.icache_tlb_rsp_error = true;
            self.dcache_fsm = DcacheState::Idle;
        } else {
            self.dcache_mmu_fault(drsp, code, self.dcache_tlb_vaddr);
        }
    }

    /// `true` when the page at `page_base` is homed on this tile (selects
    /// the `L` or `R` reference bit).
    fn page_is_local(&self, ports: &Ports<'_>, page_base: PhysAddr) -> bool {
        ports.map.home_tile(page_base) == self.tile
    }

    /// One cycle of the DCACHE FSM.
    pub(crate) fn dcache_fsm_step(
        &mut self,
        dreq: &DataRequest,
        drsp: &mut DataResponse,
        ports: &Ports<'_>,
    ) {
        match self.dcache_fsm {
            DcacheState::Idle => self.dcache_idle(dreq, drsp, ports),

            // ---- table walk sub-FSM ----
            DcacheState::TlbMiss => {
                let vaddr = self.dcache_tlb_vaddr;
                let tlb = if self.dcache_tlb_ins { &self.itlb } else { &self.dtlb };
                if let Some(pt2_base) = tlb.get_bypass(vaddr) {
                    self.dcache_tlb_paddr =
                        PhysAddr(pt2_base.val() | (u64::from(vaddr.pt2_index()) << 3));
                    self.dcache_fsm = DcacheState::TlbPte2Get;
                } else {
                    self.dcache_tlb_paddr = PhysAddr(
                        (u64::from(self.mmu_ptpr) << 13) | (u64::from(vaddr.pt1_index()) << 2),
                    );
                    self.dcache_fsm = DcacheState::TlbPte1Get;
                }
            }

            DcacheState::TlbPte1Get => {
                let access = self.dcache.read(self.dcache_tlb_paddr);
                match access.state {
                    SlotState::Valid => {
                        let pte1 = access.rdata;
                        if pte1 & pte::V == 0 {
                            let code = if self.dcache_tlb_ins || !is_write_op(dreq) {
                                MmuErrorType::ReadPt1Unmapped
                            } else {
                                MmuErrorType::WritePt1Unmapped
                            };
                            self.tlb_walk_error(drsp, code);
                        } else if pte1 & pte::T != 0 {
                            // PTD: record the bypass and follow to PT2
                            let words = self.dcache.words();
                            let nline = self.dcache_tlb_paddr.nline(words);
                            let pt2_base =
                                PhysAddr(u64::from(pte1 & pte::PPN2_MASK) << 12);
                            let slot = access.way * self.dcache.sets() + access.set;
                            self.contains_ptd[slot] = true;
                            if self.dcache_tlb_ins {
                                self.itlb.set_bypass(self.dcache_tlb_vaddr, pt2_base, nline);
                            } else {
                                self.dtlb.set_bypass(self.dcache_tlb_vaddr, pt2_base, nline);
                            }
                            self.dcache_tlb_paddr = PhysAddr(
                                pt2_base.val()
                                    | (u64::from(self.dcache_tlb_vaddr.pt2_index()) << 3),
                            );
                            self.dcache_fsm = DcacheState::TlbPte2Get;
                        } else {
                            self.dcache_tlb_pte_flags = pte1;
                            self.dcache_tlb_cache_way = access.way;
                            self.dcache_tlb_cache_set = access.set;
                            self.dcache_tlb_cache_word = access.word;
                            self.dcache_fsm = DcacheState::TlbPte1Select;
                        }
                    }
                    SlotState::Zombi => {} // wait for the cleanup ack
                    SlotState::Empty => {
                        self.stats.data_misses += 1;
                        self.dcache_vci_paddr = self.dcache_tlb_paddr;
                        self.dcache_vci_miss_req = true;
                        self.dcache_miss_kind = MissKind::Pte1;
                        self.dcache_fsm = DcacheState::MissSelect;
                    }
                }
            }

            DcacheState::TlbPte1Select => {
                self.dcache_fsm = DcacheState::TlbPte1Updt;
            }

            DcacheState::TlbPte1Updt => {
                let pte1 = self.dcache_tlb_pte_flags;
                let page_base = PhysAddr(u64::from(pte1 & pte::PPN1_MASK) << 21);
                let local = self.page_is_local(ports, page_base);
                let bit = if local { pte::L } else { pte::R };
                if pte1 & bit == 0 {
                    // set the reference bit in memory, without writing the
                    // TLB; coherence propagates the update
                    self.dcache_vci_cas_old = pte1;
                    self.dcache_vci_cas_new = pte1 | bit;
                    self.dcache_fsm = DcacheState::TlbLrUpdt;
                } else {
                    let words = self.dcache.words();
                    let nline = self.dcache_tlb_paddr.nline(words);
                    let slot =
                        self.dcache_tlb_cache_way * self.dcache.sets() + self.dcache_tlb_cache_set;
                    self.in_tlb[slot] = true;
                    if self.dcache_tlb_ins {
                        self.itlb.insert_pte1(self.dcache_tlb_vaddr, pte1, nline);
                    } else {
                        self.dtlb.insert_pte1(self.dcache_tlb_vaddr, pte1, nline);
                    }
                    self.dcache_fsm = DcacheState::TlbReturn;
                }
            }

            DcacheState::TlbPte2Get => {
                let access = self.dcache.read(self.dcache_tlb_paddr);
                match access.state {
                    SlotState::Valid => {
                        let flags = access.rdata;
                        if flags & pte::V == 0 {
                            let code = if self.dcache_tlb_ins || !is_write_op(dreq) {
                                MmuErrorType::ReadPt2Unmapped
                            } else {
                                MmuErrorType::WritePt2Unmapped
                            };
                            self.tlb_walk_error(drsp, code);
                        } else {
                            self.dcache_tlb_pte_flags = flags;
                            self.dcache_tlb_pte_ppn =
                                self.dcache.read_word(access.way, access.set, access.word + 1);
                            self.dcache_tlb_cache_way = access.way;
                            self.dcache_tlb_cache_set = access.set;
                            self.dcache_tlb_cache_word = access.word;
                            self.dcache_fsm = DcacheState::TlbPte2Select;
                        }
                    }
                    SlotState::Zombi => {}
                    SlotState::Empty => {
                        self.stats.data_misses += 1;
                        self.dcache_vci_paddr = self.dcache_tlb_paddr;
                        self.dcache_vci_miss_req = true;
                        self.dcache_miss_kind = MissKind::Pte2;
                        self.dcache_fsm = DcacheState::MissSelect;
                    }
                }
            }

            DcacheState::TlbPte2Select => {
                self.dcache_fsm = DcacheState::TlbPte2Updt;
            }

            DcacheState::TlbPte2Updt => {
                let flags = self.dcache_tlb_pte_flags;
                let ppn = self.dcache_tlb_pte_ppn;
                let page_base = PhysAddr(u64::from(ppn & pte::PPN2_MASK) << 12);
                let local = self.page_is_local(ports, page_base);
                let bit = if local { pte::L } else { pte::R };
                if flags & bit == 0 {
                    self.dcache_vci_cas_old = flags;
                    self.dcache_vci_cas_new = flags | bit;
                    self.dcache_fsm = DcacheState::TlbLrUpdt;
                } else {
                    let words = self.dcache.words();
                    let nline = self.dcache_tlb_paddr.nline(words);
                    let slot =
                        self.dcache_tlb_cache_way * self.dcache.sets() + self.dcache_tlb_cache_set;
                    self.in_tlb[slot] = true;
                    if self.dcache_tlb_ins {
                        self.itlb
                            .insert_pte2(self.dcache_tlb_vaddr, flags, ppn, nline);
                    } else {
                        self.dtlb
                            .insert_pte2(self.dcache_tlb_vaddr, flags, ppn, nline);
                    }
                    self.dcache_fsm = DcacheState::TlbReturn;
                }
            }

            DcacheState::TlbLrUpdt => {
                self.stats.tlb_ref_bit_cas += 1;
                self.dcache_vci_paddr = self.dcache_tlb_paddr;
                self.dcache_vci_cas_req = true;
                self.dcache_fsm = DcacheState::TlbLrWait;
            }

            DcacheState::TlbLrWait => {
                if self.dcache_take_cc() {
                    return;
                }
                if self.rsp_data_error {
                    self.rsp_data_error = false;
                    let code = if self.dcache_tlb_ins || !is_write_op(dreq) {
                        MmuErrorType::ReadPt1IllegalAccess
                    } else {
                        MmuErrorType::WritePt1IllegalAccess
                    };
                    self.tlb_walk_error(drsp, code);
                } else if self.rsp_fifo_dcache.pop().is_some() {
                    // success or failure, the walk retries; the coherence
                    // update refreshes the cached PTE copy
                    self.dcache_fsm = DcacheState::TlbReturn;
                }
            }

            DcacheState::TlbReturn => {
                if self.dcache_tlb_ins {
                    self.icache_tlb_miss_req = false;
                }
                self.dcache_fsm = DcacheState::Idle;
            }

            // ---- XTN sub-FSM ----
            DcacheState::XtnSwitch => {
                // the ICACHE FSM flushes the ITLB and resets the request
                if !self.dcache_xtn_req {
                    self.dtlb.flush();
                    drsp.valid = true;
                    self.dcache_fsm = DcacheState::Idle;
                }
            }

            DcacheState::XtnSync => {
                if self.wbuf.is_empty() {
                    drsp.valid = true;
                    self.dcache_fsm = DcacheState::Idle;
                }
            }

            DcacheState::XtnIcFlush
            | DcacheState::XtnIcInvalVa
            | DcacheState::XtnIcInvalPa
            | DcacheState::XtnIcPaddrExt
            | DcacheState::XtnItInval => {
                // the icache XTN operation can itself raise an itlb miss
                if self.icache_tlb_miss_req {
                    self.dcache_tlb_ins = true;
                    self.dcache_tlb_vaddr = self.icache_vaddr_save;
                    self.dcache_fsm = DcacheState::TlbMiss;
                    return;
                }
                if !self.dcache_xtn_req {
                    drsp.valid = true;
                    self.dcache_fsm = DcacheState::Idle;
                }
            }

            DcacheState::XtnDcFlush => {
                if self.dcache_take_cc() {
                    return;
                }
                if self.dcache_cc_send_req {
                    return;
                }
                let sets = self.dcache.sets();
                let total = sets * self.dcache.ways();
                if self.dcache_flush_count == total {
                    self.itlb.reset();
                    self.dtlb.reset();
                    self.in_tlb.fill(false);
                    self.contains_ptd.fill(false);
                    drsp.valid = true;
                    self.dcache_fsm = DcacheState::Idle;
                    return;
                }
                let way = self.dcache_flush_count / sets;
                let set = self.dcache_flush_count % sets;
                if self.dcache.slot_state(way, set) == SlotState::Valid {
                    self.dcache_cc_send_req = true;
                    self.dcache_cc_send_nline = self.dcache.slot_nline(way, set);
                    self.dcache_cc_send_way = way;
                    self.dcache_cc_send_kind = CcSendKind::Cleanup;
                    self.dcache_xtn_way = way;
                    self.dcache_xtn_set = set;
                    self.dcache_fsm = DcacheState::XtnDcFlushGo;
                } else {
                    self.dcache_flush_count += 1;
                }
            }

            DcacheState::XtnDcFlushGo => {
                self.dcache
                    .write_dir_state(self.dcache_xtn_way, self.dcache_xtn_set, SlotState::Zombi);
                self.dcache_flush_count += 1;
                self.dcache_fsm = DcacheState::XtnDcFlush;
            }

            DcacheState::XtnDcInvalVa => {
                // translate the operand through the dtlb when it is on
                let vaddr = VirtAddr(self.dcache_save_wdata);
                if self.mmu_mode & mmu_mode::DATA_TLB != 0 {
                    match self.dtlb.translate(vaddr) {
                        Some(hit) => {
                            self.dcache_save_paddr = hit.paddr;
                            self.dcache_fsm = DcacheState::XtnDcInvalPa;
                        }
                        None => {
                            self.dcache_tlb_ins = false;
                            self.dcache_tlb_vaddr = vaddr;
                            self.dcache_fsm = DcacheState::TlbMiss;
                        }
                    }
                } else {
                    self.dcache_save_paddr = PhysAddr(u64::from(vaddr.val()));
                    self.dcache_fsm = DcacheState::XtnDcInvalPa;
                }
            }

            DcacheState::XtnDcInvalPa => {
                let access = self.dcache.read_dir(self.dcache_save_paddr);
                if access.state == SlotState::Valid {
                    if self.dcache_cc_send_req {
                        return;
                    }
                    self.dcache_xtn_way = access.way;
                    self.dcache_xtn_set = access.set;
                    self.dcache_cc_send_req = true;
                    self.dcache_cc_send_nline =
                        self.dcache_save_paddr.nline(self.dcache.words());
                    self.dcache_cc_send_way = access.way;
                    self.dcache_cc_send_kind = CcSendKind::Cleanup;
                    self.dcache_fsm = DcacheState::XtnDcInvalGo;
                } else {
                    self.dcache_fsm = DcacheState::XtnDcInvalEnd;
                }
            }

            DcacheState::XtnDcInvalGo => {
                let way = self.dcache_xtn_way;
                let set = self.dcache_xtn_set;
                self.dcache.write_dir_state(way, set, SlotState::Zombi);
                let slot = way * self.dcache.sets() + set;
                if self.in_tlb[slot] {
                    self.in_tlb[slot] = false;
                    self.dcache_tlb_inval_line =
                        self.dcache_save_paddr.nline(self.dcache.words());
                    self.dcache_tlb_inval_set = 0;
                    self.dcache_fsm_scan_save = DcacheState::XtnDcInvalEnd;
                    self.dcache_fsm = DcacheState::InvalTlbScan;
                    return;
                }
                if self.contains_ptd[slot] {
                    self.itlb.reset();
                    self.dtlb.reset();
                    self.contains_ptd[slot] = false;
                }
                self.dcache_fsm = DcacheState::XtnDcInvalEnd;
            }

            DcacheState::XtnDcInvalEnd => {
                drsp.valid = true;
                self.dcache_fsm = DcacheState::Idle;
            }

            DcacheState::XtnDtInval => {
                self.dtlb.inval(VirtAddr(self.dcache_save_wdata));
                drsp.valid = true;
                self.dcache_fsm = DcacheState::Idle;
            }

            // ---- dirty-bit sub-FSM ----
            DcacheState::DirtyGetPte => {
                let access = self.dcache.read(self.dcache_dirty_paddr);
                if access.state != SlotState::Valid {
                    // the PTE copy left the cache; retry through a miss
                    self.dcache_fsm = DcacheState::Idle;
                    return;
                }
                let pte_value = access.rdata;
                // a CAS on the reserved word invalidates the reservation
                if self.llsc_valid && self.llsc_paddr == self.dcache_dirty_paddr {
                    self.llsc_valid = false;
                }
                self.stats.dirty_bit_cas += 1;
                self.dcache_vci_cas_req = true;
                self.dcache_vci_paddr = self.dcache_dirty_paddr;
                self.dcache_vci_cas_old = pte_value;
                self.dcache_vci_cas_new = pte_value | pte::D;
                self.dcache_fsm = DcacheState::DirtyWait;
            }

            DcacheState::DirtyWait => {
                if self.dcache_take_cc() {
                    return;
                }
                // a CAS failure is harmless: the write retries and the
                // coherence update refreshes the local copy
                if self.rsp_fifo_dcache.pop().is_some() {
                    self.dcache_fsm = DcacheState::Idle;
                }
            }

            // ---- miss sub-FSM ----
            DcacheState::MissSelect => {
                if self.dcache_take_cc() {
                    return;
                }
                let Some(victim) = self.dcache.read_select(self.dcache_vci_paddr) else {
                    return;
                };
                self.dcache_miss_way = victim.way;
                self.dcache_miss_set = victim.set;
                if victim.cleanup {
                    if self.dcache_cc_send_req {
                        self.dcache_cleanup_victim_req = true;
                        self.dcache_cleanup_victim_nline = victim.victim;
                    } else {
                        self.dcache_cc_send_req = true;
                        self.dcache_cc_send_nline = victim.victim;
                        self.dcache_cc_send_way = victim.way;
                        self.dcache_cc_send_kind = CcSendKind::Cleanup;
                    }
                    self.dcache_miss_clack = true;
                    self.dcache_fsm = DcacheState::MissClean;
                } else {
                    self.dcache_fsm = DcacheState::MissWait;
                }
                trace!(
                    way = victim.way,
                    set = victim.set,
                    cleanup = victim.cleanup,
                    "dcache miss select"
                );
            }

            DcacheState::MissClean => {
                let way = self.dcache_miss_way;
                let set = self.dcache_miss_set;
                let victim_nline = self.dcache.slot_nline(way, set);
                self.dcache.write_dir_state(way, set, SlotState::Zombi);
                let slot = way * self.dcache.sets() + set;
                if self.in_tlb[slot] {
                    self.in_tlb[slot] = false;
                    self.dcache_tlb_inval_line = victim_nline;
                    self.dcache_tlb_inval_set = 0;
                    self.dcache_fsm_scan_save = DcacheState::MissWait;
                    self.dcache_fsm = DcacheState::InvalTlbScan;
                    return;
                }
                if self.contains_ptd[slot] {
                    self.itlb.reset();
                    self.dtlb.reset();
                    self.contains_ptd[slot] = false;
                }
                self.dcache_fsm = DcacheState::MissWait;
            }

            DcacheState::MissWait => {
                self.dcache_flush_cleanup_victim();
                if self.dcache_clack_req {
                    self.dcache_fsm_cc_save = self.dcache_fsm;
                    self.dcache_fsm = DcacheState::CcCheck;
                    return;
                }
                if self.cc_receive_dcache_req
                    && !self.dcache_cc_send_req
                    && !self.dcache_cleanup_victim_req
                {
                    self.dcache_fsm_cc_save = self.dcache_fsm;
                    self.dcache_fsm = DcacheState::CcCheck;
                    return;
                }
                if self.rsp_data_error {
                    self.rsp_data_error = false;
                    match self.dcache_miss_kind {
                        MissKind::Proc => {
                            self.dcache_mmu_fault(
                                drsp,
                                MmuErrorType::ReadDataIllegalAccess,
                                self.dcache_save_vaddr,
                            );
                        }
                        MissKind::Pte1 => {
                            let code = if self.dcache_tlb_ins || !is_write_op(dreq) {
                                MmuErrorType::ReadPt1IllegalAccess
                            } else {
                                MmuErrorType::WritePt1IllegalAccess
                            };
                            self.tlb_walk_error(drsp, code);
                        }
                        MissKind::Pte2 => {
                            let code = if self.dcache_tlb_ins || !is_write_op(dreq) {
                                MmuErrorType::ReadPt2IllegalAccess
                            } else {
                                MmuErrorType::WritePt2IllegalAccess
                            };
                            self.tlb_walk_error(drsp, code);
                        }
                    }
                } else if self.rsp_fifo_dcache.rok() {
                    self.dcache_miss_word = 0;
                    self.dcache_fsm = DcacheState::MissDataUpdt;
                }
            }

            DcacheState::MissDataUpdt => {
                if let Some(word) = self.rsp_fifo_dcache.pop() {
                    self.dcache.write(
                        self.dcache_miss_way,
                        self.dcache_miss_set,
                        self.dcache_miss_word,
                        word,
                        0xF,
                    );
                    self.dcache_miss_word += 1;
                    if self.dcache_miss_word == self.dcache.words() {
                        self.dcache_fsm = DcacheState::MissDirUpdt;
                    }
                }
            }

            DcacheState::MissDirUpdt => {
                self.dcache_flush_cleanup_victim();
                if self.dcache_clack_req {
                    self.dcache_fsm_cc_save = self.dcache_fsm;
                    self.dcache_fsm = DcacheState::CcCheck;
                    return;
                }
                if self.cc_receive_dcache_req
                    && !self.dcache_cc_send_req
                    && !self.dcache_cleanup_victim_req
                {
                    self.dcache_fsm_cc_save = self.dcache_fsm;
                    self.dcache_fsm = DcacheState::CcCheck;
                    return;
                }
                if self.dcache_miss_clack {
                    return;
                }
                if self.dcache_miss_inval {
                    if self.dcache_cc_send_req {
                        return;
                    }
                    self.dcache_miss_inval = false;
                    self.dcache_cc_send_req = true;
                    self.dcache_cc_send_nline = self.dcache_vci_paddr.nline(self.dcache.words());
                    self.dcache_cc_send_way = self.dcache_miss_way;
                    self.dcache_cc_send_kind = CcSendKind::Cleanup;
                    self.dcache.write_dir(
                        self.dcache_vci_paddr,
                        self.dcache_miss_way,
                        self.dcache_miss_set,
                        SlotState::Zombi,
                    );
                } else {
                    self.dcache.write_dir(
                        self.dcache_vci_paddr,
                        self.dcache_miss_way,
                        self.dcache_miss_set,
                        SlotState::Valid,
                    );
                }
                self.dcache_fsm = match self.dcache_miss_kind {
                    MissKind::Proc => DcacheState::Idle,
                    MissKind::Pte1 => DcacheState::TlbPte1Get,
                    MissKind::Pte2 => DcacheState::TlbPte2Get,
                };
            }

            // ---- wait states for direct-network responses ----
            DcacheState::UncWait => {
                if self.dcache_take_cc() {
                    return;
                }
                if self.rsp_data_error {
                    let code = if self.dcache_vci_unc_write {
                        MmuErrorType::WriteDataIllegalAccess
                    } else {
                        MmuErrorType::ReadDataIllegalAccess
                    };
                    self.rsp_data_error = false;
                    self.dcache_mmu_fault(drsp, code, dreq.addr);
                } else if let Some(word) = self.rsp_fifo_dcache.pop() {
                    self.dcache_fsm = DcacheState::Idle;
                    if dreq.valid && dreq.addr == self.dcache_save_vaddr {
                        drsp.valid = true;
                        drsp.rdata = word;
                    }
                }
            }

            DcacheState::LlWait => {
                if self.dcache_take_cc() {
                    return;
                }
                if self.rsp_data_error {
                    self.rsp_data_error = false;
                    self.dcache_mmu_fault(drsp, MmuErrorType::ReadDataIllegalAccess, dreq.addr);
                } else if let Some(word) = self.rsp_fifo_dcache.pop() {
                    if self.dcache_ll_rsp_count == 0 {
                        // first flit carries the registration key
                        self.llsc_key = word;
                        self.dcache_ll_rsp_count += 1;
                    } else {
                        if dreq.valid && dreq.addr == self.dcache_save_vaddr {
                            drsp.valid = true;
                            drsp.rdata = word;
                        }
                        self.dcache_fsm = DcacheState::Idle;
                    }
                }
            }

            DcacheState::ScWait => {
                if self.dcache_take_cc() {
                    return;
                }
                if self.rsp_data_error {
                    self.rsp_data_error = false;
                    self.dcache_mmu_fault(drsp, MmuErrorType::ReadDataIllegalAccess, dreq.addr);
                } else if let Some(word) = self.rsp_fifo_dcache.pop() {
                    drsp.valid = true;
                    drsp.rdata = word;
                    self.dcache_fsm = DcacheState::Idle;
                }
            }

            // ---- coherence sub-FSM ----
            DcacheState::CcCheck => {
                let words = self.dcache.words();
                let paddr = self.cc_receive_dcache_nline.base(words);

                if self.dcache_clack_req {
                    self.dcache.write_dir_state(
                        self.dcache_clack_way,
                        self.dcache_clack_set,
                        SlotState::Empty,
                    );
                    if self.dcache_miss_set == self.dcache_clack_set
                        && self.dcache_miss_way == self.dcache_clack_way
                    {
                        self.dcache_miss_clack = false;
                    }
                    self.dcache_clack_req = false;
                    self.dcache_fsm = self.dcache_fsm_cc_save;
                    return;
                }

                let in_miss = matches!(
                    self.dcache_fsm_cc_save,
                    DcacheState::MissSelect | DcacheState::MissWait | DcacheState::MissDirUpdt
                );
                if self.cc_receive_dcache_req
                    && in_miss
                    && self.dcache_vci_paddr.line_base(words) == paddr.line_base(words)
                {
                    self.dcache_miss_inval = true;
                    if self.cc_receive_dcache_kind == CcReqKind::Updt {
                        self.dcache_fsm = DcacheState::CcUpdt;
                        self.dcache_cc_word = self.cc_receive_word_idx;
                        self.dcache_cc_need_write = false;
                    } else {
                        self.cc_receive_dcache_req = false;
                        self.dcache_fsm = self.dcache_fsm_cc_save;
                    }
                    return;
                }

                let access = self.dcache.read_dir(paddr);
                self.dcache_cc_way = access.way;
                self.dcache_cc_set = access.set;
                if access.state == SlotState::Valid {
                    if self.cc_receive_dcache_kind == CcReqKind::Updt {
                        self.dcache_cc_need_write = true;
                        self.dcache_cc_word = self.cc_receive_word_idx;
                        self.dcache_fsm = DcacheState::CcUpdt;
                    } else {
                        self.dcache_fsm = DcacheState::CcInval;
                    }
                } else if self.cc_receive_dcache_kind == CcReqKind::Updt {
                    self.dcache_cc_word = self.cc_receive_word_idx;
                    self.dcache_cc_need_write = false;
                    self.dcache_fsm = DcacheState::CcUpdt;
                } else {
                    self.cc_receive_dcache_req = false;
                    self.dcache_fsm = self.dcache_fsm_cc_save;
                }
            }

            DcacheState::CcInval => {
                let way = self.dcache_cc_way;
                let set = self.dcache_cc_set;
                let slot = way * self.dcache.sets() + set;

                if self.in_tlb[slot] {
                    self.in_tlb[slot] = false;
                    self.dcache_tlb_inval_line = self.cc_receive_dcache_nline;
                    self.dcache_tlb_inval_set = 0;
                    self.dcache_fsm_scan_save = self.dcache_fsm;
                    self.dcache_fsm = DcacheState::InvalTlbScan;
                    return;
                }
                if self.contains_ptd[slot] {
                    self.itlb.reset();
                    self.dtlb.reset();
                    self.contains_ptd[slot] = false;
                }

                self.stats.cc_inval_data += 1;
                self.llsc_clear_on_match(self.cc_receive_dcache_nline);
                self.dcache.write_dir_state(way, set, SlotState::Zombi);
                self.cc_receive_dcache_req = false;
                self.dcache_cc_send_req = true;
                self.dcache_cc_send_nline = self.cc_receive_dcache_nline;
                self.dcache_cc_send_way = way;
                self.dcache_cc_send_kind = CcSendKind::Cleanup;
                self.dcache_fsm = self.dcache_fsm_cc_save;
            }

            DcacheState::CcUpdt => {
                let way = self.dcache_cc_way;
                let set = self.dcache_cc_set;
                let slot = way * self.dcache.sets() + set;

                if self.dcache_cc_need_write {
                    if self.in_tlb[slot] {
                        self.in_tlb[slot] = false;
                        self.dcache_tlb_inval_line = self.cc_receive_dcache_nline;
                        self.dcache_tlb_inval_set = 0;
                        self.dcache_fsm_scan_save = self.dcache_fsm;
                        self.dcache_fsm = DcacheState::InvalTlbScan;
                        return;
                    }
                    if self.contains_ptd[slot] {
                        self.itlb.reset();
                        self.dtlb.reset();
                        self.contains_ptd[slot] = false;
                    }
                }

                let Some(w) = self.cc_updt_fifo.pop() else {
                    return;
                };
                if self.dcache_cc_need_write {
                    self.stats.cc_updt_data += 1;
                    self.llsc_clear_on_match(self.cc_receive_dcache_nline);
                    self.dcache
                        .write(way, set, self.dcache_cc_word, w.data, w.be);
                    self.dcache_cc_word += 1;
                }
                if w.eop {
                    self.dcache_cc_need_write = false;
                    self.cc_receive_dcache_req = false;
                    self.dcache_cc_send_req = true;
                    self.dcache_cc_send_nline = self.cc_receive_dcache_nline;
                    self.dcache_cc_send_updt_idx = self.cc_receive_dcache_updt_idx;
                    self.dcache_cc_send_kind = CcSendKind::MultiAck;
                    self.dcache_fsm = self.dcache_fsm_cc_save;
                }
            }

            DcacheState::InvalTlbScan => {
                // both TLBs share the set count; all ways in parallel
                let set = self.dcache_tlb_inval_set;
                let line = self.dcache_tlb_inval_line;
                let _ = self.itlb.inval_by_nline(line, set % self.itlb.sets());
                let _ = self.dtlb.inval_by_nline(line, set % self.dtlb.sets());
                self.dcache_tlb_inval_set += 1;
                if self.dcache_tlb_inval_set >= self.itlb.sets().max(self.dtlb.sets()) {
                    self.stats.tlb_inval_scans += 1;
                    self.dcache_fsm = self.dcache_fsm_scan_save;
                }
            }
        }
    }

    /// DCACHE_IDLE: the two-stage P0/P1 pipeline and request dispatch.
    fn dcache_idle(&mut self, dreq: &DataRequest, drsp: &mut DataResponse, ports: &Ports<'_>) {
        let mut tlb_inval_required = false;
        let mut wbuf_write_miss = false;
        let mut updt_request = false;
        let mut wbuf_request = false;

        // P0: physical address computation, systematic dtlb access
        let mut paddr = PhysAddr(u64::from(dreq.addr.val()));
        let mut tlb_hit = None;
        if dreq.valid {
            if self.mmu_mode & mmu_mode::DATA_TLB == 0 {
                paddr = PhysAddr(paddr.val() | (u64::from(self.dcache_paddr_ext) << 32));
            } else {
                self.stats.dtlb_reads += 1;
                tlb_hit = self.dtlb.translate(dreq.addr);
                if let Some(hit) = tlb_hit {
                    paddr = hit.paddr;
                }
            }
        }

        // P0/P1: cache access, read and/or committed write
        let mut cache_access = None;
        if dreq.valid {
            cache_access = Some(if self.dcache_updt_req {
                self.dcache.read_dir(paddr)
            } else {
                self.dcache.read(paddr)
            });
        }
        if self.dcache_updt_req {
            self.dcache.write(
                self.dcache_save_cache_way,
                self.dcache_save_cache_set,
                self.dcache_save_cache_word,
                self.dcache_save_wdata,
                self.dcache_save_be,
            );
        }

        // the P1 cache update may require TLB housekeeping
        if self.dcache_updt_req {
            let way = self.dcache_save_cache_way;
            let set = self.dcache_save_cache_set;
            let slot = way * self.dcache.sets() + set;
            if self.in_tlb[slot] {
                tlb_inval_required = true;
                self.dcache_tlb_inval_set = 0;
                self.dcache_tlb_inval_line = self.dcache_save_paddr.nline(self.dcache.words());
                self.in_tlb[slot] = false;
            } else if self.contains_ptd[slot] {
                self.itlb.reset();
                self.dtlb.reset();
                self.contains_ptd[slot] = false;
            }
        }

        // P1: write buffer insertion
        if self.dcache_wbuf_req {
            self.stats.wbuf_writes += 1;
            let ok = self.wbuf.write(
                self.dcache_save_paddr,
                self.dcache_save_be,
                self.dcache_save_wdata,
            );
            if !ok {
                wbuf_write_miss = true;
            }
        }

        // next-state decision, fixed priority
        if tlb_inval_required {
            self.dcache_fsm_scan_save = DcacheState::Idle;
            self.dcache_fsm = DcacheState::InvalTlbScan;
        } else if self.dcache_clack_req {
            self.dcache_fsm_cc_save = DcacheState::Idle;
            self.dcache_fsm = DcacheState::CcCheck;
        } else if self.cc_receive_dcache_req && !self.dcache_cc_send_req {
            self.dcache_fsm_cc_save = DcacheState::Idle;
            self.dcache_fsm = DcacheState::CcCheck;
        } else if dreq.valid && !wbuf_write_miss {
            // register the request for the P1 stage
            self.dcache_save_vaddr = dreq.addr;
            self.dcache_save_be = dreq.be;
            self.dcache_save_wdata = dreq.wdata;
            self.dcache_save_paddr = paddr;
            if let Some(access) = cache_access {
                self.dcache_save_cache_way = access.way;
                self.dcache_save_cache_set = access.set;
                self.dcache_save_cache_word = access.word;
            }

            match dreq.op {
                DataOp::XtnRead => self.dcache_xtn_read(dreq, drsp),
                DataOp::XtnWrite => self.dcache_xtn_write(dreq, drsp),
                _ => {
                    let (valid_req, cacheable) = self.dcache_mmu_check(
                        dreq,
                        drsp,
                        tlb_hit.map(|h| h.flags),
                        ports,
                        paddr,
                    );
                    if valid_req {
                        let (wb, upd) = self.dcache_dispatch(
                            dreq,
                            drsp,
                            cacheable,
                            tlb_hit.map(|h| (h.flags, h.nline)),
                            cache_access,
                            paddr,
                        );
                        wbuf_request = wb;
                        updt_request = upd;
                    }
                }
            }
        } else if self.icache_tlb_miss_req && !wbuf_write_miss {
            self.dcache_tlb_ins = true;
            self.dcache_tlb_vaddr = self.icache_vaddr_save;
            self.dcache_fsm = DcacheState::TlbMiss;
        }

        self.dcache_updt_req = updt_request;
        self.dcache_wbuf_req = wbuf_request || (self.dcache_wbuf_req && wbuf_write_miss);
    }

    /// XTN register reads, executed in IDLE.
    fn dcache_xtn_read(&mut self, dreq: &DataRequest, drsp: &mut DataResponse) {
        if dreq.mode == Mode::User {
            self.dcache_mmu_fault(drsp, MmuErrorType::ReadPrivilegeViolation, dreq.addr);
            return;
        }
        let Some(op) = XtnOp::from_addr(dreq.addr.val()) else {
            self.dcache_mmu_fault(drsp, MmuErrorType::ReadUndefinedXtn, dreq.addr);
            return;
        };
        drsp.valid = true;
        drsp.rdata = match op {
            XtnOp::InsErrorType => self.mmu_ietr.code(),
            XtnOp::DataErrorType => self.mmu_detr.code(),
            XtnOp::InsBadVaddr => self.mmu_ibvar,
            XtnOp::DataBadVaddr => self.mmu_dbvar,
            XtnOp::Ptpr => self.mmu_ptpr,
            XtnOp::TlbMode => self.mmu_mode,
            XtnOp::MmuWordLo => self.mmu_word_lo,
            XtnOp::MmuWordHi => self.mmu_word_hi,
            XtnOp::DataPaddrExt => self.dcache_paddr_ext,
            XtnOp::InstPaddrExt => self.icache_paddr_ext,
            _ => {
                drsp.valid = true;
                drsp.error = true;
                self.mmu_detr = MmuErrorType::ReadUndefinedXtn;
                self.mmu_dbvar = dreq.addr.val();
                0
            }
        };
    }

    /// XTN operation dispatch, executed in IDLE.
    fn dcache_xtn_write(&mut self, dreq: &DataRequest, drsp: &mut DataResponse) {
        let Some(op) = XtnOp::from_addr(dreq.addr.val()) else {
            self.dcache_mmu_fault(drsp, MmuErrorType::WriteUndefinedXtn, dreq.addr);
            return;
        };
        if dreq.mode == Mode::User && !op.user_allowed() {
            self.dcache_mmu_fault(drsp, MmuErrorType::WritePrivilegeViolation, dreq.addr);
            return;
        }
        self.dcache_xtn_opcode = op;
        match op {
            XtnOp::Ptpr => {
                self.mmu_ptpr = dreq.wdata;
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnSwitch;
            }
            XtnOp::TlbMode => {
                self.mmu_mode = dreq.wdata;
                drsp.valid = true;
            }
            XtnOp::DtlbInval => self.dcache_fsm = DcacheState::XtnDtInval,
            XtnOp::ItlbInval => {
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnItInval;
            }
            XtnOp::DcacheInval => self.dcache_fsm = DcacheState::XtnDcInvalVa,
            XtnOp::DcacheInvalPa => {
                let pa = (u64::from(self.mmu_word_hi) << 32) | u64::from(self.mmu_word_lo);
                self.dcache_save_paddr = PhysAddr(pa);
                self.dcache_fsm = DcacheState::XtnDcInvalPa;
            }
            XtnOp::DcacheFlush => {
                self.dcache_flush_count = 0;
                self.dcache_fsm = DcacheState::XtnDcFlush;
            }
            XtnOp::IcacheInval => {
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnIcInvalVa;
            }
            XtnOp::IcacheInvalPa => {
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnIcInvalPa;
            }
            XtnOp::IcacheFlush => {
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnIcFlush;
            }
            XtnOp::Sync => self.dcache_fsm = DcacheState::XtnSync,
            XtnOp::MmuWordLo => {
                self.mmu_word_lo = dreq.wdata;
                drsp.valid = true;
            }
            XtnOp::MmuWordHi => {
                self.mmu_word_hi = dreq.wdata;
                drsp.valid = true;
            }
            XtnOp::LlReset => {
                self.llsc_valid = false;
                drsp.valid = true;
            }
            XtnOp::DataPaddrExt => {
                self.dcache_paddr_ext = dreq.wdata;
                drsp.valid = true;
            }
            XtnOp::InstPaddrExt => {
                self.dcache_xtn_req = true;
                self.dcache_fsm = DcacheState::XtnIcPaddrExt;
            }
            _ => {
                self.dcache_mmu_fault(drsp, MmuErrorType::WriteUndefinedXtn, dreq.addr);
            }
        }
    }

    /// MMU validity/cacheability check for address-space accesses.
    /// Returns `(valid_request, cacheable)`.
    fn dcache_mmu_check(
        &mut self,
        dreq: &DataRequest,
        drsp: &mut DataResponse,
        flags: Option<PteFlags>,
        ports: &Ports<'_>,
        paddr: PhysAddr,
    ) -> (bool, bool) {
        if self.mmu_mode & mmu_mode::DATA_TLB == 0 {
            let cacheable =
                self.mmu_mode & mmu_mode::DATA_CACHE != 0 && ports.map.is_cacheable(paddr);
            return (true, cacheable);
        }
        match flags {
            Some(flags) => {
                let cacheable = self.mmu_mode & mmu_mode::DATA_CACHE != 0 && flags.c;
                if !flags.u && dreq.mode == Mode::User {
                    let code = if is_write_op(dreq) {
                        MmuErrorType::WritePrivilegeViolation
                    } else {
                        MmuErrorType::ReadPrivilegeViolation
                    };
                    self.dcache_mmu_fault(drsp, code, dreq.addr);
                    (false, cacheable)
                } else if !flags.w && is_write_op(dreq) {
                    self.dcache_mmu_fault(drsp, MmuErrorType::WriteAccessViolation, dreq.addr);
                    (false, cacheable)
                } else {
                    (true, cacheable)
                }
            }
            None => {
                self.stats.dtlb_misses += 1;
                self.dcache_tlb_vaddr = dreq.addr;
                self.dcache_tlb_ins = false;
                self.dcache_fsm = DcacheState::TlbMiss;
                (false, false)
            }
        }
    }

    /// READ/WRITE/LL/SC dispatch once the MMU check passed.
    /// Returns `(wbuf_request, updt_request)` for the P1 stage.
    fn dcache_dispatch(
        &mut self,
        dreq: &DataRequest,
        drsp: &mut DataResponse,
        cacheable: bool,
        tlb: Option<(PteFlags, NLine)>,
        cache_access: Option<super::cache::CacheAccess>,
        paddr: PhysAddr,
    ) -> (bool, bool) {
        let line_bytes = (self.dcache.words() << 2) as u64;
        match dreq.op {
            DataOp::Read => {
                // reads are delayed while a cache update is pending
                if self.dcache_updt_req {
                    return (false, false);
                }
                if cacheable {
                    match cache_access.map(|a| a.state) {
                        Some(SlotState::Valid) => {
                            self.stats.data_reads += 1;
                            drsp.valid = true;
                            drsp.rdata = cache_access.map_or(0, |a| a.rdata);
                        }
                        Some(SlotState::Zombi) => {} // wait for the clack
                        _ => {
                            self.stats.data_misses += 1;
                            self.dcache_vci_paddr = paddr;
                            self.dcache_vci_miss_req = true;
                            self.dcache_miss_kind = MissKind::Proc;
                            self.dcache_fsm = DcacheState::MissSelect;
                        }
                    }
                } else {
                    self.stats.data_unc_reads += 1;
                    self.dcache_vci_paddr = paddr;
                    self.dcache_vci_unc_be = dreq.be;
                    self.dcache_vci_unc_write = false;
                    self.dcache_vci_unc_req = true;
                    self.dcache_fsm = DcacheState::UncWait;
                }
                (false, false)
            }

            DataOp::Ll => {
                self.stats.ll_ops += 1;
                self.llsc_paddr = paddr;
                self.llsc_count = self.llsc_timeout;
                self.llsc_valid = true;
                self.dcache_vci_ll_req = true;
                self.dcache_vci_paddr = paddr;
                self.dcache_ll_rsp_count = 0;
                self.dcache_fsm = DcacheState::LlWait;
                (false, false)
            }

            DataOp::Write => {
                if let Some((flags, nline)) = tlb {
                    if !flags.d {
                        // the dirty bit must be set before the write
                        self.dcache_dirty_paddr = dirty_pte_paddr(flags, nline, dreq.addr, line_bytes);
                        self.dcache_fsm = DcacheState::DirtyGetPte;
                        return (false, false);
                    }
                }
                self.stats.data_writes += 1;
                if self.llsc_valid && self.llsc_paddr == paddr {
                    self.llsc_valid = false;
                }
                if cacheable {
                    drsp.valid = true;
                    let updt = cache_access.map(|a| a.state) == Some(SlotState::Valid);
                    (true, updt)
                } else {
                    self.stats.data_unc_writes += 1;
                    self.dcache_vci_paddr = paddr;
                    self.dcache_vci_wdata = dreq.wdata;
                    self.dcache_vci_unc_write = true;
                    self.dcache_vci_unc_be = dreq.be;
                    self.dcache_vci_unc_req = true;
                    self.dcache_fsm = DcacheState::UncWait;
                    (false, false)
                }
            }

            DataOp::Sc => {
                if let Some((flags, nline)) = tlb {
                    if !flags.d {
                        self.dcache_dirty_paddr = dirty_pte_paddr(flags, nline, dreq.addr, line_bytes);
                        self.dcache_fsm = DcacheState::DirtyGetPte;
                        return (false, false);
                    }
                }
                self.stats.sc_ops += 1;
                if self.llsc_valid && self.llsc_paddr == paddr {
                    // reservation is consumed by the attempt
                    self.llsc_valid = false;
                    self.dcache_vci_paddr = paddr;
                    self.dcache_vci_sc_req = true;
                    self.dcache_vci_sc_data = dreq.wdata;
                    self.dcache_fsm = DcacheState::ScWait;
                } else {
                    drsp.valid = true;
                    drsp.rdata = 0x1;
                }
                (false, false)
            }

            DataOp::XtnRead | DataOp::XtnWrite => (false, false),
        }
    }
}

/// `true` for operations that fault as writes.
fn is_write_op(dreq: &DataRequest) -> bool {
    matches!(dreq.op, DataOp::Write | DataOp::Sc)
}

/// Physical address of the PTE word holding the dirty bit.
fn dirty_pte_paddr(flags: PteFlags, nline: NLine, vaddr: VirtAddr, line_bytes: u64) -> PhysAddr {
    if flags.b {
        // PTE1: word index from vaddr bits [31:21]
        PhysAddr((nline.val() * line_bytes) | u64::from((vaddr.val() >> 19) & 0x3C))
    } else {
        // PTE2: 8-byte stride, word index from vaddr bits [20:12]
        PhysAddr((nline.val() * line_bytes) | u64::from((vaddr.val() >> 9) & 0x38))
    }
}
