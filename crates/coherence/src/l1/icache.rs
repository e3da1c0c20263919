//! Instruction cache FSM.
//!
//! Serves processor fetches, performs line refills through the direct
//! network, executes XTN maintenance operations forwarded by the DCACHE
//! FSM, and services coherence requests (update, invalidate, cleanup
//! acknowledge) on instruction lines.
//!
//! Priority order in every waiting state: CLACK, then coherence request,
//! then the state's own work. A coherence request is not taken while this
//! cache's CC_SEND request flip-flop is set, so CC_CHECK can always post a
//! cleanup or acknowledgement.

use tracing::trace;

use super::cache::SlotState;
use super::cc::{CcReqKind, CcSendKind};
use super::{mmu_mode, L1Wrapper};
use crate::common::{MmuErrorType, PhysAddr, VirtAddr};
use crate::proc::{InstructionRequest, InstructionResponse, Mode, XtnOp};
use crate::sim::ports::Ports;

/// ICACHE FSM states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IcacheState {
    /// Serve fetches; entry point for all other activities.
    #[default]
    Idle,
    /// XTN: flush all non-global I-TLB entries (PTPR switch).
    XtnTlbFlush,
    /// XTN: walk all cache slots, sending cleanups for valid lines.
    XtnCacheFlush,
    /// XTN: switch the selected slot to ZOMBI during a flush.
    XtnCacheFlushGo,
    /// XTN: invalidate one I-TLB entry by virtual address.
    XtnTlbInval,
    /// XTN: selective line invalidate by virtual address.
    XtnCacheInvalVa,
    /// XTN: selective line invalidate by physical address.
    XtnCacheInvalPa,
    /// XTN: switch the selected slot to ZOMBI for an invalidate.
    XtnCacheInvalGo,
    /// Instruction TLB miss being served by the DCACHE FSM.
    TlbWait,
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
    /// Wait for an uncacheable fetch response.
    UncWait,
    /// Entry point of the coherence sub-FSM.
    CcCheck,
    /// Coherence invalidate hit: switch slot to ZOMBI, send cleanup.
    CcInval,
    /// Coherence update hit: write one word per cycle, then acknowledge.
    CcUpdt,
}

impl IcacheState {
    /// State name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "ICACHE_IDLE",
            Self::XtnTlbFlush => "ICACHE_XTN_TLB_FLUSH",
            Self::XtnCacheFlush => "ICACHE_XTN_CACHE_FLUSH",
            Self::XtnCacheFlushGo => "ICACHE_XTN_CACHE_FLUSH_GO",
            Self::XtnTlbInval => "ICACHE_XTN_TLB_INVAL",
            Self::XtnCacheInvalVa => "ICACHE_XTN_CACHE_INVAL_VA",
            Self::XtnCacheInvalPa => "ICACHE_XTN_CACHE_INVAL_PA",
            Self::XtnCacheInvalGo => "ICACHE_XTN_CACHE_INVAL_GO",
            Self::TlbWait => "ICACHE_TLB_WAIT",
            Self::MissSelect => "ICACHE_MISS_SELECT",
            Self::MissClean => "ICACHE_MISS_CLEAN",
            Self::MissWait => "ICACHE_MISS_WAIT",
            Self::MissDataUpdt => "ICACHE_MISS_DATA_UPDT",
            Self::MissDirUpdt => "ICACHE_MISS_DIR_UPDT",
            Self::UncWait => "ICACHE_UNC_WAIT",
            Self::CcCheck => "ICACHE_CC_CHECK",
            Self::CcInval => "ICACHE_CC_INVAL",
            Self::CcUpdt => "ICACHE_CC_UPDT",
        }
    }
}

impl L1Wrapper {
    /// Takes the pending coherence interrupt if one is deliverable.
    /// Returns `true` when the FSM switched to `CcCheck`.
    fn icache_take_cc(&mut self) -> bool {
        if self.icache_clack_req {
            self.icache_fsm_save = self.icache_fsm;
            self.icache_fsm = IcacheState::CcCheck;
            return true;
        }
        if self.cc_receive_icache_req && !self.icache_cc_send_req {
            self.icache_fsm_save = self.icache_fsm;
            self.icache_fsm = IcacheState::CcCheck;
            return true;
        }
        false
    }

    /// Posts the buffered cleanup-victim request when the CC_SEND port
    /// frees up (MISS_WAIT / MISS_DIR_UPDT duty).
    fn icache_flush_cleanup_victim(&mut self) {
        if self.icache_cleanup_victim_req && !self.icache_cc_send_req {
            self.icache_cc_send_req = true;
            self.icache_cc_send_nline = self.icache_cleanup_victim_nline;
            self.icache_cc_send_way = self.icache_miss_way;
            self.icache_cc_send_kind = CcSendKind::Cleanup;
            self.icache_cleanup_victim_req = false;
        }
    }

    /// One cycle of the ICACHE FSM.
    pub(crate) fn icache_fsm_step(
        &mut self,
        ireq: &InstructionRequest,
        irsp: &mut InstructionResponse,
        ports: &Ports<'_>,
    ) {
        match self.icache_fsm {
            IcacheState::Idle => {
                if self.icache_take_cc() {
                    return;
                }

                // XTN requests forwarded by the DCACHE FSM have priority
                // over the fetch
                if self.dcache_xtn_req {
                    match self.dcache_xtn_opcode {
                        XtnOp::Ptpr => self.icache_fsm = IcacheState::XtnTlbFlush,
                        XtnOp::IcacheFlush => {
                            self.icache_flush_count = 0;
                            self.icache_fsm = IcacheState::XtnCacheFlush;
                        }
                        XtnOp::ItlbInval => self.icache_fsm = IcacheState::XtnTlbInval,
                        XtnOp::IcacheInval => self.icache_fsm = IcacheState::XtnCacheInvalVa,
                        XtnOp::IcacheInvalPa => {
                            let pa = (u64::from(self.mmu_word_hi) << 32)
                                | u64::from(self.mmu_word_lo);
                            self.icache_vci_paddr = PhysAddr(pa);
                            self.icache_fsm = IcacheState::XtnCacheInvalPa;
                        }
                        XtnOp::InstPaddrExt => {
                            self.icache_paddr_ext = self.dcache_save_wdata;
                            self.dcache_xtn_req = false;
                        }
                        _ => {
                            // undefined request for this FSM; drop it
                            self.dcache_xtn_req = false;
                        }
                    }
                    return;
                }

                if !ireq.valid {
                    return;
                }
                self.icache_vaddr_save = ireq.addr;
                let mut paddr = PhysAddr(
                    u64::from(ireq.addr.val()) | (u64::from(self.icache_paddr_ext) << 32),
                );

                // systematic itlb access when activated
                let mut tlb_flags = None;
                if self.mmu_mode & mmu_mode::INS_TLB != 0 {
                    self.stats.itlb_reads += 1;
                    match self.itlb.translate(ireq.addr) {
                        Some(hit) => {
                            paddr = hit.paddr;
                            tlb_flags = Some(hit.flags);
                        }
                        None => {
                            self.stats.itlb_misses += 1;
                            self.icache_tlb_miss_req = true;
                            self.icache_fsm = IcacheState::TlbWait;
                            return;
                        }
                    }
                }

                // cacheability and access rights
                let cacheable = if self.mmu_mode & mmu_mode::INS_CACHE == 0 {
                    false
                } else if let Some(flags) = tlb_flags {
                    flags.c
                } else {
                    ports.map.is_cacheable(paddr)
                };
                if let Some(flags) = tlb_flags {
                    if !flags.u && ireq.mode == Mode::User {
                        self.mmu_ietr = MmuErrorType::ReadPrivilegeViolation;
                        self.mmu_ibvar = ireq.addr.val();
                        irsp.valid = true;
                        irsp.error = true;
                        return;
                    }
                    if !flags.x {
                        self.mmu_ietr = MmuErrorType::ReadExecViolation;
                        self.mmu_ibvar = ireq.addr.val();
                        irsp.valid = true;
                        irsp.error = true;
                        return;
                    }
                }

                self.icache_vci_paddr = paddr;
                if cacheable {
                    let access = self.icache.read(paddr);
                    match access.state {
                        SlotState::Empty => {
                            self.stats.ins_misses += 1;
                            self.icache_miss_req = true;
                            self.icache_fsm = IcacheState::MissSelect;
                        }
                        // pending cleanup: stall until acknowledged
                        SlotState::Zombi => {}
                        SlotState::Valid => {
                            self.stats.ins_reads += 1;
                            irsp.valid = true;
                            irsp.instruction = access.rdata;
                        }
                    }
                } else {
                    self.stats.ins_unc_reads += 1;
                    self.icache_unc_req = true;
                    self.icache_fsm = IcacheState::UncWait;
                }
            }

            IcacheState::TlbWait => {
                if self.icache_take_cc() {
                    return;
                }
                // the DCACHE FSM signals completion by resetting the
                // request flip-flop
                if !self.icache_tlb_miss_req {
                    if self.icache_tlb_rsp_error {
                        self.icache_tlb_rsp_error = false;
                        irsp.valid = true;
                        irsp.error = true;
                    }
                    self.icache_fsm = IcacheState::Idle;
                }
            }

            IcacheState::XtnTlbFlush => {
                self.itlb.flush();
                self.dcache_xtn_req = false;
                self.icache_fsm = IcacheState::Idle;
            }

            IcacheState::XtnCacheFlush => {
                if self.icache_take_cc() {
                    return;
                }
                // blocked until the previous cc_send request is gone
                if self.icache_cc_send_req {
                    return;
                }
                let sets = self.icache.sets();
                let total = sets * self.icache.ways();
                if self.icache_flush_count == total {
                    self.dcache_xtn_req = false;
                    self.icache_fsm = IcacheState::Idle;
                    return;
                }
                let way = self.icache_flush_count / sets;
                let set = self.icache_flush_count % sets;
                if self.icache.slot_state(way, set) == SlotState::Valid {
                    self.icache_cc_send_req = true;
                    self.icache_cc_send_nline = self.icache.slot_nline(way, set);
                    self.icache_cc_send_way = way;
                    self.icache_cc_send_kind = CcSendKind::Cleanup;
                    self.icache_miss_way = way;
                    self.icache_miss_set = set;
                    self.icache_fsm = IcacheState::XtnCacheFlushGo;
                } else {
                    self.icache_flush_count += 1;
                }
            }

            IcacheState::XtnCacheFlushGo => {
                self.icache
                    .write_dir_state(self.icache_miss_way, self.icache_miss_set, SlotState::Zombi);
                self.icache_flush_count += 1;
                self.icache_fsm = IcacheState::XtnCacheFlush;
            }

            IcacheState::XtnTlbInval => {
                // the operand travels in the XTN write data
                self.itlb.inval(VirtAddr(self.dcache_save_wdata));
                self.dcache_xtn_req = false;
                self.icache_fsm = IcacheState::Idle;
            }

            IcacheState::XtnCacheInvalVa => {
                // translate through the itlb when it is on; an itlb miss
                // is resolved by the DCACHE FSM before retrying
                let vaddr = VirtAddr(self.dcache_save_wdata);
                if self.mmu_mode & mmu_mode::INS_TLB != 0 {
                    match self.itlb.translate(vaddr) {
                        Some(hit) => {
                            self.icache_vci_paddr = hit.paddr;
                            self.icache_fsm = IcacheState::XtnCacheInvalPa;
                        }
                        None => {
                            if self.icache_tlb_rsp_error {
                                // unmapped: nothing to invalidate
                                self.icache_tlb_rsp_error = false;
                                self.dcache_xtn_req = false;
                                self.icache_fsm = IcacheState::Idle;
                            } else if !self.icache_tlb_miss_req {
                                self.icache_vaddr_save = vaddr;
                                self.icache_tlb_miss_req = true;
                            }
                        }
                    }
                } else {
                    self.icache_vci_paddr = PhysAddr(u64::from(vaddr.val()));
                    self.icache_fsm = IcacheState::XtnCacheInvalPa;
                }
            }

            IcacheState::XtnCacheInvalPa => {
                let access = self.icache.read_dir(self.icache_vci_paddr);
                if access.state == SlotState::Valid && !self.icache_cc_send_req {
                    self.icache_miss_way = access.way;
                    self.icache_miss_set = access.set;
                    self.icache_cc_send_req = true;
                    self.icache_cc_send_nline =
                        self.icache_vci_paddr.nline(self.icache.words());
                    self.icache_cc_send_way = access.way;
                    self.icache_cc_send_kind = CcSendKind::Cleanup;
                    self.icache_fsm = IcacheState::XtnCacheInvalGo;
                } else if access.state != SlotState::Valid {
                    self.dcache_xtn_req = false;
                    self.icache_fsm = IcacheState::Idle;
                }
            }

            IcacheState::XtnCacheInvalGo => {
                self.icache
                    .write_dir_state(self.icache_miss_way, self.icache_miss_set, SlotState::Zombi);
                self.dcache_xtn_req = false;
                self.icache_fsm = IcacheState::Idle;
            }

            IcacheState::MissSelect => {
                if self.icache_take_cc() {
                    return;
                }
                let Some(victim) = self.icache.read_select(self.icache_vci_paddr) else {
                    // all slots in transition: wait
                    return;
                };
                self.icache_miss_way = victim.way;
                self.icache_miss_set = victim.set;
                if victim.cleanup {
                    if self.icache_cc_send_req {
                        // single buffered cleanup request
                        self.icache_cleanup_victim_req = true;
                        self.icache_cleanup_victim_nline = victim.victim;
                    } else {
                        self.icache_cc_send_req = true;
                        self.icache_cc_send_nline = victim.victim;
                        self.icache_cc_send_way = victim.way;
                        self.icache_cc_send_kind = CcSendKind::Cleanup;
                    }
                    self.icache_miss_clack = true;
                    self.icache_fsm = IcacheState::MissClean;
                } else {
                    self.icache_fsm = IcacheState::MissWait;
                }
                trace!(
                    way = victim.way,
                    set = victim.set,
                    cleanup = victim.cleanup,
                    "icache miss select"
                );
            }

            IcacheState::MissClean => {
                self.icache
                    .write_dir_state(self.icache_miss_way, self.icache_miss_set, SlotState::Zombi);
                self.icache_fsm = IcacheState::MissWait;
            }

            IcacheState::MissWait => {
                self.icache_flush_cleanup_victim();
                if self.icache_clack_req {
                    self.icache_fsm_save = self.icache_fsm;
                    self.icache_fsm = IcacheState::CcCheck;
                    return;
                }
                if self.cc_receive_icache_req
                    && !self.icache_cc_send_req
                    && !self.icache_cleanup_victim_req
                {
                    self.icache_fsm_save = self.icache_fsm;
                    self.icache_fsm = IcacheState::CcCheck;
                    return;
                }
                if self.rsp_ins_error {
                    self.mmu_ietr = MmuErrorType::ReadDataIllegalAccess;
                    self.mmu_ibvar = self.icache_vaddr_save.val();
                    irsp.valid = true;
                    irsp.error = true;
                    self.rsp_ins_error = false;
                    self.icache_fsm = IcacheState::Idle;
                } else if self.rsp_fifo_icache.rok() {
                    self.icache_miss_word = 0;
                    self.icache_fsm = IcacheState::MissDataUpdt;
                }
            }

            IcacheState::MissDataUpdt => {
                if let Some(word) = self.rsp_fifo_icache.pop() {
                    self.icache.write(
                        self.icache_miss_way,
                        self.icache_miss_set,
                        self.icache_miss_word,
                        word,
                        0xF,
                    );
                    self.icache_miss_word += 1;
                    if self.icache_miss_word == self.icache.words() {
                        self.icache_fsm = IcacheState::MissDirUpdt;
                    }
                }
            }

            IcacheState::MissDirUpdt => {
                self.icache_flush_cleanup_victim();
                if self.icache_clack_req {
                    self.icache_fsm_save = self.icache_fsm;
                    self.icache_fsm = IcacheState::CcCheck;
                    return;
                }
                if self.cc_receive_icache_req
                    && !self.icache_cc_send_req
                    && !self.icache_cleanup_victim_req
                {
                    self.icache_fsm_save = self.icache_fsm;
                    self.icache_fsm = IcacheState::CcCheck;
                    return;
                }
                // stalled while the victim cleanup is unacknowledged
                if self.icache_miss_clack {
                    return;
                }
                if self.icache_miss_inval {
                    // raced by a coherence request: install in ZOMBI and
                    // send a fresh cleanup, never VALID
                    if self.icache_cc_send_req {
                        return;
                    }
                    self.icache_miss_inval = false;
                    self.icache_cc_send_req = true;
                    self.icache_cc_send_nline = self.icache_vci_paddr.nline(self.icache.words());
                    self.icache_cc_send_way = self.icache_miss_way;
                    self.icache_cc_send_kind = CcSendKind::Cleanup;
                    self.icache.write_dir(
                        self.icache_vci_paddr,
                        self.icache_miss_way,
                        self.icache_miss_set,
                        SlotState::Zombi,
                    );
                } else {
                    self.icache.write_dir(
                        self.icache_vci_paddr,
                        self.icache_miss_way,
                        self.icache_miss_set,
                        SlotState::Valid,
                    );
                }
                self.icache_fsm = IcacheState::Idle;
            }

            IcacheState::UncWait => {
                if self.icache_take_cc() {
                    return;
                }
                if self.rsp_ins_error {
                    self.mmu_ietr = MmuErrorType::ReadDataIllegalAccess;
                    self.mmu_ibvar = ireq.addr.val();
                    self.rsp_ins_error = false;
                    irsp.valid = true;
                    irsp.error = true;
                    self.icache_fsm = IcacheState::Idle;
                } else if let Some(word) = self.rsp_fifo_icache.pop() {
                    self.icache_fsm = IcacheState::Idle;
                    // deliver only if the processor still asks for the
                    // same address
                    if ireq.valid && ireq.addr == self.icache_vaddr_save {
                        irsp.valid = true;
                        irsp.instruction = word;
                    }
                }
            }

            IcacheState::CcCheck => {
                let paddr = self.cc_receive_icache_nline.base(self.icache.words());

                // CLACK handler: release the ZOMBI slot
                if self.icache_clack_req {
                    self.icache.write_dir_state(
                        self.icache_clack_way,
                        self.icache_clack_set,
                        SlotState::Empty,
                    );
                    if self.icache_miss_set == self.icache_clack_set
                        && self.icache_miss_way == self.icache_clack_way
                    {
                        self.icache_miss_clack = false;
                    }
                    self.icache_clack_req = false;
                    self.icache_fsm = self.icache_fsm_save;
                    return;
                }

                // match between the pending miss and the coherence request
                let in_miss = matches!(
                    self.icache_fsm_save,
                    IcacheState::MissSelect | IcacheState::MissWait | IcacheState::MissDirUpdt
                );
                if self.cc_receive_icache_req
                    && in_miss
                    && self.icache_vci_paddr.line_base(self.icache.words())
                        == paddr.line_base(self.icache.words())
                {
                    self.icache_miss_inval = true;
                    if self.cc_receive_icache_kind == CcReqKind::Updt {
                        // drain the update data without writing the cache
                        self.icache_fsm = IcacheState::CcUpdt;
                        self.icache_cc_word = self.cc_receive_word_idx;
                        self.icache_cc_need_write = false;
                    } else {
                        self.cc_receive_icache_req = false;
                        self.icache_fsm = self.icache_fsm_save;
                    }
                    return;
                }

                let access = self.icache.read_dir(paddr);
                self.icache_cc_way = access.way;
                self.icache_cc_set = access.set;
                if access.state == SlotState::Valid {
                    if self.cc_receive_icache_kind == CcReqKind::Updt {
                        self.icache_cc_need_write = true;
                        self.icache_cc_word = self.cc_receive_word_idx;
                        self.icache_fsm = IcacheState::CcUpdt;
                    } else {
                        self.icache_fsm = IcacheState::CcInval;
                    }
                } else if self.cc_receive_icache_kind == CcReqKind::Updt {
                    // miss: acknowledgement still required, data discarded
                    self.icache_cc_word = self.cc_receive_word_idx;
                    self.icache_cc_need_write = false;
                    self.icache_fsm = IcacheState::CcUpdt;
                } else {
                    self.cc_receive_icache_req = false;
                    self.icache_fsm = self.icache_fsm_save;
                }
            }

            IcacheState::CcInval => {
                self.stats.cc_inval_ins += 1;
                self.icache
                    .write_dir_state(self.icache_cc_way, self.icache_cc_set, SlotState::Zombi);
                self.cc_receive_icache_req = false;
                self.icache_cc_send_req = true;
                self.icache_cc_send_nline = self.cc_receive_icache_nline;
                self.icache_cc_send_way = self.icache_cc_way;
                self.icache_cc_send_kind = CcSendKind::Cleanup;
                self.icache_fsm = self.icache_fsm_save;
            }

            IcacheState::CcUpdt => {
                let Some(w) = self.cc_updt_fifo.pop() else {
                    return;
                };
                if self.icache_cc_need_write {
                    self.stats.cc_updt_ins += 1;
                    self.icache.write(
                        self.icache_cc_way,
                        self.icache_cc_set,
                        self.icache_cc_word,
                        w.data,
                        w.be,
                    );
                    self.icache_cc_word += 1;
                }
                if w.eop {
                    self.icache_cc_need_write = false;
                    self.cc_receive_icache_req = false;
                    self.icache_cc_send_req = true;
                    self.icache_cc_send_nline = self.cc_receive_icache_nline;
                    self.icache_cc_send_updt_idx = self.cc_receive_icache_updt_idx;
                    self.icache_cc_send_kind = CcSendKind::MultiAck;
                    self.icache_fsm = self.icache_fsm_save;
                }
            }
        }
    }
}
