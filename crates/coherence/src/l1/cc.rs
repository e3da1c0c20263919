//! Processor-side coherence FSMs.
//!
//! 1. **CC_SEND** serializes cleanups (two flits) and multicast
//!    acknowledgements (one flit) on the P2M channel, with a round-robin
//!    between the two cache clients.
//! 2. **CC_RECEIVE** decodes M2P packets (multicast update/invalidate,
//!    broadcast invalidate) into per-cache requests and the shared
//!    update-data FIFO.
//! 3. **CLACK interface**: single-flit cleanup acknowledgements, handed
//!    to the owning cache FSM with back-pressure. This channel is
//!    independent, so it can never be blocked by direct or M2P traffic.

use super::L1Wrapper;
use crate::common::NLine;
use crate::noc::dhccp::{self, clack_type, m2p_type, p2m_type, FlitField};
use crate::sim::ports::Ports;

/// What a cache FSM asks CC_SEND to emit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CcSendKind {
    /// Two-flit CLEANUP.
    #[default]
    Cleanup,
    /// One-flit MULTI_ACK.
    MultiAck,
}

/// CC_SEND FSM states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CcSendState {
    /// Arbitrate between the icache and dcache requests.
    #[default]
    Idle,
    /// Emit the first CLEANUP flit.
    Cleanup1,
    /// Emit the second CLEANUP flit.
    Cleanup2,
    /// Emit the MULTI_ACK flit.
    MultiAck,
}

/// Kind of an incoming coherence request after decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CcReqKind {
    /// Invalidate (multicast or broadcast).
    #[default]
    Inval,
    /// Multicast update.
    Updt,
}

/// CC_RECEIVE FSM states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CcReceiveState {
    /// Classify the head flit.
    #[default]
    Idle,
    /// Consume a broadcast header.
    BrdcastHeader,
    /// Deliver a broadcast nline to both caches.
    BrdcastNline,
    /// Consume an instruction-invalidate header.
    InsInvalHeader,
    /// Deliver an instruction-invalidate nline.
    InsInvalNline,
    /// Consume a data-invalidate header.
    DataInvalHeader,
    /// Deliver a data-invalidate nline.
    DataInvalNline,
    /// Consume an instruction-update header (update table index).
    InsUpdtHeader,
    /// Deliver an instruction-update nline and word index.
    InsUpdtNline,
    /// Stream instruction-update data words into the FIFO.
    InsUpdtData,
    /// Consume a data-update header (update table index).
    DataUpdtHeader,
    /// Deliver a data-update nline and word index.
    DataUpdtNline,
    /// Stream data-update data words into the FIFO.
    DataUpdtData,
}

/// One word of a multicast update, as queued for the cache FSMs.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdtWord {
    /// Byte enables.
    pub be: u8,
    /// Data word.
    pub data: u32,
    /// Last word of the update.
    pub eop: bool,
}

impl L1Wrapper {
    /// One cycle of the CC_SEND FSM.
    pub(crate) fn cc_send_fsm_step(&mut self, ports: &mut Ports<'_>) {
        match self.cc_send_fsm {
            CcSendState::Idle => {
                // round-robin: give the other client a turn first
                let mut icache_turn = self.cc_send_last_client_icache;
                if self.cc_send_last_client_icache {
                    if self.dcache_cc_send_req {
                        icache_turn = false;
                    }
                } else if self.icache_cc_send_req {
                    icache_turn = true;
                }
                self.cc_send_last_client_icache = icache_turn;

                if !(self.dcache_cc_send_req || self.icache_cc_send_req) {
                    return;
                }
                let kind = if icache_turn {
                    self.icache_cc_send_kind
                } else {
                    self.dcache_cc_send_kind
                };
                self.cc_send_flits.clear();
                self.cc_send_fsm = match kind {
                    CcSendKind::Cleanup => CcSendState::Cleanup1,
                    CcSendKind::MultiAck => CcSendState::MultiAck,
                };
            }

            CcSendState::Cleanup1 => {
                let icache = self.cc_send_last_client_icache;
                let (nline, way, words) = if icache {
                    (
                        self.icache_cc_send_nline,
                        self.icache_cc_send_way,
                        self.icache.words(),
                    )
                } else {
                    (
                        self.dcache_cc_send_nline,
                        self.dcache_cc_send_way,
                        self.dcache.words(),
                    )
                };
                let dest_tile = ports.map.home_tile(nline.base(words));
                let mut flit = 0u64;
                dhccp::set(&mut flit, u64::from(dest_tile), FlitField::CleanupDest);
                dhccp::set(&mut flit, u64::from(self.cc_id.0), FlitField::CleanupSrcid);
                dhccp::set(&mut flit, nline.val() >> 32, FlitField::CleanupNlineMsb);
                dhccp::set(&mut flit, way as u64, FlitField::CleanupWayIndex);
                let ty = if icache {
                    p2m_type::CLEANUP_INST
                } else {
                    p2m_type::CLEANUP_DATA
                };
                dhccp::set(&mut flit, ty, FlitField::P2mType);
                self.cc_send_flits.push(flit);
                self.cc_send_fsm = CcSendState::Cleanup2;
            }

            CcSendState::Cleanup2 => {
                let icache = self.cc_send_last_client_icache;
                let (nline, words) = if icache {
                    (self.icache_cc_send_nline, self.icache.words())
                } else {
                    (self.dcache_cc_send_nline, self.dcache.words())
                };
                let mut flit = 0u64;
                dhccp::set(&mut flit, 1, FlitField::P2mEop);
                dhccp::set(&mut flit, nline.val(), FlitField::CleanupNlineLsb);
                self.cc_send_flits.push(flit);

                let dest_tile = ports.map.home_tile(nline.base(words));
                ports
                    .p2m
                    .push_packet(dest_tile as usize, self.cc_send_flits.drain(..));
                if icache {
                    self.stats.cleanups_ins += 1;
                    self.icache_cc_send_req = false;
                } else {
                    self.stats.cleanups_data += 1;
                    self.dcache_cc_send_req = false;
                }
                self.cc_send_fsm = CcSendState::Idle;
            }

            CcSendState::MultiAck => {
                let icache = self.cc_send_last_client_icache;
                let (nline, updt_idx, words) = if icache {
                    (
                        self.icache_cc_send_nline,
                        self.icache_cc_send_updt_idx,
                        self.icache.words(),
                    )
                } else {
                    (
                        self.dcache_cc_send_nline,
                        self.dcache_cc_send_updt_idx,
                        self.dcache.words(),
                    )
                };
                let dest_tile = ports.map.home_tile(nline.base(words));
                let mut flit = 0u64;
                dhccp::set(&mut flit, 1, FlitField::P2mEop);
                dhccp::set(&mut flit, u64::from(dest_tile), FlitField::MultiAckDest);
                dhccp::set(&mut flit, updt_idx as u64, FlitField::MultiAckUpdtIndex);
                dhccp::set(&mut flit, p2m_type::MULTI_ACK, FlitField::P2mType);
                ports.p2m.push(dest_tile as usize, flit);

                if icache {
                    self.icache_cc_send_req = false;
                } else {
                    self.dcache_cc_send_req = false;
                }
                self.cc_send_fsm = CcSendState::Idle;
            }
        }
    }

    /// One cycle of the CC_RECEIVE FSM. Consumes at most one M2P flit.
    pub(crate) fn cc_receive_fsm_step(&mut self, ports: &mut Ports<'_>) {
        let ep = ports.map.l1_endpoint(self.cc_id);
        match self.cc_receive_fsm {
            CcReceiveState::Idle => {
                let Some(&flit) = ports.m2p.head(ep) else {
                    return;
                };
                self.cc_receive_fsm = if dhccp::get(flit, FlitField::M2pBc) != 0 {
                    CcReceiveState::BrdcastHeader
                } else {
                    match dhccp::get(flit, FlitField::M2pType) {
                        m2p_type::MULTI_UPDT_DATA => CcReceiveState::DataUpdtHeader,
                        m2p_type::MULTI_UPDT_INST => CcReceiveState::InsUpdtHeader,
                        m2p_type::MULTI_INVAL_DATA => CcReceiveState::DataInvalHeader,
                        _ => CcReceiveState::InsInvalHeader,
                    }
                };
            }

            CcReceiveState::BrdcastHeader => {
                let _ = ports.m2p.pop(ep);
                self.cc_receive_fsm = CcReceiveState::BrdcastNline;
            }

            CcReceiveState::BrdcastNline => {
                // both caches must be free to take the request
                if self.cc_receive_icache_req || self.cc_receive_dcache_req {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                let nline = NLine(dhccp::get(flit, FlitField::BroadcastNline));
                self.cc_receive_dcache_req = true;
                self.cc_receive_dcache_nline = nline;
                self.cc_receive_dcache_kind = CcReqKind::Inval;
                self.cc_receive_icache_req = true;
                self.cc_receive_icache_nline = nline;
                self.cc_receive_icache_kind = CcReqKind::Inval;
                self.stats.cc_broadcasts += 1;
                self.cc_receive_fsm = CcReceiveState::Idle;
            }

            CcReceiveState::DataInvalHeader => {
                let _ = ports.m2p.pop(ep);
                self.cc_receive_fsm = CcReceiveState::DataInvalNline;
            }

            CcReceiveState::InsInvalHeader => {
                let _ = ports.m2p.pop(ep);
                self.cc_receive_fsm = CcReceiveState::InsInvalNline;
            }

            CcReceiveState::DataInvalNline => {
                if self.cc_receive_dcache_req {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_dcache_req = true;
                self.cc_receive_dcache_nline =
                    NLine(dhccp::get(flit, FlitField::MultiInvalNline));
                self.cc_receive_dcache_kind = CcReqKind::Inval;
                self.cc_receive_fsm = CcReceiveState::Idle;
            }

            CcReceiveState::InsInvalNline => {
                if self.cc_receive_icache_req {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_icache_req = true;
                self.cc_receive_icache_nline =
                    NLine(dhccp::get(flit, FlitField::MultiInvalNline));
                self.cc_receive_icache_kind = CcReqKind::Inval;
                self.cc_receive_fsm = CcReceiveState::Idle;
            }

            CcReceiveState::DataUpdtHeader => {
                if self.cc_receive_dcache_req {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_dcache_updt_idx =
                    dhccp::get(flit, FlitField::MultiUpdtUpdtIndex) as usize;
                self.cc_receive_fsm = CcReceiveState::DataUpdtNline;
            }

            CcReceiveState::InsUpdtHeader => {
                if self.cc_receive_icache_req {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_icache_updt_idx =
                    dhccp::get(flit, FlitField::MultiUpdtUpdtIndex) as usize;
                self.cc_receive_fsm = CcReceiveState::InsUpdtNline;
            }

            CcReceiveState::DataUpdtNline => {
                if !self.cc_updt_fifo.is_empty() {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_dcache_req = true;
                self.cc_receive_dcache_nline =
                    NLine(dhccp::get(flit, FlitField::MultiUpdtNline));
                self.cc_receive_word_idx =
                    dhccp::get(flit, FlitField::MultiUpdtWordIndex) as usize;
                self.cc_receive_dcache_kind = CcReqKind::Updt;
                self.cc_receive_fsm = CcReceiveState::DataUpdtData;
            }

            CcReceiveState::InsUpdtNline => {
                if !self.cc_updt_fifo.is_empty() {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                self.cc_receive_icache_req = true;
                self.cc_receive_icache_nline =
                    NLine(dhccp::get(flit, FlitField::MultiUpdtNline));
                self.cc_receive_word_idx =
                    dhccp::get(flit, FlitField::MultiUpdtWordIndex) as usize;
                self.cc_receive_icache_kind = CcReqKind::Updt;
                self.cc_receive_fsm = CcReceiveState::InsUpdtData;
            }

            CcReceiveState::DataUpdtData | CcReceiveState::InsUpdtData => {
                if !self.cc_updt_fifo.wok() {
                    return;
                }
                let Some(flit) = ports.m2p.pop(ep) else {
                    return;
                };
                let eop = dhccp::get(flit, FlitField::M2pEop) != 0;
                let _ = self.cc_updt_fifo.push(UpdtWord {
                    be: dhccp::get(flit, FlitField::MultiUpdtBe) as u8,
                    data: dhccp::get(flit, FlitField::MultiUpdtData) as u32,
                    eop,
                });
                if eop {
                    self.cc_receive_fsm = CcReceiveState::Idle;
                }
            }
        }
    }

    /// CLACK interface: decode one pending flit and hand it to the owning
    /// cache FSM when its request flip-flop is free.
    pub(crate) fn clack_iface_step(&mut self, ports: &mut Ports<'_>) {
        if let Some(flit) = self.clack_pending {
            let way = dhccp::get(flit, FlitField::ClackWay) as usize;
            let set = dhccp::get(flit, FlitField::ClackSet) as usize;
            if dhccp::get(flit, FlitField::ClackType) == clack_type::CLACK_DATA {
                if !self.dcache_clack_req {
                    self.dcache_clack_req = true;
                    self.dcache_clack_way = way & (self.dcache.ways() - 1);
                    self.dcache_clack_set = set & (self.dcache.sets() - 1);
                    self.clack_pending = None;
                }
            } else if !self.icache_clack_req {
                self.icache_clack_req = true;
                self.icache_clack_way = way & (self.icache.ways() - 1);
                self.icache_clack_set = set & (self.icache.sets() - 1);
                self.clack_pending = None;
            }
        }
        if self.clack_pending.is_none() {
            let ep = ports.map.l1_endpoint(self.cc_id);
            self.clack_pending = ports.clack.pop(ep);
        }
    }
}
