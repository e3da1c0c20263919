//! Direct-network command and response FSMs.
//!
//! The CMD FSM arbitrates the request flip-flops set by the two cache FSMs
//! and the write buffer, with the fixed priority of the hardware:
//! uncacheable data write, data read miss, uncacheable data read, linked
//! load, instruction miss, uncacheable instruction read, write burst,
//! store conditional, compare-and-swap. Read requests that could bypass a
//! pending write to the same line are held back by the write-buffer
//! `miss` check; instruction and data misses share a round-robin priority
//! because both need that single write-buffer lookup port.
//!
//! The two FSMs are fully desynchronized: the RSP FSM identifies
//! transactions by the response `pktid` alone, checks packet lengths, and
//! feeds the per-cache response FIFOs one word per cycle.

use super::L1Wrapper;
use crate::common::SimError;
use crate::sim::ports::Ports;
use crate::vci::{CmdWord, PktId, VciCmd, VciCmdOp};

/// CMD FSM states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CmdState {
    /// Arbitrate pending requests.
    #[default]
    Idle,
    /// Pace a single-flit instruction miss command.
    InsMiss,
    /// Pace a single-flit uncacheable instruction read.
    InsUnc,
    /// Pace a single-flit data miss command.
    DataMiss,
    /// Pace a single-flit uncacheable data read.
    DataUncRead,
    /// Pace a single-flit uncacheable data write.
    DataUncWrite,
    /// Pace a multi-flit write burst (one flit per cycle).
    DataWrite,
    /// Pace a single-flit linked-load command.
    DataLl,
    /// Pace the two-flit store-conditional command.
    DataSc,
    /// Pace the two-flit compare-and-swap command.
    DataCas,
}

/// RSP FSM states (diagnostic only; demux is by `pktid`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RspState {
    /// No response in flight.
    #[default]
    Idle,
    /// Streaming an instruction refill.
    InsMiss,
    /// Streaming a data refill.
    DataMiss,
    /// Single-word data response.
    DataUnc,
    /// Two-word linked-load response.
    DataLl,
}

impl L1Wrapper {
    /// One cycle of the CMD FSM.
    pub(crate) fn cmd_fsm_step(&mut self, ports: &mut Ports<'_>) {
        match self.cmd_fsm {
            CmdState::Idle => self.cmd_arbitrate(),
            CmdState::DataWrite => {
                // one flit per cycle; the packet leaves on the last one
                self.cmd_cpt += 1;
                let done = self
                    .cmd_pending
                    .as_ref()
                    .is_some_and(|c| self.cmd_cpt >= c.words.len());
                if done {
                    if let Some(cmd) = self.cmd_pending.take() {
                        ports.send_cmd(cmd);
                    }
                    self.wbuf.sent(self.cmd_wbuf_index);
                    self.cmd_fsm = CmdState::Idle;
                }
            }
            CmdState::DataSc | CmdState::DataCas => {
                // two flits
                self.cmd_cpt += 1;
                if self.cmd_cpt >= 2 {
                    if let Some(cmd) = self.cmd_pending.take() {
                        ports.send_cmd(cmd);
                    }
                    self.cmd_fsm = CmdState::Idle;
                }
            }
            _ => {
                // all read commands are a single flit
                if let Some(cmd) = self.cmd_pending.take() {
                    ports.send_cmd(cmd);
                }
                self.cmd_fsm = CmdState::Idle;
            }
        }
    }

    fn cmd_arbitrate(&mut self) {
        // instruction and data misses share the single write-buffer
        // lookup port: round-robin between them
        let dcache_read_ok = !self.icache_miss_req || !self.cmd_imiss_prio;
        let icache_miss_ok = !(self.dcache_vci_miss_req
            || self.dcache_vci_ll_req
            || self.dcache_vci_cas_req
            || self.dcache_vci_sc_req)
            || self.cmd_imiss_prio;

        if self.dcache_vci_unc_req && self.dcache_vci_unc_write {
            self.dcache_vci_unc_req = false;
            self.cmd_pending = Some(VciCmd {
                op: VciCmdOp::Write,
                address: self.dcache_vci_paddr,
                srcid: self.srcid,
                trdid: 0,
                pktid: PktId::DataUnc,
                plen: 4,
                words: vec![CmdWord {
                    wdata: self.dcache_vci_wdata,
                    be: self.dcache_vci_unc_be,
                }],
            });
            self.cmd_fsm = CmdState::DataUncWrite;
        } else if self.dcache_vci_miss_req && dcache_read_ok && self.wbuf.miss(self.dcache_vci_paddr)
        {
            self.dcache_vci_miss_req = false;
            self.cmd_imiss_prio = true;
            let words = self.dcache.words();
            self.cmd_pending = Some(VciCmd::read(
                PktId::ReadDataMiss,
                self.dcache_vci_paddr.line_base(words),
                (words << 2) as u32,
                self.srcid,
                0,
            ));
            self.cmd_fsm = CmdState::DataMiss;
        } else if self.dcache_vci_unc_req {
            self.dcache_vci_unc_req = false;
            self.cmd_pending = Some(VciCmd::read(
                PktId::DataUnc,
                self.dcache_vci_paddr,
                4,
                self.srcid,
                0,
            ));
            self.cmd_fsm = CmdState::DataUncRead;
        } else if self.dcache_vci_ll_req && dcache_read_ok && self.wbuf.miss(self.dcache_vci_paddr)
        {
            self.dcache_vci_ll_req = false;
            self.cmd_imiss_prio = true;
            self.cmd_pending = Some(VciCmd::read(
                PktId::Ll,
                self.dcache_vci_paddr,
                8,
                self.srcid,
                0,
            ));
            self.cmd_fsm = CmdState::DataLl;
        } else if self.icache_miss_req && icache_miss_ok && self.wbuf.miss(self.icache_vci_paddr) {
            self.icache_miss_req = false;
            self.cmd_imiss_prio = false;
            let words = self.icache.words();
            self.cmd_pending = Some(VciCmd::read(
                PktId::ReadInsMiss,
                self.icache_vci_paddr.line_base(words),
                (words << 2) as u32,
                self.srcid,
                0,
            ));
            self.cmd_fsm = CmdState::InsMiss;
        } else if self.icache_unc_req {
            self.icache_unc_req = false;
            self.cmd_pending = Some(VciCmd::read(
                PktId::ReadInsUnc,
                self.icache_vci_paddr,
                4,
                self.srcid,
                0,
            ));
            self.cmd_fsm = CmdState::InsUnc;
        } else if let Some(burst) = self.wbuf.rok() {
            self.stats.write_transactions += 1;
            self.cmd_wbuf_index = burst.index;
            self.cmd_cpt = 0;
            self.cmd_pending = Some(VciCmd {
                op: VciCmdOp::Write,
                address: burst.address,
                srcid: self.srcid,
                trdid: burst.index as u8,
                pktid: PktId::Write,
                plen: (burst.words.len() << 2) as u32,
                words: burst
                    .words
                    .iter()
                    .map(|&(wdata, be)| CmdWord { wdata, be })
                    .collect(),
            });
            self.cmd_fsm = CmdState::DataWrite;
        } else if self.dcache_vci_sc_req && dcache_read_ok && self.wbuf.miss(self.dcache_vci_paddr)
        {
            self.dcache_vci_sc_req = false;
            self.cmd_imiss_prio = true;
            self.cmd_cpt = 0;
            self.cmd_pending = Some(VciCmd {
                op: VciCmdOp::StoreCond,
                address: self.dcache_vci_paddr,
                srcid: self.srcid,
                trdid: 0,
                pktid: PktId::Sc,
                plen: 8,
                words: vec![
                    CmdWord {
                        wdata: self.llsc_key,
                        be: 0xF,
                    },
                    CmdWord {
                        wdata: self.dcache_vci_sc_data,
                        be: 0xF,
                    },
                ],
            });
            self.cmd_fsm = CmdState::DataSc;
        } else if self.dcache_vci_cas_req && dcache_read_ok && self.wbuf.miss(self.dcache_vci_paddr)
        {
            self.dcache_vci_cas_req = false;
            self.cmd_imiss_prio = true;
            self.cmd_cpt = 0;
            self.cmd_pending = Some(VciCmd {
                op: VciCmdOp::StoreCond,
                address: self.dcache_vci_paddr,
                srcid: self.srcid,
                trdid: 0,
                pktid: PktId::Cas,
                plen: 8,
                words: vec![
                    CmdWord {
                        wdata: self.dcache_vci_cas_old,
                        be: 0xF,
                    },
                    CmdWord {
                        wdata: self.dcache_vci_cas_new,
                        be: 0xF,
                    },
                ],
            });
            self.cmd_fsm = CmdState::DataCas;
        }
    }

    /// One cycle of the RSP FSM: transfers at most one response word into
    /// the destination FIFO.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] on a response packet whose length
    /// does not match its transaction class.
    pub(crate) fn rsp_fsm_step(&mut self, ports: &mut Ports<'_>) -> Result<(), SimError> {
        if self.rsp_current.is_none() {
            let ep = ports.map.rsp_endpoint(self.srcid);
            let Some(rsp) = ports.rsp.pop(ep) else {
                return Ok(());
            };

            // error and single-cycle cases are handled on reception
            if rsp.rpktid == PktId::Write {
                self.rsp_fsm = RspState::Idle;
                self.wbuf.completed(rsp.rtrdid as usize);
                if rsp.rerror {
                    // asynchronous write bus error: raised the cycle the
                    // response is consumed
                    self.wberr_strobe = true;
                }
                return Ok(());
            }
            if rsp.rerror {
                match rsp.rpktid {
                    PktId::ReadInsUnc | PktId::ReadInsMiss => self.rsp_ins_error = true,
                    _ => self.rsp_data_error = true,
                }
                return Ok(());
            }

            let expected = match rsp.rpktid {
                PktId::ReadInsMiss => self.icache.words(),
                PktId::ReadDataMiss => self.dcache.words(),
                PktId::Ll => 2,
                _ => 1,
            };
            if rsp.rdata.len() != expected {
                return Err(SimError::protocol(
                    self.tile,
                    "VCI_RSP",
                    "RSP_IDLE",
                    format!(
                        "response packet length {} (expected {}) for {:?}",
                        rsp.rdata.len(),
                        expected,
                        rsp.rpktid
                    ),
                ));
            }
            self.rsp_fsm = match rsp.rpktid {
                PktId::ReadInsMiss => RspState::InsMiss,
                PktId::ReadDataMiss => RspState::DataMiss,
                PktId::Ll => RspState::DataLl,
                _ => RspState::DataUnc,
            };
            self.rsp_word = 0;
            self.rsp_current = Some(rsp);
        }

        // stream one word per cycle into the destination FIFO
        if let Some(rsp) = &self.rsp_current {
            let to_icache = matches!(rsp.rpktid, PktId::ReadInsMiss | PktId::ReadInsUnc);
            let fifo = if to_icache {
                &mut self.rsp_fifo_icache
            } else {
                &mut self.rsp_fifo_dcache
            };
            if fifo.wok() {
                let word = rsp.rdata[self.rsp_word];
                let _ = fifo.push(word);
                self.rsp_word += 1;
                if self.rsp_word == rsp.rdata.len() {
                    self.rsp_current = None;
                    self.rsp_fsm = RspState::Idle;
                }
            }
        }
        Ok(())
    }
}
