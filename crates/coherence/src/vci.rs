//! Direct-network transactions.
//!
//! Ordinary (non-coherence) traffic travels on the direct command/response
//! channels as VCI-style packets. This module defines:
//! 1. **Commands:** [`VciCmd`] with the standard field set
//!    `{cmd, address, wdata, be, plen, srcid, trdid, pktid}`.
//! 2. **Responses:** [`VciRsp`] with `{rdata, rerror, rsrcid, rtrdid, rpktid}`.
//! 3. **Transaction classes:** the 3-bit [`PktId`] encoding that the
//!    response FSM uses to demultiplex, since commands and responses are
//!    fully desynchronized.
//!
//! Reads are single-flit commands; writes are multi-flit contiguous bursts
//! with per-word byte enables; CAS and SC carry two data flits
//! (expected/new, then key/new); LL is a single-flit command with a
//! two-flit response (key, then data).

use crate::common::{PhysAddr, SrcId};

/// VCI command opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VciCmdOp {
    /// Plain read (single flit).
    Read,
    /// Write burst (one flit per word).
    Write,
    /// Linked load.
    LockedRead,
    /// Store conditional / compare-and-swap (two flits).
    StoreCond,
}

/// Transaction class carried in the `pktid` field.
///
/// The encoding is fixed by the hardware:
/// `b2` read / not-read; for reads `b1` data / instruction and `b0`
/// uncached / miss; for the rest the value identifies the atomic class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PktId {
    /// Uncacheable data access (read or write).
    DataUnc = 0x0,
    /// Cacheable data read miss (full line response).
    ReadDataMiss = 0x1,
    /// Uncacheable instruction read.
    ReadInsUnc = 0x2,
    /// Cacheable instruction read miss (full line response).
    ReadInsMiss = 0x3,
    /// Write burst from the write buffer.
    Write = 0x4,
    /// Compare-and-swap.
    Cas = 0x5,
    /// Linked load.
    Ll = 0x6,
    /// Store conditional.
    Sc = 0x7,
}

/// One data flit of a write/CAS/SC command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CmdWord {
    /// 32-bit data.
    pub wdata: u32,
    /// Per-byte enable (4 bits used).
    pub be: u8,
}

/// A direct-network command packet.
#[derive(Clone, Debug)]
pub struct VciCmd {
    /// Command opcode.
    pub op: VciCmdOp,
    /// Target physical address (first flit address; bursts are contiguous).
    pub address: PhysAddr,
    /// Global initiator identity, echoed in the response.
    pub srcid: SrcId,
    /// Transaction id private to the initiator (write-buffer line index
    /// for writes).
    pub trdid: u8,
    /// Transaction class.
    pub pktid: PktId,
    /// Payload length in bytes (response length for reads).
    pub plen: u32,
    /// Data flits (empty for reads and LL).
    pub words: Vec<CmdWord>,
}

/// A direct-network response packet.
#[derive(Clone, Debug)]
pub struct VciRsp {
    /// Initiator the response is routed back to.
    pub rsrcid: SrcId,
    /// Echoed transaction id.
    pub rtrdid: u8,
    /// Echoed transaction class.
    pub rpktid: PktId,
    /// Error bit (bus error).
    pub rerror: bool,
    /// Response data, one entry per flit (empty for write responses).
    pub rdata: Vec<u32>,
}

impl VciCmd {
    /// Single-flit read command of `plen` bytes.
    pub fn read(pktid: PktId, address: PhysAddr, plen: u32, srcid: SrcId, trdid: u8) -> Self {
        let op = if pktid == PktId::Ll {
            VciCmdOp::LockedRead
        } else {
            VciCmdOp::Read
        };
        Self {
            op,
            address,
            srcid,
            trdid,
            pktid,
            plen,
            words: Vec::new(),
        }
    }
}
