//! Directory-side tables.
//!
//! 1. **TRT** (transaction table): outstanding external-RAM accesses,
//!    indexed by TRDID. Also carries the fixed-latency completion time of
//!    the RAM model.
//! 2. **UPT** (update table): multicast-update episodes, counting the
//!    expected MULTI_ACKs; the deferred write response is released when
//!    the last acknowledgement arrives.
//! 3. **IVT** (invalidation table): multicast/broadcast-invalidation
//!    episodes, counting the expected cleanups.
//! 4. **LL/SC table**: per-word generation keys; a store conditional
//!    commits iff it presents the key returned by the matching LL.

use std::collections::HashMap;

use crate::common::{NLine, PhysAddr, SrcId};
use crate::vci::PktId;

/// Kind of an external-RAM transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrtKind {
    /// Line fetch.
    Get,
    /// Victim writeback.
    Put,
}

/// One TRT slot.
#[derive(Clone, Debug)]
pub struct TrtEntry {
    /// Slot allocated.
    pub valid: bool,
    /// Transaction kind.
    pub kind: TrtKind,
    /// Target line.
    pub nline: NLine,
    /// Writeback data (PUT only).
    pub data: Vec<u32>,
    /// Cycle at which the RAM completes the access.
    pub ready_at: u64,
}

/// The transaction table.
pub struct TransactionTable {
    entries: Vec<TrtEntry>,
}

impl TransactionTable {
    /// Creates a table of `size` free slots.
    pub fn new(size: usize) -> Self {
        Self {
            entries: (0..size)
                .map(|_| TrtEntry {
                    valid: false,
                    kind: TrtKind::Get,
                    nline: NLine(0),
                    data: Vec::new(),
                    ready_at: 0,
                })
                .collect(),
        }
    }

    /// Allocates a slot; returns its TRDID.
    pub fn alloc(
        &mut self,
        kind: TrtKind,
        nline: NLine,
        data: Vec<u32>,
        ready_at: u64,
    ) -> Option<usize> {
        let idx = self.entries.iter().position(|e| !e.valid)?;
        self.entries[idx] = TrtEntry {
            valid: true,
            kind,
            nline,
            data,
            ready_at,
        };
        Some(idx)
    }

    /// The entry behind a TRDID.
    pub fn get(&self, idx: usize) -> &TrtEntry {
        &self.entries[idx]
    }

    /// `true` when the RAM access has completed.
    pub fn ready(&self, idx: usize, cycle: u64) -> bool {
        self.entries[idx].valid && self.entries[idx].ready_at <= cycle
    }

    /// Releases a slot.
    pub fn free(&mut self, idx: usize) {
        self.entries[idx].valid = false;
        self.entries[idx].data.clear();
    }
}

/// A direct-network response withheld until an episode completes.
#[derive(Clone, Debug)]
pub struct PendingRsp {
    /// Initiator to answer.
    pub srcid: SrcId,
    /// Echoed transaction id.
    pub trdid: u8,
    /// Echoed transaction class.
    pub pktid: PktId,
    /// Response data flits.
    pub rdata: Vec<u32>,
}

/// One UPT or IVT slot.
#[derive(Clone, Debug, Default)]
pub struct EpisodeEntry {
    /// Slot allocated.
    pub valid: bool,
    /// Line the episode is about.
    pub nline: NLine,
    /// Acknowledgements (or cleanups) expected.
    pub expected: usize,
    /// Acknowledgements (or cleanups) received so far.
    pub received: usize,
    /// Response released on completion, if any.
    pub rsp: Option<PendingRsp>,
}

/// Update or invalidation table (same shape, different acknowledgement
/// traffic).
pub struct EpisodeTable {
    entries: Vec<EpisodeEntry>,
}

impl EpisodeTable {
    /// Creates a table of `size` free slots.
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![EpisodeEntry::default(); size],
        }
    }

    /// Allocates a slot; returns its index (the UPDT_INDEX on the wire).
    pub fn alloc(
        &mut self,
        nline: NLine,
        expected: usize,
        rsp: Option<PendingRsp>,
    ) -> Option<usize> {
        let idx = self.entries.iter().position(|e| !e.valid)?;
        self.entries[idx] = EpisodeEntry {
            valid: true,
            nline,
            expected,
            received: 0,
            rsp,
        };
        Some(idx)
    }

    /// Records one acknowledgement on a slot; returns the released
    /// response when the episode completes.
    pub fn ack(&mut self, idx: usize) -> Option<Option<PendingRsp>> {
        let entry = &mut self.entries[idx];
        if !entry.valid {
            return None;
        }
        entry.received += 1;
        if entry.received == entry.expected {
            let rsp = entry.rsp.take();
            entry.valid = false;
            Some(rsp)
        } else {
            None
        }
    }

    /// Finds the active episode for a line.
    pub fn find(&self, nline: NLine) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.valid && e.nline == nline)
    }

    /// The entry at `idx`.
    pub fn get(&self, idx: usize) -> &EpisodeEntry {
        &self.entries[idx]
    }

    /// `true` when no episode is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.valid)
    }
}

/// Per-word generation keys backing LL/SC.
///
/// Every committed write (store, SC, CAS) to a word bumps its key, so a
/// store conditional presenting a stale key fails. Unwritten words read
/// key 0.
#[derive(Debug, Default)]
pub struct LlscTable {
    keys: HashMap<u64, u32>,
}

impl LlscTable {
    /// Current key of a word address.
    pub fn key(&self, addr: PhysAddr) -> u32 {
        self.keys.get(&(addr.val() & !3)).copied().unwrap_or(0)
    }

    /// Bumps the key of a word address (a write was committed).
    pub fn bump(&mut self, addr: PhysAddr) {
        let e = self.keys.entry(addr.val() & !3).or_insert(0);
        *e = e.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trt_allocates_and_completes_by_latency() {
        let mut trt = TransactionTable::new(2);
        let idx = trt.alloc(TrtKind::Get, NLine(7), Vec::new(), 20).unwrap();
        assert!(!trt.ready(idx, 19));
        assert!(trt.ready(idx, 20));
        trt.free(idx);
        assert!(!trt.ready(idx, 25));
    }

    #[test]
    fn episode_releases_response_on_last_ack() {
        let mut upt = EpisodeTable::new(2);
        let rsp = PendingRsp {
            srcid: SrcId(3),
            trdid: 1,
            pktid: PktId::Write,
            rdata: Vec::new(),
        };
        let idx = upt.alloc(NLine(9), 3, Some(rsp)).unwrap();
        assert!(upt.ack(idx).is_none());
        assert!(upt.ack(idx).is_none());
        let released = upt.ack(idx).unwrap();
        assert_eq!(released.unwrap().srcid, SrcId(3));
        assert!(upt.is_empty());
    }

    #[test]
    fn llsc_keys_advance_on_writes() {
        let mut t = LlscTable::default();
        let a = PhysAddr(0x1000);
        assert_eq!(t.key(a), 0);
        t.bump(a);
        assert_eq!(t.key(a), 1);
        // byte address maps to its word
        assert_eq!(t.key(PhysAddr(0x1002)), 1);
        assert_eq!(t.key(PhysAddr(0x1004)), 0);
    }
}
