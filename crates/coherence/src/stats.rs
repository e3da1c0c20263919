//! Simulation statistics collection and reporting.
//!
//! Each component owns its activity counters and increments them inline;
//! the platform aggregates them into a [`Report`] that can be printed or
//! serialized to JSON.

use serde::Serialize;

/// Activity counters of one L1 wrapper.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct L1Stats {
    /// Simulated cycles.
    pub total_cycles: u64,
    /// Instruction fetches served from the cache.
    pub ins_reads: u64,
    /// Instruction cache misses.
    pub ins_misses: u64,
    /// Uncacheable instruction fetches.
    pub ins_unc_reads: u64,
    /// Instruction TLB lookups.
    pub itlb_reads: u64,
    /// Instruction TLB misses.
    pub itlb_misses: u64,
    /// Data TLB lookups.
    pub dtlb_reads: u64,
    /// Data TLB misses.
    pub dtlb_misses: u64,
    /// Data loads served from the cache.
    pub data_reads: u64,
    /// Data stores accepted.
    pub data_writes: u64,
    /// Data cache misses (including table-walk misses).
    pub data_misses: u64,
    /// Uncacheable data reads.
    pub data_unc_reads: u64,
    /// Uncacheable data writes.
    pub data_unc_writes: u64,
    /// Linked loads issued.
    pub ll_ops: u64,
    /// Store conditionals issued (including local failures).
    pub sc_ops: u64,
    /// Write-buffer insertions.
    pub wbuf_writes: u64,
    /// Write bursts sent on the direct network.
    pub write_transactions: u64,
    /// Instruction-cache cleanups sent.
    pub cleanups_ins: u64,
    /// Data-cache cleanups sent.
    pub cleanups_data: u64,
    /// Coherence updates applied to the instruction cache.
    pub cc_updt_ins: u64,
    /// Coherence updates applied to the data cache.
    pub cc_updt_data: u64,
    /// Coherence invalidations applied to the instruction cache.
    pub cc_inval_ins: u64,
    /// Coherence invalidations applied to the data cache.
    pub cc_inval_data: u64,
    /// Broadcast invalidations received.
    pub cc_broadcasts: u64,
    /// Access-bit CAS operations issued by the table walker.
    pub tlb_ref_bit_cas: u64,
    /// Dirty-bit CAS operations issued before stores.
    pub dirty_bit_cas: u64,
    /// Selective TLB invalidation scans.
    pub tlb_inval_scans: u64,
}

/// Activity counters of one L2 memory cache.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct L2Stats {
    /// Read transactions served.
    pub reads: u64,
    /// Read transactions missing in the L2.
    pub read_misses: u64,
    /// Write transactions served.
    pub writes: u64,
    /// Write transactions missing in the L2.
    pub write_misses: u64,
    /// CAS transactions served.
    pub cas_ops: u64,
    /// LL transactions served.
    pub ll_ops: u64,
    /// SC transactions served.
    pub sc_ops: u64,
    /// SC transactions that failed.
    pub sc_failures: u64,
    /// Cleanups processed.
    pub cleanups: u64,
    /// Multicast updates sent.
    pub multi_updates: u64,
    /// Multicast invalidations sent.
    pub multi_invals: u64,
    /// Broadcast invalidations sent.
    pub broadcasts: u64,
    /// Multicast acknowledgements received.
    pub multi_acks: u64,
    /// Victim writebacks to external RAM.
    pub writebacks: u64,
    /// External RAM line fetches.
    pub ram_gets: u64,
    /// External RAM line stores.
    pub ram_puts: u64,
}

/// Aggregated platform report.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    /// Simulated cycles.
    pub cycles: u64,
    /// One entry per L1 wrapper, in (tile, proc) order.
    pub l1: Vec<L1Stats>,
    /// One entry per tile.
    pub l2: Vec<L2Stats>,
}

impl Report {
    /// Renders a human-readable summary.
    pub fn summary(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "cycles: {}", self.cycles);
        for (i, s) in self.l1.iter().enumerate() {
            let _ = writeln!(
                out,
                "l1[{i}]: reads {} misses {} writes {} cleanups {} updates {}",
                s.data_reads + s.ins_reads,
                s.data_misses + s.ins_misses,
                s.data_writes,
                s.cleanups_data + s.cleanups_ins,
                s.cc_updt_data + s.cc_updt_ins,
            );
        }
        for (i, s) in self.l2.iter().enumerate() {
            let _ = writeln!(
                out,
                "l2[{i}]: reads {} writes {} updates {} invals {} broadcasts {} writebacks {}",
                s.reads, s.writes, s.multi_updates, s.multi_invals, s.broadcasts, s.writebacks,
            );
        }
        out
    }
}
