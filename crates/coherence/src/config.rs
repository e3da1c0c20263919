//! Configuration system for the coherence-engine simulator.
//!
//! This module defines all configuration structures used to parameterize the
//! platform. It provides:
//! 1. **Defaults:** baseline hardware constants (mesh shape, cache and TLB
//!    geometry, write buffer, directory tables, latencies).
//! 2. **Structures:** hierarchical config for topology, L1 wrappers, the L2
//!    memory cache, and simulation control.
//!
//! Configuration is supplied as JSON by the CLI, or use `Config::default()`
//! for the built-in platform.

use serde::Deserialize;

use crate::common::SimError;

/// Default configuration constants for the simulator.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in the JSON configuration.
mod defaults {
    /// Mesh X coordinate width in bits (2 columns by default).
    pub const X_WIDTH: u32 = 1;

    /// Mesh Y coordinate width in bits (2 rows by default).
    pub const Y_WIDTH: u32 = 1;

    /// Local id width inside a tile, for both `srcid` and `cc_id`.
    pub const L_WIDTH: u32 = 4;

    /// Number of processor cores per tile.
    pub const PROCS_PER_TILE: usize = 4;

    /// Physical address width in bits.
    pub const PADDR_WIDTH: u32 = 40;

    /// L1 cache associativity (both instruction and data).
    pub const L1_WAYS: usize = 4;

    /// L1 cache sets (both instruction and data).
    pub const L1_SETS: usize = 64;

    /// 32-bit words per L1 cache line.
    pub const L1_WORDS: usize = 16;

    /// TLB associativity (both instruction and data).
    pub const TLB_WAYS: usize = 8;

    /// TLB sets (both instruction and data).
    pub const TLB_SETS: usize = 8;

    /// Write buffer lines.
    pub const WBUF_NLINES: usize = 4;

    /// 32-bit words per write buffer line.
    pub const WBUF_NWORDS: usize = 4;

    /// LL/SC reservation lifetime in cycles.
    pub const LLSC_TIMEOUT: u32 = 10_000;

    /// Cycles a processor request may stay blocked before the watchdog
    /// terminates the simulation.
    pub const MAX_FROZEN_CYCLES: u32 = 100_000;

    /// L2 memory-cache associativity.
    pub const L2_WAYS: usize = 16;

    /// L2 memory-cache sets.
    pub const L2_SETS: usize = 256;

    /// Transaction table (TRT) entries: outstanding external-RAM accesses.
    pub const TRT_ENTRIES: usize = 4;

    /// Update table (UPT) entries: update episodes in flight.
    pub const UPT_ENTRIES: usize = 8;

    /// Invalidation table (IVT) entries: invalidation episodes in flight.
    pub const IVT_ENTRIES: usize = 8;

    /// Sharer heap cells shared by all directory entries of a tile.
    pub const HEAP_SIZE: usize = 1024;

    /// Sharer count above which a single broadcast invalidation replaces
    /// per-sharer multicast. A configuration knob of the hardware; never
    /// derived from the mesh geometry.
    pub const BROADCAST_THRESHOLD: usize = 8;

    /// External RAM access latency in cycles (GET and PUT).
    pub const RAM_LATENCY: u32 = 20;

    /// Per-tile physical memory segment size (1 MiB aligned).
    pub const SEGMENT_SIZE: u64 = 0x0010_0000;

    /// Block device block size in bytes (power of two in [128, 4096]).
    pub const DISK_BLOCK_SIZE: u32 = 512;

    /// Block device burst size in bytes (power of two in [8, 64]).
    pub const DISK_BURST_SIZE: u32 = 64;
}

/// Mesh topology and identifier widths.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Bits of the X coordinate in tile indexes and physical addresses.
    pub x_width: u32,
    /// Bits of the Y coordinate in tile indexes and physical addresses.
    pub y_width: u32,
    /// Bits of the local id inside a tile (srcid and cc_id low bits).
    pub l_width: u32,
    /// Mesh columns actually populated (≤ 2^x_width).
    pub x_size: u32,
    /// Mesh rows actually populated (≤ 2^y_width).
    pub y_size: u32,
    /// Processor cores per tile.
    pub procs_per_tile: usize,
    /// Physical address width in bits.
    pub paddr_width: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            x_width: defaults::X_WIDTH,
            y_width: defaults::Y_WIDTH,
            l_width: defaults::L_WIDTH,
            x_size: 2,
            y_size: 2,
            procs_per_tile: defaults::PROCS_PER_TILE,
            paddr_width: defaults::PADDR_WIDTH,
        }
    }
}

impl TopologyConfig {
    /// Total number of populated tiles.
    #[inline]
    pub const fn tiles(&self) -> u32 {
        self.x_size * self.y_size
    }
}

/// Geometry of one set-associative cache or TLB.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CacheGeometry {
    /// Associativity.
    pub ways: usize,
    /// Number of sets.
    pub sets: usize,
    /// 32-bit words per line (1 for TLBs).
    pub words: usize,
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            ways: defaults::L1_WAYS,
            sets: defaults::L1_SETS,
            words: defaults::L1_WORDS,
        }
    }
}

/// L1 wrapper configuration (per processor core).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct L1Config {
    /// Instruction cache geometry.
    pub icache: CacheGeometry,
    /// Data cache geometry.
    pub dcache: CacheGeometry,
    /// Instruction TLB geometry (`words` is ignored).
    pub itlb: CacheGeometry,
    /// Data TLB geometry (`words` is ignored).
    pub dtlb: CacheGeometry,
    /// Write buffer lines.
    pub wbuf_nlines: usize,
    /// Words per write buffer line.
    pub wbuf_nwords: usize,
    /// LL/SC reservation timeout in cycles.
    pub llsc_timeout: u32,
    /// Watchdog threshold for blocked processor requests.
    pub max_frozen_cycles: u32,
}

impl Default for L1Config {
    fn default() -> Self {
        let tlb = CacheGeometry {
            ways: defaults::TLB_WAYS,
            sets: defaults::TLB_SETS,
            words: 1,
        };
        Self {
            icache: CacheGeometry::default(),
            dcache: CacheGeometry::default(),
            itlb: tlb,
            dtlb: tlb,
            wbuf_nlines: defaults::WBUF_NLINES,
            wbuf_nwords: defaults::WBUF_NWORDS,
            llsc_timeout: defaults::LLSC_TIMEOUT,
            max_frozen_cycles: defaults::MAX_FROZEN_CYCLES,
        }
    }
}

/// L2 memory cache and directory configuration (per tile).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct L2Config {
    /// L2 storage geometry. `words` must equal the L1 line width.
    pub geometry: CacheGeometry,
    /// Transaction table entries.
    pub trt_entries: usize,
    /// Update table entries.
    pub upt_entries: usize,
    /// Invalidation table entries.
    pub ivt_entries: usize,
    /// Sharer heap cells.
    pub heap_size: usize,
    /// Sharer count above which invalidations are broadcast.
    pub broadcast_threshold: usize,
    /// External RAM latency in cycles.
    pub ram_latency: u32,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            geometry: CacheGeometry {
                ways: defaults::L2_WAYS,
                sets: defaults::L2_SETS,
                words: defaults::L1_WORDS,
            },
            trt_entries: defaults::TRT_ENTRIES,
            upt_entries: defaults::UPT_ENTRIES,
            ivt_entries: defaults::IVT_ENTRIES,
            heap_size: defaults::HEAP_SIZE,
            broadcast_threshold: defaults::BROADCAST_THRESHOLD,
            ram_latency: defaults::RAM_LATENCY,
        }
    }
}

/// Memory map and peripheral configuration.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct SocConfig {
    /// Size of each 1 MiB-aligned segment.
    pub segment_size: u64,
    /// Tile index owning the shared peripherals (TTY, disk).
    pub io_tile: u32,
    /// Disk block size in bytes.
    pub disk_block_size: u32,
    /// Disk burst size in bytes.
    pub disk_burst_size: u32,
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            segment_size: defaults::SEGMENT_SIZE,
            io_tile: 0,
            disk_block_size: defaults::DISK_BLOCK_SIZE,
            disk_burst_size: defaults::DISK_BURST_SIZE,
        }
    }
}

/// Root configuration type.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mesh topology and identifier widths.
    pub topology: TopologyConfig,
    /// Per-core L1 wrapper configuration.
    pub l1: L1Config,
    /// Per-tile L2 memory cache configuration.
    pub l2: L2Config,
    /// Memory map and peripherals.
    pub soc: SocConfig,
}

impl Config {
    /// Validates geometry constraints that the hardware fixes by
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] on non-power-of-two geometry, L1/L2
    /// line width mismatch, out-of-range widths or disk parameters.
    pub fn validate(&self) -> Result<(), SimError> {
        let pow2 = |name: &str, v: usize| {
            if v.is_power_of_two() {
                Ok(())
            } else {
                Err(SimError::Config(format!("{name} = {v} is not a power of two")))
            }
        };
        pow2("l1.icache.sets", self.l1.icache.sets)?;
        pow2("l1.icache.words", self.l1.icache.words)?;
        pow2("l1.dcache.sets", self.l1.dcache.sets)?;
        pow2("l1.dcache.words", self.l1.dcache.words)?;
        pow2("l2.geometry.sets", self.l2.geometry.sets)?;
        pow2("soc.disk_block_size", self.soc.disk_block_size as usize)?;
        pow2("soc.disk_burst_size", self.soc.disk_burst_size as usize)?;

        if self.l2.geometry.words != self.l1.dcache.words
            || self.l2.geometry.words != self.l1.icache.words
        {
            return Err(SimError::Config(format!(
                "l2 line width ({}) must match both l1 line widths ({}/{})",
                self.l2.geometry.words, self.l1.icache.words, self.l1.dcache.words
            )));
        }
        // the update-table index travels in a 4-bit flit field
        if self.l2.upt_entries > 16 {
            return Err(SimError::Config(format!(
                "l2.upt_entries = {} exceeds the 4-bit UPDT_INDEX space",
                self.l2.upt_entries
            )));
        }
        if self.topology.x_size != (1 << self.topology.x_width)
            || self.topology.y_size != (1 << self.topology.y_width)
        {
            return Err(SimError::Config(
                "mesh size must fill the coordinate space (x_size = 2^x_width, y_size = 2^y_width)"
                    .into(),
            ));
        }
        if self.topology.procs_per_tile >= (1 << self.topology.l_width) {
            return Err(SimError::Config(
                "procs_per_tile does not fit in l_width".into(),
            ));
        }
        if !(128..=4096).contains(&self.soc.disk_block_size) {
            return Err(SimError::Config(format!(
                "disk_block_size {} outside [128, 4096]",
                self.soc.disk_block_size
            )));
        }
        if !(8..=64).contains(&self.soc.disk_burst_size) {
            return Err(SimError::Config(format!(
                "disk_burst_size {} outside [8, 64]",
                self.soc.disk_burst_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[rstest]
    #[case::l2_line_mismatch(|c: &mut Config| c.l2.geometry.words = 8)]
    #[case::non_pow2_sets(|c: &mut Config| c.l1.dcache.sets = 48)]
    #[case::bad_block_size(|c: &mut Config| c.soc.disk_block_size = 96)]
    #[case::burst_too_large(|c: &mut Config| c.soc.disk_burst_size = 128)]
    #[case::sparse_mesh(|c: &mut Config| c.topology.x_size = 1)]
    #[case::l_width_overflow(|c: &mut Config| c.topology.procs_per_tile = 16)]
    #[case::upt_index_overflow(|c: &mut Config| c.l2.upt_entries = 17)]
    fn rejects_invalid_geometry(#[case] mutate: fn(&mut Config)) {
        let mut cfg = Config::default();
        mutate(&mut cfg);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: Config =
            serde_json::from_str(r#"{"topology": {"x_size": 1, "y_size": 1}}"#).unwrap();
        assert_eq!(cfg.topology.tiles(), 1);
        assert_eq!(cfg.l1.wbuf_nlines, 4);
    }
}
