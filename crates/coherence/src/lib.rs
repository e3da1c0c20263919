//! Cycle-accurate coherence engine of a tiled distributed-shared-memory
//! multiprocessor.
//!
//! This crate implements the hardware cache-coherence core of a 2D-mesh
//! manycore with the following parts:
//! 1. **L1 wrappers:** per-CPU instruction/data cache FSMs, MMU/TLB
//!    refill machinery, write buffer, LL/SC reservation, and the
//!    processor side of the coherence protocol.
//! 2. **L2 memory caches:** one inclusive, directory-keeping bank per
//!    tile, with the sharer heap and the transaction/update/invalidation
//!    tables.
//! 3. **Networks:** five logically independent channels (direct
//!    command/response, M2P, P2M, CLACK) with bit-exact coherence flit
//!    codecs.
//! 4. **SoC:** memory map, external RAM, TTY and block device
//!    collaborators.
//! 5. **Simulation:** `Platform` (tiles + networks), single-threaded
//!    cycle scheduler, configuration, and statistics.

/// Common types (addresses, identifiers, errors, FIFOs).
pub mod common;
/// Simulator configuration (defaults and hierarchical structures).
pub mod config;
/// L1 wrapper: caches, TLBs, write buffer, protocol FSMs.
pub mod l1;
/// L2 memory cache: storage, directory, tables, target engine.
pub mod l2;
/// Networks: flit codecs and ordered delivery channels.
pub mod noc;
/// Processor-side interface and scripted drivers.
pub mod proc;
/// Simulation: platform, ports, cycle scheduler.
pub mod sim;
/// SoC collaborators: map, RAM, TTY, block device.
pub mod soc;
/// Activity counters and reports.
pub mod stats;
/// Direct-network transactions.
pub mod vci;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Per-CPU L1 wrapper.
pub use crate::l1::L1Wrapper;
/// Per-tile L2 memory cache and directory.
pub use crate::l2::MemCache;
/// Top-level platform; owns every tile and the five networks.
pub use crate::sim::Platform;
