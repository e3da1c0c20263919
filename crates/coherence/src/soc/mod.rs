//! SoC collaborators: memory map, external RAM and peripherals.
//!
//! The full platform carries many more devices (framebuffer, NIC, DMA
//! chainer, ICU, ROM); they reduce to the same request/response port
//! shape and are out of scope here. This module provides:
//! 1. **Map** ([`map`]): tile/segment address decomposition and the
//!    cacheability table.
//! 2. **RAM** ([`memory`]): the per-tile external RAM behind the L2.
//! 3. **Devices**: the TTY ([`tty`]) and the block device
//!    ([`block_device`]), enough to exercise uncacheable I/O ordering and
//!    DMA traffic through the coherence engine.

/// Block device with a DMA engine.
pub mod block_device;
/// Address decomposition and routing.
pub mod map;
/// Per-tile external RAM.
pub mod memory;
/// Write-only terminal.
pub mod tty;

pub use block_device::BlockDevice;
pub use map::{AddressMap, CmdTarget};
pub use memory::ExternalRam;
pub use tty::Tty;
