//! Common types shared by every component of the coherence engine.
//!
//! This module groups the leaf abstractions used across the crate:
//! 1. **Addresses:** strong types for physical/virtual addresses and line numbers.
//! 2. **Identifiers:** tile coordinates and the global initiator/cache identities.
//! 3. **Errors:** simulator-level errors and the architectural MMU error encoding.
//! 4. **FIFOs:** the small two-phase FIFO used on every FSM-to-FSM port.

/// Physical/virtual address types, line numbers, tile coordinates and ids.
pub mod addr;
/// Simulator errors and the architectural MMU error taxonomy.
pub mod error;
/// Generic bounded FIFO with cycle-boundary update semantics.
pub mod fifo;

pub use addr::{CcId, NLine, PhysAddr, SrcId, TileCoord, VirtAddr};
pub use error::{MmuErrorType, SimError};
pub use fifo::GenericFifo;
