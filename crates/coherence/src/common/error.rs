//! Error definitions.
//!
//! Two very different kinds of "error" exist in the engine:
//! 1. **Architectural errors** ([`MmuErrorType`]): values with a fixed
//!    hardware encoding, written to the per-CPU `ietr`/`detr` registers and
//!    reported to the processor through a faulting response. They are data,
//!    not Rust errors.
//! 2. **Simulator errors** ([`SimError`]): protocol assertion violations,
//!    frozen-FSM watchdog expiry and configuration mistakes. These abort the
//!    run with a diagnostic naming the tile, FSM and last state.

use thiserror::Error;

/// Architectural MMU error codes, as read from the `ietr`/`detr` registers.
///
/// The encoding is fixed by the hardware: bit 12 distinguishes read from
/// write accesses, the low bits identify the fault class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum MmuErrorType {
    /// No pending error.
    #[default]
    None = 0x0000,
    /// Write access and page fault on the first-level page table.
    WritePt1Unmapped = 0x0001,
    /// Write access and page fault on the second-level page table.
    WritePt2Unmapped = 0x0002,
    /// Write access to a protected page in user mode.
    WritePrivilegeViolation = 0x0004,
    /// Write access to a non-writable page.
    WriteAccessViolation = 0x0008,
    /// Write access with an undefined extension opcode.
    WriteUndefinedXtn = 0x0020,
    /// Bus error while fetching a first-level page table entry for a write.
    WritePt1IllegalAccess = 0x0040,
    /// Bus error while fetching a second-level page table entry for a write.
    WritePt2IllegalAccess = 0x0080,
    /// Bus error on the write access itself.
    WriteDataIllegalAccess = 0x0100,
    /// Read access and page fault on the first-level page table.
    ReadPt1Unmapped = 0x1001,
    /// Read access and page fault on the second-level page table.
    ReadPt2Unmapped = 0x1002,
    /// Read access to a protected page in user mode.
    ReadPrivilegeViolation = 0x1004,
    /// Instruction fetch from a non-executable page.
    ReadExecViolation = 0x1010,
    /// Read access with an undefined extension opcode.
    ReadUndefinedXtn = 0x1020,
    /// Bus error while fetching a first-level page table entry for a read.
    ReadPt1IllegalAccess = 0x1040,
    /// Bus error while fetching a second-level page table entry for a read.
    ReadPt2IllegalAccess = 0x1080,
    /// Bus error on the read access itself.
    ReadDataIllegalAccess = 0x1100,
}

impl MmuErrorType {
    /// The raw register encoding of this error.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Fatal simulator errors.
///
/// Any of these terminates the simulation; the protocol variants carry a
/// diagnostic naming the tile, the FSM and its last state.
#[derive(Debug, Error)]
pub enum SimError {
    /// A protocol invariant was violated (unexpected packet length, unknown
    /// flit type, inconsistent directory state, ...).
    #[error("protocol violation in tile {tile} {fsm} (state {state}): {detail}")]
    Protocol {
        /// Tile index where the violation was detected.
        tile: u32,
        /// Name of the FSM that detected it.
        fsm: &'static str,
        /// Last state of that FSM.
        state: &'static str,
        /// Human-readable description.
        detail: String,
    },

    /// A processor request has been pending beyond `max_frozen_cycles`.
    #[error("processor {proc} in tile {tile} frozen for {cycles} cycles ({fsm} stuck in {state})")]
    Frozen {
        /// Tile index of the frozen wrapper.
        tile: u32,
        /// Local processor id.
        proc: u32,
        /// Number of consecutive frozen cycles.
        cycles: u32,
        /// FSM that is stuck.
        fsm: &'static str,
        /// State it is stuck in.
        state: &'static str,
    },

    /// Invalid configuration (non-power-of-two geometry, overlapping
    /// segments, out-of-range widths).
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SimError {
    /// Shorthand for a protocol violation.
    pub fn protocol(
        tile: u32,
        fsm: &'static str,
        state: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            tile,
            fsm,
            state,
            detail: detail.into(),
        }
    }
}
