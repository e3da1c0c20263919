//! Processor-side interface of the L1 wrapper.
//!
//! The CPU instruction-set simulator is an external collaborator; the
//! wrapper sees it only through the request/response structures defined
//! here, sampled once per cycle:
//! 1. **Instruction port:** [`InstructionRequest`] / [`InstructionResponse`].
//! 2. **Data port:** [`DataRequest`] / [`DataResponse`], including the XTN
//!    maintenance opcodes issued as `XtnRead`/`XtnWrite` accesses.
//! 3. **Driver:** the [`Processor`] trait and a [`ScriptedProcessor`] used
//!    by the CLI smoke workloads and the test harness.

use crate::common::VirtAddr;

/// Processor privilege mode, as presented on the request ports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Unprivileged execution; PTE `U` and XTN privilege checks apply.
    User,
    /// Privileged execution.
    #[default]
    Kernel,
}

/// Data port operation kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataOp {
    /// Data load.
    #[default]
    Read,
    /// Data store.
    Write,
    /// Linked load.
    Ll,
    /// Store conditional.
    Sc,
    /// Extension register read (error registers, MMU registers).
    XtnRead,
    /// Extension operation (cache/TLB maintenance, MMU register writes).
    XtnWrite,
}

/// Extension opcodes, encoded in the data request address as `opcode * 4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum XtnOp {
    /// Write the page-table pointer register; flushes both TLBs.
    Ptpr = 0,
    /// Write the MMU mode register.
    TlbMode = 1,
    /// Flush the whole instruction cache (with cleanups).
    IcacheFlush = 2,
    /// Flush the whole data cache (with cleanups).
    DcacheFlush = 3,
    /// Invalidate one I-TLB entry by virtual address.
    ItlbInval = 4,
    /// Invalidate one D-TLB entry by virtual address.
    DtlbInval = 5,
    /// Invalidate one instruction cache line by virtual address.
    IcacheInval = 6,
    /// Invalidate one data cache line by virtual address.
    DcacheInval = 7,
    /// Block until the write buffer is empty.
    Sync = 8,
    /// Read the instruction error type register (`ietr`).
    InsErrorType = 9,
    /// Read the data error type register (`detr`).
    DataErrorType = 10,
    /// Read the faulting instruction address register (`ibvar`).
    InsBadVaddr = 11,
    /// Read the faulting data address register (`dbvar`).
    DataBadVaddr = 12,
    /// Write the MMU misc word (low half).
    MmuWordLo = 13,
    /// Write the MMU misc word (high half).
    MmuWordHi = 14,
    /// Invalidate one instruction cache line by physical address
    /// (taken from the MMU word registers).
    IcacheInvalPa = 15,
    /// Invalidate one data cache line by physical address.
    DcacheInvalPa = 16,
    /// Clear the LL/SC reservation.
    LlReset = 17,
    /// Write the data physical-address extension register (address bits
    /// above 32 when the DTLB is off).
    DataPaddrExt = 18,
    /// Write the instruction physical-address extension register.
    InstPaddrExt = 19,
}

impl XtnOp {
    /// Decodes an opcode from a data request address.
    pub const fn from_addr(addr: u32) -> Option<Self> {
        match addr / 4 {
            0 => Some(Self::Ptpr),
            1 => Some(Self::TlbMode),
            2 => Some(Self::IcacheFlush),
            3 => Some(Self::DcacheFlush),
            4 => Some(Self::ItlbInval),
            5 => Some(Self::DtlbInval),
            6 => Some(Self::IcacheInval),
            7 => Some(Self::DcacheInval),
            8 => Some(Self::Sync),
            9 => Some(Self::InsErrorType),
            10 => Some(Self::DataErrorType),
            11 => Some(Self::InsBadVaddr),
            12 => Some(Self::DataBadVaddr),
            13 => Some(Self::MmuWordLo),
            14 => Some(Self::MmuWordHi),
            15 => Some(Self::IcacheInvalPa),
            16 => Some(Self::DcacheInvalPa),
            17 => Some(Self::LlReset),
            18 => Some(Self::DataPaddrExt),
            19 => Some(Self::InstPaddrExt),
            _ => None,
        }
    }

    /// The request address encoding this opcode.
    pub const fn addr(self) -> VirtAddr {
        VirtAddr((self as u32) * 4)
    }

    /// XTN operations permitted in user mode.
    pub const fn user_allowed(self) -> bool {
        matches!(
            self,
            Self::Sync
                | Self::IcacheFlush
                | Self::DcacheFlush
                | Self::IcacheInval
                | Self::DcacheInval
        )
    }
}

/// Instruction fetch request, valid for one cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstructionRequest {
    /// `true` if the processor requests a fetch this cycle.
    pub valid: bool,
    /// Fetch address.
    pub addr: VirtAddr,
    /// Privilege mode of the fetch.
    pub mode: Mode,
}

/// Instruction fetch response.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstructionResponse {
    /// `true` if the fetch completed this cycle.
    pub valid: bool,
    /// `true` if the fetch faulted (details in `ietr`/`ibvar`).
    pub error: bool,
    /// Fetched instruction word.
    pub instruction: u32,
}

/// Data access request, valid for one cycle (held until acknowledged).
#[derive(Clone, Copy, Debug, Default)]
pub struct DataRequest {
    /// `true` if the processor requests an access this cycle.
    pub valid: bool,
    /// Operation kind.
    pub op: DataOp,
    /// Access address (or XTN opcode encoding).
    pub addr: VirtAddr,
    /// Store data.
    pub wdata: u32,
    /// Per-byte enables for stores.
    pub be: u8,
    /// Privilege mode of the access.
    pub mode: Mode,
}

/// Data access response.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataResponse {
    /// `true` if the access completed this cycle.
    pub valid: bool,
    /// `true` if the access faulted (details in `detr`/`dbvar`).
    pub error: bool,
    /// Load data, SC status (0 success / 1 failure), or XTN read value.
    pub rdata: u32,
}

/// The CPU seen from the wrapper: produces requests, consumes responses.
pub trait Processor {
    /// Requests presented this cycle. A request must be held stable until
    /// the matching response arrives.
    fn requests(&self) -> (InstructionRequest, DataRequest);

    /// Responses sampled at the end of the cycle. `wberr` reports an
    /// asynchronous write bus error.
    fn responses(&mut self, irsp: &InstructionResponse, drsp: &DataResponse, wberr: bool);

    /// Returns this driver as a [`ScriptedProcessor`] if it is one; used
    /// by harnesses to inspect completed operations.
    fn as_scripted_mut(&mut self) -> Option<&mut ScriptedProcessor> {
        None
    }
}

/// One step of a scripted workload.
#[derive(Clone, Copy, Debug)]
pub enum ScriptOp {
    /// Issue a data request and wait for its response.
    Data(DataRequest),
    /// Issue an instruction fetch and wait for its response.
    Fetch(InstructionRequest),
    /// Stay idle for the given number of cycles.
    Idle(u32),
}

/// A deterministic processor driver running a fixed list of operations.
///
/// Used by the test harness and the CLI smoke workload; it keeps every
/// completed response for inspection.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    script: Vec<ScriptOp>,
    position: usize,
    idle_left: u32,
    /// Responses to completed data operations, in script order.
    pub data_log: Vec<DataResponse>,
    /// Responses to completed fetches, in script order.
    pub fetch_log: Vec<InstructionResponse>,
    /// Count of asynchronous write bus errors observed.
    pub write_errors: u32,
}

impl ScriptedProcessor {
    /// Creates a driver for the given script.
    pub fn new(script: Vec<ScriptOp>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// `true` once every scripted operation has completed.
    pub fn finished(&self) -> bool {
        self.position >= self.script.len()
    }
}

impl Processor for ScriptedProcessor {
    fn requests(&self) -> (InstructionRequest, DataRequest) {
        let mut ireq = InstructionRequest::default();
        let mut dreq = DataRequest::default();
        if self.idle_left == 0 {
            match self.script.get(self.position) {
                Some(ScriptOp::Data(req)) => dreq = *req,
                Some(ScriptOp::Fetch(req)) => ireq = *req,
                _ => {}
            }
        }
        (ireq, dreq)
    }

    fn responses(&mut self, irsp: &InstructionResponse, drsp: &DataResponse, wberr: bool) {
        if wberr {
            self.write_errors += 1;
        }
        if self.idle_left > 0 {
            self.idle_left -= 1;
            if self.idle_left == 0 {
                self.position += 1;
            }
            return;
        }
        match self.script.get(self.position) {
            Some(ScriptOp::Data(_)) if drsp.valid => {
                self.data_log.push(*drsp);
                self.position += 1;
            }
            Some(ScriptOp::Fetch(_)) if irsp.valid => {
                self.fetch_log.push(*irsp);
                self.position += 1;
            }
            Some(ScriptOp::Idle(n)) => {
                // first cycle of an idle window
                self.idle_left = n.saturating_sub(1);
                if self.idle_left == 0 {
                    self.position += 1;
                }
            }
            _ => {}
        }
    }

    fn as_scripted_mut(&mut self) -> Option<&mut ScriptedProcessor> {
        Some(self)
    }
}
