//! Block device.
//!
//! Memory-mapped disk controller with a DMA engine. Nine 32-bit
//! registers:
//!
//! - `BUFFER`     0x00 (read/write) memory buffer base address, low bits
//! - `COUNT`      0x04 (read/write) number of blocks to transfer
//! - `LBA`        0x08 (read/write) index of the first block
//! - `OP`         0x0C (write-only) writing here starts the operation
//! - `STATUS`     0x10 (read-only)  controller status
//! - `IRQ_ENABLE` 0x14 (read/write) IRQ raised on completion if non-zero
//! - `SIZE`       0x18 (read-only)  number of addressable blocks
//! - `BLOCK_SIZE` 0x1C (read-only)  block size in bytes
//! - `BUFFER_EXT` 0x20 (read/write) memory buffer base address, high bits
//!
//! Operations are `NOOP`, `READ` (device to memory) and `WRITE` (memory
//! to device). The status walks IDLE → BUSY → {READ,WRITE}_{SUCCESS,ERROR};
//! reading `STATUS` in a terminal state returns the controller to IDLE and
//! deasserts the IRQ. The DMA engine transfers one burst per round trip
//! on the direct network, never crossing a cache-line boundary.

use crate::common::{PhysAddr, SrcId};
use crate::sim::ports::Ports;
use crate::vci::{CmdWord, PktId, VciCmd, VciCmdOp, VciRsp};

/// `BUFFER` register offset.
pub const REG_BUFFER: u64 = 0x00;
/// `COUNT` register offset.
pub const REG_COUNT: u64 = 0x04;
/// `LBA` register offset.
pub const REG_LBA: u64 = 0x08;
/// `OP` register offset.
pub const REG_OP: u64 = 0x0C;
/// `STATUS` register offset.
pub const REG_STATUS: u64 = 0x10;
/// `IRQ_ENABLE` register offset.
pub const REG_IRQ_ENABLE: u64 = 0x14;
/// `SIZE` register offset.
pub const REG_SIZE: u64 = 0x18;
/// `BLOCK_SIZE` register offset.
pub const REG_BLOCK_SIZE: u64 = 0x1C;
/// `BUFFER_EXT` register offset.
pub const REG_BUFFER_EXT: u64 = 0x20;

/// `OP` register values.
pub mod op {
    /// No operation.
    pub const NOOP: u32 = 0;
    /// Device to memory.
    pub const READ: u32 = 1;
    /// Memory to device.
    pub const WRITE: u32 = 2;
}

/// `STATUS` register values.
pub mod status {
    /// Ready for a new operation.
    pub const IDLE: u32 = 0;
    /// Transfer in progress.
    pub const BUSY: u32 = 1;
    /// Read completed.
    pub const READ_SUCCESS: u32 = 2;
    /// Write completed.
    pub const WRITE_SUCCESS: u32 = 3;
    /// Read failed.
    pub const READ_ERROR: u32 = 4;
    /// Write failed.
    pub const WRITE_ERROR: u32 = 5;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum DmaDir {
    #[default]
    ToMemory,
    FromMemory,
}

/// The block device controller.
pub struct BlockDevice {
    srcid: SrcId,
    block_size: u32,
    burst_size: u32,

    image: Vec<u8>,
    buffer: u32,
    buffer_ext: u32,
    count: u32,
    lba: u32,
    irq_enable: u32,
    status: u32,
    irq: bool,

    // DMA engine
    dir: DmaDir,
    bytes_done: u32,
    bytes_total: u32,
    awaiting_rsp: bool,
    burst_len: u32,
}

impl BlockDevice {
    /// Creates a controller over `image`, with the given geometry.
    pub fn new(srcid: SrcId, image: Vec<u8>, block_size: u32, burst_size: u32) -> Self {
        Self {
            srcid,
            block_size,
            burst_size,
            image,
            buffer: 0,
            buffer_ext: 0,
            count: 0,
            lba: 0,
            irq_enable: 0,
            status: status::IDLE,
            irq: false,
            dir: DmaDir::ToMemory,
            bytes_done: 0,
            bytes_total: 0,
            awaiting_rsp: false,
            burst_len: 0,
        }
    }

    /// Current IRQ line level.
    pub const fn irq(&self) -> bool {
        self.irq
    }

    /// Disk image contents (test harness interface).
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// One cycle: serve at most one register access, then advance the DMA
    /// engine.
    pub fn step(&mut self, reg_endpoint: usize, ports: &mut Ports<'_>) {
        if let Some(cmd) = ports.cmd.pop(reg_endpoint) {
            let offset = ports.map.segment_offset(cmd.address);
            let rdata = self.reg_access(offset, &cmd);
            let ep = ports.map.rsp_endpoint(cmd.srcid);
            ports.rsp.push(
                ep,
                VciRsp {
                    rsrcid: cmd.srcid,
                    rtrdid: cmd.trdid,
                    rpktid: cmd.pktid,
                    rerror: false,
                    rdata,
                },
            );
        }
        self.dma_step(ports);
    }

    fn reg_access(&mut self, offset: u64, cmd: &VciCmd) -> Vec<u32> {
        if let Some(word) = cmd.words.first() {
            // register write; OP starts the transfer
            match offset {
                REG_BUFFER => self.buffer = word.wdata,
                REG_BUFFER_EXT => self.buffer_ext = word.wdata,
                REG_COUNT => self.count = word.wdata,
                REG_LBA => self.lba = word.wdata,
                REG_IRQ_ENABLE => self.irq_enable = word.wdata,
                REG_OP if self.status == status::IDLE => self.start(word.wdata),
                _ => {}
            }
            vec![0]
        } else {
            let value = match offset {
                REG_BUFFER => self.buffer,
                REG_BUFFER_EXT => self.buffer_ext,
                REG_COUNT => self.count,
                REG_LBA => self.lba,
                REG_IRQ_ENABLE => self.irq_enable,
                REG_SIZE => (self.image.len() as u32) / self.block_size,
                REG_BLOCK_SIZE => self.block_size,
                REG_STATUS => {
                    let s = self.status;
                    if s != status::IDLE && s != status::BUSY {
                        // terminal status read returns to IDLE and
                        // acknowledges the IRQ
                        self.status = status::IDLE;
                        self.irq = false;
                    }
                    s
                }
                _ => 0,
            };
            vec![value]
        }
    }

    fn start(&mut self, op_value: u32) {
        let dir = match op_value {
            op::READ => DmaDir::ToMemory,
            op::WRITE => DmaDir::FromMemory,
            _ => return,
        };
        let total_blocks = (self.image.len() as u32) / self.block_size;
        if self.lba + self.count > total_blocks {
            self.status = if dir == DmaDir::ToMemory {
                status::READ_ERROR
            } else {
                status::WRITE_ERROR
            };
            self.irq = self.irq_enable != 0;
            return;
        }
        self.dir = dir;
        self.bytes_done = 0;
        self.bytes_total = self.count * self.block_size;
        self.awaiting_rsp = false;
        self.status = status::BUSY;
    }

    fn buffer_addr(&self) -> PhysAddr {
        PhysAddr((u64::from(self.buffer_ext) << 32) | u64::from(self.buffer))
    }

    fn disk_offset(&self) -> usize {
        (self.lba * self.block_size + self.bytes_done) as usize
    }

    fn dma_step(&mut self, ports: &mut Ports<'_>) {
        if self.status != status::BUSY {
            return;
        }

        if self.awaiting_rsp {
            let ep = ports.map.rsp_endpoint(self.srcid);
            let Some(rsp) = ports.rsp.pop(ep) else {
                return;
            };
            if rsp.rerror {
                self.status = if self.dir == DmaDir::ToMemory {
                    status::READ_ERROR
                } else {
                    status::WRITE_ERROR
                };
                self.irq = self.irq_enable != 0;
                return;
            }
            if self.dir == DmaDir::FromMemory {
                let base = self.disk_offset();
                for (i, word) in rsp.rdata.iter().enumerate() {
                    self.image[base + i * 4..base + i * 4 + 4]
                        .copy_from_slice(&word.to_le_bytes());
                }
            }
            self.bytes_done += self.burst_len;
            self.awaiting_rsp = false;
            if self.bytes_done == self.bytes_total {
                self.status = if self.dir == DmaDir::ToMemory {
                    status::READ_SUCCESS
                } else {
                    status::WRITE_SUCCESS
                };
                self.irq = self.irq_enable != 0;
            }
            return;
        }

        // issue the next burst, clipped at the cache-line boundary
        let addr = PhysAddr(self.buffer_addr().val() + u64::from(self.bytes_done));
        let line_bytes = 64u64;
        let to_line_end = line_bytes - (addr.val() % line_bytes);
        let remaining = u64::from(self.bytes_total - self.bytes_done);
        let burst = u64::from(self.burst_size).min(to_line_end).min(remaining) as u32;
        self.burst_len = burst;

        match self.dir {
            DmaDir::ToMemory => {
                let base = self.disk_offset();
                let words: Vec<CmdWord> = (0..burst / 4)
                    .map(|i| {
                        let o = base + (i * 4) as usize;
                        CmdWord {
                            wdata: u32::from_le_bytes([
                                self.image[o],
                                self.image[o + 1],
                                self.image[o + 2],
                                self.image[o + 3],
                            ]),
                            be: 0xF,
                        }
                    })
                    .collect();
                ports.send_cmd(VciCmd {
                    op: VciCmdOp::Write,
                    address: addr,
                    srcid: self.srcid,
                    trdid: 0,
                    pktid: PktId::Write,
                    plen: burst,
                    words,
                });
            }
            DmaDir::FromMemory => {
                ports.send_cmd(VciCmd::read(PktId::DataUnc, addr, burst, self.srcid, 0));
            }
        }
        self.awaiting_rsp = true;
    }
}
