//! TTY character device.
//!
//! Write-only terminal used by boot code for diagnostics. Three 32-bit
//! registers: `WRITE` (a stored byte), `STATUS` (always ready), `READ`
//! (no input modelled, reads as zero).

use crate::sim::ports::Ports;
use crate::vci::{VciCmd, VciRsp};

/// `WRITE` register offset.
pub const TTY_WRITE: u64 = 0x0;
/// `STATUS` register offset.
pub const TTY_STATUS: u64 = 0x4;
/// `READ` register offset.
pub const TTY_READ: u64 = 0x8;

/// The TTY device.
#[derive(Debug, Default)]
pub struct Tty {
    /// Every byte written so far, in order.
    pub output: Vec<u8>,
}

impl Tty {
    /// Serves at most one command per cycle at `endpoint`.
    pub fn step(&mut self, endpoint: usize, ports: &mut Ports<'_>) {
        let Some(cmd) = ports.cmd.pop(endpoint) else {
            return;
        };
        let offset = ports.map.segment_offset(cmd.address);
        let rdata = self.access(offset, &cmd);
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

    fn access(&mut self, offset: u64, cmd: &VciCmd) -> Vec<u32> {
        if let Some(word) = cmd.words.first() {
            if offset == TTY_WRITE {
                self.output.push((word.wdata & 0xFF) as u8);
            }
            vec![0]
        } else {
            let value = match offset {
                TTY_STATUS => 0, // transmitter always ready, no input
                _ => 0,
            };
            vec![value]
        }
    }

    /// The text written so far, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}
