//! Channel port bundles.
//!
//! A component never owns a network; each cycle the platform lends it a
//! port bundle giving access to the five channels plus the address map.
//! Pushes land in the channels' staging area and become visible at the
//! next cycle boundary.

use crate::noc::Channel;
use crate::soc::map::{AddressMap, CmdTarget};
use crate::vci::{VciCmd, VciRsp};

/// The five networks and the address map, as seen by one component.
pub struct Ports<'a> {
    /// Direct command channel (dest: tile L2 or I/O device endpoint).
    pub cmd: &'a mut Channel<VciCmd>,
    /// Direct response channel (dest: initiator endpoint).
    pub rsp: &'a mut Channel<VciRsp>,
    /// Memory-to-processor coherence channel (dest: L1 endpoint).
    pub m2p: &'a mut Channel<u64>,
    /// Processor-to-memory coherence channel (dest: tile endpoint).
    pub p2m: &'a mut Channel<u64>,
    /// Cleanup-acknowledge channel (dest: L1 endpoint).
    pub clack: &'a mut Channel<u64>,
    /// Address decoding and endpoint routing.
    pub map: &'a AddressMap,
}

impl Ports<'_> {
    /// Routes a direct command to its target by address. An unmapped
    /// address yields an immediate error response, as the default bus
    /// target would.
    pub fn send_cmd(&mut self, cmd: VciCmd) {
        let tiles = self.map.tiles();
        match self.map.decode(cmd.address) {
            CmdTarget::MemCache(tile) => self.cmd.push(l2_cmd_endpoint(tile), cmd),
            CmdTarget::Tty => self.cmd.push(tty_cmd_endpoint(tiles), cmd),
            CmdTarget::Disk => self.cmd.push(disk_cmd_endpoint(tiles), cmd),
            CmdTarget::Exit => self.cmd.push(exit_cmd_endpoint(tiles), cmd),
            CmdTarget::Unmapped => {
                let ep = self.map.rsp_endpoint(cmd.srcid);
                self.rsp.push(
                    ep,
                    VciRsp {
                        rsrcid: cmd.srcid,
                        rtrdid: cmd.trdid,
                        rpktid: cmd.pktid,
                        rerror: true,
                        rdata: vec![0],
                    },
                );
            }
        }
    }
}

/// Direct-command endpoint index of a tile's L2.
#[inline]
pub const fn l2_cmd_endpoint(tile: u32) -> usize {
    tile as usize
}

/// Direct-command endpoint index of the TTY (after all tiles).
#[inline]
pub const fn tty_cmd_endpoint(tiles: u32) -> usize {
    tiles as usize
}

/// Direct-command endpoint index of the block device register file.
#[inline]
pub const fn disk_cmd_endpoint(tiles: u32) -> usize {
    tiles as usize + 1
}

/// Direct-command endpoint index of the simulator-exit register.
#[inline]
pub const fn exit_cmd_endpoint(tiles: u32) -> usize {
    tiles as usize + 2
}

/// Total number of direct-command endpoints.
#[inline]
pub const fn cmd_endpoints(tiles: u32) -> usize {
    tiles as usize + 3
}
