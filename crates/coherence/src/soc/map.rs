//! Physical memory map.
//!
//! The high `x_width + y_width` address bits select the home tile; the
//! bits below select a 1 MiB-aligned segment inside the tile. Segment 0 of
//! every tile is its L2-backed RAM; the I/O tile additionally owns the
//! TTY, the block device and the simulator-exit register. A cacheability
//! table derived from the segment attributes tells the L1 whether a read
//! may be cached.

use crate::common::{CcId, PhysAddr, SrcId, TileCoord};
use crate::config::Config;

/// Local segment index of the per-tile RAM.
pub const SEG_RAM: u64 = 0;
/// Local segment index of the TTY (I/O tile only).
pub const SEG_TTY: u64 = 1;
/// Local segment index of the block device (I/O tile only).
pub const SEG_DISK: u64 = 2;
/// Local segment index of the simulator-exit register (I/O tile only).
pub const SEG_EXIT: u64 = 3;

/// Destination of a direct-network command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdTarget {
    /// The L2 memory cache of a tile.
    MemCache(u32),
    /// The TTY device.
    Tty,
    /// The block device register file.
    Disk,
    /// The simulator-exit register.
    Exit,
    /// No device claims the address (bus error).
    Unmapped,
}

/// Address decoding and endpoint routing for one platform instance.
#[derive(Clone, Debug)]
pub struct AddressMap {
    paddr_width: u32,
    x_width: u32,
    y_width: u32,
    l_width: u32,
    x_size: u32,
    y_size: u32,
    procs_per_tile: usize,
    segment_size: u64,
    io_tile: u32,
}

impl AddressMap {
    /// Builds the map from the platform configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            paddr_width: config.topology.paddr_width,
            x_width: config.topology.x_width,
            y_width: config.topology.y_width,
            l_width: config.topology.l_width,
            x_size: config.topology.x_size,
            y_size: config.topology.y_size,
            procs_per_tile: config.topology.procs_per_tile,
            segment_size: config.soc.segment_size,
            io_tile: config.soc.io_tile,
        }
    }

    /// Number of populated tiles.
    #[inline]
    pub const fn tiles(&self) -> u32 {
        self.x_size * self.y_size
    }

    /// Processors per tile.
    #[inline]
    pub const fn procs_per_tile(&self) -> usize {
        self.procs_per_tile
    }

    /// Local-id width shared by `srcid` and `cc_id`.
    #[inline]
    pub const fn l_width(&self) -> u32 {
        self.l_width
    }

    /// Home tile of a physical address.
    ///
    /// The populated mesh fills the coordinate space (validated at
    /// configuration time), so the high address bits are the tile index.
    #[inline]
    pub fn home_tile(&self, addr: PhysAddr) -> u32 {
        let shift = self.paddr_width - self.x_width - self.y_width;
        ((addr.val() >> shift) as u32) & (self.tiles() - 1)
    }

    /// Mesh coordinate of a tile index.
    #[inline]
    pub const fn tile_coord(&self, tile: u32) -> TileCoord {
        TileCoord::from_index(tile, self.y_width)
    }

    /// Base address of a tile's RAM segment.
    pub fn tile_ram_base(&self, tile: u32) -> PhysAddr {
        let shift = self.paddr_width - self.x_width - self.y_width;
        PhysAddr((u64::from(tile)) << shift)
    }

    /// Base address of a local segment on a tile.
    pub fn segment_base(&self, tile: u32, segment: u64) -> PhysAddr {
        PhysAddr(self.tile_ram_base(tile).val() + segment * self.segment_size)
    }

    /// Segment size in bytes.
    #[inline]
    pub const fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Decodes the target of a direct-network command.
    pub fn decode(&self, addr: PhysAddr) -> CmdTarget {
        let tile = self.home_tile(addr);
        let local = addr.val() - self.tile_ram_base(tile).val();
        let segment = local / self.segment_size;
        match segment {
            SEG_RAM => CmdTarget::MemCache(tile),
            SEG_TTY if tile == self.io_tile => CmdTarget::Tty,
            SEG_DISK if tile == self.io_tile => CmdTarget::Disk,
            SEG_EXIT if tile == self.io_tile => CmdTarget::Exit,
            _ => CmdTarget::Unmapped,
        }
    }

    /// Offset of an address inside its segment.
    pub fn segment_offset(&self, addr: PhysAddr) -> u64 {
        (addr.val() - self.tile_ram_base(self.home_tile(addr)).val()) % self.segment_size
    }

    /// Cacheability attribute of an address: only the per-tile RAM
    /// segments are cacheable.
    pub fn is_cacheable(&self, addr: PhysAddr) -> bool {
        matches!(self.decode(addr), CmdTarget::MemCache(_))
    }

    /// Global source id of processor `proc` on `tile`.
    #[inline]
    pub const fn proc_srcid(&self, tile: u32, proc: u32) -> SrcId {
        SrcId::new(tile, proc, self.l_width)
    }

    /// Global cache id of processor `proc` on `tile`.
    #[inline]
    pub const fn proc_ccid(&self, tile: u32, proc: u32) -> CcId {
        CcId::new(tile, proc, self.l_width)
    }

    /// Source id of the block device DMA initiator.
    pub const fn disk_srcid(&self) -> SrcId {
        SrcId::new(self.io_tile, self.procs_per_tile as u32, self.l_width)
    }

    /// Response-channel endpoint of an initiator. L1 wrappers come first,
    /// the block device initiator last.
    pub fn rsp_endpoint(&self, srcid: SrcId) -> usize {
        let tile = srcid.tile(self.l_width) as usize;
        let local = srcid.local(self.l_width) as usize;
        if local < self.procs_per_tile {
            tile * self.procs_per_tile + local
        } else {
            self.tiles() as usize * self.procs_per_tile
        }
    }

    /// Number of response-channel endpoints.
    pub fn rsp_endpoints(&self) -> usize {
        self.tiles() as usize * self.procs_per_tile + 1
    }

    /// M2P/CLACK endpoint of an L1, from its cache id.
    pub fn l1_endpoint(&self, cc_id: CcId) -> usize {
        cc_id.tile(self.l_width) as usize * self.procs_per_tile
            + cc_id.local(self.l_width) as usize
    }

    /// Number of L1 endpoints on the coherence channels.
    pub fn l1_endpoints(&self) -> usize {
        self.tiles() as usize * self.procs_per_tile
    }

    /// All L1 endpoints inside a broadcast bounding box.
    pub fn endpoints_in_box(
        &self,
        xmin: u32,
        xmax: u32,
        ymin: u32,
        ymax: u32,
    ) -> Vec<usize> {
        let mut out = Vec::new();
        for tile in 0..self.tiles() {
            let c = self.tile_coord(tile);
            if c.x >= xmin && c.x <= xmax && c.y >= ymin && c.y <= ymax {
                for proc in 0..self.procs_per_tile {
                    out.push(tile as usize * self.procs_per_tile + proc);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> AddressMap {
        AddressMap::new(&Config::default())
    }

    #[test]
    fn home_tile_from_high_bits() {
        let m = map();
        // paddr_width 40, x_width + y_width = 2: tile bits are [39:38]
        assert_eq!(m.home_tile(PhysAddr(0x00_0000_1000)), 0);
        assert_eq!(m.home_tile(PhysAddr(0x40_0000_1000)), 1);
        assert_eq!(m.tile_ram_base(1), PhysAddr(0x40_0000_0000));
    }

    #[test]
    fn io_segments_decode_on_io_tile_only() {
        let m = map();
        let tty = m.segment_base(0, SEG_TTY);
        assert_eq!(m.decode(tty), CmdTarget::Tty);
        assert!(!m.is_cacheable(tty));
        assert!(m.is_cacheable(PhysAddr(0x40)));

        // same segment index on a non-I/O tile is unmapped
        let not_tty = m.segment_base(1, SEG_TTY);
        assert_eq!(m.decode(not_tty), CmdTarget::Unmapped);
    }

    #[test]
    fn rsp_endpoints_are_dense() {
        let m = map();
        assert_eq!(m.rsp_endpoint(m.proc_srcid(0, 0)), 0);
        assert_eq!(m.rsp_endpoint(m.proc_srcid(0, 3)), 3);
        assert_eq!(m.rsp_endpoint(m.proc_srcid(1, 0)), 4);
        assert_eq!(m.rsp_endpoint(m.disk_srcid()), 16);
        assert_eq!(m.rsp_endpoints(), 17);
    }

    #[test]
    fn broadcast_box_selects_tiles() {
        let m = map();
        let eps = m.endpoints_in_box(0, 0, 0, 1);
        // tiles (0,0) and (0,1) → 8 L1 endpoints
        assert_eq!(eps.len(), 8);
    }
}
