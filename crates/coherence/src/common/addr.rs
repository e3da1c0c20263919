//! Address and identifier types.
//!
//! Strong types prevent accidental mixing of the three address-like spaces
//! that travel through the coherence engine:
//! 1. **Virtual addresses** issued by the processor (32 bits).
//! 2. **Physical addresses** produced by the MMU (up to 40 bits).
//! 3. **Line numbers** (`nline`), the unit the coherence protocol speaks.
//!
//! It also defines the tile coordinate and the two global identities: the
//! `SrcId` used on the direct network and the `CcId` used on the coherence
//! networks.

use serde::Deserialize;

/// A virtual address as issued by a processor core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub u32);

/// A physical address after MMU translation (N-bit, typically 40).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

/// A cache-line number: the physical address right-shifted by
/// `log2(words_per_line) + 2`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NLine(pub u64);

impl VirtAddr {
    /// Returns the raw 32-bit value.
    #[inline(always)]
    pub const fn val(self) -> u32 {
        self.0
    }

    /// PT1 index: bits `[31:21]` of the virtual address (2 MiB granularity).
    #[inline]
    pub const fn pt1_index(self) -> u32 {
        self.0 >> 21
    }

    /// PT2 index: bits `[20:12]` of the virtual address (4 KiB granularity).
    #[inline]
    pub const fn pt2_index(self) -> u32 {
        (self.0 >> 12) & 0x1FF
    }
}

impl PhysAddr {
    /// Returns the raw value.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// The line number of this address for lines of `words` 32-bit words.
    #[inline]
    pub fn nline(self, words: usize) -> NLine {
        NLine(self.0 / ((words as u64) << 2))
    }

    /// Word index of this address inside a line of `words` words.
    #[inline]
    pub fn word_of_line(self, words: usize) -> usize {
        ((self.0 >> 2) as usize) & (words - 1)
    }

    /// Masks the byte offset inside a line of `words` words.
    #[inline]
    pub fn line_base(self, words: usize) -> Self {
        Self(self.0 & !(((words as u64) << 2) - 1))
    }
}

impl NLine {
    /// Returns the raw line number.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Base physical address of this line for lines of `words` words.
    #[inline]
    pub fn base(self, words: usize) -> PhysAddr {
        PhysAddr(self.0 * ((words as u64) << 2))
    }
}

/// A tile position on the 2D mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct TileCoord {
    /// Column index.
    pub x: u32,
    /// Row index.
    pub y: u32,
}

impl TileCoord {
    /// Packs the coordinate into a tile index: `(x << y_width) | y`.
    #[inline]
    pub const fn index(self, y_width: u32) -> u32 {
        (self.x << y_width) | self.y
    }

    /// Unpacks a tile index produced by [`Self::index`].
    #[inline]
    pub const fn from_index(index: u32, y_width: u32) -> Self {
        Self {
            x: index >> y_width,
            y: index & ((1 << y_width) - 1),
        }
    }
}

/// Global initiator identity on the direct network:
/// `(tile_index << l_width) | local_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SrcId(pub u32);

/// Global cache identity on the coherence networks:
/// `(tile_index << l_width) | proc_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CcId(pub u32);

impl SrcId {
    /// Builds a global source id from a tile index and a local initiator id.
    #[inline]
    pub const fn new(tile: u32, local: u32, l_width: u32) -> Self {
        Self((tile << l_width) | local)
    }

    /// Tile index part of the id.
    #[inline]
    pub const fn tile(self, l_width: u32) -> u32 {
        self.0 >> l_width
    }

    /// Local initiator id within the tile.
    #[inline]
    pub const fn local(self, l_width: u32) -> u32 {
        self.0 & ((1 << l_width) - 1)
    }
}

impl CcId {
    /// Builds a global cache id from a tile index and a local processor id.
    #[inline]
    pub const fn new(tile: u32, proc: u32, l_width: u32) -> Self {
        Self((tile << l_width) | proc)
    }

    /// Tile index part of the id.
    #[inline]
    pub const fn tile(self, l_width: u32) -> u32 {
        self.0 >> l_width
    }

    /// Local processor id within the tile.
    #[inline]
    pub const fn local(self, l_width: u32) -> u32 {
        self.0 & ((1 << l_width) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nline_roundtrip() {
        let addr = PhysAddr(0x00_0010_0040);
        let nline = addr.nline(16);
        assert_eq!(nline.base(16), PhysAddr(0x00_0010_0040));
        assert_eq!(addr.word_of_line(16), 0);

        let addr = PhysAddr(0x00_0010_0058);
        assert_eq!(addr.nline(16), nline);
        assert_eq!(addr.word_of_line(16), 6);
        assert_eq!(addr.line_base(16), PhysAddr(0x00_0010_0040));
    }

    #[test]
    fn tile_index_packing() {
        let c = TileCoord { x: 2, y: 3 };
        assert_eq!(c.index(2), 0b1011);
        assert_eq!(TileCoord::from_index(0b1011, 2), c);
    }

    #[test]
    fn srcid_fields() {
        let id = SrcId::new(5, 2, 4);
        assert_eq!(id.0, (5 << 4) | 2);
        assert_eq!(id.tile(4), 5);
        assert_eq!(id.local(4), 2);
    }
}
