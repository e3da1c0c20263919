//! Coherence flit codec.
//!
//! Bit-exact pack/unpack for the three coherence channels. This module is
//! the only place in the crate where flit shift/mask arithmetic exists;
//! every other component goes through [`get`] and [`set`] with a named
//! [`FlitField`].
//!
//! Packet layouts (all field widths fixed):
//!
//! P2M channel, 33-bit flits:
//!
//! ```text
//! CLEANUP flit 1:
//! EOP:0 | DEST(10) | SRCID(14) | NLINE_MSB(2) | x | WAY_INDEX(2) | TYPE:0b1X | BC:0
//! CLEANUP flit 2:
//! EOP:1 | NLINE_LSB(32)
//!
//! MULTI_ACK (single flit):
//! EOP:1 | DEST(10) | x(15) | UPDT_INDEX(4) | TYPE:0b00 | BC:0
//! ```
//!
//! M2P channel, 40-bit flits:
//!
//! ```text
//! MULTI_UPDT flit 1:
//! EOP:0 | DEST(14) | x(4) | MEMC_ID(14) | UPDT_INDEX(4) | TYPE:0b0X | BC:0
//! MULTI_UPDT flit 2:
//! EOP:0 | x | WORD_INDEX(4) | NLINE(34)
//! MULTI_UPDT flit 3..N:
//! EOP:0/1 | x(3) | BE(4) | WDATA(32)
//!
//! MULTI_INVAL flit 1:  same header with TYPE:0b1X
//! MULTI_INVAL flit 2:  EOP:1 | x(5) | NLINE(34)
//!
//! BROADCAST_INVAL flit 1:
//! EOP:0 | XMIN|XMAX|YMIN|YMAX (20) | MEMC_ID(14) | reserved(4) | BC:1
//! BROADCAST_INVAL flit 2:  EOP:1 | x(5) | NLINE(34)
//! ```
//!
//! CLACK channel, 40-bit single flit:
//!
//! ```text
//! EOP:1 | DEST(14) | x(5) | SET_INDEX(16) | WAY_INDEX(2) | TYPE(1) | BC:0
//! ```
//!
//! In `TYPE` fields, `X = 0` selects the data cache and `X = 1` the
//! instruction cache.

/// M2P flit width in bits.
pub const M2P_FLIT_WIDTH: u8 = 40;
/// P2M flit width in bits.
pub const P2M_FLIT_WIDTH: u8 = 33;
/// CLACK flit width in bits.
pub const CLACK_FLIT_WIDTH: u8 = 40;

const UPDT_INDEX_WIDTH: u8 = 4;
const NLINE_WIDTH: u8 = 34;
const SRCID_WIDTH: u8 = 14;
const GLOBALID_WIDTH: u8 = 10;
const WORD_INDEX_WIDTH: u8 = 4;
const BE_WIDTH: u8 = 4;
const DATA_WIDTH: u8 = 32;
const SET_INDEX_WIDTH: u8 = 16;
const WAY_INDEX_WIDTH: u8 = 2;
const BROADCAST_BOX_WIDTH: u8 = 20;
const M2P_TYPE_WIDTH: u8 = 2;
const P2M_TYPE_WIDTH: u8 = 2;
const CLACK_TYPE_WIDTH: u8 = 1;

/// P2M packet types (2-bit `TYPE` field).
pub mod p2m_type {
    /// Multicast update acknowledgement.
    pub const MULTI_ACK: u64 = 0;
    /// Data-cache cleanup.
    pub const CLEANUP_DATA: u64 = 2;
    /// Instruction-cache cleanup.
    pub const CLEANUP_INST: u64 = 3;
}

/// M2P packet types (2-bit `TYPE` field).
pub mod m2p_type {
    /// Data-cache multicast update.
    pub const MULTI_UPDT_DATA: u64 = 0;
    /// Instruction-cache multicast update.
    pub const MULTI_UPDT_INST: u64 = 1;
    /// Data-cache multicast invalidate.
    pub const MULTI_INVAL_DATA: u64 = 2;
    /// Instruction-cache multicast invalidate.
    pub const MULTI_INVAL_INST: u64 = 3;
}

/// CLACK packet types (1-bit `TYPE` field).
pub mod clack_type {
    /// Cleanup acknowledgement for a data cache.
    pub const CLACK_DATA: u64 = 0;
    /// Cleanup acknowledgement for an instruction cache.
    pub const CLACK_INST: u64 = 1;
}

/// Named flit fields.
///
/// Each variant selects one (shift, mask) pair; the prefix names the packet
/// family the field belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlitField {
    /// P2M 2-bit packet type.
    P2mType,
    /// P2M end-of-packet bit (bit 32).
    P2mEop,
    /// P2M broadcast bit (bit 0).
    P2mBc,

    /// CLEANUP destination (10-bit global id).
    CleanupDest,
    /// CLEANUP sender (14-bit cc id).
    CleanupSrcid,
    /// CLEANUP line number, two MSBs (first flit).
    CleanupNlineMsb,
    /// CLEANUP way of the cleaned slot.
    CleanupWayIndex,
    /// CLEANUP line number, 32 LSBs (second flit).
    CleanupNlineLsb,

    /// MULTI_ACK destination (10-bit global id).
    MultiAckDest,
    /// MULTI_ACK update table index.
    MultiAckUpdtIndex,

    /// M2P 2-bit packet type.
    M2pType,
    /// M2P end-of-packet bit (bit 39).
    M2pEop,
    /// M2P broadcast bit (bit 0).
    M2pBc,

    /// MULTI_INVAL destination (14-bit cc id).
    MultiInvalDest,
    /// MULTI_INVAL sender (14-bit memory-cache id).
    MultiInvalSrcid,
    /// MULTI_INVAL update table index.
    MultiInvalUpdtIndex,
    /// MULTI_INVAL line number (second flit).
    MultiInvalNline,

    /// MULTI_UPDT destination (14-bit cc id).
    MultiUpdtDest,
    /// MULTI_UPDT sender (14-bit memory-cache id).
    MultiUpdtSrcid,
    /// MULTI_UPDT update table index.
    MultiUpdtUpdtIndex,
    /// MULTI_UPDT first word index (second flit).
    MultiUpdtWordIndex,
    /// MULTI_UPDT line number (second flit).
    MultiUpdtNline,
    /// MULTI_UPDT byte enable (data flits).
    MultiUpdtBe,
    /// MULTI_UPDT data word (data flits).
    MultiUpdtData,

    /// CLACK 1-bit packet type.
    ClackType,
    /// CLACK destination (14-bit cc id).
    ClackDest,
    /// CLACK set index of the slot to release.
    ClackSet,
    /// CLACK way index of the slot to release.
    ClackWay,

    /// BROADCAST bounding box `XMIN|XMAX|YMIN|YMAX` (4×5 bits).
    BroadcastBox,
    /// BROADCAST sender (14-bit memory-cache id).
    BroadcastSrcid,
    /// BROADCAST line number (second flit).
    BroadcastNline,
}

const fn width_mask(width: u8) -> u64 {
    (1u64 << width) - 1
}

const fn field_spec(field: FlitField) -> (u8, u64) {
    use FlitField::*;
    match field {
        P2mType => (1, width_mask(P2M_TYPE_WIDTH)),
        P2mEop => (32, 1),
        P2mBc => (0, 1),

        CleanupDest => (22, width_mask(GLOBALID_WIDTH)),
        CleanupSrcid => (8, width_mask(SRCID_WIDTH)),
        CleanupNlineMsb => (6, width_mask(2)),
        CleanupWayIndex => (3, width_mask(WAY_INDEX_WIDTH)),
        CleanupNlineLsb => (0, width_mask(32)),

        MultiAckDest => (22, width_mask(GLOBALID_WIDTH)),
        MultiAckUpdtIndex => (3, width_mask(UPDT_INDEX_WIDTH)),

        M2pType => (1, width_mask(M2P_TYPE_WIDTH)),
        M2pEop => (39, 1),
        M2pBc => (0, 1),

        MultiInvalDest => (25, width_mask(SRCID_WIDTH)),
        MultiInvalSrcid => (7, width_mask(SRCID_WIDTH)),
        MultiInvalUpdtIndex => (3, width_mask(UPDT_INDEX_WIDTH)),
        MultiInvalNline => (0, width_mask(NLINE_WIDTH)),

        MultiUpdtDest => (25, width_mask(SRCID_WIDTH)),
        MultiUpdtSrcid => (7, width_mask(SRCID_WIDTH)),
        MultiUpdtUpdtIndex => (3, width_mask(UPDT_INDEX_WIDTH)),
        MultiUpdtWordIndex => (34, width_mask(WORD_INDEX_WIDTH)),
        MultiUpdtNline => (0, width_mask(NLINE_WIDTH)),
        MultiUpdtBe => (32, width_mask(BE_WIDTH)),
        MultiUpdtData => (0, width_mask(DATA_WIDTH)),

        ClackType => (1, width_mask(CLACK_TYPE_WIDTH)),
        ClackDest => (25, width_mask(SRCID_WIDTH)),
        ClackSet => (4, width_mask(SET_INDEX_WIDTH)),
        ClackWay => (2, width_mask(WAY_INDEX_WIDTH)),

        BroadcastBox => (19, width_mask(BROADCAST_BOX_WIDTH)),
        BroadcastSrcid => (5, width_mask(SRCID_WIDTH)),
        BroadcastNline => (0, width_mask(NLINE_WIDTH)),
    }
}

/// Extracts a named field from a raw flit.
#[inline]
pub const fn get(flit: u64, field: FlitField) -> u64 {
    let (shift, mask) = field_spec(field);
    (flit >> shift) & mask
}

/// Merges a named field value into a raw flit.
///
/// Values wider than the field are truncated to the field width, as the
/// hardware wires would.
#[inline]
pub const fn set(flit: &mut u64, value: u64, field: FlitField) {
    let (shift, mask) = field_spec(field);
    *flit |= (value & mask) << shift;
}

/// Packs the broadcast bounding box `(xmin, xmax, ymin, ymax)` into the
/// 20-bit `BroadcastBox` encoding (5 bits per coordinate).
#[inline]
pub const fn pack_broadcast_box(xmin: u32, xmax: u32, ymin: u32, ymax: u32) -> u64 {
    (((xmin & 0x1F) as u64) << 15)
        | (((xmax & 0x1F) as u64) << 10)
        | (((ymin & 0x1F) as u64) << 5)
        | ((ymax & 0x1F) as u64)
}

/// Unpacks a 20-bit `BroadcastBox` into `(xmin, xmax, ymin, ymax)`.
#[inline]
pub const fn unpack_broadcast_box(value: u64) -> (u32, u32, u32, u32) {
    (
        ((value >> 15) & 0x1F) as u32,
        ((value >> 10) & 0x1F) as u32,
        ((value >> 5) & 0x1F) as u32,
        (value & 0x1F) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cleanup_first_flit_layout() {
        let mut flit = 0u64;
        set(&mut flit, 0x155, FlitField::CleanupDest);
        set(&mut flit, 0x2AAA, FlitField::CleanupSrcid);
        set(&mut flit, 0x3, FlitField::CleanupNlineMsb);
        set(&mut flit, 0x2, FlitField::CleanupWayIndex);
        set(&mut flit, p2m_type::CLEANUP_INST, FlitField::P2mType);

        assert_eq!(get(flit, FlitField::CleanupDest), 0x155);
        assert_eq!(get(flit, FlitField::CleanupSrcid), 0x2AAA);
        assert_eq!(get(flit, FlitField::CleanupNlineMsb), 0x3);
        assert_eq!(get(flit, FlitField::CleanupWayIndex), 0x2);
        assert_eq!(get(flit, FlitField::P2mType), 0x3);
        assert_eq!(get(flit, FlitField::P2mEop), 0);
        assert_eq!(get(flit, FlitField::P2mBc), 0);
        // explicit bit positions: DEST at 22, SRCID at 8, TYPE at 1
        assert_eq!(flit, (0x155 << 22) | (0x2AAA << 8) | (0x3 << 6) | (0x2 << 3) | (0x3 << 1));
    }

    #[test]
    fn multi_ack_is_single_flit() {
        let mut flit = 0u64;
        set(&mut flit, 1, FlitField::P2mEop);
        set(&mut flit, 0x3FF, FlitField::MultiAckDest);
        set(&mut flit, 0xC, FlitField::MultiAckUpdtIndex);
        set(&mut flit, p2m_type::MULTI_ACK, FlitField::P2mType);

        assert_eq!(get(flit, FlitField::P2mEop), 1);
        assert_eq!(get(flit, FlitField::MultiAckUpdtIndex), 0xC);
        assert!(flit < (1 << P2M_FLIT_WIDTH));
    }

    #[test]
    fn multi_updt_header_and_data_flits() {
        let mut header = 0u64;
        set(&mut header, 0x1234, FlitField::MultiUpdtDest);
        set(&mut header, 0x765, FlitField::MultiUpdtSrcid);
        set(&mut header, 0x9, FlitField::MultiUpdtUpdtIndex);
        set(&mut header, m2p_type::MULTI_UPDT_DATA, FlitField::M2pType);
        assert_eq!(get(header, FlitField::MultiUpdtDest), 0x1234);
        assert_eq!(get(header, FlitField::MultiUpdtSrcid), 0x765);
        assert_eq!(get(header, FlitField::M2pType), 0);
        assert!(header < (1 << M2P_FLIT_WIDTH));

        let mut nline_flit = 0u64;
        set(&mut nline_flit, 0xB, FlitField::MultiUpdtWordIndex);
        set(&mut nline_flit, 0x3_AAAA_5555, FlitField::MultiUpdtNline);
        assert_eq!(get(nline_flit, FlitField::MultiUpdtWordIndex), 0xB);
        assert_eq!(get(nline_flit, FlitField::MultiUpdtNline), 0x3_AAAA_5555);

        let mut data_flit = 0u64;
        set(&mut data_flit, 1, FlitField::M2pEop);
        set(&mut data_flit, 0x5, FlitField::MultiUpdtBe);
        set(&mut data_flit, 0xDEAD_BEEF, FlitField::MultiUpdtData);
        assert_eq!(get(data_flit, FlitField::MultiUpdtBe), 0x5);
        assert_eq!(get(data_flit, FlitField::MultiUpdtData), 0xDEAD_BEEF);
        assert_eq!(get(data_flit, FlitField::M2pEop), 1);
    }

    #[test]
    fn clack_layout() {
        let mut flit = 0u64;
        set(&mut flit, 1, FlitField::M2pEop);
        set(&mut flit, 0x2001, FlitField::ClackDest);
        set(&mut flit, 0x8421, FlitField::ClackSet);
        set(&mut flit, 0x3, FlitField::ClackWay);
        set(&mut flit, clack_type::CLACK_INST, FlitField::ClackType);

        assert_eq!(get(flit, FlitField::ClackDest), 0x2001);
        assert_eq!(get(flit, FlitField::ClackSet), 0x8421);
        assert_eq!(get(flit, FlitField::ClackWay), 0x3);
        assert_eq!(get(flit, FlitField::ClackType), clack_type::CLACK_INST);
        assert!(flit < (1 << CLACK_FLIT_WIDTH));
    }

    #[test]
    fn broadcast_box_roundtrip() {
        let packed = pack_broadcast_box(1, 3, 0, 2);
        assert_eq!(unpack_broadcast_box(packed), (1, 3, 0, 2));

        let mut flit = 0u64;
        set(&mut flit, packed, FlitField::BroadcastBox);
        set(&mut flit, 0x7FF, FlitField::BroadcastSrcid);
        set(&mut flit, 1, FlitField::M2pBc);
        assert_eq!(get(flit, FlitField::BroadcastBox), packed);
        assert_eq!(get(flit, FlitField::BroadcastSrcid), 0x7FF);
        assert_eq!(get(flit, FlitField::M2pBc), 1);
    }

    proptest! {
        // Writing one CLEANUP header field must never disturb the others.
        #[test]
        fn cleanup_fields_are_disjoint(
            dest in 0u64..(1 << 10),
            srcid in 0u64..(1 << 14),
            msb in 0u64..4,
            way in 0u64..4,
        ) {
            let mut flit = 0u64;
            set(&mut flit, dest, FlitField::CleanupDest);
            set(&mut flit, srcid, FlitField::CleanupSrcid);
            set(&mut flit, msb, FlitField::CleanupNlineMsb);
            set(&mut flit, way, FlitField::CleanupWayIndex);
            set(&mut flit, p2m_type::CLEANUP_DATA, FlitField::P2mType);

            prop_assert_eq!(get(flit, FlitField::CleanupDest), dest);
            prop_assert_eq!(get(flit, FlitField::CleanupSrcid), srcid);
            prop_assert_eq!(get(flit, FlitField::CleanupNlineMsb), msb);
            prop_assert_eq!(get(flit, FlitField::CleanupWayIndex), way);
            prop_assert_eq!(get(flit, FlitField::P2mType), p2m_type::CLEANUP_DATA);
            prop_assert!(flit < (1 << P2M_FLIT_WIDTH));
        }

        // A 34-bit nline survives the MSB/LSB split across the two
        // CLEANUP flits.
        #[test]
        fn cleanup_nline_split_roundtrip(nline in 0u64..(1 << 34)) {
            let mut first = 0u64;
            let mut second = 0u64;
            set(&mut first, nline >> 32, FlitField::CleanupNlineMsb);
            set(&mut second, nline, FlitField::CleanupNlineLsb);
            set(&mut second, 1, FlitField::P2mEop);

            let rebuilt = (get(first, FlitField::CleanupNlineMsb) << 32)
                | get(second, FlitField::CleanupNlineLsb);
            prop_assert_eq!(rebuilt, nline);
        }
    }
}
