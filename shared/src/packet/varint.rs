//! Packed variable-length integer encoding.
//!
//! Values in `[0, 248)` occupy a single byte. Larger magnitudes get a one-byte
//! tag followed by the raw little-endian magnitude, and the single tag `0xFF`
//! covers `[-255, -1]` with one magnitude byte. The tag `254` is unassigned.

/// First byte value reserved for multi-byte tags.
pub(crate) const SINGLE_BYTE_LIMIT: i64 = 248;

pub(crate) const TAG_POS_U16: u8 = 248;
pub(crate) const TAG_NEG_U16: u8 = 249;
pub(crate) const TAG_POS_U32: u8 = 250;
pub(crate) const TAG_NEG_U32: u8 = 251;
pub(crate) const TAG_POS_U64: u8 = 252;
pub(crate) const TAG_NEG_U64: u8 = 253;
pub(crate) const TAG_NEG_BYTE: u8 = 255;

/// Exact number of bytes [`crate::PacketWriter::write_int`] emits for `v`.
///
/// This is the canonical size calculator used to pre-size buffers; there is
/// deliberately no other place that knows the packed layout's widths.
pub fn size_int(v: i64) -> usize {
    if (0..SINGLE_BYTE_LIMIT).contains(&v) {
        return 1;
    }
    if (-255..0).contains(&v) {
        return 2;
    }
    let magnitude = v.unsigned_abs();
    if magnitude <= u64::from(u16::MAX) {
        3
    } else if magnitude <= u64::from(u32::MAX) {
        5
    } else {
        9
    }
}

#[cfg(test)]
mod tests {
    use super::size_int;

    #[test]
    fn single_byte_range() {
        assert_eq!(size_int(0), 1);
        assert_eq!(size_int(247), 1);
        assert_eq!(size_int(248), 3);
    }

    #[test]
    fn negative_byte_range() {
        assert_eq!(size_int(-1), 2);
        assert_eq!(size_int(-255), 2);
        assert_eq!(size_int(-256), 3);
    }

    #[test]
    fn wide_ranges() {
        assert_eq!(size_int(65535), 3);
        assert_eq!(size_int(65536), 5);
        assert_eq!(size_int(-65535), 3);
        assert_eq!(size_int(-65536), 5);
        assert_eq!(size_int(4294967295), 5);
        assert_eq!(size_int(4294967296), 9);
        assert_eq!(size_int(-4294967296), 9);
    }
}
