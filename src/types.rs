//! Type bytes of the document format.
//!
//! Every encoded value starts with one type byte that carries both the
//! kind of the value and, for compounds, integers and strings, the width
//! variant. The constants below are the complete table; [`ValueType`]
//! is the coarse classification the builder and reader dispatch on.

/// Empty array.
pub(crate) const ARRAY_EMPTY: u8 = 0x01;
/// Indexed array, 1-byte offsets. 0x03/0x04/0x05 are the 2/4/8-byte forms.
pub(crate) const ARRAY_INDEXED_BASE: u8 = 0x02;
/// Provisional header of an open indexed array, patched at close.
pub(crate) const ARRAY_OPEN: u8 = 0x06;
/// Empty object.
pub(crate) const OBJECT_EMPTY: u8 = 0x0a;
/// Sorted indexed object, 1-byte offsets. 0x0c/0x0d/0x0e are wider forms.
pub(crate) const OBJECT_SORTED_BASE: u8 = 0x0b;
/// Unsorted indexed object, 1-byte offsets. 0x10/0x11/0x12 are wider forms.
pub(crate) const OBJECT_UNSORTED_BASE: u8 = 0x0f;
/// Compact array: varint byte length, no index table.
pub(crate) const ARRAY_COMPACT: u8 = 0x13;
/// Compact object: varint byte length, no index table.
pub(crate) const OBJECT_COMPACT: u8 = 0x14;

/// Null.
pub(crate) const NULL: u8 = 0x18;
/// Boolean false.
pub(crate) const FALSE: u8 = 0x19;
/// Boolean true.
pub(crate) const TRUE: u8 = 0x1a;
/// IEEE-754 double, 8 bytes little-endian.
pub(crate) const DOUBLE: u8 = 0x1b;
/// UTC date, signed milliseconds since the epoch, 8 bytes little-endian.
pub(crate) const UTC_DATE: u8 = 0x1c;
/// External pointer, platform-sized, same address space only.
pub(crate) const EXTERNAL: u8 = 0x1d;

/// Signed integer base: `0x1f + len` for 1..=8 little-endian bytes.
pub(crate) const INT_BASE: u8 = 0x1f;
/// Unsigned integer base: `0x27 + len` for 1..=8 little-endian bytes.
pub(crate) const UINT_BASE: u8 = 0x27;
/// Small integers: `0x30 + v` for 0..=9, `0x40 + v` for -6..=-1.
pub(crate) const SMALL_INT_BASE: u8 = 0x30;

/// Short string base: `0x40 + len` for 0..=126 bytes of UTF-8.
pub(crate) const STRING_SHORT_BASE: u8 = 0x40;
/// Long string: 8-byte little-endian length, then bytes.
pub(crate) const STRING_LONG: u8 = 0xbf;
/// Binary blob: `0xc0 + (len_width - 1)`, little-endian length, payload.
pub(crate) const BINARY_BASE: u8 = 0xc0;
/// Positive BCD base; low three bits carry the length width minus one.
pub(crate) const BCD_POS_BASE: u8 = 0xc8;
/// Negative BCD base.
pub(crate) const BCD_NEG_BASE: u8 = 0xd0;

/// Tag prefix with a 1-byte tag.
pub(crate) const TAG_SMALL: u8 = 0xee;
/// Tag prefix with an 8-byte little-endian tag.
pub(crate) const TAG_LONG: u8 = 0xef;

/// Coarse classification of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Absent value (type byte `0x00` or an empty slice).
    None,
    Null,
    Bool,
    Array,
    Object,
    Double,
    UtcDate,
    External,
    SmallInt,
    Int,
    UInt,
    String,
    Binary,
    Bcd,
    Tagged,
    /// A reserved or unassigned type byte.
    Illegal,
}

impl ValueType {
    /// Classifies a type byte.
    pub fn from_byte(byte: u8) -> ValueType {
        match byte {
            0x00 => ValueType::None,
            0x01..=0x06 | ARRAY_COMPACT => ValueType::Array,
            0x0a..=0x12 | OBJECT_COMPACT => ValueType::Object,
            NULL => ValueType::Null,
            FALSE | TRUE => ValueType::Bool,
            DOUBLE => ValueType::Double,
            UTC_DATE => ValueType::UtcDate,
            EXTERNAL => ValueType::External,
            0x20..=0x27 => ValueType::Int,
            0x28..=0x2f => ValueType::UInt,
            0x30..=0x3f => ValueType::SmallInt,
            0x40..=STRING_LONG => ValueType::String,
            0xc0..=0xc7 => ValueType::Binary,
            0xc8..=0xd7 => ValueType::Bcd,
            TAG_SMALL | TAG_LONG => ValueType::Tagged,
            _ => ValueType::Illegal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(ValueType::from_byte(0x00), ValueType::None);
        assert_eq!(ValueType::from_byte(ARRAY_EMPTY), ValueType::Array);
        assert_eq!(ValueType::from_byte(0x05), ValueType::Array);
        assert_eq!(ValueType::from_byte(ARRAY_COMPACT), ValueType::Array);
        assert_eq!(ValueType::from_byte(OBJECT_EMPTY), ValueType::Object);
        assert_eq!(ValueType::from_byte(0x12), ValueType::Object);
        assert_eq!(ValueType::from_byte(NULL), ValueType::Null);
        assert_eq!(ValueType::from_byte(0x30), ValueType::SmallInt);
        assert_eq!(ValueType::from_byte(0x3f), ValueType::SmallInt);
        assert_eq!(ValueType::from_byte(0x40), ValueType::String);
        assert_eq!(ValueType::from_byte(0xbe), ValueType::String);
        assert_eq!(ValueType::from_byte(STRING_LONG), ValueType::String);
        assert_eq!(ValueType::from_byte(0x20), ValueType::Int);
        assert_eq!(ValueType::from_byte(0x28), ValueType::UInt);
        assert_eq!(ValueType::from_byte(TAG_SMALL), ValueType::Tagged);
        assert_eq!(ValueType::from_byte(0x15), ValueType::Illegal);
    }
}
