//! Zero-copy cursor over encoded bytes.
//!
//! A [`Slice`] points at the first byte of one encoded value inside a
//! larger buffer and navigates purely by reading type bytes and the
//! offset tables described in the format, never copying payload.

use crate::{
    error::{Error, Result},
    translator::AttributeTranslator,
    types::{self, ValueType},
    varint,
};

/// A read-only view of one encoded value.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'a> {
    data: &'a [u8],
}

impl<'a> Slice<'a> {
    /// Wraps a byte run whose first byte is a type byte. The run may
    /// extend past the value; navigation never reads beyond the value's
    /// own byte size.
    pub fn new(data: &'a [u8]) -> Slice<'a> { Slice { data } }

    /// The value's type byte, `0x00` for an empty run.
    pub fn type_byte(&self) -> u8 {
        if self.data.is_empty() {
            0
        } else {
            self.data[0]
        }
    }

    /// Coarse type of the value.
    pub fn value_type(&self) -> ValueType { ValueType::from_byte(self.type_byte()) }

    pub fn is_null(&self) -> bool { self.value_type() == ValueType::Null }

    pub fn is_bool(&self) -> bool { self.value_type() == ValueType::Bool }

    pub fn is_string(&self) -> bool { self.value_type() == ValueType::String }

    pub fn is_small_int(&self) -> bool { self.value_type() == ValueType::SmallInt }

    pub fn is_uint(&self) -> bool { self.value_type() == ValueType::UInt }

    pub fn is_int(&self) -> bool { self.value_type() == ValueType::Int }

    pub fn is_double(&self) -> bool { self.value_type() == ValueType::Double }

    pub fn is_array(&self) -> bool { self.value_type() == ValueType::Array }

    pub fn is_object(&self) -> bool { self.value_type() == ValueType::Object }

    pub fn is_tagged(&self) -> bool { self.value_type() == ValueType::Tagged }

    /// Whether the value can stand as an object key: a string, or the
    /// small/unsigned integer form a translator emits.
    pub(crate) fn is_valid_key(&self) -> bool {
        self.is_string() || self.is_small_int() || self.is_uint()
    }

    /// Total encoded size of this value in bytes.
    pub fn byte_size(&self) -> Result<usize> {
        let b = self.type_byte();
        match b {
            types::ARRAY_EMPTY | types::OBJECT_EMPTY => Ok(1),
            0x02..=0x05 => self.read_uint(1, 1 << (b - types::ARRAY_INDEXED_BASE)),
            0x0b..=0x0e => self.read_uint(1, 1 << (b - types::OBJECT_SORTED_BASE)),
            0x0f..=0x12 => self.read_uint(1, 1 << (b - types::OBJECT_UNSORTED_BASE)),
            types::ARRAY_COMPACT | types::OBJECT_COMPACT => {
                let (size, _) = self.read_varint(1)?;
                usize::try_from(size).map_err(|_| Error::OutOfRange)
            }
            types::NULL | types::FALSE | types::TRUE => Ok(1),
            types::DOUBLE | types::UTC_DATE => Ok(9),
            types::EXTERNAL => Ok(1 + std::mem::size_of::<usize>()),
            0x20..=0x27 => Ok(1 + (b - types::INT_BASE) as usize),
            0x28..=0x2f => Ok(1 + (b - types::UINT_BASE) as usize),
            0x30..=0x3f => Ok(1),
            0x40..=0xbe => Ok(1 + (b - types::STRING_SHORT_BASE) as usize),
            types::STRING_LONG => Ok(9 + self.read_uint(1, 8)?),
            0xc0..=0xc7 => {
                let l = (b - 0xbf) as usize;
                Ok(1 + l + self.read_uint(1, l)?)
            }
            0xc8..=0xd7 => {
                let n = ((b & 0x07) + 1) as usize;
                Ok(1 + n + 4 + self.read_uint(1, n)?)
            }
            types::TAG_SMALL => Ok(2 + self.value_at_offset(2)?.byte_size()?),
            types::TAG_LONG => Ok(9 + self.value_at_offset(9)?.byte_size()?),
            _ => Err(Error::Internal),
        }
    }

    /// The exact byte run of this value.
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        let size = self.byte_size()?;
        self.check(size)?;
        Ok(&self.data[..size])
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.type_byte() {
            types::TRUE => Ok(true),
            types::FALSE => Ok(false),
            _ => Err(Error::Internal),
        }
    }

    /// Signed integer value of a SmallInt, Int or in-range UInt.
    pub fn to_i64(&self) -> Result<i64> {
        let b = self.type_byte();
        match b {
            0x30..=0x39 => Ok((b - types::SMALL_INT_BASE) as i64),
            0x3a..=0x3f => Ok((b - 0x3a) as i64 - 6),
            0x20..=0x27 => {
                let len = (b - types::INT_BASE) as usize;
                let u = self.read_uint(1, len)? as u64;
                if len < 8 && u >= 1u64 << (8 * len - 1) {
                    // negative: undo the two's-complement window
                    Ok(u as i64 - (1i64 << (8 * (len as u32) - 1)) * 2)
                } else {
                    Ok(u as i64)
                }
            }
            0x28..=0x2f => {
                let u = self.to_u64()?;
                i64::try_from(u).map_err(|_| Error::OutOfRange)
            }
            _ => Err(Error::Internal),
        }
    }

    /// Unsigned integer value of a non-negative SmallInt or UInt.
    pub fn to_u64(&self) -> Result<u64> {
        let b = self.type_byte();
        match b {
            0x30..=0x39 => Ok((b - types::SMALL_INT_BASE) as u64),
            0x3a..=0x3f => Err(Error::OutOfRange),
            0x28..=0x2f => {
                let len = (b - types::UINT_BASE) as usize;
                Ok(self.read_uint(1, len)? as u64)
            }
            0x20..=0x27 => {
                let v = self.to_i64()?;
                u64::try_from(v).map_err(|_| Error::OutOfRange)
            }
            _ => Err(Error::Internal),
        }
    }

    /// The bit-exact double behind a `0x1b` value.
    pub fn to_f64(&self) -> Result<f64> {
        if self.type_byte() != types::DOUBLE {
            return Err(Error::Internal);
        }
        let raw = self.read_uint(1, 8)? as u64;
        Ok(f64::from_bits(raw))
    }

    /// Milliseconds since the epoch of a UTC date value.
    pub fn utc_date_millis(&self) -> Result<i64> {
        if self.type_byte() != types::UTC_DATE {
            return Err(Error::Internal);
        }
        Ok(self.read_uint(1, 8)? as u64 as i64)
    }

    /// Raw bytes of a string value.
    pub fn string_bytes(&self) -> Result<&'a [u8]> {
        let b = self.type_byte();
        match b {
            0x40..=0xbe => {
                let len = (b - types::STRING_SHORT_BASE) as usize;
                self.check(1 + len)?;
                Ok(&self.data[1..1 + len])
            }
            types::STRING_LONG => {
                let len = self.read_uint(1, 8)?;
                self.check(9 + len)?;
                Ok(&self.data[9..9 + len])
            }
            _ => Err(Error::Internal),
        }
    }

    /// The string value, validated as UTF-8.
    pub fn to_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.string_bytes()?).map_err(|_| Error::Internal)
    }

    /// Payload of a binary value.
    pub fn binary_bytes(&self) -> Result<&'a [u8]> {
        let b = self.type_byte();
        if !(0xc0..=0xc7).contains(&b) {
            return Err(Error::Internal);
        }
        let l = (b - 0xbf) as usize;
        let len = self.read_uint(1, l)?;
        self.check(1 + l + len)?;
        Ok(&self.data[1 + l..1 + l + len])
    }

    /// The tag of a tagged value.
    pub fn tag(&self) -> Result<u64> {
        match self.type_byte() {
            types::TAG_SMALL => Ok(self.read_uint(1, 1)? as u64),
            types::TAG_LONG => Ok(self.read_uint(1, 8)? as u64),
            _ => Err(Error::Internal),
        }
    }

    /// The value behind a tag prefix; a non-tagged value is its own
    /// result.
    pub fn tagged_value(&self) -> Result<Slice<'a>> {
        match self.type_byte() {
            types::TAG_SMALL => self.value_at_offset(2),
            types::TAG_LONG => self.value_at_offset(9),
            _ => Ok(*self),
        }
    }

    /// Member count of an array or object.
    pub fn length(&self) -> Result<usize> {
        let b = self.type_byte();
        match b {
            types::ARRAY_EMPTY | types::OBJECT_EMPTY => Ok(0),
            0x02..=0x05 | 0x0b..=0x12 => {
                let w = self.index_width()?;
                if w == 8 {
                    let size = self.byte_size()?;
                    self.read_uint(size - 8, 8)
                } else {
                    self.read_uint(1 + w, w)
                }
            }
            types::ARRAY_COMPACT | types::OBJECT_COMPACT => {
                let size = self.byte_size()?;
                self.check(size)?;
                Ok(varint::read_reversed(self.data, size) as usize)
            }
            _ => Err(Error::Internal),
        }
    }

    /// The i-th member of an array.
    pub fn at(&self, index: usize) -> Result<Slice<'a>> {
        let b = self.type_byte();
        match b {
            0x02..=0x05 => self.member_from_table(index),
            types::ARRAY_COMPACT => self.nth_compact(index),
            _ => Err(Error::Internal),
        }
    }

    /// The i-th key of an object, in index-table order.
    pub fn key_at(&self, index: usize) -> Result<Slice<'a>> {
        let b = self.type_byte();
        match b {
            0x0b..=0x12 => self.member_from_table(index),
            types::OBJECT_COMPACT => self.nth_compact(2 * index),
            _ => Err(Error::Internal),
        }
    }

    /// The i-th value of an object, in index-table order.
    pub fn value_at(&self, index: usize) -> Result<Slice<'a>> {
        let key = self.key_at(index)?;
        let key_size = key.byte_size()?;
        key.value_at_offset(key_size)
    }

    /// Looks up `key` in an object. Sorted objects use binary search on
    /// the index table, other forms a linear scan.
    pub fn get(&self, key: &str) -> Result<Option<Slice<'a>>> {
        self.get_translated(key, None)
    }

    pub(crate) fn get_translated(
        &self,
        key: &str,
        translator: Option<&AttributeTranslator>,
    ) -> Result<Option<Slice<'a>>> {
        if !self.is_object() {
            return Err(Error::NeedOpenObject);
        }
        let n = self.length()?;
        if n == 0 {
            return Ok(None);
        }
        let b = self.type_byte();
        if (0x0b..=0x0e).contains(&b) {
            // sorted index table
            let (mut lo, mut hi) = (0usize, n);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let mid_key = self.key_at(mid)?;
                let name = self.resolve_key(mid_key, translator)?;
                match name.as_slice().cmp(key.as_bytes()) {
                    std::cmp::Ordering::Less => lo = mid + 1,
                    std::cmp::Ordering::Greater => hi = mid,
                    std::cmp::Ordering::Equal => return self.value_at(mid).map(Some),
                }
            }
            return Ok(None);
        }
        for i in 0..n {
            let name = self.resolve_key(self.key_at(i)?, translator)?;
            if name == key.as_bytes() {
                return self.value_at(i).map(Some);
            }
        }
        Ok(None)
    }

    fn resolve_key(
        &self,
        key: Slice<'a>,
        translator: Option<&AttributeTranslator>,
    ) -> Result<Vec<u8>> {
        if key.is_string() {
            return key.string_bytes().map(<[u8]>::to_vec);
        }
        match translator {
            Some(t) => t.key_bytes(key).map(<[u8]>::to_vec),
            None => Err(Error::Internal),
        }
    }

    fn index_width(&self) -> Result<usize> {
        let b = self.type_byte();
        match b {
            0x02..=0x05 => Ok(1 << (b - types::ARRAY_INDEXED_BASE)),
            0x0b..=0x0e => Ok(1 << (b - types::OBJECT_SORTED_BASE)),
            0x0f..=0x12 => Ok(1 << (b - types::OBJECT_UNSORTED_BASE)),
            _ => Err(Error::Internal),
        }
    }

    fn member_from_table(&self, index: usize) -> Result<Slice<'a>> {
        let w = self.index_width()?;
        let n = self.length()?;
        if index >= n {
            return Err(Error::OutOfRange);
        }
        let size = self.byte_size()?;
        let table = if w == 8 {
            size - 8 - n * 8
        } else {
            size - n * w
        };
        let offset = self.read_uint(table + index * w, w)?;
        self.value_at_offset(offset)
    }

    fn nth_compact(&self, index: usize) -> Result<Slice<'a>> {
        if index >= self.length()? * self.compact_step() {
            return Err(Error::OutOfRange);
        }
        let (_, header) = self.read_varint(1)?;
        let mut offset = 1 + header;
        for _ in 0..index {
            offset += self.value_at_offset(offset)?.byte_size()?;
        }
        self.value_at_offset(offset)
    }

    /// Walk stride of the compact forms: objects interleave keys and
    /// values.
    fn compact_step(&self) -> usize {
        if self.type_byte() == types::OBJECT_COMPACT {
            2
        } else {
            1
        }
    }

    fn value_at_offset(&self, offset: usize) -> Result<Slice<'a>> {
        self.check(offset)?;
        Ok(Slice::new(&self.data[offset..]))
    }

    fn read_varint(&self, offset: usize) -> Result<(u64, usize)> {
        let mut end = offset;
        loop {
            self.check(end + 1)?;
            if self.data[end] & 0x80 == 0 {
                break;
            }
            end += 1;
        }
        let (value, used) = varint::read_forward(&self.data[offset..]);
        debug_assert_eq!(used, end + 1 - offset);
        Ok((value, used))
    }

    fn read_uint(&self, offset: usize, len: usize) -> Result<usize> {
        self.check(offset + len)?;
        let mut v = 0u64;
        for i in (0..len).rev() {
            v = (v << 8) | u64::from(self.data[offset + i]);
        }
        usize::try_from(v).map_err(|_| Error::OutOfRange)
    }

    fn check(&self, needed: usize) -> Result<()> {
        if self.data.len() < needed {
            return Err(Error::Internal);
        }
        Ok(())
    }
}
