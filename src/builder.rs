//! The append-only document builder.
//!
//! Mechanics of the building process: the document grows in one
//! contiguous buffer whose length is the write position. Opening an
//! array or object reserves a provisional 9-byte header (type byte plus
//! room for the widest length/count encoding) and pushes a frame onto
//! the open-compound stack. Every member added while a compound is open
//! records its start offset in a member-offset vector shared by all
//! frames, of which each frame owns the suffix starting at its
//! `index_base`. Closing the innermost compound retroactively picks the
//! most compact header form, shifts the payload down at most once,
//! sorts an object's offsets by key, writes the index table and patches
//! the header in place. When the stack is empty the finished bytes can
//! be taken out via `slice`, `shared_slice` or `steal`.

use crate::{
    error::{Error, Result},
    options::{Options, PaddingBehavior},
    slice::Slice,
    translator::AttributeTranslator,
    types,
    value::{Serializable, Value},
    varint,
};
use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use std::sync::Arc;

/// One open array or object.
#[derive(Debug, Clone, Copy)]
struct CompoundFrame {
    /// Offset of the compound's header byte.
    start: usize,
    /// First member-offset entry owned by this frame.
    index_base: usize,
}

/// Open-compound frames kept inline before spilling to the heap.
const STACK_ARENA: usize = 64;

/// Incremental encoder for a single document.
///
/// # Example
///
/// ```
/// use docpack::Builder;
///
/// let mut b = Builder::new();
/// b.open_object(false).unwrap();
/// b.insert("name", "docpack").unwrap();
/// b.insert("major", 1).unwrap();
/// b.close().unwrap();
///
/// let doc = b.slice().unwrap();
/// assert_eq!(doc.get("major").unwrap().unwrap().to_i64().unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct Builder {
    buffer: BytesMut,
    stack: SmallVec<[CompoundFrame; STACK_ARENA]>,
    /// Member start offsets, relative to the owning frame's start. The
    /// vector is shared by all open frames; entries are appended in
    /// insertion order and only consumed (and dropped) at close.
    index: Vec<usize>,
    /// In an object: a key has been written and its value is pending.
    key_written: bool,
    options: Options,
}

impl Default for Builder {
    fn default() -> Builder { Builder::new() }
}

impl Builder {
    /// An empty builder with default [`Options`].
    pub fn new() -> Builder { Builder::with_options(Options::default()) }

    /// An empty builder with the given options.
    pub fn with_options(options: Options) -> Builder {
        Builder {
            buffer: BytesMut::new(),
            stack: SmallVec::new(),
            index: Vec::new(),
            key_written: false,
            options,
        }
    }

    /// A builder reusing the allocation of `buffer`. Existing content is
    /// discarded.
    pub fn with_buffer(buffer: BytesMut) -> Builder {
        Builder::with_buffer_and_options(buffer, Options::default())
    }

    /// A builder reusing the allocation of `buffer`, with options.
    pub fn with_buffer_and_options(mut buffer: BytesMut, options: Options) -> Builder {
        buffer.clear();
        let mut b = Builder::with_options(options);
        b.buffer = buffer;
        b
    }

    /// The active options.
    pub fn options(&self) -> &Options { &self.options }

    /// Installs or removes the attribute translator. Fails while any
    /// compound is open.
    pub fn set_attribute_translator(
        &mut self,
        translator: Option<Arc<AttributeTranslator>>,
    ) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(Error::Internal);
        }
        self.options.attribute_translator = translator;
        Ok(())
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    /// Whether no compound is open.
    pub fn is_closed(&self) -> bool { self.stack.is_empty() }

    /// Whether the innermost open compound is an array.
    pub fn is_open_array(&self) -> bool {
        match self.stack.last() {
            Some(frame) => {
                let b = self.buffer[frame.start];
                b == types::ARRAY_OPEN || b == types::ARRAY_COMPACT
            }
            None => false,
        }
    }

    /// Whether the innermost open compound is an object.
    pub fn is_open_object(&self) -> bool {
        match self.stack.last() {
            Some(frame) => {
                let b = self.buffer[frame.start];
                b == types::OBJECT_SORTED_BASE || b == types::OBJECT_COMPACT
            }
            None => false,
        }
    }

    /// All bytes written so far, sealed or not.
    pub fn data(&self) -> &[u8] { &self.buffer }

    /// The finished document's bytes. Fails until the stack is empty.
    pub fn start(&self) -> Result<&[u8]> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        Ok(&self.buffer)
    }

    /// The finished document's size in bytes.
    pub fn size(&self) -> Result<usize> { self.start().map(<[u8]>::len) }

    /// A cursor over the finished document.
    pub fn slice(&self) -> Result<Slice<'_>> { self.start().map(Slice::new) }

    /// A ref-counted copy of the finished document.
    pub fn shared_slice(&self) -> Result<Bytes> {
        self.start().map(Bytes::copy_from_slice)
    }

    /// Consumes the builder, freezing its buffer into a ref-counted view
    /// without copying.
    pub fn into_shared_slice(self) -> Result<Bytes> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        Ok(self.buffer.freeze())
    }

    /// Takes the buffer out, leaving a cleared builder behind.
    pub fn steal(&mut self) -> BytesMut {
        let buffer = std::mem::take(&mut self.buffer);
        self.clear();
        buffer
    }

    /// Encodes one standalone value into a fresh buffer.
    pub fn encode_single(value: Value) -> Result<Bytes> {
        let mut b = Builder::new();
        b.add(value)?;
        b.into_shared_slice()
    }

    /// Drops everything written and returns to the initial state. The
    /// buffer allocation and the member-offset vector are retained.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.stack.clear();
        self.index.clear();
        self.key_written = false;
    }

    /// Guarantees room for `n` more bytes without reallocation during
    /// the following writes.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        self.buffer
            .len()
            .checked_add(n)
            .ok_or(Error::OutOfRange)?;
        self.buffer.reserve(n);
        Ok(())
    }

    /// Truncates the write position to `n`.
    pub fn reset_to(&mut self, n: usize) -> Result<()> {
        if n > self.buffer.len() {
            return Err(Error::OutOfRange);
        }
        self.buffer.truncate(n);
        Ok(())
    }

    /// Moves the write position `n` bytes ahead, zero-filling.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        let len = self
            .buffer
            .len()
            .checked_add(n)
            .ok_or(Error::OutOfRange)?;
        self.buffer.resize(len, 0);
        Ok(())
    }

    /// Opens an array. `unindexed` selects the compact form without an
    /// offset table.
    pub fn open_array(&mut self, unindexed: bool) -> Result<()> {
        self.open_compound(if unindexed {
            types::ARRAY_COMPACT
        } else {
            types::ARRAY_OPEN
        })
    }

    /// Opens an object. `unindexed` selects the compact form without an
    /// offset table.
    pub fn open_object(&mut self, unindexed: bool) -> Result<()> {
        self.open_compound(if unindexed {
            types::OBJECT_COMPACT
        } else {
            types::OBJECT_SORTED_BASE
        })
    }

    /// Appends one value in array context, at the top level of an empty
    /// builder, or as the pending key/value half inside an object.
    pub fn add<'v>(&mut self, value: impl Into<Value<'v>>) -> Result<()> {
        self.add_value(None, value.into())
    }

    /// Appends one tagged value. A zero tag is elided.
    pub fn add_tagged<'v>(&mut self, tag: u64, value: impl Into<Value<'v>>) -> Result<()> {
        self.add_value(Some(tag), value.into())
    }

    /// Appends a key/value pair into the open object.
    pub fn insert<'v>(&mut self, key: &str, value: impl Into<Value<'v>>) -> Result<()> {
        self.insert_value(key, None, value.into())
    }

    /// Appends a key/value pair with a tag on the value.
    pub fn insert_tagged<'v>(
        &mut self,
        key: &str,
        tag: u64,
        value: impl Into<Value<'v>>,
    ) -> Result<()> {
        self.insert_value(key, Some(tag), value.into())
    }

    /// Appends an external pointer value. The encoding embeds the raw
    /// address and is only meaningful inside this address space.
    pub fn add_external(&mut self, ptr: *const u8) -> Result<()> {
        if self.options.disallow_externals {
            return Err(Error::ExternalsDisallowed);
        }
        if self.stack.is_empty() {
            self.check_sealed()?;
            return self.restore_on_err(|b| b.set_external(ptr));
        }
        if self.key_written {
            self.restore_on_err(|b| b.set_external(ptr))
        } else {
            self.guarded_add(|b| b.set_external(ptr))
        }
    }

    /// Appends a binary-coded decimal value.
    pub fn add_bcd(&mut self, sign: i8, exponent: i32, mantissa: &[u8]) -> Result<()> {
        self.add(Value::Bcd {
            sign,
            exponent,
            mantissa,
        })
    }

    /// Lets `value` append itself. The implementor's own add calls carry
    /// the member bookkeeping, so no extra offset entry is recorded here.
    pub fn add_serializable(&mut self, value: &impl Serializable) -> Result<()> {
        value.serialize_into(self)
    }

    /// Appends a key and lets `value` append itself as the pair's value.
    pub fn insert_serializable(&mut self, key: &str, value: &impl Serializable) -> Result<()> {
        self.check_insert_target()?;
        self.guarded_add(|b| {
            b.write_key(key)?;
            value.serialize_into(b)
        })
    }

    /// Seals the innermost open array or object.
    pub fn close(&mut self) -> Result<()> {
        let frame = match self.stack.last() {
            Some(frame) => *frame,
            None => return Err(Error::NeedOpenCompound),
        };
        let tos = frame.start;
        let head = self.buffer[tos];
        debug_assert!(matches!(
            head,
            types::ARRAY_OPEN
                | types::ARRAY_COMPACT
                | types::OBJECT_SORTED_BASE
                | types::OBJECT_COMPACT
        ));
        let is_array = head == types::ARRAY_OPEN || head == types::ARRAY_COMPACT;
        debug_assert!(is_array || !self.key_written, "closing object with dangling key");

        let n = self.index.len() - frame.index_base;
        if n == 0 {
            self.buffer[tos] = if is_array {
                types::ARRAY_EMPTY
            } else {
                types::OBJECT_EMPTY
            };
            self.buffer.truncate(tos + 1);
            self.pop_frame();
            return Ok(());
        }

        // validate before any mutation so a failure leaves the frame open
        // and the builder state untouched
        if !is_array && self.options.check_attribute_uniqueness {
            self.check_attribute_uniqueness(tos, frame.index_base)?;
        }

        if head == types::ARRAY_COMPACT || head == types::OBJECT_COMPACT {
            if self.close_compact(tos, frame.index_base)? {
                self.pop_frame();
                return Ok(());
            }
            // byte length too wide for the compact form: widen to the
            // provisional indexed layout and close indexed instead
            let payload = self.buffer.len() - (tos + 1);
            self.reserve(8)?;
            let end = self.buffer.len();
            self.buffer.resize(end + 8, 0);
            self.buffer.copy_within(tos + 1..tos + 1 + payload, tos + 9);
            for byte in &mut self.buffer[tos + 1..tos + 9] {
                *byte = 0;
            }
            for k in frame.index_base..self.index.len() {
                self.index[k] += 8;
            }
        }

        if is_array {
            self.close_indexed_array(tos, frame.index_base);
        } else {
            self.close_indexed_object(tos, frame.index_base)?;
        }
        self.pop_frame();
        Ok(())
    }

    /// Looks up an attribute in the finished top-level object.
    pub fn get_key(&self, key: &str) -> Result<Option<Slice<'_>>> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        let slice = Slice::new(&self.buffer);
        slice.get_translated(key, self.options.attribute_translator.as_deref())
    }

    /// Whether the finished top-level object has an attribute `key`.
    pub fn has_key(&self, key: &str) -> Result<bool> {
        self.get_key(key).map(|v| v.is_some())
    }

    // ---- add plumbing ------------------------------------------------

    fn add_value(&mut self, tag: Option<u64>, value: Value) -> Result<()> {
        if self.stack.is_empty() {
            self.check_sealed()?;
            return self.restore_on_err(|b| {
                b.append_tag_opt(tag)?;
                b.set_value(value)
            });
        }
        if self.key_written {
            // value half of a pair; the member entry was recorded with
            // the key
            self.restore_on_err(|b| {
                b.append_tag_opt(tag)?;
                b.set_value(value)
            })
        } else {
            self.guarded_add(|b| {
                b.append_tag_opt(tag)?;
                b.set_value(value)
            })
        }
    }

    fn insert_value(&mut self, key: &str, tag: Option<u64>, value: Value) -> Result<()> {
        self.check_insert_target()?;
        self.guarded_add(|b| {
            b.write_key(key)?;
            b.append_tag_opt(tag)?;
            b.set_value(value)
        })
    }

    fn check_insert_target(&self) -> Result<()> {
        let frame = self.stack.last().ok_or(Error::NeedOpenObject)?;
        let head = self.buffer[frame.start];
        if head != types::OBJECT_SORTED_BASE && head != types::OBJECT_COMPACT {
            return Err(Error::NeedOpenObject);
        }
        if self.key_written {
            return Err(Error::KeyAlreadyWritten);
        }
        Ok(())
    }

    /// Writes the key half of a pair, consulting the translator first.
    /// Leaves `key_written` set so the following value completes the
    /// pair.
    fn write_key(&mut self, key: &str) -> Result<()> {
        let translator = self.options.attribute_translator.clone();
        if let Some(t) = &translator {
            if let Some(encoded) = t.translate(key) {
                self.reserve(encoded.len())?;
                self.buffer.extend_from_slice(encoded);
                self.key_written = true;
                return Ok(());
            }
        }
        self.set_value(Value::Str(key))?;
        debug_assert!(self.key_written);
        Ok(())
    }

    /// A completed top-level value admits no further writes until
    /// `clear`.
    fn check_sealed(&self) -> Result<()> {
        if !self.buffer.is_empty() {
            return Err(Error::NeedOpenCompound);
        }
        Ok(())
    }

    /// Runs `f`, restoring position, member index and key state if it
    /// fails, so any observable effect of a failed add is undone.
    fn restore_on_err<R>(&mut self, f: impl FnOnce(&mut Builder) -> Result<R>) -> Result<R> {
        let pos = self.buffer.len();
        let key_written = self.key_written;
        let index_len = self.index.len();
        let stack_len = self.stack.len();
        match f(self) {
            Ok(r) => Ok(r),
            Err(e) => {
                self.buffer.truncate(pos);
                self.key_written = key_written;
                self.index.truncate(index_len);
                self.stack.truncate(stack_len);
                Err(e)
            }
        }
    }

    /// Records the member about to be written, then runs `f` under the
    /// restore discipline.
    fn guarded_add<R>(&mut self, f: impl FnOnce(&mut Builder) -> Result<R>) -> Result<R> {
        self.restore_on_err(|b| {
            b.report_add();
            f(b)
        })
    }

    fn report_add(&mut self) {
        let frame = self.stack.last().expect("open compound");
        self.index.push(self.buffer.len() - frame.start);
    }

    fn pop_frame(&mut self) {
        let frame = self.stack.pop().expect("open compound");
        self.index.truncate(frame.index_base);
    }

    // ---- compound opening --------------------------------------------

    fn open_compound(&mut self, header: u8) -> Result<()> {
        if self.stack.is_empty() {
            self.check_sealed()?;
            return self.push_compound(header);
        }
        if self.key_written {
            self.key_written = false;
            return self.push_compound(header);
        }
        let frame = self.stack.last().expect("open compound");
        let head = self.buffer[frame.start];
        if head == types::OBJECT_SORTED_BASE || head == types::OBJECT_COMPACT {
            // a compound cannot stand as an object key
            return Err(Error::KeyMustBeString);
        }
        if head != types::ARRAY_OPEN && head != types::ARRAY_COMPACT {
            return Err(Error::NeedOpenArray);
        }
        self.guarded_add(|b| b.push_compound(header))
    }

    fn push_compound(&mut self, header: u8) -> Result<()> {
        self.reserve(9)?;
        self.stack.push(CompoundFrame {
            start: self.buffer.len(),
            index_base: self.index.len(),
        });
        self.buffer.put_u8(header);
        if header == types::ARRAY_OPEN || header == types::OBJECT_SORTED_BASE {
            // room for the widest byte-length and member-count encoding,
            // patched at close; the compact forms grow their varint
            // length field at close instead
            self.buffer.put_bytes(0, 8);
        }
        Ok(())
    }

    // ---- value emission ----------------------------------------------

    fn set_value(&mut self, value: Value) -> Result<()> {
        let valid_key = match &value {
            Value::Str(_) | Value::UInt(_) => true,
            Value::Int(v) => (-6..=9).contains(v),
            Value::Slice(s) => s.is_valid_key(),
            _ => false,
        };
        self.check_key(valid_key)?;

        match value {
            Value::Null => self.append_byte(types::NULL),
            Value::Bool(false) => self.append_byte(types::FALSE),
            Value::Bool(true) => self.append_byte(types::TRUE),
            Value::Int(v) => self.append_int(v),
            Value::UInt(v) => self.append_uint(v),
            Value::Double(v) => {
                self.reserve(9)?;
                self.buffer.put_u8(types::DOUBLE);
                self.buffer.put_u64_le(v.to_bits());
                Ok(())
            }
            Value::UtcDate(millis) => {
                self.reserve(9)?;
                self.buffer.put_u8(types::UTC_DATE);
                self.buffer.put_u64_le(millis as u64);
                Ok(())
            }
            Value::Str(s) => self.append_string(s.as_bytes()),
            Value::Binary(b) => self.append_binary(b),
            Value::Bcd {
                sign,
                exponent,
                mantissa,
            } => self.append_bcd(sign, exponent, mantissa),
            Value::Slice(s) => {
                let bytes = s.as_bytes()?;
                self.reserve(bytes.len())?;
                self.buffer.extend_from_slice(bytes);
                Ok(())
            }
            Value::Array { unindexed } => self.push_compound(if unindexed {
                types::ARRAY_COMPACT
            } else {
                types::ARRAY_OPEN
            }),
            Value::Object { unindexed } => self.push_compound(if unindexed {
                types::OBJECT_COMPACT
            } else {
                types::OBJECT_SORTED_BASE
            }),
        }
    }

    /// Enforces the key/value alternation of the innermost object.
    fn check_key(&mut self, valid_key: bool) -> Result<()> {
        if let Some(frame) = self.stack.last() {
            let head = self.buffer[frame.start];
            if head == types::OBJECT_SORTED_BASE || head == types::OBJECT_COMPACT {
                if !self.key_written && !valid_key {
                    return Err(Error::KeyMustBeString);
                }
                self.key_written = !self.key_written;
            }
        }
        Ok(())
    }

    fn set_external(&mut self, ptr: *const u8) -> Result<()> {
        self.check_key(false)?;
        self.reserve(1 + std::mem::size_of::<usize>())?;
        self.buffer.put_u8(types::EXTERNAL);
        // the raw address; not portable between processes
        self.buffer.extend_from_slice(&(ptr as usize).to_ne_bytes());
        Ok(())
    }

    fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.reserve(1)?;
        self.buffer.put_u8(byte);
        Ok(())
    }

    fn append_tag_opt(&mut self, tag: Option<u64>) -> Result<()> {
        match tag {
            Some(tag) if tag != 0 => self.append_tag(tag),
            _ => Ok(()),
        }
    }

    fn append_tag(&mut self, tag: u64) -> Result<()> {
        if tag <= 0xff {
            self.reserve(2)?;
            self.buffer.put_u8(types::TAG_SMALL);
            self.buffer.put_u8(tag as u8);
        } else {
            self.reserve(9)?;
            self.buffer.put_u8(types::TAG_LONG);
            self.buffer.put_u64_le(tag);
        }
        Ok(())
    }

    fn append_int(&mut self, v: i64) -> Result<()> {
        if (0..=9).contains(&v) {
            return self.append_byte(types::SMALL_INT_BASE + v as u8);
        }
        if (-6..=-1).contains(&v) {
            return self.append_byte((0x40 + v) as u8);
        }
        let len = int_length(v);
        let x = if len == 8 {
            v as u64
        } else {
            // two's complement within len bytes
            let shift = 1i64 << (len * 8 - 1);
            if v >= 0 {
                v as u64
            } else {
                (v + shift) as u64 + shift as u64
            }
        };
        self.reserve(1 + len)?;
        self.buffer.put_u8(types::INT_BASE + len as u8);
        self.append_uint_bytes(x, len);
        Ok(())
    }

    fn append_uint(&mut self, v: u64) -> Result<()> {
        if v <= 9 {
            return self.append_byte(types::SMALL_INT_BASE + v as u8);
        }
        let len = uint_length(v);
        self.reserve(1 + len)?;
        self.buffer.put_u8(types::UINT_BASE + len as u8);
        self.append_uint_bytes(v, len);
        Ok(())
    }

    fn append_string(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        if len < 127 {
            self.reserve(1 + len)?;
            self.buffer.put_u8(types::STRING_SHORT_BASE + len as u8);
        } else {
            self.reserve(9 + len)?;
            self.buffer.put_u8(types::STRING_LONG);
            self.buffer.put_u64_le(len as u64);
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn append_binary(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        let len_width = uint_length(len as u64);
        self.reserve(1 + len_width + len)?;
        self.buffer
            .put_u8(types::BINARY_BASE + (len_width - 1) as u8);
        self.append_uint_bytes(len as u64, len_width);
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn append_bcd(&mut self, sign: i8, exponent: i32, mantissa: &[u8]) -> Result<()> {
        if self.options.disallow_bcd {
            return Err(Error::BcdDisallowed);
        }
        debug_assert!(mantissa.iter().all(|&d| d <= 9));
        let is_odd = mantissa.len() % 2 != 0;
        let byte_len = mantissa.len() / 2 + usize::from(is_odd);
        let len_width = uint_length(byte_len as u64);
        self.reserve(1 + len_width + 4 + byte_len)?;

        let base = if sign >= 0 {
            types::BCD_POS_BASE
        } else {
            types::BCD_NEG_BASE
        };
        self.buffer.put_u8(base + (len_width - 1) as u8);
        self.append_uint_bytes(byte_len as u64, len_width);
        self.buffer.put_u32_le(exponent as u32);

        let mut i = 0;
        while i < mantissa.len() {
            if is_odd && i == 0 {
                // lone leading digit in the low half
                self.buffer.put_u8(mantissa[0]);
                i += 1;
                continue;
            }
            self.buffer.put_u8((mantissa[i] << 4) | mantissa[i + 1]);
            i += 2;
        }
        Ok(())
    }

    /// Little-endian `len`-byte write of `v`.
    fn append_uint_bytes(&mut self, v: u64, len: usize) {
        for i in 0..len {
            self.buffer.put_u8((v >> (8 * i)) as u8);
        }
    }

    fn write_uint_at(&mut self, pos: usize, v: u64, len: usize) {
        for i in 0..len {
            self.buffer[pos + i] = (v >> (8 * i)) as u8;
        }
    }

    // ---- the compound closer -----------------------------------------

    /// Closes a compound opened in the compact form: forward varint byte
    /// length inserted behind the header (one payload shift), members,
    /// member count as a backward varint at the tail, no index table.
    /// Returns false if the byte length does not fit the varint budget
    /// and the indexed close must take over.
    fn close_compact(&mut self, tos: usize, index_base: usize) -> Result<bool> {
        let n = (self.index.len() - index_base) as u64;
        let payload = self.buffer.len() - (tos + 1);
        let count_len = varint::len(n);

        let mut byte_size = (1 + payload + count_len) as u64;
        let mut len_len = varint::len(byte_size);
        byte_size += len_len as u64;
        if varint::len(byte_size) != len_len {
            // the length field grew past a varint boundary
            byte_size += 1;
            len_len += 1;
        }
        if len_len >= 9 {
            return Ok(false);
        }
        // the only fallible step, taken before any bytes move
        self.reserve(len_len + count_len)?;

        // open the gap for the length field
        let end = self.buffer.len();
        self.buffer.resize(end + len_len, 0);
        self.buffer
            .copy_within(tos + 1..tos + 1 + payload, tos + 1 + len_len);
        varint::store_forward(&mut self.buffer[tos + 1..tos + 1 + len_len], byte_size);

        let end = self.buffer.len();
        self.buffer.resize(end + count_len, 0);
        varint::store_reversed(&mut self.buffer[end..end + count_len], n);
        debug_assert_eq!(self.buffer.len(), tos + byte_size as usize);
        Ok(true)
    }

    /// Smallest index width whose total size and member count fit,
    /// together with the payload start under the active padding policy.
    fn select_width(&self, n: usize, payload: usize) -> (usize, usize) {
        let data_start1 = 3 + self.effective_padding_for_one_byte_members();
        if n <= 0xff && data_start1 + payload + n <= 0xff {
            return (1, data_start1);
        }
        let data_start2 = 5 + self.effective_padding_for_two_byte_members();
        if n <= 0xffff && data_start2 + payload + 2 * n <= 0xffff {
            return (2, data_start2);
        }
        if (n as u64) <= 0xffff_ffff && 9 + payload as u64 + 4 * n as u64 <= 0xffff_ffff {
            return (4, 9);
        }
        (8, 9)
    }

    /// Zero bytes left between a 1-byte-width header and the payload.
    fn effective_padding_for_one_byte_members(&self) -> usize {
        if self.options.padding_behavior == PaddingBehavior::UsePadding {
            6
        } else {
            0
        }
    }

    /// Zero bytes left between a 2-byte-width header and the payload.
    fn effective_padding_for_two_byte_members(&self) -> usize {
        if self.options.padding_behavior == PaddingBehavior::UsePadding {
            4
        } else {
            0
        }
    }

    /// Closes an indexed array: picks the width, shifts the payload into
    /// the header gap at most once, patches header, byte length and
    /// count, and appends the offset table (count trails the table in
    /// the 8-byte form).
    fn close_indexed_array(&mut self, tos: usize, index_base: usize) {
        let n = self.index.len() - index_base;
        let payload = self.buffer.len() - (tos + 9);
        let (width, data_start) = self.select_width(n, payload);
        let total =
            data_start + payload + n * width + if width == 8 { 8 } else { 0 };

        self.shift_payload(tos, payload, data_start);
        self.buffer[tos] = types::ARRAY_INDEXED_BASE + width.trailing_zeros() as u8;
        self.write_header_lengths(tos, total, n, width);
        self.append_index_table(tos, index_base, data_start, width);
        if width == 8 {
            self.append_uint_bytes(n as u64, 8);
        }
        debug_assert_eq!(self.buffer.len(), tos + total);
    }

    /// Closes an indexed object: like the array close, plus sorting the
    /// owned index suffix by key bytes when the sorted variant is
    /// selected.
    fn close_indexed_object(&mut self, tos: usize, index_base: usize) -> Result<()> {
        let n = self.index.len() - index_base;
        let payload = self.buffer.len() - (tos + 9);
        let sorted = self.options.sort_object_keys;
        if sorted && n > 1 {
            self.sort_object_index(tos, index_base)?;
        }
        let (width, data_start) = self.select_width(n, payload);
        let total =
            data_start + payload + n * width + if width == 8 { 8 } else { 0 };

        self.shift_payload(tos, payload, data_start);
        let base = if sorted {
            types::OBJECT_SORTED_BASE
        } else {
            types::OBJECT_UNSORTED_BASE
        };
        self.buffer[tos] = base + width.trailing_zeros() as u8;
        self.write_header_lengths(tos, total, n, width);
        self.append_index_table(tos, index_base, data_start, width);
        if width == 8 {
            self.append_uint_bytes(n as u64, 8);
        }
        debug_assert_eq!(self.buffer.len(), tos + total);
        Ok(())
    }

    /// The one payload move per close: from the provisional 9-byte
    /// header down to the chosen layout's payload start.
    fn shift_payload(&mut self, tos: usize, payload: usize, data_start: usize) {
        if data_start < 9 {
            self.buffer
                .copy_within(tos + 9..tos + 9 + payload, tos + data_start);
            self.buffer.truncate(tos + data_start + payload);
        }
    }

    /// Byte length at offset 1; member count after it except in the
    /// 8-byte form, where the count trails the index table.
    fn write_header_lengths(&mut self, tos: usize, total: usize, n: usize, width: usize) {
        self.write_uint_at(tos + 1, total as u64, width);
        if width < 8 {
            self.write_uint_at(tos + 1 + width, n as u64, width);
        }
    }

    fn append_index_table(
        &mut self,
        tos: usize,
        index_base: usize,
        data_start: usize,
        width: usize,
    ) {
        let shift = 9 - data_start;
        let n = self.index.len() - index_base;
        self.buffer.reserve(n * width + 8);
        for k in index_base..self.index.len() {
            let offset = self.index[k] - shift;
            self.append_uint_bytes(offset as u64, width);
        }
    }

    /// Reorders the frame's index suffix so the keys it points at are
    /// non-decreasing under byte-wise comparison. Key names are resolved
    /// up front so a translation failure happens before any reordering.
    fn sort_object_index(&mut self, tos: usize, index_base: usize) -> Result<()> {
        let translator = self.options.attribute_translator.clone();
        let mut entries: Vec<(Vec<u8>, usize)> =
            Vec::with_capacity(self.index.len() - index_base);
        for &entry in &self.index[index_base..] {
            let name = self.key_name(tos, entry, translator.as_deref())?;
            entries.push((name, entry));
        }
        if entries.len() <= 32 {
            insertion_sort(&mut entries);
        } else {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }
        for (i, (_, entry)) in entries.into_iter().enumerate() {
            self.index[index_base + i] = entry;
        }
        Ok(())
    }

    /// Byte-identical keys are a constraint violation; scan the frame's
    /// members before close mutates anything.
    fn check_attribute_uniqueness(&self, tos: usize, index_base: usize) -> Result<()> {
        let translator = self.options.attribute_translator.as_deref();
        let mut seen = hashbrown::HashSet::with_capacity(self.index.len() - index_base);
        for &entry in &self.index[index_base..] {
            let name = self.key_name(tos, entry, translator)?;
            if !seen.insert(name) {
                return Err(Error::DuplicateAttributeName);
            }
        }
        Ok(())
    }

    /// Name bytes of the key starting at `tos + entry`, resolving
    /// translated integer keys through the reverse dictionary.
    fn key_name(
        &self,
        tos: usize,
        entry: usize,
        translator: Option<&AttributeTranslator>,
    ) -> Result<Vec<u8>> {
        let key = Slice::new(&self.buffer[tos + entry..]);
        if key.is_string() {
            return key.string_bytes().map(<[u8]>::to_vec);
        }
        match translator {
            Some(t) => t.key_bytes(key).map(<[u8]>::to_vec),
            None => Err(Error::Internal),
        }
    }
}

/// Bytes needed to store `value` in two's complement.
fn int_length(value: i64) -> usize {
    if (-0x80..=0x7f).contains(&value) {
        return 1;
    }
    let mut x = if value >= 0 {
        value as u64
    } else {
        (-(value + 1)) as u64
    };
    let mut size = 0;
    loop {
        size += 1;
        x >>= 8;
        if x < 0x80 {
            break;
        }
    }
    size + 1
}

/// Bytes needed to store `value` unsigned, at least one.
fn uint_length(value: u64) -> usize {
    let mut len = 1;
    let mut x = value >> 8;
    while x != 0 {
        len += 1;
        x >>= 8;
    }
    len
}

/// Stable insertion sort; the closer uses it for small objects.
fn insertion_sort<T: Ord>(v: &mut [T]) {
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && v[j - 1] > v[j] {
            v.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Opens an array on construction and closes it when the scope ends.
///
/// A close failure inside `drop` cannot propagate; checked builds assert
/// that the compound did close.
pub struct ArrayScope<'a> {
    builder: &'a mut Builder,
}

impl<'a> ArrayScope<'a> {
    pub fn new(builder: &'a mut Builder) -> Result<ArrayScope<'a>> {
        builder.open_array(false)?;
        Ok(ArrayScope { builder })
    }

    /// Opens the compact, unindexed form.
    pub fn unindexed(builder: &'a mut Builder) -> Result<ArrayScope<'a>> {
        builder.open_array(true)?;
        Ok(ArrayScope { builder })
    }

    /// Opens the array as the value of `key` in the enclosing object.
    pub fn keyed(builder: &'a mut Builder, key: &str) -> Result<ArrayScope<'a>> {
        builder.insert(key, Value::Array { unindexed: false })?;
        Ok(ArrayScope { builder })
    }
}

impl std::ops::Deref for ArrayScope<'_> {
    type Target = Builder;

    fn deref(&self) -> &Builder { self.builder }
}

impl std::ops::DerefMut for ArrayScope<'_> {
    fn deref_mut(&mut self) -> &mut Builder { self.builder }
}

impl Drop for ArrayScope<'_> {
    fn drop(&mut self) {
        if !self.builder.is_closed() && self.builder.close().is_err() {
            debug_assert!(self.builder.is_closed(), "array scope failed to close");
        }
    }
}

/// Opens an object on construction and closes it when the scope ends.
pub struct ObjectScope<'a> {
    builder: &'a mut Builder,
}

impl<'a> ObjectScope<'a> {
    pub fn new(builder: &'a mut Builder) -> Result<ObjectScope<'a>> {
        builder.open_object(false)?;
        Ok(ObjectScope { builder })
    }

    /// Opens the compact, unindexed form.
    pub fn unindexed(builder: &'a mut Builder) -> Result<ObjectScope<'a>> {
        builder.open_object(true)?;
        Ok(ObjectScope { builder })
    }

    /// Opens the object as the value of `key` in the enclosing object.
    pub fn keyed(builder: &'a mut Builder, key: &str) -> Result<ObjectScope<'a>> {
        builder.insert(key, Value::Object { unindexed: false })?;
        Ok(ObjectScope { builder })
    }
}

impl std::ops::Deref for ObjectScope<'_> {
    type Target = Builder;

    fn deref(&self) -> &Builder { self.builder }
}

impl std::ops::DerefMut for ObjectScope<'_> {
    fn deref_mut(&mut self) -> &mut Builder { self.builder }
}

impl Drop for ObjectScope<'_> {
    fn drop(&mut self) {
        if !self.builder.is_closed() && self.builder.close().is_err() {
            debug_assert!(self.builder.is_closed(), "object scope failed to close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_lengths() {
        assert_eq!(int_length(0), 1);
        assert_eq!(int_length(127), 1);
        assert_eq!(int_length(-128), 1);
        assert_eq!(int_length(128), 2);
        assert_eq!(int_length(-129), 2);
        assert_eq!(int_length(32767), 2);
        assert_eq!(int_length(32768), 3);
        assert_eq!(int_length(i64::MAX), 8);
        assert_eq!(int_length(i64::MIN), 8);
    }

    #[test]
    fn uint_lengths() {
        assert_eq!(uint_length(10), 1);
        assert_eq!(uint_length(255), 1);
        assert_eq!(uint_length(256), 2);
        assert_eq!(uint_length(u64::MAX), 8);
    }

    #[test]
    fn small_ints_are_one_byte() {
        for v in -6..=9i64 {
            let mut b = Builder::new();
            b.add(v).unwrap();
            assert_eq!(b.size().unwrap(), 1);
        }
        let mut b = Builder::new();
        b.add(-6i64).unwrap();
        assert_eq!(b.data(), &[0x3a]);
    }

    #[test]
    fn open_close_discipline() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        assert!(b.is_open_array());
        b.open_object(false).unwrap();
        assert!(b.is_open_object());
        b.close().unwrap();
        assert!(b.is_open_array());
        b.close().unwrap();
        assert!(b.is_closed());
        assert_eq!(b.close().unwrap_err(), Error::NeedOpenCompound);
    }

    #[test]
    fn scope_guards_close() {
        let mut b = Builder::new();
        {
            let mut outer = ObjectScope::new(&mut b).unwrap();
            {
                let mut inner = ArrayScope::keyed(&mut outer, "xs").unwrap();
                inner.add(1).unwrap();
            }
            outer.insert("done", true).unwrap();
        }
        assert!(b.is_closed());
        assert!(b.has_key("xs").unwrap());
    }

    #[test]
    fn sealed_builder_rejects_more_values() {
        let mut b = Builder::new();
        b.add(1).unwrap();
        assert_eq!(b.add(2).unwrap_err(), Error::NeedOpenCompound);
        b.clear();
        b.add(2).unwrap();
        assert_eq!(b.data(), &[0x32]);
    }
}
