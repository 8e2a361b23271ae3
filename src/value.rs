//! Value carriers accepted by the builder's add operations.

use crate::{builder::Builder, error::Result, slice::Slice};

/// A single value to append, borrowing its payload from the caller.
///
/// Raw string and binary payloads are carried as plain Rust slices;
/// [`Value::Slice`] copies an already-encoded value verbatim; the
/// [`Value::Array`]/[`Value::Object`] variants open a compound that the
/// caller then fills and closes.
///
/// # Example
///
/// ```
/// use docpack::{Builder, Value};
///
/// let mut b = Builder::new();
/// b.open_array(false).unwrap();
/// b.add(1).unwrap();
/// b.add("two").unwrap();
/// b.add(Value::Null).unwrap();
/// b.close().unwrap();
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    /// Signed integer; encodes as SmallInt when in -6..=9.
    Int(i64),
    /// Unsigned integer; encodes as SmallInt when at most 9.
    UInt(u64),
    /// IEEE-754 double, preserved bit for bit.
    Double(f64),
    /// Signed milliseconds since the Unix epoch.
    UtcDate(i64),
    /// UTF-8 string.
    Str(&'a str),
    /// Opaque binary blob.
    Binary(&'a [u8]),
    /// Binary-coded decimal: sign, decimal exponent and the mantissa as
    /// one digit (0..=9) per byte, most significant first.
    Bcd {
        sign: i8,
        exponent: i32,
        mantissa: &'a [u8],
    },
    /// An already-encoded value, copied verbatim.
    Slice(Slice<'a>),
    /// Opens an array; the builder leaves it open for subsequent adds.
    Array { unindexed: bool },
    /// Opens an object; the builder leaves it open for subsequent adds.
    Object { unindexed: bool },
}

impl Value<'_> {
    /// An indexed array opener.
    pub fn array() -> Value<'static> { Value::Array { unindexed: false } }

    /// An indexed object opener.
    pub fn object() -> Value<'static> { Value::Object { unindexed: false } }
}

macro_rules! from_fn {
    ($from:ty, $ctor:expr) => {
        impl<'a> From<$from> for Value<'a> {
            fn from(v: $from) -> Value<'a> { $ctor(v) }
        }
    };
}

macro_rules! from_as {
    ($from:ty, $ctor:expr, $as:ty) => {
        impl<'a> From<$from> for Value<'a> {
            fn from(v: $from) -> Value<'a> { $ctor(v as $as) }
        }
    };
}

from_fn!(bool, Value::Bool);
from_fn!(i64, Value::Int);
from_fn!(u64, Value::UInt);
from_fn!(f64, Value::Double);
from_as!(i8, Value::Int, i64);
from_as!(i16, Value::Int, i64);
from_as!(i32, Value::Int, i64);
from_as!(isize, Value::Int, i64);
from_as!(u8, Value::UInt, u64);
from_as!(u16, Value::UInt, u64);
from_as!(u32, Value::UInt, u64);
from_as!(usize, Value::UInt, u64);
from_as!(f32, Value::Double, f64);

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Value<'a> { Value::Str(v) }
}

impl<'a> From<&'a String> for Value<'a> {
    fn from(v: &'a String) -> Value<'a> { Value::Str(v) }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(v: &'a [u8]) -> Value<'a> { Value::Binary(v) }
}

impl<'a> From<Slice<'a>> for Value<'a> {
    fn from(v: Slice<'a>) -> Value<'a> { Value::Slice(v) }
}

impl<'a> From<()> for Value<'a> {
    fn from(_: ()) -> Value<'a> { Value::Null }
}

/// A value that knows how to append itself to a builder.
///
/// The single open extension point of the format: implementors must
/// append exactly one value (which may be a whole compound).
pub trait Serializable {
    fn serialize_into(&self, builder: &mut Builder) -> Result<()>;
}

impl<T: Serializable + ?Sized> Serializable for &T {
    fn serialize_into(&self, builder: &mut Builder) -> Result<()> {
        (**self).serialize_into(builder)
    }
}
