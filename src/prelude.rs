pub use crate::{
    builder::{ArrayScope, Builder, ObjectScope},
    error::{Error, Result},
    options::{Options, PaddingBehavior},
    slice::Slice,
    translator::AttributeTranslator,
    types::ValueType,
    value::{Serializable, Value},
};
pub use bytes::{Bytes, BytesMut};
