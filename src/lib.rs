//! # docpack
//!
//! An append-only builder and zero-copy reader for a compact tagged
//! binary document format: a self-describing, schema-less replacement
//! for JSON inside a database system.
//!
//! Documents are built incrementally into one contiguous buffer. Arrays
//! and objects are opened before their size or member count is known;
//! closing them retroactively picks the most compact header encoding,
//! shifts the payload at most once, sorts object members by key for
//! binary search and patches the header in place. The finished bytes
//! are traversed without copying through [`Slice`].
//!
//! # Example
//!
//! ```
//! use docpack::{Builder, Value};
//!
//! let mut b = Builder::new();
//! b.open_object(false).unwrap();
//! b.insert("id", 42).unwrap();
//! b.insert("name", "example").unwrap();
//! b.insert("tags", Value::array()).unwrap();
//! b.add("a").unwrap();
//! b.add("b").unwrap();
//! b.close().unwrap();
//! b.close().unwrap();
//!
//! let doc = b.slice().unwrap();
//! assert_eq!(doc.get("id").unwrap().unwrap().to_u64().unwrap(), 42);
//! assert_eq!(doc.get("tags").unwrap().unwrap().length().unwrap(), 2);
//! ```

/// The incremental document builder.
pub mod builder;
/// Error types.
pub mod error;
/// Builder configuration.
pub mod options;
/// Prelude
pub mod prelude;
/// Zero-copy reading of encoded documents.
pub mod slice;
/// Attribute-name translation.
pub mod translator;
/// Type bytes and value classification.
pub mod types;
/// Value carriers accepted by the builder.
pub mod value;
/// Variable-length length encoding for compact compounds.
mod varint;

pub use builder::{ArrayScope, Builder, ObjectScope};
pub use bytes::{Bytes, BytesMut};
pub use error::{Error, Result};
pub use options::{Options, PaddingBehavior};
pub use slice::Slice;
pub use translator::AttributeTranslator;
pub use types::ValueType;
pub use value::{Serializable, Value};
