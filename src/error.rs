//! Builder and reader error types.

use std::{error, fmt};

/// Errors raised while building or inspecting a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `start`/`size`/`slice` queried while a compound is still open.
    NotSealed,
    /// `close` called with no open compound.
    NeedOpenCompound,
    /// Positional `add` outside of an open array.
    NeedOpenArray,
    /// Keyed `insert` outside of an open object.
    NeedOpenObject,
    /// A second key was written without an intervening value.
    KeyAlreadyWritten,
    /// An object key of a kind other than string, small integer or
    /// unsigned integer.
    KeyMustBeString,
    /// External pointer values are disabled by the active options.
    ExternalsDisallowed,
    /// Binary-coded decimals are disabled by the active options.
    BcdDisallowed,
    /// Two attributes of one object share the same byte-identical key.
    DuplicateAttributeName,
    /// A length or offset does not fit the address space or the
    /// representable width.
    OutOfRange,
    /// An internal invariant was broken.
    Internal,
}

impl Error {
    /// Human-readable description of the error.
    pub const fn description(&self) -> &'static str {
        match self {
            Error::NotSealed => "builder value is not sealed",
            Error::NeedOpenCompound => "need an open array or object",
            Error::NeedOpenArray => "need an open array",
            Error::NeedOpenObject => "need an open object",
            Error::KeyAlreadyWritten => "key has already been written, need value",
            Error::KeyMustBeString => "object key must be a string",
            Error::ExternalsDisallowed => "external values are disallowed",
            Error::BcdDisallowed => "BCD values are disallowed",
            Error::DuplicateAttributeName => "duplicate attribute name",
            Error::OutOfRange => "length or offset out of range",
            Error::Internal => "internal error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Error {}

/// Result type alias for builder operations.
pub type Result<T> = std::result::Result<T, Error>;
