//! Builder configuration.

use crate::translator::AttributeTranslator;
use std::sync::Arc;

/// Controls whether the closer may leave zero-byte padding between a
/// compound header and its first member instead of shifting the payload
/// down into the reserved header gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingBehavior {
    /// Shift to the tight header. The default.
    #[default]
    Flexible,
    /// Never pad; always shift to the tight header.
    NoPadding,
    /// Keep the full reserved header for 1- and 2-byte index widths and
    /// fill the gap with zero bytes, avoiding the payload shift.
    UsePadding,
}

/// Per-builder configuration.
///
/// The process-wide defaults are `Options::default()`; treat that value as
/// immutable configuration and clone it per builder.
#[derive(Clone)]
pub struct Options {
    /// Reject external pointer values (`0x1d`). On by default: externals
    /// embed raw addresses and are only meaningful inside one process.
    pub disallow_externals: bool,
    /// Reject binary-coded decimal values.
    pub disallow_bcd: bool,
    /// Sort object keys at close, enabling binary search on the index
    /// table. When off, non-compact objects close to the unsorted indexed
    /// variants.
    pub sort_object_keys: bool,
    /// Verify at each object close that no two keys are byte-identical.
    pub check_attribute_uniqueness: bool,
    /// Padding policy for the close-time header layout.
    pub padding_behavior: PaddingBehavior,
    /// Optional dictionary replacing well-known attribute names with
    /// pre-encoded short keys.
    pub attribute_translator: Option<Arc<AttributeTranslator>>,
}

impl Options {
    /// Options with the default policy set.
    pub fn new() -> Options {
        Options {
            disallow_externals: true,
            disallow_bcd: false,
            sort_object_keys: true,
            check_attribute_uniqueness: false,
            padding_behavior: PaddingBehavior::Flexible,
            attribute_translator: None,
        }
    }
}

impl Default for Options {
    fn default() -> Options { Options::new() }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("disallow_externals", &self.disallow_externals)
            .field("disallow_bcd", &self.disallow_bcd)
            .field("sort_object_keys", &self.sort_object_keys)
            .field("check_attribute_uniqueness", &self.check_attribute_uniqueness)
            .field("padding_behavior", &self.padding_behavior)
            .field(
                "attribute_translator",
                &self.attribute_translator.as_ref().map(|t| t.len()),
            )
            .finish()
    }
}
