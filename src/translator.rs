//! Attribute-name translation.
//!
//! A translator replaces well-known attribute names with pre-encoded short
//! keys, typically small unsigned integers indexing a dictionary shared by
//! writer and reader. Keyed `insert` calls consult it before falling back
//! to a plain string key; the closer uses the reverse direction to locate
//! the name behind a translated key when sorting or checking uniqueness.

use crate::{
    error::{Error, Result},
    slice::Slice,
};
use hashbrown::HashMap;

/// A read-only attribute dictionary, fixed once sealed.
///
/// # Example
///
/// ```
/// use docpack::AttributeTranslator;
///
/// let mut translator = AttributeTranslator::new();
/// translator.add("_key", 1).unwrap();
/// translator.add("_rev", 2).unwrap();
/// translator.seal();
///
/// assert!(translator.translate("_key").is_some());
/// assert!(translator.translate("name").is_none());
/// ```
#[derive(Debug, Default)]
pub struct AttributeTranslator {
    forward: HashMap<String, Vec<u8>>,
    reverse: HashMap<u64, String>,
    sealed: bool,
}

impl AttributeTranslator {
    /// Creates an empty translator.
    pub fn new() -> AttributeTranslator { AttributeTranslator::default() }

    /// Number of translated attribute names.
    pub fn len(&self) -> usize { self.forward.len() }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool { self.forward.is_empty() }

    /// Registers `name` under the dictionary id `id`. The id is stored in
    /// its canonical integer encoding and used verbatim as the key bytes.
    pub fn add(&mut self, name: &str, id: u64) -> Result<()> {
        if self.sealed {
            return Err(Error::Internal);
        }
        if id == 0 {
            // id 0 would encode as SmallInt zero, which readers treat as
            // an absent translation
            return Err(Error::OutOfRange);
        }
        let mut encoded = crate::builder::Builder::new();
        encoded.add(id)?;
        self.forward
            .insert(name.to_string(), encoded.data().to_vec());
        self.reverse.insert(id, name.to_string());
        Ok(())
    }

    /// Marks the dictionary complete. Further `add` calls fail.
    pub fn seal(&mut self) { self.sealed = true; }

    /// Pre-encoded key bytes for `name`, if translated.
    pub fn translate(&self, name: &str) -> Option<&[u8]> {
        self.forward.get(name).map(Vec::as_slice)
    }

    /// The attribute name behind a dictionary id.
    pub fn name_for_id(&self, id: u64) -> Option<&str> {
        self.reverse.get(&id).map(String::as_str)
    }

    /// Resolves the name bytes behind an encoded key: plain strings pass
    /// through, translated integer keys go through the reverse map.
    pub(crate) fn key_bytes<'a>(&'a self, key: Slice<'a>) -> Result<&'a [u8]> {
        if key.is_string() {
            return key.string_bytes();
        }
        let id = key.to_u64()?;
        self.name_for_id(id)
            .map(str::as_bytes)
            .ok_or(Error::Internal)
    }
}
