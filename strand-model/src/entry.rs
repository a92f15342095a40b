//! Chain entries
//!
//! An entry is a typed opaque payload. The data format determines how the
//! content is interpreted; the entry hash is the hash of the canonical
//! serialization of the content alone, and is the entry's sole identity on
//! the DHT.

use crate::codec::{self, CodecError};
use crate::hash::{Hash, HashError, HashSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Genesis entry holding the serialized application definition.
pub const DNA_ENTRY_TYPE: &str = "%dna";
/// Second chain entry holding the authoring identity and public key.
pub const AGENT_ENTRY_TYPE: &str = "%agent";
/// Virtual entry type for the agent's key record on the DHT; never chained.
pub const KEY_ENTRY_TYPE: &str = "%key";
/// Deletion marker entry referencing the target hash.
pub const DEL_ENTRY_TYPE: &str = "%del";

/// Errors around entry content handling
#[derive(Error, Debug)]
pub enum EntryError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Invalid links entry, invalid json: {0}")]
    InvalidLinksJson(String),

    #[error("Invalid entry json: {0}")]
    InvalidJson(String),
}

/// How an entry's content is serialized and interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryFormat {
    /// JSON document, subject to an optional schema.
    #[serde(rename = "json")]
    Json,
    /// Plain string payload.
    #[serde(rename = "string")]
    String,
    /// A `{ "Links": [...] }` document carrying tagged directed edges.
    #[serde(rename = "links")]
    Links,
    /// Raw rules-host source (the in-tree reference nucleus).
    #[serde(rename = "raw-rules")]
    RawRules,
    /// Raw source for an external script host.
    #[serde(rename = "raw-script")]
    RawScript,
}

impl EntryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryFormat::Json => "json",
            EntryFormat::String => "string",
            EntryFormat::Links => "links",
            EntryFormat::RawRules => "raw-rules",
            EntryFormat::RawScript => "raw-script",
        }
    }
}

/// A typed opaque payload placed in the chain and optionally the DHT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_type: String,
    pub format: EntryFormat,
    pub content: String,
}

impl Entry {
    pub fn new(entry_type: impl Into<String>, format: EntryFormat, content: impl Into<String>) -> Self {
        Self { entry_type: entry_type.into(), format, content: content.into() }
    }

    /// Canonical bytes of the content alone; this is what the entry hash
    /// is computed over.
    pub fn content_bytes(&self) -> Result<Vec<u8>, EntryError> {
        Ok(codec::to_canonical(&self.content)?)
    }

    /// The entry's content address.
    pub fn sum(&self, spec: &HashSpec) -> Result<Hash, EntryError> {
        Ok(spec.sum(&self.content_bytes()?)?)
    }

    /// Serialize the whole entry (type, format, content).
    pub fn marshal(&self) -> Result<Vec<u8>, EntryError> {
        Ok(codec::to_canonical(self)?)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, EntryError> {
        Ok(codec::from_canonical(bytes)?)
    }
}

/// True for engine-reserved entry types (`%dna`, `%agent`, `%key`, `%del`).
pub fn is_system_type(entry_type: &str) -> bool {
    entry_type.starts_with('%')
}

/// The parsed body of a Links-format entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinksContent {
    #[serde(rename = "Links")]
    pub links: Vec<LinkSpec>,
}

/// One tagged directed edge from a base hash to a target hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    #[serde(rename = "Base")]
    pub base: String,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Tag")]
    pub tag: String,
}

/// Parse the content of a Links-format entry.
pub fn parse_links(content: &str) -> Result<LinksContent, EntryError> {
    serde_json::from_str(content).map_err(|e| EntryError::InvalidLinksJson(e.to_string()))
}

/// The body of a `%del` entry, so deletion is itself chain provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelContent {
    #[serde(rename = "Hash")]
    pub hash: String,
}

impl DelContent {
    pub fn new(target: &Hash) -> Self {
        Self { hash: target.to_b58() }
    }

    pub fn to_entry(&self) -> Entry {
        // serializing a two-field struct of strings cannot fail
        let content = serde_json::to_string(self).expect("del content serializes");
        Entry::new(DEL_ENTRY_TYPE, EntryFormat::Json, content)
    }

    pub fn parse(content: &str) -> Result<Self, EntryError> {
        serde_json::from_str(content).map_err(|e| EntryError::InvalidJson(e.to_string()))
    }
}
