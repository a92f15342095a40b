//! Canonical byte framing
//!
//! Every entry, header, and wire message has exactly one canonical byte form:
//! MessagePack, struct-as-array, fields in declaration order. Hashes are
//! computed over these bytes, so any reserializer must reproduce them; the
//! choice is recorded DNA-wide in `Dna::wire_format` as `"msgpack"`.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// The framing name recorded in the DNA.
pub const WIRE_FORMAT: &str = "msgpack";

/// Errors from canonical encode/decode
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Serialize to the canonical byte form.
pub fn to_canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Deserialize from the canonical byte form.
pub fn from_canonical<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
