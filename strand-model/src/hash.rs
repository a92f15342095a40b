//! Content addresses
//!
//! A `Hash` is a multihash-style identifier: an algorithm code and digest
//! length followed by the digest bytes. The human-readable form is base58;
//! the wire form is a fixed 34-byte field regardless of digest length. A
//! sentinel null hash (a single zero byte) marks "no predecessor".

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Multihash code for SHA2-256.
pub const HASH_CODE_SHA2_256: u8 = 0x12;

/// Fixed width of a hash on the wire: code + length + zero-padded digest.
pub const HASH_WIRE_LEN: usize = 34;

/// Errors that can occur decoding or computing hashes
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    #[error("Invalid base58 encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid hash length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Unsupported hash type: code {0:#x}")]
    UnsupportedHashType(u8),

    #[error("Hash digest truncated: header says {declared}, got {got}")]
    Truncated { declared: usize, got: usize },
}

/// The digest algorithm and length every hash in one chain is computed with.
///
/// Fixed at chain creation and recorded in the DNA; all peers of one
/// application share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSpec {
    pub code: u8,
    pub length: u8,
}

impl Default for HashSpec {
    fn default() -> Self {
        Self { code: HASH_CODE_SHA2_256, length: 32 }
    }
}

impl HashSpec {
    /// Digest `data` according to this spec.
    pub fn sum(&self, data: &[u8]) -> Result<Hash, HashError> {
        if self.code != HASH_CODE_SHA2_256 || self.length != 32 {
            return Err(HashError::UnsupportedHashType(self.code));
        }
        let digest = Sha256::digest(data);
        let mut bytes = Vec::with_capacity(2 + digest.len());
        bytes.push(self.code);
        bytes.push(self.length);
        bytes.extend_from_slice(&digest);
        Ok(Hash(bytes))
    }
}

/// A content address: `[code][len][digest…]`, or a single zero byte (null).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(Vec<u8>);

impl Hash {
    /// The null hash: marks "no predecessor".
    pub fn null() -> Self {
        Hash(vec![0])
    }

    pub fn is_null(&self) -> bool {
        self.0.len() == 1 && self.0[0] == 0
    }

    /// Parse a base58-encoded hash.
    pub fn from_b58(s: &str) -> Result<Self, HashError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| HashError::InvalidEncoding(e.to_string()))?;
        Self::from_raw(bytes)
    }

    /// Wrap already-decoded multihash bytes, checking the declared length.
    pub fn from_raw(bytes: Vec<u8>) -> Result<Self, HashError> {
        if bytes.len() == 1 && bytes[0] == 0 {
            return Ok(Self::null());
        }
        if bytes.len() < 2 {
            return Err(HashError::InvalidLength { expected: 2, got: bytes.len() });
        }
        let declared = bytes[1] as usize;
        let got = bytes.len() - 2;
        if declared != got {
            return Err(HashError::Truncated { declared, got });
        }
        Ok(Hash(bytes))
    }

    /// Encode to the human-readable base58 form.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// The raw multihash bytes (1 byte if null).
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode to the fixed 34-byte wire form. The null hash is all zeros;
    /// short digests are zero-padded on the right.
    pub fn to_wire(&self) -> [u8; HASH_WIRE_LEN] {
        let mut out = [0u8; HASH_WIRE_LEN];
        if !self.is_null() {
            let n = self.0.len().min(HASH_WIRE_LEN);
            out[..n].copy_from_slice(&self.0[..n]);
        }
        out
    }

    /// Decode from the fixed 34-byte wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != HASH_WIRE_LEN {
            return Err(HashError::InvalidLength { expected: HASH_WIRE_LEN, got: bytes.len() });
        }
        if bytes[0] == 0 {
            return Ok(Self::null());
        }
        let declared = bytes[1] as usize;
        if declared > HASH_WIRE_LEN - 2 {
            return Err(HashError::Truncated { declared, got: HASH_WIRE_LEN - 2 });
        }
        Ok(Hash(bytes[..2 + declared].to_vec()))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_b58())
    }
}

// Human-readable formats (JSON, TOML) carry the base58 string; binary
// formats carry the fixed 34-byte field.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_b58())
        } else {
            serializer.serialize_bytes(&self.to_wire())
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl<'de> de::Visitor<'de> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a base58 string or a {HASH_WIRE_LEN}-byte field")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Hash, E> {
                Hash::from_b58(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Hash, E> {
                Hash::from_wire(v).map_err(E::custom)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Hash, A::Error> {
                let mut bytes = Vec::with_capacity(HASH_WIRE_LEN);
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Hash::from_wire(&bytes).map_err(de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(HashVisitor)
        } else {
            deserializer.deserialize_bytes(HashVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> HashSpec {
        HashSpec::default()
    }

    #[test]
    fn test_sum_and_b58_round_trip() {
        let h = spec().sum(b"some data").unwrap();
        assert_eq!(h.as_bytes()[0], HASH_CODE_SHA2_256);
        assert_eq!(h.as_bytes()[1], 32);

        let s = h.to_b58();
        let back = Hash::from_b58(&s).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn test_sum_is_deterministic() {
        let a = spec().sum(b"payload").unwrap();
        let b = spec().sum(b"payload").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, spec().sum(b"other").unwrap());
    }

    #[test]
    fn test_null_hash() {
        let n = Hash::null();
        assert!(n.is_null());
        assert!(!spec().sum(b"x").unwrap().is_null());
        assert_eq!(n, Hash::null());
    }

    #[test]
    fn test_wire_round_trip() {
        let h = spec().sum(b"wire me").unwrap();
        let wire = h.to_wire();
        assert_eq!(wire.len(), HASH_WIRE_LEN);
        assert_eq!(Hash::from_wire(&wire).unwrap(), h);
    }

    #[test]
    fn test_null_wire_form_is_all_zeros() {
        let wire = Hash::null().to_wire();
        assert!(wire.iter().all(|b| *b == 0));
        assert!(Hash::from_wire(&wire).unwrap().is_null());
    }

    #[test]
    fn test_from_wire_rejects_bad_length() {
        assert!(matches!(
            Hash::from_wire(&[1u8; 10]),
            Err(HashError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_from_b58_rejects_garbage() {
        assert!(Hash::from_b58("not!base58!").is_err());
    }

    #[test]
    fn test_unsupported_hash_code() {
        let bad = HashSpec { code: 0x11, length: 20 };
        assert_eq!(bad.sum(b"x"), Err(HashError::UnsupportedHashType(0x11)));
    }

    #[test]
    fn test_msgpack_round_trip() {
        let h = spec().sum(b"codec").unwrap();
        let bytes = rmp_serde::to_vec(&h).unwrap();
        let back: Hash = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn test_json_uses_b58() {
        let h = spec().sum(b"codec").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_b58()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
