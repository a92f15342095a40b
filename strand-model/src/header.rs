//! Chain headers
//!
//! A header is the signed container for one chain entry: it links the
//! previous header, the most recent header of the same entry type, and the
//! entry itself. The signature covers the entry hash under the authoring
//! agent's key; the header hash is computed over the canonical header bytes.

use crate::codec::{self, CodecError};
use crate::entry::{Entry, EntryError};
use crate::hash::{Hash, HashError, HashSpec};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors building or checking headers
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Invalid signature length: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("Signature verification failed")]
    InvalidSignature,
}

/// A detached ed25519 signature over an entry hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The signed link between an entry, its predecessor header, and the
/// previous header of the same type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub entry_type: String,
    /// Authoring peer's wall clock, UTC. Advisory only.
    pub time: DateTime<Utc>,
    /// Previous header in the chain; null for the genesis DNA header.
    pub prev_header: Hash,
    pub entry_hash: Hash,
    /// Most recent header of the same type; null if this is the first.
    pub prev_same_type: Hash,
    pub sig: Signature,
}

impl Header {
    /// Build a header for `entry`, signing its hash with `key`.
    ///
    /// Returns the header hash and the header. Does not touch the chain;
    /// the caller commits via `Chain::add_entry`.
    pub fn build(
        spec: &HashSpec,
        entry_type: &str,
        now: DateTime<Utc>,
        entry: &Entry,
        prev_header: Hash,
        prev_same_type: Hash,
        key: &SigningKey,
    ) -> Result<(Hash, Header), HeaderError> {
        let entry_hash = entry.sum(spec)?;
        let sig = key.sign(entry_hash.as_bytes());
        let header = Header {
            entry_type: entry_type.to_string(),
            time: now,
            prev_header,
            entry_hash,
            prev_same_type,
            sig: Signature(sig.to_bytes().to_vec()),
        };
        let hash = header.sum(spec)?;
        Ok((hash, header))
    }

    /// Canonical byte form; the header hash is computed over these bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        Ok(codec::to_canonical(self)?)
    }

    /// The header's content address.
    pub fn sum(&self, spec: &HashSpec) -> Result<Hash, HeaderError> {
        Ok(spec.sum(&self.canonical_bytes()?)?)
    }

    /// Verify the signature over `entry_hash` against the agent's key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), HeaderError> {
        let bytes: [u8; 64] = self
            .sig
            .0
            .as_slice()
            .try_into()
            .map_err(|_| HeaderError::InvalidSignatureLength(self.sig.0.len()))?;
        let sig = ed25519_dalek::Signature::from_bytes(&bytes);
        key.verify(self.entry_hash.as_bytes(), &sig)
            .map_err(|_| HeaderError::InvalidSignature)
    }

    pub fn marshal(&self) -> Result<Vec<u8>, HeaderError> {
        self.canonical_bytes()
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, HeaderError> {
        Ok(codec::from_canonical(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryFormat;
    use rand::rngs::OsRng;

    fn test_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn build_one(key: &SigningKey) -> (Hash, Header) {
        let spec = HashSpec::default();
        let entry = Entry::new("evenNumbers", EntryFormat::String, "2");
        Header::build(
            &spec,
            "evenNumbers",
            Utc::now(),
            &entry,
            Hash::null(),
            Hash::null(),
            key,
        )
        .unwrap()
    }

    #[test]
    fn test_build_links_and_signs() {
        let spec = HashSpec::default();
        let key = test_key();
        let (hash, header) = build_one(&key);

        assert_eq!(header.entry_type, "evenNumbers");
        assert!(header.prev_header.is_null());
        assert!(header.prev_same_type.is_null());
        assert_eq!(hash, header.sum(&spec).unwrap());
        header.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = test_key();
        let other = test_key();
        let (_, header) = build_one(&key);
        assert!(matches!(
            header.verify(&other.verifying_key()),
            Err(HeaderError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_entry_hash() {
        let spec = HashSpec::default();
        let key = test_key();
        let (_, mut header) = build_one(&key);
        header.entry_hash = spec.sum(b"something else").unwrap();
        assert!(header.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn test_marshal_round_trip_reproduces_bytes() {
        let spec = HashSpec::default();
        let key = test_key();
        let (hash, header) = build_one(&key);

        let bytes = header.marshal().unwrap();
        let back = Header::unmarshal(&bytes).unwrap();
        assert_eq!(header, back);
        // reserialization must reproduce the bytes that produced the hash
        assert_eq!(back.canonical_bytes().unwrap(), bytes);
        assert_eq!(back.sum(&spec).unwrap(), hash);
    }
}
