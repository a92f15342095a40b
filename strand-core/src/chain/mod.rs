//! The local hash-chain
//!
//! An append-only ordered sequence of (header, entry) pairs authored by one
//! agent, persisted through [`store::ChainStore`]. The chain keeps derived
//! indexes in memory (header hashes, entry-hash positions, per-type tops);
//! all of them are rebuildable from the sequence. Appending is split into
//! `prepare_header` (compute, sign, no mutation) and `add_entry` (atomic
//! append gated on the expected position), so validation can run in between
//! without holding any lock.

pub mod store;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde_bytes::ByteBuf;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use store::{ChainStore, ChainStoreError};
use strand_model::codec::CodecError;
use strand_model::entry::{Entry, EntryError};
use strand_model::hash::{Hash, HashError, HashSpec};
use strand_model::header::{Header, HeaderError};
use thiserror::Error;

/// Errors that can occur during chain operations
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Store error: {0}")]
    Store(#[from] ChainStoreError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Position mismatch: expected {expected}, got {got}")]
    PositionMismatch { expected: usize, got: usize },

    #[error("Header does not match entry: header links {linked}, entry hashes to {actual}")]
    EntryHashMismatch { linked: Hash, actual: Hash },

    #[error("chain corrupt: loop detected at {0}")]
    Loop(String),

    #[error("chain corrupt: dangling header pointer {0}")]
    DanglingPointer(String),

    #[error("chain did not terminate at DNA")]
    BadTermination,

    #[error("chain corrupt at position {position}: {reason}")]
    CorruptAt { position: usize, reason: String },
}

impl ChainError {
    /// Corruption is fatal to the engine instance; everything else is not.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ChainError::Loop(_)
                | ChainError::DanglingPointer(_)
                | ChainError::BadTermination
                | ChainError::CorruptAt { .. }
        )
    }
}

/// This peer's append-only sequence of signed headers and their entries.
///
/// `Debug` and `PartialEq` compare the reconstructible in-memory state only;
/// `store` is a handle to an on-disk database and has no meaningful value
/// equality.
pub struct Chain {
    spec: HashSpec,
    store: ChainStore,
    /// Header hash at each position.
    hashes: Vec<Hash>,
    headers: Vec<Header>,
    entries: Vec<Entry>,
    /// Header hash → position.
    header_pos: HashMap<Hash, usize>,
    /// Entry hash → position.
    entry_pos: HashMap<Hash, usize>,
    /// Entry type → position of the latest header of that type.
    type_tops: HashMap<String, usize>,
    /// Entry hash of position 0, recorded at genesis.
    dna_hash: Option<Hash>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("spec", &self.spec)
            .field("hashes", &self.hashes)
            .field("headers", &self.headers)
            .field("entries", &self.entries)
            .field("header_pos", &self.header_pos)
            .field("entry_pos", &self.entry_pos)
            .field("type_tops", &self.type_tops)
            .field("dna_hash", &self.dna_hash)
            .finish()
    }
}

impl Chain {
    /// Open the chain at `db_path`, reconstructing all indexes from the
    /// store and verifying each reloaded header hash.
    pub fn open(spec: HashSpec, db_path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let store = ChainStore::open(db_path)?;
        let mut chain = Self {
            spec,
            store,
            hashes: Vec::new(),
            headers: Vec::new(),
            entries: Vec::new(),
            header_pos: HashMap::new(),
            entry_pos: HashMap::new(),
            type_tops: HashMap::new(),
            dna_hash: None,
        };
        chain.reload()?;
        Ok(chain)
    }

    fn reload(&mut self) -> Result<(), ChainError> {
        let Some(top) = self.store.top()? else {
            return Ok(());
        };

        // walk the stored sequence backwards, newest first
        let mut sequence: Vec<(Hash, Header, Entry)> = Vec::new();
        let mut visited: HashSet<Hash> = HashSet::new();
        let mut cur = top;
        loop {
            if !visited.insert(cur.clone()) {
                return Err(ChainError::Loop(cur.to_b58()));
            }
            let header_bytes = self
                .store
                .get_header(&cur)?
                .ok_or_else(|| ChainError::DanglingPointer(cur.to_b58()))?;
            let header = Header::unmarshal(&header_bytes)?;
            if header.sum(&self.spec)? != cur {
                return Err(ChainError::CorruptAt {
                    position: sequence.len(),
                    reason: "stored header hash doesn't match".into(),
                });
            }
            let entry_bytes = self
                .store
                .get_entry(&header.entry_hash)?
                .ok_or_else(|| ChainError::DanglingPointer(header.entry_hash.to_b58()))?;
            let entry = Entry::unmarshal(&entry_bytes)?;

            let prev = header.prev_header.clone();
            sequence.push((cur, header, entry));
            if prev.is_null() {
                break;
            }
            cur = prev;
        }
        sequence.reverse();

        for (hash, header, entry) in sequence {
            let pos = self.headers.len();
            self.index_pair(pos, hash, header, entry);
        }
        self.dna_hash = self.store.dna_hash()?;
        Ok(())
    }

    fn index_pair(&mut self, pos: usize, hash: Hash, header: Header, entry: Entry) {
        self.header_pos.insert(hash.clone(), pos);
        self.entry_pos.insert(header.entry_hash.clone(), pos);
        self.type_tops.insert(header.entry_type.clone(), pos);
        self.hashes.push(hash);
        self.headers.push(header);
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn spec(&self) -> &HashSpec {
        &self.spec
    }

    /// The DNA entry hash this chain started from.
    pub fn dna_hash(&self) -> Option<&Hash> {
        self.dna_hash.as_ref()
    }

    /// The headers in append order.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// The entries in append order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Compute the entry hash, fill the prev-pointers from the current
    /// tips, and sign the entry hash. Does not commit; the returned
    /// position is the optimistic gate for `add_entry`.
    pub fn prepare_header(
        &self,
        now: DateTime<Utc>,
        entry: &Entry,
        key: &SigningKey,
    ) -> Result<(usize, Hash, Header), ChainError> {
        let prev = self.hashes.last().cloned().unwrap_or_else(Hash::null);
        let prev_same_type = self
            .type_tops
            .get(&entry.entry_type)
            .map(|&pos| self.hashes[pos].clone())
            .unwrap_or_else(Hash::null);
        let (hash, header) = Header::build(
            &self.spec,
            &entry.entry_type,
            now,
            entry,
            prev,
            prev_same_type,
            key,
        )?;
        Ok((self.len(), hash, header))
    }

    /// Atomically append a prepared (header, entry) pair at `position`.
    ///
    /// Fails without side effects if the chain has moved on since
    /// `prepare_header` (the optimistic gate), so concurrent preparers
    /// cannot interleave.
    pub fn add_entry(
        &mut self,
        position: usize,
        header_hash: Hash,
        header: Header,
        entry: Entry,
    ) -> Result<(), ChainError> {
        if position != self.len() {
            return Err(ChainError::PositionMismatch { expected: self.len(), got: position });
        }
        let actual = entry.sum(&self.spec)?;
        if actual != header.entry_hash {
            return Err(ChainError::EntryHashMismatch { linked: header.entry_hash.clone(), actual });
        }

        // store first; in-memory tips only move if the transaction commits
        self.store.append(
            &header_hash,
            &header.canonical_bytes()?,
            &header.entry_hash,
            &entry.marshal()?,
            &entry.entry_type,
        )?;
        if position == 0 {
            self.store.put_dna_hash(&header.entry_hash)?;
            self.dna_hash = Some(header.entry_hash.clone());
        }
        self.index_pair(position, header_hash, header, entry);
        Ok(())
    }

    /// The top header hash, or None for an empty chain.
    pub fn top(&self) -> Option<(&Hash, &Header)> {
        let last = self.headers.len().checked_sub(1)?;
        Some((&self.hashes[last], &self.headers[last]))
    }

    /// The most recent header of the given type.
    pub fn top_of_type(&self, entry_type: &str) -> Option<(&Hash, &Header)> {
        let &pos = self.type_tops.get(entry_type)?;
        Some((&self.hashes[pos], &self.headers[pos]))
    }

    /// Look up a header by its hash.
    pub fn get(&self, header_hash: &Hash) -> Option<&Header> {
        self.header_pos.get(header_hash).map(|&pos| &self.headers[pos])
    }

    /// Look up an entry by its hash; the type rides on the entry.
    pub fn get_entry(&self, entry_hash: &Hash) -> Option<&Entry> {
        self.entry_pos.get(entry_hash).map(|&pos| &self.entries[pos])
    }

    /// The header that committed the given entry.
    pub fn get_entry_header(&self, entry_hash: &Hash) -> Option<(&Hash, &Header)> {
        self.entry_pos
            .get(entry_hash)
            .map(|&pos| (&self.hashes[pos], &self.headers[pos]))
    }

    /// Traverse from the current top backwards to genesis, invoking
    /// `visitor(header_hash, header, entry)` each step.
    ///
    /// Defends against corrupt cycles with a visited set, and requires the
    /// terminal entry to be the recorded DNA entry.
    pub fn walk<F>(&self, mut visitor: F) -> Result<(), ChainError>
    where
        F: FnMut(&Hash, &Header, &Entry) -> Result<(), ChainError>,
    {
        if self.headers.is_empty() {
            return Ok(());
        }
        let mut visited: HashSet<Hash> = HashSet::new();
        let mut cur = self.hashes[self.hashes.len() - 1].clone();
        loop {
            if !visited.insert(cur.clone()) {
                return Err(ChainError::Loop(cur.to_b58()));
            }
            let &pos = self
                .header_pos
                .get(&cur)
                .ok_or_else(|| ChainError::DanglingPointer(cur.to_b58()))?;
            let header = &self.headers[pos];
            visitor(&cur, header, &self.entries[pos])?;

            if header.prev_header.is_null() {
                return match &self.dna_hash {
                    Some(dna) if *dna == header.entry_hash => Ok(()),
                    _ => Err(ChainError::BadTermination),
                };
            }
            cur = header.prev_header.clone();
        }
    }

    /// Walk and recompute every header hash and entry hash against the
    /// stored values; fails at the first mismatch with its position.
    pub fn validate(&self) -> Result<(), ChainError> {
        self.walk(|key, header, entry| {
            let &position = self.header_pos.get(key).expect("walk resolved this hash");
            if header.sum(&self.spec)? != *key {
                return Err(ChainError::CorruptAt {
                    position,
                    reason: "header hash doesn't match".into(),
                });
            }
            if entry.sum(&self.spec)? != header.entry_hash {
                return Err(ChainError::CorruptAt {
                    position,
                    reason: "entry hash doesn't match".into(),
                });
            }
            Ok(())
        })
    }

    /// Stream-copy the entire chain, oldest first.
    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<(), ChainError> {
        let mut pairs: Vec<(ByteBuf, ByteBuf)> = Vec::with_capacity(self.headers.len());
        for (header, entry) in self.headers.iter().zip(&self.entries) {
            pairs.push((
                ByteBuf::from(header.canonical_bytes()?),
                ByteBuf::from(entry.marshal()?),
            ));
        }
        rmp_serde::encode::write(writer, &pairs).map_err(CodecError::from)?;
        Ok(())
    }

    /// Rebuild a chain from a `marshal` stream into a fresh store,
    /// reconstructing and verifying all indexes.
    pub fn unmarshal<R: Read>(
        spec: HashSpec,
        reader: &mut R,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, ChainError> {
        let pairs: Vec<(ByteBuf, ByteBuf)> =
            rmp_serde::decode::from_read(reader).map_err(CodecError::from)?;

        let mut chain = Chain::open(spec, db_path)?;
        for (header_bytes, entry_bytes) in pairs {
            let header = Header::unmarshal(&header_bytes)?;
            let entry = Entry::unmarshal(&entry_bytes)?;
            let hash = header.sum(&spec)?;
            chain.add_entry(chain.len(), hash, header, entry)?;
        }
        chain.validate()?;
        Ok(chain)
    }
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
            && self.hashes == other.hashes
            && self.headers == other.headers
            && self.entries == other.entries
            && self.header_pos == other.header_pos
            && self.entry_pos == other.entry_pos
            && self.type_tops == other.type_tops
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, header) in self.headers.iter().enumerate() {
            writeln!(
                f,
                "{}: {} {} (entry {})",
                pos, header.entry_type, self.hashes[pos], header.entry_hash
            )?;
        }
        Ok(())
    }
}
