//! Chain persistence - transactional store behind the chain
//!
//! Three logical buckets in one redb database: Entries (entry hash → entry
//! bytes), Headers (header hash → header bytes), Meta (current top and
//! per-type tops). An append touches all three in a single write
//! transaction.

use redb::{Database, TableDefinition};
use std::path::Path;
use strand_model::hash::{Hash, HashError};
use thiserror::Error;

const ENTRIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const HEADERS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("headers");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Meta key for the chain's current top header hash.
const META_TOP: &str = "top";
/// Meta key prefix for per-type top header hashes.
const META_TOP_TYPE_PREFIX: &str = "top:";
/// Meta key for the DNA entry hash recorded at genesis.
const META_DNA: &str = "dna";

#[derive(Error, Debug)]
pub enum ChainStoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

/// Transactional store backing one chain.
pub struct ChainStore {
    db: Database,
}

impl ChainStore {
    /// Open or create the chain database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainStoreError> {
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES_TABLE)?;
            let _ = write_txn.open_table(HEADERS_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append one (header, entry) pair and advance the tops, atomically.
    pub fn append(
        &self,
        header_hash: &Hash,
        header_bytes: &[u8],
        entry_hash: &Hash,
        entry_bytes: &[u8],
        entry_type: &str,
    ) -> Result<(), ChainStoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
            entries.insert(entry_hash.to_wire().as_slice(), entry_bytes)?;

            let mut headers = write_txn.open_table(HEADERS_TABLE)?;
            headers.insert(header_hash.to_wire().as_slice(), header_bytes)?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            let wire = header_hash.to_wire();
            meta.insert(META_TOP, wire.as_slice())?;
            let type_key = format!("{META_TOP_TYPE_PREFIX}{entry_type}");
            meta.insert(type_key.as_str(), wire.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_header(&self, hash: &Hash) -> Result<Option<Vec<u8>>, ChainStoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(HEADERS_TABLE)?;
        Ok(table.get(hash.to_wire().as_slice())?.map(|v| v.value().to_vec()))
    }

    pub fn get_entry(&self, hash: &Hash) -> Result<Option<Vec<u8>>, ChainStoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES_TABLE)?;
        Ok(table.get(hash.to_wire().as_slice())?.map(|v| v.value().to_vec()))
    }

    /// The current top header hash, if the chain is non-empty.
    pub fn top(&self) -> Result<Option<Hash>, ChainStoreError> {
        self.get_meta_hash(META_TOP)
    }

    /// Record the DNA entry hash at genesis.
    pub fn put_dna_hash(&self, hash: &Hash) -> Result<(), ChainStoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(META_DNA, hash.to_wire().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The DNA entry hash recorded at genesis.
    pub fn dna_hash(&self) -> Result<Option<Hash>, ChainStoreError> {
        self.get_meta_hash(META_DNA)
    }

    fn get_meta_hash(&self, key: &str) -> Result<Option<Hash>, ChainStoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META_TABLE)?;
        match table.get(key)? {
            Some(v) => Ok(Some(Hash::from_wire(v.value())?)),
            None => Ok(None),
        }
    }
}
