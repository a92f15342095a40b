//! The local DHT shard
//!
//! Content-addressed, status-aware record and link storage for the slice of
//! the DHT this peer is responsible for, plus the bookkeeping gossip runs
//! on: the sequential put log, the message-fingerprint set, and the
//! per-gossiper last-seen index. Everything lives in one redb database
//! (`dht.db`); each mutation is a single write transaction.
//!
//! Validation does not happen here. The action pipeline validates before it
//! mutates; this store only enforces the structural invariants (dense put
//! indexes, monotone status transitions).

use rand::seq::SliceRandom;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strand_model::codec::{self, CodecError};
use strand_model::entry::Entry;
use strand_model::hash::{Hash, HashError, HashSpec};
use strand_model::msg::{Message, MsgError, PeerId, Put};
use thiserror::Error;

const RECORDS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");
const LINKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("links");
const PUTLOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("putlog");
const FPRINTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("fingerprints");
const GOSSIPERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("gossipers");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_IDX: &str = "idx";

/// Errors that can occur during DHT store operations
#[derive(Error, Debug)]
pub enum DhtError {
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

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Message error: {0}")]
    Msg(#[from] MsgError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("hash not found")]
    NotFound,

    #[error("Status change would regress: {from:?} -> {to:?}")]
    StatusRegression { from: RecordStatus, to: RecordStatus },

    #[error("No gossipers available")]
    NoGossipersAvailable,
}

/// Lifecycle of a DHT record. Records are born Live and only ever move
/// out of Live; there is no un-delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Live,
    Deleted,
    Modified,
}

/// One stored entry record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DhtRecord {
    pub entry: Entry,
    pub entry_type: String,
    pub status: RecordStatus,
    /// Base58 peer ids this record was received from.
    pub sources: Vec<String>,
    /// Local log position assigned when the put was first recorded.
    pub put_index: u64,
}

/// One stored link record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub base: Hash,
    pub target: Hash,
    pub tag: String,
    pub status: RecordStatus,
    pub source: String,
}

fn link_key(base: &Hash, target: &Hash, tag: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(68 + tag.len());
    key.extend_from_slice(&base.to_wire());
    key.extend_from_slice(&target.to_wire());
    key.extend_from_slice(tag.as_bytes());
    key
}

/// This peer's slice of the DHT.
pub struct DhtStore {
    db: Database,
    spec: HashSpec,
}

impl DhtStore {
    /// Open or create the DHT database at the given path.
    pub fn open(path: impl AsRef<Path>, spec: HashSpec) -> Result<Self, DhtError> {
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(LINKS_TABLE)?;
            let _ = write_txn.open_table(PUTLOG_TABLE)?;
            let _ = write_txn.open_table(FPRINTS_TABLE)?;
            let _ = write_txn.open_table(GOSSIPERS_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db, spec })
    }

    /// Insert an entry record as Live.
    pub fn put(
        &self,
        hash: &Hash,
        entry: Entry,
        entry_type: &str,
        source: &PeerId,
        put_index: u64,
    ) -> Result<(), DhtError> {
        let record = DhtRecord {
            entry,
            entry_type: entry_type.to_string(),
            status: RecordStatus::Live,
            sources: vec![source.as_str().to_string()],
            put_index,
        };
        let bytes = codec::to_canonical(&record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            records.insert(hash.to_wire().as_slice(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch a record regardless of status.
    pub fn get(&self, hash: &Hash) -> Result<DhtRecord, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS_TABLE)?;
        match table.get(hash.to_wire().as_slice())? {
            Some(v) => Ok(codec::from_canonical(v.value())?),
            None => Err(DhtError::NotFound),
        }
    }

    /// Whether a Live record exists for the hash.
    pub fn exists(&self, hash: &Hash) -> Result<bool, DhtError> {
        match self.get(hash) {
            Ok(record) => Ok(record.status == RecordStatus::Live),
            Err(DhtError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Move a record out of Live. Transitions are monotone: once a record
    /// has left Live it never changes status again (same-status calls are
    /// no-ops).
    pub fn update_status(&self, hash: &Hash, new_status: RecordStatus) -> Result<(), DhtError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let wire = hash.to_wire();
            let mut record: DhtRecord = match records.get(wire.as_slice())? {
                Some(v) => codec::from_canonical(v.value())?,
                None => return Err(DhtError::NotFound),
            };
            if record.status != new_status {
                if record.status != RecordStatus::Live {
                    return Err(DhtError::StatusRegression { from: record.status, to: new_status });
                }
                record.status = new_status;
                let bytes = codec::to_canonical(&record)?;
                records.insert(wire.as_slice(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert a link record as Live.
    pub fn put_link(
        &self,
        base: &Hash,
        target: &Hash,
        tag: &str,
        source: &PeerId,
    ) -> Result<(), DhtError> {
        let record = LinkRecord {
            base: base.clone(),
            target: target.clone(),
            tag: tag.to_string(),
            status: RecordStatus::Live,
            source: source.as_str().to_string(),
        };
        let bytes = codec::to_canonical(&record)?;
        let key = link_key(base, target, tag);
        let write_txn = self.db.begin_write()?;
        {
            let mut links = write_txn.open_table(LINKS_TABLE)?;
            links.insert(key.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Transition a link Live → Deleted.
    pub fn del_link(&self, base: &Hash, target: &Hash, tag: &str) -> Result<(), DhtError> {
        let key = link_key(base, target, tag);
        let write_txn = self.db.begin_write()?;
        {
            let mut links = write_txn.open_table(LINKS_TABLE)?;
            let mut record: LinkRecord = match links.get(key.as_slice())? {
                Some(v) => codec::from_canonical(v.value())?,
                None => return Err(DhtError::NotFound),
            };
            if record.status != RecordStatus::Deleted {
                record.status = RecordStatus::Deleted;
                let bytes = codec::to_canonical(&record)?;
                links.insert(key.as_slice(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All Live links on `base`; an empty tag matches all tags.
    pub fn get_links(&self, base: &Hash, tag: &str) -> Result<Vec<LinkRecord>, DhtError> {
        let prefix = base.to_wire();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LINKS_TABLE)?;
        let mut result = Vec::new();
        for item in table.range(prefix.as_slice()..)? {
            let (k, v) = item?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            let record: LinkRecord = codec::from_canonical(v.value())?;
            if record.status != RecordStatus::Live {
                continue;
            }
            if !tag.is_empty() && record.tag != tag {
                continue;
            }
            result.push(record);
        }
        Ok(result)
    }

    /// Append a change message to the put log, assigning the next index,
    /// and remember its fingerprint. One transaction.
    pub fn record_change(&self, msg: &Message) -> Result<u64, DhtError> {
        let fingerprint = msg.fingerprint(&self.spec)?;
        let msg_bytes = msg.to_bytes()?;
        let write_txn = self.db.begin_write()?;
        let idx;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let current = meta.get(META_IDX)?.map(|v| v.value()).unwrap_or(0);
            idx = current + 1;
            meta.insert(META_IDX, idx)?;

            let mut putlog = write_txn.open_table(PUTLOG_TABLE)?;
            putlog.insert(idx, msg_bytes.as_slice())?;

            let mut fprints = write_txn.open_table(FPRINTS_TABLE)?;
            let empty: &[u8] = &[];
            fprints.insert(fingerprint.to_wire().as_slice(), empty)?;
        }
        write_txn.commit()?;
        Ok(idx)
    }

    /// Whether a change request with this fingerprint was already applied.
    pub fn have_fingerprint(&self, fingerprint: &Hash) -> Result<bool, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FPRINTS_TABLE)?;
        Ok(table.get(fingerprint.to_wire().as_slice())?.is_some())
    }

    /// The highest assigned put index (0 on a fresh store).
    pub fn get_idx(&self) -> Result<u64, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META_TABLE)?;
        Ok(table.get(META_IDX)?.map(|v| v.value()).unwrap_or(0))
    }

    /// All recorded puts with index strictly greater than `since`, in
    /// index order.
    pub fn get_puts(&self, since: u64) -> Result<Vec<Put>, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PUTLOG_TABLE)?;
        let mut puts = Vec::new();
        for item in table.range(since + 1..)? {
            let (k, v) = item?;
            puts.push(Put { idx: k.value(), msg: Message::from_bytes(v.value())? });
        }
        Ok(puts)
    }

    /// Record the highest put index of ours that `peer` is known to have.
    pub fn update_gossiper(&self, peer: &PeerId, idx: u64) -> Result<(), DhtError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GOSSIPERS_TABLE)?;
            table.insert(peer.as_str(), idx)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The last index we know `peer` has seen; 0 for unknown peers.
    pub fn get_gossiper(&self, peer: &PeerId) -> Result<u64, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(GOSSIPERS_TABLE)?;
        Ok(table.get(peer.as_str())?.map(|v| v.value()).unwrap_or(0))
    }

    pub fn list_gossipers(&self) -> Result<Vec<(PeerId, u64)>, DhtError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(GOSSIPERS_TABLE)?;
        let mut gossipers = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            gossipers.push((PeerId(k.value().to_string()), v.value()));
        }
        Ok(gossipers)
    }

    /// Pick a random known gossiper to reconcile with.
    pub fn find_gossiper(&self) -> Result<(PeerId, u64), DhtError> {
        let gossipers = self.list_gossipers()?;
        gossipers
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(DhtError::NoGossipersAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_model::entry::EntryFormat;
    use strand_model::msg::{MsgBody, MsgKind};

    fn open_dht() -> (tempfile::TempDir, DhtStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DhtStore::open(dir.path().join("dht.db"), HashSpec::default()).unwrap();
        (dir, store)
    }

    fn spec() -> HashSpec {
        HashSpec::default()
    }

    fn peer(name: &str) -> PeerId {
        PeerId(name.to_string())
    }

    fn put_msg(h: &Hash) -> Message {
        Message::new(MsgKind::Put, peer("src"), MsgBody::PutReq { h: h.clone() })
    }

    #[test]
    fn test_put_get_exists() {
        let (_dir, dht) = open_dht();
        let entry = Entry::new("evenNumbers", EntryFormat::String, "124");
        let hash = entry.sum(&spec()).unwrap();

        assert!(!dht.exists(&hash).unwrap());
        assert!(matches!(dht.get(&hash), Err(DhtError::NotFound)));

        dht.put(&hash, entry.clone(), "evenNumbers", &peer("src"), 1).unwrap();

        assert!(dht.exists(&hash).unwrap());
        let record = dht.get(&hash).unwrap();
        assert_eq!(record.entry, entry);
        assert_eq!(record.entry_type, "evenNumbers");
        assert_eq!(record.status, RecordStatus::Live);
        assert_eq!(record.put_index, 1);
        assert_eq!(record.sources, vec!["src".to_string()]);
    }

    #[test]
    fn test_status_is_monotone() {
        let (_dir, dht) = open_dht();
        let entry = Entry::new("t", EntryFormat::String, "x");
        let hash = entry.sum(&spec()).unwrap();
        dht.put(&hash, entry, "t", &peer("src"), 1).unwrap();

        dht.update_status(&hash, RecordStatus::Deleted).unwrap();
        assert_eq!(dht.get(&hash).unwrap().status, RecordStatus::Deleted);
        assert!(!dht.exists(&hash).unwrap());

        // idempotent
        dht.update_status(&hash, RecordStatus::Deleted).unwrap();
        // no un-delete, no sideways move
        assert!(matches!(
            dht.update_status(&hash, RecordStatus::Live),
            Err(DhtError::StatusRegression { .. })
        ));
        assert!(matches!(
            dht.update_status(&hash, RecordStatus::Modified),
            Err(DhtError::StatusRegression { .. })
        ));
    }

    #[test]
    fn test_links_lifecycle() {
        let (_dir, dht) = open_dht();
        let base = spec().sum(b"base").unwrap();
        let p1 = spec().sum(b"profile1").unwrap();
        let p2 = spec().sum(b"profile2").unwrap();

        dht.put_link(&base, &p1, "4stars", &peer("src")).unwrap();
        dht.put_link(&base, &p2, "5stars", &peer("src")).unwrap();

        let four = dht.get_links(&base, "4stars").unwrap();
        assert_eq!(four.len(), 1);
        assert_eq!(four[0].target, p1);
        assert_eq!(four[0].tag, "4stars");

        // empty tag matches all tags
        let all = dht.get_links(&base, "").unwrap();
        assert_eq!(all.len(), 2);

        // unrelated base sees nothing
        let other = spec().sum(b"other").unwrap();
        assert!(dht.get_links(&other, "").unwrap().is_empty());

        dht.del_link(&base, &p1, "4stars").unwrap();
        assert!(dht.get_links(&base, "4stars").unwrap().is_empty());
        assert_eq!(dht.get_links(&base, "").unwrap().len(), 1);

        assert!(matches!(dht.del_link(&base, &p1, "nope"), Err(DhtError::NotFound)));
    }

    #[test]
    fn test_put_log_is_dense_and_fingerprinted() {
        let (_dir, dht) = open_dht();
        assert_eq!(dht.get_idx().unwrap(), 0);

        let h1 = spec().sum(b"one").unwrap();
        let h2 = spec().sum(b"two").unwrap();
        let m1 = put_msg(&h1);
        let m2 = put_msg(&h2);

        let f1 = m1.fingerprint(&spec()).unwrap();
        assert!(!dht.have_fingerprint(&f1).unwrap());

        assert_eq!(dht.record_change(&m1).unwrap(), 1);
        assert_eq!(dht.record_change(&m2).unwrap(), 2);
        assert_eq!(dht.get_idx().unwrap(), 2);
        assert!(dht.have_fingerprint(&f1).unwrap());

        let puts = dht.get_puts(0).unwrap();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].idx, 1);
        assert_eq!(puts[0].msg, m1);
        assert_eq!(puts[1].idx, 2);
        assert_eq!(puts[1].msg, m2);
    }

    #[test]
    fn test_get_puts_prefix_suffix() {
        let (_dir, dht) = open_dht();
        for i in 0..5u8 {
            let h = spec().sum(&[i]).unwrap();
            dht.record_change(&put_msg(&h)).unwrap();
        }

        let all = dht.get_puts(0).unwrap();
        assert_eq!(all.len(), 5);
        for n in 0..=5u64 {
            let suffix = dht.get_puts(n).unwrap();
            assert_eq!(&all[n as usize..], suffix.as_slice(), "since {n}");
        }
        assert!(dht.get_puts(5).unwrap().is_empty());
    }

    #[test]
    fn test_gossipers() {
        let (_dir, dht) = open_dht();
        assert!(matches!(dht.find_gossiper(), Err(DhtError::NoGossipersAvailable)));
        assert_eq!(dht.get_gossiper(&peer("peer_bar")).unwrap(), 0);

        dht.update_gossiper(&peer("peer_foo"), 92).unwrap();
        assert_eq!(dht.get_gossiper(&peer("peer_foo")).unwrap(), 92);

        let (g, idx) = dht.find_gossiper().unwrap();
        assert_eq!(g, peer("peer_foo"));
        assert_eq!(idx, 92);
    }
}
