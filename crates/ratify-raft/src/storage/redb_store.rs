//! Redb-backed persistent log store.
//!
//! One redb file holds the log, Raft metadata and the integrity chain. Each
//! entry has a chain hash
//!
//! ```text
//! hash = blake3(prev_hash || index || term || entry_bytes)
//! ```
//!
//! stored next to it, and [`RedbLogStore::verify_chain`] re-walks the chain in
//! bounded batches.
//!
//! # Tiger Style
//!
//! - Every mutation is one redb write transaction (durable on commit)
//! - Batched appends pre-allocate up to `MAX_BATCH_SIZE`
//! - Chain verification reads at most `CHAIN_VERIFY_BATCH_SIZE` entries per pass

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use ratify_constants::CHAIN_VERIFY_BATCH_SIZE;
use ratify_constants::INTEGRITY_VERSION;
use ratify_constants::MAX_BATCH_SIZE;
use ratify_raft_types::HardState;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIndex;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use super::LogStore;
use super::StorageError;
use super::StoredMembership;
use super::error::BeginReadSnafu;
use super::error::BeginWriteSnafu;
use super::error::CommitSnafu;
use super::error::CreateDirectorySnafu;
use super::error::DeserializeSnafu;
use super::error::GetSnafu;
use super::error::InsertSnafu;
use super::error::OpenDatabaseSnafu;
use super::error::OpenTableSnafu;
use super::error::RangeSnafu;
use super::error::RemoveSnafu;
use super::error::SerializeSnafu;
use crate::integrity::ChainHash;
use crate::integrity::ChainTip;
use crate::integrity::GENESIS_HASH;
use crate::integrity::compute_entry_hash;
use crate::integrity::hash_from_slice;
use crate::integrity::hash_to_hex;
use crate::integrity::verify_entry_hash;

/// Log entries: key = index, value = bincode `LogEntry`.
const RAFT_LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");

/// Raft metadata. Keys: "hard_state", "committed", "membership".
const RAFT_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_meta");

/// Chain hashes: key = index, value = 32-byte blake3 hash.
const CHAIN_HASH_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("chain_hashes");

/// Integrity metadata. Keys: "integrity_version", "chain_tip_hash", "chain_tip_index".
const INTEGRITY_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("integrity_meta");

const HARD_STATE_KEY: &str = "hard_state";
const COMMITTED_KEY: &str = "committed";
const MEMBERSHIP_KEY: &str = "membership";
const INTEGRITY_VERSION_KEY: &str = "integrity_version";
const CHAIN_TIP_HASH_KEY: &str = "chain_tip_hash";
const CHAIN_TIP_INDEX_KEY: &str = "chain_tip_index";

/// Persistent log backed by redb with chain hashing.
///
/// Clones share the database handle and the cached chain tip. The engine is
/// the only writer; readers (range reads, commit streams) only touch entries
/// that are already committed and therefore never truncated.
#[derive(Clone, Debug)]
pub struct RedbLogStore {
    db: Arc<Database>,
    path: PathBuf,
    /// Hash and index of the last entry, so appends avoid a read.
    chain_tip: Arc<RwLock<ChainTip>>,
}

impl RedbLogStore {
    /// Create or open a redb-backed log store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let db = if path.exists() {
            Database::open(&path).context(OpenDatabaseSnafu { path: &path })?
        } else {
            Database::create(&path).context(OpenDatabaseSnafu { path: &path })?
        };

        let write_txn = db.begin_write().context(BeginWriteSnafu)?;
        {
            write_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
            write_txn.open_table(RAFT_META_TABLE).context(OpenTableSnafu)?;
            write_txn.open_table(CHAIN_HASH_TABLE).context(OpenTableSnafu)?;
            write_txn.open_table(INTEGRITY_META_TABLE).context(OpenTableSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;

        let db = Arc::new(db);
        Self::check_integrity_version(&db)?;
        let chain_tip = Self::load_chain_tip(&db)?;

        tracing::debug!(path = %path.display(), tip_index = ?chain_tip.index, "opened redb log store");

        Ok(Self {
            db,
            path,
            chain_tip: Arc::new(RwLock::new(chain_tip)),
        })
    }

    /// Get the path to the log store database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp new databases with the current version, refuse newer ones.
    fn check_integrity_version(db: &Database) -> Result<(), StorageError> {
        let write_txn = db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(INTEGRITY_META_TABLE).context(OpenTableSnafu)?;
            let stored: Option<u32> = match table.get(INTEGRITY_VERSION_KEY).context(GetSnafu)? {
                Some(value) => Some(bincode::deserialize(value.value()).context(DeserializeSnafu)?),
                None => None,
            };
            match stored {
                Some(found) if found > INTEGRITY_VERSION => {
                    return Err(StorageError::UnsupportedVersion {
                        found,
                        supported: INTEGRITY_VERSION,
                    });
                }
                Some(_) => {}
                None => {
                    let bytes = bincode::serialize(&INTEGRITY_VERSION).context(SerializeSnafu)?;
                    table.insert(INTEGRITY_VERSION_KEY, bytes.as_slice()).context(InsertSnafu)?;
                }
            }
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    fn load_chain_tip(db: &Database) -> Result<ChainTip, StorageError> {
        let read_txn = db.begin_read().context(BeginReadSnafu)?;
        let meta_table = read_txn.open_table(INTEGRITY_META_TABLE).context(OpenTableSnafu)?;

        let hash = meta_table.get(CHAIN_TIP_HASH_KEY).context(GetSnafu)?.and_then(|v| hash_from_slice(v.value()));
        let index: Option<Option<u64>> = match meta_table.get(CHAIN_TIP_INDEX_KEY).context(GetSnafu)? {
            Some(value) => Some(bincode::deserialize(value.value()).context(DeserializeSnafu)?),
            None => None,
        };

        match (hash, index) {
            (Some(hash), Some(index)) => Ok(ChainTip { hash, index }),
            _ => Ok(ChainTip::default()),
        }
    }

    fn write_chain_tip(txn: &redb::WriteTransaction, tip: &ChainTip) -> Result<(), StorageError> {
        let mut meta_table = txn.open_table(INTEGRITY_META_TABLE).context(OpenTableSnafu)?;
        meta_table.insert(CHAIN_TIP_HASH_KEY, tip.hash.as_slice()).context(InsertSnafu)?;
        let index_bytes = bincode::serialize(&tip.index).context(SerializeSnafu)?;
        meta_table.insert(CHAIN_TIP_INDEX_KEY, index_bytes.as_slice()).context(InsertSnafu)?;
        Ok(())
    }

    fn read_meta<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(RAFT_META_TABLE).context(OpenTableSnafu)?;

        match table.get(key).context(GetSnafu)? {
            Some(value) => {
                let data: T = bincode::deserialize(value.value()).context(DeserializeSnafu)?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn write_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(RAFT_META_TABLE).context(OpenTableSnafu)?;
            let serialized = bincode::serialize(value).context(SerializeSnafu)?;
            table.insert(key, serialized.as_slice()).context(InsertSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    /// Hash and index of the last stored entry.
    pub fn chain_tip(&self) -> ChainTip {
        *self.chain_tip.read()
    }

    /// Verify up to `batch_size` entries starting at `start_index`.
    ///
    /// `prev_hash` is the stored hash of the entry before `start_index`.
    /// Returns how many entries were checked and the hash of the last one.
    pub fn verify_chain_batch(
        &self,
        start_index: u64,
        prev_hash: ChainHash,
        batch_size: u32,
    ) -> Result<(u64, ChainHash), StorageError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let log_table = read_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
        let hash_table = read_txn.open_table(CHAIN_HASH_TABLE).context(OpenTableSnafu)?;

        let mut prev_hash = prev_hash;
        let mut verified: u64 = 0;
        let end_index = start_index.saturating_add(batch_size as u64);

        for index in start_index..end_index {
            let entry_bytes = match log_table.get(index).context(GetSnafu)? {
                Some(value) => value.value().to_vec(),
                None => break,
            };

            let stored_hash = match hash_table.get(index).context(GetSnafu)? {
                Some(value) => match hash_from_slice(value.value()) {
                    Some(hash) => hash,
                    None => return Err(StorageError::ChainHashMissing { index }),
                },
                None => return Err(StorageError::ChainHashMissing { index }),
            };

            let entry: LogEntry = bincode::deserialize(&entry_bytes).context(DeserializeSnafu)?;
            let term = entry.log_id.term;

            if entry.log_id.index != index || !verify_entry_hash(&prev_hash, index, term, &entry_bytes, &stored_hash)
            {
                let computed = compute_entry_hash(&prev_hash, index, term, &entry_bytes);
                return Err(StorageError::ChainIntegrityViolation {
                    index,
                    expected: hash_to_hex(&stored_hash),
                    found: hash_to_hex(&computed),
                });
            }

            prev_hash = stored_hash;
            verified += 1;
        }

        Ok((verified, prev_hash))
    }
}

impl LogStore for RedbLogStore {
    fn read_hard_state(&self) -> Result<HardState, StorageError> {
        Ok(self.read_meta(HARD_STATE_KEY)?.unwrap_or_default())
    }

    fn save_hard_state(&self, state: &HardState) -> Result<(), StorageError> {
        self.write_meta(HARD_STATE_KEY, state)
    }

    fn append(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }

        let tip = self.chain_tip();
        let mut expected = tip.index.map_or(0, |index| index + 1);
        let mut prev_hash = tip.hash;

        let mut serialized: Vec<(u64, Vec<u8>, ChainHash)> =
            Vec::with_capacity(entries.len().min(MAX_BATCH_SIZE as usize));
        for entry in entries {
            let index = entry.index();
            if index != expected {
                return Err(StorageError::NonContiguousAppend { expected, got: index });
            }
            let data = bincode::serialize(entry).context(SerializeSnafu)?;
            let entry_hash = compute_entry_hash(&prev_hash, index, entry.log_id.term, &data);
            serialized.push((index, data, entry_hash));
            prev_hash = entry_hash;
            expected += 1;
        }

        let new_tip = ChainTip {
            hash: prev_hash,
            index: Some(expected - 1),
        };

        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut log_table = write_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
            let mut hash_table = write_txn.open_table(CHAIN_HASH_TABLE).context(OpenTableSnafu)?;
            for (index, data, entry_hash) in &serialized {
                log_table.insert(*index, data.as_slice()).context(InsertSnafu)?;
                hash_table.insert(*index, entry_hash.as_slice()).context(InsertSnafu)?;
            }
        }
        Self::write_chain_tip(&write_txn, &new_tip)?;
        write_txn.commit().context(CommitSnafu)?;

        *self.chain_tip.write() = new_tip;
        Ok(())
    }

    fn truncate_from(&self, index: LogIndex) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        let new_tip = {
            let mut log_table = write_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
            let mut hash_table = write_txn.open_table(CHAIN_HASH_TABLE).context(OpenTableSnafu)?;

            let keys: Vec<u64> = log_table
                .range(index..)
                .context(RangeSnafu)?
                .map(|item| {
                    let (key, _) = item.context(GetSnafu)?;
                    Ok::<_, StorageError>(key.value())
                })
                .collect::<Result<Vec<_>, _>>()?;

            for key in &keys {
                log_table.remove(*key).context(RemoveSnafu)?;
                hash_table.remove(*key).context(RemoveSnafu)?;
            }

            match index.checked_sub(1) {
                Some(prev) => match hash_table.get(prev).context(GetSnafu)? {
                    Some(value) => ChainTip {
                        hash: hash_from_slice(value.value()).ok_or(StorageError::ChainHashMissing { index: prev })?,
                        index: Some(prev),
                    },
                    None => ChainTip::default(),
                },
                None => ChainTip::default(),
            }
        };
        Self::write_chain_tip(&write_txn, &new_tip)?;
        write_txn.commit().context(CommitSnafu)?;

        *self.chain_tip.write() = new_tip;
        Ok(())
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, StorageError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
        match table.get(index).context(GetSnafu)? {
            Some(value) => Ok(Some(bincode::deserialize(value.value()).context(DeserializeSnafu)?)),
            None => Ok(None),
        }
    }

    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError> {
        if hi <= lo {
            return Ok(Vec::new());
        }
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;

        let mut entries = Vec::with_capacity((hi - lo).min(MAX_BATCH_SIZE as u64) as usize);
        for item in table.range(lo..hi).context(RangeSnafu)? {
            let (_key, value) = item.context(GetSnafu)?;
            let entry: LogEntry = bincode::deserialize(value.value()).context(DeserializeSnafu)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn last_log_id(&self) -> Result<Option<LogId>, StorageError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
        let result = match table.last().context(GetSnafu)? {
            Some((_key, value)) => {
                let entry: LogEntry = bincode::deserialize(value.value()).context(DeserializeSnafu)?;
                Ok(Some(entry.log_id))
            }
            None => Ok(None),
        };
        result
    }

    fn first_index(&self) -> Result<LogIndex, StorageError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(RAFT_LOG_TABLE).context(OpenTableSnafu)?;
        let first = table.first().context(GetSnafu)?;
        Ok(first.map_or(0, |(key, _)| key.value()))
    }

    fn save_committed(&self, committed: Option<LogIndex>) -> Result<(), StorageError> {
        self.write_meta(COMMITTED_KEY, &committed)
    }

    fn read_committed(&self) -> Result<Option<LogIndex>, StorageError> {
        Ok(self.read_meta::<Option<LogIndex>>(COMMITTED_KEY)?.flatten())
    }

    fn save_membership(&self, membership: &StoredMembership) -> Result<(), StorageError> {
        self.write_meta(MEMBERSHIP_KEY, membership)
    }

    fn read_membership(&self) -> Result<Option<StoredMembership>, StorageError> {
        self.read_meta(MEMBERSHIP_KEY)
    }

    fn verify_chain(&self) -> Result<u64, StorageError> {
        let mut next: u64 = 0;
        let mut prev_hash = GENESIS_HASH;
        loop {
            let (verified, last_hash) = self.verify_chain_batch(next, prev_hash, CHAIN_VERIFY_BATCH_SIZE)?;
            next += verified;
            prev_hash = last_hash;
            if verified < CHAIN_VERIFY_BATCH_SIZE as u64 {
                break;
            }
        }

        // Entries past a gap would be silently skipped by the walk above.
        let tip = self.chain_tip();
        if tip.index.map_or(0, |index| index + 1) != next {
            return Err(StorageError::ChainHashMissing { index: next });
        }

        tracing::debug!(verified = next, tip = %hash_to_hex(&prev_hash), "log chain verified");
        Ok(next)
    }
}
