//! Durable state of one replica.
//!
//! The engine persists its Raft hard state, the log, the last known commit
//! index and the applied cluster configuration through the [`LogStore`]
//! trait. Two backends exist:
//!
//! - [`RedbLogStore`]: single redb file with blake3 chain hashing
//! - [`InMemoryLogStore`]: `BTreeMap` behind a lock, for tests and simulation
//!
//! Every method returns only after the change is durable for that backend, so
//! the engine can acknowledge entries to peers right after a call returns.
//!
//! # Tiger Style
//!
//! - `u64` indices, 0-based
//! - Appends must extend the log contiguously
//! - Explicit SNAFU errors for each failure mode

mod error;
mod in_memory;
mod redb_store;

pub use error::StorageError;
pub use in_memory::InMemoryLogStore;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::HardState;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIndex;
pub use redb_store::RedbLogStore;
use serde::Deserialize;
use serde::Serialize;

use crate::config::RaftConfig;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Data is lost when the process exits.
    InMemory,
    /// Single redb database file under the replica's data directory.
    #[default]
    Redb,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in-memory" | "memory" => Ok(StorageBackend::InMemory),
            "redb" | "persistent" | "disk" => Ok(StorageBackend::Redb),
            _ => Err(format!("Invalid storage backend '{}'. Valid options: inmemory, redb", s)),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::InMemory => write!(f, "inmemory"),
            StorageBackend::Redb => write!(f, "redb"),
        }
    }
}

/// The applied cluster configuration and the last committed index whose
/// membership effect it includes.
///
/// On restart the engine re-evaluates committed `Reconfigure` entries after
/// `applied_through` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMembership {
    pub config: ClusterConfig,
    pub applied_through: Option<LogIndex>,
}

/// Persistent state of one replica.
///
/// Clones share the same underlying storage.
pub trait LogStore: Clone + Send + Sync + 'static {
    fn read_hard_state(&self) -> Result<HardState, StorageError>;

    fn save_hard_state(&self, state: &HardState) -> Result<(), StorageError>;

    /// Append entries. The first must directly follow the current last entry.
    fn append(&self, entries: &[LogEntry]) -> Result<(), StorageError>;

    /// Remove every entry with index `>= index`.
    fn truncate_from(&self, index: LogIndex) -> Result<(), StorageError>;

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, StorageError>;

    /// Entries in `[lo, hi)`, stopping early at the end of the log.
    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError>;

    fn last_log_id(&self) -> Result<Option<LogId>, StorageError>;

    /// Lowest index still retained. The log is never compacted, so this is
    /// 0 for any store written by the engine.
    fn first_index(&self) -> Result<LogIndex, StorageError>;

    fn save_committed(&self, committed: Option<LogIndex>) -> Result<(), StorageError>;

    fn read_committed(&self) -> Result<Option<LogIndex>, StorageError>;

    fn save_membership(&self, membership: &StoredMembership) -> Result<(), StorageError>;

    fn read_membership(&self) -> Result<Option<StoredMembership>, StorageError>;

    /// Check every stored entry against its chain hash. Returns the number of
    /// entries verified.
    fn verify_chain(&self) -> Result<u64, StorageError>;
}

/// A store whose backend is picked at runtime from [`RaftConfig`].
#[derive(Clone, Debug)]
pub enum AnyLogStore {
    InMemory(InMemoryLogStore),
    Redb(RedbLogStore),
}

impl AnyLogStore {
    /// Open the backend named by `config.storage_backend`.
    ///
    /// Redb databases live at `{data_dir}/raft-log.redb`.
    pub fn open(config: &RaftConfig) -> Result<Self, StorageError> {
        match config.storage_backend {
            StorageBackend::InMemory => Ok(AnyLogStore::InMemory(InMemoryLogStore::default())),
            StorageBackend::Redb => {
                let path = config.data_dir().join("raft-log.redb");
                Ok(AnyLogStore::Redb(RedbLogStore::new(path)?))
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyLogStore::InMemory($store) => $call,
            AnyLogStore::Redb($store) => $call,
        }
    };
}

impl LogStore for AnyLogStore {
    fn read_hard_state(&self) -> Result<HardState, StorageError> {
        dispatch!(self, s => s.read_hard_state())
    }

    fn save_hard_state(&self, state: &HardState) -> Result<(), StorageError> {
        dispatch!(self, s => s.save_hard_state(state))
    }

    fn append(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        dispatch!(self, s => s.append(entries))
    }

    fn truncate_from(&self, index: LogIndex) -> Result<(), StorageError> {
        dispatch!(self, s => s.truncate_from(index))
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, StorageError> {
        dispatch!(self, s => s.entry(index))
    }

    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError> {
        dispatch!(self, s => s.entries(lo, hi))
    }

    fn last_log_id(&self) -> Result<Option<LogId>, StorageError> {
        dispatch!(self, s => s.last_log_id())
    }

    fn first_index(&self) -> Result<LogIndex, StorageError> {
        dispatch!(self, s => s.first_index())
    }

    fn save_committed(&self, committed: Option<LogIndex>) -> Result<(), StorageError> {
        dispatch!(self, s => s.save_committed(committed))
    }

    fn read_committed(&self) -> Result<Option<LogIndex>, StorageError> {
        dispatch!(self, s => s.read_committed())
    }

    fn save_membership(&self, membership: &StoredMembership) -> Result<(), StorageError> {
        dispatch!(self, s => s.save_membership(membership))
    }

    fn read_membership(&self) -> Result<Option<StoredMembership>, StorageError> {
        dispatch!(self, s => s.read_membership())
    }

    fn verify_chain(&self) -> Result<u64, StorageError> {
        dispatch!(self, s => s.verify_chain())
    }
}
