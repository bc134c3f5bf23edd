//! Non-durable log store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use ratify_raft_types::HardState;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIdOptionExt;
use ratify_raft_types::LogIndex;

use super::LogStore;
use super::StorageError;
use super::StoredMembership;

/// In-memory log backed by a `BTreeMap`.
///
/// Clones share state. Handing a clone to a fresh engine after the old one
/// stopped behaves like restarting a process over durable storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    log: BTreeMap<LogIndex, LogEntry>,
    hard_state: HardState,
    committed: Option<LogIndex>,
    membership: Option<StoredMembership>,
}

impl Inner {
    fn last_log_id(&self) -> Option<LogId> {
        self.log.values().next_back().map(|entry| entry.log_id)
    }
}

impl InMemoryLogStore {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().log.is_empty()
    }
}

impl LogStore for InMemoryLogStore {
    fn read_hard_state(&self) -> Result<HardState, StorageError> {
        Ok(self.inner.read().hard_state)
    }

    fn save_hard_state(&self, state: &HardState) -> Result<(), StorageError> {
        self.inner.write().hard_state = *state;
        Ok(())
    }

    fn append(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let mut expected = inner.last_log_id().next_index();
        for entry in entries {
            if entry.index() != expected {
                return Err(StorageError::NonContiguousAppend {
                    expected,
                    got: entry.index(),
                });
            }
            expected += 1;
        }
        for entry in entries {
            inner.log.insert(entry.index(), entry.clone());
        }
        Ok(())
    }

    fn truncate_from(&self, index: LogIndex) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let _removed = inner.log.split_off(&index);
        Ok(())
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, StorageError> {
        Ok(self.inner.read().log.get(&index).cloned())
    }

    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError> {
        if hi <= lo {
            return Ok(Vec::new());
        }
        Ok(self.inner.read().log.range(lo..hi).map(|(_, entry)| entry.clone()).collect())
    }

    fn last_log_id(&self) -> Result<Option<LogId>, StorageError> {
        Ok(self.inner.read().last_log_id())
    }

    fn first_index(&self) -> Result<LogIndex, StorageError> {
        Ok(self.inner.read().log.keys().next().copied().unwrap_or(0))
    }

    fn save_committed(&self, committed: Option<LogIndex>) -> Result<(), StorageError> {
        self.inner.write().committed = committed;
        Ok(())
    }

    fn read_committed(&self) -> Result<Option<LogIndex>, StorageError> {
        Ok(self.inner.read().committed)
    }

    fn save_membership(&self, membership: &StoredMembership) -> Result<(), StorageError> {
        self.inner.write().membership = Some(membership.clone());
        Ok(())
    }

    fn read_membership(&self) -> Result<Option<StoredMembership>, StorageError> {
        Ok(self.inner.read().membership.clone())
    }

    /// Nothing is hashed in memory; only index continuity is checked.
    fn verify_chain(&self) -> Result<u64, StorageError> {
        let inner = self.inner.read();
        let mut expected: LogIndex = 0;
        for (index, entry) in &inner.log {
            if *index != expected || entry.index() != expected {
                return Err(StorageError::ChainHashMissing { index: expected });
            }
            expected += 1;
        }
        Ok(expected)
    }
}
