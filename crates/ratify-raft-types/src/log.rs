//! Log entry types.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::LogIndex;
use crate::NodeId;
use crate::Term;
use crate::membership::StampedChange;

/// Accounted size of a `Reconfigure` payload, in bytes.
const RECONFIGURE_SIZE_BYTES: u64 = 16;

/// Position of an entry together with the term that wrote it.
///
/// Ordering compares the term first, then the index. That is the Raft
/// "at least as up to date" comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub term: Term,
    pub index: LogIndex,
}

impl LogId {
    pub const fn new(term: Term, index: LogIndex) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}-{}", self.term, self.index)
    }
}

/// Helpers on `Option<LogId>`, where `None` means "empty log".
pub trait LogIdOptionExt {
    /// Index the next appended entry would get.
    fn next_index(&self) -> LogIndex;

    fn index(&self) -> Option<LogIndex>;
}

impl LogIdOptionExt for Option<LogId> {
    fn next_index(&self) -> LogIndex {
        match self {
            Some(log_id) => log_id.index + 1,
            None => 0,
        }
    }

    fn index(&self) -> Option<LogIndex> {
        self.map(|log_id| log_id.index)
    }
}

/// Index following `index`, or 0 when `index` is `None`.
///
/// Turns a commit index such as `Some(4)` into the exclusive end of the
/// committed range.
#[inline]
pub fn next_after(index: Option<LogIndex>) -> LogIndex {
    index.map_or(0, |i| i.saturating_add(1))
}

/// What an entry carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// No-op written by a newly elected leader.
    Blank,
    /// Opaque application bytes.
    Normal(Vec<u8>),
    /// A membership change, evaluated when it commits.
    Reconfigure(StampedChange),
}

impl EntryPayload {
    /// Bytes this payload counts for in range reads.
    pub fn size_bytes(&self) -> u64 {
        match self {
            EntryPayload::Blank => 0,
            EntryPayload::Normal(data) => data.len() as u64,
            EntryPayload::Reconfigure(_) => RECONFIGURE_SIZE_BYTES,
        }
    }

    /// Application bytes, if this is a `Normal` payload.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            EntryPayload::Normal(data) => Some(data),
            _ => None,
        }
    }
}

/// A single log entry as stored and replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: LogId,
    pub payload: EntryPayload,
}

impl LogEntry {
    pub fn new(log_id: LogId, payload: EntryPayload) -> Self {
        Self { log_id, payload }
    }

    pub fn index(&self) -> LogIndex {
        self.log_id.index
    }
}

/// An entry handed to log consumers once it is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub index: LogIndex,
    pub payload: EntryPayload,
}

impl CommittedEntry {
    /// Application bytes; `None` for entries consumers should skip.
    pub fn data(&self) -> Option<&[u8]> {
        self.payload.data()
    }
}

impl From<LogEntry> for CommittedEntry {
    fn from(entry: LogEntry) -> Self {
        Self {
            index: entry.log_id.index,
            payload: entry.payload,
        }
    }
}

/// Raft state that must survive a restart before a vote is cast or requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}
