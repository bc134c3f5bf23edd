//! Ordered delivery of committed entries.
//!
//! A [`CommitStream`] is a cursor over the committed prefix of the log. It
//! waits on the commit watch, then reads newly committed entries from
//! storage in batches. Every stream obtained from the same replica yields
//! the same sequence from the start index on, with no gaps and no
//! duplicates, independently of how fast other consumers read.
//!
//! When the replica stops, the stream yields whatever was already committed
//! and then ends.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use ratify_constants::COMMIT_STREAM_BATCH_SIZE;
use ratify_raft_types::CommittedEntry;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogIndex;
use ratify_raft_types::next_after;
use tokio::sync::watch;

use crate::error::ReplicationError;
use crate::storage::LogStore;
use crate::storage::StorageError;

/// Read access to committed entries.
///
/// Object safe so streams do not carry the store's type.
pub trait CommittedReader: Send + Sync + 'static {
    /// Entries in `[lo, hi)`.
    fn read(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError>;
}

impl<S: LogStore> CommittedReader for S {
    fn read(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<LogEntry>, StorageError> {
        self.entries(lo, hi)
    }
}

pub struct CommitStream {
    reader: Arc<dyn CommittedReader>,
    next: LogIndex,
    commit_rx: watch::Receiver<Option<LogIndex>>,
    buffer: VecDeque<CommittedEntry>,
}

impl CommitStream {
    /// Stream committed entries from index `lo` on.
    ///
    /// `commit_rx` carries the commit index; the stream ends once its sender
    /// is dropped and everything committed before that has been yielded.
    pub fn new(reader: Arc<dyn CommittedReader>, lo: LogIndex, commit_rx: watch::Receiver<Option<LogIndex>>) -> Self {
        Self {
            reader,
            next: lo,
            commit_rx,
            buffer: VecDeque::new(),
        }
    }

    /// Index of the next entry this stream will yield.
    pub fn position(&self) -> LogIndex {
        self.buffer.front().map_or(self.next, |entry| entry.index)
    }

    /// Next committed entry, or `None` once the replica has stopped and the
    /// committed prefix is exhausted.
    pub async fn next_entry(&mut self) -> Option<Result<CommittedEntry, ReplicationError>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }

            let commit_end = next_after(*self.commit_rx.borrow_and_update());
            if self.next < commit_end {
                if let Err(err) = self.fill(commit_end) {
                    return Some(Err(err));
                }
                continue;
            }

            if self.commit_rx.changed().await.is_err() {
                // Stopped: drain what was committed before the sender closed.
                if self.next >= next_after(*self.commit_rx.borrow()) {
                    return None;
                }
            }
        }
    }

    fn fill(&mut self, commit_end: LogIndex) -> Result<(), ReplicationError> {
        let hi = commit_end.min(self.next.saturating_add(COMMIT_STREAM_BATCH_SIZE as u64));
        let entries = self.reader.read(self.next, hi)?;
        let Some(last) = entries.last().map(LogEntry::index) else {
            return Err(ReplicationError::MissingEntry { index: self.next });
        };
        self.next = last + 1;
        self.buffer.extend(entries.into_iter().map(CommittedEntry::from));
        Ok(())
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<CommittedEntry, ReplicationError>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next_entry().await?;
            Some((item, stream))
        })
    }
}

impl std::fmt::Debug for CommitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitStream")
            .field("next", &self.next)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
