//! Errors surfaced by the replicated log.
//!
//! Only local failures are errors. A proposal that never commits is not
//! reported; it is simply absent from the commit stream.

use ratify_raft_types::LogIndex;
use snafu::Snafu;

use crate::config::ConfigError;
use crate::storage::StorageError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReplicationError {
    #[snafu(display("replicated log has not been started"))]
    NotStarted,

    #[snafu(display("replicated log was already started"))]
    AlreadyStarted,

    #[snafu(display("replicated log is stopped"))]
    Stopped,

    #[snafu(display("invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("storage failure: {source}"))]
    Storage { source: StorageError },

    /// Persisted state failed an integrity check at start.
    #[snafu(display("persisted log state is corrupt: {source}"))]
    CorruptState { source: StorageError },

    #[snafu(display("index {lo} is below the retained log horizon {first_index}"))]
    BelowHorizon { lo: LogIndex, first_index: LogIndex },

    #[snafu(display("invalid range: hi {hi} is below lo {lo}"))]
    InvalidRange { lo: LogIndex, hi: LogIndex },

    /// Committed state on disk disagrees with what a peer sent.
    #[snafu(display("refusing to truncate committed entry {index} (commit index {committed})"))]
    CommittedTruncation { index: LogIndex, committed: LogIndex },

    #[snafu(display("committed entry {index} is missing from storage"))]
    MissingEntry { index: LogIndex },

    #[snafu(display("replication task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

impl From<StorageError> for ReplicationError {
    fn from(source: StorageError) -> Self {
        if source.is_corruption() {
            ReplicationError::CorruptState { source }
        } else {
            ReplicationError::Storage { source }
        }
    }
}
