//! The replicated log contract consumed by higher layers.

use async_trait::async_trait;
use ratify_raft_types::CommittedEntry;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use tokio_util::sync::CancellationToken;

use crate::commit_stream::CommitStream;
use crate::error::ReplicationError;
use crate::leader_hint::LeaderHints;

/// An ordered, replicated, durable log of opaque entries.
///
/// Lifecycle is `NotStarted -> Running -> Stopped`. [`start`](Self::start)
/// must be the first call and [`stop`](Self::stop) the last; every other
/// method may be called concurrently from many tasks while running.
///
/// Proposals are best effort. An entry that never commits is not an error,
/// it is simply absent from the commit stream.
#[async_trait]
pub trait LogReplicator: Send + Sync {
    /// Begin replicating. Commit streams start at index `lo`, the next index
    /// the consumer has not yet processed.
    async fn start(&self, lo: LogIndex) -> Result<(), ReplicationError>;

    /// Submit `data` for appending. Returns once the entry is queued, or
    /// immediately if `cancel` fires first; the entry may still commit.
    async fn propose(&self, cancel: &CancellationToken, data: Vec<u8>) -> Result<(), ReplicationError>;

    /// Ordered committed entries from the start index on. Ends after `stop`.
    fn wait_committed(&self) -> Result<CommitStream, ReplicationError>;

    /// Stop replicating and close all streams.
    async fn stop(&self) -> Result<(), ReplicationError>;

    /// Add `node` to this replica's view of the cluster.
    ///
    /// Callers must drive this only from committed log content, identically
    /// on every replica.
    async fn add_replica(&self, node: NodeId) -> Result<(), ReplicationError>;

    /// Remove `node` from this replica's view of the cluster. Same rules as
    /// [`add_replica`](Self::add_replica).
    async fn drop_replica(&self, node: NodeId) -> Result<(), ReplicationError>;

    /// Best-effort stream of "this replica is leader".
    fn leader_hints(&self) -> Result<LeaderHints, ReplicationError>;

    /// Committed entries in `[lo, hi)`, bounded by `max_size` bytes after the
    /// first entry.
    fn get_committed(&self, lo: LogIndex, hi: LogIndex, max_size: u64) -> Result<Vec<CommittedEntry>, ReplicationError>;
}

/// Reject `get_committed` arguments every implementation must refuse:
/// `hi` below `lo`, or `lo` below the oldest index the replica retains.
pub fn check_committed_range(lo: LogIndex, hi: LogIndex, first_index: LogIndex) -> Result<(), ReplicationError> {
    if hi < lo {
        return Err(ReplicationError::InvalidRange { lo, hi });
    }
    if lo < first_index {
        return Err(ReplicationError::BelowHorizon { lo, first_index });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_committed_range() {
        assert!(check_committed_range(0, 0, 0).is_ok());
        assert!(check_committed_range(5, 9, 5).is_ok());
        assert!(matches!(check_committed_range(4, 9, 5), Err(ReplicationError::BelowHorizon {
            lo: 4,
            first_index: 5
        })));
        assert!(matches!(check_committed_range(9, 4, 0), Err(ReplicationError::InvalidRange { lo: 9, hi: 4 })));
    }

    #[test]
    fn test_inverted_range_reported_before_horizon() {
        assert!(matches!(check_committed_range(2, 1, 5), Err(ReplicationError::InvalidRange { .. })));
    }
}
