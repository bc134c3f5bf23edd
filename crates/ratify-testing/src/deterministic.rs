//! Single-process [`LogReplicator`] for tests of code built on the log.
//!
//! Every proposal commits immediately, in call order, and the replica always
//! believes it is leader. No network, no timers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ratify_raft::CommitStream;
use ratify_raft::InMemoryLogStore;
use ratify_raft::LeaderHints;
use ratify_raft::LogReplicator;
use ratify_raft::LogStore;
use ratify_raft::ReplicationError;
use ratify_raft::check_committed_range;
use ratify_raft::pure::ChangeDecision;
use ratify_raft::pure::apply_change;
use ratify_raft::pure::select_committed_range;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::CommittedEntry;
use ratify_raft_types::ConfigChange;
use ratify_raft_types::EntryPayload;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::next_after;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Term stamped on every entry; there are no elections.
const TERM: u64 = 1;

enum Phase {
    NotStarted,
    Running {
        lo: LogIndex,
        commit_tx: watch::Sender<Option<LogIndex>>,
        leader_tx: watch::Sender<bool>,
    },
    Stopped,
}

/// In-memory log that commits on propose.
///
/// # Example
///
/// ```ignore
/// let log = DeterministicLogReplicator::new([1]);
/// log.start(0).await?;
/// log.propose(&CancellationToken::new(), b"a".to_vec()).await?;
/// assert_eq!(log.get_committed(0, 1, 0)?.len(), 1);
/// ```
pub struct DeterministicLogReplicator {
    store: InMemoryLogStore,
    phase: Mutex<Phase>,
    membership: Mutex<ClusterConfig>,
}

impl DeterministicLogReplicator {
    pub fn new(replicas: impl IntoIterator<Item = NodeId>) -> Arc<Self> {
        Arc::new(Self {
            store: InMemoryLogStore::default(),
            phase: Mutex::new(Phase::NotStarted),
            membership: Mutex::new(ClusterConfig::bootstrap(replicas)),
        })
    }

    /// Current membership view, as changed by `add_replica` / `drop_replica`.
    pub fn replicas(&self) -> ClusterConfig {
        self.membership.lock().clone()
    }

    pub fn committed_index(&self) -> Result<Option<LogIndex>, ReplicationError> {
        Ok(self.store.read_committed()?)
    }

    fn running_lo(&self) -> Result<LogIndex, ReplicationError> {
        match &*self.phase.lock() {
            Phase::Running { lo, .. } => Ok(*lo),
            Phase::NotStarted => Err(ReplicationError::NotStarted),
            Phase::Stopped => Err(ReplicationError::Stopped),
        }
    }

    fn change(&self, change: ConfigChange) -> Result<(), ReplicationError> {
        self.running_lo()?;
        let mut membership = self.membership.lock();
        if let ChangeDecision::Apply(next) = apply_change(&membership, change) {
            *membership = next;
        }
        Ok(())
    }
}

#[async_trait]
impl LogReplicator for DeterministicLogReplicator {
    async fn start(&self, lo: LogIndex) -> Result<(), ReplicationError> {
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::NotStarted => {}
            Phase::Running { .. } => return Err(ReplicationError::AlreadyStarted),
            Phase::Stopped => return Err(ReplicationError::Stopped),
        }
        let first_index = self.store.first_index()?;
        if lo < first_index {
            return Err(ReplicationError::BelowHorizon { lo, first_index });
        }
        let (commit_tx, _) = watch::channel(self.store.read_committed()?);
        let (leader_tx, _) = watch::channel(true);
        *phase = Phase::Running {
            lo,
            commit_tx,
            leader_tx,
        };
        Ok(())
    }

    async fn propose(&self, cancel: &CancellationToken, data: Vec<u8>) -> Result<(), ReplicationError> {
        let phase = self.phase.lock();
        let Phase::Running { commit_tx, .. } = &*phase else {
            return match &*phase {
                Phase::NotStarted => Err(ReplicationError::NotStarted),
                _ => Err(ReplicationError::Stopped),
            };
        };
        if cancel.is_cancelled() {
            return Ok(());
        }
        let index = next_after(self.store.last_log_id()?.map(|log_id| log_id.index));
        let entry = LogEntry::new(LogId::new(TERM, index), EntryPayload::Normal(data));
        self.store.append(&[entry])?;
        self.store.save_committed(Some(index))?;
        commit_tx.send_replace(Some(index));
        Ok(())
    }

    fn wait_committed(&self) -> Result<CommitStream, ReplicationError> {
        let phase = self.phase.lock();
        match &*phase {
            Phase::Running { lo, commit_tx, .. } => {
                Ok(CommitStream::new(Arc::new(self.store.clone()), *lo, commit_tx.subscribe()))
            }
            Phase::NotStarted => Err(ReplicationError::NotStarted),
            Phase::Stopped => Err(ReplicationError::Stopped),
        }
    }

    async fn stop(&self) -> Result<(), ReplicationError> {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Running { leader_tx, .. } => {
                leader_tx.send_replace(false);
                Ok(())
            }
            Phase::NotStarted => {
                *phase = Phase::NotStarted;
                Err(ReplicationError::NotStarted)
            }
            Phase::Stopped => Err(ReplicationError::Stopped),
        }
    }

    async fn add_replica(&self, node: NodeId) -> Result<(), ReplicationError> {
        self.change(ConfigChange::AddReplica(node))
    }

    async fn drop_replica(&self, node: NodeId) -> Result<(), ReplicationError> {
        self.change(ConfigChange::DropReplica(node))
    }

    fn leader_hints(&self) -> Result<LeaderHints, ReplicationError> {
        match &*self.phase.lock() {
            Phase::Running { leader_tx, .. } => Ok(LeaderHints::new(leader_tx.subscribe())),
            Phase::NotStarted => Err(ReplicationError::NotStarted),
            Phase::Stopped => Err(ReplicationError::Stopped),
        }
    }

    fn get_committed(&self, lo: LogIndex, hi: LogIndex, max_size: u64) -> Result<Vec<CommittedEntry>, ReplicationError> {
        self.running_lo()?;
        check_committed_range(lo, hi, self.store.first_index()?)?;
        let end = hi.min(next_after(self.store.read_committed()?));
        if lo >= end {
            return Ok(Vec::new());
        }
        Ok(select_committed_range(self.store.entries(lo, end)?, max_size))
    }
}

impl std::fmt::Debug for DeterministicLogReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicLogReplicator").field("entries", &self.store.len()).finish()
    }
}
