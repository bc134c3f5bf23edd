//! The consensus engine: one task per replica owning all Raft state.
//!
//! ```text
//! RaftLog::propose ------> proposals --+
//! RaftInbox::deliver ----> inbox ------+--> RaftCore::run --> LogStore
//! RaftLog::add_replica --> commands ---+         |
//!                                                +--> RaftTransport::send
//!                                                +--> watches (commit, leader, config, metrics)
//! ```
//!
//! The loop is the only writer of the store. Readers (commit streams and
//! range reads) only look at entries whose index has been published on the
//! commit watch, and committed entries are never truncated.
//!
//! Decisions are delegated to [`crate::pure`]; this module sequences them
//! with I/O and timers.

mod apply;
mod election;
mod replication;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use ratify_constants::MAX_BATCH_SIZE;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::ConfigChange;
use ratify_raft_types::EntryPayload;
use ratify_raft_types::HardState;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIdOptionExt;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::RaftMessage;
use ratify_raft_types::next_after;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

use crate::config::RaftConfig;
use crate::error::ReplicationError;
use crate::metrics::RaftMetrics;
use crate::metrics::ReplicaRole;
use crate::network::RaftTransport;
use crate::pure::ChangeDecision;
use crate::pure::random_election_timeout;
use crate::pure::replay_changes;
use crate::storage::LogStore;
use crate::storage::StorageError;
use crate::storage::StoredMembership;

/// Membership change requested directly by the embedding service.
pub(crate) struct LocalCommand {
    pub change: ConfigChange,
    pub reply: oneshot::Sender<ChangeDecision>,
}

/// Input side of the core, created with the [`RaftLog`](crate::RaftLog).
pub(crate) struct CoreReceivers {
    pub inbox: mpsc::Receiver<RaftMessage>,
    pub commands: mpsc::Receiver<LocalCommand>,
    pub proposals: mpsc::Receiver<EntryPayload>,
}

/// Output side of the core. Dropping these closes every stream.
pub(crate) struct CoreSenders {
    pub commit: watch::Sender<Option<LogIndex>>,
    pub leader: watch::Sender<bool>,
    pub config: watch::Sender<ClusterConfig>,
    pub metrics: watch::Sender<RaftMetrics>,
}

/// Leader's view of one follower.
#[derive(Debug, Clone)]
struct Progress {
    /// Next index to send.
    next: LogIndex,
    /// Highest index known to be stored on the follower.
    matched: Option<LogIndex>,
    last_ack: Option<Instant>,
}

impl Progress {
    fn new(next: LogIndex) -> Self {
        Self {
            next,
            matched: None,
            last_ack: None,
        }
    }
}

enum Role {
    Follower,
    Candidate { votes: BTreeSet<NodeId> },
    Leader { progress: BTreeMap<NodeId, Progress>, since: Instant },
}

impl Role {
    fn metric(&self) -> ReplicaRole {
        match self {
            Role::Follower => ReplicaRole::Follower,
            Role::Candidate { .. } => ReplicaRole::Candidate,
            Role::Leader { .. } => ReplicaRole::Leader,
        }
    }

    fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }
}

/// Replica state read back from storage before the loop starts.
#[derive(Debug, Clone)]
pub(crate) struct Recovered {
    pub hard: HardState,
    pub last_log_id: Option<LogId>,
    pub committed: Option<LogIndex>,
    pub membership: StoredMembership,
    /// Index of the last committed change that applied, if replay saw one.
    pub last_change_index: Option<LogIndex>,
}

/// Load and check persisted state.
///
/// Verifies the log's chain hashes, then replays committed membership
/// changes the stored configuration does not yet include.
pub(crate) fn recover<S: LogStore>(store: &S, config: &RaftConfig) -> Result<Recovered, ReplicationError> {
    let verified = store.verify_chain()?;
    let hard = store.read_hard_state()?;
    let last_log_id = store.last_log_id()?;
    let committed = store.read_committed()?;
    if committed > last_log_id.index() {
        return Err(StorageError::CommitBeyondLog {
            committed: committed.unwrap_or_default(),
            last: last_log_id.index(),
        }
        .into());
    }

    let mut membership = match store.read_membership()? {
        Some(stored) => stored,
        None => StoredMembership {
            config: ClusterConfig::bootstrap(config.voters.iter().copied()),
            applied_through: None,
        },
    };

    let mut last_change_index = None;
    let mut cursor = next_after(membership.applied_through);
    let end = next_after(committed);
    while cursor < end {
        let hi = end.min(cursor.saturating_add(MAX_BATCH_SIZE as u64));
        let batch = store.entries(cursor, hi)?;
        let Some(last) = batch.last().map(|entry| entry.index()) else {
            return Err(ReplicationError::MissingEntry { index: cursor });
        };
        let changes = batch.iter().filter_map(|entry| match &entry.payload {
            EntryPayload::Reconfigure(stamped) => Some((entry.index(), stamped)),
            _ => None,
        });
        let replayed = replay_changes(membership.config, changes);
        membership.config = replayed.config;
        last_change_index = replayed.last_applied.or(last_change_index);
        cursor = last + 1;
    }
    membership.applied_through = membership.applied_through.max(committed);

    info!(
        node_id = config.node_id,
        verified,
        term = hard.current_term,
        last_log = ?last_log_id,
        committed = ?committed,
        config = %membership.config,
        "recovered replica state"
    );

    Ok(Recovered {
        hard,
        last_log_id,
        committed,
        membership,
        last_change_index,
    })
}

pub(crate) struct RaftCore<S: LogStore, T: RaftTransport> {
    id: NodeId,
    config: Arc<RaftConfig>,
    store: S,
    transport: Arc<T>,

    hard: HardState,
    role: Role,
    leader_id: Option<NodeId>,
    last_log_id: Option<LogId>,
    committed: Option<LogIndex>,

    cluster: ClusterConfig,
    last_change_index: Option<LogIndex>,

    election_deadline: Instant,
    heartbeat_deadline: Instant,
    last_leader_contact: Option<Instant>,
    rng: StdRng,

    rx: CoreReceivers,
    tx: CoreSenders,
}

impl<S: LogStore, T: RaftTransport> RaftCore<S, T> {
    pub(crate) fn new(
        config: Arc<RaftConfig>,
        store: S,
        transport: Arc<T>,
        recovered: Recovered,
        rx: CoreReceivers,
        tx: CoreSenders,
    ) -> Self {
        let now = Instant::now();
        let mut core = Self {
            id: config.node_id,
            store,
            transport,
            hard: recovered.hard,
            role: Role::Follower,
            leader_id: None,
            last_log_id: recovered.last_log_id,
            committed: recovered.committed,
            cluster: recovered.membership.config,
            last_change_index: recovered.last_change_index,
            election_deadline: now,
            heartbeat_deadline: now,
            last_leader_contact: None,
            rng: StdRng::from_entropy(),
            rx,
            tx,
            config,
        };
        core.reset_election_deadline();
        core
    }

    /// Run until `shutdown` fires or storage fails.
    #[tracing::instrument(level = "debug", skip_all, fields(node_id = self.id))]
    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> Result<(), ReplicationError> {
        info!(config = %self.cluster, "replica started");
        self.tx.config.send_replace(self.cluster.clone());
        self.tx.commit.send_replace(self.committed);
        self.publish();

        let result = self.run_inner(&shutdown).await;

        self.tx.leader.send_replace(false);
        match &result {
            Ok(()) => info!("replica stopped"),
            Err(err) => error!(error = %err, "replica failed"),
        }
        result
    }

    async fn run_inner(&mut self, shutdown: &CancellationToken) -> Result<(), ReplicationError> {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                Some(message) = self.rx.inbox.recv() => self.handle_message(message).await?,
                Some(command) = self.rx.commands.recv() => self.handle_command(command)?,
                Some(payload) = self.rx.proposals.recv() => self.handle_proposal(payload).await?,
                _ = sleep_until(deadline) => self.handle_tick().await?,
            }
            self.publish();
        }
    }

    async fn handle_message(&mut self, message: RaftMessage) -> Result<(), ReplicationError> {
        trace!(kind = message.kind(), from = message.sender(), "message received");
        match message {
            RaftMessage::Vote(request) => self.handle_vote_request(request).await,
            RaftMessage::VoteResponse(response) => self.handle_vote_response(response).await,
            RaftMessage::AppendEntries(request) => self.handle_append_entries(request).await,
            RaftMessage::AppendEntriesResponse(response) => self.handle_append_response(response).await,
            RaftMessage::Forward(forwarded) => {
                if self.role.is_leader() {
                    self.append_and_replicate(vec![forwarded.payload]).await
                } else {
                    debug!(from = forwarded.from, "dropping forwarded proposal: not leader");
                    Ok(())
                }
            }
        }
    }

    async fn handle_tick(&mut self) -> Result<(), ReplicationError> {
        let now = Instant::now();
        if self.role.is_leader() {
            if now >= self.heartbeat_deadline {
                if !self.check_quorum(now) {
                    return Ok(());
                }
                self.broadcast_append().await?;
            }
        } else if now >= self.election_deadline {
            self.start_election().await?;
        }
        Ok(())
    }

    fn next_deadline(&self) -> Instant {
        if self.role.is_leader() {
            self.heartbeat_deadline
        } else {
            self.election_deadline
        }
    }

    fn reset_election_deadline(&mut self) {
        let timeout = random_election_timeout(
            &mut self.rng,
            self.config.election_timeout_min(),
            self.config.election_timeout_max(),
        );
        self.election_deadline = Instant::now() + timeout;
    }

    fn since_leader_contact(&self) -> Option<Duration> {
        self.last_leader_contact.map(|at| at.elapsed())
    }

    /// Persist `hard` before anything that depends on it leaves this replica.
    fn save_hard_state(&mut self) -> Result<(), ReplicationError> {
        self.store.save_hard_state(&self.hard)?;
        Ok(())
    }

    async fn send_all(&self, messages: Vec<(NodeId, RaftMessage)>) {
        let sends = messages.into_iter().map(|(target, message)| {
            let transport = Arc::clone(&self.transport);
            async move {
                let kind = message.kind();
                if let Err(err) = transport.send(target, message).await {
                    trace!(target, kind, error = %err, "send failed");
                }
            }
        });
        join_all(sends).await;
    }

    async fn send(&self, target: NodeId, message: RaftMessage) {
        self.send_all(vec![(target, message)]).await;
    }

    fn publish(&self) {
        let is_leader = self.role.is_leader();
        self.tx.leader.send_if_modified(|current| {
            let changed = *current != is_leader;
            *current = is_leader;
            changed
        });
        let metrics = RaftMetrics {
            id: self.id,
            current_term: self.hard.current_term,
            role: self.role.metric(),
            current_leader: self.leader_id,
            last_log: self.last_log_id,
            committed: self.committed,
            config: self.cluster.clone(),
        };
        self.tx.metrics.send_if_modified(|current| {
            if *current == metrics {
                return false;
            }
            *current = metrics;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use ratify_raft_types::LogEntry;
    use ratify_raft_types::StampedChange;

    use super::*;
    use crate::storage::InMemoryLogStore;

    fn reconfigure(index: LogIndex, change: ConfigChange, proposed_under: u64) -> LogEntry {
        LogEntry::new(
            LogId::new(1, index),
            EntryPayload::Reconfigure(StampedChange::new(change, proposed_under)),
        )
    }

    fn blank(index: LogIndex) -> LogEntry {
        LogEntry::new(LogId::new(1, index), EntryPayload::Blank)
    }

    // ========================================================================
    // recover tests
    // ========================================================================

    #[test]
    fn test_recover_replays_committed_changes_only() {
        let store = InMemoryLogStore::default();
        store
            .append(&[
                blank(0),
                reconfigure(1, ConfigChange::AddReplica(4), 0),
                reconfigure(2, ConfigChange::AddReplica(5), 0),
                reconfigure(3, ConfigChange::DropReplica(1), 1),
            ])
            .expect("append");
        store.save_committed(Some(2)).expect("commit");

        let recovered = recover(&store, &RaftConfig::new(1, [1, 2, 3])).expect("recover");
        assert_eq!(recovered.membership.config.epoch, 1);
        assert!(recovered.membership.config.contains(4));
        assert!(!recovered.membership.config.contains(5));
        assert!(recovered.membership.config.contains(1));
        assert_eq!(recovered.membership.applied_through, Some(2));
        assert_eq!(recovered.last_change_index, Some(1));
    }

    #[test]
    fn test_recover_starts_after_stored_membership() {
        let store = InMemoryLogStore::default();
        store
            .append(&[reconfigure(0, ConfigChange::AddReplica(4), 0), blank(1)])
            .expect("append");
        store.save_committed(Some(1)).expect("commit");
        let stored = ClusterConfig {
            epoch: 1,
            local_changes: 1,
            voters: [1, 2, 3, 4, 7].into_iter().collect(),
        };
        store
            .save_membership(&StoredMembership {
                config: stored.clone(),
                applied_through: Some(0),
            })
            .expect("membership");

        let recovered = recover(&store, &RaftConfig::new(1, [1, 2, 3])).expect("recover");
        assert_eq!(recovered.membership.config, stored);
        assert_eq!(recovered.last_change_index, None);
    }

    #[test]
    fn test_recover_rejects_commit_beyond_log() {
        let store = InMemoryLogStore::default();
        store.append(&[blank(0)]).expect("append");
        store.save_committed(Some(3)).expect("commit");
        assert!(recover(&store, &RaftConfig::new(1, [1])).is_err());
    }
}
