//! Public handle to one replica of the replicated log.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ratify_constants::LOCAL_COMMAND_CAPACITY;
use ratify_constants::MAX_BATCH_SIZE;
use ratify_constants::RAFT_INBOX_CAPACITY;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::CommittedEntry;
use ratify_raft_types::ConfigChange;
use ratify_raft_types::EntryPayload;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::StampedChange;
use ratify_raft_types::next_after;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::commit_stream::CommitStream;
use crate::config::RaftConfig;
use crate::engine::CoreReceivers;
use crate::engine::CoreSenders;
use crate::engine::LocalCommand;
use crate::engine::RaftCore;
use crate::engine::recover;
use crate::error::ConfigSnafu;
use crate::error::ReplicationError;
use crate::leader_hint::LeaderHints;
use crate::metrics::RaftMetrics;
use crate::network::RaftInbox;
use crate::network::RaftTransport;
use crate::pure::ChangeDecision;
use crate::pure::RangeBudget;
use crate::replicator::LogReplicator;
use crate::replicator::check_committed_range;
use crate::storage::AnyLogStore;
use crate::storage::LogStore;

enum Lifecycle {
    NotStarted(Box<(CoreReceivers, CoreSenders)>),
    Running {
        lo: LogIndex,
        shutdown: CancellationToken,
        handle: JoinHandle<Result<(), ReplicationError>>,
    },
    Stopped,
}

/// One replica of the Raft replicated log.
///
/// Created in the `NotStarted` state. [`start`](LogReplicator::start) spawns
/// the consensus task on the current tokio runtime; [`stop`](LogReplicator::stop)
/// cancels it and waits for it to exit.
///
/// # Example
///
/// ```rust,ignore
/// let log = RaftLog::new(config, InMemoryLogStore::default(), transport)?;
/// log.start(0).await?;
/// let mut commits = log.wait_committed()?;
/// log.propose(&CancellationToken::new(), b"hello".to_vec()).await?;
/// while let Some(entry) = commits.next_entry().await {
///     let entry = entry?;
///     if let Some(data) = entry.data() {
///         apply(data);
///     }
/// }
/// ```
pub struct RaftLog<S: LogStore, T: RaftTransport> {
    config: Arc<RaftConfig>,
    store: S,
    transport: Arc<T>,
    inbox: RaftInbox,
    proposal_tx: mpsc::Sender<EntryPayload>,
    command_tx: mpsc::Sender<LocalCommand>,
    commit_rx: watch::Receiver<Option<LogIndex>>,
    leader_rx: watch::Receiver<bool>,
    config_rx: watch::Receiver<ClusterConfig>,
    metrics_rx: watch::Receiver<RaftMetrics>,
    state: Mutex<Lifecycle>,
}

impl<T: RaftTransport> RaftLog<AnyLogStore, T> {
    /// Open the storage backend named in `config` and build a replica on it.
    pub fn open(config: RaftConfig, transport: Arc<T>) -> Result<Self, ReplicationError> {
        config.validate().context(ConfigSnafu)?;
        let store = AnyLogStore::open(&config)?;
        Self::new(config, store, transport)
    }
}

impl<S: LogStore, T: RaftTransport> RaftLog<S, T> {
    pub fn new(config: RaftConfig, store: S, transport: Arc<T>) -> Result<Self, ReplicationError> {
        config.validate().context(ConfigSnafu)?;

        let (inbox_tx, inbox_rx) = mpsc::channel(RAFT_INBOX_CAPACITY as usize);
        let (command_tx, command_rx) = mpsc::channel(LOCAL_COMMAND_CAPACITY as usize);
        let (proposal_tx, proposal_rx) = mpsc::channel(config.proposal_queue_capacity as usize);
        let (commit_tx, commit_rx) = watch::channel(None);
        let (leader_tx, leader_rx) = watch::channel(false);
        let (config_tx, config_rx) = watch::channel(ClusterConfig::bootstrap(config.voters.iter().copied()));
        let (metrics_tx, metrics_rx) = watch::channel(RaftMetrics {
            id: config.node_id,
            ..RaftMetrics::default()
        });

        let receivers = CoreReceivers {
            inbox: inbox_rx,
            commands: command_rx,
            proposals: proposal_rx,
        };
        let senders = CoreSenders {
            commit: commit_tx,
            leader: leader_tx,
            config: config_tx,
            metrics: metrics_tx,
        };

        Ok(Self {
            inbox: RaftInbox::new(config.node_id, inbox_tx),
            config: Arc::new(config),
            store,
            transport,
            proposal_tx,
            command_tx,
            commit_rx,
            leader_rx,
            config_rx,
            metrics_rx,
            state: Mutex::new(Lifecycle::NotStarted(Box::new((receivers, senders)))),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handle for delivering peer messages to this replica.
    pub fn inbox(&self) -> RaftInbox {
        self.inbox.clone()
    }

    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.metrics_rx.clone()
    }

    /// Cluster configuration currently in force on this replica.
    pub fn cluster_config(&self) -> ClusterConfig {
        self.config_rx.borrow().clone()
    }

    pub fn committed_index(&self) -> Option<LogIndex> {
        *self.commit_rx.borrow()
    }

    /// True while the consensus task is alive.
    pub fn is_running(&self) -> bool {
        self.ensure_running().is_ok()
    }

    /// A consensus task that exited on its own, after a storage failure,
    /// counts as stopped. [`stop`](LogReplicator::stop) still reports why.
    fn ensure_running(&self) -> Result<LogIndex, ReplicationError> {
        match &*self.state.lock() {
            Lifecycle::Running { handle, .. } if handle.is_finished() => Err(ReplicationError::Stopped),
            Lifecycle::Running { lo, .. } => Ok(*lo),
            Lifecycle::NotStarted(_) => Err(ReplicationError::NotStarted),
            Lifecycle::Stopped => Err(ReplicationError::Stopped),
        }
    }

    async fn submit(&self, cancel: &CancellationToken, payload: EntryPayload) -> Result<(), ReplicationError> {
        self.ensure_running()?;
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(node_id = self.config.node_id, "proposal abandoned by caller");
                Ok(())
            }
            sent = self.proposal_tx.send(payload) => sent.map_err(|_| ReplicationError::Stopped),
        }
    }

    /// Propose a membership change through the log.
    ///
    /// The change is stamped with the configuration epoch this replica sees
    /// now. It takes effect on every replica when it commits, and only if no
    /// other change applied in between.
    pub async fn propose_config_change(
        &self,
        cancel: &CancellationToken,
        change: ConfigChange,
    ) -> Result<(), ReplicationError> {
        let epoch = self.config_rx.borrow().epoch;
        let stamped = StampedChange::new(change, epoch);
        self.submit(cancel, EntryPayload::Reconfigure(stamped)).await
    }

    /// Apply a membership change to this replica only, returning what the
    /// replica decided.
    pub async fn apply_local_change(&self, change: ConfigChange) -> Result<ChangeDecision, ReplicationError> {
        self.ensure_running()?;
        let (reply, decision) = oneshot::channel();
        self.command_tx
            .send(LocalCommand { change, reply })
            .await
            .map_err(|_| ReplicationError::Stopped)?;
        decision.await.map_err(|_| ReplicationError::Stopped)
    }
}

#[async_trait]
impl<S: LogStore, T: RaftTransport> LogReplicator for RaftLog<S, T> {
    async fn start(&self, lo: LogIndex) -> Result<(), ReplicationError> {
        let mut state = self.state.lock();
        match &*state {
            Lifecycle::NotStarted(_) => {}
            Lifecycle::Running { .. } => return Err(ReplicationError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ReplicationError::Stopped),
        }

        let first_index = self.store.first_index()?;
        if lo < first_index {
            return Err(ReplicationError::BelowHorizon { lo, first_index });
        }
        let recovered = recover(&self.store, &self.config)?;

        let Lifecycle::NotStarted(channels) = std::mem::replace(&mut *state, Lifecycle::Stopped) else {
            return Err(ReplicationError::AlreadyStarted);
        };
        let (receivers, senders) = *channels;
        senders.commit.send_replace(recovered.committed);
        senders.config.send_replace(recovered.membership.config.clone());

        let core = RaftCore::new(
            Arc::clone(&self.config),
            self.store.clone(),
            Arc::clone(&self.transport),
            recovered,
            receivers,
            senders,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(core.run(shutdown.clone()));
        *state = Lifecycle::Running { lo, shutdown, handle };
        info!(node_id = self.config.node_id, lo, "replicated log started");
        Ok(())
    }

    async fn propose(&self, cancel: &CancellationToken, data: Vec<u8>) -> Result<(), ReplicationError> {
        self.submit(cancel, EntryPayload::Normal(data)).await
    }

    fn wait_committed(&self) -> Result<CommitStream, ReplicationError> {
        let lo = self.ensure_running()?;
        Ok(CommitStream::new(Arc::new(self.store.clone()), lo, self.commit_rx.clone()))
    }

    async fn stop(&self) -> Result<(), ReplicationError> {
        let (shutdown, handle) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Running { shutdown, handle, .. } => (shutdown, handle),
                Lifecycle::NotStarted(channels) => {
                    *state = Lifecycle::NotStarted(channels);
                    return Err(ReplicationError::NotStarted);
                }
                Lifecycle::Stopped => return Err(ReplicationError::Stopped),
            }
        };
        shutdown.cancel();
        let result = match handle.await {
            Ok(result) => result,
            Err(source) => Err(ReplicationError::Join { source }),
        };
        info!(node_id = self.config.node_id, "replicated log stopped");
        result
    }

    async fn add_replica(&self, node: NodeId) -> Result<(), ReplicationError> {
        let decision = self.apply_local_change(ConfigChange::AddReplica(node)).await?;
        debug!(node, ?decision, "add_replica");
        Ok(())
    }

    async fn drop_replica(&self, node: NodeId) -> Result<(), ReplicationError> {
        let decision = self.apply_local_change(ConfigChange::DropReplica(node)).await?;
        debug!(node, ?decision, "drop_replica");
        Ok(())
    }

    fn leader_hints(&self) -> Result<LeaderHints, ReplicationError> {
        self.ensure_running()?;
        Ok(LeaderHints::new(self.leader_rx.clone()))
    }

    fn get_committed(&self, lo: LogIndex, hi: LogIndex, max_size: u64) -> Result<Vec<CommittedEntry>, ReplicationError> {
        self.ensure_running()?;
        check_committed_range(lo, hi, self.store.first_index()?)?;
        let end = hi.min(next_after(*self.commit_rx.borrow()));

        let mut budget = RangeBudget::new(max_size);
        let mut out = Vec::new();
        let mut cursor = lo;
        while cursor < end && !budget.is_closed() {
            let batch = self.store.entries(cursor, end.min(cursor.saturating_add(MAX_BATCH_SIZE as u64)))?;
            let Some(last) = batch.last().map(|entry| entry.index()) else {
                return Err(ReplicationError::MissingEntry { index: cursor });
            };
            for entry in batch {
                if !budget.admit(entry.payload.size_bytes()) {
                    break;
                }
                out.push(CommittedEntry::from(entry));
            }
            cursor = last + 1;
        }
        Ok(out)
    }
}

impl<S: LogStore, T: RaftTransport> Drop for RaftLog<S, T> {
    fn drop(&mut self) {
        if let Lifecycle::Running { shutdown, .. } = &*self.state.get_mut() {
            shutdown.cancel();
        }
    }
}

impl<S: LogStore, T: RaftTransport> std::fmt::Debug for RaftLog<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftLog")
            .field("node_id", &self.config.node_id)
            .field("committed", &*self.commit_rx.borrow())
            .finish()
    }
}
