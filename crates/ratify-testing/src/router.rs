//! In-memory cluster of [`RaftLog`] replicas.
//!
//! Every replica gets a [`RouterTransport`] that hands messages straight to
//! the target's [`RaftInbox`], after the shared [`FailureInjector`] has had
//! its say. Stores outlive the replicas built on them, so a node can be
//! stopped and started again over the same log.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use ratify_raft::InMemoryLogStore;
use ratify_raft::LogReplicator;
use ratify_raft::RaftConfig;
use ratify_raft::RaftInbox;
use ratify_raft::RaftLog;
use ratify_raft::RaftMetrics;
use ratify_raft::RaftTimingProfile;
use ratify_raft::RaftTransport;
use ratify_raft::TransportError;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::RaftMessage;
use tracing::debug;
use tracing::info;

use crate::failure::FailureInjector;
use crate::failure::Verdict;

/// A replica wired into a [`RaftRouter`].
pub type TestNode = RaftLog<InMemoryLogStore, RouterTransport>;

/// How often `wait_for_leader` re-inspects the cluster.
const LEADER_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct InnerRouter {
    inboxes: RwLock<HashMap<NodeId, RaftInbox>>,
    injector: FailureInjector,
}

impl InnerRouter {
    fn route(&self, source: NodeId, target: NodeId, message: RaftMessage) -> Result<(), TransportError> {
        let Some(inbox) = self.inboxes.read().get(&target).cloned() else {
            return Err(TransportError::Unreachable { target });
        };
        match self.injector.verdict(source, target) {
            Verdict::Deliver => inbox.deliver(message),
            Verdict::Drop => Err(TransportError::Dropped {
                target,
                reason: "injected failure".to_string(),
            }),
            Verdict::Delay(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(error) = inbox.deliver(message) {
                        debug!(source, target, %error, "delayed message lost");
                    }
                });
                Ok(())
            }
        }
    }
}

/// Transport handed to each replica built by the router.
#[derive(Debug, Clone)]
pub struct RouterTransport {
    source: NodeId,
    router: Arc<InnerRouter>,
}

#[async_trait]
impl RaftTransport for RouterTransport {
    async fn send(&self, target: NodeId, message: RaftMessage) -> Result<(), TransportError> {
        self.router.route(self.source, target, message)
    }
}

/// Manages a set of in-memory replicas sharing one simulated network.
///
/// ```ignore
/// let router = RaftRouter::new([1, 2, 3])?;
/// router.start_all(0).await?;
/// let leader = router.wait_for_leader(timeout()).await?;
/// router.node(leader)?.propose(&CancellationToken::new(), b"a".to_vec()).await?;
/// router.wait_for_commit(1, Some(1), timeout()).await?;
/// ```
#[derive(Debug)]
pub struct RaftRouter {
    voters: Vec<NodeId>,
    profile: RaftTimingProfile,
    inner: Arc<InnerRouter>,
    nodes: Mutex<BTreeMap<NodeId, Arc<TestNode>>>,
    stores: Mutex<BTreeMap<NodeId, InMemoryLogStore>>,
}

impl RaftRouter {
    /// Build a router with one (not yet started) replica per voter.
    pub fn new(voters: impl IntoIterator<Item = NodeId>) -> Result<Self> {
        Self::with_profile(voters, RaftTimingProfile::Fast)
    }

    pub fn with_profile(voters: impl IntoIterator<Item = NodeId>, profile: RaftTimingProfile) -> Result<Self> {
        let router = Self {
            voters: voters.into_iter().collect(),
            profile,
            inner: Arc::new(InnerRouter::default()),
            nodes: Mutex::new(BTreeMap::new()),
            stores: Mutex::new(BTreeMap::new()),
        };
        for id in router.voters.clone() {
            router.add_node(id)?;
        }
        Ok(router)
    }

    /// Configuration used for node `id`.
    pub fn config_for(&self, id: NodeId) -> RaftConfig {
        RaftConfig::new(id, self.voters.iter().copied()).with_timing_profile(self.profile)
    }

    pub fn voters(&self) -> &[NodeId] {
        &self.voters
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.inner.injector
    }

    /// Create node `id` over its existing store, or a fresh one.
    pub fn add_node(&self, id: NodeId) -> Result<Arc<TestNode>> {
        let store = self.stores.lock().entry(id).or_default().clone();
        self.add_node_with_config(self.config_for(id), store)
    }

    /// Create a node from an explicit configuration and store.
    pub fn add_node_with_config(&self, config: RaftConfig, store: InMemoryLogStore) -> Result<Arc<TestNode>> {
        let id = config.node_id;
        let transport = Arc::new(RouterTransport {
            source: id,
            router: Arc::clone(&self.inner),
        });
        let node = Arc::new(RaftLog::new(config, store.clone(), transport)?);
        self.inner.inboxes.write().insert(id, node.inbox());
        self.stores.lock().insert(id, store);
        self.nodes.lock().insert(id, Arc::clone(&node));
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Result<Arc<TestNode>> {
        self.nodes.lock().get(&id).cloned().ok_or_else(|| anyhow!("node {id} not found"))
    }

    /// Store backing node `id`, shared with the replica.
    pub fn store(&self, id: NodeId) -> Result<InMemoryLogStore> {
        self.stores.lock().get(&id).cloned().ok_or_else(|| anyhow!("no store for node {id}"))
    }

    /// Ids of every registered node.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.lock().keys().copied().collect()
    }

    pub async fn start_all(&self, lo: LogIndex) -> Result<()> {
        for id in self.node_ids() {
            self.node(id)?.start(lo).await.with_context(|| format!("start node {id}"))?;
        }
        Ok(())
    }

    /// Stop node `id`. Its store is kept for [`restart_node`](Self::restart_node).
    pub async fn stop_node(&self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        self.inner.inboxes.write().remove(&id);
        node.stop().await.with_context(|| format!("stop node {id}"))?;
        info!(node_id = id, "test node stopped");
        Ok(())
    }

    /// Build a new replica for `id` over the stopped replica's store and
    /// start it at `lo`.
    pub async fn restart_node(&self, id: NodeId, lo: LogIndex) -> Result<Arc<TestNode>> {
        let node = self.add_node(id)?;
        node.start(lo).await.with_context(|| format!("restart node {id}"))?;
        info!(node_id = id, lo, "test node restarted");
        Ok(node)
    }

    pub async fn stop_all(&self) -> Result<()> {
        for id in self.node_ids() {
            let node = self.node(id)?;
            if node.is_running() {
                self.stop_node(id).await?;
            }
        }
        Ok(())
    }

    pub fn fail_node(&self, id: NodeId) {
        self.inner.injector.fail_node(id);
    }

    pub fn recover_node(&self, id: NodeId) {
        self.inner.injector.recover_node(id);
    }

    pub fn partition(&self, sides: &[&[NodeId]]) {
        self.inner.injector.partition(sides);
    }

    pub fn heal(&self) {
        self.inner.injector.heal();
    }

    /// Hand `message` to node `target` directly, bypassing fault injection.
    pub fn deliver(&self, target: NodeId, message: RaftMessage) -> Result<()> {
        let inbox = self
            .inner
            .inboxes
            .read()
            .get(&target)
            .cloned()
            .ok_or_else(|| anyhow!("node {target} is not routable"))?;
        inbox.deliver(message)?;
        Ok(())
    }

    pub fn metrics(&self, id: NodeId) -> Result<RaftMetrics> {
        Ok(self.node(id)?.metrics().borrow().clone())
    }

    /// The leader with the highest term among running, reachable nodes.
    pub fn leader(&self) -> Option<NodeId> {
        let nodes: Vec<Arc<TestNode>> = self.nodes.lock().values().cloned().collect();
        nodes
            .iter()
            .filter(|node| node.is_running() && !self.inner.injector.is_failed(node.node_id()))
            .map(|node| node.metrics().borrow().clone())
            .filter(|metrics| metrics.is_leader())
            .max_by_key(|metrics| metrics.current_term)
            .map(|metrics| metrics.id)
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.leader() {
                return Ok(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("no leader elected within {timeout:?}"));
            }
            tokio::time::sleep(LEADER_POLL_INTERVAL).await;
        }
    }

    /// Wait until `condition` holds for node `id`'s metrics.
    pub async fn wait_for_metrics(
        &self,
        id: NodeId,
        timeout: Duration,
        msg: &str,
        condition: impl FnMut(&RaftMetrics) -> bool,
    ) -> Result<RaftMetrics> {
        let mut rx = self.node(id)?.metrics();
        let metrics = tokio::time::timeout(timeout, rx.wait_for(condition))
            .await
            .with_context(|| format!("node {id}: timed out waiting for {msg}"))?
            .with_context(|| format!("node {id}: stopped while waiting for {msg}"))?
            .clone();
        Ok(metrics)
    }

    /// Wait until node `id` has committed at least through `index`.
    pub async fn wait_for_commit(&self, id: NodeId, index: Option<LogIndex>, timeout: Duration) -> Result<RaftMetrics> {
        self.wait_for_metrics(id, timeout, "commit", |metrics| metrics.committed >= index).await
    }

    /// Wait until every running node has committed at least through `index`.
    pub async fn wait_for_commit_all(&self, index: Option<LogIndex>, timeout: Duration) -> Result<()> {
        for id in self.node_ids() {
            if self.node(id)?.is_running() {
                self.wait_for_commit(id, index, timeout).await?;
            }
        }
        Ok(())
    }
}
