//! Fault injection for in-memory clusters.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use ratify_raft_types::NodeId;

/// What the router should do with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Delay(Duration),
    Drop,
}

/// Controls message loss, delay, partitions and node crashes.
///
/// Link settings are directional: `(source, target)`.
///
/// Tiger Style: delays are explicit u64 milliseconds.
#[derive(Debug, Default)]
pub struct FailureInjector {
    /// (source, target) -> always drop
    drops: Mutex<HashSet<(NodeId, NodeId)>>,
    /// (source, target) -> loss rate in [0.0, 1.0]
    loss_rates: Mutex<HashMap<(NodeId, NodeId), f64>>,
    /// (source, target) -> delay_ms
    delays: Mutex<HashMap<(NodeId, NodeId), u64>>,
    /// Nodes that neither send nor receive.
    failed: Mutex<HashSet<NodeId>>,
    /// Partition group per node; nodes in different groups cannot talk.
    groups: Mutex<HashMap<NodeId, u32>>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message_drop(&self, source: NodeId, target: NodeId, should_drop: bool) {
        let mut drops = self.drops.lock();
        if should_drop {
            drops.insert((source, target));
        } else {
            drops.remove(&(source, target));
        }
    }

    /// Drop messages from `source` to `target` with probability `rate`.
    pub fn set_packet_loss_rate(&self, source: NodeId, target: NodeId, rate: f64) {
        assert!((0.0..=1.0).contains(&rate), "loss rate must be between 0.0 and 1.0");
        self.loss_rates.lock().insert((source, target), rate);
    }

    pub fn set_network_delay(&self, source: NodeId, target: NodeId, delay_ms: u64) {
        let mut delays = self.delays.lock();
        if delay_ms == 0 {
            delays.remove(&(source, target));
        } else {
            delays.insert((source, target), delay_ms);
        }
    }

    /// Isolate `node` from every other node.
    pub fn fail_node(&self, node: NodeId) {
        self.failed.lock().insert(node);
    }

    pub fn recover_node(&self, node: NodeId) {
        self.failed.lock().remove(&node);
    }

    pub fn is_failed(&self, node: NodeId) -> bool {
        self.failed.lock().contains(&node)
    }

    /// Split the cluster: each slice becomes a group that can only talk to
    /// itself. Nodes not listed stay reachable from group 0.
    pub fn partition(&self, sides: &[&[NodeId]]) {
        let mut groups = self.groups.lock();
        groups.clear();
        for (group, side) in sides.iter().enumerate() {
            for &node in side.iter() {
                groups.insert(node, group as u32);
            }
        }
    }

    pub fn heal(&self) {
        self.groups.lock().clear();
    }

    /// Clear every injected failure.
    pub fn reset(&self) {
        self.drops.lock().clear();
        self.loss_rates.lock().clear();
        self.delays.lock().clear();
        self.failed.lock().clear();
        self.groups.lock().clear();
    }

    pub(crate) fn verdict(&self, source: NodeId, target: NodeId) -> Verdict {
        {
            let failed = self.failed.lock();
            if failed.contains(&source) || failed.contains(&target) {
                return Verdict::Drop;
            }
        }
        {
            let groups = self.groups.lock();
            let side_of = |node: NodeId| groups.get(&node).copied().unwrap_or(0);
            if side_of(source) != side_of(target) {
                return Verdict::Drop;
            }
        }
        if self.drops.lock().contains(&(source, target)) {
            return Verdict::Drop;
        }
        if let Some(&rate) = self.loss_rates.lock().get(&(source, target)) {
            if rate > 0.0 && rand::thread_rng().gen_bool(rate) {
                return Verdict::Drop;
            }
        }
        match self.delays.lock().get(&(source, target)) {
            Some(&delay_ms) => Verdict::Delay(Duration::from_millis(delay_ms)),
            None => Verdict::Deliver,
        }
    }
}
