//! Cluster membership types.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::NodeId;

/// A single membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigChange {
    AddReplica(NodeId),
    DropReplica(NodeId),
}

impl ConfigChange {
    pub fn node(&self) -> NodeId {
        match self {
            ConfigChange::AddReplica(node) | ConfigChange::DropReplica(node) => *node,
        }
    }
}

impl fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigChange::AddReplica(node) => write!(f, "add({node})"),
            ConfigChange::DropReplica(node) => write!(f, "drop({node})"),
        }
    }
}

/// A change together with the configuration epoch it was proposed under.
///
/// The change only takes effect if it commits while that epoch is still
/// current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedChange {
    pub change: ConfigChange,
    pub proposed_under: u64,
}

impl StampedChange {
    pub fn new(change: ConfigChange, proposed_under: u64) -> Self {
        Self { change, proposed_under }
    }
}

/// The voter set a replica treats as authoritative.
///
/// `epoch` counts changes applied from committed `Reconfigure` entries and is
/// the only counter a stamped change is checked against. `local_changes`
/// counts changes applied directly on this replica; it never gates a
/// committed change. Every replica bootstraps from the same voters at epoch 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub epoch: u64,
    #[serde(default)]
    pub local_changes: u64,
    pub voters: BTreeSet<NodeId>,
}

impl ClusterConfig {
    pub fn bootstrap(voters: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            epoch: 0,
            local_changes: 0,
            voters: voters.into_iter().collect(),
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.voters.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }
}

impl fmt::Display for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {} voters {:?}", self.epoch, self.voters)
    }
}
