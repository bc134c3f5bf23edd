//! Point-in-time view of a replica, published on every state change.

use std::fmt;

use ratify_raft_types::ClusterConfig;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::Term;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaRole::Follower => write!(f, "follower"),
            ReplicaRole::Candidate => write!(f, "candidate"),
            ReplicaRole::Leader => write!(f, "leader"),
        }
    }
}

/// Snapshot of replica state for observers and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMetrics {
    pub id: NodeId,
    pub current_term: Term,
    pub role: ReplicaRole,
    pub current_leader: Option<NodeId>,
    pub last_log: Option<LogId>,
    pub committed: Option<LogIndex>,
    pub config: ClusterConfig,
}

impl RaftMetrics {
    pub fn is_leader(&self) -> bool {
        self.role == ReplicaRole::Leader
    }
}
