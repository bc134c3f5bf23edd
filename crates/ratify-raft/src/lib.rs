//! Raft replicated log with epoch-gated membership changes.
//!
//! [`RaftLog`] is one replica of an ordered, durable log agreed on by a
//! majority of the cluster. It implements [`LogReplicator`], the contract
//! higher layers program against:
//!
//! - `start` / `stop` bracket the replica's lifetime
//! - `propose` submits opaque bytes, best effort
//! - `wait_committed` streams committed entries in index order
//! - `get_committed` reads a committed range under a byte budget
//! - `add_replica` / `drop_replica` adjust the local membership view
//! - `leader_hints` reports whether this replica believes it leads
//!
//! # Architecture
//!
//! ```text
//!            +---------------------------------------------+
//!  caller -> | RaftLog (node.rs)                           |
//!            |   proposals / commands / inbox channels     |
//!            +----------------------+----------------------+
//!                                   v
//!            +---------------------------------------------+
//!            | engine: single task per replica             |
//!            |   election / replication / apply            |
//!            |   decisions in pure/                        |
//!            +-------+--------------------------+----------+
//!                    v                          v
//!              LogStore (storage/)       RaftTransport (network.rs)
//!              redb or in-memory         supplied by the embedder
//! ```
//!
//! # Membership
//!
//! A membership change proposed with [`RaftLog::propose_config_change`] is
//! stamped with the configuration epoch the proposer saw. It takes effect
//! when it commits, on every replica, only if the epoch is still current.
//! See [`pure::evaluate_change`].
//!
//! # Tiger Style
//!
//! - Bounded queues and batches (see `ratify-constants`)
//! - Storage failures stop the replica; they are never retried silently
//! - Explicit SNAFU error types

pub mod commit_stream;
pub mod config;
mod engine;
pub mod error;
pub mod integrity;
pub mod leader_hint;
pub mod metrics;
pub mod network;
pub mod node;
pub mod pure;
pub mod replicator;
pub mod storage;

pub use commit_stream::CommitStream;
pub use commit_stream::CommittedReader;
pub use config::ConfigError;
pub use config::RaftConfig;
pub use config::RaftTimingProfile;
pub use error::ReplicationError;
pub use leader_hint::LeaderHints;
pub use metrics::RaftMetrics;
pub use metrics::ReplicaRole;
pub use network::RaftInbox;
pub use network::RaftTransport;
pub use network::TransportError;
pub use node::RaftLog;
pub use replicator::LogReplicator;
pub use replicator::check_committed_range;
pub use storage::AnyLogStore;
pub use storage::InMemoryLogStore;
pub use storage::LogStore;
pub use storage::RedbLogStore;
pub use storage::StorageBackend;
pub use storage::StorageError;
pub use storage::StoredMembership;
