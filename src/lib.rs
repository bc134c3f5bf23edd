//! Replicated log and quorum policy evaluation.
//!
//! This crate bundles the workspace members behind one dependency:
//!
//! - [`quorum`]: threshold policies over verifier identities
//! - [`raft`]: the Raft replicated log and its `LogReplicator` contract
//! - [`raft_types`]: messages, entries and membership types shared with transports
//! - [`constants`]: the fixed bounds every component relies on
//!
//! ```ignore
//! use ratify::raft::LogReplicator;
//! use ratify::raft::RaftConfig;
//! use ratify::raft::RaftLog;
//!
//! let log = RaftLog::open(RaftConfig::load("raft.toml")?, transport)?;
//! log.start(next_unprocessed_index).await?;
//! ```

pub use ratify_constants as constants;
pub use ratify_quorum as quorum;
pub use ratify_raft as raft;
pub use ratify_raft_types as raft_types;
