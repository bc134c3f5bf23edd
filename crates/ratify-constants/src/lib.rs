//! Centralized constants for the ratify workspace.
//!
//! Constants are grouped by the subsystem that consumes them so the bounds a
//! component relies on can be found in one place.
//!
//! Every constant has an explicit, fixed bound. Nothing in the workspace
//! allocates or recurses proportionally to untrusted input without one of
//! these limits in the way.
//!
//! # Modules
//!
//! - [`quorum`]: Quorum policy evaluation bounds
//! - [`raft`]: Consensus internals (replication batching, membership, integrity)
//! - [`timing`]: Default Raft timer values

mod assertions;
pub mod quorum;
pub mod raft;
pub mod timing;

pub use quorum::MAX_QUORUM_DEPTH;
pub use raft::CHAIN_VERIFY_BATCH_SIZE;
pub use raft::COMMIT_STREAM_BATCH_SIZE;
pub use raft::INTEGRITY_VERSION;
pub use raft::LOCAL_COMMAND_CAPACITY;
pub use raft::MAX_APPEND_ENTRIES;
pub use raft::MAX_BATCH_SIZE;
pub use raft::MAX_VOTERS;
pub use raft::PROPOSAL_QUEUE_CAPACITY;
pub use raft::RAFT_INBOX_CAPACITY;
