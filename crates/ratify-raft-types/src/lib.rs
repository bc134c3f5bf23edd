//! Types shared by the replicated log engine and the transports that carry
//! its messages.
//!
//! Everything here is plain data with `serde` derives. The byte encoding used
//! on the wire is chosen by the transport; storage uses bincode.
//!
//! # Tiger Style
//!
//! - Explicit integer types: `u64` for node ids, terms, indices and epochs
//! - "No entry" is `Option<LogId>`, never a sentinel index
//! - No dependencies beyond `serde`

mod log;
mod membership;
mod message;

pub use log::CommittedEntry;
pub use log::EntryPayload;
pub use log::HardState;
pub use log::LogEntry;
pub use log::LogId;
pub use log::LogIdOptionExt;
pub use log::next_after;
pub use membership::ClusterConfig;
pub use membership::ConfigChange;
pub use membership::StampedChange;
pub use message::AppendEntriesRequest;
pub use message::AppendEntriesResponse;
pub use message::ForwardedProposal;
pub use message::RaftMessage;
pub use message::VoteRequest;
pub use message::VoteResponse;

/// Identifier of a replica.
pub type NodeId = u64;

/// Raft election term.
pub type Term = u64;

/// Position of an entry in the log. The first entry has index 0.
pub type LogIndex = u64;
