//! Testing infrastructure for the replicated log.
//!
//! ## In-Memory Clusters
//!
//! - `RaftRouter`: runs several [`ratify_raft::RaftLog`] replicas in one
//!   process over a simulated network
//! - `FailureInjector`: message drops, loss rates, delays, partitions and
//!   crashed nodes
//! - Wait helpers on the router poll replica metrics instead of sleeping
//!
//! ## Contract Doubles
//!
//! - `DeterministicLogReplicator`: a [`ratify_raft::LogReplicator`] that
//!   commits on propose, for testing code that consumes the log
//!
//! # Usage
//!
//! ```ignore
//! let router = RaftRouter::new([1, 2, 3])?;
//! router.start_all(0).await?;
//!
//! let leader = router.wait_for_leader(timeout()).await?;
//! router.partition(&[&[leader], &others]);
//! let new_leader = router.wait_for_leader(timeout()).await?;
//! ```

pub mod deterministic;
pub mod failure;
pub mod router;

pub use deterministic::DeterministicLogReplicator;
pub use failure::FailureInjector;
pub use failure::Verdict;
pub use router::RaftRouter;
pub use router::RouterTransport;
pub use router::TestNode;
