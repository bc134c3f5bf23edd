//! Quorum policy evaluation.
//!
//! A quorum policy is a tree of threshold nodes. Each node names verifiers
//! directly and may nest further policies. A node holds when at least
//! `threshold` of its direct verifiers ratified plus its nested policies hold.
//!
//! ```rust
//! use std::collections::HashSet;
//!
//! use ratify_quorum::QuorumExpr;
//! use ratify_quorum::check_quorum;
//! use ratify_quorum::list_quorum;
//!
//! let policy = QuorumExpr::new(1, vec![], vec![QuorumExpr::leaf(2, vec![1, 2])]);
//! let have: HashSet<u64> = [1].into_iter().collect();
//!
//! assert!(!check_quorum(&policy, &have));
//! assert_eq!(list_quorum(&policy, None), [1, 2].into_iter().collect());
//! ```
//!
//! # Tiger Style
//!
//! - Pure functions: no I/O, no shared state, inputs are never mutated
//! - Recursion bounded by `MAX_QUORUM_DEPTH`
//! - No error path: hostile input degrades to "not satisfied"

mod expr;

pub use expr::QuorumExpr;
pub use expr::VerifierId;
pub use expr::check_quorum;
pub use expr::list_quorum;
pub use ratify_constants::MAX_QUORUM_DEPTH;
