//! Pure decision functions used by the consensus core.
//!
//! The core loop owns all I/O and timers. Each decision it makes lives here
//! as a deterministic function so it can be tested with explicit inputs and
//! property tests.
//!
//! # Tiger Style
//!
//! - No async, no I/O, no clocks
//! - Saturating arithmetic
//! - Randomness only through a caller-supplied `Rng`

mod election;
mod log_matching;
mod membership;
mod quorum;
mod range;

pub use election::can_grant_vote;
pub use election::is_log_up_to_date;
pub use election::leader_is_fresh;
pub use election::random_election_timeout;
pub use log_matching::AppendPlan;
pub use log_matching::conflict_hint;
pub use log_matching::follower_commit;
pub use log_matching::plan_append;
pub use membership::ChangeDecision;
pub use membership::Replayed;
pub use membership::apply_change;
pub use membership::evaluate_change;
pub use membership::replay_changes;
pub use membership::settle_change;
pub use membership::voters_caught_up;
pub use quorum::calculate_quorum_size;
pub use quorum::has_majority;
pub use quorum::majority_match_index;
pub use range::RangeBudget;
pub use range::select_committed_range;
