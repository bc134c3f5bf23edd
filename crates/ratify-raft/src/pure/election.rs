//! Leader election decisions.

use std::time::Duration;

use rand::Rng;
use ratify_raft_types::LogId;
use ratify_raft_types::NodeId;

/// Returns true if a candidate whose last entry is `candidate_last` has a log
/// at least as up to date as `local_last`.
///
/// Compares the last term first, then the last index.
#[inline]
pub fn is_log_up_to_date(candidate_last: Option<LogId>, local_last: Option<LogId>) -> bool {
    candidate_last >= local_last
}

/// Whether a vote may be granted in the current term.
///
/// The caller has already moved to the request's term if it was newer.
pub fn can_grant_vote(
    voted_for: Option<NodeId>,
    candidate: NodeId,
    candidate_last: Option<LogId>,
    local_last: Option<LogId>,
) -> bool {
    let free = match voted_for {
        None => true,
        Some(prior) => prior == candidate,
    };
    free && is_log_up_to_date(candidate_last, local_last)
}

/// Returns true if a leader was heard from within `election_min`.
///
/// Such a replica ignores vote requests, so a partitioned node that rejoins
/// with an inflated term cannot depose a healthy leader.
#[inline]
pub fn leader_is_fresh(since_leader_contact: Option<Duration>, election_min: Duration) -> bool {
    match since_leader_contact {
        Some(elapsed) => elapsed < election_min,
        None => false,
    }
}

/// Draw an election timeout uniformly from `[min, max)`.
///
/// Falls back to `min` when the window is empty.
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    if max_ms <= min_ms {
        return min;
    }
    Duration::from_millis(rng.gen_range(min_ms..max_ms))
}
