//! Majority math over a voter set.

use std::collections::BTreeSet;

use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;

/// Calculate the quorum size for a cluster.
///
/// Quorum is the minimum number of nodes required for consensus,
/// calculated as (voters / 2) + 1 (majority).
///
/// # Example
///
/// ```rust
/// use ratify_raft::pure::calculate_quorum_size;
///
/// assert_eq!(calculate_quorum_size(1), 1);
/// assert_eq!(calculate_quorum_size(2), 2);
/// assert_eq!(calculate_quorum_size(3), 2);
/// assert_eq!(calculate_quorum_size(4), 3);
/// assert_eq!(calculate_quorum_size(5), 3);
/// ```
#[inline]
pub const fn calculate_quorum_size(voter_count: usize) -> usize {
    (voter_count / 2) + 1
}

/// Returns true if the acknowledging nodes include a majority of `voters`.
///
/// Acknowledgements from nodes outside `voters` do not count. An empty voter
/// set never has a majority.
pub fn has_majority(voters: &BTreeSet<NodeId>, acks: &BTreeSet<NodeId>) -> bool {
    if voters.is_empty() {
        return false;
    }
    let granted = voters.intersection(acks).count();
    granted >= calculate_quorum_size(voters.len())
}

/// Highest index replicated on a majority of `voters`.
///
/// `match_of` reports the highest index known to be stored on each voter.
/// Returns `None` when no index is on a majority yet.
///
/// # Tiger Style
///
/// - Allocation bounded by the voter count (at most `MAX_VOTERS`)
pub fn majority_match_index(voters: &BTreeSet<NodeId>, match_of: impl Fn(NodeId) -> Option<LogIndex>) -> Option<LogIndex> {
    if voters.is_empty() {
        return None;
    }
    let mut matched: Vec<Option<LogIndex>> = voters.iter().map(|&voter| match_of(voter)).collect();
    // Descending; `None` sorts below every index.
    matched.sort_unstable_by(|a, b| b.cmp(a));
    matched[calculate_quorum_size(voters.len()) - 1]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    fn set(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    // ========================================================================
    // calculate_quorum_size tests
    // ========================================================================

    #[test]
    fn test_quorum_odd_clusters() {
        assert_eq!(calculate_quorum_size(1), 1);
        assert_eq!(calculate_quorum_size(3), 2);
        assert_eq!(calculate_quorum_size(5), 3);
        assert_eq!(calculate_quorum_size(7), 4);
    }

    #[test]
    fn test_quorum_even_clusters() {
        assert_eq!(calculate_quorum_size(2), 2);
        assert_eq!(calculate_quorum_size(4), 3);
        assert_eq!(calculate_quorum_size(6), 4);
    }

    // ========================================================================
    // has_majority tests
    // ========================================================================

    #[test]
    fn test_majority_of_three() {
        assert!(has_majority(&set(&[1, 2, 3]), &set(&[1, 3])));
        assert!(!has_majority(&set(&[1, 2, 3]), &set(&[2])));
    }

    #[test]
    fn test_outsiders_do_not_count() {
        assert!(!has_majority(&set(&[1, 2, 3]), &set(&[1, 4, 5])));
    }

    #[test]
    fn test_empty_voters_never_majority() {
        assert!(!has_majority(&set(&[]), &set(&[1])));
    }

    // ========================================================================
    // majority_match_index tests
    // ========================================================================

    #[test]
    fn test_majority_match_three_nodes() {
        let matches: BTreeMap<u64, Option<u64>> = [(1, Some(10)), (2, Some(7)), (3, None)].into_iter().collect();
        let result = majority_match_index(&set(&[1, 2, 3]), |id| matches[&id]);
        assert_eq!(result, Some(7));
    }

    #[test]
    fn test_majority_match_nothing_replicated() {
        let result = majority_match_index(&set(&[1, 2, 3]), |id| if id == 1 { Some(4) } else { None });
        assert_eq!(result, None);
    }

    #[test]
    fn test_majority_match_single_node() {
        assert_eq!(majority_match_index(&set(&[9]), |_| Some(3)), Some(3));
    }

    #[test]
    fn test_majority_match_even_cluster_needs_three_of_four() {
        let matches: BTreeMap<u64, Option<u64>> =
            [(1, Some(9)), (2, Some(9)), (3, Some(2)), (4, Some(1))].into_iter().collect();
        assert_eq!(majority_match_index(&set(&[1, 2, 3, 4]), |id| matches[&id]), Some(2));
    }

    proptest! {
        #[test]
        fn prop_majority_index_is_on_a_majority(
            matches in prop::collection::vec(prop::option::of(0u64..50), 1..9)
        ) {
            let voters: BTreeSet<u64> = (0..matches.len() as u64).collect();
            let result = majority_match_index(&voters, |id| matches[id as usize]);
            if let Some(index) = result {
                let holders = matches.iter().filter(|m| m.is_some_and(|m| m >= index)).count();
                prop_assert!(holders >= calculate_quorum_size(voters.len()));
            }
            // Nothing higher is on a majority.
            let higher = result.map_or(0, |i| i + 1);
            let holders_higher = matches.iter().filter(|m| m.is_some_and(|m| m >= higher)).count();
            prop_assert!(holders_higher < calculate_quorum_size(voters.len()));
        }
    }
}
