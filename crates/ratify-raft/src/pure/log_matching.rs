//! Follower-side log reconciliation.
//!
//! Log matching: if two logs hold an entry with the same index and term, they
//! agree on every entry up to that index. A follower therefore only accepts
//! entries after a `prev_log_id` it also holds, and only ever replaces the
//! suffix where the terms first diverge.

use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIndex;

/// What a follower must do with an accepted AppendEntries batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendPlan {
    /// Remove local entries from this index on before appending.
    pub truncate_from: Option<LogIndex>,
    /// Position in the incoming batch of the first entry to append.
    pub append_from: usize,
}

/// Reconcile an incoming batch with the local log.
///
/// `existing` holds the local log ids at the batch's indices, contiguous from
/// the first incoming index and as many as the local log has. Entries that
/// are already present with the same term are skipped; the first term
/// mismatch truncates the local suffix.
///
/// # Example
///
/// ```rust
/// use ratify_raft::pure::plan_append;
/// use ratify_raft_types::EntryPayload;
/// use ratify_raft_types::LogEntry;
/// use ratify_raft_types::LogId;
///
/// let incoming = vec![
///     LogEntry::new(LogId::new(1, 4), EntryPayload::Blank),
///     LogEntry::new(LogId::new(2, 5), EntryPayload::Blank),
/// ];
/// let plan = plan_append(&[LogId::new(1, 4), LogId::new(1, 5)], &incoming);
/// assert_eq!(plan.truncate_from, Some(5));
/// assert_eq!(plan.append_from, 1);
/// ```
pub fn plan_append(existing: &[LogId], incoming: &[LogEntry]) -> AppendPlan {
    for (position, entry) in incoming.iter().enumerate() {
        match existing.get(position) {
            Some(local) if local.term == entry.log_id.term => continue,
            Some(_) => {
                return AppendPlan {
                    truncate_from: Some(entry.log_id.index),
                    append_from: position,
                };
            }
            None => {
                return AppendPlan {
                    truncate_from: None,
                    append_from: position,
                };
            }
        }
    }
    AppendPlan {
        truncate_from: None,
        append_from: incoming.len(),
    }
}

/// New follower commit index after a successful AppendEntries.
///
/// The follower may only commit what it knows matches the leader:
/// `min(leader_commit, last_matched)`. The commit index never moves back.
pub fn follower_commit(
    current: Option<LogIndex>,
    leader_commit: Option<LogIndex>,
    last_matched: Option<LogIndex>,
) -> Option<LogIndex> {
    let candidate = match (leader_commit, last_matched) {
        (Some(leader), Some(matched)) => Some(leader.min(matched)),
        _ => None,
    };
    current.max(candidate)
}

/// Index the leader should retry from after a rejected `prev_index`.
///
/// A follower missing `prev_index` points the leader at its own log end. On a
/// term mismatch it points at `prev_index` itself, but never below its first
/// uncommitted index: committed entries always match the leader.
pub fn conflict_hint(prev_index: LogIndex, local_next: LogIndex, commit_next: LogIndex) -> LogIndex {
    if prev_index >= local_next {
        local_next
    } else {
        prev_index.max(commit_next)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use ratify_raft_types::EntryPayload;

    use super::*;

    fn batch(first: u64, terms: &[u64]) -> Vec<LogEntry> {
        terms
            .iter()
            .enumerate()
            .map(|(i, &term)| LogEntry::new(LogId::new(term, first + i as u64), EntryPayload::Blank))
            .collect()
    }

    fn ids(first: u64, terms: &[u64]) -> Vec<LogId> {
        batch(first, terms).into_iter().map(|e| e.log_id).collect()
    }

    // ========================================================================
    // plan_append tests
    // ========================================================================

    #[test]
    fn test_plan_append_to_empty_suffix() {
        let plan = plan_append(&[], &batch(3, &[1, 1]));
        assert_eq!(plan, AppendPlan {
            truncate_from: None,
            append_from: 0
        });
    }

    #[test]
    fn test_plan_duplicate_batch_is_noop() {
        let plan = plan_append(&ids(3, &[1, 2]), &batch(3, &[1, 2]));
        assert_eq!(plan, AppendPlan {
            truncate_from: None,
            append_from: 2
        });
    }

    #[test]
    fn test_plan_partial_overlap() {
        let plan = plan_append(&ids(3, &[1]), &batch(3, &[1, 1, 1]));
        assert_eq!(plan, AppendPlan {
            truncate_from: None,
            append_from: 1
        });
    }

    #[test]
    fn test_plan_conflict_truncates() {
        let plan = plan_append(&ids(3, &[1, 1, 1]), &batch(3, &[1, 2]));
        assert_eq!(plan, AppendPlan {
            truncate_from: Some(4),
            append_from: 1
        });
    }

    #[test]
    fn test_plan_stale_shorter_batch_keeps_longer_log() {
        // A delayed heartbeat carrying a prefix must not cut the log short.
        let plan = plan_append(&ids(3, &[2, 2, 2]), &batch(3, &[2]));
        assert_eq!(plan.truncate_from, None);
        assert_eq!(plan.append_from, 1);
    }

    // ========================================================================
    // follower_commit tests
    // ========================================================================

    #[test]
    fn test_follower_commit_bounded_by_match() {
        assert_eq!(follower_commit(None, Some(10), Some(4)), Some(4));
        assert_eq!(follower_commit(None, Some(3), Some(4)), Some(3));
    }

    #[test]
    fn test_follower_commit_never_regresses() {
        assert_eq!(follower_commit(Some(8), Some(3), Some(4)), Some(8));
        assert_eq!(follower_commit(Some(8), None, Some(4)), Some(8));
        assert_eq!(follower_commit(None, Some(3), None), None);
    }

    // ========================================================================
    // conflict_hint tests
    // ========================================================================

    #[test]
    fn test_conflict_hint_missing_entry() {
        assert_eq!(conflict_hint(10, 4, 2), 4);
    }

    #[test]
    fn test_conflict_hint_term_mismatch() {
        assert_eq!(conflict_hint(3, 10, 2), 3);
        assert_eq!(conflict_hint(3, 10, 6), 6);
    }

    proptest! {
        #[test]
        fn prop_plan_never_truncates_matching_prefix(
            local in prop::collection::vec(1u64..4, 0..8),
            incoming in prop::collection::vec(1u64..4, 0..8),
        ) {
            let existing = ids(0, &local);
            let entries = batch(0, &incoming);
            let plan = plan_append(&existing, &entries);
            prop_assert!(plan.append_from <= entries.len());
            // Everything before the append point agrees with the local log.
            for i in 0..plan.append_from {
                prop_assert_eq!(existing[i].term, entries[i].log_id.term);
            }
            if let Some(cut) = plan.truncate_from {
                prop_assert_eq!(cut, plan.append_from as u64);
                prop_assert_ne!(existing[plan.append_from].term, entries[plan.append_from].log_id.term);
            }
        }
    }
}
