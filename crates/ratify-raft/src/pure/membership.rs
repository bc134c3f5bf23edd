//! Membership change decisions.
//!
//! A change is proposed under the configuration epoch the proposer saw. When
//! the entry commits, every replica evaluates it against its own current
//! configuration, which is the same on every replica at that log position.
//! Only a change whose epoch still matches takes effect, so of two changes
//! raced under the same configuration only the first to commit applies:
//!
//! ```text
//! propose add(4)@0; propose add(5)@0; commit add(4) -> apply, epoch 1
//!                                     commit add(5) -> stale (0 != 1), ignored
//! ```
//!
//! # Tiger Style
//!
//! - Bounded membership (`MAX_VOTERS`)
//! - A configuration never becomes empty
//! - Epoch advances with saturating arithmetic
//! - Only committed changes advance the epoch; local changes count separately

use ratify_constants::MAX_VOTERS;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::ConfigChange;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::StampedChange;

/// Outcome of evaluating a membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// The change takes effect; carries the next configuration.
    Apply(ClusterConfig),
    /// Proposed under an older configuration; ignored.
    Stale { proposed_under: u64, epoch: u64 },
    /// Adds a current voter or drops a non-voter; nothing to do.
    NoOp,
    /// Would grow the voter set past `MAX_VOTERS`.
    TooManyVoters,
    /// Would remove the last voter.
    WouldEmpty,
}

impl ChangeDecision {
    pub fn is_apply(&self) -> bool {
        matches!(self, ChangeDecision::Apply(_))
    }
}

/// Evaluate a committed change against the configuration in force when it
/// committed.
///
/// # Example
///
/// ```rust
/// use ratify_raft::pure::ChangeDecision;
/// use ratify_raft::pure::evaluate_change;
/// use ratify_raft_types::ClusterConfig;
/// use ratify_raft_types::ConfigChange;
/// use ratify_raft_types::StampedChange;
///
/// let current = ClusterConfig::bootstrap([1, 2, 3]);
/// let first = StampedChange::new(ConfigChange::AddReplica(4), 0);
/// let ChangeDecision::Apply(next) = evaluate_change(&current, &first) else {
///     panic!("first change applies");
/// };
/// assert_eq!(next.epoch, 1);
///
/// let raced = StampedChange::new(ConfigChange::AddReplica(5), 0);
/// assert!(!evaluate_change(&next, &raced).is_apply());
/// ```
pub fn evaluate_change(current: &ClusterConfig, stamped: &StampedChange) -> ChangeDecision {
    if stamped.proposed_under != current.epoch {
        return ChangeDecision::Stale {
            proposed_under: stamped.proposed_under,
            epoch: current.epoch,
        };
    }
    match change_voters(current, stamped.change) {
        ChangeDecision::Apply(mut next) => {
            next.epoch = current.epoch.saturating_add(1);
            ChangeDecision::Apply(next)
        }
        decision => decision,
    }
}

/// Apply a change without an epoch check.
///
/// Used for changes the embedding service applies locally in response to
/// committed log content it interprets itself. Advances `local_changes`,
/// never `epoch`.
pub fn apply_change(current: &ClusterConfig, change: ConfigChange) -> ChangeDecision {
    match change_voters(current, change) {
        ChangeDecision::Apply(mut next) => {
            next.local_changes = current.local_changes.saturating_add(1);
            ChangeDecision::Apply(next)
        }
        decision => decision,
    }
}

fn change_voters(current: &ClusterConfig, change: ConfigChange) -> ChangeDecision {
    let mut next = current.clone();
    match change {
        ConfigChange::AddReplica(node) => {
            if current.contains(node) {
                return ChangeDecision::NoOp;
            }
            if current.len() >= MAX_VOTERS as usize {
                return ChangeDecision::TooManyVoters;
            }
            next.voters.insert(node);
        }
        ConfigChange::DropReplica(node) => {
            if !current.contains(node) {
                return ChangeDecision::NoOp;
            }
            if current.len() == 1 {
                return ChangeDecision::WouldEmpty;
            }
            next.voters.remove(&node);
        }
    }
    ChangeDecision::Apply(next)
}

/// Settle a committed change against the configuration in force when it
/// committed, returning the configuration it leaves behind and the decision.
///
/// A change stamped with the current epoch consumes that epoch even when it
/// leaves the voter set as it was. The epoch after any committed prefix of
/// the log therefore depends on that prefix alone, never on local changes a
/// replica applied along the way.
pub fn settle_change(current: &ClusterConfig, stamped: &StampedChange) -> (ClusterConfig, ChangeDecision) {
    let decision = evaluate_change(current, stamped);
    let next = match &decision {
        ChangeDecision::Apply(next) => next.clone(),
        ChangeDecision::Stale { .. } => current.clone(),
        ChangeDecision::NoOp | ChangeDecision::TooManyVoters | ChangeDecision::WouldEmpty => ClusterConfig {
            epoch: current.epoch.saturating_add(1),
            ..current.clone()
        },
    };
    (next, decision)
}

/// Result of [`replay_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    pub config: ClusterConfig,
    /// Index of the last change that altered the voter set.
    pub last_applied: Option<LogIndex>,
}

/// Fold committed changes, in log order, over a starting configuration.
///
/// Replicas replaying the same committed changes from the same starting
/// point always reach the same configuration.
pub fn replay_changes<'a>(
    start: ClusterConfig,
    changes: impl IntoIterator<Item = (LogIndex, &'a StampedChange)>,
) -> Replayed {
    let mut replayed = Replayed {
        config: start,
        last_applied: None,
    };
    for (index, stamped) in changes {
        let (next, decision) = settle_change(&replayed.config, stamped);
        if decision.is_apply() {
            replayed.last_applied = Some(index);
        }
        replayed.config = next;
    }
    replayed
}

/// Whether every voter has replicated through `applied_through`.
///
/// A leader only accepts a new membership change once the previous one has
/// applied and every voter of the resulting configuration holds the entry
/// that applied it. `match_of` reports each voter's highest stored index.
pub fn voters_caught_up(
    config: &ClusterConfig,
    applied_through: Option<LogIndex>,
    match_of: impl Fn(NodeId) -> Option<LogIndex>,
) -> bool {
    config.voters.iter().all(|&voter| match_of(voter) >= applied_through)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn add(node: u64, epoch: u64) -> StampedChange {
        StampedChange::new(ConfigChange::AddReplica(node), epoch)
    }

    fn drop_(node: u64, epoch: u64) -> StampedChange {
        StampedChange::new(ConfigChange::DropReplica(node), epoch)
    }

    fn indexed(changes: &[StampedChange]) -> impl Iterator<Item = (LogIndex, &StampedChange)> {
        changes.iter().enumerate().map(|(index, stamped)| (index as LogIndex, stamped))
    }

    // ========================================================================
    // evaluate_change tests
    // ========================================================================

    #[test]
    fn test_add_applies_and_bumps_epoch() {
        let current = ClusterConfig::bootstrap([1, 2, 3]);
        let decision = evaluate_change(&current, &add(4, 0));
        let ChangeDecision::Apply(next) = decision else {
            panic!("expected apply, got {decision:?}");
        };
        assert_eq!(next.epoch, 1);
        assert!(next.contains(4));
        assert_eq!(next.len(), 4);
    }

    #[test]
    fn test_stale_change_ignored() {
        let current = ClusterConfig {
            epoch: 2,
            local_changes: 0,
            voters: [1, 2, 3].into_iter().collect(),
        };
        assert_eq!(evaluate_change(&current, &add(4, 1)), ChangeDecision::Stale {
            proposed_under: 1,
            epoch: 2
        });
    }

    #[test]
    fn test_future_epoch_is_also_stale() {
        let current = ClusterConfig::bootstrap([1]);
        assert!(matches!(evaluate_change(&current, &add(2, 5)), ChangeDecision::Stale { .. }));
    }

    #[test]
    fn test_noop_changes() {
        let current = ClusterConfig::bootstrap([1, 2]);
        assert_eq!(evaluate_change(&current, &add(2, 0)), ChangeDecision::NoOp);
        assert_eq!(evaluate_change(&current, &drop_(9, 0)), ChangeDecision::NoOp);
    }

    #[test]
    fn test_cannot_drop_last_voter() {
        let current = ClusterConfig::bootstrap([1]);
        assert_eq!(evaluate_change(&current, &drop_(1, 0)), ChangeDecision::WouldEmpty);
    }

    #[test]
    fn test_voter_limit() {
        let current = ClusterConfig::bootstrap(0..MAX_VOTERS as u64);
        assert_eq!(apply_change(&current, ConfigChange::AddReplica(u64::MAX)), ChangeDecision::TooManyVoters);
    }

    #[test]
    fn test_drop_applies() {
        let current = ClusterConfig::bootstrap([1, 2, 3]);
        let ChangeDecision::Apply(next) = evaluate_change(&current, &drop_(2, 0)) else {
            panic!("drop should apply");
        };
        assert!(!next.contains(2));
        assert_eq!(next.epoch, 1);
    }

    #[test]
    fn test_local_change_leaves_epoch_alone() {
        let current = ClusterConfig::bootstrap([1, 2, 3]);
        let ChangeDecision::Apply(next) = apply_change(&current, ConfigChange::AddReplica(7)) else {
            panic!("local add should apply");
        };
        assert_eq!(next.epoch, 0);
        assert_eq!(next.local_changes, 1);
        assert!(evaluate_change(&next, &add(4, 0)).is_apply());
    }

    #[test]
    fn test_local_and_committed_changes_commute() {
        let start = ClusterConfig::bootstrap([1, 2, 3]);
        let local = ConfigChange::AddReplica(7);
        let committed = add(4, 0);

        // Replica A handles the local change before the entry commits.
        let ChangeDecision::Apply(a) = apply_change(&start, local) else {
            panic!("local add should apply");
        };
        let ChangeDecision::Apply(a) = evaluate_change(&a, &committed) else {
            panic!("committed add should apply after a local change");
        };

        // Replica B handles it after.
        let ChangeDecision::Apply(b) = evaluate_change(&start, &committed) else {
            panic!("committed add should apply");
        };
        let ChangeDecision::Apply(b) = apply_change(&b, local) else {
            panic!("local add should apply");
        };

        assert_eq!(a, b);
        assert_eq!(a.epoch, 1);
        assert_eq!(a.voters, [1, 2, 3, 4, 7].into_iter().collect());
    }

    // ========================================================================
    // replay tests
    // ========================================================================

    #[test]
    fn test_sequential_changes_both_apply() {
        // propose 1; commit 1; apply; propose 2 under the new epoch; commit 2
        let start = ClusterConfig::bootstrap([1, 2, 3]);
        let replayed = replay_changes(start, indexed(&[add(4, 0), add(5, 1)]));
        assert_eq!(replayed.last_applied, Some(1));
        let end = replayed.config;
        assert_eq!(end.epoch, 2);
        assert!(end.contains(4) && end.contains(5));
    }

    #[test]
    fn test_pipelined_changes_only_first_applies() {
        // propose 1; propose 2; commit 1; apply; commit 2 -> ignored
        let start = ClusterConfig::bootstrap([1, 2, 3]);
        let end = replay_changes(start, indexed(&[add(4, 0), drop_(1, 0)])).config;
        assert_eq!(end.epoch, 1);
        assert!(end.contains(4));
        assert!(end.contains(1));
    }

    #[test]
    fn test_noop_at_current_epoch_consumes_it() {
        let start = ClusterConfig::bootstrap([1, 2]);
        let (next, decision) = settle_change(&start, &add(2, 0));
        assert_eq!(decision, ChangeDecision::NoOp);
        assert_eq!(next.epoch, 1);
        assert_eq!(next.voters, start.voters);

        let (after, decision) = settle_change(&next, &add(3, 0));
        assert!(matches!(decision, ChangeDecision::Stale { .. }));
        assert_eq!(after, next);
    }

    #[test]
    fn test_voters_caught_up() {
        let config = ClusterConfig::bootstrap([1, 2, 3]);
        assert!(voters_caught_up(&config, None, |_| None));
        assert!(voters_caught_up(&config, Some(4), |_| Some(4)));
        assert!(!voters_caught_up(&config, Some(4), |id| if id == 3 { Some(2) } else { Some(9) }));
        assert!(!voters_caught_up(&config, Some(0), |id| if id == 2 { None } else { Some(0) }));
    }

    fn arb_change() -> impl Strategy<Value = StampedChange> {
        (any::<bool>(), 1u64..8, 0u64..3).prop_map(|(is_add, node, epoch)| {
            let change = if is_add {
                ConfigChange::AddReplica(node)
            } else {
                ConfigChange::DropReplica(node)
            };
            StampedChange::new(change, epoch)
        })
    }

    fn arb_local() -> impl Strategy<Value = ConfigChange> {
        (any::<bool>(), 1u64..8).prop_map(|(is_add, node)| {
            if is_add {
                ConfigChange::AddReplica(node)
            } else {
                ConfigChange::DropReplica(node)
            }
        })
    }

    proptest! {
        /// Where a local change lands relative to committed changes never
        /// alters which committed changes apply.
        #[test]
        fn prop_local_changes_never_gate_committed_ones(
            committed in prop::collection::vec(arb_change(), 0..10),
            local in arb_local(),
            at in 0usize..10,
        ) {
            let start = ClusterConfig::bootstrap([1, 2, 3]);
            let at = at.min(committed.len());

            let mut with_local = start.clone();
            let mut epochs = Vec::new();
            for (position, stamped) in committed.iter().enumerate() {
                if position == at {
                    if let ChangeDecision::Apply(next) = apply_change(&with_local, local) {
                        with_local = next;
                    }
                }
                with_local = settle_change(&with_local, stamped).0;
                epochs.push(with_local.epoch);
            }

            let mut without = start;
            let mut expected = Vec::new();
            for stamped in &committed {
                without = settle_change(&without, stamped).0;
                expected.push(without.epoch);
            }
            prop_assert_eq!(epochs, expected);
        }

        /// Two changes proposed under the same configuration: whichever
        /// commits first may apply, the other never does.
        #[test]
        fn prop_competing_changes_apply_at_most_once(
            first in arb_change(),
            second in arb_change(),
        ) {
            let start = ClusterConfig::bootstrap([1, 2, 3]);
            let first = StampedChange::new(first.change, start.epoch);
            let second = StampedChange::new(second.change, start.epoch);

            let after_first = match evaluate_change(&start, &first) {
                ChangeDecision::Apply(next) => next,
                _ => start.clone(),
            };
            let second_decision = evaluate_change(&after_first, &second);
            if after_first.epoch != start.epoch {
                let is_stale = matches!(second_decision, ChangeDecision::Stale { .. });
                prop_assert!(is_stale);
            }
            // A change only ever applies when its epoch matches.
            if let ChangeDecision::Apply(next) = second_decision {
                prop_assert_eq!(after_first.epoch, start.epoch);
                prop_assert_eq!(next.epoch, start.epoch + 1);
            }
        }

        /// Every replica replaying the same log reaches the same configuration
        /// and never an empty one.
        #[test]
        fn prop_replay_is_deterministic(changes in prop::collection::vec(arb_change(), 0..20)) {
            let start = ClusterConfig::bootstrap([1, 2, 3]);
            let a = replay_changes(start.clone(), indexed(&changes));
            let b = replay_changes(start, indexed(&changes));
            prop_assert!(!a.config.is_empty());
            prop_assert_eq!(a, b);
        }
    }
}
