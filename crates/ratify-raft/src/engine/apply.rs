//! Commit advancement and membership application.

use ratify_constants::MAX_BATCH_SIZE;
use ratify_raft_types::ClusterConfig;
use ratify_raft_types::EntryPayload;
use ratify_raft_types::LogIdOptionExt;
use ratify_raft_types::LogIndex;
use ratify_raft_types::StampedChange;
use ratify_raft_types::next_after;
use tracing::debug;
use tracing::info;

use super::LocalCommand;
use super::Progress;
use super::RaftCore;
use super::Role;
use crate::error::ReplicationError;
use crate::network::RaftTransport;
use crate::pure::ChangeDecision;
use crate::pure::apply_change;
use crate::pure::settle_change;
use crate::storage::LogStore;
use crate::storage::StoredMembership;

impl<S: LogStore, T: RaftTransport> RaftCore<S, T> {
    /// Move the commit index forward and publish it.
    ///
    /// Membership changes in the newly committed range are evaluated, in log
    /// order, before the new index becomes visible to readers.
    pub(super) fn advance_commit(&mut self, commit: Option<LogIndex>) -> Result<(), ReplicationError> {
        if commit <= self.committed {
            return Ok(());
        }
        let lo = next_after(self.committed);
        let hi = next_after(commit);
        self.store.save_committed(commit)?;
        self.committed = commit;
        self.apply_committed_changes(lo, hi)?;
        self.tx.commit.send_replace(commit);
        debug!(committed = ?commit, "commit advanced");
        Ok(())
    }

    fn apply_committed_changes(&mut self, lo: LogIndex, hi: LogIndex) -> Result<(), ReplicationError> {
        let mut saw_change = false;
        let mut cursor = lo;
        while cursor < hi {
            let batch = self.store.entries(cursor, hi.min(cursor.saturating_add(MAX_BATCH_SIZE as u64)))?;
            let Some(last) = batch.last().map(|entry| entry.index()) else {
                return Err(ReplicationError::MissingEntry { index: cursor });
            };
            cursor = last + 1;
            for entry in batch {
                if let EntryPayload::Reconfigure(stamped) = entry.payload {
                    saw_change = true;
                    self.apply_committed_change(entry.log_id.index, &stamped);
                }
            }
        }
        if saw_change {
            self.store.save_membership(&StoredMembership {
                config: self.cluster.clone(),
                applied_through: self.committed,
            })?;
        }
        Ok(())
    }

    fn apply_committed_change(&mut self, index: LogIndex, stamped: &StampedChange) {
        let (next, decision) = settle_change(&self.cluster, stamped);
        if decision.is_apply() {
            info!(index, change = %stamped.change, epoch = next.epoch, "membership change applied");
            self.last_change_index = Some(index);
        } else {
            info!(index, change = %stamped.change, ?decision, epoch = next.epoch, "membership change ignored");
        }
        if next != self.cluster {
            self.install_config(next);
        }
    }

    /// Membership change requested by the embedding service.
    pub(super) fn handle_command(&mut self, command: LocalCommand) -> Result<(), ReplicationError> {
        let decision = apply_change(&self.cluster, command.change);
        if let ChangeDecision::Apply(next) = &decision {
            info!(change = %command.change, epoch = next.epoch, "local membership change applied");
            self.install_config(next.clone());
            self.store.save_membership(&StoredMembership {
                config: self.cluster.clone(),
                applied_through: self.committed,
            })?;
            // A smaller voter set may already have a majority for more entries.
            self.advance_leader_commit()?;
        }
        // The caller may have stopped waiting.
        let _ = command.reply.send(decision);
        Ok(())
    }

    fn install_config(&mut self, next: ClusterConfig) {
        self.cluster = next;
        self.tx.config.send_replace(self.cluster.clone());

        let id = self.id;
        let log_end = self.last_log_id.next_index();
        let Role::Leader { progress, .. } = &mut self.role else {
            return;
        };
        progress.retain(|peer, _| self.cluster.contains(*peer));
        for &voter in &self.cluster.voters {
            if voter != id {
                progress.entry(voter).or_insert_with(|| Progress::new(log_end));
            }
        }
        if !self.cluster.contains(id) {
            info!(config = %self.cluster, "removed from configuration, stepping down");
            self.role = Role::Follower;
            self.leader_id = None;
            self.reset_election_deadline();
        }
    }
}
