//! Log replication: proposals, AppendEntries and commit advancement.

use ratify_raft_types::AppendEntriesRequest;
use ratify_raft_types::AppendEntriesResponse;
use ratify_raft_types::EntryPayload;
use ratify_raft_types::ForwardedProposal;
use ratify_raft_types::LogEntry;
use ratify_raft_types::LogId;
use ratify_raft_types::LogIdOptionExt;
use ratify_raft_types::LogIndex;
use ratify_raft_types::NodeId;
use ratify_raft_types::RaftMessage;
use ratify_raft_types::next_after;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::RaftCore;
use super::Role;
use crate::error::ReplicationError;
use crate::network::RaftTransport;
use crate::pure::conflict_hint;
use crate::pure::follower_commit;
use crate::pure::majority_match_index;
use crate::pure::plan_append;
use crate::pure::voters_caught_up;
use crate::storage::LogStore;

impl<S: LogStore, T: RaftTransport> RaftCore<S, T> {
    // ========================================================================
    // Leader side
    // ========================================================================

    /// Queue a locally proposed payload, batching whatever else is waiting.
    pub(super) async fn handle_proposal(&mut self, first: EntryPayload) -> Result<(), ReplicationError> {
        if !self.role.is_leader() {
            self.forward_proposal(first).await;
            return Ok(());
        }
        let limit = self.config.max_append_entries as usize;
        let mut batch = vec![first];
        while batch.len() < limit {
            match self.rx.proposals.try_recv() {
                Ok(payload) => batch.push(payload),
                Err(_) => break,
            }
        }
        self.append_and_replicate(batch).await
    }

    async fn forward_proposal(&self, payload: EntryPayload) {
        match self.leader_id {
            Some(leader) if leader != self.id => {
                let forwarded = ForwardedProposal { from: self.id, payload };
                self.send(leader, RaftMessage::Forward(forwarded)).await;
            }
            _ => debug!("dropping proposal: no known leader"),
        }
    }

    /// Append payloads at the current term and replicate them.
    pub(super) async fn append_and_replicate(&mut self, payloads: Vec<EntryPayload>) -> Result<(), ReplicationError> {
        let term = self.hard.current_term;
        let mut next = self.last_log_id.next_index();
        let mut entries = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if let EntryPayload::Reconfigure(stamped) = &payload {
                if !self.membership_settled() {
                    debug!(change = %stamped.change, "dropping membership change: previous change not yet replicated");
                    continue;
                }
            }
            entries.push(LogEntry::new(LogId::new(term, next), payload));
            next += 1;
        }
        if entries.is_empty() {
            return Ok(());
        }

        self.store.append(&entries)?;
        self.last_log_id = entries.last().map(|entry| entry.log_id);
        trace!(count = entries.len(), last_log = ?self.last_log_id, "appended");

        self.broadcast_append().await?;
        self.advance_leader_commit()
    }

    /// True once every voter holds the entry that applied the last change.
    fn membership_settled(&self) -> bool {
        let Role::Leader { progress, .. } = &self.role else {
            return false;
        };
        let own = self.last_log_id.index();
        voters_caught_up(&self.cluster, self.last_change_index, |voter| {
            if voter == self.id {
                own
            } else {
                progress.get(&voter).and_then(|state| state.matched)
            }
        })
    }

    /// Send every follower what it is missing, or a heartbeat.
    pub(super) async fn broadcast_append(&mut self) -> Result<(), ReplicationError> {
        let Role::Leader { progress, .. } = &self.role else {
            return Ok(());
        };
        let targets: Vec<(NodeId, LogIndex)> = progress.iter().map(|(peer, state)| (*peer, state.next)).collect();
        let mut messages = Vec::with_capacity(targets.len());
        for (peer, next) in targets {
            messages.push((peer, RaftMessage::AppendEntries(self.build_append(next)?)));
        }
        self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval();
        self.send_all(messages).await;
        Ok(())
    }

    async fn send_append_to(&mut self, peer: NodeId) -> Result<(), ReplicationError> {
        let next = match &self.role {
            Role::Leader { progress, .. } => match progress.get(&peer) {
                Some(state) => state.next,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let request = self.build_append(next)?;
        self.send(peer, RaftMessage::AppendEntries(request)).await;
        Ok(())
    }

    fn build_append(&self, next: LogIndex) -> Result<AppendEntriesRequest, ReplicationError> {
        let log_end = self.last_log_id.next_index();
        let next = next.min(log_end);
        let prev_log_id = match next.checked_sub(1) {
            None => None,
            Some(prev) => match self.store.entry(prev)? {
                Some(entry) => Some(entry.log_id),
                None => return Err(ReplicationError::MissingEntry { index: prev }),
            },
        };
        let entries = if next < log_end {
            let hi = next.saturating_add(self.config.max_append_entries as u64).min(log_end);
            self.store.entries(next, hi)?
        } else {
            Vec::new()
        };
        Ok(AppendEntriesRequest {
            term: self.hard.current_term,
            leader: self.id,
            prev_log_id,
            entries,
            leader_commit: self.committed,
        })
    }

    pub(super) async fn handle_append_response(&mut self, response: AppendEntriesResponse) -> Result<(), ReplicationError> {
        if response.term > self.hard.current_term {
            return self.become_follower(response.term, None);
        }
        if response.term < self.hard.current_term {
            return Ok(());
        }

        let now = Instant::now();
        let log_end = self.last_log_id.next_index();
        let send_more = {
            let Role::Leader { progress, .. } = &mut self.role else {
                return Ok(());
            };
            let Some(state) = progress.get_mut(&response.from) else {
                return Ok(());
            };
            state.last_ack = Some(now);
            if response.success {
                state.matched = state.matched.max(response.match_index);
                state.next = state.next.max(next_after(state.matched));
                state.next < log_end
            } else {
                state.next = response.conflict_index.max(next_after(state.matched)).min(log_end);
                trace!(peer = response.from, next = state.next, "append rejected, backing off");
                true
            }
        };

        if response.success {
            let before = self.committed;
            self.advance_leader_commit()?;
            if self.committed > before {
                // Followers learn the new commit index without waiting for a heartbeat.
                return self.broadcast_append().await;
            }
        }
        if send_more {
            self.send_append_to(response.from).await?;
        }
        Ok(())
    }

    /// Commit the highest index stored on a majority, if it is from this term.
    pub(super) fn advance_leader_commit(&mut self) -> Result<(), ReplicationError> {
        let Role::Leader { progress, .. } = &self.role else {
            return Ok(());
        };
        let own = self.last_log_id.index();
        let candidate = majority_match_index(&self.cluster.voters, |voter| {
            if voter == self.id {
                own
            } else {
                progress.get(&voter).and_then(|state| state.matched)
            }
        });
        let Some(index) = candidate else {
            return Ok(());
        };
        if Some(index) <= self.committed {
            return Ok(());
        }
        let term_at = self.store.entry(index)?.map(|entry| entry.log_id.term);
        if term_at != Some(self.hard.current_term) {
            return Ok(());
        }
        self.advance_commit(Some(index))
    }

    // ========================================================================
    // Follower side
    // ========================================================================

    pub(super) async fn handle_append_entries(&mut self, request: AppendEntriesRequest) -> Result<(), ReplicationError> {
        let leader = request.leader;
        if request.term < self.hard.current_term {
            let conflict_index = self.last_log_id.next_index();
            self.reply_append(leader, false, None, conflict_index).await;
            return Ok(());
        }
        if request.term > self.hard.current_term
            || !matches!(self.role, Role::Follower)
            || self.leader_id != Some(leader)
        {
            self.become_follower(request.term, Some(leader))?;
        }
        self.last_leader_contact = Some(Instant::now());
        self.reset_election_deadline();

        let local_next = self.last_log_id.next_index();
        if let Some(prev) = request.prev_log_id {
            let local = if prev.index < local_next {
                self.store.entry(prev.index)?.map(|entry| entry.log_id)
            } else {
                None
            };
            if local != Some(prev) {
                let hint = conflict_hint(prev.index, local_next, next_after(self.committed));
                trace!(prev = %prev, local = ?local, hint, "log mismatch");
                self.reply_append(leader, false, None, hint).await;
                return Ok(());
            }
        }

        if let Some(first) = request.entries.first().map(LogEntry::index) {
            let hi = first.saturating_add(request.entries.len() as u64);
            let existing: Vec<LogId> = self.store.entries(first, hi)?.into_iter().map(|entry| entry.log_id).collect();
            let plan = plan_append(&existing, &request.entries);
            if let Some(cut) = plan.truncate_from {
                if let Some(committed) = self.committed {
                    if cut <= committed {
                        return Err(ReplicationError::CommittedTruncation { index: cut, committed });
                    }
                }
                warn!(from = cut, leader, "truncating conflicting log suffix");
                self.store.truncate_from(cut)?;
            }
            let fresh = &request.entries[plan.append_from..];
            if !fresh.is_empty() {
                self.store.append(fresh)?;
                self.last_log_id = self.store.last_log_id()?;
            }
        }

        let last_matched = request.entries.last().map(LogEntry::index).or(request.prev_log_id.index());
        let commit = follower_commit(self.committed, request.leader_commit, last_matched);
        self.advance_commit(commit)?;

        self.reply_append(leader, true, last_matched, 0).await;
        Ok(())
    }

    async fn reply_append(&self, leader: NodeId, success: bool, match_index: Option<LogIndex>, conflict_index: LogIndex) {
        let response = AppendEntriesResponse {
            term: self.hard.current_term,
            from: self.id,
            success,
            match_index,
            conflict_index,
        };
        self.send(leader, RaftMessage::AppendEntriesResponse(response)).await;
    }
}
