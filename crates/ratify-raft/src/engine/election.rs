//! Elections, votes and leader liveness.

use std::collections::BTreeSet;

use ratify_raft_types::EntryPayload;
use ratify_raft_types::LogIdOptionExt;
use ratify_raft_types::NodeId;
use ratify_raft_types::RaftMessage;
use ratify_raft_types::Term;
use ratify_raft_types::VoteRequest;
use ratify_raft_types::VoteResponse;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Progress;
use super::RaftCore;
use super::Role;
use crate::error::ReplicationError;
use crate::network::RaftTransport;
use crate::pure::can_grant_vote;
use crate::pure::has_majority;
use crate::pure::leader_is_fresh;
use crate::storage::LogStore;

impl<S: LogStore, T: RaftTransport> RaftCore<S, T> {
    /// Voters other than this replica.
    pub(super) fn peers(&self) -> Vec<NodeId> {
        self.cluster.voters.iter().copied().filter(|&voter| voter != self.id).collect()
    }

    pub(super) async fn start_election(&mut self) -> Result<(), ReplicationError> {
        self.reset_election_deadline();
        if !self.cluster.contains(self.id) {
            debug!(config = %self.cluster, "not a voter, not campaigning");
            return Ok(());
        }

        self.hard.current_term += 1;
        self.hard.voted_for = Some(self.id);
        self.save_hard_state()?;
        self.leader_id = None;
        self.role = Role::Candidate {
            votes: BTreeSet::from([self.id]),
        };
        info!(term = self.hard.current_term, last_log = ?self.last_log_id, "starting election");

        if self.has_vote_majority() {
            return self.become_leader().await;
        }

        let request = VoteRequest {
            term: self.hard.current_term,
            candidate: self.id,
            last_log_id: self.last_log_id,
        };
        let messages = self.peers().into_iter().map(|peer| (peer, RaftMessage::Vote(request.clone()))).collect();
        self.send_all(messages).await;
        Ok(())
    }

    pub(super) async fn handle_vote_request(&mut self, request: VoteRequest) -> Result<(), ReplicationError> {
        if request.term > self.hard.current_term {
            let min = self.config.election_timeout_min();
            if self.role.is_leader() || leader_is_fresh(self.since_leader_contact(), min) {
                debug!(
                    candidate = request.candidate,
                    term = request.term,
                    "ignoring vote request while a leader is active"
                );
                return Ok(());
            }
            self.become_follower(request.term, None)?;
        }

        let granted = request.term == self.hard.current_term
            && can_grant_vote(self.hard.voted_for, request.candidate, request.last_log_id, self.last_log_id);
        if granted {
            self.hard.voted_for = Some(request.candidate);
            self.save_hard_state()?;
            self.reset_election_deadline();
            debug!(candidate = request.candidate, term = request.term, "vote granted");
        }

        let response = VoteResponse {
            term: self.hard.current_term,
            from: self.id,
            granted,
        };
        self.send(request.candidate, RaftMessage::VoteResponse(response)).await;
        Ok(())
    }

    pub(super) async fn handle_vote_response(&mut self, response: VoteResponse) -> Result<(), ReplicationError> {
        if response.term > self.hard.current_term {
            return self.become_follower(response.term, None);
        }
        if response.term < self.hard.current_term || !response.granted {
            return Ok(());
        }
        match &mut self.role {
            Role::Candidate { votes } => {
                votes.insert(response.from);
            }
            _ => return Ok(()),
        }
        if self.has_vote_majority() {
            self.become_leader().await?;
        }
        Ok(())
    }

    fn has_vote_majority(&self) -> bool {
        match &self.role {
            Role::Candidate { votes } => has_majority(&self.cluster.voters, votes),
            _ => false,
        }
    }

    async fn become_leader(&mut self) -> Result<(), ReplicationError> {
        let next = self.last_log_id.next_index();
        let progress = self.peers().into_iter().map(|peer| (peer, Progress::new(next))).collect();
        self.role = Role::Leader {
            progress,
            since: Instant::now(),
        };
        self.leader_id = Some(self.id);
        info!(term = self.hard.current_term, config = %self.cluster, "became leader");

        // Entries from earlier terms only commit behind one from this term.
        self.append_and_replicate(vec![EntryPayload::Blank]).await
    }

    /// Adopt `term` (if newer) and follow `leader`.
    pub(super) fn become_follower(&mut self, term: Term, leader: Option<NodeId>) -> Result<(), ReplicationError> {
        if term > self.hard.current_term {
            self.hard.current_term = term;
            self.hard.voted_for = None;
            self.save_hard_state()?;
        }
        if self.role.is_leader() {
            info!(term, "stepping down");
        }
        if !matches!(self.role, Role::Follower) {
            self.role = Role::Follower;
            self.reset_election_deadline();
        }
        self.leader_id = leader;
        Ok(())
    }

    /// Leader liveness check, run on every heartbeat.
    ///
    /// A leader that has not heard from a majority within the maximum
    /// election timeout steps down, so a partitioned leader stops reporting
    /// itself as leader. Returns false if it stepped down.
    pub(super) fn check_quorum(&mut self, now: Instant) -> bool {
        let window = self.config.election_timeout_max();
        let Role::Leader { progress, since } = &self.role else {
            return true;
        };
        if now.duration_since(*since) < window {
            return true;
        }
        let mut acks = BTreeSet::from([self.id]);
        for (peer, state) in progress {
            if state.last_ack.is_some_and(|at| now.duration_since(at) < window) {
                acks.insert(*peer);
            }
        }
        if has_majority(&self.cluster.voters, &acks) {
            return true;
        }
        warn!(term = self.hard.current_term, "lost contact with a majority, stepping down");
        self.role = Role::Follower;
        self.leader_id = None;
        self.reset_election_deadline();
        false
    }
}
