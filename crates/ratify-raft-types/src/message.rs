//! Messages exchanged between replicas.
//!
//! All messages are one-way. A response is an ordinary message addressed back
//! to the sender, so transports only need a `send(target, message)` primitive
//! and may lose, duplicate or reorder anything.

use serde::Deserialize;
use serde::Serialize;

use crate::LogIndex;
use crate::NodeId;
use crate::Term;
use crate::log::EntryPayload;
use crate::log::LogEntry;
use crate::log::LogId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate: NodeId,
    pub last_log_id: Option<LogId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub from: NodeId,
    pub granted: bool,
}

/// Replicates entries following `prev_log_id`; an empty batch is a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader: NodeId,
    pub prev_log_id: Option<LogId>,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Option<LogIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub from: NodeId,
    pub success: bool,
    /// Highest index known to match the leader, on success.
    pub match_index: Option<LogIndex>,
    /// Index the leader should retry from, on rejection.
    pub conflict_index: LogIndex,
}

/// A proposal a follower hands to the replica it believes is leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedProposal {
    pub from: NodeId,
    pub payload: EntryPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    Vote(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    Forward(ForwardedProposal),
}

impl RaftMessage {
    /// Replica that sent the message.
    pub fn sender(&self) -> NodeId {
        match self {
            RaftMessage::Vote(req) => req.candidate,
            RaftMessage::VoteResponse(resp) => resp.from,
            RaftMessage::AppendEntries(req) => req.leader,
            RaftMessage::AppendEntriesResponse(resp) => resp.from,
            RaftMessage::Forward(fwd) => fwd.from,
        }
    }

    /// Term carried by the message; forwarded proposals carry none.
    pub fn term(&self) -> Option<Term> {
        match self {
            RaftMessage::Vote(req) => Some(req.term),
            RaftMessage::VoteResponse(resp) => Some(resp.term),
            RaftMessage::AppendEntries(req) => Some(req.term),
            RaftMessage::AppendEntriesResponse(resp) => Some(resp.term),
            RaftMessage::Forward(_) => None,
        }
    }

    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::Vote(_) => "vote",
            RaftMessage::VoteResponse(_) => "vote_response",
            RaftMessage::AppendEntries(_) => "append_entries",
            RaftMessage::AppendEntriesResponse(_) => "append_entries_response",
            RaftMessage::Forward(_) => "forward",
        }
    }
}
