//! Transport seam between replicas.
//!
//! The engine never opens connections itself. Outbound messages go through a
//! [`RaftTransport`] supplied by the embedding service. Inbound messages are
//! handed to the replica's [`RaftInbox`].
//!
//! Messages are one-way and Raft tolerates their loss, duplication and
//! reordering, so transports may drop freely instead of retrying.
//!
//! ```text
//! RaftLog (node 1)                          RaftLog (node 2)
//!    |  RaftTransport::send(2, msg)              ^
//!    v                                           |  RaftInbox::deliver(msg)
//! embedding service transport  ---- wire ---->  embedding service transport
//! ```

use async_trait::async_trait;
use ratify_raft_types::NodeId;
use ratify_raft_types::RaftMessage;
use snafu::Snafu;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("node {target} is unreachable"))]
    Unreachable { target: NodeId },

    /// The target's inbox is full; the message was dropped.
    #[snafu(display("inbox of node {target} is full"))]
    InboxFull { target: NodeId },

    #[snafu(display("message to node {target} dropped: {reason}"))]
    Dropped { target: NodeId, reason: String },
}

/// Outbound delivery of Raft messages.
///
/// `send` should hand the message off and return; it must not wait for the
/// remote replica to process it. Errors are logged by the engine and
/// otherwise ignored.
#[async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    async fn send(&self, target: NodeId, message: RaftMessage) -> Result<(), TransportError>;
}

/// Handle for delivering inbound messages to one replica.
///
/// Cheap to clone. Delivery never blocks: a full inbox drops the message.
#[derive(Debug, Clone)]
pub struct RaftInbox {
    node_id: NodeId,
    tx: mpsc::Sender<RaftMessage>,
}

impl RaftInbox {
    pub(crate) fn new(node_id: NodeId, tx: mpsc::Sender<RaftMessage>) -> Self {
        Self { node_id, tx }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn deliver(&self, message: RaftMessage) -> Result<(), TransportError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::InboxFull { target: self.node_id }),
            Err(TrySendError::Closed(_)) => Err(TransportError::Unreachable { target: self.node_id }),
        }
    }

    /// True once the replica behind this inbox has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
