//! Raft consensus constants.
//!
//! Covers replication batching, queue capacities, membership bounds and log
//! integrity verification.

// ============================================================================
// Replication Constants
// ============================================================================

/// Maximum number of entries carried by a single AppendEntries message (256).
///
/// Bounds message size while a lagging follower catches up. The leader keeps
/// sending further batches on each heartbeat or acknowledgement.
///
/// Used in:
/// - `core/replication.rs`: AppendEntries batch construction
pub const MAX_APPEND_ENTRIES: u32 = 256;

/// Maximum batch size for a single log append transaction (1000 entries).
///
/// Used in:
/// - `storage/redb_store.rs`: Pre-allocation of serialized entry buffers
pub const MAX_BATCH_SIZE: u32 = 1000;

/// Number of committed entries a commit stream cursor reads per storage
/// round trip (128).
///
/// Used in:
/// - `commit_stream.rs`: Cursor refill
pub const COMMIT_STREAM_BATCH_SIZE: u32 = 128;

// ============================================================================
// Queue Capacities
// ============================================================================

/// Capacity of the proposal queue in front of the core loop (1024).
///
/// `propose` suspends while the queue is full and gives up when its
/// cancellation token fires.
///
/// Used in:
/// - `node.rs`: Proposal channel construction
pub const PROPOSAL_QUEUE_CAPACITY: u32 = 1024;

/// Capacity of the inbound peer message queue (4096).
///
/// Messages arriving while the queue is full are dropped; Raft tolerates loss.
///
/// Used in:
/// - `node.rs`: Peer message channel construction
pub const RAFT_INBOX_CAPACITY: u32 = 4096;

/// Capacity of the local membership command queue (16).
///
/// Used in:
/// - `node.rs`: `add_replica` / `drop_replica` channel construction
pub const LOCAL_COMMAND_CAPACITY: u32 = 16;

// ============================================================================
// Membership Constants
// ============================================================================

/// Maximum number of voters in a cluster configuration (100 nodes).
///
/// Keeps majority computation and per-peer replication state bounded.
///
/// Used in:
/// - `membership.rs`: Change validation
/// - `config.rs`: Bootstrap voter validation
pub const MAX_VOTERS: u32 = 100;

// ============================================================================
// Integrity Constants
// ============================================================================

/// Number of entries verified per chain verification batch (1000).
///
/// Used in:
/// - `storage/redb_store.rs`: `verify_chain`
pub const CHAIN_VERIFY_BATCH_SIZE: u32 = 1000;

/// Integrity schema version stamped into new databases (1).
///
/// Used in:
/// - `storage/redb_store.rs`: Schema check on open
pub const INTEGRITY_VERSION: u32 = 1;
