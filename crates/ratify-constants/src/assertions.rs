//! Compile-time checks on constant relationships.

use crate::raft::MAX_APPEND_ENTRIES;
use crate::raft::MAX_BATCH_SIZE;
use crate::raft::MAX_VOTERS;
use crate::timing::DEFAULT_ELECTION_TIMEOUT_MAX_MS;
use crate::timing::DEFAULT_ELECTION_TIMEOUT_MIN_MS;
use crate::timing::DEFAULT_HEARTBEAT_INTERVAL_MS;

// A full AppendEntries batch must fit in one storage transaction.
const _: () = assert!(MAX_APPEND_ENTRIES <= MAX_BATCH_SIZE);

const _: () = assert!(MAX_VOTERS > 0);

const _: () = assert!(DEFAULT_HEARTBEAT_INTERVAL_MS * 3 <= DEFAULT_ELECTION_TIMEOUT_MIN_MS);
const _: () = assert!(DEFAULT_ELECTION_TIMEOUT_MIN_MS < DEFAULT_ELECTION_TIMEOUT_MAX_MS);
