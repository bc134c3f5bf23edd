//! Default Raft timer values, in milliseconds.
//!
//! These match the `Balanced` timing profile. All defaults keep
//! `heartbeat * 3 <= election_min` so a single lost heartbeat never triggers an
//! election.

/// Default leader heartbeat interval (100ms).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Default lower bound of the randomized election timeout (500ms).
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 500;

/// Default upper bound (exclusive) of the randomized election timeout (1000ms).
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 1000;
