//! Replica configuration.
//!
//! A [`RaftConfig`] is plain serde data. It can be built in code, parsed from
//! TOML, and tuned with a [`RaftTimingProfile`]. [`RaftConfig::validate`] runs
//! before a replica starts.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use ratify_constants::MAX_APPEND_ENTRIES;
use ratify_constants::MAX_VOTERS;
use ratify_constants::PROPOSAL_QUEUE_CAPACITY;
use ratify_constants::timing::DEFAULT_ELECTION_TIMEOUT_MAX_MS;
use ratify_constants::timing::DEFAULT_ELECTION_TIMEOUT_MIN_MS;
use ratify_constants::timing::DEFAULT_HEARTBEAT_INTERVAL_MS;
use ratify_raft_types::NodeId;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::storage::StorageBackend;

/// Preset timer values for common deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RaftTimingProfile {
    /// Cross-region or high-latency networks.
    ///
    /// - heartbeat: 500ms
    /// - election_min: 1500ms
    /// - election_max: 3000ms
    Conservative,

    /// LAN or single-datacenter clusters.
    ///
    /// - heartbeat: 100ms
    /// - election_min: 500ms
    /// - election_max: 1000ms
    #[default]
    Balanced,

    /// Co-located replicas and tests.
    ///
    /// - heartbeat: 30ms
    /// - election_min: 100ms
    /// - election_max: 200ms
    Fast,
}

impl std::str::FromStr for RaftTimingProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "fast" => Ok(Self::Fast),
            _ => Err(format!("invalid raft timing profile: '{}' (expected: conservative, balanced, fast)", s)),
        }
    }
}

impl RaftTimingProfile {
    pub fn heartbeat_interval_ms(&self) -> u64 {
        match self {
            Self::Conservative => 500,
            Self::Balanced => DEFAULT_HEARTBEAT_INTERVAL_MS,
            Self::Fast => 30,
        }
    }

    pub fn election_timeout_min_ms(&self) -> u64 {
        match self {
            Self::Conservative => 1500,
            Self::Balanced => DEFAULT_ELECTION_TIMEOUT_MIN_MS,
            Self::Fast => 100,
        }
    }

    pub fn election_timeout_max_ms(&self) -> u64 {
        match self {
            Self::Conservative => 3000,
            Self::Balanced => DEFAULT_ELECTION_TIMEOUT_MAX_MS,
            Self::Fast => 200,
        }
    }

    /// Overwrite the timer fields of `config` with this profile's values.
    pub fn apply_to(&self, config: &mut RaftConfig) {
        config.heartbeat_interval_ms = self.heartbeat_interval_ms();
        config.election_timeout_min_ms = self.election_timeout_min_ms();
        config.election_timeout_max_ms = self.election_timeout_max_ms();
    }
}

/// Configuration for one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// This replica's identifier. Must be non-zero.
    pub node_id: NodeId,

    /// Voters every replica bootstraps from. All replicas of one log must
    /// agree on this list.
    pub voters: Vec<NodeId>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Lower bound of the randomized election timeout.
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    /// Upper bound (exclusive) of the randomized election timeout.
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    /// Entries per AppendEntries message.
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: u32,

    /// Proposals that may wait for the core loop before `propose` suspends.
    #[serde(default = "default_proposal_queue_capacity")]
    pub proposal_queue_capacity: u32,

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Directory for the redb database. Defaults to `./data/node-{node_id}`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl RaftConfig {
    /// Config with default timers and in-memory storage.
    pub fn new(node_id: NodeId, voters: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            node_id,
            voters: voters.into_iter().collect(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            max_append_entries: default_max_append_entries(),
            proposal_queue_capacity: default_proposal_queue_capacity(),
            storage_backend: StorageBackend::InMemory,
            data_dir: None,
        }
    }

    pub fn with_timing_profile(mut self, profile: RaftTimingProfile) -> Self {
        profile.apply_to(&mut self);
        self
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).context(ParseTomlSnafu)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == 0 {
            return Err(ConfigError::Validation {
                message: "node_id must be non-zero".into(),
            });
        }

        if self.voters.is_empty() {
            return Err(ConfigError::Validation {
                message: "voters must not be empty".into(),
            });
        }

        if self.voters.len() > MAX_VOTERS as usize {
            return Err(ConfigError::Validation {
                message: format!("at most {} voters are supported, got {}", MAX_VOTERS, self.voters.len()),
            });
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "heartbeat_interval_ms must be non-zero".into(),
            });
        }

        if self.heartbeat_interval_ms.saturating_mul(3) > self.election_timeout_min_ms {
            return Err(ConfigError::Validation {
                message: "election_timeout_min_ms must be at least three heartbeat intervals".into(),
            });
        }

        if self.election_timeout_max_ms <= self.election_timeout_min_ms {
            return Err(ConfigError::Validation {
                message: "election_timeout_max_ms must be greater than election_timeout_min_ms".into(),
            });
        }

        if self.max_append_entries == 0 || self.max_append_entries > MAX_APPEND_ENTRIES {
            return Err(ConfigError::Validation {
                message: format!("max_append_entries must be in 1..={}", MAX_APPEND_ENTRIES),
            });
        }

        if self.proposal_queue_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "proposal_queue_capacity must be non-zero".into(),
            });
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    /// Get the data directory, using the default if not specified.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from(format!("./data/node-{}", self.node_id)))
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_election_timeout_min_ms() -> u64 {
    DEFAULT_ELECTION_TIMEOUT_MIN_MS
}

fn default_election_timeout_max_ms() -> u64 {
    DEFAULT_ELECTION_TIMEOUT_MAX_MS
}

fn default_max_append_entries() -> u32 {
    MAX_APPEND_ENTRIES
}

fn default_proposal_queue_capacity() -> u32 {
    PROPOSAL_QUEUE_CAPACITY
}

/// Configuration loading and validation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config: {source}"))]
    ParseToml { source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
