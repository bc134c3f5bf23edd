//! Storage errors.

use std::path::PathBuf;

use snafu::Snafu;

/// Errors from a [`LogStore`](super::LogStore).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Failed to open the redb database file.
    #[snafu(display("failed to open redb database at {}: {source}", path.display()))]
    OpenDatabase {
        path: PathBuf,
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    #[snafu(display("failed to begin write transaction: {source}"))]
    BeginWrite {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to begin read transaction: {source}"))]
    BeginRead {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to open table: {source}"))]
    OpenTable {
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },

    #[snafu(display("failed to insert into table: {source}"))]
    Insert {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to get from table: {source}"))]
    Get {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to remove from table: {source}"))]
    Remove {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to iterate table range: {source}"))]
    Range {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to serialize data: {source}"))]
    Serialize {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    #[snafu(display("failed to deserialize data: {source}"))]
    Deserialize {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory { path: PathBuf, source: std::io::Error },

    /// A stored entry does not hash to the value recorded for it.
    ///
    /// Indicates disk corruption or tampering. The replica must not start.
    #[snafu(display("chain integrity violation at index {index}: expected {expected}, found {found}"))]
    ChainIntegrityViolation { index: u64, expected: String, found: String },

    #[snafu(display("chain hash missing at index {index}"))]
    ChainHashMissing { index: u64 },

    /// Appended entries must extend the log contiguously.
    #[snafu(display("non-contiguous append: expected index {expected}, got {got}"))]
    NonContiguousAppend { expected: u64, got: u64 },

    #[snafu(display("database was written with integrity version {found}, this build supports {supported}"))]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The persisted commit index points past the end of the log.
    #[snafu(display("commit index {committed} is beyond the last log index {last:?}"))]
    CommitBeyondLog { committed: u64, last: Option<u64> },
}

impl StorageError {
    /// True when the persisted state itself is damaged, as opposed to an
    /// I/O failure that may succeed on retry.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::ChainIntegrityViolation { .. }
                | StorageError::ChainHashMissing { .. }
                | StorageError::Deserialize { .. }
                | StorageError::UnsupportedVersion { .. }
                | StorageError::CommitBeyondLog { .. }
        )
    }
}
