//! Error types for the sqlsalvage-core library.
//!
//! Only a failing byte source is fatal to a scan. Degenerate chunks, empty
//! results and reached bounds are normal outcomes and are reflected in the
//! shape of the [`ScanReport`](crate::ScanReport) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sqlsalvage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all sqlsalvage operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The byte source failed mid-scan
    #[error("failed to read source at offset {offset}: {source}")]
    SourceRead {
        /// Absolute offset of the read that failed
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Scanner parameters are out of range
    #[error("invalid scanner configuration: {0}")]
    InvalidConfig(String),

    /// A detector pattern failed to compile
    #[error("invalid detector pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A scan was submitted while another one is still running
    #[error("a scan is already in progress on this scanner")]
    ScanInProgress,

    /// A background scan ended with an error event
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The scan worker exited without reporting an outcome
    #[error("scan worker terminated unexpectedly")]
    WorkerPanicked,

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new source read error
    pub fn source_read(offset: u64, source: std::io::Error) -> Self {
        Self::SourceRead { offset, source }
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if a caller may simply start a new scan after this error.
    ///
    /// Read failures and a busy scanner are transient; configuration and
    /// pattern errors will fail again with the same input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceRead { .. } | Self::FileRead { .. } | Self::ScanInProgress
        )
    }
}
