// SPDX-License-Identifier: GPL-3.0-only

use diskimg_types::SizeError;
use thiserror::Error;

/// Error types for image construction
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource already acquired: {0}")]
    AlreadyAcquired(String),

    #[error("Resource already released: {0}")]
    AlreadyReleased(String),

    #[error("No partitions created on {device}")]
    NoPartitionsCreated { device: String },

    #[error("Expected {expected} partitions, found {found}")]
    PartitionCountMismatch { expected: usize, found: usize },

    #[error("Partition {index} has no name in a {table} table")]
    PartitionIndexOutOfRange { index: u32, table: String },

    #[error("Invalid partition listing: {0}")]
    InvalidPartitionListing(String),

    #[error("Duplicate volume name: {0}")]
    DuplicateVolume(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for image construction
pub type Result<T> = std::result::Result<T, SysError>;
