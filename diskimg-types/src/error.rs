// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors raised by size arithmetic and value parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("{bytes} bytes is not a whole number of sectors")]
    UnrepresentableSize { bytes: u64 },

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for size operations
pub type Result<T> = std::result::Result<T, SizeError>;
