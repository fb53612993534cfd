// SPDX-License-Identifier: GPL-3.0-only

//! Partition table formats and committed partition extents

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SizeError;
use crate::size::ByteSize;

/// On-disk partition table format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTableType {
    /// DOS/MBR table; partitions carry a primary/logical kind
    Msdos,
    /// BSD disklabel; partitions are addressed by letter
    #[default]
    Disklabel,
}

impl PartitionTableType {
    /// Label name passed to `parted mklabel`
    pub fn parted_label(self) -> &'static str {
        match self {
            PartitionTableType::Msdos => "msdos",
            PartitionTableType::Disklabel => "bsd",
        }
    }

    /// Inverse of [`parted_label`](Self::parted_label), for reading back a committed table
    pub fn from_parted_label(label: &str) -> Option<Self> {
        match label {
            "msdos" => Some(PartitionTableType::Msdos),
            "bsd" => Some(PartitionTableType::Disklabel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionTableType::Msdos => "msdos",
            PartitionTableType::Disklabel => "disklabel",
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionTableType {
    type Err = SizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "msdos" | "mbr" | "dos" => Ok(PartitionTableType::Msdos),
            "disklabel" | "bsd" => Ok(PartitionTableType::Disklabel),
            other => Err(SizeError::Parse(format!(
                "unknown partition table type '{other}'"
            ))),
        }
    }
}

/// A partition as committed on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// On-device index, starting at 1
    pub index: u32,

    /// Device-mapper name the partition is exposed under when acquired
    pub name: String,

    /// Byte offset within the parent device
    pub offset: ByteSize,

    /// Byte length of the partition
    pub size: ByteSize,
}

impl PartitionInfo {
    /// First byte past the partition (exclusive end)
    pub fn end(&self) -> ByteSize {
        self.offset + self.size
    }
}
