// SPDX-License-Identifier: GPL-3.0-only

//! Value types shared by the diskimg crates
//!
//! Nothing in here touches the host. The types describe *what* to build:
//!
//! - [`ByteSize`] → byte counts with sector conversion and alignment
//! - [`RawVolume`] / [`NamedVolume`] → a source directory to materialize as a volume
//! - [`PartitionTableType`] → which on-disk table format a partitioner writes
//! - [`PartitionInfo`] → a committed partition as reported back by the host

pub mod error;
pub mod partition;
pub mod size;
pub mod volume;

pub use error::{Result, SizeError};
pub use partition::{PartitionInfo, PartitionTableType};
pub use size::{
    ByteSize, DISK_OVERHEAD, FILESYSTEM_OVERHEAD, FIRST_PARTITION_OFFSET, MEGABYTE, SECTOR_SIZE,
    SLACK_DIVISOR,
};
pub use volume::{NamedVolume, RawVolume};
