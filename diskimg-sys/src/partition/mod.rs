// SPDX-License-Identifier: GPL-3.0-only

//! Partition-table construction and enumeration
//!
//! Partitioners only mutate the device; none of them keeps a partition list.
//! Some table formats snap requested extents to their own alignment, so the
//! committed layout is always read back with [`list_partitions`] after each
//! mutating call.

mod disklabel;
mod list;
mod msdos;

pub use disklabel::DiskLabelPartitioner;
pub use list::{Partition, PartitionEntry, PartitionListing, list_partitions, read_partition_table};
pub use msdos::MsDosPartitioner;

use diskimg_types::{ByteSize, PartitionTableType, SizeError};

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::Result;
use crate::resource::BlockDevice;

pub trait Partitioner {
    fn table_type(&self) -> PartitionTableType;

    /// Device the table is written to
    fn device(&self) -> &BlockDevice;

    /// Write an empty table, discarding any existing one
    fn create_table(&self) -> Result<()>;

    /// Append a partition from `start` to the last sector of the device
    fn create_partition_spanning_remainder(&self, part_type: &str, start: ByteSize) -> Result<()>;

    /// Append a partition covering `[start, end)`; the committed extent may be
    /// larger than requested
    fn create_partition(&self, part_type: &str, start: ByteSize, end: ByteSize) -> Result<()>;

    /// Device-mapper name of the partition at 1-based `index` of `parent`
    fn partition_name(&self, parent: &BlockDevice, index: u32) -> Result<String>;
}

/// Build the partitioner for `table` on `device`
pub fn partitioner_for<'a>(
    table: PartitionTableType,
    shell: Shell<'a>,
    device: &'a BlockDevice,
) -> Box<dyn Partitioner + 'a> {
    match table {
        PartitionTableType::Msdos => Box::new(MsDosPartitioner::new(shell, device)),
        PartitionTableType::Disklabel => Box::new(DiskLabelPartitioner::new(shell, device)),
    }
}

fn make_label(shell: Shell<'_>, device: &BlockDevice, table: PartitionTableType) -> Result<()> {
    shell.run(
        Tool::Parted,
        &["-s", &device.path_str(), "mklabel", table.parted_label()],
    )?;
    Ok(())
}

/// `parted mkpart` with alignment disabled, so requested extents are taken
/// as-is unless the label format itself rounds them.
fn make_part(shell: Shell<'_>, device: &BlockDevice, fields: &[&str]) -> Result<()> {
    let device = device.path_str();
    let mut args = vec!["-s", "-a", "none", device.as_str(), "--", "mkpart"];
    args.extend_from_slice(fields);
    shell.run(Tool::Parted, &args)?;
    Ok(())
}

/// parted takes an inclusive end bound; `[start, end)` ends on byte `end - 1`
fn inclusive_end(start: ByteSize, end: ByteSize) -> Result<String> {
    if end <= start {
        return Err(SizeError::InvalidSize(format!(
            "partition end {} is not after start {}",
            end.as_bytes(),
            start.as_bytes()
        ))
        .into());
    }
    Ok((end - ByteSize::from_bytes(1)).to_parted_format())
}

/// parted's notation for the last sector of the device
const LAST_SECTOR: &str = "-1s";
