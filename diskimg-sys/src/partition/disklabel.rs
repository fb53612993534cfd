// SPDX-License-Identifier: GPL-3.0-only

use diskimg_types::{ByteSize, PartitionTableType};
use tracing::debug;

use super::{LAST_SECTOR, Partitioner, inclusive_end, make_label, make_part};
use crate::cmd::Shell;
use crate::error::{Result, SysError};
use crate::resource::BlockDevice;

/// BSD disklabel partition tables
///
/// Partitions have no primary/logical kind and are named by letter:
/// `<parent>a`, `<parent>b`, ...
#[derive(Debug)]
pub struct DiskLabelPartitioner<'a> {
    shell: Shell<'a>,
    device: &'a BlockDevice,
}

impl<'a> DiskLabelPartitioner<'a> {
    pub fn new(shell: Shell<'a>, device: &'a BlockDevice) -> Self {
        Self { shell, device }
    }
}

/// Drop msdos partition kinds, which a disklabel has no notion of
fn filesystem_type(part_type: &str) -> Option<&str> {
    match part_type {
        "" | "primary" | "logical" | "extended" => None,
        other => Some(other),
    }
}

/// `a` for partition 1 through `z` for partition 26
fn partition_letter(index: u32) -> Option<char> {
    let offset = u8::try_from(index.checked_sub(1)?).ok()?;
    (offset < 26).then(|| char::from(b'a' + offset))
}

impl Partitioner for DiskLabelPartitioner<'_> {
    fn table_type(&self) -> PartitionTableType {
        PartitionTableType::Disklabel
    }

    fn device(&self) -> &BlockDevice {
        self.device
    }

    fn create_table(&self) -> Result<()> {
        debug!(device = %self.device, "creating disklabel partition table");
        make_label(self.shell, self.device, PartitionTableType::Disklabel)
    }

    fn create_partition_spanning_remainder(&self, part_type: &str, start: ByteSize) -> Result<()> {
        let start = start.to_parted_format();
        let mut fields: Vec<&str> = filesystem_type(part_type).into_iter().collect();
        fields.extend([start.as_str(), LAST_SECTOR]);
        make_part(self.shell, self.device, &fields)
    }

    fn create_partition(&self, part_type: &str, start: ByteSize, end: ByteSize) -> Result<()> {
        let last = inclusive_end(start, end)?;
        let start = start.to_parted_format();
        let mut fields: Vec<&str> = filesystem_type(part_type).into_iter().collect();
        fields.extend([start.as_str(), last.as_str()]);
        make_part(self.shell, self.device, &fields)
    }

    fn partition_name(&self, parent: &BlockDevice, index: u32) -> Result<String> {
        let letter = partition_letter(index).ok_or_else(|| SysError::PartitionIndexOutOfRange {
            index,
            table: PartitionTableType::Disklabel.to_string(),
        })?;
        Ok(format!("{}{}", parent.name(), letter))
    }
}
