// SPDX-License-Identifier: GPL-3.0-only

use diskimg_types::{ByteSize, PartitionTableType};
use tracing::debug;

use super::{LAST_SECTOR, Partitioner, inclusive_end, make_label, make_part};
use crate::cmd::Shell;
use crate::error::Result;
use crate::resource::BlockDevice;

const PARTITION_KINDS: [&str; 3] = ["primary", "logical", "extended"];

/// DOS/MBR partition tables
///
/// Partitions are named `<parent><index>`, so the first partition of the
/// `hda` mapping is `hda1`, matching grub's expectations.
#[derive(Debug)]
pub struct MsDosPartitioner<'a> {
    shell: Shell<'a>,
    device: &'a BlockDevice,
}

impl<'a> MsDosPartitioner<'a> {
    pub fn new(shell: Shell<'a>, device: &'a BlockDevice) -> Self {
        Self { shell, device }
    }
}

/// mkpart needs a partition kind first; a bare filesystem type becomes a
/// primary partition of that type.
fn kind_and_type(part_type: &str) -> Vec<&str> {
    if PARTITION_KINDS.contains(&part_type) {
        vec![part_type]
    } else {
        vec!["primary", part_type]
    }
}

impl Partitioner for MsDosPartitioner<'_> {
    fn table_type(&self) -> PartitionTableType {
        PartitionTableType::Msdos
    }

    fn device(&self) -> &BlockDevice {
        self.device
    }

    fn create_table(&self) -> Result<()> {
        debug!(device = %self.device, "creating msdos partition table");
        make_label(self.shell, self.device, PartitionTableType::Msdos)
    }

    fn create_partition_spanning_remainder(&self, part_type: &str, start: ByteSize) -> Result<()> {
        let start = start.to_parted_format();
        let mut fields = kind_and_type(part_type);
        fields.extend([start.as_str(), LAST_SECTOR]);
        make_part(self.shell, self.device, &fields)
    }

    fn create_partition(&self, part_type: &str, start: ByteSize, end: ByteSize) -> Result<()> {
        let last = inclusive_end(start, end)?;
        let start = start.to_parted_format();
        let mut fields = kind_and_type(part_type);
        fields.extend([start.as_str(), last.as_str()]);
        make_part(self.shell, self.device, &fields)
    }

    fn partition_name(&self, parent: &BlockDevice, index: u32) -> Result<String> {
        Ok(format!("{}{}", parent.name(), index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_types_become_primary_partitions() {
        assert_eq!(kind_and_type("primary"), vec!["primary"]);
        assert_eq!(kind_and_type("ext2"), vec!["primary", "ext2"]);
    }
}
