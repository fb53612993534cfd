// SPDX-License-Identifier: GPL-3.0-only

//! Reading back the committed partition layout
//!
//! Layout comes from `parted -m unit B print`, which reports one record per
//! line terminated by `;`:
//!
//! ```text
//! BYT;
//! /dev/loop0:67108864B:loopback:512:512:msdos:Loopback device:;
//! 1:2097152B:67108863B:65011712B:ext2::;
//! ```

use diskimg_types::{ByteSize, PartitionInfo, PartitionTableType};
use tracing::debug;

use super::Partitioner;
use crate::cmd::Shell;
use crate::config::Tool;
use crate::device_mapper::DeviceMapping;
use crate::error::{Result, SysError};
use crate::resource::{BlockDevice, Resource};

/// One partition record from a parted listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub index: u32,
    pub offset: ByteSize,
    pub size: ByteSize,
}

/// A parsed parted listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionListing {
    /// Label name as parted reports it (`msdos`, `bsd`, `loop`, ...)
    pub label: String,
    pub entries: Vec<PartitionEntry>,
}

impl PartitionListing {
    pub fn table_type(&self) -> Option<PartitionTableType> {
        PartitionTableType::from_parted_label(&self.label)
    }
}

fn field<'l>(fields: &[&'l str], at: usize, line: &str) -> Result<&'l str> {
    fields
        .get(at)
        .copied()
        .ok_or_else(|| SysError::InvalidPartitionListing(format!("short record '{line}'")))
}

fn byte_field(fields: &[&str], at: usize, line: &str) -> Result<ByteSize> {
    let value = field(fields, at, line)?;
    ByteSize::from_parted_format(value)
        .map_err(|error| SysError::InvalidPartitionListing(format!("'{line}': {error}")))
}

/// Parse machine-readable parted output. Entries are returned sorted by index.
pub fn parse_parted_machine(output: &str) -> Result<PartitionListing> {
    let mut label = None;
    let mut entries = Vec::new();

    for line in output.lines().map(str::trim) {
        if line.is_empty() || line == "BYT;" {
            continue;
        }
        let record = line.strip_suffix(';').unwrap_or(line);
        let fields: Vec<&str> = record.split(':').collect();

        match fields[0].parse::<u32>() {
            Ok(index) => {
                let offset = byte_field(&fields, 1, line)?;
                let end = byte_field(&fields, 2, line)?;
                let size = byte_field(&fields, 3, line)?;
                if end < offset {
                    return Err(SysError::InvalidPartitionListing(format!(
                        "'{line}': end before start"
                    )));
                }
                entries.push(PartitionEntry {
                    index,
                    offset,
                    size,
                });
            }
            Err(_) if label.is_none() => {
                label = Some(field(&fields, 5, line)?.to_string());
            }
            Err(_) => {
                return Err(SysError::InvalidPartitionListing(format!(
                    "unexpected record '{line}'"
                )));
            }
        }
    }

    let label = label
        .ok_or_else(|| SysError::InvalidPartitionListing("missing device record".to_string()))?;
    entries.sort_by_key(|entry| entry.index);
    Ok(PartitionListing { label, entries })
}

/// Query the partition table currently committed on `device`
pub fn read_partition_table(shell: Shell<'_>, device: &BlockDevice) -> Result<PartitionListing> {
    let outcome = shell.run(
        Tool::Parted,
        &["-s", "-m", &device.path_str(), "unit", "B", "print"],
    )?;
    parse_parted_machine(&outcome.stdout)
}

/// A committed partition, exposed through a device-mapper mapping while held
#[derive(Debug)]
pub struct Partition<'a> {
    info: PartitionInfo,
    mapping: DeviceMapping<'a>,
}

impl<'a> Partition<'a> {
    fn new(shell: Shell<'a>, parent: &'a BlockDevice, info: PartitionInfo) -> Result<Self> {
        let mapping = DeviceMapping::new(
            shell,
            info.offset.to_sectors()?,
            info.size.to_sectors()?,
            parent,
            info.name.clone(),
        );
        Ok(Self { info, mapping })
    }

    pub fn index(&self) -> u32 {
        self.info.index
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn offset(&self) -> ByteSize {
        self.info.offset
    }

    pub fn size(&self) -> ByteSize {
        self.info.size
    }

    pub fn end(&self) -> ByteSize {
        self.info.end()
    }

    pub fn info(&self) -> &PartitionInfo {
        &self.info
    }
}

impl Resource for Partition<'_> {
    fn describe(&self) -> String {
        format!(
            "partition {} of {} at {}",
            self.info.index,
            self.mapping.backing(),
            self.info.offset.to_parted_format()
        )
    }

    fn acquire(&mut self) -> Result<BlockDevice> {
        self.mapping.acquire()
    }

    fn release(&mut self) -> Result<()> {
        self.mapping.release()
    }
}

/// Enumerate the partitions committed on `device`, ordered by index
///
/// `naming` decides the mapper name each partition gets when acquired.
pub fn list_partitions<'a>(
    shell: Shell<'a>,
    device: &'a BlockDevice,
    naming: &dyn Partitioner,
) -> Result<Vec<Partition<'a>>> {
    let listing = read_partition_table(shell, device)?;
    debug!(
        device = %device,
        label = %listing.label,
        count = listing.entries.len(),
        "read partition table"
    );

    listing
        .entries
        .into_iter()
        .map(|entry| {
            let info = PartitionInfo {
                index: entry.index,
                name: naming.partition_name(device, entry.index)?,
                offset: entry.offset,
                size: entry.size,
            };
            debug!(
                name = %info.name,
                start = info.offset.as_bytes(),
                end = info.end().as_bytes(),
                "listed partition"
            );
            Partition::new(shell, device, info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSDOS_TWO_PARTS: &str = "BYT;
/dev/loop0:67108864B:loopback:512:512:msdos:Loopback device:;
2:34603008B:67108863B:32505856B:::;
1:2097152B:34603007B:32505856B:ext2::;
";

    #[test]
    fn parses_records_in_index_order() {
        let listing = parse_parted_machine(MSDOS_TWO_PARTS).expect("parse");
        assert_eq!(listing.label, "msdos");
        assert_eq!(listing.table_type(), Some(PartitionTableType::Msdos));
        assert_eq!(
            listing.entries,
            vec![
                PartitionEntry {
                    index: 1,
                    offset: ByteSize::from_bytes(2_097_152),
                    size: ByteSize::from_bytes(32_505_856),
                },
                PartitionEntry {
                    index: 2,
                    offset: ByteSize::from_bytes(34_603_008),
                    size: ByteSize::from_bytes(32_505_856),
                },
            ]
        );
    }

    #[test]
    fn empty_table_has_no_entries() {
        let listing = parse_parted_machine(
            "BYT;\n/dev/mapper/hda:8388608B:dm:512:512:bsd:Linux device-mapper (linear):;\n",
        )
        .expect("parse");
        assert_eq!(listing.table_type(), Some(PartitionTableType::Disklabel));
        assert!(listing.entries.is_empty());
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(matches!(
            parse_parted_machine("BYT;\n"),
            Err(SysError::InvalidPartitionListing(_))
        ));
        assert!(matches!(
            parse_parted_machine("BYT;\n/dev/loop0:1B:x:512:512:msdos::;\n1:2048:4095B:2048B:::;\n"),
            Err(SysError::InvalidPartitionListing(_))
        ));
        assert!(matches!(
            parse_parted_machine("BYT;\n/dev/loop0:1B:x:512:512:msdos::;\n1:2048B;\n"),
            Err(SysError::InvalidPartitionListing(_))
        ));
    }
}
