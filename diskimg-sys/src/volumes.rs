// SPDX-License-Identifier: GPL-3.0-only

//! Data volume images
//!
//! Volumes are either a whole unpartitioned image, or one partition each on a
//! shared disk laid out back to back from 2 MB in the order given.

use std::collections::HashSet;
use std::path::Path;

use diskimg_types::{
    ByteSize, DISK_OVERHEAD, FILESYSTEM_OVERHEAD, FIRST_PARTITION_OFFSET, NamedVolume,
    PartitionTableType, RawVolume,
};
use tracing::{debug, info};

use crate::cmd::{CommandRunner, Shell};
use crate::config::ImageConfig;
use crate::dirs::{copy_directory_contents, directory_size};
use crate::error::{Result, SysError};
use crate::filesystem::{MountPoint, format_ext2};
use crate::image::create_sparse_file;
use crate::loop_device;
use crate::partition::{list_partitions, partitioner_for};
use crate::resource::{Acquired, BlockDevice};

/// Space each volume needs: its explicit size, or its measured contents plus
/// the filesystem allowance. Sizes are rounded up to whole sectors.
pub fn volume_sizes(volumes: &[RawVolume]) -> Result<Vec<ByteSize>> {
    volumes
        .iter()
        .map(|volume| {
            let size = if volume.has_explicit_size() {
                volume.size
            } else {
                directory_size(volume.path())? + FILESYSTEM_OVERHEAD
            };
            Ok(size.align_up_to_sector())
        })
        .collect()
}

/// Disk size holding `sizes` plus slack and the table overhead
pub fn disk_size_for(sizes: &[ByteSize]) -> ByteSize {
    let total: ByteSize = sizes.iter().copied().sum();
    total.with_slack().align_up_to_sector() + DISK_OVERHEAD
}

/// Image size for a volume written without a partition table
pub fn single_volume_size(volume: &RawVolume) -> Result<ByteSize> {
    if volume.has_explicit_size() {
        return Ok(volume.size.align_up_to_sector());
    }
    let contents = directory_size(volume.path())?;
    Ok((contents.with_slack() + FILESYSTEM_OVERHEAD).align_up_to_sector())
}

pub struct VolumeImageAssembler<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ImageConfig,
}

impl<'a> VolumeImageAssembler<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ImageConfig) -> Self {
        Self { runner, config }
    }

    fn shell(&self) -> Shell<'a> {
        Shell::new(self.runner, &self.config.tools)
    }

    /// Write `volume` to `file` as a bare filesystem with no partition table
    pub fn create_single_volume(&self, file: &Path, volume: &RawVolume) -> Result<()> {
        let size = create_sparse_file(file, single_volume_size(volume)?)?;
        info!(image = %file.display(), size = %size, "building single volume image");

        let shell = self.shell();
        let image_loop = loop_device::attach(shell, file)?;
        self.format_and_populate(image_loop.device(), volume.path())?;
        image_loop.release()?;

        info!(image = %file.display(), "volume image ready");
        Ok(())
    }

    /// Write `volumes` to `file`, one partition each, in order
    pub fn create_volumes(
        &self,
        file: &Path,
        volumes: &[RawVolume],
        table: PartitionTableType,
    ) -> Result<()> {
        let sizes = volume_sizes(volumes)?;
        let disk_size = create_sparse_file(file, disk_size_for(&sizes))?;
        info!(
            image = %file.display(),
            size = %disk_size,
            volumes = volumes.len(),
            table = %table,
            "building volume image"
        );

        let shell = self.shell();
        let image_loop = loop_device::attach(shell, file)?;
        let partitioner = partitioner_for(table, shell, image_loop.device());
        partitioner.create_table()?;

        let mut start = FIRST_PARTITION_OFFSET;
        for (at, size) in sizes.iter().enumerate() {
            let end = start + *size;
            debug!(start = start.as_bytes(), end = end.as_bytes(), "creating partition");
            partitioner.create_partition("ext2", start, end)?;

            // Every request must show up before the next one is placed after it
            let listed = list_partitions(shell, image_loop.device(), &*partitioner)?;
            if listed.is_empty() {
                return Err(SysError::NoPartitionsCreated {
                    device: image_loop.device().to_string(),
                });
            }
            if listed.len() != at + 1 {
                return Err(SysError::PartitionCountMismatch {
                    expected: at + 1,
                    found: listed.len(),
                });
            }
            start = listed[at].end();
        }

        let partitions = list_partitions(shell, image_loop.device(), &*partitioner)?;
        if partitions.len() != volumes.len() {
            return Err(SysError::PartitionCountMismatch {
                expected: volumes.len(),
                found: partitions.len(),
            });
        }
        drop(partitioner);

        for (partition, volume) in partitions.into_iter().zip(volumes) {
            debug!(
                partition = partition.name(),
                source = %volume.path().display(),
                "populating partition"
            );
            let held = Acquired::acquire(partition)?;
            self.format_and_populate(held.device(), volume.path())?;
            held.release()?;
        }

        image_loop.release()?;
        info!(image = %file.display(), "volume image ready");
        Ok(())
    }

    /// Write named volumes with the configured table type and return the names
    /// in partition order
    pub fn create_named_volumes(
        &self,
        file: &Path,
        volumes: &[NamedVolume],
    ) -> Result<Vec<String>> {
        self.create_named_volumes_with_table(file, volumes, self.config.volumes.partition_table)
    }

    /// Like [`Self::create_named_volumes`], with an explicit table type
    pub fn create_named_volumes_with_table(
        &self,
        file: &Path,
        volumes: &[NamedVolume],
        table: PartitionTableType,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        for named in volumes {
            if !seen.insert(named.name.as_str()) {
                return Err(SysError::DuplicateVolume(named.name.clone()));
            }
        }

        let raw: Vec<RawVolume> = volumes.iter().map(|named| named.volume.clone()).collect();
        self.create_volumes(file, &raw, table)?;
        Ok(volumes.iter().map(|named| named.name.clone()).collect())
    }

    fn format_and_populate(&self, device: &BlockDevice, source: &Path) -> Result<()> {
        let shell = self.shell();
        format_ext2(shell, device, None, self.config.volumes.inode_size)?;

        let mount = MountPoint::mount(shell, device)?;
        copy_directory_contents(shell, source, mount.path())?;
        mount.unmount()
    }
}
