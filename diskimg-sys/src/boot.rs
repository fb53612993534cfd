// SPDX-License-Identifier: GPL-3.0-only

//! Bootable root images
//!
//! A boot image is one msdos partition starting at 2 MB and running to the end
//! of the disk, formatted ext2, holding the program and a grub menu. Grub is
//! installed through a device-mapper alias of the loop device so its device
//! map names a BIOS-style disk.

use std::path::Path;

use diskimg_types::{ByteSize, FIRST_PARTITION_OFFSET};
use tracing::info;

use crate::cmd::{CommandRunner, Shell};
use crate::config::ImageConfig;
use crate::device_mapper;
use crate::error::{Result, SysError};
use crate::filesystem::{MountPoint, format_ext2};
use crate::grub::{install_grub, prepare_grub};
use crate::image::create_sparse_file;
use crate::loop_device;
use crate::partition::{MsDosPartitioner, Partitioner, list_partitions};
use crate::resource::Acquired;

pub struct BootImageAssembler<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ImageConfig,
}

impl<'a> BootImageAssembler<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ImageConfig) -> Self {
        Self { runner, config }
    }

    fn shell(&self) -> Shell<'a> {
        Shell::new(self.runner, &self.config.tools)
    }

    /// Allocate `file` as a sparse image of `size` (rounded up to a sector) and
    /// build a boot image on it
    pub fn create_boot_image_with_size(
        &self,
        file: &Path,
        program: &Path,
        cmdline: &str,
        size: ByteSize,
    ) -> Result<()> {
        let size = create_sparse_file(file, size)?;
        self.create_boot_image_on_file(file, size, program, cmdline)
    }

    /// Build a boot image on an existing file of exactly `size` bytes
    ///
    /// On failure every device taken so far is released in reverse order and
    /// the partially written file is left in place.
    pub fn create_boot_image_on_file(
        &self,
        file: &Path,
        size: ByteSize,
        program: &Path,
        cmdline: &str,
    ) -> Result<()> {
        let sectors = size.to_sectors()?;
        let shell = self.shell();
        let boot = &self.config.boot;
        info!(image = %file.display(), size = %size, "building boot image");

        let root_loop = loop_device::attach(shell, file)?;
        let root_disk =
            device_mapper::map(shell, 0, sectors, root_loop.device(), &boot.grub_disk_name)?;

        let partitioner = MsDosPartitioner::new(shell, root_disk.device());
        partitioner.create_table()?;
        partitioner.create_partition_spanning_remainder("primary", FIRST_PARTITION_OFFSET)?;

        let first = list_partitions(shell, root_disk.device(), &partitioner)?
            .into_iter()
            .next()
            .ok_or_else(|| SysError::NoPartitionsCreated {
                device: root_disk.device().to_string(),
            })?;
        let boot_partition = Acquired::acquire(first)?;

        format_ext2(
            shell,
            boot_partition.device(),
            Some(boot.label.as_str()),
            boot.inode_size,
        )?;

        let mount = MountPoint::mount(shell, boot_partition.device())?;
        prepare_grub(
            mount.path(),
            root_disk.device(),
            program,
            cmdline,
            &boot.root_drive,
        )?;
        install_grub(shell, mount.path(), root_disk.device())?;
        mount.unmount()?;

        boot_partition.release()?;
        root_disk.release()?;
        root_loop.release()?;

        info!(image = %file.display(), "boot image ready");
        Ok(())
    }
}
