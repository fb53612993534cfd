// SPDX-License-Identifier: GPL-3.0-only

//! Device-mapper aliases over ranges of existing block devices
//!
//! Grub identifies its boot disk by a BIOS-style name. Mapping the loop device
//! to such a name (`/dev/mapper/hda`) keeps the installed configuration
//! consistent with what the bootloader sees at boot, whatever loop slot the
//! host handed out. Mapper names share one host-wide namespace.

use std::path::PathBuf;

use tracing::info;

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::Result;
use crate::resource::{Acquired, BlockDevice, Lifecycle, Resource};

pub const MAPPER_DIR: &str = "/dev/mapper";

/// A linear mapping of `size_sectors` sectors of `backing`, starting at
/// `offset_sectors`, exposed as `/dev/mapper/<name>`
///
/// Borrows the backing device so the mapping cannot outlive it.
#[derive(Debug)]
pub struct DeviceMapping<'a> {
    shell: Shell<'a>,
    backing: &'a BlockDevice,
    offset_sectors: u64,
    size_sectors: u64,
    name: String,
    state: Lifecycle,
}

impl<'a> DeviceMapping<'a> {
    pub fn new(
        shell: Shell<'a>,
        offset_sectors: u64,
        size_sectors: u64,
        backing: &'a BlockDevice,
        name: impl Into<String>,
    ) -> Self {
        Self {
            shell,
            backing,
            offset_sectors,
            size_sectors,
            name: name.into(),
            state: Lifecycle::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &BlockDevice {
        self.backing
    }

    /// dm table line: `<start> <length> linear <device> <offset>`
    pub fn table(&self) -> String {
        format!(
            "0 {} linear {} {}",
            self.size_sectors,
            self.backing.path().display(),
            self.offset_sectors
        )
    }

    pub fn node_path(&self) -> PathBuf {
        PathBuf::from(MAPPER_DIR).join(&self.name)
    }
}

impl Resource for DeviceMapping<'_> {
    fn describe(&self) -> String {
        format!("device-mapper {} over {}", self.name, self.backing)
    }

    fn acquire(&mut self) -> Result<BlockDevice> {
        self.state.ensure_acquirable(&self.describe())?;

        let table = self.table();
        self.shell
            .run(Tool::Dmsetup, &["create", &self.name, "--table", &table])?;

        let device = BlockDevice::new(self.node_path());
        info!(device = %device, table = %table, "created device-mapper mapping");
        self.state.mark_held(device.clone());
        Ok(device)
    }

    fn release(&mut self) -> Result<()> {
        if self.state.held().is_none() {
            return Ok(());
        }

        self.shell.run(Tool::Dmsetup, &["remove", &self.name])?;
        info!(name = %self.name, "removed device-mapper mapping");
        self.state.mark_released();
        Ok(())
    }
}

/// Map a sector range of `backing` to `name` and hold it
pub fn map<'a>(
    shell: Shell<'a>,
    offset_sectors: u64,
    size_sectors: u64,
    backing: &'a BlockDevice,
    name: &str,
) -> Result<Acquired<DeviceMapping<'a>>> {
    Acquired::acquire(DeviceMapping::new(
        shell,
        offset_sectors,
        size_sectors,
        backing,
        name,
    ))
}
