// SPDX-License-Identifier: GPL-3.0-only

//! Formatting and mounting filesystems on acquired block devices

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::Result;
use crate::resource::BlockDevice;

/// Create an ext2 filesystem on `device`
pub fn format_ext2(
    shell: Shell<'_>,
    device: &BlockDevice,
    label: Option<&str>,
    inode_size: u32,
) -> Result<()> {
    let inode_size = inode_size.to_string();
    let device_path = device.path_str();

    let mut args = Vec::new();
    if let Some(label) = label {
        args.extend(["-L", label]);
    }
    args.extend(["-I", inode_size.as_str(), "-t", "ext2", device_path.as_str()]);

    shell.run(Tool::Mkfs, &args)?;
    debug!(device = %device, label = label.unwrap_or(""), "formatted ext2");
    Ok(())
}

/// A filesystem mounted on a fresh temporary directory
///
/// Holds a borrow of the mounted device so the device cannot be released while
/// mounted. The directory is removed after a clean unmount.
#[derive(Debug)]
pub struct MountPoint<'a> {
    shell: Shell<'a>,
    device: &'a BlockDevice,
    path: PathBuf,
    mounted: bool,
}

impl<'a> MountPoint<'a> {
    pub fn mount(shell: Shell<'a>, device: &'a BlockDevice) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("diskimg-")
            .tempdir()?
            .keep();

        let target = path.to_string_lossy().to_string();
        if let Err(error) = shell.run(Tool::Mount, &[&device.path_str(), &target]) {
            if let Err(cleanup) = fs::remove_dir(&path) {
                warn!(path = %path.display(), error = %cleanup, "failed to remove mount directory");
            }
            return Err(error);
        }

        debug!(device = %device, path = %path.display(), "mounted");
        Ok(Self {
            shell,
            device,
            path,
            mounted: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &BlockDevice {
        self.device
    }

    fn umount(&mut self) -> Result<()> {
        self.mounted = false;
        self.shell
            .run(Tool::Umount, &[&self.path.to_string_lossy()])?;
        fs::remove_dir(&self.path)?;
        debug!(path = %self.path.display(), "unmounted");
        Ok(())
    }

    /// Unmount and remove the mount directory
    pub fn unmount(mut self) -> Result<()> {
        self.umount()
    }
}

impl Drop for MountPoint<'_> {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        if let Err(error) = self.umount() {
            warn!(path = %self.path.display(), %error, "unmount failed during cleanup");
        }
    }
}
