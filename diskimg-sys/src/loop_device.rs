// SPDX-License-Identifier: GPL-3.0-only

//! Loop-device attachment of image files
//!
//! Loop slots are a host-wide, finite table shared with every other process.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::{Result, SysError};
use crate::resource::{Acquired, BlockDevice, Lifecycle, Resource};

/// A regular file exposed as a block device through `losetup`
#[derive(Debug)]
pub struct LoopDevice<'a> {
    shell: Shell<'a>,
    image: PathBuf,
    state: Lifecycle,
}

impl<'a> LoopDevice<'a> {
    pub fn new(shell: Shell<'a>, image: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            image: image.into(),
            state: Lifecycle::Idle,
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }
}

impl Resource for LoopDevice<'_> {
    fn describe(&self) -> String {
        format!("loop device for {}", self.image.display())
    }

    fn acquire(&mut self) -> Result<BlockDevice> {
        self.state.ensure_acquirable(&self.describe())?;

        let image = self.image.to_string_lossy();
        let outcome = self.shell.run(Tool::Losetup, &["--find", "--show", &image])?;
        let node = outcome.stdout.trim();
        if node.is_empty() {
            return Err(SysError::CommandFailed {
                command: outcome.command,
                stderr: "no loop device reported".to_string(),
            });
        }

        let device = BlockDevice::new(node);
        info!(image = %self.image.display(), device = %device, "attached loop device");
        self.state.mark_held(device.clone());
        Ok(device)
    }

    fn release(&mut self) -> Result<()> {
        let Some(device) = self.state.held().cloned() else {
            return Ok(());
        };

        self.shell.run(Tool::Losetup, &["-d", &device.path_str()])?;
        info!(device = %device, "detached loop device");
        self.state.mark_released();
        Ok(())
    }
}

/// Attach `image` and hold it until the returned guard is released or dropped
pub fn attach<'a>(shell: Shell<'a>, image: &Path) -> Result<Acquired<LoopDevice<'a>>> {
    Acquired::acquire(LoopDevice::new(shell, image))
}
