// SPDX-License-Identifier: GPL-3.0-only

//! Scoped ownership of exclusively-acquirable host devices
//!
//! A [`Resource`] is anything that must be given back to the host after use:
//! an attached loop device, a device-mapper mapping, a mapped partition.
//! Callers never pair `acquire`/`release` by hand; they hold an [`Acquired`]
//! guard, which releases exactly once, either explicitly on the success path
//! or from `Drop` while an error propagates.
//!
//! Resources that sit on top of another device borrow the parent's
//! [`BlockDevice`] for their whole lifetime, so a parent guard cannot be
//! released or dropped while a child still exists. Locals drop in reverse
//! declaration order, which gives reverse-acquisition release for free.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, SysError};

/// A live device node handed out by [`Resource::acquire`]
///
/// Only valid while the resource that produced it is held.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockDevice {
    path: PathBuf,
}

impl BlockDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, e.g. `hda` for `/dev/mapper/hda`
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub trait Resource {
    /// Short description used in logs and errors
    fn describe(&self) -> String;

    /// Take the device from the host.
    ///
    /// Either succeeds fully or fails leaving nothing behind; a failed acquire
    /// needs no matching release.
    fn acquire(&mut self) -> Result<BlockDevice>;

    /// Give the device back. Releasing a resource that is not held is a no-op.
    fn release(&mut self) -> Result<()>;
}

/// Acquisition state shared by every resource implementation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Idle,
    Held(BlockDevice),
    Released,
}

impl Lifecycle {
    /// Reject a second acquire, and any acquire after release
    pub fn ensure_acquirable(&self, what: &str) -> Result<()> {
        match self {
            Lifecycle::Idle => Ok(()),
            Lifecycle::Held(_) => Err(SysError::AlreadyAcquired(what.to_string())),
            Lifecycle::Released => Err(SysError::AlreadyReleased(what.to_string())),
        }
    }

    pub fn held(&self) -> Option<&BlockDevice> {
        match self {
            Lifecycle::Held(device) => Some(device),
            _ => None,
        }
    }

    pub fn mark_held(&mut self, device: BlockDevice) {
        *self = Lifecycle::Held(device);
    }

    pub fn mark_released(&mut self) {
        *self = Lifecycle::Released;
    }
}

/// A held resource, released exactly once
pub struct Acquired<R: Resource> {
    resource: R,
    device: BlockDevice,
    live: bool,
}

impl<R: Resource> Acquired<R> {
    pub fn acquire(mut resource: R) -> Result<Self> {
        let device = resource.acquire()?;
        debug!(resource = %resource.describe(), device = %device, "acquired");
        Ok(Self {
            resource,
            device,
            live: true,
        })
    }

    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Release now and report the outcome
    pub fn release(mut self) -> Result<()> {
        self.live = false;
        debug!(resource = %self.resource.describe(), "releasing");
        self.resource.release()
    }
}

impl<R: Resource> Drop for Acquired<R> {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        if let Err(error) = self.resource.release() {
            warn!(
                resource = %self.resource.describe(),
                %error,
                "release failed during cleanup"
            );
        }
    }
}

impl<R: Resource> fmt::Debug for Acquired<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquired")
            .field("resource", &self.resource.describe())
            .field("device", &self.device)
            .field("live", &self.live)
            .finish()
    }
}
