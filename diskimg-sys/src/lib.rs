// SPDX-License-Identifier: GPL-3.0-only

//! Host-level operations for building VM disk images
//!
//! This crate drives the system utilities that turn an application binary and
//! data directories into bootable or data disk images:
//! - Loop-device attachment of image files
//! - Device-mapper aliases for bootloader-friendly device names
//! - Partition-table creation and enumeration (msdos and BSD disklabel)
//! - Filesystem formatting, mounting and population
//! - Bootloader staging and installation
//!
//! Every host device is a [`Resource`] held through an [`Acquired`] guard, so
//! releases happen exactly once, in reverse order of acquisition, on every exit
//! path. Loop slots and device-mapper names are host-wide: this crate does no
//! locking around them, and concurrent builds on one host must be serialized
//! (or given distinct mapper names) by the caller.
//!
//! These operations require root and should only be called from privileged
//! tooling.

pub mod boot;
pub mod cmd;
pub mod config;
pub mod device_mapper;
pub mod dirs;
pub mod error;
pub mod filesystem;
pub mod grub;
pub mod image;
pub mod inspect;
pub mod loop_device;
pub mod partition;
pub mod resource;
pub mod volumes;

pub use boot::BootImageAssembler;
pub use cmd::{CommandOutcome, CommandRunner, Shell, SystemRunner, render};
pub use config::{BootConfig, ImageConfig, Tool, ToolPaths, VolumeConfig};
pub use device_mapper::DeviceMapping;
pub use error::{Result, SysError};
pub use image::create_sparse_file;
pub use inspect::inspect_image;
pub use loop_device::LoopDevice;
pub use partition::{
    DiskLabelPartitioner, MsDosPartitioner, Partition, Partitioner, list_partitions,
    partitioner_for,
};
pub use resource::{Acquired, BlockDevice, Lifecycle, Resource};
pub use volumes::VolumeImageAssembler;
