// SPDX-License-Identifier: GPL-3.0-only

//! Test support for image builds without root or real block devices

pub mod fake_host;
pub mod fixtures;

pub use fake_host::{FakeFilesystem, FakeHost, FakePartition};
