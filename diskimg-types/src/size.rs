// SPDX-License-Identifier: GPL-3.0-only

//! Byte and sector arithmetic for image layout
//!
//! Every size or offset handed to sparse-file allocation, the device-mapper or a
//! partitioning tool is a [`ByteSize`]. Conversions to sectors are exact or fail;
//! allocation sizes are rounded *up* to whole sectors, never down.
//!
//! Overflow of the underlying `u64` is treated as a broken precondition and
//! panics: image sizes never come close to the range limit.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SizeError};

/// Addressing unit of block devices and partition extents
pub const SECTOR_SIZE: u64 = 512;

/// One megabyte as the partitioning tools count it (2^20 bytes)
pub const MEGABYTE: u64 = 1024 * 1024;

/// Start of the first partition on every partitioned image
pub const FIRST_PARTITION_OFFSET: ByteSize = ByteSize::from_megabytes(2);

/// Allowance added to each measured volume for ext2 metadata
pub const FILESYSTEM_OVERHEAD: ByteSize = ByteSize::from_megabytes(2);

/// Reserved area plus partition-table space added to a multi-volume disk
pub const DISK_OVERHEAD: ByteSize = ByteSize::from_megabytes(4);

/// Slack margin is `1 / SLACK_DIVISOR` of the measured total (10%)
pub const SLACK_DIVISOR: u64 = 10;

const SECTOR_MASK: u64 = SECTOR_SIZE - 1;

fn expect_in_range(value: Option<u64>, operation: &str) -> u64 {
    match value {
        Some(value) => value,
        None => panic!("byte size overflow in {operation}"),
    }
}

/// An immutable count of bytes
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: ByteSize = ByteSize(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// # Panics
    /// If `megabytes` does not fit in a `u64` byte count.
    pub const fn from_megabytes(megabytes: u64) -> Self {
        match megabytes.checked_mul(MEGABYTE) {
            Some(bytes) => Self(bytes),
            None => panic!("byte size overflow converting megabytes"),
        }
    }

    /// # Panics
    /// If `sectors` does not fit in a `u64` byte count.
    pub const fn from_sectors(sectors: u64) -> Self {
        match sectors.checked_mul(SECTOR_SIZE) {
            Some(bytes) => Self(bytes),
            None => panic!("byte size overflow converting sectors"),
        }
    }

    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_sector_aligned(self) -> bool {
        self.0 & SECTOR_MASK == 0
    }

    /// Exact conversion to a sector count.
    ///
    /// Fails with [`SizeError::UnrepresentableSize`] unless the byte count is a
    /// multiple of [`SECTOR_SIZE`].
    pub fn to_sectors(self) -> Result<u64> {
        if !self.is_sector_aligned() {
            return Err(SizeError::UnrepresentableSize { bytes: self.0 });
        }
        Ok(self.0 / SECTOR_SIZE)
    }

    /// Round up to the next sector boundary; aligned sizes are returned unchanged.
    pub fn align_up_to_sector(self) -> Self {
        let bumped = expect_in_range(self.0.checked_add(SECTOR_MASK), "sector alignment");
        Self(bumped & !SECTOR_MASK)
    }

    /// This size plus the 10% slack margin used when sizing images
    pub fn with_slack(self) -> Self {
        self + Self(self.0 / SLACK_DIVISOR)
    }

    /// Render in the unit parted expects for byte-exact extents (`"<n>B"`)
    pub fn to_parted_format(self) -> String {
        format!("{}B", self.0)
    }

    /// Parse a parted machine-readable byte field such as `2097152B`
    pub fn from_parted_format(value: &str) -> Result<Self> {
        let digits = value
            .trim()
            .strip_suffix('B')
            .ok_or_else(|| SizeError::Parse(format!("expected byte unit in '{value}'")))?;
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|error| SizeError::Parse(format!("'{value}': {error}")))
    }

    /// Human-readable rendering, e.g. `64.00 MB (67,108,864 bytes)`
    pub fn pretty(self) -> String {
        const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
        let mut unit = 0;
        let mut value = self.0 as f64;

        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        let grouped = self.0.to_formatted_string(&Locale::en);
        if unit == 0 {
            format!("{grouped} B")
        } else {
            format!("{value:.2} {} ({grouped} bytes)", UNITS[unit])
        }
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl Add for ByteSize {
    type Output = ByteSize;

    fn add(self, rhs: ByteSize) -> ByteSize {
        ByteSize(expect_in_range(self.0.checked_add(rhs.0), "addition"))
    }
}

impl AddAssign for ByteSize {
    fn add_assign(&mut self, rhs: ByteSize) {
        *self = *self + rhs;
    }
}

impl Sub for ByteSize {
    type Output = ByteSize;

    fn sub(self, rhs: ByteSize) -> ByteSize {
        ByteSize(expect_in_range(self.0.checked_sub(rhs.0), "subtraction"))
    }
}

impl std::iter::Sum for ByteSize {
    fn sum<I: Iterator<Item = ByteSize>>(iter: I) -> ByteSize {
        iter.fold(ByteSize::ZERO, |total, size| total + size)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

/// Parse operator input such as `64M`, `1GiB`, `4096`, `8s`.
///
/// Units are binary; `s` counts sectors.
impl FromStr for ByteSize {
    type Err = SizeError;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        let split = input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len());
        let (digits, unit) = input.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| SizeError::Parse(format!("invalid size '{input}'")))?;

        let multiplier = match unit.trim() {
            "" | "B" => 1,
            "s" => SECTOR_SIZE,
            "K" | "KB" | "KiB" => 1024,
            "M" | "MB" | "MiB" => MEGABYTE,
            "G" | "GB" | "GiB" => MEGABYTE * 1024,
            other => return Err(SizeError::Parse(format!("invalid unit '{other}'"))),
        };

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| SizeError::InvalidSize(format!("'{input}' is out of range")))
    }
}
