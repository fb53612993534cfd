// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::size::ByteSize;

/// One volume to materialize from a source directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVolume {
    /// Directory whose contents are copied into the volume
    pub path: PathBuf,

    /// Target size; zero means "derive from the directory contents"
    #[serde(default)]
    pub size: ByteSize,
}

impl RawVolume {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: ByteSize::ZERO,
        }
    }

    pub fn with_size(path: impl Into<PathBuf>, size: ByteSize) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_explicit_size(&self) -> bool {
        !self.size.is_zero()
    }
}

/// A volume keyed by the name (usually a guest mount point) it is exposed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVolume {
    pub name: String,

    #[serde(flatten)]
    pub volume: RawVolume,
}

impl NamedVolume {
    pub fn new(name: impl Into<String>, volume: RawVolume) -> Self {
        Self {
            name: name.into(),
            volume,
        }
    }
}
