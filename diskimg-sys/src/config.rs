// SPDX-License-Identifier: GPL-3.0-only

//! Build configuration
//!
//! Everything here has a working default; a TOML file only needs the keys it
//! overrides. Layout constants (partition offsets, overhead allowances) are not
//! configurable and live in `diskimg_types`.

use std::fs;
use std::path::{Path, PathBuf};

use diskimg_types::PartitionTableType;
use serde::{Deserialize, Serialize};
use tracing::debug;
use which::which;

use crate::error::{Result, SysError};

/// Environment variable naming a config file to load instead of the defaults
pub const CONFIG_ENV: &str = "DISKIMG_CONFIG";

/// External utilities the builders shell out to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Losetup,
    Dmsetup,
    Parted,
    Mkfs,
    Mount,
    Umount,
    GrubInstall,
    Cp,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::Losetup,
        Tool::Dmsetup,
        Tool::Parted,
        Tool::Mkfs,
        Tool::Mount,
        Tool::Umount,
        Tool::GrubInstall,
        Tool::Cp,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub losetup: String,
    pub dmsetup: String,
    pub parted: String,
    pub mkfs: String,
    pub mount: String,
    pub umount: String,
    pub grub_install: String,
    pub cp: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            losetup: "losetup".to_string(),
            dmsetup: "dmsetup".to_string(),
            parted: "parted".to_string(),
            mkfs: "mkfs".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            grub_install: "grub-install".to_string(),
            cp: "cp".to_string(),
        }
    }
}

impl ToolPaths {
    pub fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::Losetup => &self.losetup,
            Tool::Dmsetup => &self.dmsetup,
            Tool::Parted => &self.parted,
            Tool::Mkfs => &self.mkfs,
            Tool::Mount => &self.mount,
            Tool::Umount => &self.umount,
            Tool::GrubInstall => &self.grub_install,
            Tool::Cp => &self.cp,
        }
    }

    /// Resolve every configured tool, failing on the first one missing from PATH
    pub fn check_available(&self) -> Result<()> {
        for tool in Tool::ALL {
            let program = self.program(tool);
            let resolved =
                which(program).map_err(|_| SysError::ToolNotFound(program.to_string()))?;
            debug!(?tool, path = %resolved.display(), "found tool");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Device-mapper name the boot disk is exposed under while grub is installed
    pub grub_disk_name: String,

    /// Grub's name for the boot partition, written into the menu
    pub root_drive: String,

    /// Filesystem label of the boot partition
    pub label: String,

    pub inode_size: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            grub_disk_name: "hda".to_string(),
            root_drive: "(hd0,0)".to_string(),
            label: "boot".to_string(),
            inode_size: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub inode_size: u32,

    /// Table format used for named multi-volume images
    pub partition_table: PartitionTableType,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            inode_size: 128,
            partition_table: PartitionTableType::Disklabel,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub tools: ToolPaths,
    pub boot: BootConfig,
    pub volumes: VolumeConfig,
}

impl ImageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|error| SysError::Config(format!("{}: {error}", path.display())))?;
        let config: ImageConfig = toml::from_str(&raw)
            .map_err(|error| SysError::Config(format!("{}: {error}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `DISKIMG_CONFIG`, or fall back to defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(&PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for tool in Tool::ALL {
            if self.tools.program(tool).trim().is_empty() {
                return Err(SysError::Config(format!("no program configured for {tool:?}")));
            }
        }

        if self.boot.grub_disk_name.is_empty() || self.boot.grub_disk_name.contains('/') {
            return Err(SysError::Config(
                "boot.grub_disk_name must be a bare device-mapper name".to_string(),
            ));
        }

        for (key, inode_size) in [
            ("boot.inode_size", self.boot.inode_size),
            ("volumes.inode_size", self.volumes.inode_size),
        ] {
            if inode_size < 128 || !inode_size.is_power_of_two() {
                return Err(SysError::Config(format!(
                    "{key} must be a power of two of at least 128, got {inode_size}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: ImageConfig = toml::from_str(
            r#"
[tools]
grub_install = "/usr/sbin/grub-install"

[volumes]
partition_table = "msdos"
"#,
        )
        .expect("parse config");

        assert_eq!(config.tools.grub_install, "/usr/sbin/grub-install");
        assert_eq!(config.tools.parted, "parted");
        assert_eq!(config.boot, BootConfig::default());
        assert_eq!(config.volumes.partition_table, PartitionTableType::Msdos);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_inode_size_and_mapper_name() {
        let mut config = ImageConfig::default();
        config.volumes.inode_size = 100;
        assert!(matches!(config.validate(), Err(SysError::Config(_))));

        let mut config = ImageConfig::default();
        config.boot.grub_disk_name = "/dev/hda".to_string();
        assert!(matches!(config.validate(), Err(SysError::Config(_))));

        let mut config = ImageConfig::default();
        config.tools.mkfs = " ".to_string();
        assert!(matches!(config.validate(), Err(SysError::Config(_))));
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("diskimg.toml");
        fs::write(&path, "[boot]\ninode_size = 64\n").expect("write config");
        assert!(matches!(ImageConfig::load(&path), Err(SysError::Config(_))));

        fs::write(&path, "[boot]\nlabel = \"kernel\"\n").expect("write config");
        let config = ImageConfig::load(&path).expect("load config");
        assert_eq!(config.boot.label, "kernel");
    }

    #[test]
    fn tool_discovery_reports_the_missing_program() {
        let shell_only = ToolPaths {
            losetup: "sh".to_string(),
            dmsetup: "sh".to_string(),
            parted: "sh".to_string(),
            mkfs: "sh".to_string(),
            mount: "sh".to_string(),
            umount: "sh".to_string(),
            grub_install: "sh".to_string(),
            cp: "sh".to_string(),
        };
        assert!(shell_only.check_available().is_ok());

        let missing = ToolPaths {
            parted: "diskimg-no-such-parted".to_string(),
            ..shell_only
        };
        assert!(matches!(
            missing.check_available(),
            Err(SysError::ToolNotFound(ref program)) if program == "diskimg-no-such-parted"
        ));
    }
}
