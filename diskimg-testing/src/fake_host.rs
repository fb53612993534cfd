// SPDX-License-Identifier: GPL-3.0-only

//! An in-process stand-in for the host utilities an image build drives
//!
//! [`FakeHost`] implements [`CommandRunner`] and keeps just enough state to
//! behave like losetup, dmsetup, parted, mkfs, mount, umount, grub-install and
//! cp would on a real machine:
//! - loop devices and mapper names are a shared table, and detaching or
//!   removing a device that is still in use fails as "busy"
//! - partition tables and filesystems are stored per (image, byte offset), so
//!   they survive a detach and are visible again through a later attach
//! - mount points are real directories; files written into them are captured
//!   into the filesystem on unmount and restored on the next mount
//!
//! Image files themselves are real (sparse) files so sizes can be checked.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use diskimg_sys::{CommandOutcome, CommandRunner, Result, SysError, render};
use tracing::debug;

const SECTOR: u64 = 512;
const MAPPER_PREFIX: &str = "/dev/mapper/";

type Sim<T = String> = std::result::Result<T, String>;

/// Storage is addressed by image file and byte offset within it
type StorageKey = (PathBuf, u64);

/// A committed partition; `end` is exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakePartition {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeFilesystem {
    pub label: Option<String>,
    pub inode_size: Option<u32>,
    pub files: BTreeMap<PathBuf, Vec<u8>>,
}

impl FakeFilesystem {
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(Path::new(path)).map(Vec::as_slice)
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }
}

#[derive(Debug, Clone)]
struct DiskState {
    label: String,
    partitions: Vec<FakePartition>,
}

#[derive(Debug, Clone)]
struct Mapping {
    backing: String,
    offset: u64,
    size: u64,
}

#[derive(Debug)]
struct Mounted {
    device: String,
    key: StorageKey,
}

#[derive(Debug, Default)]
struct HostState {
    commands: Vec<String>,
    next_loop: u32,
    loops: BTreeMap<String, PathBuf>,
    maps: BTreeMap<String, Mapping>,
    mounts: BTreeMap<PathBuf, Mounted>,
    disks: BTreeMap<StorageKey, DiskState>,
    filesystems: BTreeMap<StorageKey, FakeFilesystem>,
    grub_installs: Vec<String>,
}

impl HostState {
    fn is_busy(&self, device: &str) -> bool {
        self.maps.values().any(|mapping| mapping.backing == device)
            || self.mounts.values().any(|mounted| mounted.device == device)
    }

    /// Image, byte offset and byte length behind a device node
    fn resolve(&self, device: &str) -> Sim<(PathBuf, u64, u64)> {
        if let Some(image) = self.loops.get(device) {
            let len = fs::metadata(image)
                .map_err(|error| format!("{device}: {error}"))?
                .len();
            return Ok((image.clone(), 0, len));
        }

        if let Some(mapping) = device
            .strip_prefix(MAPPER_PREFIX)
            .and_then(|name| self.maps.get(name))
        {
            let (image, base, _) = self.resolve(&mapping.backing)?;
            return Ok((image, base + mapping.offset, mapping.size));
        }

        Err(format!("{device}: No such device or address"))
    }
}

#[derive(Debug)]
pub struct FakeHost {
    state: RefCell<HostState>,
    alignment: u64,
    hide_partitions_beyond: Option<usize>,
    failures: Vec<String>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HostState::default()),
            alignment: SECTOR,
            hide_partitions_beyond: None,
            failures: Vec::new(),
        }
    }

    /// Round every committed partition end up to a multiple of `bytes`, the
    /// way label formats with coarse geometry do
    pub fn with_alignment(mut self, bytes: u64) -> Self {
        self.alignment = bytes.max(1);
        self
    }

    /// Report at most `count` partitions when the table is printed
    pub fn hiding_partitions_beyond(mut self, count: usize) -> Self {
        self.hide_partitions_beyond = Some(count);
        self
    }

    /// Fail every command whose rendered form contains `pattern`
    pub fn fail_when(mut self, pattern: impl Into<String>) -> Self {
        self.failures.push(pattern.into());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Position of the first command rendered exactly as `command`
    pub fn position(&self, command: &str) -> Option<usize> {
        self.state
            .borrow()
            .commands
            .iter()
            .position(|candidate| candidate == command)
    }

    /// Position of the first command starting with `prefix`
    pub fn position_starting_with(&self, prefix: &str) -> Option<usize> {
        self.state
            .borrow()
            .commands
            .iter()
            .position(|command| command.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    pub fn active_loops(&self) -> Vec<String> {
        self.state.borrow().loops.keys().cloned().collect()
    }

    pub fn active_mappings(&self) -> Vec<String> {
        self.state.borrow().maps.keys().cloned().collect()
    }

    pub fn active_mounts(&self) -> Vec<PathBuf> {
        self.state.borrow().mounts.keys().cloned().collect()
    }

    /// True when nothing is attached, mapped or mounted
    pub fn is_clean(&self) -> bool {
        let state = self.state.borrow();
        state.loops.is_empty() && state.maps.is_empty() && state.mounts.is_empty()
    }

    pub fn table_label(&self, image: &Path) -> Option<String> {
        self.state
            .borrow()
            .disks
            .get(&(image.to_path_buf(), 0))
            .map(|disk| disk.label.clone())
    }

    pub fn partitions(&self, image: &Path) -> Vec<FakePartition> {
        self.state
            .borrow()
            .disks
            .get(&(image.to_path_buf(), 0))
            .map(|disk| disk.partitions.clone())
            .unwrap_or_default()
    }

    /// Filesystem created at byte `offset` of `image`
    pub fn filesystem(&self, image: &Path, offset: u64) -> Option<FakeFilesystem> {
        self.state
            .borrow()
            .filesystems
            .get(&(image.to_path_buf(), offset))
            .cloned()
    }

    pub fn grub_installs(&self) -> Vec<String> {
        self.state.borrow().grub_installs.clone()
    }

    fn losetup(&self, args: &[&str]) -> Sim {
        let mut state = self.state.borrow_mut();
        match args {
            ["--find", "--show", image] => {
                let image = PathBuf::from(image);
                if !image.is_file() {
                    return Err(format!(
                        "{}: failed to set up loop device: No such file or directory",
                        image.display()
                    ));
                }
                let node = format!("/dev/loop{}", state.next_loop);
                state.next_loop += 1;
                state.loops.insert(node.clone(), image);
                Ok(format!("{node}\n"))
            }
            ["-d", device] => {
                if !state.loops.contains_key(*device) {
                    return Err(format!("{device}: detach failed: No such device or address"));
                }
                if state.is_busy(device) {
                    return Err(format!("{device}: detach failed: Device or resource busy"));
                }
                state.loops.remove(*device);
                Ok(String::new())
            }
            _ => Err(format!("losetup: unsupported arguments {args:?}")),
        }
    }

    fn dmsetup(&self, args: &[&str]) -> Sim {
        let mut state = self.state.borrow_mut();
        match args {
            ["create", name, "--table", table] => {
                if state.maps.contains_key(*name) {
                    return Err(format!(
                        "device-mapper: create ioctl on {name} failed: Device or resource busy"
                    ));
                }
                let fields: Vec<&str> = table.split_whitespace().collect();
                let ["0", size, "linear", backing, offset] = fields.as_slice() else {
                    return Err(format!("unsupported table '{table}'"));
                };
                let size: u64 = size.parse().map_err(|_| format!("bad length '{size}'"))?;
                let offset: u64 = offset
                    .parse()
                    .map_err(|_| format!("bad offset '{offset}'"))?;

                let (_, _, backing_size) = state.resolve(backing)?;
                if (offset + size) * SECTOR > backing_size {
                    return Err(format!("{name}: table exceeds {backing}"));
                }
                state.maps.insert(
                    name.to_string(),
                    Mapping {
                        backing: backing.to_string(),
                        offset: offset * SECTOR,
                        size: size * SECTOR,
                    },
                );
                Ok(String::new())
            }
            ["remove", name] => {
                if !state.maps.contains_key(*name) {
                    return Err(format!("{name}: No such device or address"));
                }
                if state.is_busy(&format!("{MAPPER_PREFIX}{name}")) {
                    return Err(format!("{name}: Device or resource busy"));
                }
                state.maps.remove(*name);
                Ok(String::new())
            }
            _ => Err(format!("dmsetup: unsupported arguments {args:?}")),
        }
    }

    fn parted(&self, args: &[&str]) -> Sim {
        let mut rest = args;
        loop {
            match rest {
                ["-s" | "-m", tail @ ..] => rest = tail,
                ["-a", _, tail @ ..] => rest = tail,
                _ => break,
            }
        }
        let [device, command @ ..] = rest else {
            return Err("parted: no device given".to_string());
        };
        let command = match command {
            ["--", tail @ ..] => tail,
            other => other,
        };

        let mut state = self.state.borrow_mut();
        let (image, offset, size) = state.resolve(device)?;
        let key = (image, offset);
        let unrecognised = || format!("Error: {device}: unrecognised disk label");

        match command {
            ["mklabel", label] => {
                state.disks.insert(
                    key,
                    DiskState {
                        label: label.to_string(),
                        partitions: Vec::new(),
                    },
                );
                Ok(String::new())
            }
            ["mkpart", fields @ ..] if fields.len() >= 2 => {
                let start = parse_bytes(fields[fields.len() - 2])?;
                let last = match fields[fields.len() - 1] {
                    "-1s" => size - 1,
                    end => parse_bytes(end)?,
                };
                if start % SECTOR != 0 || last >= size || start > last {
                    return Err(format!(
                        "Error: {start}B..{last}B is outside of the device {device}"
                    ));
                }
                let end = round_up(last + 1, self.alignment).min(size);

                let disk = state.disks.get_mut(&key).ok_or_else(unrecognised)?;
                if let Some(clash) = disk
                    .partitions
                    .iter()
                    .find(|partition| start < partition.end && partition.start < end)
                {
                    return Err(format!(
                        "Error: requested partition overlaps partition {}",
                        clash.index
                    ));
                }
                let index = disk
                    .partitions
                    .iter()
                    .map(|partition| partition.index)
                    .max()
                    .unwrap_or(0)
                    + 1;
                disk.partitions.push(FakePartition { index, start, end });
                Ok(String::new())
            }
            ["unit", "B", "print"] => {
                let disk = state.disks.get(&key).ok_or_else(unrecognised)?;
                let mut out = format!(
                    "BYT;\n{device}:{size}B:loopback:512:512:{}:Fake disk:;\n",
                    disk.label
                );
                let visible = self.hide_partitions_beyond.unwrap_or(usize::MAX);
                for partition in disk.partitions.iter().take(visible) {
                    out.push_str(&format!(
                        "{}:{}B:{}B:{}B:ext2::;\n",
                        partition.index,
                        partition.start,
                        partition.end - 1,
                        partition.end - partition.start
                    ));
                }
                Ok(out)
            }
            _ => Err(format!("parted: unsupported arguments {args:?}")),
        }
    }

    fn mkfs(&self, args: &[&str]) -> Sim {
        let mut label = None;
        let mut inode_size = None;
        let mut fs_type = None;
        let mut device = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match *arg {
                "-L" => label = iter.next().map(|value| value.to_string()),
                "-I" => inode_size = iter.next().and_then(|value| value.parse().ok()),
                "-t" => fs_type = iter.next().copied(),
                other => device = Some(other),
            }
        }
        if fs_type != Some("ext2") {
            return Err(format!("mkfs: unsupported filesystem type {fs_type:?}"));
        }
        let device = device.ok_or_else(|| "mkfs: no device specified".to_string())?;

        let mut state = self.state.borrow_mut();
        let (image, offset, _) = state.resolve(device)?;
        if state.mounts.values().any(|mounted| mounted.device == device) {
            return Err(format!("{device} is mounted; will not make a filesystem here!"));
        }
        state.filesystems.insert(
            (image, offset),
            FakeFilesystem {
                label,
                inode_size,
                files: BTreeMap::new(),
            },
        );
        Ok(String::new())
    }

    fn mount(&self, args: &[&str]) -> Sim {
        let [device, target] = args else {
            return Err(format!("mount: unsupported arguments {args:?}"));
        };
        let target = PathBuf::from(target);
        if !target.is_dir() {
            return Err(format!("mount: {}: mount point does not exist", target.display()));
        }

        let mut state = self.state.borrow_mut();
        let (image, offset, _) = state.resolve(device)?;
        let key = (image, offset);
        let filesystem = state
            .filesystems
            .get(&key)
            .ok_or_else(|| format!("mount: {device}: wrong fs type, bad option, bad superblock"))?;
        write_tree(&target, &filesystem.files).map_err(|error| error.to_string())?;

        state.mounts.insert(
            target,
            Mounted {
                device: device.to_string(),
                key,
            },
        );
        Ok(String::new())
    }

    fn umount(&self, args: &[&str]) -> Sim {
        let [target] = args else {
            return Err(format!("umount: unsupported arguments {args:?}"));
        };
        let target = PathBuf::from(target);

        let mut state = self.state.borrow_mut();
        let mounted = state
            .mounts
            .remove(&target)
            .ok_or_else(|| format!("umount: {}: not mounted", target.display()))?;

        let files = read_tree(&target).map_err(|error| error.to_string())?;
        clear_dir(&target).map_err(|error| error.to_string())?;
        if let Some(filesystem) = state.filesystems.get_mut(&mounted.key) {
            filesystem.files = files;
        }
        Ok(String::new())
    }

    fn grub_install(&self, args: &[&str]) -> Sim {
        let ["--no-floppy", root, device] = args else {
            return Err(format!("grub-install: unsupported arguments {args:?}"));
        };
        let root = root
            .strip_prefix("--root-directory=")
            .map(PathBuf::from)
            .ok_or_else(|| "grub-install: missing --root-directory".to_string())?;

        let mut state = self.state.borrow_mut();
        if !state.mounts.contains_key(&root) {
            return Err(format!("grub-install: {} is not a mount point", root.display()));
        }
        state.resolve(device)?;

        let device_map = root.join("boot/grub/device.map");
        let map = fs::read_to_string(&device_map)
            .map_err(|error| format!("{}: {error}", device_map.display()))?;
        if !map.contains(device) {
            return Err(format!("grub-install: {device} is not in the device map"));
        }

        fs::write(root.join("boot/grub/stage1"), format!("stage1 for {device}\n"))
            .map_err(|error| error.to_string())?;
        state.grub_installs.push(device.to_string());
        Ok(String::new())
    }

    fn cp(&self, args: &[&str]) -> Sim {
        let ["-a", source, destination] = args else {
            return Err(format!("cp: unsupported arguments {args:?}"));
        };
        let source = source
            .strip_suffix("/.")
            .ok_or_else(|| format!("cp: expected directory contents, got '{source}'"))?;
        let destination = Path::new(destination);

        if !self.state.borrow().mounts.contains_key(destination) {
            return Err(format!("cp: {} is not a mount point", destination.display()));
        }
        copy_tree(Path::new(source), destination).map_err(|error| error.to_string())?;
        Ok(String::new())
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutcome> {
        let command = render(program, args);
        debug!(command = %command, "fake host");
        self.state.borrow_mut().commands.push(command.clone());

        if self.failures.iter().any(|pattern| command.contains(pattern.as_str())) {
            return Err(SysError::CommandFailed {
                command,
                stderr: "injected failure".to_string(),
            });
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let tool = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let result = match tool.as_str() {
            "losetup" => self.losetup(&args),
            "dmsetup" => self.dmsetup(&args),
            "parted" => self.parted(&args),
            "mkfs" => self.mkfs(&args),
            "mount" => self.mount(&args),
            "umount" => self.umount(&args),
            "grub-install" => self.grub_install(&args),
            "cp" => self.cp(&args),
            other => Err(format!("{other}: command not found")),
        };

        match result {
            Ok(stdout) => Ok(CommandOutcome {
                command,
                stdout,
                stderr: String::new(),
            }),
            Err(stderr) => Err(SysError::CommandFailed { command, stderr }),
        }
    }
}

fn parse_bytes(value: &str) -> Sim<u64> {
    value
        .strip_suffix('B')
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| format!("Error: invalid location '{value}'"))
}

fn round_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Regular files below `root`, keyed by relative path
fn read_tree(root: &Path) -> io::Result<BTreeMap<PathBuf, Vec<u8>>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(directory) = stack.pop() {
        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|error| io::Error::other(error.to_string()))?
                    .to_path_buf();
                files.insert(relative, fs::read(&path)?);
            }
        }
    }
    Ok(files)
}

fn write_tree(root: &Path, files: &BTreeMap<PathBuf, Vec<u8>>) -> io::Result<()> {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(())
}

fn clear_dir(root: &Path) -> io::Result<()> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    let mut stack = vec![source.to_path_buf()];

    while let Some(directory) = stack.pop() {
        let target = destination.join(
            directory
                .strip_prefix(source)
                .map_err(|error| io::Error::other(error.to_string()))?,
        );
        fs::create_dir_all(&target)?;

        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(name) = path.file_name() {
                fs::copy(&path, target.join(name))?;
            }
        }
    }
    Ok(())
}
