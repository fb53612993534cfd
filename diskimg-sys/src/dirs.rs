// SPDX-License-Identifier: GPL-3.0-only

//! Measuring and copying volume source directories

use std::fs;
use std::path::Path;

use diskimg_types::ByteSize;
use tracing::debug;

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::Result;

/// Total length of the regular files below `root`
///
/// Symbolic links are not followed and count as nothing.
pub fn directory_size(root: &Path) -> Result<ByteSize> {
    let mut total = ByteSize::ZERO;
    let mut files = 0u64;
    let mut stack = vec![root.to_path_buf()];

    while let Some(directory) = stack.pop() {
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let metadata = fs::symlink_metadata(entry.path())?;

            if metadata.is_file() {
                total += ByteSize::from_bytes(metadata.len());
                files += 1;
            } else if metadata.is_dir() {
                stack.push(entry.path());
            }
        }
    }

    debug!(path = %root.display(), bytes = total.as_bytes(), files, "measured directory");
    Ok(total)
}

/// Recursively copy the contents of `source` (not the directory itself) into
/// `destination`, preserving ownership, modes and links
pub fn copy_directory_contents(shell: Shell<'_>, source: &Path, destination: &Path) -> Result<()> {
    let source = source.join(".");
    shell.run(
        Tool::Cp,
        &[
            "-a",
            &source.to_string_lossy(),
            &destination.to_string_lossy(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SysError;

    #[test]
    fn sums_nested_regular_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("a.bin"), vec![0u8; 1000]).expect("write");
        fs::create_dir_all(dir.path().join("etc/conf.d")).expect("mkdir");
        fs::write(dir.path().join("etc/conf.d/b.conf"), vec![1u8; 24]).expect("write");
        std::os::unix::fs::symlink("a.bin", dir.path().join("link")).expect("symlink");

        assert_eq!(
            directory_size(dir.path()).expect("measure"),
            ByteSize::from_bytes(1024)
        );
    }

    #[test]
    fn empty_directory_is_zero() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert_eq!(directory_size(dir.path()).expect("measure"), ByteSize::ZERO);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            directory_size(&dir.path().join("absent")),
            Err(SysError::Io(_))
        ));
    }
}
