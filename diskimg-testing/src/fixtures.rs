// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch area for one test: source trees, programs and the image file
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("diskimg-test-").tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn image(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// A dummy program binary of `bytes` bytes
    pub fn program(&self, bytes: usize) -> io::Result<PathBuf> {
        let path = self.dir.path().join("program");
        let contents: Vec<u8> = (0..bytes).map(|at| (at % 251) as u8).collect();
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// A source directory holding `bytes` of payload split across a top-level
    /// file and a nested one. An empty directory when `bytes` is zero.
    pub fn source_dir(&self, name: &str, bytes: usize) -> io::Result<PathBuf> {
        let root = self.dir.path().join("sources").join(name);
        fs::create_dir_all(&root)?;
        if bytes == 0 {
            return Ok(root);
        }

        let nested = bytes / 4;
        fs::write(root.join("payload.bin"), vec![0xa5; bytes - nested])?;
        fs::create_dir_all(root.join("nested"))?;
        fs::write(root.join("nested/part.bin"), vec![0x5a; nested])?;
        Ok(root)
    }
}
