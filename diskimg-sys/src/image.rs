// SPDX-License-Identifier: GPL-3.0-only

//! Backing files for disk images

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use diskimg_types::{ByteSize, SizeError};
use tracing::debug;

use crate::error::Result;

/// Create (or truncate) `path` as a sparse file of `size` rounded up to a
/// whole sector, and return the allocated size.
///
/// Only the last byte is written, so no intermediate blocks are materialized
/// on filesystems with sparse-file support.
pub fn create_sparse_file(path: &Path, size: ByteSize) -> Result<ByteSize> {
    let size = size.align_up_to_sector();
    if size.is_zero() {
        return Err(SizeError::InvalidSize("cannot allocate an empty image".to_string()).into());
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.seek(SeekFrom::Start(size.as_bytes() - 1))?;
    file.write_all(&[0])?;
    file.sync_all()?;

    debug!(image = %path.display(), size = size.as_bytes(), "allocated sparse file");
    Ok(size)
}
