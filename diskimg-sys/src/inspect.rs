// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use diskimg_types::PartitionInfo;
use tracing::debug;

use crate::cmd::{CommandRunner, Shell};
use crate::config::ImageConfig;
use crate::error::Result;
use crate::loop_device;
use crate::partition::{partitioner_for, read_partition_table};

/// Report the partitions committed in `image`
///
/// Partition names follow the table's own naming scheme; a table parted does
/// not recognise as msdos or bsd is named after the configured volume table.
pub fn inspect_image(
    runner: &dyn CommandRunner,
    config: &ImageConfig,
    image: &Path,
) -> Result<Vec<PartitionInfo>> {
    let shell = Shell::new(runner, &config.tools);
    let image_loop = loop_device::attach(shell, image)?;

    let listing = read_partition_table(shell, image_loop.device())?;
    let table = listing
        .table_type()
        .unwrap_or(config.volumes.partition_table);
    debug!(image = %image.display(), label = %listing.label, table = %table, "inspecting");

    let naming = partitioner_for(table, shell, image_loop.device());
    let partitions: Result<Vec<PartitionInfo>> = listing
        .entries
        .iter()
        .map(|entry| {
            Ok(PartitionInfo {
                index: entry.index,
                name: naming.partition_name(image_loop.device(), entry.index)?,
                offset: entry.offset,
                size: entry.size,
            })
        })
        .collect();
    drop(naming);
    let partitions = partitions?;

    image_loop.release()?;
    Ok(partitions)
}
