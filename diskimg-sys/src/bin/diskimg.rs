// SPDX-License-Identifier: GPL-3.0-only

//! diskimg - build bootable and data disk images for unikernel VMs

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use diskimg_sys::{
    BootImageAssembler, ImageConfig, SystemRunner, VolumeImageAssembler, inspect_image,
};
use diskimg_types::{ByteSize, NamedVolume, PartitionTableType, RawVolume};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "diskimg", version)]
#[command(about = "Build disk images for unikernel virtual machines")]
struct Cli {
    /// TOML configuration file (defaults to $DISKIMG_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every external command
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a bootable image holding a program and grub
    Boot {
        image: PathBuf,
        #[arg(long)]
        program: PathBuf,
        #[arg(long, default_value = "")]
        cmdline: String,
        /// Disk size, e.g. 64M or 1GiB
        #[arg(long)]
        size: ByteSize,
    },
    /// Build an unpartitioned image from one directory
    Volume {
        image: PathBuf,
        source: PathBuf,
        #[arg(long)]
        size: Option<ByteSize>,
    },
    /// Build a partitioned image with one partition per volume
    Volumes {
        image: PathBuf,
        /// Volume as NAME=DIR or NAME=DIR@SIZE, in partition order
        #[arg(long = "volume", required = true, value_parser = parse_named_volume)]
        volumes: Vec<NamedVolume>,
        /// Overrides the configured partition table type
        #[arg(long)]
        table: Option<PartitionTableType>,
    },
    /// List the partitions of an image
    Inspect {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn parse_named_volume(value: &str) -> std::result::Result<NamedVolume, String> {
    let (name, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=DIR[@SIZE], got '{value}'"))?;
    if name.is_empty() {
        return Err(format!("missing volume name in '{value}'"));
    }

    let volume = match rest.rsplit_once('@') {
        Some((path, size)) => {
            let size: ByteSize = size.parse().map_err(|error| format!("{error}"))?;
            RawVolume::with_size(path, size)
        }
        None => RawVolume::new(rest),
    };
    Ok(NamedVolume::new(name, volume))
}

fn load_config(path: Option<&PathBuf>) -> Result<ImageConfig> {
    let config = match path {
        Some(path) => ImageConfig::load(path)?,
        None => ImageConfig::from_env()?,
    };
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "diskimg=debug,diskimg_sys=debug,warn"
    } else {
        "diskimg=info,diskimg_sys=info,warn"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("diskimg must run as root");
        bail!("loop devices and device-mapper require root privileges");
    }

    let config = load_config(cli.config.as_ref()).context("loading configuration")?;
    config.tools.check_available()?;
    let runner = SystemRunner;

    match cli.command {
        Command::Boot {
            image,
            program,
            cmdline,
            size,
        } => {
            BootImageAssembler::new(&runner, &config)
                .create_boot_image_with_size(&image, &program, &cmdline, size)
                .with_context(|| format!("building boot image {}", image.display()))?;
        }
        Command::Volume {
            image,
            source,
            size,
        } => {
            let volume = RawVolume::with_size(source, size.unwrap_or_default());
            VolumeImageAssembler::new(&runner, &config)
                .create_single_volume(&image, &volume)
                .with_context(|| format!("building volume image {}", image.display()))?;
        }
        Command::Volumes {
            image,
            volumes,
            table,
        } => {
            let assembler = VolumeImageAssembler::new(&runner, &config);
            let table = table.unwrap_or(config.volumes.partition_table);
            let names = assembler
                .create_named_volumes_with_table(&image, &volumes, table)
                .with_context(|| format!("building volume image {}", image.display()))?;
            for (index, name) in names.iter().enumerate() {
                println!("{}\t{}", index + 1, name);
            }
        }
        Command::Inspect { image, json } => {
            let partitions = inspect_image(&runner, &config, &image)
                .with_context(|| format!("inspecting {}", image.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&partitions)?);
            } else {
                for partition in &partitions {
                    println!(
                        "{}\t{}\t{}\t{}",
                        partition.index,
                        partition.name,
                        partition.offset.to_parted_format(),
                        partition.size.pretty()
                    );
                }
            }
        }
    }

    Ok(())
}
