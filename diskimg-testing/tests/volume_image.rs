// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use diskimg_sys::volumes::{disk_size_for, single_volume_size, volume_sizes};
use diskimg_sys::{ImageConfig, SysError, VolumeImageAssembler};
use diskimg_testing::fixtures::Workspace;
use diskimg_testing::{FakeHost, FakePartition};
use diskimg_types::{
    ByteSize, DISK_OVERHEAD, FIRST_PARTITION_OFFSET, MEGABYTE, NamedVolume, PartitionTableType,
    RawVolume, SECTOR_SIZE,
};

fn assert_monotonic(partitions: &[FakePartition]) {
    assert_eq!(partitions[0].start, FIRST_PARTITION_OFFSET.as_bytes());
    for pair in partitions.windows(2) {
        assert!(pair[0].end <= pair[1].start, "{pair:?} overlap");
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

#[test]
fn three_volumes_are_laid_out_and_populated_in_order() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![
        RawVolume::new(workspace.source_dir("one", MEGABYTE as usize).unwrap()),
        RawVolume::new(workspace.source_dir("five", 5 * MEGABYTE as usize).unwrap()),
        RawVolume::new(workspace.source_dir("empty", 0).unwrap()),
    ];
    let image = workspace.image("data.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
        .unwrap();

    let sizes = volume_sizes(&volumes).unwrap();
    assert_eq!(
        sizes,
        vec![
            ByteSize::from_megabytes(3),
            ByteSize::from_megabytes(7),
            ByteSize::from_megabytes(2),
        ]
    );

    let partitions = host.partitions(&image);
    assert_eq!(partitions.len(), 3);
    assert_monotonic(&partitions);
    for (partition, size) in partitions.iter().zip(&sizes) {
        assert_eq!(partition.end - partition.start, size.as_bytes());
    }

    let total: u64 = sizes.iter().map(|size| size.as_bytes()).sum();
    let image_len = file_len(&image);
    assert_eq!(image_len, disk_size_for(&sizes).as_bytes());
    assert_eq!(image_len, 18_035_712);
    let unrounded = total + total / 10 + DISK_OVERHEAD.as_bytes();
    assert!(image_len >= unrounded && image_len - unrounded < SECTOR_SIZE);

    let one = host.filesystem(&image, partitions[0].start).unwrap();
    assert_eq!(one.file("payload.bin").unwrap().len(), 786_432);
    assert_eq!(one.file("nested/part.bin").unwrap().len(), 262_144);
    let five = host.filesystem(&image, partitions[1].start).unwrap();
    assert_eq!(five.file("payload.bin").unwrap().len(), 3_932_160);
    let empty = host.filesystem(&image, partitions[2].start).unwrap();
    assert!(empty.files.is_empty());

    assert_eq!(host.table_label(&image).as_deref(), Some("bsd"));
    assert!(
        host.position("dmsetup create loop0a --table 0 6144 linear /dev/loop0 4096")
            .is_some()
    );
    assert!(host.position("mkfs -I 128 -t ext2 /dev/mapper/loop0c").is_some());
    assert!(host.is_clean());
}

#[test]
fn population_starts_after_the_whole_table_is_committed() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![
        RawVolume::new(workspace.source_dir("a", 4096).unwrap()),
        RawVolume::new(workspace.source_dir("b", 4096).unwrap()),
    ];
    let image = workspace.image("data.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Msdos)
        .unwrap();

    let commands = host.commands();
    let last_mkpart = commands
        .iter()
        .rposition(|command| command.contains("mkpart"))
        .unwrap();
    let first_mkfs = host.position_starting_with("mkfs").unwrap();
    assert!(last_mkpart < first_mkfs);
    assert!(
        host.position("mkfs -I 128 -t ext2 /dev/mapper/loop01").unwrap()
            < host.position("mkfs -I 128 -t ext2 /dev/mapper/loop02").unwrap()
    );
}

#[test]
fn next_partition_starts_at_the_committed_end() {
    let workspace = Workspace::new().unwrap();
    let volumes: Vec<RawVolume> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            RawVolume::with_size(
                workspace.source_dir(name, 1024).unwrap(),
                ByteSize::from_sectors(1000),
            )
        })
        .collect();
    let image = workspace.image("snapped.img");
    let host = FakeHost::new().with_alignment(MEGABYTE);
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Msdos)
        .unwrap();

    let partitions = host.partitions(&image);
    assert_eq!(
        partitions,
        vec![
            FakePartition {
                index: 1,
                start: 2 * MEGABYTE,
                end: 3 * MEGABYTE,
            },
            FakePartition {
                index: 2,
                start: 3 * MEGABYTE,
                end: 4 * MEGABYTE,
            },
            FakePartition {
                index: 3,
                start: 4 * MEGABYTE,
                end: 5 * MEGABYTE,
            },
        ]
    );
    assert!(
        host.position_starting_with("parted -s -a none /dev/loop0 -- mkpart primary ext2 3145728B")
            .is_some()
    );
    assert!(host.is_clean());
}

#[test]
fn layout_is_monotonic_for_any_alignment() {
    let layouts: [&[u64]; 3] = [&[1], &[1, 1, 1], &[7, 1, 3, 12]];
    for alignment in [SECTOR_SIZE, 4096, MEGABYTE] {
        for layout in layouts {
            let workspace = Workspace::new().unwrap();
            let volumes: Vec<RawVolume> = layout
                .iter()
                .enumerate()
                .map(|(at, thousands)| {
                    RawVolume::with_size(
                        workspace.source_dir(&format!("v{at}"), 0).unwrap(),
                        ByteSize::from_sectors(thousands * 1000),
                    )
                })
                .collect();
            let image = workspace.image("disk.img");
            let host = FakeHost::new().with_alignment(alignment);
            let config = ImageConfig::default();

            VolumeImageAssembler::new(&host, &config)
                .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
                .unwrap();

            let partitions = host.partitions(&image);
            assert_eq!(partitions.len(), layout.len());
            assert_monotonic(&partitions);
            assert!(partitions.last().unwrap().end <= file_len(&image));
        }
    }
}

#[test]
fn hidden_partitions_are_a_count_mismatch() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![
        RawVolume::new(workspace.source_dir("a", 1024).unwrap()),
        RawVolume::new(workspace.source_dir("b", 1024).unwrap()),
    ];
    let image = workspace.image("data.img");
    let host = FakeHost::new().hiding_partitions_beyond(1);
    let config = ImageConfig::default();

    let error = VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
        .unwrap_err();

    assert!(matches!(
        error,
        SysError::PartitionCountMismatch {
            expected: 2,
            found: 1
        }
    ));
    assert_eq!(host.count("mkfs"), 0);
    assert!(host.is_clean());
    assert!(image.exists());
}

#[test]
fn unreported_partition_stops_the_layout_before_the_next_request() {
    let workspace = Workspace::new().unwrap();
    let volumes: Vec<RawVolume> = ["a", "b", "c"]
        .iter()
        .map(|name| RawVolume::new(workspace.source_dir(name, 1024).unwrap()))
        .collect();
    let image = workspace.image("data.img");
    let host = FakeHost::new().hiding_partitions_beyond(1);
    let config = ImageConfig::default();

    let error = VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
        .unwrap_err();

    assert!(matches!(
        error,
        SysError::PartitionCountMismatch {
            expected: 2,
            found: 1
        }
    ));
    assert_eq!(host.count("parted -s -a none"), 2);
    assert_monotonic(&host.partitions(&image));
    assert_eq!(host.count("mkfs"), 0);
    assert!(host.is_clean());
}

#[test]
fn format_failure_releases_partition_and_loop() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![RawVolume::new(workspace.source_dir("a", 1024).unwrap())];
    let image = workspace.image("data.img");
    let host = FakeHost::new().fail_when("mkfs");
    let config = ImageConfig::default();

    let error = VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
        .unwrap_err();

    assert!(matches!(error, SysError::CommandFailed { .. }));
    assert!(
        host.position("dmsetup remove loop0a").unwrap()
            < host.position("losetup -d /dev/loop0").unwrap()
    );
    assert!(host.is_clean());
}

#[test]
fn named_volumes_return_names_in_partition_order() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![
        NamedVolume::new(
            "/data",
            RawVolume::new(workspace.source_dir("data", 2048).unwrap()),
        ),
        NamedVolume::new(
            "/logs",
            RawVolume::new(workspace.source_dir("logs", 0).unwrap()),
        ),
    ];
    let image = workspace.image("named.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    let names = VolumeImageAssembler::new(&host, &config)
        .create_named_volumes(&image, &volumes)
        .unwrap();

    assert_eq!(names, vec!["/data".to_string(), "/logs".to_string()]);
    assert_eq!(host.table_label(&image).as_deref(), Some("bsd"));
    assert_eq!(host.partitions(&image).len(), 2);
    let data = host
        .filesystem(&image, host.partitions(&image)[0].start)
        .unwrap();
    assert_eq!(data.file("payload.bin").unwrap().len(), 1536);
}

#[test]
fn duplicate_names_are_rejected_up_front() {
    let workspace = Workspace::new().unwrap();
    let source = workspace.source_dir("data", 0).unwrap();
    let volumes = vec![
        NamedVolume::new("/data", RawVolume::new(&source)),
        NamedVolume::new("/data", RawVolume::new(&source)),
    ];
    let image = workspace.image("named.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    let error = VolumeImageAssembler::new(&host, &config)
        .create_named_volumes(&image, &volumes)
        .unwrap_err();

    assert!(matches!(error, SysError::DuplicateVolume(ref name) if name == "/data"));
    assert!(host.commands().is_empty());
    assert!(!image.exists());
}

#[test]
fn single_volume_has_no_partition_table() {
    let workspace = Workspace::new().unwrap();
    let volume = RawVolume::new(workspace.source_dir("app", MEGABYTE as usize).unwrap());
    let image = workspace.image("app.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_single_volume(&image, &volume)
        .unwrap();

    assert_eq!(file_len(&image), single_volume_size(&volume).unwrap().as_bytes());
    assert_eq!(host.table_label(&image), None);
    assert!(host.position("mkfs -I 128 -t ext2 /dev/loop0").is_some());
    let filesystem = host.filesystem(&image, 0).unwrap();
    assert_eq!(filesystem.file("payload.bin").unwrap().len(), 786_432);
    assert!(host.is_clean());
}

#[test]
fn table_override_keeps_the_duplicate_check() {
    let workspace = Workspace::new().unwrap();
    let source = workspace.source_dir("data", 0).unwrap();
    let image = workspace.image("named.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();
    let assembler = VolumeImageAssembler::new(&host, &config);

    let duplicated = vec![
        NamedVolume::new("/d", RawVolume::new(&source)),
        NamedVolume::new("/d", RawVolume::new(&source)),
    ];
    let error = assembler
        .create_named_volumes_with_table(&image, &duplicated, PartitionTableType::Msdos)
        .unwrap_err();
    assert!(matches!(error, SysError::DuplicateVolume(ref name) if name == "/d"));
    assert!(host.commands().is_empty());
    assert!(!image.exists());

    let distinct = vec![
        NamedVolume::new("/d", RawVolume::new(&source)),
        NamedVolume::new("/e", RawVolume::new(&source)),
    ];
    let names = assembler
        .create_named_volumes_with_table(&image, &distinct, PartitionTableType::Msdos)
        .unwrap();
    assert_eq!(names, vec!["/d".to_string(), "/e".to_string()]);
    assert_eq!(host.table_label(&image).as_deref(), Some("msdos"));
    assert!(host.position("mkfs -I 128 -t ext2 /dev/mapper/loop02").is_some());
    assert!(host.is_clean());
}
