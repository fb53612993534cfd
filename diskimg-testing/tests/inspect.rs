// SPDX-License-Identifier: GPL-3.0-only

use diskimg_sys::{ImageConfig, VolumeImageAssembler, inspect_image};
use diskimg_testing::FakeHost;
use diskimg_testing::fixtures::Workspace;
use diskimg_types::{ByteSize, PartitionTableType, RawVolume};

#[test]
fn reports_committed_partitions_of_a_built_image() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![
        RawVolume::new(workspace.source_dir("a", 4096).unwrap()),
        RawVolume::with_size(
            workspace.source_dir("b", 0).unwrap(),
            ByteSize::from_megabytes(3),
        ),
    ];
    let image = workspace.image("data.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Disklabel)
        .unwrap();
    let partitions = inspect_image(&host, &config, &image).unwrap();

    let committed = host.partitions(&image);
    assert_eq!(partitions.len(), committed.len());
    for (info, expected) in partitions.iter().zip(&committed) {
        assert_eq!(info.index, expected.index);
        assert_eq!(info.offset.as_bytes(), expected.start);
        assert_eq!(info.end().as_bytes(), expected.end);
    }
    let names: Vec<&str> = partitions.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, vec!["loop1a", "loop1b"]);
    assert_eq!(partitions[1].size, ByteSize::from_megabytes(3));
    assert!(host.is_clean());

    let json = serde_json::to_value(&partitions).unwrap();
    assert_eq!(json[0]["name"], "loop1a");
    assert_eq!(json[1]["size"], 3 * 1024 * 1024);
}

#[test]
fn msdos_images_use_numbered_names() {
    let workspace = Workspace::new().unwrap();
    let volumes = vec![RawVolume::new(workspace.source_dir("a", 0).unwrap())];
    let image = workspace.image("data.img");
    let host = FakeHost::new();
    let config = ImageConfig::default();

    VolumeImageAssembler::new(&host, &config)
        .create_volumes(&image, &volumes, PartitionTableType::Msdos)
        .unwrap();
    let partitions = inspect_image(&host, &config, &image).unwrap();

    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].name, "loop11");
}

#[test]
fn unpartitioned_image_fails_to_inspect_and_detaches() {
    let workspace = Workspace::new().unwrap();
    let image = workspace.image("blank.img");
    std::fs::write(&image, vec![0u8; 4096]).unwrap();
    let host = FakeHost::new();

    assert!(inspect_image(&host, &ImageConfig::default(), &image).is_err());
    assert!(host.position("losetup -d /dev/loop0").is_some());
    assert!(host.is_clean());
}
