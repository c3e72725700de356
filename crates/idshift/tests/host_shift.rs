//! Shifts real trees on the host filesystem. Needs CAP_CHOWN.

#![cfg(feature = "privileged")]

use std::fs;
use std::os::unix::fs::MetadataExt;

use tempfile::tempdir;

use idshift::IdmapSet;

fn owner(path: &std::path::Path) -> (u32, u32) {
    let md = fs::symlink_metadata(path).unwrap();
    (md.uid(), md.gid())
}

#[test_log::test]
fn test_rootfs_shift_and_unshift() {
    let temp = tempdir().unwrap();
    let rootfs = temp.path().join("rootfs");
    fs::create_dir_all(rootfs.join("usr/bin")).unwrap();
    fs::write(rootfs.join("usr/bin/true"), "elf").unwrap();
    std::os::unix::fs::symlink("true", rootfs.join("usr/bin/alias")).unwrap();
    std::os::unix::fs::lchown(rootfs.join("usr/bin/true"), Some(1000), Some(1000)).unwrap();

    let mut set = IdmapSet::new();
    set.append("b:0:100000:65536").unwrap();

    let records = set.shift_rootfs(&rootfs, None).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(owner(&rootfs), (100_000, 100_000));
    assert_eq!(owner(&rootfs.join("usr/bin/true")), (101_000, 101_000));
    assert_eq!(owner(&rootfs.join("usr/bin/alias")), (100_000, 100_000));

    set.unshift_rootfs(&rootfs, None).unwrap();
    assert_eq!(owner(&rootfs), (0, 0));
    assert_eq!(owner(&rootfs.join("usr/bin/true")), (1000, 1000));
}

#[test]
fn test_single_file_shift() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("file");
    fs::write(&file, "data").unwrap();
    std::os::unix::fs::lchown(&file, Some(0), Some(0)).unwrap();

    let mut set = IdmapSet::new();
    set.append("u:0:200000:1").unwrap();

    let records = set.shift_file(&file).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].new_gid, -1);
    assert_eq!(owner(&file), (200_000, 0));
}
