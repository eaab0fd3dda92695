mod common;

use common::{fresh_volume, pattern, MemDisk};
use simplefs::disk::{Disk, BLOCK_SIZE};
use simplefs::fs::{FileSystem, FsError, MAX_FILE_SIZE, POINTERS_PER_INODE};

#[test]
fn format_lays_out_expected_geometry() {
    let fs = fresh_volume(200);
    let sb = fs.superblock();
    assert_eq!(sb.blocks, 200);
    assert_eq!(sb.inode_blocks, 20);
    assert_eq!(sb.dir_blocks, 2);
    assert_eq!(sb.inodes, 2560);
    assert_eq!(sb.protected, 0);
}

#[test]
fn format_and_mount_refuse_a_mounted_device() {
    let mut disk = MemDisk::new(100);
    FileSystem::format(&mut disk).unwrap();
    disk.mount();
    assert!(matches!(
        FileSystem::format(&mut disk),
        Err(FsError::Busy)
    ));
    assert!(matches!(
        FileSystem::mount(disk.clone(), None),
        Err(FsError::Busy)
    ));
}

#[test]
fn mount_rejects_bad_magic() {
    let disk = MemDisk::new(100);
    assert!(matches!(
        FileSystem::mount(disk, None),
        Err(FsError::BadMagic)
    ));
}

#[test]
fn mount_rejects_inconsistent_geometry() {
    let mut disk = MemDisk::new(100);
    FileSystem::format(&mut disk).unwrap();
    // Corrupt the inode_blocks field (bytes 8..12 of the superblock).
    let mut block = disk.read(0).unwrap();
    block[8] ^= 1;
    disk.write(0, &block).unwrap();
    assert!(matches!(
        FileSystem::mount(disk, None),
        Err(FsError::InvalidGeometry)
    ));
}

#[test]
fn create_starts_at_inumber_one() {
    let mut fs = fresh_volume(100);
    assert_eq!(fs.create().unwrap(), 1);
    assert_eq!(fs.create().unwrap(), 2);
    assert_eq!(fs.stat(1).unwrap(), 0);
}

#[test]
fn inumber_zero_is_never_allocated() {
    let mut fs = fresh_volume(100);
    assert!(matches!(fs.stat(0), Err(FsError::NotFound)));
    fs.create().unwrap();
    assert!(matches!(fs.stat(0), Err(FsError::NotFound)));
}

#[test]
fn create_exhausts_the_inode_table() {
    // 15 blocks: 2 inode blocks, 256 slots, one reserved.
    let mut fs = fresh_volume(15);
    for _ in 0..255 {
        fs.create().unwrap();
    }
    assert!(matches!(fs.create(), Err(FsError::NoSpace)));
}

#[test]
fn stat_of_missing_inode_fails() {
    let mut fs = fresh_volume(100);
    assert!(matches!(fs.stat(42), Err(FsError::NotFound)));
}

#[test]
fn write_then_read_round_trips() {
    let mut fs = fresh_volume(200);
    let inumber = fs.create().unwrap();
    let data = pattern(9000, 7);

    assert_eq!(fs.write(inumber, &data, 0).unwrap(), 9000);
    assert_eq!(fs.stat(inumber).unwrap(), 9000);

    let mut readback = Vec::new();
    assert_eq!(fs.read(inumber, &mut readback, 9000, 0).unwrap(), 9000);
    assert_eq!(readback, data);

    // 9000 bytes fit in three direct blocks; no indirect involvement.
    let inode = fs.load_inode(inumber).unwrap();
    assert!(inode.direct[0] != 0 && inode.direct[1] != 0 && inode.direct[2] != 0);
    assert_eq!(inode.direct[3], 0);
    assert_eq!(inode.direct[4], 0);
    assert_eq!(inode.indirect, 0);
}

#[test]
fn read_clamps_to_file_size_and_offset() {
    let mut fs = fresh_volume(100);
    let inumber = fs.create().unwrap();
    let data = pattern(1000, 3);
    fs.write(inumber, &data, 0).unwrap();

    let mut readback = Vec::new();
    assert_eq!(fs.read(inumber, &mut readback, 5000, 400).unwrap(), 600);
    assert_eq!(readback, data[400..]);

    let mut past_end = Vec::new();
    assert_eq!(fs.read(inumber, &mut past_end, 10, 1000).unwrap(), 0);
}

#[test]
fn unaligned_write_zero_fills_the_rest_of_the_block() {
    let mut fs = fresh_volume(100);
    let inumber = fs.create().unwrap();
    let data = pattern(50, 9);

    fs.write(inumber, &data, 100).unwrap();
    assert_eq!(fs.stat(inumber).unwrap(), 150);

    let mut readback = Vec::new();
    fs.read(inumber, &mut readback, 150, 0).unwrap();
    assert_eq!(&readback[..100], &[0u8; 100]);
    assert_eq!(&readback[100..], &data[..]);
}

#[test]
fn write_crosses_into_the_indirect_region() {
    let mut fs = fresh_volume(2000);
    let inumber = fs.create().unwrap();
    let data = pattern(5 * 1024 * 1024, 11);

    assert_eq!(fs.write(inumber, &data, 0).unwrap(), data.len());
    assert!(fs.load_inode(inumber).unwrap().indirect != 0);

    let mut readback = Vec::new();
    assert_eq!(
        fs.read(inumber, &mut readback, data.len(), 0).unwrap(),
        data.len()
    );
    assert_eq!(readback, data);

    // The direct/indirect seam reads as one contiguous stream.
    let seam = POINTERS_PER_INODE * BLOCK_SIZE;
    let mut across = Vec::new();
    assert_eq!(fs.read(inumber, &mut across, 200, seam - 100).unwrap(), 200);
    assert_eq!(across, data[seam - 100..seam + 100]);
}

#[test]
fn write_at_the_maximum_file_size_boundary() {
    let mut fs = fresh_volume(2000);
    let inumber = fs.create().unwrap();

    let data = pattern(MAX_FILE_SIZE, 13);
    assert_eq!(fs.write(inumber, &data, 0).unwrap(), MAX_FILE_SIZE);
    assert!(matches!(
        fs.write(inumber, &[0xaa], MAX_FILE_SIZE),
        Err(FsError::TooLarge)
    ));

    let mut tail = Vec::new();
    fs.read(inumber, &mut tail, 100, MAX_FILE_SIZE - 100).unwrap();
    assert_eq!(tail, data[MAX_FILE_SIZE - 100..]);
}

#[test]
fn filling_the_disk_returns_a_short_write() {
    // 20 blocks: 2 inode blocks, 1 dir block, 16 data blocks. Five direct
    // blocks plus the pointer block plus ten indirect blocks fill the data
    // region, so a 17-block write lands 15 blocks of payload.
    let mut fs = fresh_volume(20);
    let inumber = fs.create().unwrap();
    let data = pattern(17 * BLOCK_SIZE, 5);

    let written = fs.write(inumber, &data, 0).unwrap();
    assert_eq!(written, 15 * BLOCK_SIZE);
    assert_eq!(fs.stat(inumber).unwrap(), written);
    assert_eq!(fs.free_data_blocks(), 0);

    let mut readback = Vec::new();
    assert_eq!(
        fs.read(inumber, &mut readback, data.len(), 0).unwrap(),
        written
    );
    assert_eq!(readback, data[..written]);
}

#[test]
fn remove_reclaims_every_block() {
    let mut fs = fresh_volume(200);
    let before = fs.free_data_blocks();

    let inumber = fs.create().unwrap();
    fs.write(inumber, &pattern(10 * BLOCK_SIZE, 1), 0).unwrap();
    assert!(fs.free_data_blocks() < before);

    fs.remove(inumber).unwrap();
    assert_eq!(fs.free_data_blocks(), before);
    assert!(matches!(fs.stat(inumber), Err(FsError::NotFound)));
}

#[test]
fn remove_makes_the_inumber_reusable() {
    let mut fs = fresh_volume(100);
    let first = fs.create().unwrap();
    let second = fs.create().unwrap();
    fs.remove(first).unwrap();
    assert_eq!(fs.create().unwrap(), first);
    assert!(fs.stat(second).is_ok());
}

#[test]
fn write_to_an_unallocated_inode_allocates_in_place() {
    let mut fs = fresh_volume(100);
    let data = pattern(2000, 21);
    assert_eq!(fs.write(7, &data, 0).unwrap(), 2000);
    assert_eq!(fs.stat(7).unwrap(), 2000);

    let mut readback = Vec::new();
    fs.read(7, &mut readback, 2000, 0).unwrap();
    assert_eq!(readback, data);
}

#[test]
fn remount_rebuilds_identical_state() {
    let mut fs = fresh_volume(200);
    let inumber = fs.create().unwrap();
    let data = pattern(3 * BLOCK_SIZE + 17, 2);
    fs.write(inumber, &data, 0).unwrap();

    let free_before = fs.free_data_blocks();
    let inode_counters = fs.inode_counters().to_vec();
    let dir_counters = fs.dir_counters().to_vec();

    let disk = fs.exit();
    let mut fs = FileSystem::mount(disk, None).unwrap();

    assert_eq!(fs.free_data_blocks(), free_before);
    assert_eq!(fs.inode_counters(), &inode_counters[..]);
    assert_eq!(fs.dir_counters(), &dir_counters[..]);
    assert_eq!(fs.stat(inumber).unwrap(), data.len());

    let mut readback = Vec::new();
    fs.read(inumber, &mut readback, data.len(), 0).unwrap();
    assert_eq!(readback, data);
}

#[test]
fn mount_rejects_out_of_range_pointers() {
    let mut fs = fresh_volume(100);
    let inumber = fs.create().unwrap();
    fs.write(inumber, &pattern(100, 1), 0).unwrap();
    let mut disk = fs.exit();

    // Clobber the inode's first direct pointer (inode block 1, slot 1;
    // direct[0] sits at bytes 8..12 of the 32-byte record).
    let mut block = disk.read(1).unwrap();
    let offset = 32 + 8;
    block[offset..offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    disk.write(1, &block).unwrap();

    assert!(matches!(
        FileSystem::mount(disk, None),
        Err(FsError::CorruptImage)
    ));
}

#[test]
fn password_gates_the_mount() {
    let mut fs = fresh_volume(100);
    fs.set_password(None, "s3cret").unwrap();
    assert!(fs.protected());
    let disk = fs.exit();

    assert!(matches!(
        FileSystem::mount(disk.clone(), None),
        Err(FsError::AuthFailed)
    ));
    assert!(matches!(
        FileSystem::mount(disk.clone(), Some("wrong")),
        Err(FsError::AuthFailed)
    ));
    let fs = FileSystem::mount(disk, Some("s3cret")).unwrap();
    assert!(fs.protected());
}

#[test]
fn change_and_remove_password() {
    let mut fs = fresh_volume(100);
    fs.set_password(None, "first").unwrap();

    // Changing requires the current password.
    assert!(matches!(
        fs.set_password(Some("nope"), "second"),
        Err(FsError::AuthFailed)
    ));
    fs.set_password(Some("first"), "second").unwrap();

    let disk = fs.exit();
    assert!(matches!(
        FileSystem::mount(disk.clone(), Some("first")),
        Err(FsError::AuthFailed)
    ));
    let mut fs = FileSystem::mount(disk, Some("second")).unwrap();

    assert!(matches!(
        fs.remove_password("bogus"),
        Err(FsError::AuthFailed)
    ));
    fs.remove_password("second").unwrap();
    assert!(!fs.protected());

    let disk = fs.exit();
    FileSystem::mount(disk, None).unwrap();
}

#[test]
fn debug_reports_superblock_and_inodes() {
    let mut fs = fresh_volume(200);
    let inumber = fs.create().unwrap();
    fs.write(inumber, &pattern(9000, 4), 0).unwrap();

    let report = fs.debug_report().unwrap();
    assert!(report.contains("200 blocks"));
    assert!(report.contains("20 inode blocks"));
    assert!(report.contains("2560 inodes"));
    assert!(report.contains("Inode 1:"));
    assert!(report.contains("size: 9000 bytes"));

    // The standalone debug is password-gated like mount.
    fs.set_password(None, "pw").unwrap();
    let mut disk = fs.exit();
    assert!(matches!(
        FileSystem::debug(&mut disk, None),
        Err(FsError::AuthFailed)
    ));
    let report = FileSystem::debug(&mut disk, Some("pw")).unwrap();
    assert!(report.contains("Inode 1:"));
}
