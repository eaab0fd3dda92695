//! SimpleFS: a disk-image-backed file system.
//!
//! The image is a fixed array of 4096-byte blocks: a superblock, an inode
//! table (10% of the device) with five direct pointers plus one indirect
//! pointer block per inode, a data region, and a directory region (1% of the
//! device) allocated in reverse from the last block. [`fs::FileSystem`] owns
//! the device between mount and exit and keeps a block bitmap, per-block
//! inode/directory counters and the current directory in core, all rebuilt
//! from the image at mount.
//!
//! The `sfssh` binary wraps the library in an interactive shell.

pub mod dirs;
pub mod disk;
pub mod fs;

pub use dirs::{DirEntryInfo, EntryKind};
pub use disk::{BlockDisk, Disk, DiskError, BLOCK_SIZE};
pub use fs::{FileSystem, FsError, Inode, Result, Superblock, MAX_FILE_SIZE};
