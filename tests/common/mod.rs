//! Shared test fixtures.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use simplefs::disk::{Disk, DiskError, BLOCK_SIZE};
use simplefs::fs::FileSystem;

/// In-memory block device. Clones share the backing storage and the mount
/// counter, so an image survives a failed (consuming) mount attempt.
#[derive(Debug, Clone)]
pub struct MemDisk {
    inner: Arc<Mutex<Vec<u8>>>,
    num_blocks: usize,
    mounts: Arc<AtomicU32>,
}

impl MemDisk {
    pub fn new(num_blocks: usize) -> Self {
        MemDisk {
            inner: Arc::new(Mutex::new(vec![0u8; num_blocks * BLOCK_SIZE])),
            num_blocks,
            mounts: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Disk for MemDisk {
    fn open(_path: &str, num_blocks: usize) -> Result<Self, DiskError> {
        Ok(MemDisk::new(num_blocks))
    }

    fn size(&self) -> usize {
        self.num_blocks
    }

    fn mounted(&self) -> bool {
        self.mounts.load(Ordering::SeqCst) > 0
    }

    fn mount(&mut self) {
        self.mounts.fetch_add(1, Ordering::SeqCst);
    }

    fn unmount(&mut self) {
        let _ = self
            .mounts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| m.checked_sub(1));
    }

    fn read(&mut self, block_number: usize) -> Result<Vec<u8>, DiskError> {
        if block_number >= self.num_blocks {
            return Err(DiskError::InvalidBlock(block_number));
        }
        let data = self.inner.lock().unwrap();
        let start = block_number * BLOCK_SIZE;
        Ok(data[start..start + BLOCK_SIZE].to_vec())
    }

    fn write(&mut self, block_number: usize, buf: &[u8]) -> Result<(), DiskError> {
        if block_number >= self.num_blocks || buf.len() != BLOCK_SIZE {
            return Err(DiskError::InvalidBlock(block_number));
        }
        let mut data = self.inner.lock().unwrap();
        let start = block_number * BLOCK_SIZE;
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// Format a fresh image of `num_blocks` and mount it.
pub fn fresh_volume(num_blocks: usize) -> FileSystem<MemDisk> {
    let mut disk = MemDisk::new(num_blocks);
    FileSystem::format(&mut disk).unwrap();
    FileSystem::mount(disk, None).unwrap()
}

/// Deterministic non-repeating payload bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
