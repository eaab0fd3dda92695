use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use log::info;
use thiserror::Error;

pub const BLOCK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("unable to open disk image")]
    ImageOpenFailure,
    #[error("disk image read failed")]
    ImageReadFailure,
    #[error("disk image write failed")]
    ImageWriteFailure,
    #[error("block {0} out of range")]
    InvalidBlock(usize),
}

/// Fixed-size array of 4096-byte blocks. Everything above the device adapter
/// talks in whole blocks; byte-granular access is the file system's job.
pub trait Disk
where
    Self: Sized,
{
    fn open(path: &str, num_blocks: usize) -> Result<Self, DiskError>;

    /// Number of blocks on the device.
    fn size(&self) -> usize;

    fn mounted(&self) -> bool;
    fn mount(&mut self);
    fn unmount(&mut self);

    fn read(&mut self, block_number: usize) -> Result<Vec<u8>, DiskError>;
    fn write(&mut self, block_number: usize, data: &[u8]) -> Result<(), DiskError>;
}

/// Disk emulator backed by an image file on the host.
#[derive(Debug)]
pub struct BlockDisk {
    file_handle: File,
    num_blocks: usize,
    num_reads: u64,
    num_writes: u64,
    num_mounts: u32,
}

impl Disk for BlockDisk {
    fn open(path: &str, num_blocks: usize) -> Result<Self, DiskError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file: File = match options.open(path) {
            Ok(f) => f,
            Err(_e) => return Err(DiskError::ImageOpenFailure),
        };

        // The image must span the whole device so reads of untouched
        // blocks succeed.
        let wanted = (num_blocks * BLOCK_SIZE) as u64;
        match file.metadata() {
            Ok(meta) if meta.len() >= wanted => {}
            Ok(_) => {
                if file.set_len(wanted).is_err() {
                    return Err(DiskError::ImageOpenFailure);
                }
            }
            Err(_e) => return Err(DiskError::ImageOpenFailure),
        }

        Ok(BlockDisk {
            file_handle: file,
            num_blocks,
            num_reads: 0,
            num_writes: 0,
            num_mounts: 0,
        })
    }

    fn size(&self) -> usize {
        self.num_blocks
    }

    fn mounted(&self) -> bool {
        self.num_mounts > 0
    }

    fn mount(&mut self) {
        self.num_mounts += 1;
    }

    fn unmount(&mut self) {
        if self.num_mounts > 0 {
            self.num_mounts -= 1;
        }
    }

    fn read(&mut self, block_number: usize) -> Result<Vec<u8>, DiskError> {
        if block_number >= self.num_blocks {
            return Err(DiskError::InvalidBlock(block_number));
        }

        if self
            .file_handle
            .seek(SeekFrom::Start((block_number * BLOCK_SIZE) as u64))
            .is_err()
        {
            return Err(DiskError::ImageReadFailure);
        }

        let mut data: Vec<u8> = vec![0; BLOCK_SIZE];
        if self.file_handle.read_exact(&mut data).is_err() {
            return Err(DiskError::ImageReadFailure);
        }

        self.num_reads += 1;
        Ok(data)
    }

    fn write(&mut self, block_number: usize, data: &[u8]) -> Result<(), DiskError> {
        if block_number >= self.num_blocks || data.len() != BLOCK_SIZE {
            return Err(DiskError::InvalidBlock(block_number));
        }

        if self
            .file_handle
            .seek(SeekFrom::Start((block_number * BLOCK_SIZE) as u64))
            .is_err()
        {
            return Err(DiskError::ImageWriteFailure);
        }

        if self.file_handle.write_all(data).is_err() {
            return Err(DiskError::ImageWriteFailure);
        }

        self.num_writes += 1;
        Ok(())
    }
}

impl Drop for BlockDisk {
    fn drop(&mut self) {
        info!(
            "{} disk block reads, {} disk block writes",
            self.num_reads, self.num_writes
        );
    }
}
