use std::cmp::{max, min};
use std::fmt::Write as _;

use log::info;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::disk::{Disk, DiskError, BLOCK_SIZE};

pub const MAGIC_NUMBER: u32 = 0xf0f0_3410;
pub const INODES_PER_BLOCK: usize = 128;
pub const POINTERS_PER_INODE: usize = 5;
pub const POINTERS_PER_BLOCK: usize = 1024;
pub const NAMESIZE: usize = 16;
pub const ENTRIES_PER_DIR: usize = 7;
pub const DIR_PER_BLOCK: usize = 8;
pub const PASSWORD_HASH_LEN: usize = 257;

pub const INODE_SIZE: usize = BLOCK_SIZE / INODES_PER_BLOCK;
pub const DIR_SLOT_SIZE: usize = BLOCK_SIZE / DIR_PER_BLOCK;

/// Largest file an inode can address: five direct blocks plus one full
/// pointer block of indirect blocks.
pub const MAX_FILE_SIZE: usize = (POINTERS_PER_INODE + POINTERS_PER_BLOCK) * BLOCK_SIZE;

const INODE_BLOCKS_FRACTION: f64 = 0.10;
const DIR_BLOCKS_FRACTION: f64 = 0.01;

/// Dirent type tag for directories.
pub const ENTRY_DIR: u8 = 0;
/// Dirent type tag for files.
pub const ENTRY_FILE: u8 = 1;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("file system is not mounted")]
    NotMounted,
    #[error("device is busy")]
    Busy,
    #[error("bad magic number")]
    BadMagic,
    #[error("superblock geometry is inconsistent")]
    InvalidGeometry,
    #[error("image is corrupt: block pointer out of range")]
    CorruptImage,
    #[error("authentication failed")]
    AuthFailed,
    #[error("no such inode or entry")]
    NotFound,
    #[error("out of free blocks or inodes")]
    NoSpace,
    #[error("write exceeds maximum file size")]
    TooLarge,
    #[error("directory table is full")]
    Full,
    #[error("name already exists")]
    Duplicate,
    #[error("invalid name")]
    InvalidName,
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error("host file error: {0}")]
    HostIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Block 0. The password hash is a NUL-terminated 64-character lowercase hex
/// string when `protected` is set, all zeroes otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u32,
    pub blocks: u32,
    pub inode_blocks: u32,
    pub dir_blocks: u32,
    pub inodes: u32,
    pub protected: u32,
    #[serde(with = "BigArray")]
    pub password_hash: [u8; PASSWORD_HASH_LEN],
}

/// 32-byte inode record. Pointer value 0 means unallocated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Inode {
    pub valid: u32,
    pub size: u32,
    pub direct: [u32; POINTERS_PER_INODE],
    pub indirect: u32,
}

impl Inode {
    pub fn blank() -> Self {
        Inode {
            valid: 0,
            size: 0,
            direct: [0; POINTERS_PER_INODE],
            indirect: 0,
        }
    }
}

/// One entry in a directory table. `kind` is [`ENTRY_DIR`] or [`ENTRY_FILE`];
/// `inum` is a directory inum for the former and a file inumber for the
/// latter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Dirent {
    pub kind: u8,
    pub valid: u8,
    pub inum: u32,
    pub name: [u8; NAMESIZE],
}

impl Dirent {
    pub fn blank() -> Self {
        Dirent {
            kind: 0,
            valid: 0,
            inum: 0,
            name: [0; NAMESIZE],
        }
    }
}

/// Fixed-capacity directory record. Eight of these live in every directory
/// block, at [`DIR_SLOT_SIZE`] strides. The record's identity is its `inum`:
/// `dir_block_index * DIR_PER_BLOCK + slot`, with dir block 0 at the highest
/// physical block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Directory {
    pub valid: u16,
    pub inum: u32,
    pub name: [u8; NAMESIZE],
    pub table: [Dirent; ENTRIES_PER_DIR],
}

impl Directory {
    pub fn blank() -> Self {
        Directory {
            valid: 0,
            inum: 0,
            name: [0; NAMESIZE],
            table: [Dirent::blank(); ENTRIES_PER_DIR],
        }
    }
}

// ---------------------------------------------------------------------------
// Block codec: every frame is encoded with bincode's fixed-int little-endian
// representation at a fixed offset inside a 4096-byte buffer. Pointer blocks
// are plain arrays of little-endian words.

pub(crate) fn decode_superblock(block: &[u8]) -> Result<Superblock> {
    bincode::deserialize(block).map_err(|_| FsError::CorruptImage)
}

pub(crate) fn encode_superblock(sb: &Superblock) -> Result<Vec<u8>> {
    let mut bytes = bincode::serialize(sb).map_err(|_| FsError::CorruptImage)?;
    bytes.resize(BLOCK_SIZE, 0);
    Ok(bytes)
}

pub(crate) fn inode_at(block: &[u8], slot: usize) -> Result<Inode> {
    let offset = slot * INODE_SIZE;
    bincode::deserialize(&block[offset..offset + INODE_SIZE]).map_err(|_| FsError::CorruptImage)
}

pub(crate) fn put_inode(block: &mut [u8], slot: usize, inode: &Inode) -> Result<()> {
    let bytes = bincode::serialize(inode).map_err(|_| FsError::CorruptImage)?;
    let offset = slot * INODE_SIZE;
    block[offset..offset + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

pub(crate) fn dir_at(block: &[u8], slot: usize) -> Result<Directory> {
    let offset = slot * DIR_SLOT_SIZE;
    bincode::deserialize(&block[offset..offset + DIR_SLOT_SIZE]).map_err(|_| FsError::CorruptImage)
}

pub(crate) fn put_dir(block: &mut [u8], slot: usize, dir: &Directory) -> Result<()> {
    let bytes = bincode::serialize(dir).map_err(|_| FsError::CorruptImage)?;
    let offset = slot * DIR_SLOT_SIZE;
    block[offset..offset + DIR_SLOT_SIZE].fill(0);
    block[offset..offset + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

pub(crate) fn pointers_from(block: &[u8]) -> Vec<u32> {
    block
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

pub(crate) fn pointers_into(pointers: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(BLOCK_SIZE);
    for p in pointers {
        bytes.extend_from_slice(&p.to_le_bytes());
    }
    bytes
}

fn inode_blocks_for(blocks: u32) -> u32 {
    round::round_up(blocks as f64 * INODE_BLOCKS_FRACTION, 0) as u32
}

fn dir_blocks_for(blocks: u32) -> u32 {
    round::round_up(blocks as f64 * DIR_BLOCKS_FRACTION, 0) as u32
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn stored_hash(sb: &Superblock) -> &[u8] {
    let end = sb
        .password_hash
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(PASSWORD_HASH_LEN);
    &sb.password_hash[..end]
}

fn check_password(sb: &Superblock, password: Option<&str>) -> Result<()> {
    if sb.protected == 0 {
        return Ok(());
    }
    match password {
        Some(pass) if hash_password(pass).as_bytes() == stored_hash(sb) => Ok(()),
        _ => Err(FsError::AuthFailed),
    }
}

/// A mounted volume. Owns the device exclusively from [`FileSystem::mount`]
/// until [`FileSystem::exit`]; all in-core state is rebuilt from the image on
/// every mount.
pub struct FileSystem<D: Disk> {
    pub(crate) disk: D,
    pub(crate) metadata: Superblock,
    /// One bit per block, true = in use. Reconstructed at mount by walking
    /// every valid inode and reserving the whole directory region.
    pub(crate) used_blocks: Vec<bool>,
    /// Valid inodes per inode block, so allocation can skip full blocks.
    pub(crate) inode_counter: Vec<u32>,
    /// Valid directory records per directory block.
    pub(crate) dir_counter: Vec<u32>,
    pub(crate) curr_dir: Directory,
}

impl<D: Disk> FileSystem<D> {
    /// Lay out a fresh file system across the whole device. The image ends up
    /// with an empty inode table, a zeroed data region and a directory region
    /// holding only the root directory.
    pub fn format(disk: &mut D) -> Result<()> {
        if disk.mounted() {
            return Err(FsError::Busy);
        }

        let blocks = disk.size() as u32;
        let inode_blocks = inode_blocks_for(blocks);
        let dir_blocks = dir_blocks_for(blocks);
        if 1 + inode_blocks + dir_blocks >= blocks {
            return Err(FsError::InvalidGeometry);
        }

        let sb = Superblock {
            magic: MAGIC_NUMBER,
            blocks,
            inode_blocks,
            dir_blocks,
            inodes: inode_blocks * INODES_PER_BLOCK as u32,
            protected: 0,
            password_hash: [0; PASSWORD_HASH_LEN],
        };
        disk.write(0, &encode_superblock(&sb)?)?;

        // A zeroed buffer doubles as 128 invalid inodes, a data block, or
        // eight invalid directory records.
        let zero = vec![0u8; BLOCK_SIZE];
        for i in 1..blocks - dir_blocks {
            disk.write(i as usize, &zero)?;
        }
        for i in blocks - dir_blocks..blocks - 1 {
            disk.write(i as usize, &zero)?;
        }

        // Root lives at dir block 0, slot 0: physical block `blocks - 1`.
        let mut root = Directory::blank();
        root.valid = 1;
        root.inum = 0;
        root.name[0] = b'/';
        let mut self_entry = Dirent::blank();
        self_entry.kind = ENTRY_DIR;
        self_entry.valid = 1;
        self_entry.inum = 0;
        self_entry.name[0] = b'.';
        root.table[0] = self_entry;
        self_entry.name[1] = b'.';
        root.table[1] = self_entry;

        let mut root_block = vec![0u8; BLOCK_SIZE];
        put_dir(&mut root_block, 0, &root)?;
        disk.write(blocks as usize - 1, &root_block)?;

        info!(
            "formatted {} blocks: {} inode blocks, {} dir blocks",
            blocks, inode_blocks, dir_blocks
        );
        Ok(())
    }

    /// Report whether the image carries a password, so callers can prompt
    /// before attempting [`FileSystem::mount`] or [`FileSystem::debug`].
    pub fn is_protected(disk: &mut D) -> Result<bool> {
        let sb = decode_superblock(&disk.read(0)?)?;
        if sb.magic != MAGIC_NUMBER {
            return Err(FsError::BadMagic);
        }
        Ok(sb.protected == 1)
    }

    /// Validate the superblock, check the password, and rebuild the in-core
    /// bitmap and counters from the on-disk inode table and directory region.
    /// The device is claimed only after everything checks out; on any error
    /// the image is left untouched.
    pub fn mount(mut disk: D, password: Option<&str>) -> Result<Self> {
        if disk.mounted() {
            return Err(FsError::Busy);
        }

        let sb = decode_superblock(&disk.read(0)?)?;
        if sb.magic != MAGIC_NUMBER {
            return Err(FsError::BadMagic);
        }
        if sb.blocks as usize != disk.size()
            || sb.inode_blocks != inode_blocks_for(sb.blocks)
            || sb.dir_blocks != dir_blocks_for(sb.blocks)
            || sb.inodes != sb.inode_blocks * INODES_PER_BLOCK as u32
        {
            return Err(FsError::InvalidGeometry);
        }
        check_password(&sb, password)?;

        let blocks = sb.blocks as usize;
        let mut used_blocks = vec![false; blocks];
        let mut inode_counter = vec![0u32; sb.inode_blocks as usize];
        used_blocks[0] = true;

        for i in 1..=sb.inode_blocks as usize {
            let block = disk.read(i)?;
            for j in 0..INODES_PER_BLOCK {
                let inode = inode_at(&block, j)?;
                if inode.valid == 0 {
                    continue;
                }
                inode_counter[i - 1] += 1;
                used_blocks[i] = true;

                for &ptr in inode.direct.iter() {
                    if ptr == 0 {
                        continue;
                    }
                    if ptr as usize >= blocks {
                        return Err(FsError::CorruptImage);
                    }
                    used_blocks[ptr as usize] = true;
                }

                if inode.indirect != 0 {
                    if inode.indirect as usize >= blocks {
                        return Err(FsError::CorruptImage);
                    }
                    used_blocks[inode.indirect as usize] = true;
                    let indirect = disk.read(inode.indirect as usize)?;
                    for ptr in pointers_from(&indirect) {
                        if ptr == 0 {
                            continue;
                        }
                        if ptr as usize >= blocks {
                            return Err(FsError::CorruptImage);
                        }
                        used_blocks[ptr as usize] = true;
                    }
                }
            }
        }

        let mut dir_counter = vec![0u32; sb.dir_blocks as usize];
        let mut curr_dir = Directory::blank();
        for k in 0..sb.dir_blocks as usize {
            let block = disk.read(blocks - 1 - k)?;
            for slot in 0..DIR_PER_BLOCK {
                if dir_at(&block, slot)?.valid == 1 {
                    dir_counter[k] += 1;
                }
            }
            if k == 0 {
                curr_dir = dir_at(&block, 0)?;
            }
        }
        if curr_dir.valid != 1 {
            return Err(FsError::CorruptImage);
        }

        // The whole directory region is reserved, occupied or not, so the
        // data-block allocator can never hand out a directory block.
        for b in blocks - sb.dir_blocks as usize..blocks {
            used_blocks[b] = true;
        }

        disk.mount();
        info!("mounted: {} blocks, {} inodes", sb.blocks, sb.inodes);
        Ok(FileSystem {
            disk,
            metadata: sb,
            used_blocks,
            inode_counter,
            dir_counter,
            curr_dir,
        })
    }

    /// Unmount and hand the device back. Mounting the same image again is
    /// legal and rebuilds identical in-core state.
    pub fn exit(mut self) -> D {
        self.disk.unmount();
        self.disk
    }

    pub fn superblock(&self) -> &Superblock {
        &self.metadata
    }

    // Introspection used by the shell's reports and the test suite.

    pub fn bitmap(&self) -> &[bool] {
        &self.used_blocks
    }

    pub fn inode_counters(&self) -> &[u32] {
        &self.inode_counter
    }

    pub fn dir_counters(&self) -> &[u32] {
        &self.dir_counter
    }

    /// Number of unallocated blocks in the data region.
    pub fn free_data_blocks(&self) -> usize {
        let start = self.metadata.inode_blocks as usize + 1;
        self.used_blocks[start..self.metadata.blocks as usize]
            .iter()
            .filter(|&&u| !u)
            .count()
    }

    // -----------------------------------------------------------------------
    // Inode allocator

    /// Allocate the first free inode and return its inumber. Inumber 0 is
    /// reserved and never handed out, so file inumbers range over
    /// `[1, inodes)`.
    pub fn create(&mut self) -> Result<usize> {
        for i in 1..=self.metadata.inode_blocks as usize {
            if self.inode_counter[i - 1] == INODES_PER_BLOCK as u32 {
                continue;
            }
            let mut block = self.disk.read(i)?;
            let first_slot = if i == 1 { 1 } else { 0 };
            for j in first_slot..INODES_PER_BLOCK {
                if inode_at(&block, j)?.valid != 0 {
                    continue;
                }
                let mut inode = Inode::blank();
                inode.valid = 1;
                put_inode(&mut block, j, &inode)?;
                self.disk.write(i, &block)?;
                self.inode_counter[i - 1] += 1;
                self.used_blocks[i] = true;
                return Ok((i - 1) * INODES_PER_BLOCK + j);
            }
        }
        Err(FsError::NoSpace)
    }

    pub fn load_inode(&mut self, inumber: usize) -> Result<Inode> {
        if inumber < 1 || inumber >= self.metadata.inodes as usize {
            return Err(FsError::NotFound);
        }
        let i = inumber / INODES_PER_BLOCK;
        let j = inumber % INODES_PER_BLOCK;
        if self.inode_counter[i] == 0 {
            return Err(FsError::NotFound);
        }
        let block = self.disk.read(i + 1)?;
        let inode = inode_at(&block, j)?;
        if inode.valid == 1 {
            Ok(inode)
        } else {
            Err(FsError::NotFound)
        }
    }

    /// File length in bytes.
    pub fn stat(&mut self, inumber: usize) -> Result<usize> {
        Ok(self.load_inode(inumber)?.size as usize)
    }

    /// Invalidate the inode and release every block it references.
    pub fn remove(&mut self, inumber: usize) -> Result<()> {
        let mut inode = self.load_inode(inumber)?;
        inode.valid = 0;
        inode.size = 0;

        let counter_idx = inumber / INODES_PER_BLOCK;
        self.inode_counter[counter_idx] -= 1;
        if self.inode_counter[counter_idx] == 0 {
            // Counter index + 1 is the physical inode block; inode block 0
            // sits at physical block 1.
            self.used_blocks[counter_idx + 1] = false;
        }

        for d in 0..POINTERS_PER_INODE {
            let ptr = inode.direct[d] as usize;
            if ptr != 0 {
                self.used_blocks[ptr] = false;
            }
            inode.direct[d] = 0;
        }

        if inode.indirect != 0 {
            let indirect = self.disk.read(inode.indirect as usize)?;
            self.used_blocks[inode.indirect as usize] = false;
            inode.indirect = 0;
            for ptr in pointers_from(&indirect) {
                if ptr != 0 {
                    self.used_blocks[ptr as usize] = false;
                }
            }
        }

        self.write_inode_back(inumber, &inode)
    }

    fn write_inode_back(&mut self, inumber: usize, inode: &Inode) -> Result<()> {
        let block_number = inumber / INODES_PER_BLOCK + 1;
        let mut block = self.disk.read(block_number)?;
        put_inode(&mut block, inumber % INODES_PER_BLOCK, inode)?;
        self.disk.write(block_number, &block)?;
        Ok(())
    }

    /// First-fit scan of the data region. The scan runs up to `blocks`, past
    /// the start of the directory region, but mount reserves every directory
    /// block so none is ever returned.
    fn allocate_block(&mut self) -> Option<u32> {
        let start = self.metadata.inode_blocks as usize + 1;
        for i in start..self.metadata.blocks as usize {
            if !self.used_blocks[i] {
                self.used_blocks[i] = true;
                return Some(i as u32);
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Read/write engine

    /// Append up to `length` bytes starting at byte `offset` of the file into
    /// `data`. Short reads happen at end of file and at the first
    /// unallocated block pointer.
    pub fn read(
        &mut self,
        inumber: usize,
        data: &mut Vec<u8>,
        length: usize,
        offset: usize,
    ) -> Result<usize> {
        let inode = self.load_inode(inumber)?;

        let size = inode.size as usize;
        if offset >= size {
            return Ok(0);
        }
        let mut remaining = min(length, size - offset);

        let mut logical = offset / BLOCK_SIZE;
        let mut inner = offset % BLOCK_SIZE;
        let mut indirect: Option<Vec<u32>> = None;
        let mut total = 0usize;

        while remaining > 0 {
            let blocknum = if logical < POINTERS_PER_INODE {
                inode.direct[logical]
            } else {
                if inode.indirect == 0 {
                    break;
                }
                if indirect.is_none() {
                    let block = self.disk.read(inode.indirect as usize)?;
                    indirect = Some(pointers_from(&block));
                }
                let idx = logical - POINTERS_PER_INODE;
                if idx >= POINTERS_PER_BLOCK {
                    break;
                }
                match indirect.as_ref() {
                    Some(pointers) => pointers[idx],
                    None => 0,
                }
            };

            // A hole terminates the read like end of file.
            if blocknum == 0 {
                break;
            }

            let block = self.disk.read(blocknum as usize)?;
            let take = min(remaining, BLOCK_SIZE - inner);
            data.extend_from_slice(&block[inner..inner + take]);
            total += take;
            remaining -= take;
            logical += 1;
            inner = 0;
        }

        Ok(total)
    }

    /// Write `data` at byte `offset`, allocating blocks (and the pointer
    /// block) on demand. Returns the number of bytes written: all of `data`,
    /// or a short count when the device fills up mid-write, in which case the
    /// file size is truncated to the bytes that actually landed.
    pub fn write(&mut self, inumber: usize, data: &[u8], offset: usize) -> Result<usize> {
        let length = data.len();
        if offset + length > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        if inumber < 1 || inumber >= self.metadata.inodes as usize {
            return Err(FsError::NotFound);
        }

        let mut inode = match self.load_inode(inumber) {
            Ok(mut inode) => {
                inode.size = max(inode.size, (offset + length) as u32);
                inode
            }
            Err(FsError::NotFound) => {
                // Allocate in place. The on-disk slot only turns valid at the
                // final inode commit below, after at least one block landed.
                self.inode_counter[inumber / INODES_PER_BLOCK] += 1;
                self.used_blocks[inumber / INODES_PER_BLOCK + 1] = true;
                let mut inode = Inode::blank();
                inode.valid = 1;
                inode.size = (offset + length) as u32;
                inode
            }
            Err(e) => return Err(e),
        };

        let mut written = 0usize;
        let mut logical = offset / BLOCK_SIZE;
        let mut inner = offset % BLOCK_SIZE;
        let mut indirect: Option<Vec<u32>> = None;
        let mut out_of_space = false;

        while written < length {
            let blocknum = match self.locate_or_allocate(&mut inode, &mut indirect, logical)? {
                Some(b) => b,
                None => {
                    out_of_space = true;
                    break;
                }
            };

            // A freshly zeroed frame patched with the payload slice: holes
            // inside a partially written block read back as zero.
            let take = min(length - written, BLOCK_SIZE - inner);
            let mut scratch = vec![0u8; BLOCK_SIZE];
            scratch[inner..inner + take].copy_from_slice(&data[written..written + take]);
            self.disk.write(blocknum as usize, &scratch)?;

            written += take;
            logical += 1;
            inner = 0;
        }

        if out_of_space {
            inode.size = (offset + written) as u32;
        }
        if let Some(pointers) = &indirect {
            if inode.indirect != 0 {
                self.disk
                    .write(inode.indirect as usize, &pointers_into(pointers))?;
            }
        }
        self.write_inode_back(inumber, &inode)?;

        Ok(written)
    }

    /// Resolve the block for logical index `logical`, allocating the data
    /// block (and the pointer block when crossing into indirect territory) as
    /// needed. `Ok(None)` means the device is full.
    fn locate_or_allocate(
        &mut self,
        inode: &mut Inode,
        indirect: &mut Option<Vec<u32>>,
        logical: usize,
    ) -> Result<Option<u32>> {
        if logical < POINTERS_PER_INODE {
            if inode.direct[logical] == 0 {
                match self.allocate_block() {
                    Some(b) => inode.direct[logical] = b,
                    None => return Ok(None),
                }
            }
            return Ok(Some(inode.direct[logical]));
        }

        if inode.indirect == 0 {
            match self.allocate_block() {
                Some(b) => {
                    inode.indirect = b;
                    // Brand-new pointer block: zero every slot before use.
                    // The allocator does not hand out zeroed blocks.
                    *indirect = Some(vec![0u32; POINTERS_PER_BLOCK]);
                }
                None => return Ok(None),
            }
        }
        if indirect.is_none() {
            let block = self.disk.read(inode.indirect as usize)?;
            *indirect = Some(pointers_from(&block));
        }
        let Some(pointers) = indirect.as_mut() else {
            return Err(FsError::CorruptImage);
        };

        let idx = logical - POINTERS_PER_INODE;
        if pointers[idx] == 0 {
            match self.allocate_block() {
                Some(b) => pointers[idx] = b,
                None => return Ok(None),
            }
        }
        Ok(Some(pointers[idx]))
    }

    // -----------------------------------------------------------------------
    // Password gate

    pub fn protected(&self) -> bool {
        self.metadata.protected == 1
    }

    /// Install or replace the password. When the volume is already protected
    /// the current password must be supplied and match.
    pub fn set_password(&mut self, current: Option<&str>, new: &str) -> Result<()> {
        if self.metadata.protected == 1 {
            match current {
                Some(pass) if hash_password(pass).as_bytes() == stored_hash(&self.metadata) => {}
                _ => return Err(FsError::AuthFailed),
            }
        }

        let digest = hash_password(new);
        self.metadata.password_hash = [0; PASSWORD_HASH_LEN];
        self.metadata.password_hash[..digest.len()].copy_from_slice(digest.as_bytes());
        self.metadata.protected = 1;
        self.write_superblock()
    }

    pub fn remove_password(&mut self, current: &str) -> Result<()> {
        if self.metadata.protected == 0 {
            return Err(FsError::NotFound);
        }
        if hash_password(current).as_bytes() != stored_hash(&self.metadata) {
            return Err(FsError::AuthFailed);
        }
        self.metadata.protected = 0;
        self.metadata.password_hash = [0; PASSWORD_HASH_LEN];
        self.write_superblock()
    }

    fn write_superblock(&mut self) -> Result<()> {
        let bytes = encode_superblock(&self.metadata)?;
        self.disk.write(0, &bytes)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Debug

    /// Superblock and inode topology of an unmounted image. Password-gated
    /// the same way as mount.
    pub fn debug(disk: &mut D, password: Option<&str>) -> Result<String> {
        let sb = decode_superblock(&disk.read(0)?)?;
        if sb.magic != MAGIC_NUMBER {
            return Err(FsError::BadMagic);
        }
        check_password(&sb, password)?;
        build_debug_report(disk, &sb)
    }

    /// Same report for a mounted volume; the mount already authenticated.
    pub fn debug_report(&mut self) -> Result<String> {
        let sb = self.metadata;
        build_debug_report(&mut self.disk, &sb)
    }
}

fn build_debug_report<D: Disk>(disk: &mut D, sb: &Superblock) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "SuperBlock:");
    let _ = writeln!(out, "    magic number is valid");
    let _ = writeln!(out, "    {} blocks", sb.blocks);
    let _ = writeln!(out, "    {} inode blocks", sb.inode_blocks);
    let _ = writeln!(out, "    {} dir blocks", sb.dir_blocks);
    let _ = writeln!(out, "    {} inodes", sb.inodes);

    let mut inumber = 0usize;
    for i in 1..=sb.inode_blocks as usize {
        let block = disk.read(i)?;
        for j in 0..INODES_PER_BLOCK {
            let inode = inode_at(&block, j)?;
            if inode.valid == 1 {
                let _ = writeln!(out, "Inode {}:", inumber);
                let _ = writeln!(out, "    size: {} bytes", inode.size);
                let _ = write!(out, "    direct blocks:");
                for &ptr in inode.direct.iter() {
                    if ptr != 0 {
                        let _ = write!(out, " {}", ptr);
                    }
                }
                let _ = writeln!(out);
                if inode.indirect != 0 {
                    let _ = writeln!(out, "    indirect block: {}", inode.indirect);
                    let _ = write!(out, "    indirect data blocks:");
                    let indirect = disk.read(inode.indirect as usize)?;
                    for ptr in pointers_from(&indirect) {
                        if ptr != 0 {
                            let _ = write!(out, " {}", ptr);
                        }
                    }
                    let _ = writeln!(out);
                }
            }
            inumber += 1;
        }
    }

    Ok(out)
}
