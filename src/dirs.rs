use std::fmt;
use std::fs::File;
use std::io::{Read, Write};

use log::warn;

use crate::disk::Disk;
use crate::fs::{
    dir_at, put_dir, Directory, Dirent, FileSystem, FsError, Result, DIR_PER_BLOCK, ENTRIES_PER_DIR,
    ENTRY_DIR, ENTRY_FILE, NAMESIZE,
};

/// Chunk size for streaming files to and from the host.
const HOST_IO_CHUNK: usize = 4 * 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        })
    }
}

/// One row of an `ls` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub inum: u32,
    pub name: String,
    pub kind: EntryKind,
}

/// Pack a name into its fixed NUL-terminated field. At most
/// `NAMESIZE - 1` bytes of payload.
pub(crate) fn pack_name(name: &str) -> Result<[u8; NAMESIZE]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= NAMESIZE || bytes.contains(&0) {
        return Err(FsError::InvalidName);
    }
    let mut packed = [0u8; NAMESIZE];
    packed[..bytes.len()].copy_from_slice(bytes);
    Ok(packed)
}

pub(crate) fn unpack_name(raw: &[u8; NAMESIZE]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(NAMESIZE);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// First table slot holding a valid entry with this exact name.
fn dir_lookup(dir: &Directory, name: &str) -> Option<usize> {
    let packed = pack_name(name).ok()?;
    dir.table
        .iter()
        .position(|e| e.valid == 1 && e.name == packed)
}

/// Copy of `dir` with a new entry in its first free table slot. Nothing is
/// persisted; the caller writes the record back.
fn add_dir_entry(dir: &Directory, inum: u32, kind: u8, name: &str) -> Result<Directory> {
    let slot = dir
        .table
        .iter()
        .position(|e| e.valid == 0)
        .ok_or(FsError::Full)?;

    let mut updated = *dir;
    updated.table[slot] = Dirent {
        kind,
        valid: 1,
        inum,
        name: pack_name(name)?,
    };
    Ok(updated)
}

fn listing_of(dir: &Directory) -> Vec<DirEntryInfo> {
    dir.table
        .iter()
        .filter(|e| e.valid == 1)
        .map(|e| DirEntryInfo {
            inum: e.inum,
            name: unpack_name(&e.name),
            kind: if e.kind == ENTRY_FILE {
                EntryKind::File
            } else {
                EntryKind::Dir
            },
        })
        .collect()
}

impl<D: Disk> FileSystem<D> {
    /// Physical block holding the directory record with this inum. Dir block
    /// 0 is the last block of the device and the region grows downward.
    fn dir_block_of(&self, inum: u32) -> usize {
        self.metadata.blocks as usize - 1 - inum as usize / DIR_PER_BLOCK
    }

    /// Read the directory record identified by `inum` from the directory
    /// region.
    fn read_dir(&mut self, inum: u32) -> Result<Directory> {
        if inum as usize >= self.metadata.dir_blocks as usize * DIR_PER_BLOCK {
            return Err(FsError::NotFound);
        }
        let block = self.disk.read(self.dir_block_of(inum))?;
        dir_at(&block, inum as usize % DIR_PER_BLOCK)
    }

    /// Rewrite the record's slot in place.
    fn write_dir_back(&mut self, dir: &Directory) -> Result<()> {
        let physical = self.dir_block_of(dir.inum);
        let mut block = self.disk.read(physical)?;
        put_dir(&mut block, dir.inum as usize % DIR_PER_BLOCK, dir)?;
        self.disk.write(physical, &block)?;
        Ok(())
    }

    /// Resolve a table slot of the current directory to the full record it
    /// points at. The slot must hold a valid directory entry.
    fn read_dir_from_offset(&mut self, slot: usize) -> Result<Directory> {
        if slot >= ENTRIES_PER_DIR {
            return Err(FsError::NotFound);
        }
        let entry = self.curr_dir.table[slot];
        if entry.valid != 1 || entry.kind != ENTRY_DIR {
            return Err(FsError::NotFound);
        }
        let dir = self.read_dir(entry.inum)?;
        if dir.valid != 1 {
            return Err(FsError::NotFound);
        }
        Ok(dir)
    }

    pub fn current_dir_name(&self) -> String {
        unpack_name(&self.curr_dir.name)
    }

    /// Create an empty directory under the current one. The new record gets
    /// `.` and `..` entries before it hits the disk.
    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        // First directory block with a free record slot.
        let block_idx = (0..self.metadata.dir_blocks as usize)
            .find(|&k| self.dir_counter[k] < DIR_PER_BLOCK as u32)
            .ok_or(FsError::Full)?;

        let physical = self.metadata.blocks as usize - 1 - block_idx;
        let block = self.disk.read(physical)?;
        let slot = (0..DIR_PER_BLOCK)
            .find(|&s| matches!(dir_at(&block, s), Ok(d) if d.valid == 0))
            .ok_or(FsError::Full)?;

        let mut new_dir = Directory::blank();
        new_dir.valid = 1;
        new_dir.inum = (block_idx * DIR_PER_BLOCK + slot) as u32;
        new_dir.name = pack_name(name)?;
        new_dir = add_dir_entry(&new_dir, new_dir.inum, ENTRY_DIR, ".")?;
        new_dir = add_dir_entry(&new_dir, self.curr_dir.inum, ENTRY_DIR, "..")?;

        // Reserve the parent slot before anything lands on disk, so a full
        // parent table leaves no half-created directory behind.
        let parent = add_dir_entry(&self.curr_dir, new_dir.inum, ENTRY_DIR, name)?;

        self.write_dir_back(&new_dir)?;
        self.write_dir_back(&parent)?;
        self.curr_dir = parent;
        self.dir_counter[block_idx] += 1;
        Ok(())
    }

    /// Create an empty file in the current directory.
    pub fn touch(&mut self, name: &str) -> Result<()> {
        pack_name(name)?;
        if dir_lookup(&self.curr_dir, name).is_some() {
            return Err(FsError::Duplicate);
        }
        if !self.curr_dir.table.iter().any(|e| e.valid == 0) {
            return Err(FsError::Full);
        }

        let inumber = self.create()?;
        let parent = add_dir_entry(&self.curr_dir, inumber as u32, ENTRY_FILE, name)?;
        self.write_dir_back(&parent)?;
        self.curr_dir = parent;
        Ok(())
    }

    /// Change the current directory to a child (or `.` / `..`).
    pub fn cd(&mut self, name: &str) -> Result<()> {
        let slot = dir_lookup(&self.curr_dir, name).ok_or(FsError::NotFound)?;
        if self.curr_dir.table[slot].kind != ENTRY_DIR {
            return Err(FsError::NotFound);
        }
        self.curr_dir = self.read_dir_from_offset(slot)?;
        Ok(())
    }

    /// Entries of the current directory.
    pub fn ls(&mut self) -> Result<Vec<DirEntryInfo>> {
        Ok(listing_of(&self.curr_dir))
    }

    /// Entries of a named child directory.
    pub fn ls_dir(&mut self, name: &str) -> Result<Vec<DirEntryInfo>> {
        let slot = dir_lookup(&self.curr_dir, name).ok_or(FsError::NotFound)?;
        let dir = self.read_dir_from_offset(slot)?;
        Ok(listing_of(&dir))
    }

    /// Remove a file or directory (recursively) from the current directory.
    pub fn rm(&mut self, name: &str) -> Result<()> {
        let parent = self.curr_dir;
        self.curr_dir = self.rm_helper(parent, name)?;
        Ok(())
    }

    /// Recursively remove a child directory of the current directory.
    pub fn rmdir(&mut self, name: &str) -> Result<()> {
        let parent = self.curr_dir;
        self.curr_dir = self.rmdir_helper(parent, name)?;
        Ok(())
    }

    fn rm_helper(&mut self, mut dir: Directory, name: &str) -> Result<Directory> {
        let slot = dir_lookup(&dir, name).ok_or(FsError::NotFound)?;
        if dir.table[slot].kind == ENTRY_DIR {
            return self.rmdir_helper(dir, name);
        }

        self.remove(dir.table[slot].inum as usize)?;
        dir.table[slot].valid = 0;
        self.write_dir_back(&dir)?;
        Ok(dir)
    }

    fn rmdir_helper(&mut self, mut parent: Directory, name: &str) -> Result<Directory> {
        let slot = dir_lookup(&parent, name).ok_or(FsError::NotFound)?;
        if parent.table[slot].kind != ENTRY_DIR {
            return Err(FsError::NotFound);
        }
        let child_inum = parent.table[slot].inum;
        let mut child = self.read_dir(child_inum)?;

        // EBUSY-style refusal: the current directory cannot be removed out
        // from under itself.
        if child.name == self.curr_dir.name {
            return Err(FsError::Busy);
        }

        // Slots 0 and 1 are `.` and `..`; everything above them goes.
        for idx in 2..ENTRIES_PER_DIR {
            if child.table[idx].valid == 1 {
                let entry_name = unpack_name(&child.table[idx].name);
                child = self.rm_helper(child, &entry_name)?;
            }
        }

        // Descendant removal rewrote records in this block; re-read before
        // clearing the child's own slot.
        let block_idx = child_inum as usize / DIR_PER_BLOCK;
        let physical = self.metadata.blocks as usize - 1 - block_idx;
        let mut block = self.disk.read(physical)?;
        let mut cleared = dir_at(&block, child_inum as usize % DIR_PER_BLOCK)?;
        cleared.valid = 0;
        cleared.table = [Dirent::blank(); ENTRIES_PER_DIR];
        put_dir(&mut block, child_inum as usize % DIR_PER_BLOCK, &cleared)?;
        self.disk.write(physical, &block)?;
        self.dir_counter[block_idx] -= 1;

        parent.table[slot].valid = 0;
        self.write_dir_back(&parent)?;
        Ok(parent)
    }

    /// Import a host file into the current directory, creating the name if
    /// needed and overwriting an existing file of that name. Returns the
    /// bytes copied.
    pub fn copyin(&mut self, path: &str, name: &str) -> Result<usize> {
        match self.touch(name) {
            Ok(()) | Err(FsError::Duplicate) => {}
            Err(e) => return Err(e),
        }
        let slot = dir_lookup(&self.curr_dir, name).ok_or(FsError::NotFound)?;
        let entry = self.curr_dir.table[slot];
        if entry.kind != ENTRY_FILE {
            return Err(FsError::NotFound);
        }

        let mut stream = File::open(path)?;
        let mut buffer = vec![0u8; HOST_IO_CHUNK];
        let mut offset = 0usize;
        loop {
            let got = stream.read(&mut buffer)?;
            if got == 0 {
                break;
            }
            let actual = self.write(entry.inum as usize, &buffer[..got], offset)?;
            offset += actual;
            if actual != got {
                warn!("short write: {} of {} bytes", actual, got);
                break;
            }
        }
        Ok(offset)
    }

    /// Export a file from the current directory to a host path. Returns the
    /// bytes copied.
    pub fn copyout(&mut self, name: &str, path: &str) -> Result<usize> {
        let slot = dir_lookup(&self.curr_dir, name).ok_or(FsError::NotFound)?;
        let entry = self.curr_dir.table[slot];
        if entry.kind != ENTRY_FILE {
            return Err(FsError::NotFound);
        }

        let mut stream = File::create(path)?;
        let mut offset = 0usize;
        loop {
            let mut data = Vec::new();
            let got = self.read(entry.inum as usize, &mut data, HOST_IO_CHUNK, offset)?;
            if got == 0 {
                break;
            }
            stream.write_all(&data)?;
            offset += got;
        }
        Ok(offset)
    }

    /// On-disk directory and file topology, one listing per live directory
    /// record.
    pub fn stat_report(&mut self) -> Result<String> {
        use std::fmt::Write as _;

        let mut directories = Vec::new();
        for k in 0..self.metadata.dir_blocks as usize {
            let block = self.disk.read(self.metadata.blocks as usize - 1 - k)?;
            for slot in 0..DIR_PER_BLOCK {
                let dir = dir_at(&block, slot)?;
                if dir.valid == 1 {
                    directories.push(dir);
                }
            }
        }

        let files: usize = directories
            .iter()
            .flat_map(|d| d.table.iter())
            .filter(|e| e.valid == 1 && e.kind == ENTRY_FILE)
            .count();

        let mut out = String::new();
        let _ = writeln!(out, "FileSystem:");
        let _ = writeln!(out, "    {} directory blocks", self.metadata.dir_blocks);
        let _ = writeln!(out, "    {} directories", directories.len());
        let _ = writeln!(out, "    {} files", files);
        for dir in &directories {
            let _ = writeln!(out, "Directory {} ({}):", dir.inum, unpack_name(&dir.name));
            for entry in listing_of(dir) {
                let _ = writeln!(
                    out,
                    "    {:<10} | {:<16} | {:<5}",
                    entry.inum, entry.name, entry.kind
                );
            }
        }
        Ok(out)
    }
}
