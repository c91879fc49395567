//! The directory layer: fixed-slot name→inode entries over a directory
//! inode's data, plus path traversal. Grounded on
//! `examples/original_source/src/filesys/file.c`'s path resolution and
//! `kernel-rs/src/fs/path.rs`'s `skipelem` idiom (ported from `&[u8]` to
//! `&str`, since this crate is `std`).

use zerocopy::{AsBytes, FromBytes};

use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeTable};
use crate::param::{NAME_MAX, ROOT_DIR_SECTOR, SECTOR_SIZE};

/// Storage width of the name field, rounded up from `NAME_MAX` to a
/// 4-byte multiple so the struct has no compiler-inserted padding (the
/// extra bytes are explicit, always-zeroed storage, not padding).
const NAME_STORAGE: usize = 16;

/// One fixed-size slot in a directory's data.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RawDirEntry {
    inode_sector: u32,
    in_use: u32,
    name: [u8; NAME_STORAGE],
}

const ENTRY_SIZE: usize = std::mem::size_of::<RawDirEntry>();

/// A directory entry as seen by callers: a name and the inode sector it
/// names.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode_sector: u32,
}

impl RawDirEntry {
    fn empty() -> Self {
        Self {
            name: [0u8; NAME_STORAGE],
            inode_sector: 0,
            in_use: 0,
        }
    }

    fn name_str(&self) -> String {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    fn set_name(&mut self, name: &str) -> Result<()> {
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        self.name = [0u8; NAME_STORAGE];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }
}

/// A handle to an open directory: just its backing inode plus the
/// table needed to read/write entries through it.
pub struct Directory {
    inode: Inode,
}

/// Splits the next path component off the front of `path`, skipping
/// repeated slashes. Returns `(name, rest)` where `rest` has no leading
/// slashes, so the caller can test `rest.is_empty()` to see if `name` was
/// the last component. Returns `None` once nothing but slashes remain.
fn skipelem(path: &str) -> Option<(&str, &str)> {
    let start = path.find(|c| c != '/')?;
    let rest = &path[start..];
    let len = rest.find('/').unwrap_or(rest.len());
    let name = &rest[..len];
    let after = &rest[len..];
    let next_start = after.find(|c| c != '/').unwrap_or(after.len());
    Some((name, &after[next_start..]))
}

impl Directory {
    fn from_inode(inode: Inode) -> Self {
        Self { inode }
    }

    pub fn into_inode(self) -> Inode {
        self.inode
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Opens the root directory's inode.
    pub fn open_root(table: &InodeTable) -> Self {
        Self::from_inode(table.open(ROOT_DIR_SECTOR))
    }

    /// Opens the directory backed by `inode`, which must already be
    /// known to be a directory (callers check via `InodeTable::is_dir`
    /// before constructing one).
    pub fn open(inode: Inode) -> Self {
        Self::from_inode(inode)
    }

    /// Creates a fresh, empty directory at `sector`, with "." and ".."
    /// entries pointing at itself and `parent_sector` respectively.
    pub fn create(table: &InodeTable, sector: u32, parent_sector: u32) -> Result<()> {
        table.create(sector, 0, true)?;
        let inode = table.open(sector);
        let dir = Directory::from_inode(inode);
        dir.add(table, ".", sector)?;
        dir.add(table, "..", parent_sector)?;
        table.close(dir.into_inode());
        Ok(())
    }

    fn entry_count(&self, table: &InodeTable) -> usize {
        table.length(&self.inode) as usize / ENTRY_SIZE
    }

    fn read_entry(&self, table: &InodeTable, index: usize) -> RawDirEntry {
        let mut buf = [0u8; ENTRY_SIZE];
        table.read_at(&self.inode, &mut buf, (index * ENTRY_SIZE) as u32);
        RawDirEntry::read_from(&buf[..]).unwrap()
    }

    fn write_entry(&self, table: &InodeTable, index: usize, entry: &RawDirEntry) -> Result<()> {
        table.write_at(&self.inode, entry.as_bytes(), (index * ENTRY_SIZE) as u32)?;
        Ok(())
    }

    /// Looks up `name` among this directory's entries.
    pub fn lookup(&self, table: &InodeTable, name: &str) -> Option<DirEntry> {
        let count = self.entry_count(table);
        for i in 0..count {
            let entry = self.read_entry(table, i);
            if entry.in_use != 0 && entry.name_str() == name {
                return Some(DirEntry {
                    name: entry.name_str(),
                    inode_sector: entry.inode_sector,
                });
            }
        }
        None
    }

    /// Adds a `name` → `inode_sector` entry, reusing a freed slot if one
    /// exists, otherwise appending. Fails if `name` is already present.
    pub fn add(&self, table: &InodeTable, name: &str, inode_sector: u32) -> Result<()> {
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if self.lookup(table, name).is_some() {
            return Err(FsError::InvalidArgument);
        }

        let count = self.entry_count(table);
        let mut slot = count;
        for i in 0..count {
            if self.read_entry(table, i).in_use == 0 {
                slot = i;
                break;
            }
        }

        let mut entry = RawDirEntry::empty();
        entry.set_name(name)?;
        entry.inode_sector = inode_sector;
        entry.in_use = 1;
        self.write_entry(table, slot, &entry)
    }

    /// Removes the entry named `name`. Fails if the directory named has
    /// entries beyond "." and ".." (callers check non-empty before
    /// calling this on a directory inode — see `FileSystem::remove`).
    pub fn remove(&self, table: &InodeTable, name: &str) -> Result<u32> {
        let count = self.entry_count(table);
        for i in 0..count {
            let mut entry = self.read_entry(table, i);
            if entry.in_use != 0 && entry.name_str() == name {
                let sector = entry.inode_sector;
                entry.in_use = 0;
                self.write_entry(table, i, &entry)?;
                return Ok(sector);
            }
        }
        Err(FsError::NotFound)
    }

    /// Returns every in-use entry except "." and "..".
    pub fn entries(&self, table: &InodeTable) -> Vec<DirEntry> {
        let count = self.entry_count(table);
        let mut out = Vec::new();
        for i in 0..count {
            let entry = self.read_entry(table, i);
            let name = entry.name_str();
            if entry.in_use != 0 && name != "." && name != ".." {
                out.push(DirEntry {
                    name,
                    inode_sector: entry.inode_sector,
                });
            }
        }
        out
    }

    /// Returns the next in-use entry at or after slot `from_index`
    /// (skipping "." and ".."), along with the slot index to resume
    /// from on a subsequent call. `None` once the scan reaches the end
    /// without finding one.
    pub fn readdir_from(&self, table: &InodeTable, from_index: usize) -> Option<(DirEntry, usize)> {
        let count = self.entry_count(table);
        let mut i = from_index;
        while i < count {
            let entry = self.read_entry(table, i);
            let name = entry.name_str();
            if entry.in_use != 0 && name != "." && name != ".." {
                return Some((
                    DirEntry {
                        name,
                        inode_sector: entry.inode_sector,
                    },
                    i + 1,
                ));
            }
            i += 1;
        }
        None
    }

    /// True if this directory has no entries besides "." and "..".
    pub fn is_empty(&self, table: &InodeTable) -> bool {
        self.entries(table).is_empty()
    }
}

/// Resolves `path` from `root` (absolute) or `cwd` (relative), returning
/// the sector of the final component's inode. Each intermediate
/// component must itself be a directory.
pub fn resolve_path(
    table: &InodeTable,
    root_sector: u32,
    cwd_sector: u32,
    path: &str,
) -> Result<u32> {
    let mut current = if path.starts_with('/') {
        root_sector
    } else {
        cwd_sector
    };

    let mut rest = path;
    loop {
        let (name, next_rest) = match skipelem(rest) {
            Some(pair) => pair,
            None => return Ok(current),
        };

        let inode = table.open(current);
        if !table.is_dir(&inode) {
            table.close(inode);
            return Err(FsError::NotADirectory);
        }
        let dir = Directory::open(inode);
        let found = dir.lookup(table, name);
        table.close(dir.into_inode());

        match found {
            Some(entry) => {
                current = entry.inode_sector;
                rest = next_rest;
            }
            None => return Err(FsError::NotFound),
        }
    }
}

/// Resolves all but the last component of `path`, returning the parent
/// directory's sector and the final component's name.
pub fn resolve_parent<'a>(
    table: &InodeTable,
    root_sector: u32,
    cwd_sector: u32,
    path: &'a str,
) -> Result<(u32, &'a str)> {
    let mut current = if path.starts_with('/') {
        root_sector
    } else {
        cwd_sector
    };

    let mut rest = path;
    loop {
        let (name, next_rest) = skipelem(rest).ok_or(FsError::InvalidArgument)?;
        if next_rest.is_empty() {
            return Ok((current, name));
        }

        let inode = table.open(current);
        if !table.is_dir(&inode) {
            table.close(inode);
            return Err(FsError::NotADirectory);
        }
        let dir = Directory::open(inode);
        let found = dir.lookup(table, name);
        table.close(dir.into_inode());

        match found {
            Some(entry) => {
                current = entry.inode_sector;
                rest = next_rest;
            }
            None => return Err(FsError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::device::MemBlockDevice;
    use crate::free_map::FreeMap;
    use std::sync::Arc;

    #[test]
    fn skipelem_splits_components() {
        assert_eq!(skipelem("a/bb/c"), Some(("a", "bb/c")));
        assert_eq!(skipelem("///a//bb"), Some(("a", "bb")));
        assert_eq!(skipelem("a"), Some(("a", "")));
        assert_eq!(skipelem(""), None);
        assert_eq!(skipelem("////"), None);
    }

    #[test]
    fn readdir_from_skips_dot_entries_and_is_restartable() {
        let cache = Cache::with_capacity(Box::new(MemBlockDevice::new(64)), 16);
        let free_map = Arc::new(FreeMap::format(cache.clone(), 64));
        let table = InodeTable::new(cache, free_map);

        Directory::create(&table, 10, 10).unwrap();
        let dir = Directory::open(table.open(10));
        dir.add(&table, "a", 20).unwrap();
        dir.add(&table, "b", 21).unwrap();

        let mut names = Vec::new();
        let mut pos = 0;
        while let Some((entry, next)) = dir.readdir_from(&table, pos) {
            names.push(entry.name);
            pos = next;
        }
        assert_eq!(names, vec!["a", "b"]);

        // Restarting from 0 walks the same entries again.
        let (first, _) = dir.readdir_from(&table, 0).unwrap();
        assert_eq!(first.name, "a");

        table.close(dir.into_inode());
    }
}
