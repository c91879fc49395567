//! The top-level file-system context, composing the cache, inode table,
//! free map, and background daemons into one owned object. Ported from
//! `examples/original_source/src/filesys/filesys.c`'s `filesys_init`/
//! `filesys_done`/`filesys_create`/`filesys_dir_create`/`filesys_open`/
//! `filesys_remove`.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cache::{self, Cache};
use crate::device::BlockDevice;
use crate::directory::{self, Directory};
use crate::error::{FsError, Result};
use crate::file::{FileHandle, FileTable};
use crate::free_map::FreeMap;
use crate::inode::InodeTable;
use crate::param::ROOT_DIR_SECTOR;

/// Owns every process-wide singleton the filesystem core needs: the
/// buffer cache, the open-inode table, the free-sector map, the open-file
/// table, and the background daemons' thread handles. A host embeds one
/// of these and drives it; nothing here assumes a particular scheduler or
/// syscall surface.
pub struct FileSystem {
    cache: Arc<Cache>,
    inodes: InodeTable,
    free_map: Arc<FreeMap>,
    file_table: Arc<FileTable>,
    read_ahead_daemon: Option<JoinHandle<()>>,
    flush_daemon: Option<JoinHandle<()>>,
}

impl FileSystem {
    /// Formats a fresh file system over `device` and spawns the
    /// background daemons. `sector_count` is the device's total sector
    /// count (used to size the free map).
    pub fn format(device: Box<dyn BlockDevice>, sector_count: u32) -> Result<Self> {
        Self::format_with_cache_capacity(device, sector_count, crate::param::CACHE_SIZE)
    }

    /// Like `format`, but with an explicit cache block count. Exposed so
    /// tests can force eviction with a small cache and confirm a dirty
    /// block survives being evicted.
    pub fn format_with_cache_capacity(
        device: Box<dyn BlockDevice>,
        sector_count: u32,
        cache_capacity: usize,
    ) -> Result<Self> {
        let cache = Cache::with_capacity(device, cache_capacity);
        let free_map = Arc::new(FreeMap::format(cache.clone(), sector_count));
        free_map.reserve(ROOT_DIR_SECTOR);
        let inodes = InodeTable::new(cache.clone(), free_map.clone());

        Directory::create(&inodes, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)?;

        let read_ahead_daemon = Some(cache::spawn_read_ahead_daemon(cache.clone()));
        let flush_daemon = Some(cache::spawn_flush_daemon(cache.clone()));

        Ok(Self {
            cache,
            inodes,
            free_map,
            file_table: Arc::new(FileTable::default()),
            read_ahead_daemon,
            flush_daemon,
        })
    }

    /// Reopens an already-formatted file system from `device`.
    pub fn mount(device: Box<dyn BlockDevice>, sector_count: u32) -> Self {
        let cache = Cache::new(device);
        let free_map = Arc::new(FreeMap::open(cache.clone(), sector_count));
        let inodes = InodeTable::new(cache.clone(), free_map.clone());

        let read_ahead_daemon = Some(cache::spawn_read_ahead_daemon(cache.clone()));
        let flush_daemon = Some(cache::spawn_flush_daemon(cache.clone()));

        Self {
            cache,
            inodes,
            free_map,
            file_table: Arc::new(FileTable::default()),
            read_ahead_daemon,
            flush_daemon,
        }
    }

    /// Writes back every dirty block. The background daemons are
    /// detached, loop-forever threads (matching the original's daemons,
    /// which never exit); they are not joined here, only the cache's
    /// own state is flushed, matching `filesys_done`'s
    /// `free_map_close` + `cache_flush` sequence.
    pub fn shutdown(mut self) {
        self.read_ahead_daemon.take();
        self.flush_daemon.take();
        self.cache.flush();
    }

    fn resolve_parent(&self, cwd: u32, path: &str) -> Result<(u32, &str)> {
        directory::resolve_parent(&self.inodes, ROOT_DIR_SECTOR, cwd, path)
    }

    /// Creates a regular file named by `path` (resolved relative to
    /// `cwd`) with the given initial length.
    pub fn create_file(&self, cwd: u32, path: &str, initial_size: u32) -> Result<()> {
        let (parent_sector, name) = self.resolve_parent(cwd, path)?;

        let inode_sector = self.free_map.allocate().ok_or(FsError::OutOfSpace)?;
        let result = (|| {
            self.inodes.create(inode_sector, initial_size, false)?;
            let parent = Directory::open(self.inodes.open(parent_sector));
            let add_result = parent.add(&self.inodes, name, inode_sector);
            self.inodes.close(parent.into_inode());
            add_result
        })();

        if result.is_err() {
            self.free_map.release(inode_sector);
        }
        result
    }

    /// Creates a directory named by `path`, with "." and ".." wired up.
    pub fn create_dir(&self, cwd: u32, path: &str) -> Result<()> {
        let (parent_sector, name) = self.resolve_parent(cwd, path)?;

        let inode_sector = self.free_map.allocate().ok_or(FsError::OutOfSpace)?;
        let result = (|| {
            Directory::create(&self.inodes, inode_sector, parent_sector)?;
            let parent = Directory::open(self.inodes.open(parent_sector));
            let add_result = parent.add(&self.inodes, name, inode_sector);
            self.inodes.close(parent.into_inode());
            add_result
        })();

        if result.is_err() {
            self.free_map.release(inode_sector);
        }
        result
    }

    /// Opens the file or directory named by `path`, resolved relative to
    /// `cwd`.
    pub fn open(&self, cwd: u32, path: &str) -> Result<FileHandle> {
        let sector = directory::resolve_path(&self.inodes, ROOT_DIR_SECTOR, cwd, path)?;
        let inode = self.inodes.open(sector);
        FileHandle::open(inode, &self.inodes, &self.file_table)
    }

    /// Creates a fresh pipe and returns its two endpoints, each claiming
    /// a slot in the system-wide open-file table.
    pub fn pipe_open(&self) -> Result<(FileHandle, FileHandle)> {
        FileHandle::open_pipe(&self.file_table)
    }

    /// Removes the entry named by `path`. A non-empty directory cannot
    /// be removed; callers see `FsError::InvalidArgument`. The root
    /// directory itself can never be removed, regardless of emptiness.
    pub fn remove(&self, cwd: u32, path: &str) -> Result<()> {
        let (parent_sector, name) = self.resolve_parent(cwd, path)?;
        let parent = Directory::open(self.inodes.open(parent_sector));

        let target_sector = match parent.lookup(&self.inodes, name) {
            Some(entry) => entry.inode_sector,
            None => {
                self.inodes.close(parent.into_inode());
                return Err(FsError::NotFound);
            }
        };

        if target_sector == ROOT_DIR_SECTOR {
            self.inodes.close(parent.into_inode());
            return Err(FsError::InvalidArgument);
        }

        let target = self.inodes.open(target_sector);
        if self.inodes.is_dir(&target) {
            let target_dir = Directory::open(target);
            if !target_dir.is_empty(&self.inodes) {
                self.inodes.close(target_dir.into_inode());
                self.inodes.close(parent.into_inode());
                return Err(FsError::InvalidArgument);
            }
            self.inodes.close(target_dir.into_inode());
        } else {
            self.inodes.close(target);
        }

        parent.remove(&self.inodes, name)?;
        self.inodes.close(parent.into_inode());

        let inode = self.inodes.open(target_sector);
        self.inodes.remove(&inode);
        self.inodes.close(inode);
        Ok(())
    }

    pub fn root_sector(&self) -> u32 {
        ROOT_DIR_SECTOR
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }
}
