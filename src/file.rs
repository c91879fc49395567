//! The file-handle layer: a tagged object sitting between a process's
//! file descriptors and the inode/pipe/console machinery underneath.
//! Ported from `examples/original_source/src/filesys/file.c`.

use std::sync::{Arc, Mutex};

use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeTable};
use crate::param::MAX_OPEN_FILES;
use crate::pipe::Pipe;

/// The system-wide bound on simultaneously open file handles, mirroring
/// `kernel-rs/src/file.rs`'s fixed-capacity `RcArena<File, NFILE>`: a
/// handle allocation past capacity fails rather than growing the table.
pub struct FileTable {
    capacity: usize,
    open_count: Mutex<usize>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            open_count: Mutex::new(0),
        }
    }

    pub(crate) fn acquire(&self) -> Result<()> {
        let mut n = self.open_count.lock().unwrap();
        if *n >= self.capacity {
            return Err(FsError::TooManyOpenFiles);
        }
        *n += 1;
        Ok(())
    }

    pub(crate) fn release(&self) {
        let mut n = self.open_count.lock().unwrap();
        *n -= 1;
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new(MAX_OPEN_FILES)
    }
}

/// Which endpoint of a pipe a `Pipe`-kind file handle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// What a `FileHandle` is backed by.
enum Backing {
    Stdin,
    Stdout,
    Reg { inode: Inode },
    Dir { dir: Directory },
    Pipe { pipe: Arc<Pipe>, end: PipeEnd },
}

struct State {
    backing: Backing,
    pos: u32,
    deny_write: bool,
    ref_count: u32,
    /// The system-wide table slot this handle occupies, released on the
    /// last `close`. `None` for the console pseudo-files, which are
    /// preallocated outside `NFILE` accounting.
    file_table: Option<Arc<FileTable>>,
}

/// An open file object. Cheaply cloned via `dup`, which shares the same
/// underlying `State` and bumps `ref_count` rather than aliasing an
/// un-refcounted handle — mirrors the original's `file_dup` incrementing
/// in place and returning the same pointer.
pub struct FileHandle {
    state: Arc<Mutex<State>>,
}

impl FileHandle {
    fn new(backing: Backing) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                backing,
                pos: 0,
                deny_write: false,
                ref_count: 1,
                file_table: None,
            })),
        }
    }

    /// Like `new`, but first claims a slot in `file_table`, failing with
    /// `TooManyOpenFiles` if the system-wide table is full. The slot is
    /// released automatically on the handle's last `close`.
    fn new_tracked(backing: Backing, file_table: &Arc<FileTable>) -> Result<Self> {
        file_table.acquire()?;
        let handle = Self::new(backing);
        handle.state.lock().unwrap().file_table = Some(file_table.clone());
        Ok(handle)
    }

    /// Opens the console STDIN/STDOUT pseudo-file handles; hosts call
    /// this once at startup and hand the resulting handles to whatever
    /// plays the role of file descriptors 0 and 1. Preallocated outside
    /// `NFILE` accounting, matching a kernel's fixed console descriptors.
    pub fn open_stdin() -> Self {
        Self::new(Backing::Stdin)
    }

    pub fn open_stdout() -> Self {
        Self::new(Backing::Stdout)
    }

    /// Opens `inode`, taking ownership of it. If it names a directory,
    /// the handle carries a `Directory` view; a plain file otherwise.
    /// Claims a slot in `file_table`; on `TooManyOpenFiles`, `inode` is
    /// closed rather than leaked (an `Inode` has no destructor of its own
    /// — dropping it silently would leave the in-memory open count
    /// incremented forever).
    pub fn open(inode: Inode, table: &InodeTable, file_table: &Arc<FileTable>) -> Result<Self> {
        if let Err(e) = file_table.acquire() {
            table.close(inode);
            return Err(e);
        }
        let handle = if table.is_dir(&inode) {
            Self::new(Backing::Dir {
                dir: Directory::open(inode),
            })
        } else {
            Self::new(Backing::Reg { inode })
        };
        handle.state.lock().unwrap().file_table = Some(file_table.clone());
        Ok(handle)
    }

    /// Opens a fresh handle to the same inode as `self`, independent of
    /// `self` (separate position, separate deny-write accounting) —
    /// matching `file_reopen`'s `file_open(inode_reopen(...))`. Claims a
    /// new slot in `file_table`.
    pub fn reopen(&self, table: &InodeTable, file_table: &Arc<FileTable>) -> Result<Self> {
        let s = self.state.lock().unwrap();
        match &s.backing {
            Backing::Reg { inode } => Self::open(table.reopen(inode), table, file_table),
            Backing::Dir { dir } => Self::open(table.reopen(dir.inode()), table, file_table),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Creates the two handles for a fresh pipe, each claiming a slot in
    /// `file_table`.
    pub fn open_pipe(file_table: &Arc<FileTable>) -> Result<(Self, Self)> {
        let pipe = Arc::new(Pipe::new());
        let read_end = Self::new_tracked(
            Backing::Pipe {
                pipe: pipe.clone(),
                end: PipeEnd::Read,
            },
            file_table,
        )?;
        let write_end = match Self::new_tracked(Backing::Pipe { pipe, end: PipeEnd::Write }, file_table) {
            Ok(h) => h,
            Err(e) => {
                // Pipe backing's close() never touches the inode table, so
                // just release the slot we already claimed for `read_end`
                // directly rather than manufacturing one to call close().
                if let Some(ft) = read_end.state.lock().unwrap().file_table.take() {
                    ft.release();
                }
                return Err(e);
            }
        };
        Ok((read_end, write_end))
    }

    /// Duplicates this handle by incrementing its reference count and
    /// returning another handle pointing at the same shared state.
    pub fn dup(&self) -> Self {
        self.state.lock().unwrap().ref_count += 1;
        Self {
            state: self.state.clone(),
        }
    }

    /// Closes this handle. On the last reference, re-enables writes (if
    /// this handle had denied them), closes the underlying inode or
    /// pipe endpoint, and releases the directory view.
    pub fn close(self, table: &InodeTable) {
        let mut s = self.state.lock().unwrap();
        s.ref_count -= 1;
        if s.ref_count > 0 {
            return;
        }
        if s.deny_write {
            if let Backing::Reg { inode } = &s.backing {
                table.allow_write(inode);
            } else if let Backing::Dir { dir } = &s.backing {
                table.allow_write(dir.inode());
            }
        }
        match std::mem::replace(&mut s.backing, Backing::Stdin) {
            Backing::Reg { inode } => table.close(inode),
            Backing::Dir { dir } => table.close(dir.into_inode()),
            Backing::Pipe { pipe, end } => match end {
                PipeEnd::Read => pipe.close_read(),
                PipeEnd::Write => pipe.close_write(),
            },
            Backing::Stdin | Backing::Stdout => {}
        }
        if let Some(ft) = s.file_table.take() {
            ft.release();
        }
    }

    fn read_error(&self, s: &State) -> Option<FsError> {
        match &s.backing {
            Backing::Pipe { end, .. } if *end != PipeEnd::Read => Some(FsError::BadDescriptor),
            Backing::Dir { .. } => Some(FsError::IsADirectory),
            _ => None,
        }
    }

    fn write_error(&self, s: &State) -> Option<FsError> {
        match &s.backing {
            Backing::Pipe { end, .. } if *end != PipeEnd::Write => Some(FsError::BadDescriptor),
            Backing::Dir { .. } => Some(FsError::IsADirectory),
            _ => None,
        }
    }

    /// Reads into `buf` at the handle's current position, advancing it
    /// by the number of bytes read.
    pub fn read(&self, buf: &mut [u8], table: &InodeTable) -> Result<usize> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = self.read_error(&s) {
            return Err(e);
        }
        let n = match &s.backing {
            Backing::Stdin => {
                // A host without a real console simply yields EOF; real
                // hosts can swap in their own `BlockDevice`-style source
                // for stdin if they need interactive input.
                0
            }
            Backing::Stdout => 0,
            Backing::Pipe { pipe, .. } => pipe.read(buf),
            Backing::Reg { inode } => {
                let pos = s.pos;
                let n = table.read_at(inode, buf, pos);
                n
            }
            Backing::Dir { .. } => unreachable!("checked above"),
        };
        if matches!(s.backing, Backing::Reg { .. }) {
            s.pos += n as u32;
        }
        Ok(n)
    }

    /// Reads `buf.len()` bytes at an explicit offset, leaving the
    /// handle's position untouched. Only valid for regular files.
    pub fn read_at(&self, buf: &mut [u8], offset: u32, table: &InodeTable) -> Result<usize> {
        let s = self.state.lock().unwrap();
        match &s.backing {
            Backing::Reg { inode } => Ok(table.read_at(inode, buf, offset)),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Writes `buf` at the handle's current position, advancing it by
    /// the number of bytes written.
    pub fn write(&self, buf: &[u8], table: &InodeTable) -> Result<usize> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = self.write_error(&s) {
            return Err(e);
        }
        let n = match &s.backing {
            Backing::Stdin => 0,
            Backing::Stdout => {
                use std::io::Write as _;
                std::io::stdout().write_all(buf).ok();
                buf.len()
            }
            Backing::Pipe { pipe, .. } => pipe.write(buf)?,
            Backing::Reg { inode } => {
                let pos = s.pos;
                table.write_at(inode, buf, pos)?
            }
            Backing::Dir { .. } => unreachable!("checked above"),
        };
        if matches!(s.backing, Backing::Reg { .. }) {
            s.pos += n as u32;
        }
        Ok(n)
    }

    /// Writes `buf.len()` bytes at an explicit offset, leaving the
    /// handle's position untouched. Only valid for regular files.
    pub fn write_at(&self, buf: &[u8], offset: u32, table: &InodeTable) -> Result<usize> {
        let s = self.state.lock().unwrap();
        match &s.backing {
            Backing::Reg { inode } => table.write_at(inode, buf, offset),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Prevents writes to the underlying inode until `allow_write` is
    /// called or the handle is closed. Idempotent, matching the
    /// original's "only escalate once" guard.
    pub fn deny_write(&self, table: &InodeTable) {
        let mut s = self.state.lock().unwrap();
        if s.deny_write {
            return;
        }
        s.deny_write = true;
        match &s.backing {
            Backing::Reg { inode } => table.deny_write(inode),
            Backing::Dir { dir } => table.deny_write(dir.inode()),
            _ => {}
        }
    }

    pub fn allow_write(&self, table: &InodeTable) {
        let mut s = self.state.lock().unwrap();
        if !s.deny_write {
            return;
        }
        s.deny_write = false;
        match &s.backing {
            Backing::Reg { inode } => table.allow_write(inode),
            Backing::Dir { dir } => table.allow_write(dir.inode()),
            _ => {}
        }
    }

    pub fn length(&self, table: &InodeTable) -> Result<u32> {
        let s = self.state.lock().unwrap();
        match &s.backing {
            Backing::Reg { inode } => Ok(table.length(inode)),
            _ => Err(FsError::InvalidArgument),
        }
    }

    pub fn seek(&self, new_pos: u32) {
        self.state.lock().unwrap().pos = new_pos;
    }

    pub fn tell(&self) -> u32 {
        self.state.lock().unwrap().pos
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.state.lock().unwrap().backing, Backing::Dir { .. })
    }

    /// Returns a freshly `reopen`ed handle to the inode backing this
    /// file or directory, or `None` for the console and pipe kinds.
    /// The caller takes ownership of it and must eventually pass it to
    /// `InodeTable::close`, exactly like the inode returned by `reopen`.
    pub fn get_inode(&self, table: &InodeTable) -> Option<Inode> {
        match &self.state.lock().unwrap().backing {
            Backing::Reg { inode } => Some(table.reopen(inode)),
            Backing::Dir { dir } => Some(table.reopen(dir.inode())),
            _ => None,
        }
    }

    /// Returns a freshly opened `Directory` view over this handle's
    /// backing inode, or `None` if this handle isn't a directory. Like
    /// `get_inode`, the caller owns the result and must close it
    /// (`table.close(dir.into_inode())`).
    pub fn get_directory(&self, table: &InodeTable) -> Option<Directory> {
        match &self.state.lock().unwrap().backing {
            Backing::Dir { dir } => Some(Directory::open(table.reopen(dir.inode()))),
            _ => None,
        }
    }

    /// Reads the next entry name (skipping "." and "..") into
    /// `name_out`, advancing this handle's own position so repeated
    /// calls walk forward; restart from the beginning with `seek(0)`.
    /// Returns `true` if an entry was found, `false` at end of
    /// directory. Only valid for directory handles.
    pub fn readdir(&self, name_out: &mut String, table: &InodeTable) -> Result<bool> {
        let mut s = self.state.lock().unwrap();
        match &s.backing {
            Backing::Dir { dir } => match dir.readdir_from(table, s.pos as usize) {
                Some((entry, next_index)) => {
                    *name_out = entry.name;
                    s.pos = next_index as u32;
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Err(FsError::InvalidArgument),
        }
    }
}

/// Splits the final path component ("file name") off a slash-separated
/// path, matching `file_name_from_path`.
pub fn file_name_from_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_path_strips_directories() {
        assert_eq!(file_name_from_path("/a/bb/c"), "c");
        assert_eq!(file_name_from_path("c"), "c");
        assert_eq!(file_name_from_path("/c"), "c");
    }

    #[test]
    fn pipe_ends_see_each_others_writes() {
        let file_table = Arc::new(FileTable::default());
        let (read_end, write_end) = FileHandle::open_pipe(&file_table).unwrap();
        let cache = crate::cache::Cache::with_capacity(
            Box::new(crate::device::MemBlockDevice::new(4)),
            4,
        );
        let free_map = Arc::new(crate::free_map::FreeMap::format(cache.clone(), 4));
        let table = crate::inode::InodeTable::new(cache, free_map);

        assert_eq!(write_end.write(b"hi", &table).unwrap(), 2);
        let mut buf = [0u8; 2];
        assert_eq!(read_end.read(&mut buf, &table).unwrap(), 2);
        assert_eq!(&buf, b"hi");

        assert!(write_end.read(&mut buf, &table).is_err());
        assert!(read_end.write(b"x", &table).is_err());

        read_end.close(&table);
        write_end.close(&table);
    }

    #[test]
    fn exhausted_file_table_rejects_further_opens() {
        let file_table = Arc::new(FileTable::new(1));
        // Capacity 1 cannot fit both endpoints of a single pipe.
        assert!(matches!(
            FileHandle::open_pipe(&file_table),
            Err(FsError::TooManyOpenFiles)
        ));

        let file_table = Arc::new(FileTable::new(1));
        assert!(file_table.acquire().is_ok());
        assert!(matches!(file_table.acquire(), Err(FsError::TooManyOpenFiles)));
        file_table.release();
        assert!(file_table.acquire().is_ok());
    }

    #[test]
    fn directory_handle_supports_get_inode_get_directory_and_readdir() {
        let cache =
            crate::cache::Cache::with_capacity(Box::new(crate::device::MemBlockDevice::new(64)), 16);
        let free_map = Arc::new(crate::free_map::FreeMap::format(cache.clone(), 64));
        let table = crate::inode::InodeTable::new(cache, free_map);
        let file_table = Arc::new(FileTable::default());

        Directory::create(&table, 10, 10).unwrap();
        {
            let dir = Directory::open(table.open(10));
            dir.add(&table, "a", 20).unwrap();
            dir.add(&table, "b", 21).unwrap();
            table.close(dir.into_inode());
        }

        let handle = FileHandle::open(table.open(10), &table, &file_table).unwrap();
        assert!(handle.is_dir());

        let inode = handle.get_inode(&table).unwrap();
        assert!(table.is_dir(&inode));
        table.close(inode);

        let dir = handle.get_directory(&table).unwrap();
        assert_eq!(dir.entries(&table).len(), 2);
        table.close(dir.into_inode());

        let mut name = String::new();
        assert!(handle.readdir(&mut name, &table).unwrap());
        assert_eq!(name, "a");
        assert!(handle.readdir(&mut name, &table).unwrap());
        assert_eq!(name, "b");
        assert!(!handle.readdir(&mut name, &table).unwrap());

        handle.seek(0);
        assert!(handle.readdir(&mut name, &table).unwrap());
        assert_eq!(name, "a");

        handle.close(&table);
    }
}
