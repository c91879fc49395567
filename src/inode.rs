//! The inode store: on-disk inode layout, block mapping, and the
//! in-memory open-inode table. Ported from
//! `examples/original_source/src/filesys/inode.c`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use zerocopy::{AsBytes, FromBytes};

use crate::cache::Cache;
use crate::error::{FsError, Result};
use crate::param::{INODE_MAGIC, NDIRECT, NINDIRECT, NO_SECTOR, SECTOR_SIZE};
use crate::free_map::FreeMap;

/// The on-disk inode. Packed to fill exactly one sector; `static_assert`
/// below catches any drift.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct Dinode {
    pub length: u32,
    pub is_dir: u32,
    pub magic: u32,
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub double_indirect: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<Dinode>(), SECTOR_SIZE);

impl Dinode {
    fn empty(length: u32, is_dir: bool) -> Self {
        Self {
            length,
            is_dir: is_dir as u32,
            magic: INODE_MAGIC,
            direct: [NO_SECTOR; NDIRECT],
            indirect: NO_SECTOR,
            double_indirect: NO_SECTOR,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Dinode::read_from(bytes).expect("cache block is not sector-sized")
    }
}

/// An open inode: reference count, removal flag, and the deny-write
/// count an exec-style caller uses to protect a running image.
struct InodeState {
    open_cnt: u32,
    removed: bool,
    deny_write_cnt: u32,
}

/// A handle to an open inode. Cheaply cloned; all clones share the same
/// underlying reference count via the owning `InodeTable`.
pub struct Inode {
    sector: u32,
    table: Arc<InodeTableInner>,
}

struct InodeTableInner {
    cache: Arc<Cache>,
    free_map: Arc<FreeMap>,
    open: Mutex<HashMap<u32, InodeState>>,
}

/// The process-wide table of open inodes, ensuring opening the same
/// sector twice returns shared bookkeeping rather than two independent
/// copies (matching the original's `open_inodes` list scan).
pub struct InodeTable {
    inner: Arc<InodeTableInner>,
}

impl InodeTable {
    pub fn new(cache: Arc<Cache>, free_map: Arc<FreeMap>) -> Self {
        Self {
            inner: Arc::new(InodeTableInner {
                cache,
                free_map,
                open: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Initializes a fresh inode at `sector` with the given initial
    /// length and type. A nonzero `length` is realized by writing a
    /// single zero byte at `length - 1`: that one write forces
    /// `map_block` to allocate through every intervening indirection
    /// level and sets the on-disk length, while leaving the blocks in
    /// between as sparse holes (read as zero) rather than eagerly
    /// materializing them — the same trick `inode_create` in
    /// `examples/original_source/src/filesys/inode.c` uses to force the
    /// allocation path end-to-end.
    pub fn create(&self, sector: u32, length: u32, is_dir: bool) -> Result<()> {
        let idx = self.inner.cache.get_block(sector, true);
        let dinode = Dinode::empty(0, is_dir);
        self.inner.cache.write_block(idx, dinode.as_bytes());
        self.inner.cache.put_block(idx);

        if length > 0 {
            let inode = self.open(sector);
            let written = self.write_at(&inode, &[0u8], length - 1)?;
            if written != 1 {
                self.remove(&inode);
                self.close(inode);
                return Err(FsError::OutOfSpace);
            }
            self.close(inode);
        }
        Ok(())
    }

    /// Opens `sector`, bumping its reference count if already open. The
    /// first time a sector is opened, its on-disk magic is checked
    /// against `INODE_MAGIC`: a mismatch means `sector` was never
    /// initialized by `create`, which is a caller error, not a routine
    /// failure, so it panics rather than returning a `Result`.
    pub fn open(&self, sector: u32) -> Inode {
        let mut open = self.inner.open.lock().unwrap();
        match open.get_mut(&sector) {
            Some(state) => {
                state.open_cnt += 1;
                drop(open);
            }
            None => {
                open.insert(
                    sector,
                    InodeState {
                        open_cnt: 1,
                        removed: false,
                        deny_write_cnt: 0,
                    },
                );
                drop(open);

                let idx = self.inner.cache.get_block(sector, false);
                let data = Dinode::from_bytes(&self.inner.cache.read_block(idx));
                self.inner.cache.put_block(idx);
                assert_eq!(
                    data.magic, INODE_MAGIC,
                    "sector {sector} does not hold an inode (bad magic)"
                );
            }
        }
        Inode {
            sector,
            table: self.inner.clone(),
        }
    }

    /// Bumps `inode`'s reference count and returns an equivalent handle.
    pub fn reopen(&self, inode: &Inode) -> Inode {
        self.open(inode.sector)
    }

    /// Closes `inode`. If this was the last reference and the inode was
    /// marked removed, frees its data and index blocks.
    pub fn close(&self, inode: Inode) {
        let last = {
            let mut open = self.inner.open.lock().unwrap();
            let state = open.get_mut(&inode.sector).expect("inode not open");
            state.open_cnt -= 1;
            state.open_cnt == 0
        };

        if last {
            let removed = {
                let open = self.inner.open.lock().unwrap();
                open.get(&inode.sector).unwrap().removed
            };
            if removed {
                self.deallocate(inode.sector);
            }
            self.inner.open.lock().unwrap().remove(&inode.sector);
        }
    }

    fn deallocate(&self, sector: u32) {
        let length = self.length_of(sector);
        let mut pos = 0u32;
        while pos < length {
            if let Some(s) = self.map_block(sector, pos, false) {
                self.inner.free_map.release(s);
            }
            pos += SECTOR_SIZE as u32;
        }

        let idx = self.inner.cache.get_block(sector, true);
        let data = Dinode::from_bytes(&self.inner.cache.read_block(idx));
        self.inner.cache.put_block(idx);

        if data.indirect != NO_SECTOR {
            self.inner.free_map.release(data.indirect);
        }
        if data.double_indirect != NO_SECTOR {
            let di_idx = self.inner.cache.get_block(data.double_indirect, true);
            let di_table = self.inner.cache.read_block(di_idx);
            self.inner.cache.put_block(di_idx);
            for entry in di_table.chunks_exact(4) {
                let s = u32::from_ne_bytes(entry.try_into().unwrap());
                if s != NO_SECTOR {
                    self.inner.free_map.release(s);
                }
            }
            self.inner.free_map.release(data.double_indirect);
        }
        self.inner.free_map.release(sector);
    }

    /// Marks `inode` for deletion once the last opener closes it.
    pub fn remove(&self, inode: &Inode) {
        self.inner
            .open
            .lock()
            .unwrap()
            .get_mut(&inode.sector)
            .unwrap()
            .removed = true;
    }

    pub fn is_removed(&self, inode: &Inode) -> bool {
        self.inner.open.lock().unwrap().get(&inode.sector).unwrap().removed
    }

    pub fn get_inumber(&self, inode: &Inode) -> u32 {
        inode.sector
    }

    pub fn deny_write(&self, inode: &Inode) {
        let mut open = self.inner.open.lock().unwrap();
        let state = open.get_mut(&inode.sector).unwrap();
        state.deny_write_cnt += 1;
        assert!(state.deny_write_cnt <= state.open_cnt);
    }

    pub fn allow_write(&self, inode: &Inode) {
        let mut open = self.inner.open.lock().unwrap();
        let state = open.get_mut(&inode.sector).unwrap();
        assert!(state.deny_write_cnt > 0);
        state.deny_write_cnt -= 1;
    }

    fn length_of(&self, sector: u32) -> u32 {
        let idx = self.inner.cache.get_block(sector, false);
        let data = Dinode::from_bytes(&self.inner.cache.read_block(idx));
        self.inner.cache.put_block(idx);
        data.length
    }

    pub fn length(&self, inode: &Inode) -> u32 {
        self.length_of(inode.sector)
    }

    pub fn is_dir(&self, inode: &Inode) -> bool {
        let idx = self.inner.cache.get_block(inode.sector, false);
        let data = Dinode::from_bytes(&self.inner.cache.read_block(idx));
        self.inner.cache.put_block(idx);
        data.is_dir != 0
    }

    /// Maps byte offset `pos` within `sector`'s inode to a data sector,
    /// dispatching across direct, indirect, and doubly-indirect ranges.
    /// On a write, allocates through holes and past EOF; on a read,
    /// returns `None` for a hole. Returns `Some(OUT_OF_SPACE)`-shaped
    /// failure as `Err` at the call site instead — here a `None` return
    /// with `self.last_error` would be un-idiomatic, so callers use
    /// `try_map_block` when allocation can fail.
    fn map_block(&self, inode_sector: u32, pos: u32, write: bool) -> Option<u32> {
        self.try_map_block(inode_sector, pos, write).ok().flatten()
    }

    fn try_map_block(&self, inode_sector: u32, pos: u32, write: bool) -> Result<Option<u32>> {
        let block = self.inner.cache.get_block(inode_sector, write);
        let mut data = Dinode::from_bytes(&self.inner.cache.read_block(block));

        let mapping = (pos as usize) / SECTOR_SIZE;
        let result = if mapping < NDIRECT {
            self.lookup_direct(&mut data, mapping, write)
        } else if mapping < NDIRECT + NINDIRECT {
            self.lookup_indirect(&mut data, mapping, write)
        } else if mapping < NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT {
            self.lookup_double_indirect(&mut data, mapping, write)
        } else {
            Ok(None)
        };

        match result {
            Ok(Some(sector)) => {
                self.inner.cache.write_block(block, data.as_bytes());
                self.inner.cache.put_block(block);
                Ok(Some(sector))
            }
            Ok(None) => {
                self.inner.cache.put_block(block);
                Ok(None)
            }
            Err(e) => {
                self.inner.cache.put_block(block);
                Err(e)
            }
        }
    }

    fn lookup_direct(&self, data: &mut Dinode, mapping: usize, write: bool) -> Result<Option<u32>> {
        let mut sector = data.direct[mapping];
        if mapping + 1 < NDIRECT {
            self.inner.cache.read_ahead(data.direct[mapping + 1]);
        }
        if sector == NO_SECTOR {
            if !write {
                return Ok(None);
            }
            sector = self
                .inner
                .free_map
                .allocate()
                .ok_or(FsError::OutOfSpace)?;
            data.direct[mapping] = sector;
        }
        Ok(Some(sector))
    }

    /// Allocates and zero-initializes an indirect table (all entries
    /// `NO_SECTOR`) if `*slot` is empty and this is a write; returns the
    /// index-block sector.
    fn access_indirect_block(&self, slot: &mut u32, write: bool) -> Result<Option<u32>> {
        if *slot == NO_SECTOR {
            if !write {
                return Ok(None);
            }
            let sector = self
                .inner
                .free_map
                .allocate()
                .ok_or(FsError::OutOfSpace)?;
            let idx = self.inner.cache.get_block(sector, true);
            let mut table = self.inner.cache.zero_block(idx);
            for chunk in table.chunks_exact_mut(4) {
                chunk.copy_from_slice(&NO_SECTOR.to_ne_bytes());
            }
            self.inner.cache.write_block(idx, &table);
            self.inner.cache.put_block(idx);
            *slot = sector;
        }
        Ok(Some(*slot))
    }

    fn lookup_indirect(&self, data: &mut Dinode, mapping: usize, write: bool) -> Result<Option<u32>> {
        let indirect = match self.access_indirect_block(&mut data.indirect, write)? {
            Some(s) => s,
            None => return Ok(None),
        };
        self.lookup_in_table(indirect, mapping - NDIRECT, write)
    }

    fn lookup_double_indirect(
        &self,
        data: &mut Dinode,
        mapping: usize,
        write: bool,
    ) -> Result<Option<u32>> {
        let double_indirect = match self.access_indirect_block(&mut data.double_indirect, write)? {
            Some(s) => s,
            None => return Ok(None),
        };

        let rel = mapping - NDIRECT - NINDIRECT;
        let outer_index = rel / NINDIRECT;
        let inner_index = rel % NINDIRECT;

        let di_idx = self.inner.cache.get_block(double_indirect, write);
        let mut di_table = self.inner.cache.read_block(di_idx);
        let mut indirect_slot =
            u32::from_ne_bytes(di_table[outer_index * 4..outer_index * 4 + 4].try_into().unwrap());

        let indirect = match self.access_indirect_block(&mut indirect_slot, write) {
            Ok(Some(s)) => s,
            Ok(None) => {
                self.inner.cache.put_block(di_idx);
                return Ok(None);
            }
            Err(e) => {
                self.inner.cache.put_block(di_idx);
                return Err(e);
            }
        };
        if indirect_slot
            != u32::from_ne_bytes(di_table[outer_index * 4..outer_index * 4 + 4].try_into().unwrap())
        {
            di_table[outer_index * 4..outer_index * 4 + 4].copy_from_slice(&indirect_slot.to_ne_bytes());
            self.inner.cache.write_block(di_idx, &di_table);
        }
        self.inner.cache.put_block(di_idx);

        self.lookup_in_table(indirect, inner_index, write)
    }

    fn lookup_in_table(&self, table_sector: u32, index: usize, write: bool) -> Result<Option<u32>> {
        let idx = self.inner.cache.get_block(table_sector, write);
        let mut table = self.inner.cache.read_block(idx);
        let mut sector = u32::from_ne_bytes(table[index * 4..index * 4 + 4].try_into().unwrap());

        if index + 1 < NINDIRECT {
            let next = u32::from_ne_bytes(
                table[(index + 1) * 4..(index + 1) * 4 + 4].try_into().unwrap(),
            );
            self.inner.cache.read_ahead(next);
        }

        if sector == NO_SECTOR {
            if !write {
                self.inner.cache.put_block(idx);
                return Ok(None);
            }
            sector = match self.inner.free_map.allocate() {
                Some(s) => s,
                None => {
                    self.inner.cache.put_block(idx);
                    return Err(FsError::OutOfSpace);
                }
            };
            table[index * 4..index * 4 + 4].copy_from_slice(&sector.to_ne_bytes());
            self.inner.cache.write_block(idx, &table);
        }
        self.inner.cache.put_block(idx);
        Ok(Some(sector))
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, zero-filling
    /// any hole in a sparse region. Returns the number of bytes read.
    pub fn read_at(&self, inode: &Inode, buf: &mut [u8], offset: u32) -> usize {
        let length = self.length(inode);
        if offset >= length {
            return 0;
        }

        let mut bytes_read = 0usize;
        let mut pos = offset;
        let mut remaining = buf.len().min((length - offset) as usize);

        while remaining > 0 {
            let sector_ofs = (pos as usize) % SECTOR_SIZE;
            let chunk = remaining.min(SECTOR_SIZE - sector_ofs);

            match self.map_block(inode.sector, pos, false) {
                None => {
                    buf[bytes_read..bytes_read + chunk].fill(0);
                }
                Some(sector) => {
                    let idx = self.inner.cache.get_block(sector, false);
                    let data = self.inner.cache.read_block(idx);
                    buf[bytes_read..bytes_read + chunk]
                        .copy_from_slice(&data[sector_ofs..sector_ofs + chunk]);
                    self.inner.cache.put_block(idx);
                }
            }

            pos += chunk as u32;
            bytes_read += chunk;
            remaining -= chunk;
        }
        bytes_read
    }

    /// Writes `buf` starting at `offset`, extending the inode (and
    /// filling any intervening hole via sparse allocation) as needed.
    /// If the free map is exhausted partway through, the write stops
    /// there and returns the count written so far rather than an error;
    /// bytes already written up to that point remain written, and
    /// earlier allocations are not rolled back.
    pub fn write_at(&self, inode: &Inode, buf: &[u8], offset: u32) -> Result<usize> {
        {
            let open = self.inner.open.lock().unwrap();
            if open.get(&inode.sector).unwrap().deny_write_cnt > 0 {
                return Ok(0);
            }
        }

        let mut bytes_written = 0usize;
        let mut pos = offset;
        let mut remaining = buf.len();

        while remaining > 0 {
            let sector = match self.try_map_block(inode.sector, pos, true) {
                Ok(Some(s)) => s,
                Ok(None) => break,
                Err(_) => break,
            };
            let sector_ofs = (pos as usize) % SECTOR_SIZE;
            let chunk = remaining.min(SECTOR_SIZE - sector_ofs);

            let idx = self.inner.cache.get_block(sector, true);
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let mut data = self.inner.cache.zero_block(idx);
                data.copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
                self.inner.cache.write_block(idx, &data);
            } else {
                let mut data = self.inner.cache.read_block(idx);
                data[sector_ofs..sector_ofs + chunk]
                    .copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
                self.inner.cache.write_block(idx, &data);
            }
            self.inner.cache.put_block(idx);

            pos += chunk as u32;
            bytes_written += chunk;
            remaining -= chunk;
        }

        let idx = self.inner.cache.get_block(inode.sector, true);
        let mut data = Dinode::from_bytes(&self.inner.cache.read_block(idx));
        if data.length < pos {
            data.length = pos;
            self.inner.cache.write_block(idx, data.as_bytes());
        }
        self.inner.cache.put_block(idx);

        Ok(bytes_written)
    }
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        // Mirrors `reopen`: bump the shared count rather than aliasing
        // an un-refcounted handle.
        let mut open = self.table.open.lock().unwrap();
        open.get_mut(&self.sector).unwrap().open_cnt += 1;
        drop(open);
        Inode {
            sector: self.sector,
            table: self.table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::device::MemBlockDevice;

    fn table(sectors: u32) -> (InodeTable, Arc<FreeMap>) {
        let cache = Cache::with_capacity(Box::new(MemBlockDevice::new(sectors)), 16);
        let free_map = Arc::new(FreeMap::format(cache.clone(), sectors));
        (InodeTable::new(cache, free_map.clone()), free_map)
    }

    #[test]
    fn dinode_is_exactly_one_sector() {
        assert_eq!(std::mem::size_of::<Dinode>(), SECTOR_SIZE);
    }

    #[test]
    fn create_then_read_zero_length_file() {
        let (t, _fm) = table(64);
        t.create(10, 0, false).unwrap();
        let inode = t.open(10);
        assert_eq!(t.length(&inode), 0);
        assert!(!t.is_dir(&inode));
        t.close(inode);
    }

    #[test]
    fn sparse_write_extends_length_and_fills_holes() {
        let (t, _fm) = table(512);
        t.create(10, 0, false).unwrap();
        let inode = t.open(10);

        let payload = [7u8; 16];
        let written = t.write_at(&inode, &payload, 2000).unwrap();
        assert_eq!(written, 16);
        assert_eq!(t.length(&inode), 2016);

        let mut buf = [0xffu8; 16];
        let read = t.read_at(&inode, &mut buf, 0);
        assert_eq!(read, 16);
        assert_eq!(buf, [0u8; 16]);

        let mut buf2 = [0u8; 16];
        t.read_at(&inode, &mut buf2, 2000);
        assert_eq!(buf2, payload);
        t.close(inode);
    }

    #[test]
    fn write_at_stops_and_returns_partial_count_when_out_of_space() {
        let (t, fm) = table(20);
        t.create(5, 0, false).unwrap();
        let inode = t.open(5);

        // Drain every sector the map still has to hand out, so the next
        // allocation `write_at` needs fails.
        while fm.allocate().is_some() {}

        let written = t.write_at(&inode, &[1, 2, 3], 0).unwrap();
        assert_eq!(written, 0, "no sector was available to extend into");
        assert_eq!(t.length(&inode), 0, "a failed allocation must not move length forward");
        t.close(inode);
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn open_panics_on_sector_never_initialized_as_an_inode() {
        let (t, _fm) = table(64);
        // Sector 10 was never passed to `create`, so it has no magic.
        t.open(10);
    }

    #[test]
    fn open_twice_shares_refcount() {
        let (t, _fm) = table(64);
        t.create(10, 0, false).unwrap();
        let a = t.open(10);
        let b = t.open(10);
        t.close(a);
        t.close(b);
    }
}
