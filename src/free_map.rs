//! The free-sector bitmap.
//!
//! Persisted in a small, fixed run of reserved sectors read and written
//! directly through the buffer cache, rather than wrapped in an inode
//! the way a regular file's data is: wrapping it in an inode would make
//! inode creation depend on the free map to allocate the inode's own
//! sector, a bootstrap cycle that isn't worth solving here.

use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::param::{FREE_MAP_SECTOR, SECTOR_SIZE};

/// Bit `i` set means sector `i` is free.
pub struct FreeMap {
    cache: Arc<Cache>,
    bits: Mutex<Vec<bool>>,
    map_sectors: u32,
}

impl FreeMap {
    /// Formats a fresh free map over a device of `sector_count` sectors.
    /// Reserves the sectors the map itself occupies plus any sectors
    /// already spoken for (the map's own home block(s) and the root
    /// directory's inode sector) by marking them used up front.
    pub fn format(cache: Arc<Cache>, sector_count: u32) -> Self {
        let map_sectors = Self::sectors_needed(sector_count);
        let mut bits = vec![true; sector_count as usize];
        for s in 0..map_sectors {
            bits[s as usize] = false;
        }
        let fm = Self {
            cache,
            bits: Mutex::new(bits),
            map_sectors,
        };
        fm.persist();
        fm
    }

    /// Loads an existing free map back from its reserved sectors.
    pub fn open(cache: Arc<Cache>, sector_count: u32) -> Self {
        let map_sectors = Self::sectors_needed(sector_count);
        let mut bits = vec![false; sector_count as usize];
        for s in 0..map_sectors {
            let idx = cache.get_block(FREE_MAP_SECTOR + s, false);
            let data = cache.read_block(idx);
            cache.put_block(idx);
            for (byte_idx, byte) in data.iter().enumerate() {
                for bit in 0..8 {
                    let sector = (s as usize) * SECTOR_SIZE * 8 + byte_idx * 8 + bit;
                    if sector < sector_count as usize {
                        bits[sector] = (byte >> bit) & 1 == 1;
                    }
                }
            }
        }
        Self {
            cache,
            bits: Mutex::new(bits),
            map_sectors,
        }
    }

    fn sectors_needed(sector_count: u32) -> u32 {
        let bits_per_sector = (SECTOR_SIZE * 8) as u32;
        (sector_count + bits_per_sector - 1) / bits_per_sector
    }

    /// Reserves and returns a single free sector, or `None` if the map is
    /// exhausted. Allocation always requests one sector at a time; a
    /// multi-sector run isn't exercised anywhere in this crate.
    pub fn allocate(&self) -> Option<u32> {
        let mut bits = self.bits.lock().unwrap();
        let sector = bits.iter().position(|&free| free)?;
        bits[sector] = false;
        drop(bits);
        self.persist();
        Some(sector as u32)
    }

    /// Marks a specific `sector` used without going through the
    /// free-list search. Used once at startup to reserve the root
    /// directory's fixed sector regardless of how large the map itself
    /// turns out to be.
    pub fn reserve(&self, sector: u32) {
        let mut bits = self.bits.lock().unwrap();
        assert!(bits[sector as usize], "sector {} already in use", sector);
        bits[sector as usize] = false;
        drop(bits);
        self.persist();
    }

    /// Marks `sector` free again. Releasing an already-free sector is a
    /// programming error and panics.
    pub fn release(&self, sector: u32) {
        let mut bits = self.bits.lock().unwrap();
        assert!(
            !bits[sector as usize],
            "sector {} released while already free",
            sector
        );
        bits[sector as usize] = true;
        drop(bits);
        self.persist();
    }

    fn persist(&self) {
        let bits = self.bits.lock().unwrap();
        for s in 0..self.map_sectors {
            let mut data = vec![0u8; SECTOR_SIZE];
            for byte_idx in 0..SECTOR_SIZE {
                let mut byte = 0u8;
                for bit in 0..8 {
                    let sector = (s as usize) * SECTOR_SIZE * 8 + byte_idx * 8 + bit;
                    if sector < bits.len() && bits[sector] {
                        byte |= 1 << bit;
                    }
                }
                data[byte_idx] = byte;
            }
            let idx = self.cache.get_block(FREE_MAP_SECTOR + s, true);
            self.cache.write_block(idx, &data);
            self.cache.put_block(idx);
        }
    }
}
