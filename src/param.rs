//! Compile-time layout and sizing constants.

/// Size of a sector, in bytes. The fixed I/O unit of the block device.
pub const SECTOR_SIZE: usize = 512;

/// Number of direct block pointers held inline in an inode, chosen so the
/// on-disk inode struct fills exactly one sector.
pub const NDIRECT: usize = 123;

/// Number of sector indices held in one indirect sector (`SECTOR_SIZE / 4`).
pub const NINDIRECT: usize = SECTOR_SIZE / 4;

/// Largest logical block index (exclusive) addressable through
/// direct + indirect + doubly-indirect sectors.
pub const MAXFILE_BLOCKS: usize = NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT;

/// "No sector" sentinel: an all-ones sector index. Never a valid sector.
pub const NO_SECTOR: u32 = u32::MAX;

/// "Out of space" sentinel used internally by `map_block` during writes.
/// Distinct from `NO_SECTOR`; never stored on disk.
pub const OUT_OF_SPACE: u32 = u32::MAX - 1;

/// Magic marker written into every on-disk inode, to catch reads of a
/// sector that was never initialized as an inode. ASCII "INOD".
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Sector holding the free-sector map's home block.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// First sector available for inode/data allocation.
pub const FIRST_FREE_SECTOR: u32 = 2;

/// Maximum length of one path component / directory entry name.
pub const NAME_MAX: usize = 14;

/// Number of entries a freshly created directory reserves room for
/// (beyond "." and ".."), matching `examples/original_source`'s
/// `filesys_dir_create` convention of a caller-chosen entry count.
pub const DEFAULT_DIR_ENTRIES: usize = 16;

/// Default number of blocks held by the buffer cache. Tests override this
/// via `Cache::with_capacity` to exercise eviction (see scenario S3).
pub const CACHE_SIZE: usize = 64;

/// Capacity of the read-ahead queue (sector numbers awaiting prefetch).
pub const READ_AHEAD_QUEUE_SIZE: usize = 16;

/// Period between passes of the background write-behind (flush) daemon.
pub const FLUSH_INTERVAL_MS: u64 = 5000;

/// Ring capacity of an in-memory pipe, in bytes.
pub const PIPE_CAPACITY: usize = 512;

/// Maximum number of simultaneously open file handles, system-wide.
pub const MAX_OPEN_FILES: usize = 256;
