//! pinfs: the file-system core of a small teaching operating system.
//!
//! This crate implements the on-disk file system and its supporting
//! concurrency primitives: an inode layer over a fixed-block device, a
//! write-back buffer cache, a writer-preference reader/writer lock used per
//! cache block, a bounded producer/consumer buffer, and an in-memory pipe.
//! It does not implement process scheduling, system-call dispatch, or user
//! memory copying; a host embeds this crate and drives it from whatever
//! execution model it has (see `fs::FileSystem`).

mod cache;
mod device;
pub mod directory;
mod error;
pub mod file;
mod free_map;
pub mod fs;
pub mod inode;
pub mod lock;
mod param;
pub mod pipe;

pub use device::{BlockDevice, MemBlockDevice};
pub use error::{FsError, Result};
pub use fs::FileSystem;
pub use param::SECTOR_SIZE;
