//! Crate-wide error taxonomy.
//!
//! Routine failures are surfaced as a `FsError` rather than a generic
//! `Result<T, ()>`: the kinds below are exactly the "kind, not encoding"
//! list the file-system boundary exposes. Invariant violations (a sector
//! double-owned, `deny_write_cnt > open_cnt`, ...) are not represented here;
//! those are programming errors and are reported with `assert!`/`panic!`,
//! matching how the rest of this crate treats them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No entry by that name along the path.
    NotFound,
    /// Expected a regular file, found a directory.
    IsADirectory,
    /// Expected a directory, found something else.
    NotADirectory,
    /// Operation not valid for this descriptor's type or role.
    BadDescriptor,
    /// The per-process (or per-system) file table has no free slot.
    TooManyOpenFiles,
    /// The free-sector map has no sector left to allocate.
    OutOfSpace,
    /// A path component is longer than `param::NAME_MAX`.
    NameTooLong,
    /// Argument out of the range the operation accepts.
    InvalidArgument,
    /// Wrote to a pipe whose read end is already closed, with nothing
    /// delivered.
    BrokenPipe,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::IsADirectory => "is a directory",
            FsError::NotADirectory => "not a directory",
            FsError::BadDescriptor => "bad file descriptor",
            FsError::TooManyOpenFiles => "too many open files",
            FsError::OutOfSpace => "no space left on device",
            FsError::NameTooLong => "file name too long",
            FsError::InvalidArgument => "invalid argument",
            FsError::BrokenPipe => "broken pipe",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

pub type Result<T> = std::result::Result<T, FsError>;
