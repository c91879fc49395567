//! A writer-preference reader/writer lock, ported from
//! `examples/original_source/src/filesys/rw-lock.c`.
//!
//! Unlike `std::sync::RwLock`, this lock exposes an explicit
//! acquire/release API rather than RAII guards: the buffer cache pins a
//! block across a `get_block`/`read_block`/`mark_dirty`/`put_block`
//! sequence that does not nest as a single Rust scope, so a `Drop`-based
//! guard does not fit the call shape. Callers are responsible for pairing
//! every acquire with a release.

use std::sync::{Condvar, Mutex};

/// The lock's current disposition, visible to callers that need to know
/// without attempting an acquire (e.g. the cache's eviction scan).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Unlocked,
    ReadLocked,
    WriteLocked,
}

struct State {
    num_readers: u32,
    num_writers: u32,
    pending_readers: u32,
    pending_writers: u32,
}

/// A writer-preference reader/writer lock.
///
/// Readers block while any writer holds or is waiting for the lock;
/// writers block while any reader or writer holds the lock, or while
/// readers are waiting (so a writer never starves behind a stream of
/// readers). `mode` mirrors `state` for lock-free inspection.
pub struct RwLock {
    state: Mutex<State>,
    can_read: Condvar,
    can_write: Condvar,
    pub mode: Mutex<LockMode>,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                num_readers: 0,
                num_writers: 0,
                pending_readers: 0,
                pending_writers: 0,
            }),
            can_read: Condvar::new(),
            can_write: Condvar::new(),
            mode: Mutex::new(LockMode::Unlocked),
        }
    }

    /// Blocks until a shared hold can be taken, then takes it.
    pub fn read_acquire(&self) {
        let mut s = self.state.lock().unwrap();
        s.pending_readers += 1;
        while s.num_writers > 0 || s.pending_writers > 0 {
            s = self.can_read.wait(s).unwrap();
        }
        s.pending_readers -= 1;
        s.num_readers += 1;
        *self.mode.lock().unwrap() = LockMode::ReadLocked;
    }

    /// Releases one shared hold. If this was the last reader and a writer
    /// is waiting, wakes it.
    pub fn read_release(&self) {
        let mut s = self.state.lock().unwrap();
        assert!(s.num_readers > 0, "read_release without a held reader");
        s.num_readers -= 1;
        if s.num_readers == 0 {
            *self.mode.lock().unwrap() = LockMode::Unlocked;
            self.can_write.notify_one();
        }
    }

    /// Blocks until an exclusive hold can be taken, then takes it.
    pub fn write_acquire(&self) {
        let mut s = self.state.lock().unwrap();
        s.pending_writers += 1;
        while s.num_readers > 0 || s.num_writers > 0 {
            s = self.can_write.wait(s).unwrap();
        }
        s.pending_writers -= 1;
        s.num_writers += 1;
        *self.mode.lock().unwrap() = LockMode::WriteLocked;
    }

    /// Attempts an exclusive hold without blocking. Used by the cache's
    /// LRU eviction scan, which must skip pinned blocks rather than wait
    /// on them.
    pub fn try_write_acquire(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.num_readers > 0 || s.num_writers > 0 {
            return false;
        }
        s.num_writers += 1;
        *self.mode.lock().unwrap() = LockMode::WriteLocked;
        true
    }

    /// Releases an exclusive hold. Prefers waking pending readers first
    /// (writer-preference still yields to an already-waiting batch of
    /// readers once the writer steps aside, matching the original's
    /// broadcast-then-signal order); if none are pending, wakes one writer.
    pub fn write_release(&self) {
        let mut s = self.state.lock().unwrap();
        assert!(s.num_writers == 1, "write_release without a held writer");
        s.num_writers -= 1;
        *self.mode.lock().unwrap() = LockMode::Unlocked;
        if s.pending_readers > 0 {
            self.can_read.notify_all();
        } else {
            self.can_write.notify_one();
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}
