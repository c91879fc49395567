//! An in-memory pipe: a bounded byte ring shared between a read end and
//! a write end. Ported from
//! `examples/original_source/src/filesys/pipe.c`.
//!
//! One deviation from the original: `read`/`write` here do not stop
//! early on a NUL byte. The C original's `pipe_read`/`pipe_write` do,
//! which looks like a leftover from a line-oriented test harness
//! rather than a real pipe invariant.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{FsError, Result};
use crate::param::PIPE_CAPACITY;

struct State {
    buffer: VecDeque<u8>,
    read_open: bool,
    write_open: bool,
}

/// The shared pipe buffer. Both endpoints hold an `Arc<Pipe>`; the last
/// one to close drops it.
pub struct Pipe {
    state: Mutex<State>,
    items_available: Condvar,
    slots_available: Condvar,
}

impl Pipe {
    /// Creates a new pipe with both endpoints open.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(PIPE_CAPACITY),
                read_open: true,
                write_open: true,
            }),
            items_available: Condvar::new(),
            slots_available: Condvar::new(),
        }
    }

    /// Reads up to `buf.len()` bytes, blocking while the pipe is empty
    /// and the write end is still open. Returns 0 immediately once the
    /// pipe is empty and the write end has closed (end of stream).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut s = self.state.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            while s.buffer.is_empty() {
                if !s.write_open {
                    return n;
                }
                s = self.items_available.wait(s).unwrap();
            }
            buf[n] = s.buffer.pop_front().unwrap();
            n += 1;
            self.slots_available.notify_one();
        }
        n
    }

    /// Writes `buf`, blocking while the pipe is full and the read end is
    /// still open. The read end closing is checked before every byte is
    /// pushed, not only while waiting for room: a reader that closes
    /// while the buffer still has space must stop the write just as
    /// surely as one that closes while it's full. If the read end is
    /// already closed and nothing could be delivered, returns
    /// `FsError::BrokenPipe`; if some bytes got through before the read
    /// end closed, returns that short count instead.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut s = self.state.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            if !s.read_open {
                break;
            }
            while s.buffer.len() == PIPE_CAPACITY {
                if !s.read_open {
                    break;
                }
                s = self.slots_available.wait(s).unwrap();
            }
            if !s.read_open {
                break;
            }
            s.buffer.push_back(buf[n]);
            n += 1;
            self.items_available.notify_one();
        }
        if n == 0 && !s.read_open {
            Err(FsError::BrokenPipe)
        } else {
            Ok(n)
        }
    }

    /// Closes the read end. Wakes any writer blocked on a full pipe so
    /// it can observe the break.
    pub fn close_read(&self) {
        let mut s = self.state.lock().unwrap();
        s.read_open = false;
        self.slots_available.notify_all();
    }

    /// Closes the write end. Wakes any reader blocked on an empty pipe
    /// so it can observe end of stream.
    pub fn close_write(&self) {
        let mut s = self.state.lock().unwrap();
        s.write_open = false;
        self.items_available.notify_all();
    }

    pub fn is_read_open(&self) -> bool {
        self.state.lock().unwrap().read_open
    }

    pub fn is_write_open(&self) -> bool {
        self.state.lock().unwrap().write_open
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let p = Pipe::new();
        let written = p.write(b"hello").unwrap();
        assert_eq!(written, 5);
        let mut buf = [0u8; 5];
        let read = p.read(&mut buf);
        assert_eq!(read, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn nul_byte_does_not_terminate_early() {
        let p = Pipe::new();
        p.write(&[1, 0, 2]).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(p.read(&mut buf), 3);
        assert_eq!(buf, [1, 0, 2]);
    }

    #[test]
    fn read_returns_zero_at_eof_after_write_end_closes() {
        let p = Arc::new(Pipe::new());
        p.close_write();
        let mut buf = [0u8; 4];
        assert_eq!(p.read(&mut buf), 0);
    }

    #[test]
    fn write_returns_short_count_after_read_end_closes() {
        let p = Arc::new(Pipe::new());
        // Fill the pipe so a subsequent write would block.
        let filler = vec![1u8; PIPE_CAPACITY];
        p.write(&filler).unwrap();

        let p2 = p.clone();
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            p2.close_read();
        });

        assert!(matches!(p.write(&[9, 9, 9]), Err(FsError::BrokenPipe)));
        closer.join().unwrap();
    }

    #[test]
    fn write_to_already_closed_read_end_is_broken_pipe() {
        let p = Pipe::new();
        p.close_read();
        assert!(matches!(p.write(&[1, 2, 3]), Err(FsError::BrokenPipe)));
    }

    #[test]
    fn write_stops_as_soon_as_read_end_closes_even_with_room_left() {
        let p = Arc::new(Pipe::new());
        // Close the read end before the buffer is anywhere near full so
        // a write that only checked "full" would never notice.
        p.close_read();
        assert!(matches!(p.write(&[1, 2, 3]), Err(FsError::BrokenPipe)));
        assert_eq!(p.state.lock().unwrap().buffer.len(), 0);
    }

    #[test]
    fn blocked_read_wakes_on_write() {
        let p = Arc::new(Pipe::new());
        let p2 = p.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            p2.write(&[42]).unwrap();
        });
        let mut buf = [0u8; 1];
        assert_eq!(p.read(&mut buf), 1);
        assert_eq!(buf[0], 42);
        writer.join().unwrap();
    }
}
