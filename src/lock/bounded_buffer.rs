//! A generic bounded producer/consumer buffer, ported from
//! `examples/original_source/src/lib/kernel/queue.c`'s `array_queue`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A fixed-capacity circular buffer shared between producers and
/// consumers, with two insertion modes: `push` blocks the producer while
/// full, `push_or_drop` silently discards the newest item instead of
/// blocking (used by the cache's read-ahead queue, where a missed
/// prefetch hint is harmless).
pub struct BoundedBuffer<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    items_available: Condvar,
    slots_available: Condvar,
}

impl<T> BoundedBuffer<T> {
    /// Creates a buffer that holds up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a bounded buffer needs at least one slot");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            items_available: Condvar::new(),
            slots_available: Condvar::new(),
        }
    }

    /// Blocks until there is room, then enqueues `item`.
    pub fn push(&self, item: T) {
        let mut q = self.inner.lock().unwrap();
        while q.len() == self.capacity {
            q = self.slots_available.wait(q).unwrap();
        }
        q.push_back(item);
        self.items_available.notify_one();
    }

    /// Enqueues `item` if there is room; otherwise drops it without
    /// blocking. Returns whether the item was accepted.
    pub fn push_or_drop(&self, item: T) -> bool {
        let mut q = self.inner.lock().unwrap();
        if q.len() == self.capacity {
            return false;
        }
        q.push_back(item);
        self.items_available.notify_one();
        true
    }

    /// Blocks until an item is available, then dequeues it.
    pub fn pop(&self) -> T {
        let mut q = self.inner.lock().unwrap();
        while q.is_empty() {
            q = self.items_available.wait(q).unwrap();
        }
        let item = q.pop_front().unwrap();
        self.slots_available.notify_one();
        item
    }

    /// Current number of queued items. For diagnostics/tests only; racy
    /// against concurrent producers/consumers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a `push` would currently block.
    pub fn is_full(&self) -> bool {
        self.inner.lock().unwrap().len() == self.capacity
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Returns a clone of the front item without dequeuing it, or `None`
    /// if the buffer is empty.
    pub fn peek(&self) -> Option<T> {
        self.inner.lock().unwrap().front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_preserves_order() {
        let buf = BoundedBuffer::new(4);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        assert_eq!(buf.pop(), 1);
        assert_eq!(buf.pop(), 2);
        assert_eq!(buf.pop(), 3);
    }

    #[test]
    fn push_or_drop_discards_when_full() {
        let buf: BoundedBuffer<u32> = BoundedBuffer::new(2);
        assert!(buf.push_or_drop(1));
        assert!(buf.push_or_drop(2));
        assert!(!buf.push_or_drop(3));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop(), 1);
        assert_eq!(buf.pop(), 2);
    }

    #[test]
    fn peek_leaves_item_queued_and_is_full_tracks_capacity() {
        let buf: BoundedBuffer<u32> = BoundedBuffer::new(2);
        assert_eq!(buf.peek(), None);
        buf.push(1);
        assert!(!buf.is_full());
        assert_eq!(buf.peek(), Some(1));
        assert_eq!(buf.len(), 1, "peek must not dequeue");
        buf.push(2);
        assert!(buf.is_full());
        assert_eq!(buf.pop(), 1);
        assert_eq!(buf.pop(), 2);
    }

    #[test]
    fn pop_blocks_until_a_producer_pushes() {
        let buf = Arc::new(BoundedBuffer::new(1));
        let b2 = buf.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            b2.push(42);
        });
        assert_eq!(buf.pop(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn push_blocks_until_a_consumer_pops() {
        let buf = Arc::new(BoundedBuffer::new(1));
        buf.push(1);
        let b2 = buf.clone();
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            assert_eq!(b2.pop(), 1);
        });
        buf.push(2);
        consumer.join().unwrap();
        assert_eq!(buf.pop(), 2);
    }
}
