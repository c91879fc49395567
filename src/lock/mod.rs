//! Concurrency primitives used by the buffer cache: a writer-preference
//! reader/writer lock and a generic bounded producer/consumer buffer.

mod bounded_buffer;
mod rwlock;

pub use bounded_buffer::BoundedBuffer;
pub use rwlock::{LockMode, RwLock};
