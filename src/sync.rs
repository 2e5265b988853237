//! Reader/Writer Lock
//!
//! A shared/exclusive lock built from a mutex and a condition variable.
//!
//! ## Semantics
//! - Any number of readers may hold the lock while no writer does
//! - A writer waits until the reader count is zero and no writer holds it
//! - No writer-priority queue: a continuous stream of incoming readers can
//!   starve a waiting writer
//!
//! Guards release on drop. The sharded backend takes the read side for
//! lookups and the write side for shard assignment and index mutation.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Shared/exclusive lock with RAII guards
#[derive(Debug, Default)]
pub struct RwLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl RwLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire shared access, blocking while a writer holds the lock
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writer {
            self.cond.wait(&mut state);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire exclusive access, blocking until all readers and writers leave
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 {
            self.cond.wait(&mut state);
        }
        state.writer = true;
        WriteGuard { lock: self }
    }
}

/// Shared access; dropping releases one reader
pub struct ReadGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

/// Exclusive access; dropping releases the writer
pub struct WriteGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer = false;
        self.lock.cond.notify_all();
    }
}
