//! A classic counting, sleeping semaphore.
//!
//! Used by the block device queue (`bdq`) as the per-`Buf` completion
//! signal: the thread that issued a request waits on it, and the worker
//! thread standing in for the device interrupt posts it once the request
//! completes.

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a permit is available, then consumes it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Releases one permit, waking at most one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }
}
