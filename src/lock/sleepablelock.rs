//! Spin-shaped locks whose guard can sleep.
//!
//! The write-ahead log's in-memory state is guarded by one of these: a
//! thread that can't start an operation because the log has no spare slots
//! calls `sleep()` on its guard, releasing the lock and blocking until
//! `end_op` calls `wakeup()` after freeing slots. Unlike `Sleeplock`, a
//! sleepable lock is meant for short critical sections (inspect a few
//! fields, decide whether to sleep) rather than being held across device
//! I/O, so it is built directly on `Mutex`/`Condvar` rather than needing an
//! `Arc`-owned guard.

use std::sync::{Condvar, Mutex, MutexGuard};

pub struct Sleepablelock<T> {
    name: &'static str,
    inner: Mutex<T>,
    cond: Condvar,
}

pub struct SleepablelockGuard<'s, T> {
    lock: &'s Sleepablelock<T>,
    inner: Option<MutexGuard<'s, T>>,
}

impl<T> Sleepablelock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lock(&self) -> SleepablelockGuard<'_, T> {
        SleepablelockGuard {
            lock: self,
            inner: Some(self.inner.lock().unwrap()),
        }
    }
}

impl<T> SleepablelockGuard<'_, T> {
    /// Atomically releases the lock and blocks the calling thread, then
    /// reacquires the lock before returning. The caller must re-check its
    /// wait condition in a loop, as with any condition variable.
    pub fn sleep(&mut self) {
        let guard = self.inner.take().expect("sleep on released guard");
        let guard = self.lock.cond.wait(guard).unwrap();
        self.inner = Some(guard);
    }

    /// Wakes every thread sleeping on this lock.
    pub fn wakeup(&self) {
        self.lock.cond.notify_all();
    }
}

impl<T> core::ops::Deref for SleepablelockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.as_ref().expect("use after sleep panicked")
    }
}

impl<T> core::ops::DerefMut for SleepablelockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("use after sleep panicked")
    }
}
