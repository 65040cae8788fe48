//! Long-term sleep locks.
//!
//! Used to guard the contents of a single cached block (and, above that,
//! a single inode): the holder may block on the device queue's completion
//! semaphore while holding it, so unlike `Spinlock` it must be safe to park
//! the owning thread for an arbitrary duration.
//!
//! The source's sleep lock parks the acquiring process in the scheduler and
//! records the holder's pid for `holding()`. Hosted on `std`, there is no
//! scheduler to park in, so acquisition instead waits on a `Condvar` guarding
//! a locked flag. The guard owns an `Arc` clone of the lock rather than
//! borrowing it, so it can be held across a call that itself blocks (the
//! simulated disk round trip) without tying it to a stack frame — the same
//! freedom the source gets for free by storing locks directly inside
//! kernel objects that never move.

use std::cell::UnsafeCell;
use std::sync::{Arc, Condvar, Mutex};

pub struct Sleeplock<T> {
    name: &'static str,
    locked: Mutex<bool>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Sleeplock<T> {}
unsafe impl<T: Send> Sync for Sleeplock<T> {}

pub struct SleeplockGuard<T> {
    lock: Arc<Sleeplock<T>>,
}

impl<T> Sleeplock<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: Mutex::new(false),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, blocking the calling thread until it is free.
    pub fn lock(self: &Arc<Self>) -> SleeplockGuard<T> {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.cond.wait(locked).unwrap();
        }
        *locked = true;
        drop(locked);
        SleeplockGuard { lock: self.clone() }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(self: &Arc<Self>) -> Option<SleeplockGuard<T>> {
        let mut locked = self.locked.lock().unwrap();
        if *locked {
            return None;
        }
        *locked = true;
        Some(SleeplockGuard { lock: self.clone() })
    }

    pub fn holding(self: &Arc<Self>) -> bool {
        *self.locked.lock().unwrap()
    }
}

impl<T> Drop for SleeplockGuard<T> {
    fn drop(&mut self) {
        let mut locked = self.lock.locked.lock().unwrap();
        *locked = false;
        drop(locked);
        self.lock.cond.notify_one();
    }
}

impl<T> core::ops::Deref for SleeplockGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SleeplockGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
