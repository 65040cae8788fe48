//! Spin locks.

use spin::{Mutex, MutexGuard};

/// Mutual exclusion lock that busy waits. Never sleeps while held: this is
/// enforced by convention (no `Spinlock` guard is ever passed to a `sleep`
/// call), the same discipline the source enforces by disabling interrupts
/// for the lifetime of the critical section.
pub struct Spinlock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

pub struct SpinlockGuard<'s, T> {
    name: &'static str,
    inner: MutexGuard<'s, T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        SpinlockGuard {
            name: self.name,
            inner: self.inner.lock(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> core::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> core::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
