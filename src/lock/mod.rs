//! Locking primitives the storage core is built on.
//!
//! The original kernel hosts these on a bare-metal scheduler: a spinlock
//! disables interrupts on the current hart, a sleep lock parks the calling
//! process in the scheduler's run queue, and a "sleepable" spinlock exposes
//! a wait channel that the scheduler wakes on a matching `wakeup`. None of
//! that scheduler exists here, so each primitive below is rebuilt on the
//! equivalent `std::sync` building block while keeping the same shape and
//! the same names: a spinlock still never sleeps, a sleep lock guard is
//! still `Send` across blocking calls, and a sleepable lock's guard still
//! exposes `sleep`/`wakeup`.

mod semaphore;
mod sleepablelock;
mod sleeplock;
mod spinlock;

pub use semaphore::Semaphore;
pub use sleepablelock::{Sleepablelock, SleepablelockGuard};
pub use sleeplock::{Sleeplock, SleeplockGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
