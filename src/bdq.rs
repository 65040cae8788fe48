//! The Block Device Queue: turns an interrupt-driven block device into a
//! synchronous per-request API.
//!
//! The source drains a single SD-class device from its interrupt handler:
//! on `READ_RDY` it copies the completed block into the request at the head
//! of the queue, on `DATA_DONE` it acknowledges a write, and either way it
//! starts the next queued request before returning from the interrupt.
//! There is no interrupt controller to hang that logic off of here, so a
//! single dedicated worker thread stands in for it: it blocks on a condvar
//! while the queue is empty, and otherwise repeatedly services the head of
//! the queue to completion before moving on, which preserves the "only one
//! device transaction outstanding at a time" and FIFO-completion guarantees
//! exactly as specified.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use bitflags::bitflags;

use crate::device::BlockDevice;
use crate::lock::{Semaphore, Spinlock};
use crate::param::BLOCK_SIZE;

bitflags! {
    pub struct BufFlags: u8 {
        /// Contents have been read from disk.
        const VALID = 0b01;
        /// Contents differ from the device and must be written back.
        const DIRTY = 0b10;
    }
}

/// A single block-sized I/O request, owned by whichever layer submitted it
/// until `Bdq::rw` returns it.
pub struct Buf {
    pub block_no: u32,
    pub flags: BufFlags,
    pub data: [u8; BLOCK_SIZE],
}

impl Buf {
    pub fn new(block_no: u32) -> Self {
        Self {
            block_no,
            flags: BufFlags::empty(),
            data: [0u8; BLOCK_SIZE],
        }
    }
}

struct Request {
    buf: Arc<Mutex<Buf>>,
    done: Arc<Semaphore>,
}

/// Wakes the worker thread whenever a request is pushed onto an empty queue.
struct Doorbell {
    mutex: Mutex<u64>,
    cond: Condvar,
}

impl Doorbell {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn ring(&self) {
        let mut gen = self.mutex.lock().unwrap();
        *gen = gen.wrapping_add(1);
        self.cond.notify_one();
    }

    fn wait(&self, seen: u64) -> u64 {
        let mut gen = self.mutex.lock().unwrap();
        while *gen == seen {
            gen = self.cond.wait(gen).unwrap();
        }
        *gen
    }

    fn current(&self) -> u64 {
        *self.mutex.lock().unwrap()
    }
}

pub struct Bdq {
    device: Box<dyn BlockDevice>,
    queue: Spinlock<VecDeque<Request>>,
    doorbell: Doorbell,
}

impl Bdq {
    /// Creates a queue in front of `device` and spawns its worker thread.
    /// The worker exits once every `Arc<Bdq>` handle has been dropped.
    pub fn new(device: Box<dyn BlockDevice>) -> Arc<Self> {
        let this = Arc::new(Self {
            device,
            queue: Spinlock::new("bdq", VecDeque::new()),
            doorbell: Doorbell::new(),
        });
        let weak: Weak<Bdq> = Arc::downgrade(&this);
        thread::Builder::new()
            .name("bdq-worker".into())
            .spawn(move || Self::worker_loop(weak))
            .expect("failed to spawn bdq worker thread");
        this
    }

    /// Submits `buf` for I/O determined by `buf.flags & DIRTY` and blocks
    /// until it completes. Returns the buffer with `data` filled (read) or
    /// `DIRTY` cleared and the write acknowledged (write).
    pub fn rw(&self, buf: Buf) -> Buf {
        let shared = Arc::new(Mutex::new(buf));
        let done = Arc::new(Semaphore::new(0));
        let request = Request {
            buf: shared.clone(),
            done: done.clone(),
        };

        let was_empty = {
            let mut queue = self.queue.lock();
            let was_empty = queue.is_empty();
            queue.push_back(request);
            was_empty
        };
        if was_empty {
            self.doorbell.ring();
        }

        done.wait();
        Arc::try_unwrap(shared)
            .unwrap_or_else(|_| unreachable!("request owner is unique after completion"))
            .into_inner()
            .unwrap()
    }

    fn worker_loop(weak: Weak<Bdq>) {
        let mut seen = match weak.upgrade() {
            Some(this) => this.doorbell.current(),
            None => return,
        };
        loop {
            let this = match weak.upgrade() {
                Some(this) => this,
                None => return,
            };

            let head = { this.queue.lock().front().map(|r| (r.buf.clone(), r.done.clone())) };
            match head {
                None => {
                    seen = this.doorbell.wait(seen);
                }
                Some((buf, done)) => {
                    this.service(&buf);
                    this.queue.lock().pop_front();
                    done.post();
                }
            }
        }
    }

    /// Performs the device transfer for the request at the head of the
    /// queue; panics on device failure, matching the source's treatment of
    /// controller errors as fatal.
    fn service(&self, buf: &Arc<Mutex<Buf>>) {
        let mut buf = buf.lock().unwrap();
        if buf.flags.contains(BufFlags::DIRTY) {
            self.device
                .write_block(buf.block_no, &buf.data)
                .expect("block device write failed");
            buf.flags.remove(BufFlags::DIRTY);
        } else {
            self.device
                .read_block(buf.block_no, &mut buf.data)
                .expect("block device read failed");
            buf.flags.insert(BufFlags::VALID);
        }
    }
}
