//! The block cache and the write-ahead log it hosts.
//!
//! `Bcache` is the one piece of global, once-initialized state a mounted
//! file system needs (the source's equivalent is `FileSystem`, pairing a
//! `Superblock` with a `Sleepablelock<Log>`): the cached-block list, the log
//! state, the superblock and the device queue all live here.
//!
//! Acquiring a block takes its per-block sleep lock; the global list itself
//! is only ever touched with the spinlock held for the duration of a lookup
//! or a metadata flip, never across a sleep, per the "scoped acquisition,
//! release, then sleep-lock" discipline the source's cache follows.

use std::cell::Cell;
use std::sync::Arc;

use crate::bdq::{Bdq, Buf, BufFlags};
use crate::error::{Error, Result};
use crate::fs::superblock::Superblock;
use crate::klog::ktrace;
use crate::lock::{Sleeplock, Sleepablelock, Spinlock};
use crate::log::{LogHeader, LogState};
use crate::param::{BLOCK_SIZE, EVICTION_THRESHOLD, OP_MAX_NUM_BLOCKS};
use zerocopy::{AsBytes, FromBytes};

struct Slot {
    block_no: u32,
    valid: bool,
    pinned: bool,
    acquired: bool,
    data: Arc<Sleeplock<[u8; BLOCK_SIZE]>>,
}

pub struct Bcache {
    pub superblock: Superblock,
    bdq: Arc<Bdq>,
    slots: Spinlock<Vec<Slot>>,
    log: Sleepablelock<LogState>,
}

/// A cached, sleep-locked block. Dropping it is `release`: the lock is
/// dropped and, if the cache is over threshold and the block isn't pinned,
/// the slot is reclaimed; otherwise the block moves to the MRU end.
pub struct CachedBlock<'a> {
    bcache: &'a Bcache,
    block_no: u32,
    data: Arc<Sleeplock<[u8; BLOCK_SIZE]>>,
    guard: Option<crate::lock::SleeplockGuard<[u8; BLOCK_SIZE]>>,
}

impl CachedBlock<'_> {
    pub fn block_no(&self) -> u32 {
        self.block_no
    }
}

impl core::ops::Deref for CachedBlock<'_> {
    type Target = [u8; BLOCK_SIZE];
    fn deref(&self) -> &Self::Target {
        self.guard.as_ref().unwrap()
    }
}

impl core::ops::DerefMut for CachedBlock<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut().unwrap()
    }
}

impl Drop for CachedBlock<'_> {
    fn drop(&mut self) {
        self.guard = None;
        self.bcache.release_slot(&self.data);
    }
}

/// Per-transaction handle limiting a single op to `OP_MAX_NUM_BLOCKS` logged
/// blocks, per invariant §3.4.
pub struct OpContext {
    remaining_quota: Cell<u32>,
}

impl OpContext {
    pub fn remaining_quota(&self) -> u32 {
        self.remaining_quota.get()
    }
}

/// RAII bracket around one `begin_op`/`end_op` transaction. Dropping it is
/// `end_op`: if this was the last outstanding bracket, it runs the commit
/// protocol before returning.
pub struct Transaction<'a> {
    bcache: &'a Bcache,
    ctx: OpContext,
}

impl<'a> Transaction<'a> {
    pub fn sync(&self, block: &mut CachedBlock<'_>) {
        self.bcache.sync(Some(&self.ctx), block);
    }

    pub fn alloc(&self) -> Result<u32> {
        crate::fs::bitmap::alloc(self, self.bcache)
    }

    pub fn free(&self, block_no: u32) {
        crate::fs::bitmap::free(self, self.bcache, block_no);
    }

    pub fn bcache(&self) -> &'a Bcache {
        self.bcache
    }

    pub(crate) fn ctx(&self) -> &OpContext {
        &self.ctx
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.bcache.end_op(&self.ctx);
    }
}

impl Bcache {
    /// Mounts `superblock` over `bdq`, running crash recovery before
    /// returning so every later `acquire` sees a consistent disk.
    pub fn mount(superblock: Superblock, bdq: Arc<Bdq>) -> Self {
        let this = Self {
            superblock,
            bdq,
            slots: Spinlock::new("bcache", Vec::new()),
            log: Sleepablelock::new("log", LogState::new()),
        };
        this.recover();
        this
    }

    fn read_header(&self) -> LogHeader {
        let buf = self.bdq.rw(Buf::new(self.superblock.log_start));
        LogHeader::read_from_prefix(&buf.data[..]).expect("log header does not fit in one block")
    }

    fn write_header(&self, header: &LogHeader) {
        let mut buf = Buf::new(self.superblock.log_start);
        buf.flags.insert(BufFlags::DIRTY);
        header
            .write_to_prefix(&mut buf.data[..])
            .expect("log header does not fit in one block");
        self.bdq.rw(buf);
    }

    /// Recovery (phases 3 and 4 only; idempotent).
    fn recover(&self) {
        let header = self.read_header();
        if header.num_blocks == 0 {
            return;
        }
        ktrace!("recovering {} logged block(s)", header.num_blocks);
        self.install(header.blocks());
        self.write_header(&LogHeader::empty());
    }

    fn install(&self, blocks: &[u32]) {
        for (i, &block_no) in blocks.iter().enumerate() {
            let log_block_no = self.superblock.log_start + 1 + i as u32;
            let logged = self.bdq.rw(Buf::new(log_block_no));

            let mut home = self.acquire(block_no);
            home[..].copy_from_slice(&logged.data[..]);
            self.write_through(&home);
            self.clear_pinned(&home.data);
        }
    }

    fn write_through(&self, block: &CachedBlock<'_>) {
        let mut buf = Buf::new(block.block_no);
        buf.flags.insert(BufFlags::DIRTY);
        buf.data.copy_from_slice(&block[..]);
        self.bdq.rw(buf);
    }

    fn clear_pinned(&self, data: &Arc<Sleeplock<[u8; BLOCK_SIZE]>>) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| Arc::ptr_eq(&s.data, data)) {
            slot.pinned = false;
        }
    }

    /// Returns a cached block for `block_no` with its sleep-lock held and
    /// contents valid, reading through the device queue on a miss.
    pub fn acquire(&self, block_no: u32) -> CachedBlock<'_> {
        let data = {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.iter_mut().find(|s| s.block_no == block_no) {
                slot.acquired = true;
                slot.data.clone()
            } else {
                self.reuse_or_grow(&mut slots, block_no)
            }
        };

        let mut guard = data.lock();
        let needs_load = {
            let slots = self.slots.lock();
            let slot = slots
                .iter()
                .find(|s| Arc::ptr_eq(&s.data, &data))
                .expect("slot disappeared while sleep-locked");
            !slot.valid
        };
        if needs_load {
            let read = self.bdq.rw(Buf::new(block_no));
            *guard = read.data;
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.iter_mut().find(|s| Arc::ptr_eq(&s.data, &data)) {
                slot.valid = true;
            }
        }

        CachedBlock {
            bcache: self,
            block_no,
            data,
            guard: Some(guard),
        }
    }

    /// Picks the LRU-most evictable slot and repurposes it for `block_no`,
    /// or grows the cache if none is available. Caller already holds `slots`.
    fn reuse_or_grow(
        &self,
        slots: &mut Vec<Slot>,
        block_no: u32,
    ) -> Arc<Sleeplock<[u8; BLOCK_SIZE]>> {
        if let Some(pos) = slots.iter().rposition(|s| !s.acquired && !s.pinned) {
            let mut slot = slots.remove(pos);
            slot.block_no = block_no;
            slot.valid = false;
            slot.acquired = true;
            let data = slot.data.clone();
            slots.insert(0, slot);
            return data;
        }
        let data = Arc::new(Sleeplock::new("cached-block", [0u8; BLOCK_SIZE]));
        slots.insert(
            0,
            Slot {
                block_no,
                valid: false,
                pinned: false,
                acquired: true,
                data: data.clone(),
            },
        );
        data
    }

    fn release_slot(&self, data: &Arc<Sleeplock<[u8; BLOCK_SIZE]>>) {
        let mut slots = self.slots.lock();
        let pos = slots
            .iter()
            .position(|s| Arc::ptr_eq(&s.data, data))
            .expect("release of unknown slot");
        slots[pos].acquired = false;

        let evictable = !slots[pos].pinned;
        if evictable && slots.len() > EVICTION_THRESHOLD {
            slots.remove(pos);
        } else {
            let slot = slots.remove(pos);
            slots.insert(0, slot);
        }
    }

    /// Records that `block` has been modified.
    pub fn sync(&self, ctx: Option<&OpContext>, block: &mut CachedBlock<'_>) {
        let ctx = match ctx {
            None => {
                self.write_through(block);
                return;
            }
            Some(ctx) => ctx,
        };

        let mut log = self.log.lock();
        if log.find(block.block_no).is_some() {
            return;
        }
        let remaining = ctx.remaining_quota.get();
        assert!(remaining > 0, "op exceeded its log quota");
        ctx.remaining_quota.set(remaining - 1);
        log.blocks.push(block.block_no);
        drop(log);

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| Arc::ptr_eq(&s.data, &block.data)) {
            slot.pinned = true;
        }
    }

    /// Waits until admitting a new op would still satisfy
    /// `header.num_blocks + (outstanding + 1) * OP_MAX_NUM_BLOCKS <= LOG_MAX_SIZE`
    /// and no commit is in progress, then opens a transaction.
    pub fn begin_op(&self) -> Transaction<'_> {
        let mut log = self.log.lock();
        loop {
            let would_overflow = log.blocks.len()
                + (log.outstanding as usize + 1) * OP_MAX_NUM_BLOCKS
                > crate::param::LOG_MAX_SIZE;
            if log.committing || would_overflow {
                log.sleep();
            } else {
                log.outstanding += 1;
                break;
            }
        }
        drop(log);
        Transaction {
            bcache: self,
            ctx: OpContext {
                remaining_quota: Cell::new(OP_MAX_NUM_BLOCKS as u32),
            },
        }
    }

    fn end_op(&self, _ctx: &OpContext) {
        let mut log = self.log.lock();
        log.outstanding -= 1;
        assert!(!log.committing, "end_op during commit");

        if log.outstanding == 0 {
            log.committing = true;
            let blocks: Vec<u32> = log.blocks.iter().copied().collect();
            drop(log);

            self.commit(&blocks);

            let mut log = self.log.lock();
            log.committing = false;
            log.blocks.clear();
            log.wakeup();
        } else {
            log.wakeup();
        }
    }

    /// The five-phase commit protocol.
    fn commit(&self, blocks: &[u32]) {
        if blocks.is_empty() {
            return;
        }
        ktrace!("committing {} block(s)", blocks.len());

        // Phase 1: copy live data into the log region.
        for (i, &block_no) in blocks.iter().enumerate() {
            let src = self.acquire(block_no);
            let mut logged = Buf::new(self.superblock.log_start + 1 + i as u32);
            logged.flags.insert(BufFlags::DIRTY);
            logged.data.copy_from_slice(&src[..]);
            self.bdq.rw(logged);
        }

        // Phase 2: write the header. This is the commit point.
        self.write_header(&LogHeader::from_blocks(blocks));

        // Phase 3: install into home locations, unpinning as we go.
        self.install(blocks);

        // Phase 4: zero the header, marking the log clean.
        self.write_header(&LogHeader::empty());

        // Phase 5 (release) happens in the caller once it reacquires the
        // log lock, matching the source's "commit outside the lock, then
        // clear `committing` and wake waiters under it" structure.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::fs::mkfs;
    use crate::param::{EVICTION_THRESHOLD, OP_MAX_NUM_BLOCKS};

    fn mount(num_blocks: u32) -> Bcache {
        let sb = Superblock::new(num_blocks, 16, crate::param::LOG_MAX_SIZE as u32);
        let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
        mkfs::format(&bdq, &sb);
        Bcache::mount(sb, bdq)
    }

    #[test]
    fn repeated_sync_of_one_block_absorbs_into_a_single_log_entry() {
        let bcache = mount(256);
        let tx = bcache.begin_op();
        let mut block = bcache.acquire(10);
        tx.sync(&mut block);
        tx.sync(&mut block);
        drop(block);

        assert_eq!(tx.ctx().remaining_quota(), OP_MAX_NUM_BLOCKS as u32 - 1);
        assert_eq!(bcache.log.lock().blocks.len(), 1);
    }

    #[test]
    fn syncing_past_the_op_quota_panics() {
        let bcache = mount(256);
        let tx = bcache.begin_op();
        for block_no in 0..OP_MAX_NUM_BLOCKS as u32 {
            let mut block = bcache.acquire(block_no);
            tx.sync(&mut block);
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut block = bcache.acquire(OP_MAX_NUM_BLOCKS as u32);
            tx.sync(&mut block);
        }));
        assert!(result.is_err());
        // The panic above poisoned the log's inner mutex mid-hold; letting
        // `tx` drop normally would re-panic trying to run `end_op`.
        std::mem::forget(tx);
    }

    #[test]
    fn eviction_keeps_resident_slots_at_or_below_threshold_and_skips_pinned() {
        let bcache = mount(256);

        let tx = bcache.begin_op();
        let mut pinned = bcache.acquire(200);
        tx.sync(&mut pinned);
        let pinned_data = pinned.data.clone();
        drop(pinned);

        for block_no in 0..(2 * EVICTION_THRESHOLD as u32) {
            let block = bcache.acquire(block_no);
            drop(block);
        }

        let slots = bcache.slots.lock();
        assert!(slots.len() <= EVICTION_THRESHOLD);
        assert!(slots.iter().any(|s| Arc::ptr_eq(&s.data, &pinned_data)));
        drop(slots);
        drop(tx);
    }
}
