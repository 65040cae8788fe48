//! The inode layer: on-disk inode table, direct/indirect block addressing,
//! and directory entries, all built on `Bcache`+`Transaction`.
//!
//! Mirrors the source's three-state inode lifecycle: an inode is
//! *allocated* if its on-disk `typ` is non-`Invalid`; it has an in-memory
//! presence (a `Slot`, keyed by `inode_no`) while some `Inode` handle
//! references it (`ref_count > 0`); and that presence is *valid* once its
//! `Dinode` has actually been loaded from disk, which only happens once the
//! per-inode sleep lock is held (`lock`).

use std::sync::Arc;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::bcache::{Bcache, Transaction};
use crate::error::{Error, Result};
use crate::fs::superblock::Superblock;
use crate::lock::{Sleeplock, SleeplockGuard, Spinlock};
use crate::param::{
    BLOCK_SIZE, FILE_NAME_MAX_LENGTH, INODE_MAX_BYTES, INODE_NUM_DIRECT, INODE_NUM_INDIRECT,
    INODE_PER_BLOCK, ROOT_INODE_NO,
};

/// On-disk inode type tag. `Invalid` marks a free slot.
///
/// Stored on disk as the plain `u16` `Dinode::typ` rather than derived
/// `zerocopy` traits: `FromBytes` can't be derived for a `#[repr(u16)]` enum
/// with only 4 of 2^16 valid bit patterns, which is why the teacher's own
/// `DInodeType` carries no zerocopy derives either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeType {
    Invalid = 0,
    Regular = 1,
    Directory = 2,
    Device = 3,
}

impl InodeType {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => InodeType::Invalid,
            1 => InodeType::Regular,
            2 => InodeType::Directory,
            3 => InodeType::Device,
            other => panic!("corrupt on-disk inode type {other}"),
        }
    }
}

/// On-disk inode entry, packed `INODE_PER_BLOCK` to a block.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct Dinode {
    typ: u16,
    major: u16,
    minor: u16,
    pub num_links: u16,
    pub num_bytes: u32,
    pub addrs: [u32; INODE_NUM_DIRECT],
    pub indirect: u32,
}

const_assert_eq!(std::mem::size_of::<Dinode>() * INODE_PER_BLOCK <= BLOCK_SIZE);

impl Dinode {
    fn free() -> Self {
        Self {
            typ: InodeType::Invalid as u16,
            major: 0,
            minor: 0,
            num_links: 0,
            num_bytes: 0,
            addrs: [0; INODE_NUM_DIRECT],
            indirect: 0,
        }
    }

    fn with_kind(mut self, kind: InodeType) -> Self {
        self.typ = kind as u16;
        self
    }

    /// A freshly-initialized entry of the given kind, links and size zeroed.
    /// Used both by `InodeTable::alloc` and by `fs::mkfs` to seed the root
    /// directory.
    pub fn new(kind: InodeType) -> Self {
        Self::free().with_kind(kind)
    }

    pub fn kind(&self) -> InodeType {
        InodeType::from_raw(self.typ)
    }

    pub fn device(&self) -> (u16, u16) {
        (self.major, self.minor)
    }

    pub fn set_device(&mut self, major: u16, minor: u16) {
        self.major = major;
        self.minor = minor;
    }
}

/// A fixed-size directory entry: a name and the inode number it names.
/// Zeroed out (`inode_no == 0`) entries are tombstones left by `remove`.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct DirEntry {
    name: [u8; FILE_NAME_MAX_LENGTH],
    pub inode_no: u32,
}

impl DirEntry {
    fn new(name: &str, inode_no: u32) -> Self {
        assert!(
            name.len() <= FILE_NAME_MAX_LENGTH,
            "directory entry name longer than FILE_NAME_MAX_LENGTH"
        );
        let mut packed = [0u8; FILE_NAME_MAX_LENGTH];
        packed[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: packed,
            inode_no,
        }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).expect("directory entry name is not valid utf-8")
    }
}

const DIR_ENTRY_SIZE: usize = std::mem::size_of::<DirEntry>();

/// An indirect block: an array of data-block addresses, referenced by an
/// inode to extend its direct addressing past `INODE_NUM_DIRECT` blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
struct IndirectBlock {
    addrs: [u32; INODE_NUM_INDIRECT],
}

const_assert_eq!(std::mem::size_of::<IndirectBlock>() <= BLOCK_SIZE);

/// A lightweight, `Copy` handle to an in-memory inode. Cheap to pass
/// around; does not itself hold the per-inode lock or own a reference
/// count decrement — that is `put`'s job, explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    inode_no: u32,
}

impl Inode {
    pub fn inode_no(&self) -> u32 {
        self.inode_no
    }
}

struct InodeState {
    valid: bool,
    dinode: Dinode,
}

struct Slot {
    inode_no: u32,
    ref_count: u32,
    state: Arc<Sleeplock<InodeState>>,
}

/// The in-memory inode table: per-inode sleep locks guarding lazily-loaded
/// `Dinode` copies, plus the reference-counted table of which inodes are
/// currently referenced by some `Inode` handle.
pub struct InodeTable<'a> {
    bcache: &'a Bcache,
    superblock: Superblock,
    slots: Spinlock<Vec<Slot>>,
}

/// The per-inode sleep lock held, with its `Dinode` loaded. Dropping this
/// is `unlock`.
pub struct InodeGuard<'a> {
    table: &'a InodeTable<'a>,
    inode: Inode,
    guard: SleeplockGuard<InodeState>,
}

impl<'a> InodeTable<'a> {
    pub fn new(bcache: &'a Bcache, superblock: Superblock) -> Self {
        Self {
            bcache,
            superblock,
            slots: Spinlock::new("inode-table", Vec::new()),
        }
    }

    /// The file system root directory's inode, `ROOT_INODE_NO`.
    pub fn root(&self) -> Inode {
        self.get(ROOT_INODE_NO)
    }

    /// Scans the inode region for the first `Invalid` entry, marks it
    /// `kind`, and returns its number. `NoSpace` if every slot is in use —
    /// the source panics here; this crate surfaces it as a recoverable
    /// error per the ambient error-handling policy.
    pub fn alloc(&self, tx: &Transaction<'_>, kind: InodeType) -> Result<Inode> {
        assert_ne!(kind, InodeType::Invalid, "cannot allocate an invalid inode");
        for inode_no in 1..self.superblock.num_inodes {
            let mut block = self.bcache.acquire(self.superblock.iblock(inode_no));
            let slot_in_block = (inode_no as usize % INODE_PER_BLOCK) * std::mem::size_of::<Dinode>();
            let dinode = Dinode::read_from_prefix(&block[slot_in_block..]).unwrap();
            if dinode.kind() == InodeType::Invalid {
                Dinode::new(kind)
                    .write_to_prefix(&mut block[slot_in_block..])
                    .unwrap();
                tx.sync(&mut block);
                return Ok(Inode { inode_no });
            }
        }
        Err(Error::NoSpace)
    }

    /// Finds or creates the in-memory slot for `inode_no` and increments its
    /// reference count.
    pub fn get(&self, inode_no: u32) -> Inode {
        assert!(inode_no > 0 && inode_no < self.superblock.num_inodes, "inode number out of range");
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.inode_no == inode_no) {
            slot.ref_count += 1;
            return Inode { inode_no };
        }
        slots.push(Slot {
            inode_no,
            ref_count: 1,
            state: Arc::new(Sleeplock::new(
                "inode",
                InodeState {
                    valid: false,
                    dinode: Dinode::free(),
                },
            )),
        });
        Inode { inode_no }
    }

    /// Increments the reference count of an already-held `Inode`.
    pub fn share(&self, inode: Inode) -> Inode {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.inode_no == inode.inode_no)
            .expect("share of an inode with no in-memory presence");
        slot.ref_count += 1;
        inode
    }

    /// Acquires the per-inode sleep lock, loading the on-disk entry on
    /// first lock. Follows the "scoped spinlock snapshot, release, then
    /// sleep-lock" discipline: the table spinlock is only ever held long
    /// enough to clone the per-inode lock handle, never across the sleep.
    pub fn lock(&self, inode: Inode) -> InodeGuard<'_> {
        let state = {
            let slots = self.slots.lock();
            slots
                .iter()
                .find(|s| s.inode_no == inode.inode_no)
                .expect("lock of an inode with no in-memory presence")
                .state
                .clone()
        };
        let mut guard = state.lock();
        if !guard.valid {
            let block = self.bcache.acquire(self.superblock.iblock(inode.inode_no));
            let slot_in_block =
                (inode.inode_no as usize % INODE_PER_BLOCK) * std::mem::size_of::<Dinode>();
            guard.dinode = Dinode::read_from_prefix(&block[slot_in_block..]).unwrap();
            guard.valid = true;
        }
        InodeGuard {
            table: self,
            inode,
            guard,
        }
    }

    /// Decrements the reference count. If it reaches zero and the on-disk
    /// link count is also zero, frees every owned disk resource (data
    /// blocks, the indirect block, the inode slot itself) in `tx` and drops
    /// the in-memory presence.
    pub fn put(&self, tx: &Transaction<'_>, inode: Inode) {
        let mut guard = self.lock(inode);
        let is_last_ref = {
            let slots = self.slots.lock();
            slots
                .iter()
                .find(|s| s.inode_no == inode.inode_no)
                .expect("put of an inode with no in-memory presence")
                .ref_count
                == 1
        };

        if is_last_ref && guard.num_links() == 0 {
            guard.clear(tx);
            let mut block = self.bcache.acquire(self.superblock.iblock(inode.inode_no));
            let slot_in_block =
                (inode.inode_no as usize % INODE_PER_BLOCK) * std::mem::size_of::<Dinode>();
            Dinode::free()
                .write_to_prefix(&mut block[slot_in_block..])
                .unwrap();
            tx.sync(&mut block);
            drop(block);
            drop(guard);

            let mut slots = self.slots.lock();
            slots.retain(|s| s.inode_no != inode.inode_no);
            return;
        }

        drop(guard);
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.inode_no == inode.inode_no)
            .expect("put of an inode with no in-memory presence");
        slot.ref_count -= 1;
    }
}

impl InodeGuard<'_> {
    pub fn inode(&self) -> Inode {
        self.inode
    }

    pub fn kind(&self) -> InodeType {
        self.guard.dinode.kind()
    }

    pub fn num_links(&self) -> u16 {
        self.guard.dinode.num_links
    }

    pub fn set_num_links(&mut self, num_links: u16) {
        self.guard.dinode.num_links = num_links;
    }

    pub fn num_bytes(&self) -> u32 {
        self.guard.dinode.num_bytes
    }

    pub fn device(&self) -> (u16, u16) {
        self.guard.dinode.device()
    }

    pub fn set_device(&mut self, major: u16, minor: u16) {
        self.guard.dinode.set_device(major, minor);
    }

    /// Loads (`do_write == false`) or flushes (`do_write == true`) the
    /// on-disk entry. A load with `tx == None` is used by recovery and any
    /// other out-of-transaction reader; a flush always requires a
    /// transaction since it is a modification.
    pub fn sync(&mut self, tx: Option<&Transaction<'_>>, do_write: bool) {
        let mut block = self
            .table
            .bcache
            .acquire(self.table.superblock.iblock(self.inode.inode_no));
        let slot_in_block =
            (self.inode.inode_no as usize % INODE_PER_BLOCK) * std::mem::size_of::<Dinode>();
        if do_write {
            assert!(self.guard.valid, "sync(do_write=true) on an unloaded inode");
            self.guard
                .dinode
                .write_to_prefix(&mut block[slot_in_block..])
                .unwrap();
            tx.expect("sync(do_write=true) requires a transaction").sync(&mut block);
        } else {
            self.guard.dinode = Dinode::read_from_prefix(&block[slot_in_block..]).unwrap();
            self.guard.valid = true;
        }
    }

    /// Frees every data block (direct and indirect), the indirect block
    /// itself, and resets `num_bytes` to zero. Called by `put` just before
    /// the on-disk entry is marked `Invalid`.
    fn clear(&mut self, tx: &Transaction<'_>) {
        for addr in self.guard.dinode.addrs.iter_mut() {
            if *addr != 0 {
                tx.free(*addr);
                *addr = 0;
            }
        }
        if self.guard.dinode.indirect != 0 {
            let mut block = self.table.bcache.acquire(self.guard.dinode.indirect);
            let mut indirect = IndirectBlock::read_from_prefix(&block[..]).unwrap();
            for addr in indirect.addrs.iter_mut() {
                if *addr != 0 {
                    tx.free(*addr);
                    *addr = 0;
                }
            }
            indirect.write_to_prefix(&mut block[..]).unwrap();
            tx.sync(&mut block);
            drop(block);
            tx.free(self.guard.dinode.indirect);
            self.guard.dinode.indirect = 0;
        }
        self.guard.dinode.num_bytes = 0;
        self.sync(Some(tx), true);
    }

    /// Translates a byte offset into the block number holding it,
    /// allocating on demand when `tx.is_some()`. Returns `0` for an
    /// unallocated block when `tx.is_none()` (the read-past-hole path).
    fn map(&mut self, tx: Option<&Transaction<'_>>, offset: usize) -> u32 {
        let block_idx = offset / BLOCK_SIZE;
        if block_idx < INODE_NUM_DIRECT {
            let addr = self.guard.dinode.addrs[block_idx];
            if addr != 0 {
                return addr;
            }
            let tx = match tx {
                Some(tx) => tx,
                None => return 0,
            };
            let addr = tx.alloc().expect("no free data block");
            self.guard.dinode.addrs[block_idx] = addr;
            addr
        } else {
            let indirect_idx = block_idx - INODE_NUM_DIRECT;
            assert!(indirect_idx < INODE_NUM_INDIRECT, "offset past INODE_MAX_BYTES");

            if self.guard.dinode.indirect == 0 {
                let tx = match tx {
                    Some(tx) => tx,
                    None => return 0,
                };
                self.guard.dinode.indirect = tx.alloc().expect("no free data block");
            }
            let mut block = self.table.bcache.acquire(self.guard.dinode.indirect);
            let mut indirect = IndirectBlock::read_from_prefix(&block[..]).unwrap();
            let addr = indirect.addrs[indirect_idx];
            if addr != 0 {
                return addr;
            }
            let tx = match tx {
                Some(tx) => tx,
                None => return 0,
            };
            let addr = tx.alloc().expect("no free data block");
            indirect.addrs[indirect_idx] = addr;
            indirect.write_to_prefix(&mut block[..]).unwrap();
            tx.sync(&mut block);
            addr
        }
    }

    /// Reads up to `dst.len()` bytes starting at `offset`, clamped to
    /// `num_bytes`. A hole (never-written block within file bounds) reads
    /// back as zero.
    pub fn read(&mut self, dst: &mut [u8], offset: usize) -> usize {
        assert!(offset <= self.num_bytes() as usize, "read past end of file");
        let count = dst.len().min(self.num_bytes() as usize - offset);

        let mut done = 0;
        while done < count {
            let cur = offset + done;
            let block_no = self.map(None, cur);
            let within_block = cur % BLOCK_SIZE;
            let chunk = (count - done).min(BLOCK_SIZE - within_block);
            if block_no == 0 {
                dst[done..done + chunk].fill(0);
            } else {
                let block = self.table.bcache.acquire(block_no);
                dst[done..done + chunk].copy_from_slice(&block[within_block..within_block + chunk]);
            }
            done += chunk;
        }
        done
    }

    /// Writes `src` starting at `offset`, growing `num_bytes` if the write
    /// extends past the current end of file. Panics if `offset` is past the
    /// current end, or if the write would extend past `INODE_MAX_BYTES`.
    pub fn write(&mut self, tx: &Transaction<'_>, src: &[u8], offset: usize) -> usize {
        assert!(offset <= self.num_bytes() as usize, "write starts past end of file");
        let end = offset + src.len();
        assert!(end <= INODE_MAX_BYTES, "write past INODE_MAX_BYTES");

        let mut done = 0;
        while done < src.len() {
            let cur = offset + done;
            let block_no = self.map(Some(tx), cur);
            let within_block = cur % BLOCK_SIZE;
            let chunk = (src.len() - done).min(BLOCK_SIZE - within_block);
            let mut block = self.table.bcache.acquire(block_no);
            block[within_block..within_block + chunk].copy_from_slice(&src[done..done + chunk]);
            tx.sync(&mut block);
            done += chunk;
        }

        if !src.is_empty() && end as u32 > self.guard.dinode.num_bytes {
            self.guard.dinode.num_bytes = end as u32;
            self.sync(Some(tx), true);
        }
        done
    }

    /// Looks up `name` in this directory, returning its inode number and
    /// slot index. Panics if this inode is not a directory.
    pub fn lookup(&mut self, name: &str) -> Option<(u32, usize)> {
        assert_eq!(self.kind(), InodeType::Directory, "lookup on a non-directory inode");
        let num_entries = self.num_bytes() as usize / DIR_ENTRY_SIZE;
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        for index in 0..num_entries {
            self.read(&mut raw, index * DIR_ENTRY_SIZE);
            let entry = DirEntry::read_from(&raw[..]).unwrap();
            if entry.inode_no != 0 && entry.name() == name {
                return Some((entry.inode_no, index));
            }
        }
        None
    }

    /// Appends a `{name, inode_no}` entry at the end of the directory.
    /// Returns `None` if `name` already exists.
    pub fn insert(&mut self, tx: &Transaction<'_>, name: &str, inode_no: u32) -> Option<usize> {
        assert_eq!(self.kind(), InodeType::Directory, "insert on a non-directory inode");
        if self.lookup(name).is_some() {
            return None;
        }
        let entry = DirEntry::new(name, inode_no);
        let offset = self.num_bytes() as usize;
        self.write(tx, entry.as_bytes(), offset);
        Some(offset / DIR_ENTRY_SIZE)
    }

    /// Zeroes the directory entry at `slot_index`; the slot is a tombstone
    /// and is never reclaimed by a later `insert`.
    pub fn remove(&mut self, tx: &Transaction<'_>, slot_index: usize) {
        assert_eq!(self.kind(), InodeType::Directory, "remove on a non-directory inode");
        let zero = DirEntry::new("", 0);
        self.write(tx, zero.as_bytes(), slot_index * DIR_ENTRY_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdq::Bdq;
    use crate::device::MemDevice;
    use crate::fs::mkfs;

    fn mount() -> (Bcache, Superblock) {
        let sb = Superblock::new(512, 32, crate::param::LOG_MAX_SIZE as u32);
        let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
        mkfs::format(&*bdq, &sb);
        (Bcache::mount(sb, bdq), sb)
    }

    #[test]
    fn alloc_assigns_the_first_free_inode() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        assert_eq!(inode.inode_no(), 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        let mut guard = table.lock(inode);
        guard.write(&tx, b"hello, world", 0);
        drop(tx);

        let mut dst = [0u8; 12];
        guard.read(&mut dst, 0);
        assert_eq!(&dst, b"hello, world");
    }

    #[test]
    fn growth_across_direct_and_indirect_blocks() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        let mut guard = table.lock(inode);
        guard.write(&tx, &[7u8; 10], 0);
        let far_offset = INODE_NUM_DIRECT * BLOCK_SIZE + 100;
        guard.write(&tx, &[9u8; 5], far_offset);
        drop(tx);

        assert_eq!(guard.num_bytes() as usize, far_offset + 5);
        let mut gap = vec![0xffu8; far_offset - 10];
        guard.read(&mut gap, 10);
        assert!(gap.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "past")]
    fn write_past_max_bytes_panics() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        let mut guard = table.lock(inode);
        guard.write(&tx, &[0u8; 1], INODE_MAX_BYTES);
    }

    #[test]
    fn directory_insert_lookup_remove() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let dir = table.alloc(&tx, InodeType::Directory).unwrap();
        let file = table.alloc(&tx, InodeType::Regular).unwrap();
        let mut dir_guard = table.lock(dir);

        let slot = dir_guard.insert(&tx, "a.txt", file.inode_no()).unwrap();
        assert_eq!(dir_guard.lookup("a.txt"), Some((file.inode_no(), slot)));
        assert!(dir_guard.insert(&tx, "a.txt", file.inode_no()).is_none());

        dir_guard.remove(&tx, slot);
        assert_eq!(dir_guard.lookup("a.txt"), None);
    }

    #[test]
    fn put_frees_inode_once_unreferenced_and_unlinked() {
        let (bcache, sb) = mount();
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        {
            let mut guard = table.lock(inode);
            guard.write(&tx, b"data", 0);
        }
        table.put(&tx, inode);
        drop(tx);

        let tx = bcache.begin_op();
        let reused = table.alloc(&tx, InodeType::Regular).unwrap();
        assert_eq!(reused, inode);
    }
}
