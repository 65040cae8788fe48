//! Crash-consistency scenarios exercised across two independent mounts over
//! the same backing bytes: the first mount plays the role of the process
//! that crashes mid-commit, the second stands in for the one that boots
//! afterward and must run recovery before anything else touches the device.

use std::sync::{Arc, Mutex};

use zerocopy::{AsBytes, FromBytes};

use rv6fs_core::bcache::Bcache;
use rv6fs_core::bdq::{Bdq, Buf, BufFlags};
use rv6fs_core::device::BlockDevice;
use rv6fs_core::error::{Error, Result};
use rv6fs_core::fs::mkfs;
use rv6fs_core::fs::superblock::Superblock;
use rv6fs_core::log::LogHeader;
use rv6fs_core::param::BLOCK_SIZE;

/// A block device whose storage outlives any single `Bdq`, so a fresh
/// mount can see exactly the bytes an earlier one left behind.
#[derive(Clone)]
struct SharedDevice(Arc<Mutex<Vec<[u8; BLOCK_SIZE]>>>);

impl SharedDevice {
    fn new(num_blocks: u32) -> Self {
        Self(Arc::new(Mutex::new(vec![[0u8; BLOCK_SIZE]; num_blocks as usize])))
    }
}

impl BlockDevice for SharedDevice {
    fn read_block(&self, block_no: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let blocks = self.0.lock().unwrap();
        let src = blocks.get(block_no as usize).ok_or(Error::Io)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&self, block_no: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        let mut blocks = self.0.lock().unwrap();
        let dst = blocks.get_mut(block_no as usize).ok_or(Error::Io)?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> u32 {
        self.0.lock().unwrap().len() as u32
    }
}

#[test]
fn crash_before_header_write_leaves_home_block_untouched() {
    let sb = Superblock::new(256, 16, rv6fs_core::param::LOG_MAX_SIZE as u32);
    let storage = SharedDevice::new(sb.num_blocks);

    {
        let bdq = Bdq::new(Box::new(storage.clone()));
        mkfs::format(&bdq, &sb);

        let mut home = Buf::new(100);
        home.flags.insert(BufFlags::DIRTY);
        home.data = [0xAAu8; BLOCK_SIZE];
        bdq.rw(home);

        // Phase 1 only: copy the live block into the log, then "crash"
        // before phase 2's header write ever lands.
        let mut logged = Buf::new(sb.log_start + 1);
        logged.flags.insert(BufFlags::DIRTY);
        logged.data = [b'X'; BLOCK_SIZE];
        bdq.rw(logged);
    }

    let bdq = Bdq::new(Box::new(storage));
    let bcache = Bcache::mount(sb, bdq);
    let home = bcache.acquire(100);
    assert!(home.iter().all(|&b| b == 0xAA));
}

#[test]
fn crash_after_header_write_replays_on_recovery() {
    let sb = Superblock::new(256, 16, rv6fs_core::param::LOG_MAX_SIZE as u32);
    let storage = SharedDevice::new(sb.num_blocks);

    {
        let bdq = Bdq::new(Box::new(storage.clone()));
        mkfs::format(&bdq, &sb);

        let mut home = Buf::new(100);
        home.flags.insert(BufFlags::DIRTY);
        home.data = [0xAAu8; BLOCK_SIZE];
        bdq.rw(home);

        let mut logged = Buf::new(sb.log_start + 1);
        logged.flags.insert(BufFlags::DIRTY);
        logged.data = [b'X'; BLOCK_SIZE];
        bdq.rw(logged);

        // Phase 2: the commit point. "Crash" here, before install (phase 3)
        // or the header zeroing (phase 4) ever run.
        let header = LogHeader::from_blocks(&[100]);
        let mut header_buf = Buf::new(sb.log_start);
        header_buf.flags.insert(BufFlags::DIRTY);
        header
            .write_to_prefix(&mut header_buf.data[..])
            .expect("log header does not fit in one block");
        bdq.rw(header_buf);
    }

    let bdq = Bdq::new(Box::new(storage.clone()));
    let bcache = Bcache::mount(sb, bdq);
    let home = bcache.acquire(100);
    assert!(home.iter().all(|&b| b == b'X'));
    drop(home);
    drop(bcache);

    let bdq = Bdq::new(Box::new(storage));
    let buf = bdq.rw(Buf::new(sb.log_start));
    let header = LogHeader::read_from_prefix(&buf.data[..]).expect("log header does not fit in one block");
    assert_eq!(header.num_blocks, 0);
}
