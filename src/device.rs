//! The device boundary consumed by the block device queue.
//!
//! The source drives a VirtIO (or SD controller, in the C lab this is
//! distilled from) disk through a register-level protocol and an interrupt
//! handler. Neither the hardware nor the interrupt path is in scope here:
//! `BlockDevice` is the narrow synchronous interface `Bdq`'s worker thread
//! needs, and a real driver is just another implementation of it.

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::param::BLOCK_SIZE;

/// A block-addressable storage device.
///
/// Implementations must make `read_block`/`write_block` block the calling
/// thread until the transfer completes; `Bdq` runs them on a dedicated
/// worker thread precisely so that callers elsewhere never see that
/// latency directly.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_no: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()>;
    fn write_block(&self, block_no: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()>;

    /// Total number of addressable blocks, used only for sanity checks.
    fn num_blocks(&self) -> u32;
}

/// An in-memory block device, used by tests and by any caller that has no
/// real hardware. Every block starts zeroed.
pub struct MemDevice {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
}

impl MemDevice {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![[0u8; BLOCK_SIZE]; num_blocks as usize]),
        }
    }
}

impl BlockDevice for MemDevice {
    fn read_block(&self, block_no: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let blocks = self.blocks.lock().unwrap();
        let src = blocks.get(block_no as usize).ok_or(Error::Io)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&self, block_no: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let dst = blocks.get_mut(block_no as usize).ok_or(Error::Io)?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> u32 {
        self.blocks.lock().unwrap().len() as u32
    }
}
