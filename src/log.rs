//! The write-ahead log.
//!
//! A transaction groups the updates of one or more `begin_op`/`end_op`
//! brackets. The log only commits once no bracket is open, so nothing ever
//! has to reason about a commit racing an in-progress caller's updates.
//!
//! The on-disk log format is one header block followed by up to
//! `LOG_MAX_SIZE` data blocks:
//! ```text
//!   header block, containing block #s for block A, B, C, ...
//!   block A
//!   block B
//!   block C
//!   ...
//! ```
//! Log writes are synchronous: a transaction is durable exactly once the
//! header write in phase 2 of `commit` lands.

use core::mem;

use arrayvec::ArrayVec;
use itertools::izip;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::param::{BLOCK_SIZE, LOG_MAX_SIZE};

/// On-disk contents of the log's header block.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct LogHeader {
    pub num_blocks: u32,
    pub block_no: [u32; LOG_MAX_SIZE],
}

const_assert!(mem::size_of::<LogHeader>() <= BLOCK_SIZE);

impl LogHeader {
    pub fn empty() -> Self {
        Self {
            num_blocks: 0,
            block_no: [0; LOG_MAX_SIZE],
        }
    }

    pub fn from_blocks(blocks: &[u32]) -> Self {
        let mut header = Self::empty();
        header.num_blocks = blocks.len() as u32;
        for (dst, src) in izip!(&mut header.block_no, blocks) {
            *dst = *src;
        }
        header
    }

    pub fn blocks(&self) -> &[u32] {
        &self.block_no[..self.num_blocks as usize]
    }
}

/// In-memory bookkeeping for the log, guarded by a `Sleepablelock`: admitting
/// a new op and deciding whether an `end_op` must commit both require
/// inspecting and mutating this state without racing a concurrent commit.
pub struct LogState {
    /// Number of brackets currently open.
    pub outstanding: u32,
    /// Set for the duration of the commit protocol; new ops must wait.
    pub committing: bool,
    /// Destination block numbers of the blocks pinned by the current
    /// committing window, in log-slot order.
    pub blocks: ArrayVec<u32, LOG_MAX_SIZE>,
}

impl LogState {
    pub fn new() -> Self {
        Self {
            outstanding: 0,
            committing: false,
            blocks: ArrayVec::new(),
        }
    }

    /// Index of `block_no` in the current header, if already pinned.
    pub fn find(&self, block_no: u32) -> Option<usize> {
        self.blocks.iter().position(|&b| b == block_no)
    }
}
