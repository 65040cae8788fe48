//! Sizing constants for the storage core.
//!
//! These fix the on-disk layout and the in-memory cache capacity. Changing
//! `BLOCK_SIZE`, `INODE_NUM_DIRECT`, `INODE_NUM_INDIRECT` or
//! `FILE_NAME_MAX_LENGTH` changes the on-disk format and is not
//! backwards-compatible with images written by a previous build.

use core::mem;

/// Size in bytes of a disk block, and the unit of all cache/log/device I/O.
pub const BLOCK_SIZE: usize = 512;

/// Max number of blocks a single `begin_op`/`end_op` bracket may log.
pub const OP_MAX_NUM_BLOCKS: usize = 10;

/// Max number of data blocks held in the on-disk log.
pub const LOG_MAX_SIZE: usize = OP_MAX_NUM_BLOCKS * 3;

/// Soft target for the number of resident cached blocks. The cache may
/// temporarily exceed this; it is never a hard cap.
pub const EVICTION_THRESHOLD: usize = OP_MAX_NUM_BLOCKS * 3;

/// Direct block pointers stored inline in an inode.
pub const INODE_NUM_DIRECT: usize = 12;

/// Block pointers reachable through the single indirect block.
pub const INODE_NUM_INDIRECT: usize = BLOCK_SIZE / mem::size_of::<u32>();

/// Maximum file size in blocks.
pub const INODE_MAX_BLOCKS: usize = INODE_NUM_DIRECT + INODE_NUM_INDIRECT;

/// Maximum file size in bytes.
pub const INODE_MAX_BYTES: usize = INODE_MAX_BLOCKS * BLOCK_SIZE;

/// Maximum length of a single path component (directory entry name), not
/// counting a NUL terminator.
pub const FILE_NAME_MAX_LENGTH: usize = 14;

/// Number of packed on-disk inode entries per block.
pub const INODE_PER_BLOCK: usize = BLOCK_SIZE / DINODE_SIZE;

/// Number of free-block bitmap bits packed into one block.
pub const BIT_PER_BLOCK: usize = BLOCK_SIZE * 8;

/// The inode number of the file system root directory.
pub const ROOT_INODE_NO: u32 = 1;

// Computed after `Dinode`'s layout is known; kept here so every other
// constant above can be derived without reaching into `fs::inode`.
const DINODE_SIZE: usize = 64;
