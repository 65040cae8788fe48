//! The storage core's file-system layers, in dependency order:
//!   + `superblock`: the immutable on-disk region layout.
//!   + `bitmap`: the free-data-block allocator, over `bcache`+`log`.
//!   + `inode`: the on-disk inode table, direct/indirect addressing, and
//!     directory entries.
//!   + `mkfs`: fresh-image formatting.
//!
//! Path resolution, the file-descriptor table, and every higher-level
//! syscall surface are external collaborators that compose these
//! operations; none of that is implemented here.

pub mod bitmap;
pub mod inode;
pub mod mkfs;
pub mod superblock;

pub use inode::{DirEntry, Dinode, Inode, InodeGuard, InodeTable, InodeType};
pub use superblock::Superblock;
