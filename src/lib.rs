//! Storage and transactional core of a small teaching-grade operating
//! system: a buffered block cache with write-ahead logging, the inode
//! layer built on top of it, and the block-device request queue that
//! serializes asynchronous I/O to a single SD-class device.
//!
//! Process/scheduling primitives, virtual memory, paths, syscalls, and the
//! console are external collaborators this crate does not implement; see
//! `device::BlockDevice` and the `lock` module for the narrow interfaces it
//! expects them to provide.

pub mod bcache;
pub mod bdq;
pub mod device;
pub mod error;
pub mod fs;
pub mod klog;
pub mod lock;
pub mod log;
pub mod param;
