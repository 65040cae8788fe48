//! Error types for the handful of operations that can fail for reasons
//! outside the caller's control rather than by programmer mistake.
//!
//! Everything else (double commit, write past the maximum file size,
//! freeing an inode that was never allocated) indicates a bug in the
//! caller and stays a `panic!`/`assert!`, matching the source this crate
//! is grounded on.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free data block or inode was found during `alloc`.
    NoSpace,
    /// The underlying block device reported a failure servicing a request.
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoSpace => write!(f, "no space left on device"),
            Error::Io => write!(f, "block device I/O error"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
