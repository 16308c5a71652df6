//! Failure outcomes of heap operations.

use libc::c_int;
use thiserror::Error;

/// Why a heap operation did not produce memory.
///
/// Neither variant is fatal: every failing operation leaves the heap exactly as it
/// found it.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    /// The grower refused to extend the arena, or a size computation overflowed.
    #[error("out of memory")]
    OutOfMemory,

    /// An alignment argument was not a power of two
    /// (or, for `posix_memalign`, not a multiple of the pointer width).
    #[error("invalid alignment")]
    InvalidArgument,
}

impl AllocError {
    /// The `errno` value reported for this error.
    pub fn errno(self) -> c_int {
        match self {
            AllocError::OutOfMemory => libc::ENOMEM,
            AllocError::InvalidArgument => libc::EINVAL,
        }
    }
}

pub type Result<T> = core::result::Result<T, AllocError>;
