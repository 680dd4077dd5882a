//! Error handling and errno mapping for the FUSE filesystem.
//!
//! Adapter operations return [`FsResult`]; the fuser callbacks convert the
//! error into a libc errno with [`ToErrno`] right before replying. That
//! reply is the only place a failure leaves the crate.

use mavfs_core::{InvalidPath, ProtocolError, UnsupportedOpenFlags};
use thiserror::Error;

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The remote file service failed. Its code is passed through verbatim.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The path is absent even after a fresh listing of its parent.
    #[error("No such file or directory: {0}")]
    NotFound(String),

    /// Exclusive create of a path that is already there.
    #[error("File exists: {0}")]
    AlreadyExists(String),

    /// Malformed path or unsupported open mode.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Change the device cannot represent (ownership, mode bits).
    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    /// Inode unknown to the inode table.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// Operation outside what a mount session offers.
    #[error("Operation not supported")]
    NotSupported,
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Protocol(e) => e.to_errno(),
            FsError::NotFound(_) | FsError::InvalidInode(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::NotPermitted(_) => libc::EPERM,
            FsError::NotSupported => libc::ENOSYS,
        }
    }
}

impl From<InvalidPath> for FsError {
    fn from(e: InvalidPath) -> Self {
        FsError::InvalidArgument(e.to_string())
    }
}

impl From<UnsupportedOpenFlags> for FsError {
    fn from(e: UnsupportedOpenFlags) -> Self {
        FsError::InvalidArgument(e.to_string())
    }
}

/// Maps a remote failure to an errno. Codes that are not valid errno values
/// become `EIO`.
pub fn protocol_error_to_errno(e: &ProtocolError) -> i32 {
    if e.code() > 0 { e.code() } else { libc::EIO }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for FsError {
    fn to_errno(&self) -> i32 {
        FsError::to_errno(self)
    }
}

impl ToErrno for ProtocolError {
    fn to_errno(&self) -> i32 {
        protocol_error_to_errno(self)
    }
}
