//! The remote file service contract.
//!
//! Implementations own the link to the device: session setup, chunking,
//! retransmission and timeouts all live behind these traits. Callers see one
//! blocking request/response per method and a [`ProtocolError`] on failure.

use crate::entry::FileEntry;
use crate::error::{ProtocolError, UnsupportedOpenFlags};
use crate::path::RemotePath;

/// How a remote file session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Read-only session on an existing file.
    Read,
    /// Write session on an existing file, positioned at offset 0.
    Write,
    /// Create (or truncate) the file and open it for writing.
    CreateWrite,
    /// Write session positioned at end of file.
    Append,
}

impl OpenMode {
    /// Maps host `open(2)` flags onto a remote session mode.
    ///
    /// Read-write access is served by a write session; the device has no
    /// combined mode and every read opens its own session anyway.
    pub fn from_open_flags(flags: i32) -> Result<Self, UnsupportedOpenFlags> {
        let mode = match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Self::Read,
            libc::O_WRONLY | libc::O_RDWR => {
                if flags & libc::O_APPEND != 0 {
                    Self::Append
                } else if flags & libc::O_TRUNC != 0 {
                    Self::CreateWrite
                } else {
                    Self::Write
                }
            }
            _ => return Err(UnsupportedOpenFlags { flags }),
        };
        Ok(mode)
    }

    /// True for every mode that may modify the file.
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// An open remote file session.
///
/// Sessions are scarce on the device (a handful at most), so callers hold
/// one only for the duration of a single filesystem call and must always
/// [`close`](RemoteFile::close) it.
pub trait RemoteFile: Send {
    /// Moves the session cursor to `offset`.
    fn seek(&mut self, offset: u64) -> Result<(), ProtocolError>;

    /// Reads up to `max_bytes` from the cursor. An empty result means end of
    /// file.
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError>;

    /// Writes `data` at the cursor, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, ProtocolError>;

    /// Truncates (or zero-extends) the file to `length` bytes.
    fn truncate(&mut self, length: u64) -> Result<(), ProtocolError>;

    /// Current file size as reported by the device.
    fn size(&self) -> u64;

    /// Ends the session.
    fn close(self) -> Result<(), ProtocolError>
    where
        Self: Sized;
}

/// File operations offered by the remote device.
pub trait RemoteFileService: Send + Sync {
    /// Session type returned by [`open`](RemoteFileService::open).
    type File: RemoteFile;

    /// Lists the entries of a directory. Order is whatever the device
    /// reports.
    fn listdir(&self, path: &RemotePath) -> Result<Vec<FileEntry>, ProtocolError>;

    /// Opens a file session.
    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<Self::File, ProtocolError>;

    fn mkdir(&self, path: &RemotePath) -> Result<(), ProtocolError>;

    fn rmdir(&self, path: &RemotePath) -> Result<(), ProtocolError>;

    fn unlink(&self, path: &RemotePath) -> Result<(), ProtocolError>;

    fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<(), ProtocolError>;
}
