//! Error types surfaced by remote file services.
//!
//! Every failure a [`RemoteFileService`](crate::RemoteFileService) reports is
//! a [`ProtocolError`] carrying a host errno value. Device-side rejections
//! arrive as MAVLink FTP NAK frames and are decoded through [`FtpNak`].

use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// A failure reported by the remote file service.
///
/// `code` is a host errno value; the filesystem frontend passes it through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote operation failed (errno {code}): {reason}")]
pub struct ProtocolError {
    code: i32,
    reason: Cow<'static, str>,
}

impl ProtocolError {
    /// Creates an error from an errno value and a human-readable reason.
    pub fn new(code: i32, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Creates an error from a bare errno value.
    pub fn from_code(code: i32) -> Self {
        Self::new(code, "device reported failure")
    }

    /// The link did not answer in time.
    pub fn timeout() -> Self {
        Self::new(libc::ETIMEDOUT, "request timed out")
    }

    /// The errno value carried by this error.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The human-readable reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        let code = e.raw_os_error().unwrap_or(libc::EIO);
        Self::new(code, e.to_string())
    }
}

impl From<FtpNak> for ProtocolError {
    fn from(nak: FtpNak) -> Self {
        Self::new(nak.errno(), nak.description())
    }
}

/// A malformed path string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path {path:?}: {reason}")]
pub struct InvalidPath {
    /// The offending input.
    pub path: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl InvalidPath {
    pub(crate) fn new(path: &str, reason: &'static str) -> Self {
        Self {
            path: path.to_string(),
            reason,
        }
    }
}

/// `open(2)` flags that map onto no remote session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported open flags {flags:#o}")]
pub struct UnsupportedOpenFlags {
    pub flags: i32,
}

/// MAVLink FTP NAK error codes.
///
/// The first payload byte of a NAK frame selects the variant; `FailErrno`
/// carries the device's own errno in the second byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpNak {
    /// Unknown failure.
    Fail,
    /// Failure with the device errno attached.
    FailErrno(u8),
    /// Payload size is invalid for the command.
    InvalidDataSize,
    /// Session id does not refer to an open session.
    InvalidSession,
    /// All device sessions are in use.
    NoSessionsAvailable,
    /// Offset past end of file.
    Eof,
    /// Opcode not understood by the device.
    UnknownCommand,
    /// Target already exists.
    FileExists,
    /// Target is write protected.
    FileProtected,
    /// Target does not exist.
    FileNotFound,
}

impl FtpNak {
    /// Decodes a NAK payload. Returns `None` for an empty payload or an
    /// unknown code.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let nak = match *payload.first()? {
            1 => Self::Fail,
            2 => Self::FailErrno(payload.get(1).copied().unwrap_or(0)),
            3 => Self::InvalidDataSize,
            4 => Self::InvalidSession,
            5 => Self::NoSessionsAvailable,
            6 => Self::Eof,
            7 => Self::UnknownCommand,
            8 => Self::FileExists,
            9 => Self::FileProtected,
            10 => Self::FileNotFound,
            _ => return None,
        };
        Some(nak)
    }

    /// Host errno for this NAK. `Eof` maps to 0: it ends a read rather than
    /// failing it.
    pub fn errno(self) -> i32 {
        match self {
            Self::Fail => libc::EFAULT,
            Self::FailErrno(e) if e != 0 => i32::from(e),
            Self::FailErrno(_) => libc::EIO,
            Self::InvalidDataSize => libc::EMSGSIZE,
            Self::InvalidSession => EBADFD,
            Self::NoSessionsAvailable => libc::EMFILE,
            Self::Eof => 0,
            Self::UnknownCommand => libc::ENOSYS,
            Self::FileExists => libc::EEXIST,
            Self::FileProtected => libc::EPERM,
            Self::FileNotFound => libc::ENOENT,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Fail => "device failure",
            Self::FailErrno(_) => "device failure with errno",
            Self::InvalidDataSize => "invalid data size",
            Self::InvalidSession => "invalid session",
            Self::NoSessionsAvailable => "no sessions available",
            Self::Eof => "end of file",
            Self::UnknownCommand => "unknown command",
            Self::FileExists => "file exists",
            Self::FileProtected => "file protected",
            Self::FileNotFound => "file not found",
        }
    }
}

#[cfg(target_os = "linux")]
const EBADFD: i32 = libc::EBADFD;
#[cfg(not(target_os = "linux"))]
const EBADFD: i32 = libc::EBADF;
