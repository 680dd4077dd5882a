//! Remote file service abstraction for flight controller storage.
//!
//! This crate defines the contract between a host-side filesystem frontend
//! and the file service running on a remote flight controller (reached over
//! a telemetry link, typically MAVLink FTP). The frontend only ever talks to
//! a [`RemoteFileService`]; how bytes actually cross the link is the
//! service's business.
//!
//! # Components
//!
//! - [`RemotePath`] - validated absolute path on the device
//! - [`FileEntry`] / [`EntryKind`] - directory listing snapshots
//! - [`RemoteFileService`] / [`RemoteFile`] - the consumed interface
//! - [`ProtocolError`] / [`FtpNak`] - failure codes surfaced by the service
//! - [`MemoryService`] - in-process device model (tests, demo mounts)
//! - [`LocalDirService`] - a host directory standing in for device storage
//!
//! # Example
//!
//! ```
//! use mavfs_core::{MemoryService, OpenMode, RemoteFile, RemoteFileService, RemotePath};
//!
//! let service = MemoryService::with_px4_layout();
//! let path = RemotePath::parse("/fs/microsd/hello.txt").unwrap();
//!
//! let mut file = service.open(&path, OpenMode::CreateWrite).unwrap();
//! file.write(b"hello").unwrap();
//! file.close().unwrap();
//!
//! let names: Vec<_> = service
//!     .listdir(&RemotePath::parse("/fs/microsd").unwrap())
//!     .unwrap()
//!     .into_iter()
//!     .map(|e| e.name)
//!     .collect();
//! assert!(names.contains(&"hello.txt".to_string()));
//! ```

pub mod entry;
pub mod error;
pub mod local;
pub mod memory;
pub mod path;
pub mod service;

pub use entry::{EntryKind, FileEntry};
pub use error::{FtpNak, InvalidPath, ProtocolError, UnsupportedOpenFlags};
pub use local::LocalDirService;
pub use memory::{MemoryService, RemoteOp};
pub use path::RemotePath;
pub use service::{OpenMode, RemoteFile, RemoteFileService};
