//! FUSE filesystem for flight controller storage.
//!
//! This crate mounts the file service of a remote flight controller (as
//! seen through [`mavfs_core::RemoteFileService`]) as a local directory.
//!
//! # Layers
//!
//! - [`FilesystemAdapter`] - path-addressed POSIX operations, the attribute
//!   cache and its consistency rules
//! - [`MavFs`] - the fuser `Filesystem`, inode bookkeeping and replies
//! - [`mount()`] / [`unmount`] - foreground mounting
//!
//! # Usage
//!
//! ```ignore
//! use mavfs_core::MemoryService;
//! use mavfs_fuse::{MavFs, MountConfig, mount};
//!
//! let fs = MavFs::new(MemoryService::with_px4_layout(), MountConfig::default());
//! mount(fs, "/mnt/fmu".as_ref())?;
//! ```

pub mod adapter;
pub mod attr;
pub mod config;
pub mod context;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod mount;
pub mod policy;

pub use adapter::{DirEntry, FilesystemAdapter, ToRemotePath};
pub use attr::{AttributeCache, AttributeRecord};
pub use config::MountConfig;
pub use context::CallerContext;
pub use error::{FsError, FsResult, ToErrno};
pub use filesystem::MavFs;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use mount::{mount, unmount};
pub use policy::{PathPolicy, PolicyRule};
