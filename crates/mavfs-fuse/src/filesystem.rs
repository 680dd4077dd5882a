//! FUSE filesystem implementation for flight controller storage.
//!
//! This module implements the fuser `Filesystem` trait on top of
//! [`FilesystemAdapter`]. Each callback resolves inodes to paths, runs the
//! path-level operation and translates the outcome into a reply; all
//! caching decisions stay in the adapter.
//!
//! There is no handle table. `open`/`opendir` hand out handle 0 and every
//! read or write opens its own remote session, so nothing is buffered and
//! `flush`/`fsync`/`release` have nothing to do.
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | init/destroy | destroy drops the attribute cache |
//! | lookup | increments nlookup |
//! | forget/batch_forget | evicts at nlookup 0, never the root |
//! | getattr | |
//! | setattr | size only; mode/owner changes are `EPERM`, times are ignored |
//! | open/opendir/release/releasedir | stateless |
//! | read/write | one remote session per call |
//! | readdir | does not touch nlookup |
//! | create/mkdir | increment nlookup |
//! | unlink/rmdir/rename | |
//! | statfs | static geometry, the device reports none |
//! | xattr | `ENOSYS` |

use crate::adapter::FilesystemAdapter;
use crate::attr::AttributeRecord;
use crate::config::MountConfig;
use crate::context::CallerContext;
use crate::error::{FsError, FsResult};
use crate::inode::{InodeTable, ROOT_INODE};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;
use mavfs_core::{EntryKind, OpenMode, RemoteFileService, RemotePath};
use std::ffi::OsStr;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Preferred I/O size reported to the kernel.
const BLOCK_SIZE: u32 = 4096;

/// Unit of `st_blocks`.
const SECTOR_SIZE: u64 = 512;

/// Longest name the device accepts in one path segment.
const NAME_MAX: u32 = 255;

/// FUSE filesystem serving a [`RemoteFileService`].
pub struct MavFs<S> {
    adapter: FilesystemAdapter<S>,
    inodes: InodeTable,
    config: MountConfig,
    /// Reported as every timestamp; the device keeps none.
    mounted_at: SystemTime,
}

impl<S: RemoteFileService> MavFs<S> {
    pub fn new(service: S, config: MountConfig) -> Self {
        Self {
            adapter: FilesystemAdapter::new(service, config.policy.clone()),
            inodes: InodeTable::new(),
            config,
            mounted_at: SystemTime::now(),
        }
    }

    pub fn adapter(&self) -> &FilesystemAdapter<S> {
        &self.adapter
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    fn path_of(&self, ino: u64) -> FsResult<RemotePath> {
        self.inodes.path(ino).ok_or(FsError::InvalidInode(ino))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> FsResult<RemotePath> {
        let name = name
            .to_str()
            .ok_or_else(|| FsError::InvalidArgument(format!("non-UTF-8 name {name:?}")))?;
        Ok(self.path_of(parent)?.join(name)?)
    }

    fn make_attr(&self, ino: u64, record: &AttributeRecord) -> FileAttr {
        let (kind, nlink) = match record.kind {
            EntryKind::Directory => (FileType::Directory, 2),
            EntryKind::File => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino,
            size: record.size,
            blocks: record.size.div_ceil(SECTOR_SIZE),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm: record.perm,
            nlink,
            uid: record.uid,
            gid: record.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes for a path the kernel is about to hold a reference to.
    fn entry_for(&self, path: &RemotePath, caller: &CallerContext) -> FsResult<FileAttr> {
        let record = self.adapter.getattr(path, caller)?;
        let ino = self.inodes.lookup(path);
        Ok(self.make_attr(ino, &record))
    }

    pub(crate) fn do_lookup(
        &self,
        parent: u64,
        name: &OsStr,
        caller: &CallerContext,
    ) -> FsResult<FileAttr> {
        let path = self.child_path(parent, name)?;
        self.entry_for(&path, caller)
    }

    pub(crate) fn do_getattr(&self, ino: u64, caller: &CallerContext) -> FsResult<FileAttr> {
        let path = self.path_of(ino)?;
        let record = self.adapter.getattr(&path, caller)?;
        Ok(self.make_attr(ino, &record))
    }

    /// Directory rows as `(inode, kind, name)`, `.` and `..` first.
    pub(crate) fn do_readdir(
        &self,
        ino: u64,
        caller: &CallerContext,
    ) -> FsResult<Vec<(u64, FileType, String)>> {
        let path = self.path_of(ino)?;
        let parent_ino = self.inodes.get_inode(&path.parent()).unwrap_or(ROOT_INODE);

        let entries = self.adapter.readdir(&path, caller)?;
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let row_ino = match entry.name.as_str() {
                "." => ino,
                ".." => parent_ino,
                name => self.inodes.peek_or_insert(&path.join(name)?),
            };
            let kind = match entry.kind {
                EntryKind::Directory => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
            };
            rows.push((row_ino, kind, entry.name));
        }
        Ok(rows)
    }

    pub(crate) fn do_mkdir(
        &self,
        parent: u64,
        name: &OsStr,
        caller: &CallerContext,
    ) -> FsResult<FileAttr> {
        let path = self.child_path(parent, name)?;
        self.adapter.mkdir(&path)?;
        self.entry_for(&path, caller)
    }

    pub(crate) fn do_create(
        &self,
        parent: u64,
        name: &OsStr,
        flags: i32,
        caller: &CallerContext,
    ) -> FsResult<FileAttr> {
        OpenMode::from_open_flags(flags)?;
        let path = self.child_path(parent, name)?;
        // The kernel only calls create after a negative lookup; O_EXCL
        // still re-checks the device.
        if flags & libc::O_EXCL != 0 {
            self.adapter.create_new(&path, caller)?;
        } else {
            self.adapter.create(&path)?;
        }
        self.entry_for(&path, caller)
    }

    pub(crate) fn do_unlink(&self, parent: u64, name: &OsStr) -> FsResult<()> {
        let path = self.child_path(parent, name)?;
        self.adapter.unlink(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    pub(crate) fn do_rmdir(&self, parent: u64, name: &OsStr) -> FsResult<()> {
        let path = self.child_path(parent, name)?;
        self.adapter.rmdir(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    pub(crate) fn do_rename(
        &self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        flags: u32,
    ) -> FsResult<()> {
        // RENAME_NOREPLACE / RENAME_EXCHANGE have no remote equivalent.
        if flags != 0 {
            return Err(FsError::InvalidArgument(format!(
                "unsupported rename flags {flags:#x}"
            )));
        }
        let old = self.child_path(parent, name)?;
        let new = self.child_path(new_parent, new_name)?;
        self.adapter.rename(&old, &new)?;
        self.inodes.rename(&old, &new);
        Ok(())
    }

    pub(crate) fn do_read(&self, ino: u64, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let path = self.path_of(ino)?;
        let offset = to_offset(offset)?;
        self.adapter.read(&path, size as usize, offset)
    }

    pub(crate) fn do_write(&self, ino: u64, offset: i64, data: &[u8]) -> FsResult<u32> {
        let path = self.path_of(ino)?;
        let offset = to_offset(offset)?;
        let written = self.adapter.write(&path, data, offset)?;
        u32::try_from(written)
            .map_err(|_| FsError::InvalidArgument(format!("write of {written} bytes")))
    }

    pub(crate) fn do_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        caller: &CallerContext,
    ) -> FsResult<FileAttr> {
        let path = self.path_of(ino)?;
        if mode.is_some() || uid.is_some() || gid.is_some() {
            return Err(FsError::NotPermitted(format!(
                "{path}: ownership and mode are fixed by the mount policy"
            )));
        }
        if let Some(size) = size {
            self.adapter.truncate(&path, size)?;
        }
        self.do_getattr(ino, caller)
    }

    pub(crate) fn do_open(&self, ino: u64, flags: i32) -> FsResult<()> {
        self.path_of(ino)?;
        OpenMode::from_open_flags(flags)?;
        Ok(())
    }
}

fn to_offset(offset: i64) -> FsResult<u64> {
    u64::try_from(offset).map_err(|_| FsError::InvalidArgument(format!("negative offset {offset}")))
}

impl<S: RemoteFileService> Filesystem for MavFs<S> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(fs_name = %self.config.fs_name, "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.adapter.destroy();
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.do_lookup(parent, name, &CallerContext::from(req)) {
            Ok(attr) => reply.entry(&self.config.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.do_getattr(ino, &CallerContext::from(req)) {
            Ok(attr) => reply.attr(&self.config.ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, mode = ?mode, uid = ?uid, gid = ?gid, size = ?size, "setattr");
        match self.do_setattr(ino, mode, uid, gid, size, &CallerContext::from(req)) {
            Ok(attr) => reply.attr(&self.config.ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, "mkdir");
        match self.do_mkdir(parent, name, &CallerContext::from(req)) {
            Ok(attr) => reply.entry(&self.config.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        match self.do_unlink(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        match self.do_rmdir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, "rename");
        match self.do_rename(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.do_open(ino, flags) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, offset, size, "read");
        match self.do_read(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, offset, size = data.len(), "write");
        match self.do_write(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        match self.path_of(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let rows = match self.do_readdir(ino, &CallerContext::from(req)) {
            Ok(rows) => rows,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        // The kernel resumes at the offset of the last row it accepted, so
        // every row carries its own index + 1.
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (row_ino, kind, name)) in rows.into_iter().enumerate().skip(skip) {
            let next = i64::try_from(i + 1).unwrap_or(i64::MAX);
            if reply.add(row_ino, next, kind, &name) {
                debug!(inode = ino, accepted = i, "readdir buffer full");
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE, NAME_MAX, BLOCK_SIZE);
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = ?name, flags, "create");
        match self.do_create(parent, name, flags, &CallerContext::from(req)) {
            Ok(attr) => reply.created(&self.config.ttl, &attr, 0, 0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
        reply.error(FsError::NotSupported.to_errno());
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(FsError::NotSupported.to_errno());
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(FsError::NotSupported.to_errno());
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(FsError::NotSupported.to_errno());
    }
}
