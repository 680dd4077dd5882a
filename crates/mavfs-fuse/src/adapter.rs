//! Path-level filesystem operations on top of a remote file service.
//!
//! [`FilesystemAdapter`] is where cache consistency is decided. The rules:
//!
//! - Metadata reads consult the [`AttributeCache`] first. A miss lists the
//!   parent directory remotely and replaces everything cached for it.
//! - Mutations always go to the device, whatever the cache says, and drop
//!   the cached listings of every directory they touch, both before and
//!   after the remote call.
//! - A listing is only stored if no invalidation touched its directory
//!   while it was in flight, so a listing that raced a mutation cannot put
//!   pre-mutation records back.
//! - Sizes learned from an open session overwrite a cached record in place
//!   but never create one.
//! - Remote sessions live for exactly one call and are closed on every exit
//!   path.
//!
//! The adapter never retries and never times out on its own; the service
//! owns the link and its retry policy.

use crate::attr::{AttributeCache, AttributeRecord};
use crate::context::CallerContext;
use crate::error::{FsError, FsResult};
use crate::policy::PathPolicy;
use mavfs_core::{
    EntryKind, OpenMode, ProtocolError, RemoteFile, RemoteFileService, RemotePath,
};
use tracing::{debug, info, trace, warn};

/// One `readdir` result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    fn dir(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Directory,
        }
    }
}

/// Anything that can name a remote path. Strings are validated here, which
/// is where malformed paths turn into `InvalidArgument`.
pub trait ToRemotePath {
    fn to_remote_path(&self) -> FsResult<RemotePath>;
}

impl ToRemotePath for str {
    fn to_remote_path(&self) -> FsResult<RemotePath> {
        Ok(RemotePath::parse(self)?)
    }
}

impl ToRemotePath for String {
    fn to_remote_path(&self) -> FsResult<RemotePath> {
        self.as_str().to_remote_path()
    }
}

impl ToRemotePath for RemotePath {
    fn to_remote_path(&self) -> FsResult<RemotePath> {
        Ok(self.clone())
    }
}

/// Holds a remote session for the duration of one call.
///
/// [`close`](Self::close) ends the session and reports the result. If the
/// guard is dropped without it (early return, unwinding), the session is
/// closed anyway and a failure is only logged.
struct SessionGuard<'a, F: RemoteFile> {
    file: Option<F>,
    path: &'a RemotePath,
}

impl<'a, F: RemoteFile> SessionGuard<'a, F> {
    fn new(file: F, path: &'a RemotePath) -> Self {
        Self {
            file: Some(file),
            path,
        }
    }

    fn with<T>(
        &mut self,
        f: impl FnOnce(&mut F) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        match self.file.as_mut() {
            Some(file) => f(file),
            None => Err(ProtocolError::new(libc::EBADF, "session already closed")),
        }
    }

    fn close(mut self) -> Result<(), ProtocolError> {
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

impl<F: RemoteFile> Drop for SessionGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take()
            && let Err(e) = file.close()
        {
            warn!(path = %self.path, error = %e, "failed to close remote session");
        }
    }
}

/// The filesystem call surface, path-addressed.
#[derive(Debug)]
pub struct FilesystemAdapter<S> {
    service: S,
    cache: AttributeCache,
    policy: PathPolicy,
}

impl<S: RemoteFileService> FilesystemAdapter<S> {
    /// Creates an adapter with an empty cache.
    pub fn new(service: S, policy: PathPolicy) -> Self {
        Self::with_cache(service, policy, AttributeCache::new())
    }

    /// Creates an adapter around an existing cache.
    pub fn with_cache(service: S, policy: PathPolicy, cache: AttributeCache) -> Self {
        Self {
            service,
            cache,
            policy,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Attributes for `path`.
    pub fn getattr<P>(&self, path: &P, caller: &CallerContext) -> FsResult<AttributeRecord>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "getattr");

        if path.is_root() {
            return Ok(AttributeRecord::root(caller));
        }
        if let Some(record) = self.cache.lookup(&path) {
            return Ok(record);
        }

        let name = path.file_name().unwrap_or_default();
        self.refresh(&path.parent(), caller)?
            .into_iter()
            .find_map(|(n, record)| (n == name).then_some(record))
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Lists `path`, refreshing its cached records. Starts with `.` and `..`
    /// followed by the entries in device order.
    pub fn readdir<P>(&self, path: &P, caller: &CallerContext) -> FsResult<Vec<DirEntry>>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "readdir");

        let listing = self.refresh(&path, caller)?;
        let mut entries = Vec::with_capacity(listing.len() + 2);
        entries.push(DirEntry::dir("."));
        entries.push(DirEntry::dir(".."));
        entries.extend(listing.into_iter().map(|(name, record)| DirEntry {
            name,
            kind: record.kind,
        }));
        Ok(entries)
    }

    pub fn mkdir<P>(&self, path: &P) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "mkdir");
        self.mutate(&[&path.parent()], || self.service.mkdir(&path))
    }

    pub fn rmdir<P>(&self, path: &P) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "rmdir");
        self.cache.invalidate_tree(&path);
        self.mutate(&[&path.parent()], || self.service.rmdir(&path))
    }

    pub fn unlink<P>(&self, path: &P) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "unlink");
        self.mutate(&[&path.parent()], || self.service.unlink(&path))
    }

    /// Materializes an empty file on the device. An existing file at `path`
    /// is truncated, as with `O_CREAT | O_TRUNC`; use
    /// [`create_new`](Self::create_new) to refuse instead.
    pub fn create<P>(&self, path: &P) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "create");
        self.mutate(&[&path.parent()], || {
            let file = self.service.open(&path, OpenMode::CreateWrite)?;
            SessionGuard::new(file, &path).close()
        })
    }

    /// Exclusive create: fails with `AlreadyExists` if a fresh listing of the
    /// parent shows `path`. The device has no exclusive open, so a file
    /// created remotely between the listing and the open is still truncated.
    pub fn create_new<P>(&self, path: &P, caller: &CallerContext) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, "create_new");

        let name = path.file_name().unwrap_or_default();
        if self
            .refresh(&path.parent(), caller)?
            .iter()
            .any(|(n, _)| n == name)
        {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        self.create(&path)
    }

    /// Reads up to `size` bytes at `offset`.
    pub fn read<P>(&self, path: &P, size: usize, offset: u64) -> FsResult<Vec<u8>>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, size, offset, "read");

        let data = self.with_session(&path, OpenMode::Read, |file| {
            // The device is authoritative; a cached size may be stale.
            self.cache.update_size(&path, file.size());
            file.seek(offset)?;
            file.read(size)
        })?;
        Ok(data)
    }

    /// Writes `data` at `offset`, returning the number of bytes accepted.
    pub fn write<P>(&self, path: &P, data: &[u8], offset: u64) -> FsResult<usize>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, len = data.len(), offset, "write");

        self.with_session(&path, OpenMode::Write, |file| {
            file.seek(offset)?;
            let written = file.write(data)?;
            let end = offset.saturating_add(written as u64);
            self.cache.update_size(&path, file.size().max(end));
            Ok(written)
        })
    }

    pub fn rename<P, Q>(&self, old: &P, new: &Q) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
        Q: ToRemotePath + ?Sized,
    {
        let old = old.to_remote_path()?;
        let new = new.to_remote_path()?;
        trace!(old = %old, new = %new, "rename");

        // A renamed or replaced directory takes its cached children with it.
        self.cache.invalidate_tree(&old);
        self.cache.invalidate_tree(&new);
        let result = self.mutate(&[&old.parent(), &new.parent()], || {
            self.service.rename(&old, &new)
        });
        self.cache.invalidate_tree(&old);
        self.cache.invalidate_tree(&new);
        result
    }

    /// Truncates (or zero-extends) `path` to `length` bytes.
    pub fn truncate<P>(&self, path: &P, length: u64) -> FsResult<()>
    where
        P: ToRemotePath + ?Sized,
    {
        let path = path.to_remote_path()?;
        trace!(path = %path, length, "truncate");

        self.with_session(&path, OpenMode::Write, |file| file.truncate(length))?;
        self.cache.update_size(&path, length);
        Ok(())
    }

    /// Called once at unmount. Nothing is buffered, so there is nothing to
    /// flush.
    pub fn destroy(&self) {
        info!(cached = self.cache.len(), "filesystem adapter shutting down");
        self.cache.clear();
    }

    /// Lists `dir` remotely and replaces its cached records. Returns the
    /// fresh records in device order.
    fn refresh(
        &self,
        dir: &RemotePath,
        caller: &CallerContext,
    ) -> FsResult<Vec<(String, AttributeRecord)>> {
        debug!(dir = %dir, "listing remote directory");
        let generation = self.cache.generation();
        let entries = self.service.listdir(dir)?;

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            match dir.join(&entry.name) {
                Ok(path) => records.push((
                    entry.name.clone(),
                    AttributeRecord::synthesize(&path, entry, &self.policy, caller),
                )),
                Err(e) => warn!(dir = %dir, error = %e, "skipping unrepresentable entry"),
            }
        }

        // The caller still gets the listing; it predates the mutation that
        // made it stale.
        self.cache
            .populate_if_current(dir, generation, records.iter().cloned());
        Ok(records)
    }

    /// Runs a remote mutation, dropping the affected listings around it.
    fn mutate(
        &self,
        dirs: &[&RemotePath],
        op: impl FnOnce() -> Result<(), ProtocolError>,
    ) -> FsResult<()> {
        for dir in dirs {
            self.cache.invalidate(dir);
        }
        let result = op();
        for dir in dirs {
            self.cache.invalidate(dir);
        }
        Ok(result?)
    }

    /// Opens a session, runs `f` on it and closes it. A failure in `f` wins
    /// over a failure to close.
    fn with_session<T>(
        &self,
        path: &RemotePath,
        mode: OpenMode,
        f: impl FnOnce(&mut S::File) -> Result<T, ProtocolError>,
    ) -> FsResult<T> {
        let file = self.service.open(path, mode)?;
        let mut session = SessionGuard::new(file, path);
        let value = session.with(f)?;
        session.close()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavfs_core::{FileEntry, MemoryService, RemoteOp};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn p(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    fn caller() -> CallerContext {
        CallerContext::new(501, 20, 1)
    }

    fn adapter() -> FilesystemAdapter<MemoryService> {
        let service = MemoryService::with_px4_layout();
        service.insert_file(&p("/boot.log"), vec![b'x'; 120]);
        FilesystemAdapter::new(service, PathPolicy::default())
    }

    #[test]
    fn test_root_bypasses_cache_and_remote() {
        let fs = adapter();
        let rec = fs.getattr("/", &caller()).unwrap();
        assert!(rec.is_dir());
        assert_eq!(rec.perm, 0o555);
        assert_eq!((rec.uid, rec.gid), (501, 20));
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 0);
    }

    #[test]
    fn test_getattr_miss_lists_parent_once() {
        let fs = adapter();
        fs.getattr("/boot.log", &caller()).unwrap();
        fs.getattr("/boot.log", &caller()).unwrap();
        fs.getattr("/fs", &caller()).unwrap();
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 1);
    }

    #[test]
    fn test_getattr_missing_is_not_found() {
        let fs = adapter();
        let err = fs.getattr("/nope", &caller()).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_getattr_missing_parent_surfaces_remote_code() {
        let fs = adapter();
        let err = fs.getattr("/nope/deeper", &caller()).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(matches!(err, FsError::Protocol(_)));
    }

    #[test]
    fn test_malformed_path_is_invalid_argument() {
        let fs = adapter();
        for bad in ["relative", "/a//b", "/a/../b", "/trailing/"] {
            let err = fs.getattr(bad, &caller()).unwrap_err();
            assert_eq!(err.to_errno(), libc::EINVAL, "{bad}");
        }
        assert!(matches!(fs.mkdir("x").unwrap_err(), FsError::InvalidArgument(_)));
        assert_eq!(fs.service().calls(RemoteOp::Mkdir), 0);
    }

    #[test]
    fn test_readdir_prefixes_dot_entries() {
        let fs = adapter();
        let names: Vec<_> = fs
            .readdir("/", &caller())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", "..", "boot.log", "fs"]);
    }

    #[test]
    fn test_readdir_populates_cache() {
        let fs = adapter();
        fs.readdir("/", &caller()).unwrap();
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 1);
        assert_eq!(fs.getattr("/boot.log", &caller()).unwrap().size, 120);
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 1);
    }

    #[test]
    fn test_readdir_always_goes_remote() {
        let fs = adapter();
        fs.readdir("/", &caller()).unwrap();
        fs.readdir("/", &caller()).unwrap();
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 2);
    }

    #[test]
    fn test_mutation_reaches_remote_despite_cache() {
        let fs = adapter();
        fs.readdir("/fs/microsd", &caller()).unwrap();
        // Cache says nothing is there; the device still decides.
        let err = fs.unlink("/fs/microsd/ghost.txt").unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert_eq!(fs.service().calls(RemoteOp::Unlink), 1);
    }

    #[test]
    fn test_failed_rmdir_still_invalidates() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/log/01.ulg"), b"x".to_vec());
        fs.getattr("/fs/microsd/log", &caller()).unwrap();
        assert!(fs.cache().has_listing(&p("/fs/microsd")));

        let err = fs.rmdir("/fs/microsd/log").unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOTEMPTY);
        assert!(!fs.cache().has_listing(&p("/fs/microsd")));
    }

    #[test]
    fn test_rmdir_drops_own_listing() {
        let fs = adapter();
        fs.service().insert_dir(&p("/fs/microsd/empty"));
        fs.readdir("/fs/microsd/empty", &caller()).unwrap();
        fs.rmdir("/fs/microsd/empty").unwrap();
        assert!(!fs.cache().has_listing(&p("/fs/microsd/empty")));
    }

    #[test]
    fn test_rename_directory_drops_child_listings() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/a/f.txt"), b"x".to_vec());
        fs.getattr("/fs/microsd/a/f.txt", &caller()).unwrap();

        fs.rename("/fs/microsd/a", "/fs/microsd/b").unwrap();
        assert!(matches!(
            fs.getattr("/fs/microsd/a/f.txt", &caller()),
            Err(FsError::Protocol(_))
        ));
        assert_eq!(fs.getattr("/fs/microsd/b/f.txt", &caller()).unwrap().size, 1);
    }

    #[test]
    fn test_create_materializes_empty_file() {
        let fs = adapter();
        fs.create("/fs/microsd/new.txt").unwrap();
        assert_eq!(fs.service().contents(&p("/fs/microsd/new.txt")).unwrap(), b"");
        assert_eq!(fs.service().open_sessions(), 0);
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/f.txt"), b"old".to_vec());
        fs.create("/fs/microsd/f.txt").unwrap();
        assert_eq!(fs.service().contents(&p("/fs/microsd/f.txt")).unwrap(), b"");
    }

    #[test]
    fn test_create_new_refuses_existing_file() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/f.txt"), b"keep".to_vec());
        // A cached listing that predates the file must not hide it.
        fs.cache()
            .populate(&p("/fs/microsd"), Vec::<(String, AttributeRecord)>::new());

        let err = fs.create_new("/fs/microsd/f.txt", &caller()).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
        assert_eq!(err.to_errno(), libc::EEXIST);
        assert_eq!(fs.service().contents(&p("/fs/microsd/f.txt")).unwrap(), b"keep");
        assert_eq!(fs.service().calls(RemoteOp::Open), 0);

        fs.create_new("/fs/microsd/g.txt", &caller()).unwrap();
        assert_eq!(fs.getattr("/fs/microsd/g.txt", &caller()).unwrap().size, 0);
    }

    #[test]
    fn test_read_refreshes_stale_size() {
        let fs = adapter();
        fs.getattr("/boot.log", &caller()).unwrap();
        // Device log grows behind our back.
        fs.service().insert_file(&p("/boot.log"), vec![b'y'; 200]);
        assert_eq!(fs.getattr("/boot.log", &caller()).unwrap().size, 120);

        let data = fs.read("/boot.log", 10, 195).unwrap();
        assert_eq!(data, vec![b'y'; 5]);
        assert_eq!(fs.getattr("/boot.log", &caller()).unwrap().size, 200);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let fs = adapter();
        assert!(fs.read("/boot.log", 10, 500).unwrap().is_empty());
    }

    #[test]
    fn test_write_updates_cached_size() {
        let fs = adapter();
        fs.create("/fs/microsd/f.bin").unwrap();
        assert_eq!(fs.getattr("/fs/microsd/f.bin", &caller()).unwrap().size, 0);

        assert_eq!(fs.write("/fs/microsd/f.bin", b"abcdef", 4).unwrap(), 6);
        assert_eq!(fs.getattr("/fs/microsd/f.bin", &caller()).unwrap().size, 10);
        assert_eq!(fs.service().calls(RemoteOp::Listdir), 1);
    }

    #[test]
    fn test_write_size_update_never_creates_record() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/f.bin"), b"".to_vec());
        fs.write("/fs/microsd/f.bin", b"abc", 0).unwrap();
        assert!(fs.cache().lookup(&p("/fs/microsd/f.bin")).is_none());
    }

    #[test]
    fn test_truncate() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/t.txt"), b"0123456789".to_vec());
        fs.getattr("/fs/microsd/t.txt", &caller()).unwrap();

        fs.truncate("/fs/microsd/t.txt", 4).unwrap();
        assert_eq!(fs.service().contents(&p("/fs/microsd/t.txt")).unwrap(), b"0123");
        assert_eq!(fs.getattr("/fs/microsd/t.txt", &caller()).unwrap().size, 4);
        assert_eq!(fs.service().open_sessions(), 0);
    }

    #[test]
    fn test_sessions_closed_on_failure_paths() {
        let fs = adapter();
        fs.service().insert_file(&p("/fs/microsd/f"), b"data".to_vec());

        fs.service().inject_failure(RemoteOp::Seek, ProtocolError::timeout());
        assert_eq!(fs.read("/fs/microsd/f", 4, 0).unwrap_err().to_errno(), libc::ETIMEDOUT);

        fs.service().inject_failure(RemoteOp::Write, ProtocolError::from_code(libc::ENOSPC));
        assert_eq!(fs.write("/fs/microsd/f", b"x", 0).unwrap_err().to_errno(), libc::ENOSPC);

        fs.service().inject_failure(RemoteOp::Truncate, ProtocolError::from_code(libc::EIO));
        assert_eq!(fs.truncate("/fs/microsd/f", 0).unwrap_err().to_errno(), libc::EIO);

        assert_eq!(fs.service().open_sessions(), 0);
        assert_eq!(fs.service().calls(RemoteOp::Close), 3);
    }

    #[test]
    fn test_close_failure_surfaces() {
        let fs = adapter();
        fs.service().inject_failure(RemoteOp::Close, ProtocolError::from_code(libc::EBADF));
        let err = fs.read("/boot.log", 4, 0).unwrap_err();
        assert_eq!(err.to_errno(), libc::EBADF);
    }

    #[test]
    fn test_operation_failure_wins_over_close_failure() {
        let fs = adapter();
        fs.service().inject_failure(RemoteOp::Read, ProtocolError::timeout());
        fs.service().inject_failure(RemoteOp::Close, ProtocolError::from_code(libc::EBADF));
        let err = fs.read("/boot.log", 4, 0).unwrap_err();
        assert_eq!(err.to_errno(), libc::ETIMEDOUT);
        assert_eq!(fs.service().open_sessions(), 0);
    }

    #[test]
    fn test_open_failure_opens_nothing() {
        let fs = adapter();
        fs.service().inject_failure(RemoteOp::Open, ProtocolError::from_code(libc::EMFILE));
        assert_eq!(fs.read("/boot.log", 1, 0).unwrap_err().to_errno(), libc::EMFILE);
        assert_eq!(fs.service().calls(RemoteOp::Close), 0);
    }

    #[test]
    fn test_directory_entry_unrepresentable_name_skipped() {
        struct OddService(MemoryService);

        impl RemoteFileService for OddService {
            type File = <MemoryService as RemoteFileService>::File;

            fn listdir(&self, path: &RemotePath) -> Result<Vec<FileEntry>, ProtocolError> {
                let mut entries = self.0.listdir(path)?;
                entries.push(FileEntry::file("bad/name", 1));
                Ok(entries)
            }
            fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<Self::File, ProtocolError> {
                self.0.open(path, mode)
            }
            fn mkdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
                self.0.mkdir(path)
            }
            fn rmdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
                self.0.rmdir(path)
            }
            fn unlink(&self, path: &RemotePath) -> Result<(), ProtocolError> {
                self.0.unlink(path)
            }
            fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<(), ProtocolError> {
                self.0.rename(old, new)
            }
        }

        let fs = FilesystemAdapter::new(OddService(MemoryService::new()), PathPolicy::default());
        let entries = fs.readdir("/", &caller()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_destroy_clears_cache() {
        let fs = adapter();
        fs.readdir("/", &caller()).unwrap();
        fs.destroy();
        assert!(fs.cache().is_empty());
    }

    /// Takes its listing snapshot, then parks until released.
    struct ParkedListing {
        inner: MemoryService,
        armed: AtomicBool,
        snapshot_taken: Barrier,
        release: Barrier,
    }

    impl RemoteFileService for ParkedListing {
        type File = <MemoryService as RemoteFileService>::File;

        fn listdir(&self, path: &RemotePath) -> Result<Vec<FileEntry>, ProtocolError> {
            let entries = self.inner.listdir(path)?;
            if self.armed.swap(false, Ordering::AcqRel) {
                self.snapshot_taken.wait();
                self.release.wait();
            }
            Ok(entries)
        }
        fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<Self::File, ProtocolError> {
            self.inner.open(path, mode)
        }
        fn mkdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
            self.inner.mkdir(path)
        }
        fn rmdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
            self.inner.rmdir(path)
        }
        fn unlink(&self, path: &RemotePath) -> Result<(), ProtocolError> {
            self.inner.unlink(path)
        }
        fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<(), ProtocolError> {
            self.inner.rename(old, new)
        }
    }

    fn parked_adapter() -> Arc<FilesystemAdapter<ParkedListing>> {
        let inner = MemoryService::with_px4_layout();
        inner.insert_file(&p("/fs/microsd/a.txt"), b"a".to_vec());
        let service = ParkedListing {
            inner,
            armed: AtomicBool::new(true),
            snapshot_taken: Barrier::new(2),
            release: Barrier::new(2),
        };
        Arc::new(FilesystemAdapter::new(service, PathPolicy::default()))
    }

    #[test]
    fn test_listing_racing_unlink_is_not_cached() {
        let fs = parked_adapter();
        let lister = {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let _ = fs.getattr("/fs/microsd/a.txt", &caller());
            })
        };

        fs.service().snapshot_taken.wait();
        fs.unlink("/fs/microsd/a.txt").unwrap();
        fs.service().release.wait();
        lister.join().unwrap();

        assert!(fs.cache().lookup(&p("/fs/microsd/a.txt")).is_none());
        assert!(matches!(
            fs.getattr("/fs/microsd/a.txt", &caller()),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_listing_racing_rename_is_not_cached() {
        let fs = parked_adapter();
        let lister = {
            let fs = Arc::clone(&fs);
            thread::spawn(move || fs.readdir("/fs/microsd", &caller()).map(|e| e.len()))
        };

        fs.service().snapshot_taken.wait();
        fs.rename("/fs/microsd/a.txt", "/fs/microsd/b.txt").unwrap();
        fs.service().release.wait();
        // Listed before the rename completed: `.`, `..`, `a.txt`, `log`.
        assert_eq!(lister.join().unwrap().unwrap(), 4);

        assert!(fs.cache().lookup(&p("/fs/microsd/a.txt")).is_none());
        assert!(fs.getattr("/fs/microsd/b.txt", &caller()).is_ok());
        assert!(matches!(
            fs.getattr("/fs/microsd/a.txt", &caller()),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_calls() {
        let fs = Arc::new(adapter());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    let path = format!("/fs/microsd/f{i}.txt");
                    fs.create(path.as_str()).unwrap();
                    fs.write(path.as_str(), format!("payload {i}").as_bytes(), 0).unwrap();
                    let rec = fs.getattr(path.as_str(), &caller()).unwrap();
                    assert!(!rec.is_dir());
                    assert_eq!(fs.read(path.as_str(), 64, 0).unwrap(), format!("payload {i}").as_bytes());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let names = fs.readdir("/fs/microsd", &caller()).unwrap();
        assert_eq!(names.len(), 2 + 1 + 8);
        assert_eq!(fs.service().open_sessions(), 0);
    }
}
