//! In-process model of a flight controller's file service.
//!
//! [`MemoryService`] keeps the whole device tree in memory and answers with
//! the same errno values the device would. It backs demo mounts and tests,
//! and exposes the hooks tests need: one-shot fault injection per
//! operation, per-operation call counters, and a count of sessions that were
//! opened but never closed.

use crate::entry::{EntryKind, FileEntry};
use crate::error::ProtocolError;
use crate::path::RemotePath;
use crate::service::{OpenMode, RemoteFile, RemoteFileService};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Listdir,
    Open,
    Seek,
    Read,
    Write,
    Truncate,
    Close,
    Mkdir,
    Rmdir,
    Unlink,
    Rename,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// Storage size of a default device.
pub const DEFAULT_CAPACITY: u64 = 512 * 1024 * 1024;

#[derive(Debug)]
struct Device {
    nodes: Mutex<BTreeMap<RemotePath, Node>>,
    faults: Mutex<HashMap<RemoteOp, ProtocolError>>,
    calls: Mutex<HashMap<RemoteOp, u64>>,
    open_sessions: AtomicUsize,
    /// Total bytes the files may hold.
    capacity: u64,
}

impl Device {
    fn with_capacity(capacity: u64) -> Self {
        Self {
            nodes: Mutex::default(),
            faults: Mutex::default(),
            calls: Mutex::default(),
            open_sessions: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Checks that `path` may grow to `new_len` bytes. Shrinking always
    /// succeeds.
    fn check_growth(
        &self,
        nodes: &BTreeMap<RemotePath, Node>,
        path: &RemotePath,
        new_len: u64,
    ) -> Result<(), ProtocolError> {
        if new_len > self.capacity {
            return Err(err(libc::EFBIG, "file too large"));
        }
        let mut used = 0u64;
        let mut current = 0u64;
        for (p, node) in nodes {
            if let Node::File(data) = node {
                if p == path {
                    current = data.len() as u64;
                } else {
                    used += data.len() as u64;
                }
            }
        }
        if new_len > current && used + new_len > self.capacity {
            return Err(err(libc::ENOSPC, "no space left on device"));
        }
        Ok(())
    }

    /// Counts the call and fires an injected fault, if one is armed.
    fn enter(&self, op: RemoteOp) -> Result<(), ProtocolError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        match self.faults.lock().remove(&op) {
            Some(err) => {
                trace!(?op, code = err.code(), "injected fault fired");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn err(code: i32, reason: &'static str) -> ProtocolError {
    ProtocolError::new(code, reason)
}

fn vanished() -> ProtocolError {
    err(libc::ENOENT, "file vanished during session")
}

/// Thread-safe in-memory device. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryService {
    device: Arc<Device>,
}

impl MemoryService {
    /// Creates a device holding only the root directory.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty device that holds at most `capacity` bytes of file
    /// data. Writes past it fail with `ENOSPC`, single files larger than
    /// it with `EFBIG`.
    pub fn with_capacity(capacity: u64) -> Self {
        let device = Device::with_capacity(capacity);
        device.nodes.lock().insert(RemotePath::root(), Node::Dir);
        Self {
            device: Arc::new(device),
        }
    }

    /// Creates a device with the PX4 storage layout (`/fs/microsd/log`).
    pub fn with_px4_layout() -> Self {
        let service = Self::new();
        if let Ok(log_dir) = RemotePath::parse("/fs/microsd/log") {
            service.insert_dir(&log_dir);
        }
        service
    }

    /// Creates `path` and any missing ancestors as directories.
    pub fn insert_dir(&self, path: &RemotePath) {
        let mut nodes = self.device.nodes.lock();
        let mut current = RemotePath::root();
        for segment in path.components() {
            let Ok(next) = current.join(segment) else {
                return;
            };
            nodes.entry(next.clone()).or_insert(Node::Dir);
            current = next;
        }
    }

    /// Stores a file, creating missing ancestor directories.
    pub fn insert_file(&self, path: &RemotePath, contents: impl Into<Vec<u8>>) {
        self.insert_dir(&path.parent());
        self.device
            .nodes
            .lock()
            .insert(path.clone(), Node::File(contents.into()));
    }

    /// Returns a file's contents, or `None` for missing paths and directories.
    pub fn contents(&self, path: &RemotePath) -> Option<Vec<u8>> {
        match self.device.nodes.lock().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns the kind of the node at `path`, if any.
    pub fn kind(&self, path: &RemotePath) -> Option<EntryKind> {
        self.device.nodes.lock().get(path).map(|n| match n {
            Node::Dir => EntryKind::Directory,
            Node::File(_) => EntryKind::File,
        })
    }

    /// Arms a one-shot failure: the next call of `op` fails with `error`.
    pub fn inject_failure(&self, op: RemoteOp, error: ProtocolError) {
        self.device.faults.lock().insert(op, error);
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: RemoteOp) -> u64 {
        self.device.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.device.open_sessions.load(Ordering::Acquire)
    }

    fn require_dir(nodes: &BTreeMap<RemotePath, Node>, path: &RemotePath) -> Result<(), ProtocolError> {
        match nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(err(libc::ENOTDIR, "not a directory")),
            None => Err(err(libc::ENOENT, "no such directory")),
        }
    }

    fn has_children(nodes: &BTreeMap<RemotePath, Node>, path: &RemotePath) -> bool {
        nodes
            .keys()
            .any(|p| !p.is_root() && p != path && p.starts_with(path))
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFileService for MemoryService {
    type File = MemoryFile;

    fn listdir(&self, path: &RemotePath) -> Result<Vec<FileEntry>, ProtocolError> {
        self.device.enter(RemoteOp::Listdir)?;
        let nodes = self.device.nodes.lock();
        Self::require_dir(&nodes, path)?;

        let entries = nodes
            .iter()
            .filter(|(p, _)| !p.is_root() && p.parent() == *path)
            .filter_map(|(p, node)| {
                let name = p.file_name()?;
                Some(match node {
                    Node::Dir => FileEntry::dir(name),
                    Node::File(data) => FileEntry::file(name, data.len() as u64),
                })
            })
            .collect();
        Ok(entries)
    }

    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<MemoryFile, ProtocolError> {
        self.device.enter(RemoteOp::Open)?;
        let mut nodes = self.device.nodes.lock();

        let position = match nodes.get_mut(path) {
            Some(Node::Dir) => return Err(err(libc::EISDIR, "is a directory")),
            Some(Node::File(data)) => match mode {
                OpenMode::CreateWrite => {
                    data.clear();
                    0
                }
                OpenMode::Append => data.len() as u64,
                OpenMode::Read | OpenMode::Write => 0,
            },
            None if mode == OpenMode::CreateWrite => {
                Self::require_dir(&nodes, &path.parent())?;
                nodes.insert(path.clone(), Node::File(Vec::new()));
                0
            }
            None => return Err(err(libc::ENOENT, "no such file")),
        };

        self.device.open_sessions.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryFile {
            device: Arc::clone(&self.device),
            path: path.clone(),
            mode,
            position,
        })
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Mkdir)?;
        let mut nodes = self.device.nodes.lock();
        if nodes.contains_key(path) {
            return Err(err(libc::EEXIST, "already exists"));
        }
        Self::require_dir(&nodes, &path.parent())?;
        nodes.insert(path.clone(), Node::Dir);
        Ok(())
    }

    fn rmdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Rmdir)?;
        let mut nodes = self.device.nodes.lock();
        if path.is_root() {
            return Err(err(libc::EBUSY, "cannot remove root"));
        }
        Self::require_dir(&nodes, path)?;
        if Self::has_children(&nodes, path) {
            return Err(err(libc::ENOTEMPTY, "directory not empty"));
        }
        nodes.remove(path);
        Ok(())
    }

    fn unlink(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Unlink)?;
        let mut nodes = self.device.nodes.lock();
        match nodes.get(path) {
            Some(Node::File(_)) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(err(libc::EISDIR, "is a directory")),
            None => Err(err(libc::ENOENT, "no such file")),
        }
    }

    fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Rename)?;
        let mut nodes = self.device.nodes.lock();
        if old.is_root() || new.is_root() {
            return Err(err(libc::EBUSY, "cannot rename root"));
        }
        let Some(source) = nodes.get(old).cloned() else {
            return Err(err(libc::ENOENT, "no such file or directory"));
        };
        if old == new {
            return Ok(());
        }
        if new.starts_with(old) {
            return Err(err(libc::EINVAL, "cannot move a directory into itself"));
        }
        Self::require_dir(&nodes, &new.parent())?;
        match (&source, nodes.get(new)) {
            (Node::Dir, Some(Node::File(_))) => return Err(err(libc::ENOTDIR, "not a directory")),
            (Node::File(_), Some(Node::Dir)) => return Err(err(libc::EISDIR, "is a directory")),
            (Node::Dir, Some(Node::Dir)) if Self::has_children(&nodes, new) => {
                return Err(err(libc::ENOTEMPTY, "directory not empty"));
            }
            _ => {}
        }

        let moved: Vec<RemotePath> = nodes.keys().filter(|p| p.starts_with(old)).cloned().collect();
        nodes.remove(new);
        for path in moved {
            if let (Some(node), Some(target)) = (nodes.remove(&path), path.rebase(old, new)) {
                nodes.insert(target, node);
            }
        }
        Ok(())
    }
}

/// Session on a [`MemoryService`] file. Writes go straight to the shared
/// tree.
#[derive(Debug)]
pub struct MemoryFile {
    device: Arc<Device>,
    path: RemotePath,
    mode: OpenMode,
    position: u64,
}

impl MemoryFile {
    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut Vec<u8>) -> T,
    ) -> Result<T, ProtocolError> {
        match self.device.nodes.lock().get_mut(&self.path) {
            Some(Node::File(data)) => Ok(f(data)),
            _ => Err(vanished()),
        }
    }

    fn require_write(&self) -> Result<(), ProtocolError> {
        if self.mode.is_write() {
            Ok(())
        } else {
            Err(err(libc::EBADF, "session is read-only"))
        }
    }
}

impl RemoteFile for MemoryFile {
    fn seek(&mut self, offset: u64) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Seek)?;
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
        self.device.enter(RemoteOp::Read)?;
        let position = usize::try_from(self.position).unwrap_or(usize::MAX);
        let chunk = self.with_data(|data| {
            let start = position.min(data.len());
            let end = start.saturating_add(max_bytes).min(data.len());
            data[start..end].to_vec()
        })?;
        self.position += chunk.len() as u64;
        Ok(chunk)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        self.device.enter(RemoteOp::Write)?;
        self.require_write()?;
        let too_large = || err(libc::EFBIG, "offset too large");

        let mut nodes = self.device.nodes.lock();
        let current = match nodes.get(&self.path) {
            Some(Node::File(data)) => data.len() as u64,
            _ => return Err(vanished()),
        };
        let start = if self.mode == OpenMode::Append {
            current
        } else {
            self.position
        };
        let end = start
            .checked_add(bytes.len() as u64)
            .ok_or_else(too_large)?;
        self.device.check_growth(&nodes, &self.path, end)?;

        let (start, end_idx) = match (usize::try_from(start), usize::try_from(end)) {
            (Ok(s), Ok(e)) => (s, e),
            _ => return Err(too_large()),
        };
        let Some(Node::File(data)) = nodes.get_mut(&self.path) else {
            return Err(vanished());
        };
        if data.len() < end_idx {
            data.resize(end_idx, 0);
        }
        data[start..end_idx].copy_from_slice(bytes);
        drop(nodes);

        self.position = end;
        Ok(bytes.len())
    }

    fn truncate(&mut self, length: u64) -> Result<(), ProtocolError> {
        self.device.enter(RemoteOp::Truncate)?;
        self.require_write()?;

        let mut nodes = self.device.nodes.lock();
        self.device.check_growth(&nodes, &self.path, length)?;
        let length = usize::try_from(length).map_err(|_| err(libc::EFBIG, "length too large"))?;
        match nodes.get_mut(&self.path) {
            Some(Node::File(data)) => {
                data.resize(length, 0);
                Ok(())
            }
            _ => Err(vanished()),
        }
    }

    fn size(&self) -> u64 {
        self.with_data(|data| data.len() as u64).unwrap_or(0)
    }

    fn close(self) -> Result<(), ProtocolError> {
        // The session is gone on the device even when the close ack is lost.
        self.device.open_sessions.fetch_sub(1, Ordering::AcqRel);
        self.device.enter(RemoteOp::Close)
    }
}
