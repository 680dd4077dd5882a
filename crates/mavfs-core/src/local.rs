//! A host directory served as device storage.
//!
//! Useful against SITL setups where the simulated flight controller keeps
//! its storage in a plain directory, and for exercising mounts without any
//! hardware attached.

use crate::entry::FileEntry;
use crate::error::ProtocolError;
use crate::path::RemotePath;
use crate::service::{OpenMode, RemoteFile, RemoteFileService};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Serves `root` as the device's `/`.
#[derive(Debug, Clone)]
pub struct LocalDirService {
    root: PathBuf,
}

impl LocalDirService {
    /// Creates a service rooted at an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ProtocolError> {
        let root = root.into();
        if !fs::metadata(&root)?.is_dir() {
            return Err(ProtocolError::new(libc::ENOTDIR, "device root is not a directory"));
        }
        debug!(root = %root.display(), "serving local directory as device storage");
        Ok(Self { root })
    }

    /// Host directory backing the device root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &RemotePath) -> PathBuf {
        path.components().fold(self.root.clone(), |acc, c| acc.join(c))
    }
}

impl RemoteFileService for LocalDirService {
    type File = LocalFile;

    fn listdir(&self, path: &RemotePath) -> Result<Vec<FileEntry>, ProtocolError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(self.host_path(path))? {
            let dirent = dirent?;
            let Ok(name) = dirent.file_name().into_string() else {
                // The device protocol carries UTF-8 names only.
                continue;
            };
            let meta = dirent.metadata()?;
            if meta.is_dir() {
                entries.push(FileEntry::dir(name));
            } else if meta.is_file() {
                entries.push(FileEntry::file(name, meta.len()));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<LocalFile, ProtocolError> {
        let host = self.host_path(path);
        if fs::metadata(&host).is_ok_and(|m| m.is_dir()) {
            return Err(ProtocolError::new(libc::EISDIR, "is a directory"));
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true),
            OpenMode::CreateWrite => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true),
        };
        let file = options.open(&host)?;
        Ok(LocalFile { file, mode })
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        Ok(fs::create_dir(self.host_path(path))?)
    }

    fn rmdir(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        Ok(fs::remove_dir(self.host_path(path))?)
    }

    fn unlink(&self, path: &RemotePath) -> Result<(), ProtocolError> {
        Ok(fs::remove_file(self.host_path(path))?)
    }

    fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<(), ProtocolError> {
        Ok(fs::rename(self.host_path(old), self.host_path(new))?)
    }
}

/// Session backed by a host file.
#[derive(Debug)]
pub struct LocalFile {
    file: File,
    mode: OpenMode,
}

impl RemoteFile for LocalFile {
    fn seek(&mut self, offset: u64) -> Result<(), ProtocolError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(max_bytes.min(1 << 20));
        (&mut self.file).take(max_bytes as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn truncate(&mut self, length: u64) -> Result<(), ProtocolError> {
        if !self.mode.is_write() {
            return Err(ProtocolError::new(libc::EBADF, "session is read-only"));
        }
        self.file.set_len(length)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.file.metadata().map_or(0, |m| m.len())
    }

    fn close(mut self) -> Result<(), ProtocolError> {
        if self.mode.is_write() {
            self.file.flush()?;
            self.file.sync_data()?;
        }
        Ok(())
    }
}
