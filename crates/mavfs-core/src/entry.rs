//! Directory listing snapshots.

/// Kind of a remote directory entry.
///
/// The device only distinguishes plain files from directories; there are no
/// symlinks or special files on flight controller storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// One entry of a remote directory listing, as the device reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Single path segment.
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes. Always 0 for directories.
    pub size: u64,
}

impl FileEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
        }
    }
}
