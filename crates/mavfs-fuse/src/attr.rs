//! Attribute caching for the FUSE filesystem.
//!
//! Every metadata query that misses the cache costs a directory listing
//! over the telemetry link, so listings are kept per directory and reused
//! until something mutates that directory. There is no TTL: the only way
//! an entry leaves the cache is invalidation or a fresh listing replacing
//! it.
//!
//! Records are grouped by parent directory, which makes the two bulk
//! operations (replace a directory's records, drop a directory's records)
//! proportional to the directory size and atomic under a single lock.
//!
//! A listing is slow and a mutation can complete while one is in flight.
//! Every invalidation is stamped with a generation number; a listing taken
//! at generation `g` is only stored by [`AttributeCache::populate_if_current`]
//! if nothing invalidated its directory (or an ancestor's subtree) after
//! `g`.

use crate::context::CallerContext;
use crate::policy::{PathPolicy, READ_ONLY_DIR_PERM};
use mavfs_core::{EntryKind, FileEntry, RemotePath};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Directory type bits.
pub const S_IFDIR: u32 = 0o040_000;

/// Regular file type bits.
pub const S_IFREG: u32 = 0o100_000;

/// Synthesized POSIX metadata for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeRecord {
    pub kind: EntryKind,
    /// Permission bits only; see [`mode`](Self::mode) for the full mode.
    pub perm: u16,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
}

impl AttributeRecord {
    /// Builds the record for a listed entry at `path`.
    pub fn synthesize(
        path: &RemotePath,
        entry: &FileEntry,
        policy: &PathPolicy,
        caller: &CallerContext,
    ) -> Self {
        let size = match entry.kind {
            EntryKind::File => entry.size,
            EntryKind::Directory => 0,
        };
        Self {
            kind: entry.kind,
            perm: policy.perm_for(path, entry.kind),
            size,
            uid: caller.uid,
            gid: caller.gid,
        }
    }

    /// The root directory: read+execute, owned by the caller.
    pub fn root(caller: &CallerContext) -> Self {
        Self {
            kind: EntryKind::Directory,
            perm: READ_ONLY_DIR_PERM,
            size: 0,
            uid: caller.uid,
            gid: caller.gid,
        }
    }

    /// Type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        let type_bits = match self.kind {
            EntryKind::Directory => S_IFDIR,
            EntryKind::File => S_IFREG,
        };
        type_bits | u32::from(self.perm)
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Path → attribute cache, filled from directory listings.
#[derive(Debug, Default)]
pub struct AttributeCache {
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    /// Directory path → entry name → record.
    listings: HashMap<RemotePath, HashMap<String, AttributeRecord>>,
    /// Bumped by every invalidation.
    generation: u64,
    /// Directory → generation of its last invalidation.
    dir_invalidated: HashMap<RemotePath, u64>,
    /// Subtree root → generation of its last subtree invalidation.
    tree_invalidated: HashMap<RemotePath, u64>,
    /// Generation of the last `clear`.
    cleared: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Whether `dir` was invalidated after `generation`.
    fn invalidated_since(&self, dir: &RemotePath, generation: u64) -> bool {
        if self.cleared > generation {
            return true;
        }
        if self.dir_invalidated.get(dir).is_some_and(|&g| g > generation) {
            return true;
        }
        let mut current = dir.clone();
        loop {
            if self.tree_invalidated.get(&current).is_some_and(|&g| g > generation) {
                return true;
            }
            if current.is_root() {
                return false;
            }
            current = current.parent();
        }
    }
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record for `path`. The root is never cached.
    pub fn lookup(&self, path: &RemotePath) -> Option<AttributeRecord> {
        let name = path.file_name()?;
        self.state
            .lock()
            .listings
            .get(&path.parent())
            .and_then(|entries| entries.get(name))
            .copied()
    }

    /// Current generation. Read it before starting a listing and hand it to
    /// [`populate_if_current`](Self::populate_if_current).
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Replaces every cached record under `dir` with `records`.
    pub fn populate<I>(&self, dir: &RemotePath, records: I)
    where
        I: IntoIterator<Item = (String, AttributeRecord)>,
    {
        let entries: HashMap<String, AttributeRecord> = records.into_iter().collect();
        debug!(dir = %dir, count = entries.len(), "attr cache populate");
        self.state.lock().listings.insert(dir.clone(), entries);
    }

    /// Like [`populate`](Self::populate), but only if `dir` has not been
    /// invalidated since `generation`. Returns whether the records were
    /// stored.
    pub fn populate_if_current<I>(&self, dir: &RemotePath, generation: u64, records: I) -> bool
    where
        I: IntoIterator<Item = (String, AttributeRecord)>,
    {
        let entries: HashMap<String, AttributeRecord> = records.into_iter().collect();
        let mut state = self.state.lock();
        if state.invalidated_since(dir, generation) {
            debug!(dir = %dir, generation, "attr cache populate skipped, listing is stale");
            return false;
        }
        debug!(dir = %dir, count = entries.len(), "attr cache populate");
        state.listings.insert(dir.clone(), entries);
        true
    }

    /// Drops every cached record under `dir`. Returns whether anything was
    /// cached.
    pub fn invalidate(&self, dir: &RemotePath) -> bool {
        let mut state = self.state.lock();
        let generation = state.bump();
        state.dir_invalidated.insert(dir.clone(), generation);
        let removed = state.listings.remove(dir).is_some();
        if removed {
            debug!(dir = %dir, "attr cache invalidate");
        }
        removed
    }

    /// Drops the listings of `path` and of every directory below it.
    pub fn invalidate_tree(&self, path: &RemotePath) {
        let mut state = self.state.lock();
        let generation = state.bump();
        state.tree_invalidated.insert(path.clone(), generation);
        state.listings.retain(|dir, _| !dir.starts_with(path));
    }

    /// Overwrites the size of an existing record. Never creates one.
    pub fn update_size(&self, path: &RemotePath, size: u64) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let mut state = self.state.lock();
        match state
            .listings
            .get_mut(&path.parent())
            .and_then(|entries| entries.get_mut(name))
        {
            Some(record) => {
                record.size = size;
                true
            }
            None => false,
        }
    }

    /// Drops everything, including listings still in flight.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let generation = state.bump();
        state.cleared = generation;
        state.listings.clear();
        state.dir_invalidated.clear();
        state.tree_invalidated.clear();
    }

    /// Number of cached records across all directories.
    pub fn len(&self) -> usize {
        self.state.lock().listings.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a listing of `dir` is currently cached.
    pub fn has_listing(&self, dir: &RemotePath) -> bool {
        self.state.lock().listings.contains_key(dir)
    }
}
