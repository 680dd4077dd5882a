//! Inode management for the FUSE filesystem.
//!
//! The kernel addresses everything by inode number while the device only
//! knows paths. [`InodeTable`] maps between the two and tracks the kernel's
//! lookup count per inode so entries are reclaimed on `forget()`.
//!
//! Inode numbers are never reused within a mount. Attributes are not stored
//! here; they live in the [`AttributeCache`](crate::attr::AttributeCache).

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use mavfs_core::RemotePath;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Current path on the device.
    pub path: RemotePath,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: RemotePath, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count, returning the new value, or `None` if
    /// the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        self.nlookup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(count))
            .ok()
            .map(|old| old - count)
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe bidirectional inode ↔ path table.
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: DashMap<RemotePath, u64>,
    inodes: DashMap<u64, InodeEntry>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a table holding only the root.
    pub fn new() -> Self {
        let table = Self {
            path_to_inode: DashMap::new(),
            inodes: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        table.path_to_inode.insert(RemotePath::root(), ROOT_INODE);
        table
            .inodes
            .insert(ROOT_INODE, InodeEntry::new(RemotePath::root(), 1));
        table
    }

    /// Returns the inode for `path`, allocating one if needed, and counts a
    /// kernel lookup against it.
    pub fn lookup(&self, path: &RemotePath) -> u64 {
        let (inode, created) = self.get_or_insert(path, 1);
        if !created && let Some(entry) = self.inodes.get(&inode) {
            entry.inc_nlookup();
        }
        inode
    }

    /// Returns the inode for `path` without touching the lookup count.
    /// Used for `readdir()` results, which per FUSE do not count as lookups.
    pub fn peek_or_insert(&self, path: &RemotePath) -> u64 {
        self.get_or_insert(path, 0).0
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, inode: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.inodes.get(&inode)
    }

    /// Current path of `inode`.
    pub fn path(&self, inode: u64) -> Option<RemotePath> {
        self.inodes.get(&inode).map(|e| e.path.clone())
    }

    /// Looks up an inode by path.
    pub fn get_inode(&self, path: &RemotePath) -> Option<u64> {
        self.path_to_inode.get(path).map(|r| *r)
    }

    /// Decrements the lookup count for an inode, evicting it at zero.
    /// Returns `true` if the inode was evicted. The root is never evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        let remaining = match self.inodes.get(&inode) {
            Some(entry) => entry.dec_nlookup(nlookup),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }

        match self.inodes.remove_if(&inode, |_, e| e.nlookup() == 0) {
            Some((_, entry)) => {
                self.path_to_inode.remove_if(&entry.path, |_, v| *v == inode);
                true
            }
            None => false,
        }
    }

    /// Drops the path mapping after a delete. The entry itself stays until
    /// the kernel forgets it, since the kernel may still hold the number.
    pub fn invalidate_path(&self, path: &RemotePath) {
        self.path_to_inode.remove(path);
    }

    /// Moves `old` and everything below it to `new`.
    ///
    /// Whatever `new` pointed at before is unmapped, matching the device
    /// replacing the target.
    pub fn rename(&self, old: &RemotePath, new: &RemotePath) {
        if old == new {
            return;
        }
        self.path_to_inode.retain(|path, _| !path.starts_with(new));

        let moved: Vec<(RemotePath, u64)> = self
            .path_to_inode
            .iter()
            .filter(|r| r.key().starts_with(old))
            .map(|r| (r.key().clone(), *r.value()))
            .collect();

        for (path, inode) in moved {
            let Some(target) = path.rebase(old, new) else {
                continue;
            };
            self.path_to_inode.remove(&path);
            if let Some(mut entry) = self.inodes.get_mut(&inode) {
                entry.path = target.clone();
            }
            self.path_to_inode.insert(target, inode);
        }
    }

    /// Number of inodes currently allocated, root included.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// True if only the root is allocated.
    pub fn is_empty(&self) -> bool {
        self.inodes.len() <= 1
    }

    /// Returns the inode for `path` and whether it was allocated by this
    /// call.
    fn get_or_insert(&self, path: &RemotePath, initial: u64) -> (u64, bool) {
        if let Some(inode) = self.path_to_inode.get(path) {
            return (*inode, false);
        }

        // Entry API closes the race between two threads allocating the same
        // path.
        let mut created = false;
        let inode = *self.path_to_inode.entry(path.clone()).or_insert_with(|| {
            let inode = self.next_inode.fetch_add(1, Ordering::Relaxed);
            self.inodes
                .insert(inode, InodeEntry::new(path.clone(), initial));
            created = true;
            inode
        });
        (inode, created)
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn p(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    #[test]
    fn test_root_inode_exists() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INODE), Some(RemotePath::root()));
        assert_eq!(table.get_inode(&RemotePath::root()), Some(ROOT_INODE));
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_allocates_once_and_counts() {
        let table = InodeTable::new();
        let inode = table.lookup(&p("/fs"));
        assert!(inode > ROOT_INODE);
        assert_eq!(table.lookup(&p("/fs")), inode);
        assert_eq!(table.get(inode).unwrap().nlookup(), 2);
    }

    #[test]
    fn test_readdir_entries_not_counted() {
        let table = InodeTable::new();
        let inode = table.peek_or_insert(&p("/boot.log"));
        assert_eq!(table.get(inode).unwrap().nlookup(), 0);

        assert_eq!(table.lookup(&p("/boot.log")), inode);
        assert_eq!(table.get(inode).unwrap().nlookup(), 1);
    }

    #[test]
    fn test_forget_evicts_at_zero() {
        let table = InodeTable::new();
        let inode = table.lookup(&p("/tmp"));
        table.lookup(&p("/tmp"));

        assert!(!table.forget(inode, 1));
        assert!(table.forget(inode, 1));
        assert!(table.get(inode).is_none());
        assert!(table.get_inode(&p("/tmp")).is_none());
    }

    #[test]
    fn test_forget_underflow_is_ignored() {
        let table = InodeTable::new();
        let inode = table.lookup(&p("/tmp"));
        assert!(!table.forget(inode, 5));
        assert_eq!(table.get(inode).unwrap().nlookup(), 1);
    }

    #[test]
    fn test_forget_root_never_evicts() {
        let table = InodeTable::new();
        assert!(!table.forget(ROOT_INODE, 1));
        assert!(table.get(ROOT_INODE).is_some());
    }

    #[test]
    fn test_inode_numbers_not_reused() {
        let table = InodeTable::new();
        let first = table.lookup(&p("/a"));
        table.forget(first, 1);
        let second = table.lookup(&p("/a"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalidate_path_keeps_entry() {
        let table = InodeTable::new();
        let inode = table.lookup(&p("/gone"));
        table.invalidate_path(&p("/gone"));
        assert!(table.get_inode(&p("/gone")).is_none());
        assert!(table.get(inode).is_some());

        // A new file at the same path gets a fresh inode.
        assert_ne!(table.lookup(&p("/gone")), inode);
        assert!(table.forget(inode, 1));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let table = InodeTable::new();
        let dir = table.lookup(&p("/fs/a"));
        let child = table.lookup(&p("/fs/a/f.txt"));
        let sibling = table.lookup(&p("/fs/ab"));

        table.rename(&p("/fs/a"), &p("/fs/b"));
        assert_eq!(table.path(dir), Some(p("/fs/b")));
        assert_eq!(table.path(child), Some(p("/fs/b/f.txt")));
        assert_eq!(table.get_inode(&p("/fs/b/f.txt")), Some(child));
        assert!(table.get_inode(&p("/fs/a")).is_none());
        assert_eq!(table.path(sibling), Some(p("/fs/ab")));
    }

    #[test]
    fn test_rename_over_existing_unmaps_target() {
        let table = InodeTable::new();
        let src = table.lookup(&p("/x"));
        let dst = table.lookup(&p("/y"));

        table.rename(&p("/x"), &p("/y"));
        assert_eq!(table.get_inode(&p("/y")), Some(src));
        assert_eq!(table.path(dst), Some(p("/y")));
        assert!(table.forget(dst, 1));
        assert_eq!(table.get_inode(&p("/y")), Some(src));
    }

    #[test]
    fn test_concurrent_lookup_same_path() {
        let table = Arc::new(InodeTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.lookup(&p("/fs/microsd")))
            })
            .collect();
        let inodes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(inodes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.get(inodes[0]).unwrap().nlookup(), 8);
    }
}
