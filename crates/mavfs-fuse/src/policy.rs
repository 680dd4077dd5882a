//! Permission policy for synthesized attributes.
//!
//! The device reports no permissions at all, so modes are derived from
//! where a path lives. On a PX4 flight controller only the SD card is meant
//! to be written from the ground; everything else is presented read-only.

use mavfs_core::{EntryKind, RemotePath};

/// Directory permissions outside writable regions (r-xr-xr-x).
pub const READ_ONLY_DIR_PERM: u16 = 0o555;

/// File permissions outside writable regions (r--r--r--).
pub const READ_ONLY_FILE_PERM: u16 = 0o444;

/// Directory permissions inside writable regions (rwxr-xr-x).
pub const READ_WRITE_DIR_PERM: u16 = 0o755;

/// File permissions inside writable regions (rw-r--r--).
pub const READ_WRITE_FILE_PERM: u16 = 0o644;

/// Writable storage region on PX4 flight controllers.
pub const PX4_SD_CARD: &str = "/fs/microsd";

/// Permissions for everything at or below `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub prefix: RemotePath,
    pub dir_perm: u16,
    pub file_perm: u16,
}

impl PolicyRule {
    pub fn new(prefix: RemotePath, dir_perm: u16, file_perm: u16) -> Self {
        Self {
            prefix,
            dir_perm,
            file_perm,
        }
    }

    /// A region where both directories and files are writable by the owner.
    pub fn read_write(prefix: RemotePath) -> Self {
        Self::new(prefix, READ_WRITE_DIR_PERM, READ_WRITE_FILE_PERM)
    }

    fn perm_for(&self, kind: EntryKind) -> u16 {
        match kind {
            EntryKind::Directory => self.dir_perm,
            EntryKind::File => self.file_perm,
        }
    }
}

/// Longest-prefix rule table.
///
/// Always contains a rule for `/`, so every path resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPolicy {
    rules: Vec<PolicyRule>,
}

impl PathPolicy {
    /// A policy with a single default rule covering the whole device.
    pub fn new(default_dir_perm: u16, default_file_perm: u16) -> Self {
        Self {
            rules: vec![PolicyRule::new(
                RemotePath::root(),
                default_dir_perm,
                default_file_perm,
            )],
        }
    }

    /// Everything read-only.
    pub fn read_only() -> Self {
        Self::new(READ_ONLY_DIR_PERM, READ_ONLY_FILE_PERM)
    }

    /// Adds a rule, replacing any rule with the same prefix.
    #[must_use]
    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.retain(|r| r.prefix != rule.prefix);
        self.rules.push(rule);
        self
    }

    /// Adds a read-write region.
    #[must_use]
    pub fn with_writable(self, prefix: RemotePath) -> Self {
        self.with_rule(PolicyRule::read_write(prefix))
    }

    /// The rule governing `path`: the one with the longest matching prefix.
    pub fn rule_for(&self, path: &RemotePath) -> &PolicyRule {
        self.rules
            .iter()
            .filter(|r| path.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.depth())
            .unwrap_or(&self.rules[0])
    }

    /// Permission bits for an entry of `kind` at `path`.
    pub fn perm_for(&self, path: &RemotePath, kind: EntryKind) -> u16 {
        self.rule_for(path).perm_for(kind)
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }
}

impl Default for PathPolicy {
    /// Read-only device with the PX4 SD card writable.
    fn default() -> Self {
        let policy = Self::read_only();
        match RemotePath::parse(PX4_SD_CARD) {
            Ok(sd) => policy.with_writable(sd),
            Err(_) => policy,
        }
    }
}
