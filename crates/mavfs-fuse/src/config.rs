//! Mount configuration for the FUSE filesystem.

use crate::policy::PathPolicy;
use fuser::MountOption;
use mavfs_core::RemotePath;
use std::time::Duration;

/// Default kernel TTL for attributes and directory entries.
///
/// Kept short: the kernel cannot see our invalidations, so anything it holds
/// longer than this may be stale after a mutation from another mount.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default filesystem name shown in the mount table.
pub const DEFAULT_FS_NAME: &str = "mavftp";

/// Configuration options for a mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// How long the kernel may cache attributes and lookups.
    ///
    /// Default: 1 second.
    pub ttl: Duration,

    /// Permission synthesis rules.
    pub policy: PathPolicy,

    /// Name shown as the mount source (`fsname=`).
    pub fs_name: String,

    /// Mount read-only regardless of policy.
    pub read_only: bool,

    /// Let the kernel enforce the synthesized permission bits.
    ///
    /// Default: on. Without it, writes outside writable regions reach the
    /// device and fail there (or succeed).
    pub default_permissions: bool,

    /// Ask fusermount to unmount when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            policy: PathPolicy::default(),
            fs_name: DEFAULT_FS_NAME.to_string(),
            read_only: false,
            default_permissions: true,
            auto_unmount: false,
        }
    }
}

impl MountConfig {
    /// Sets the kernel TTL for attributes and entries.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the permission policy.
    #[must_use]
    pub fn policy(mut self, policy: PathPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Marks another region read-write.
    #[must_use]
    pub fn writable(mut self, prefix: RemotePath) -> Self {
        self.policy = self.policy.with_writable(prefix);
        self
    }

    /// Sets the filesystem name.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    /// Sets the read-only flag.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets whether the kernel checks permissions.
    #[must_use]
    pub fn default_permissions(mut self, enabled: bool) -> Self {
        self.default_permissions = enabled;
        self
    }

    /// Sets the auto-unmount flag.
    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }

    /// The fuser mount options for this configuration.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype("mavfs".to_string()),
            MountOption::NoDev,
            MountOption::NoSuid,
            MountOption::NoAtime,
        ];
        options.push(if self.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        if self.default_permissions {
            options.push(MountOption::DefaultPermissions);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}
