//! Foreground mounting.
//!
//! [`mount`] blocks for the lifetime of the mount and returns once the
//! filesystem is unmounted, whoever triggered it. [`unmount`] is what a
//! signal handler calls to end a running mount.

use crate::filesystem::MavFs;
use mavfs_core::RemoteFileService;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Mounts `fs` at `mountpoint` and serves requests on the calling thread
/// until it is unmounted.
pub fn mount<S>(fs: MavFs<S>, mountpoint: &Path) -> io::Result<()>
where
    S: RemoteFileService + 'static,
{
    let options = fs.config().mount_options();
    debug!(?options, "mount options");
    info!(mountpoint = %mountpoint.display(), "mounting filesystem");

    fuser::mount2(fs, mountpoint, &options)?;

    info!(mountpoint = %mountpoint.display(), "filesystem unmounted");
    Ok(())
}

/// Asks the host to unmount `mountpoint`, trying each platform tool in turn.
pub fn unmount(mountpoint: &Path) -> io::Result<()> {
    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no unmount tool available");

    for (program, args) in UNMOUNT_COMMANDS {
        match Command::new(program).args(*args).arg(mountpoint).output() {
            Ok(output) if output.status.success() => {
                debug!(program, "unmount succeeded");
                return Ok(());
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(program, status = %output.status, stderr = %stderr.trim(), "unmount failed");
                last_error = io::Error::other(format!("{program}: {}", stderr.trim()));
            }
            Err(e) => {
                debug!(program, error = %e, "unmount tool not runnable");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Unmount tools for this platform, preferred first.
#[cfg(target_os = "linux")]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[
    ("fusermount", &["-u"]),
    ("fusermount3", &["-u"]),
    ("umount", &[]),
];

#[cfg(not(target_os = "linux"))]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[("umount", &[]), ("diskutil", &["unmount"])];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmount_commands_prefer_platform_tool() {
        #[cfg(target_os = "linux")]
        assert_eq!(UNMOUNT_COMMANDS[0], ("fusermount", &["-u"][..]));
        #[cfg(not(target_os = "linux"))]
        assert_eq!(UNMOUNT_COMMANDS[0].0, "umount");
    }

    #[test]
    fn test_unmount_of_unmounted_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unmount(dir.path()).is_err());
    }
}
