//! Test mount harness for FUSE integration tests.
//!
//! `TestMount` mounts an in-memory PX4 device in a temporary directory and
//! keeps a handle on the device so tests can check what actually reached
//! it.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use fuser::BackgroundSession;
use mavfs_core::{MemoryService, RemotePath};
use mavfs_fuse::{MavFs, MountConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long to wait for mount to become ready.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between mount readiness checks.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A mounted in-memory device.
pub struct TestMount {
    /// The FUSE session (unmounts on drop).
    _session: BackgroundSession,
    /// Path where the device is mounted.
    pub mount_path: PathBuf,
    /// Shares state with the mounted service.
    pub device: MemoryService,
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mounts a fresh PX4-layout device with the default configuration.
    pub fn px4() -> Result<Self, String> {
        Self::with_config(MountConfig::default().auto_unmount(true))
    }

    pub fn with_config(config: MountConfig) -> Result<Self, String> {
        let device = MemoryService::with_px4_layout();
        let boot_log = RemotePath::parse("/boot.log").map_err(|e| e.to_string())?;
        device.insert_file(&boot_log, vec![b'#'; 120]);

        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let options = config.mount_options();
        let fs = MavFs::new(device.clone(), config);
        let session = fuser::spawn_mount2(fs, &mount_path, &options)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;

        Ok(Self {
            _session: session,
            mount_path,
            device,
            _temp_mount: temp_mount,
        })
    }

    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(mut entries) = fs::read_dir(mount_path)
                && entries.next().is_some()
            {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("Mount did not become ready in time".to_string())
    }

    /// Build a full path from a device path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(path))
    }

    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        fs::write(self.path(path), content)
    }

    pub fn metadata(&self, path: &str) -> io::Result<fs::Metadata> {
        fs::metadata(self.path(path))
    }

    /// Sorted entry names of a directory.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(path))?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Contents as stored on the device.
    pub fn device_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.device.contents(&RemotePath::parse(path).ok()?)
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
