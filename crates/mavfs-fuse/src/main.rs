//! mavmount - Mount flight controller storage as a FUSE filesystem.
//!
//! Usage: mavmount <MOUNTPOINT> [--device-root DIR]
//!
//! Without `--device-root` the mount serves an in-memory device with the
//! PX4 storage layout, which is handy for trying the filesystem without
//! hardware.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use mavfs_core::{LocalDirService, MemoryService, RemoteFileService, RemotePath};
use mavfs_fuse::{MavFs, MountConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mavmount")]
#[command(about = "Mount flight controller storage as a FUSE filesystem")]
#[command(version)]
struct Cli {
    /// Mountpoint for the filesystem
    mountpoint: PathBuf,

    /// Serve this host directory as the device storage root
    #[arg(long, value_name = "DIR")]
    device_root: Option<PathBuf>,

    /// Additional read-write region on the device (repeatable)
    #[arg(long = "rw-prefix", value_name = "PATH")]
    rw_prefixes: Vec<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Trace every FUSE request, including fuser's own logging
    #[arg(short, long)]
    debug: bool,

    /// Kernel attribute/entry cache TTL in milliseconds
    #[arg(long, value_name = "N", default_value_t = 1000)]
    attr_ttl_ms: u64,

    /// Filesystem name shown in the mount table
    #[arg(long, default_value = mavfs_fuse::config::DEFAULT_FS_NAME)]
    fs_name: String,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Do not let the kernel enforce the synthesized permissions
    #[arg(long)]
    no_default_permissions: bool,
}

impl Cli {
    fn log_filter(&self) -> String {
        let level = match (self.debug, self.verbose) {
            (true, _) | (_, 2..) => "trace",
            (false, 1) => "debug",
            (false, 0) => "info",
        };
        let fuser_level = if self.debug { "trace" } else { "warn" };
        format!("{level},fuser={fuser_level}")
    }

    fn mount_config(&self) -> Result<MountConfig> {
        let mut config = MountConfig::default()
            .ttl(Duration::from_millis(self.attr_ttl_ms))
            .fs_name(self.fs_name.clone())
            .read_only(self.read_only)
            .default_permissions(!self.no_default_permissions);
        for prefix in &self.rw_prefixes {
            let prefix = RemotePath::parse(prefix)
                .with_context(|| format!("Invalid --rw-prefix {prefix:?}"))?;
            config = config.writable(prefix);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .init();

    if !cli.mountpoint.is_dir() {
        anyhow::bail!("Mountpoint is not a directory: {}", cli.mountpoint.display());
    }
    let config = cli.mount_config()?;

    match &cli.device_root {
        Some(root) => {
            let service = LocalDirService::new(root)
                .with_context(|| format!("Cannot serve device root {}", root.display()))?;
            info!(device_root = %root.display(), "serving host directory as device storage");
            mount_and_wait(service, &cli.mountpoint, config)
        }
        None => {
            info!("serving in-memory PX4 device");
            mount_and_wait(MemoryService::with_px4_layout(), &cli.mountpoint, config)
        }
    }
}

/// Mounts in the foreground; Ctrl+C / SIGTERM unmount.
fn mount_and_wait<S>(service: S, mountpoint: &Path, config: MountConfig) -> Result<()>
where
    S: RemoteFileService + 'static,
{
    let signal_mountpoint = mountpoint.to_path_buf();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, unmounting...");
        if let Err(e) = mavfs_fuse::unmount(&signal_mountpoint) {
            error!(error = %e, "Unmount failed; unmount {} manually", signal_mountpoint.display());
        }
    })
    .context("Failed to set signal handler")?;

    info!("Mounting filesystem (press Ctrl+C to unmount)");
    let fs = MavFs::new(service, config);
    mavfs_fuse::mount(fs, mountpoint)
        .with_context(|| format!("Failed to mount filesystem at {}", mountpoint.display()))
}
