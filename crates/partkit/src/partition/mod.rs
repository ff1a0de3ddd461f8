//! Partitions and filesystems: format, mount, unmount and mount-state queries.
//!
//! A [`Partition`] carries no persisted identity; whether it is mounted is always answered
//! by re-reading the mount table. Mount and unmount serialize on the host-wide [`MtabLock`]
//! (see [`crate::lock`]); mkfs does not take the lock.
//!
//! [`MtabLock`]: crate::lock::MtabLock

mod format;
mod mount;
mod recovery;
mod unmount;

pub use format::{MkfsPlan, DEFAULT_FSTYPE};
pub use mount::MountRequest;
pub use unmount::UnmountOutcome;

use crate::config::Settings;
use crate::error::{PartitionError, PartitionErrorKind, PartitionResult};
use crate::mount_table::MountTable;
use partkit_hal::{CommandRunner, CommandSpec};
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Device identity of a partition.
///
/// `requested` is what the caller asked for: a block device, or the backing file of a
/// loop-backed partition. `active` is the loop device bound to that file while the partition
/// is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    requested: String,
    active: Option<String>,
}

impl DeviceRef {
    pub fn new(requested: impl Into<String>) -> Self {
        Self {
            requested: requested.into(),
            active: None,
        }
    }

    pub fn requested(&self) -> &str {
        &self.requested
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The path external commands operate on.
    pub fn current(&self) -> &str {
        self.active.as_deref().unwrap_or(&self.requested)
    }
}

/// Construction options for a [`Partition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionOptions {
    /// Size of the loop backing file in MiB; 0 means the device is used directly.
    pub loop_size_mib: u64,
    pub mountpoint: Option<PathBuf>,
    /// Extra flags appended to every mkfs invocation.
    pub mkfs_flags: Option<String>,
    /// Passed to mount as `-o <mount_options>`.
    pub mount_options: Option<String>,
}

impl PartitionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loop_size_mib(mut self, size: u64) -> Self {
        self.loop_size_mib = size;
        self
    }

    pub fn mountpoint(mut self, mountpoint: impl Into<PathBuf>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn mkfs_flags(mut self, flags: impl Into<String>) -> Self {
        self.mkfs_flags = Some(flags.into());
        self
    }

    pub fn mount_options(mut self, options: impl Into<String>) -> Self {
        self.mount_options = Some(options.into());
        self
    }
}

/// A block device or loop-backed file that can be formatted, mounted and unmounted.
#[derive(Debug)]
pub struct Partition<H: CommandRunner> {
    hal: H,
    settings: Settings,
    device: DeviceRef,
    loop_size_mib: u64,
    fstype: Option<String>,
    mountpoint: Option<PathBuf>,
    mkfs_flags: Option<String>,
    mount_options: Option<String>,
}

impl<H: CommandRunner> Partition<H> {
    /// Create a partition with default settings.
    ///
    /// When `options.loop_size_mib` is positive, `device` names a backing file which is
    /// zero-filled to that size right away.
    pub fn new(
        hal: H,
        device: impl Into<String>,
        options: PartitionOptions,
    ) -> PartitionResult<Self> {
        Self::with_settings(hal, device, options, Settings::default())
    }

    pub fn with_settings(
        hal: H,
        device: impl Into<String>,
        options: PartitionOptions,
        settings: Settings,
    ) -> PartitionResult<Self> {
        let partition = Self {
            hal,
            settings,
            device: DeviceRef::new(device),
            loop_size_mib: options.loop_size_mib,
            fstype: None,
            mountpoint: options.mountpoint,
            mkfs_flags: options.mkfs_flags,
            mount_options: options.mount_options,
        };
        if partition.is_loop_backed() {
            partition.create_backing_file()?;
        }
        Ok(partition)
    }

    fn create_backing_file(&self) -> PartitionResult<()> {
        let file = self.device.requested();
        log::info!(
            "creating {} MiB loop backing file {}",
            self.loop_size_mib,
            file
        );
        let cmd = CommandSpec::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", file))
            .arg("bs=1M")
            .arg(format!("count={}", self.loop_size_mib))
            .timeout(self.settings.commands.format_timeout());
        self.hal
            .run(&cmd)
            .map_err(|e| self.error_with(PartitionErrorKind::BackingFileFailed, e))?;
        Ok(())
    }

    /// Device external commands currently operate on (the loop device once one is bound).
    pub fn device(&self) -> &str {
        self.device.current()
    }

    pub fn device_ref(&self) -> &DeviceRef {
        &self.device
    }

    pub fn is_loop_backed(&self) -> bool {
        self.loop_size_mib > 0
    }

    pub fn loop_size_mib(&self) -> u64 {
        self.loop_size_mib
    }

    /// Filesystem type recorded by the last mkfs or mount.
    pub fn fstype(&self) -> Option<&str> {
        self.fstype.as_deref()
    }

    pub fn mountpoint(&self) -> Option<&Path> {
        self.mountpoint.as_deref()
    }

    pub fn mkfs_flags(&self) -> Option<&str> {
        self.mkfs_flags.as_deref()
    }

    pub fn mount_options(&self) -> Option<&str> {
        self.mount_options.as_deref()
    }

    /// Where this partition is mounted, re-read from the mount table.
    ///
    /// Only a mount at the configured mountpoint counts.
    pub fn mounted_at(&self) -> PartitionResult<Option<PathBuf>> {
        self.mount_table()
            .resolve_mount_point(self.device(), self.mountpoint.as_deref(), None)
            .map_err(|e| self.error_with(PartitionErrorKind::MountTableRead, e))
    }

    pub fn is_mounted(&self) -> PartitionResult<bool> {
        Ok(self.mounted_at()?.is_some())
    }

    fn mount_table(&self) -> MountTable<'_, H> {
        MountTable::new(&self.hal, &self.settings.mount_table)
    }

    fn ensure_device_unmounted(&self) -> PartitionResult<()> {
        let mounted = self
            .mount_table()
            .is_device_mounted(self.device())
            .map_err(|e| self.error_with(PartitionErrorKind::MountTableRead, e))?;
        if mounted {
            return Err(self.error(PartitionErrorKind::AlreadyMounted));
        }
        Ok(())
    }

    fn error(&self, kind: PartitionErrorKind) -> PartitionError {
        PartitionError::new(self.device(), kind)
    }

    fn error_with<E>(&self, kind: PartitionErrorKind, cause: E) -> PartitionError
    where
        E: StdError + Send + Sync + 'static,
    {
        PartitionError::with_cause(self.device(), kind, cause)
    }
}

impl<H: CommandRunner> fmt::Display for Partition<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition({})", self.device())
    }
}
