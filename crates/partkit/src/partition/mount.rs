use super::Partition;
use crate::error::{PartitionError, PartitionErrorKind, PartitionResult};
use crate::guards::LoopGuard;
use crate::lock::MtabLock;
use partkit_hal::{CommandRunner, CommandSpec};
use std::path::{Path, PathBuf};

/// Arguments for [`Partition::mount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Overrides the partition's default mountpoint.
    pub mountpoint: Option<PathBuf>,
    /// Overrides the recorded filesystem type.
    pub fstype: Option<String>,
    /// Extra arguments for mount, placed before the generated options.
    pub args: String,
    /// Refuse to mount when the device is mounted or the target is already a mount point.
    pub check: bool,
}

impl Default for MountRequest {
    fn default() -> Self {
        Self {
            mountpoint: None,
            fstype: None,
            args: String::new(),
            check: true,
        }
    }
}

impl MountRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, mountpoint: impl Into<PathBuf>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = Some(fstype.into());
        self
    }

    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }
}

fn mount_command(
    args: &str,
    mount_options: Option<&str>,
    fstype: Option<&str>,
    device: &str,
    mountpoint: &Path,
) -> CommandSpec {
    let mut cmd = CommandSpec::new("mount").raw_args(args);
    if let Some(options) = mount_options.filter(|o| !o.is_empty()) {
        cmd = cmd.args(["-o", options]);
    }
    if let Some(fstype) = fstype {
        cmd = cmd.args(["-t", fstype]);
    }
    cmd.arg(device)
        .arg(mountpoint.to_string_lossy())
        .elevated()
}

impl<H: CommandRunner> Partition<H> {
    /// Mount the partition.
    ///
    /// Runs under the mtab lock. A loop-backed partition is bound to a free loop device
    /// first; if the mount itself then fails the loop device is detached again.
    pub fn mount(&mut self, request: MountRequest) -> PartitionResult<()> {
        let mountpoint = request
            .mountpoint
            .or_else(|| self.mountpoint.clone())
            .ok_or_else(|| self.error(PartitionErrorKind::NoMountpoint))?;

        let fstype = request
            .fstype
            .filter(|t| !t.is_empty())
            .or_else(|| self.fstype.clone());
        self.fstype = fstype.clone();

        let _lock = MtabLock::acquire(&self.settings)
            .map_err(|e| PartitionError::lock(self.device(), e))?;

        if request.check {
            self.ensure_device_unmounted()?;
            let busy = self
                .mount_table()
                .is_mount_point(&mountpoint)
                .map_err(|e| self.error_with(PartitionErrorKind::MountTableRead, e))?;
            if busy {
                return Err(self.error(PartitionErrorKind::MountPointBusy));
            }
        }

        if !mountpoint.is_dir() {
            std::fs::create_dir_all(&mountpoint)
                .map_err(|e| self.error_with(PartitionErrorKind::MountPointCreate, e))?;
        }

        let timeout = self.settings.commands.timeout();
        // Finding a free loop device races with other callers, so it happens under the lock.
        let loop_guard = if self.is_loop_backed() && self.device.active.is_none() {
            let guard = LoopGuard::attach(&self.hal, self.device.requested(), timeout)
                .map_err(|e| self.error_with(PartitionErrorKind::LoopSetupFailed, e))?;
            log::info!(
                "bound {} to loop device {}",
                self.device.requested(),
                guard.device()
            );
            Some(guard)
        } else {
            None
        };
        let device = loop_guard
            .as_ref()
            .map_or_else(|| self.device().to_string(), |g| g.device().to_string());

        let cmd = mount_command(
            &request.args,
            self.mount_options.as_deref(),
            fstype.as_deref(),
            &device,
            &mountpoint,
        )
        .timeout(timeout);
        log::info!("mounting {} at {}", device, mountpoint.display());
        self.hal.run(&cmd).map_err(|e| {
            PartitionError::with_cause(device.as_str(), PartitionErrorKind::MountFailed, e)
        })?;

        if let Some(guard) = loop_guard {
            self.device.active = Some(guard.release());
        }
        self.fstype = fstype;
        Ok(())
    }
}
