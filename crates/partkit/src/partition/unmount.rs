use super::Partition;
use crate::error::{PartitionError, PartitionErrorKind, PartitionResult};
use crate::guards::losetup_detach;
use crate::lock::MtabLock;
use partkit_hal::{CommandRunner, CommandSpec};
use std::path::Path;

/// How [`Partition::unmount`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnmountOutcome {
    /// A plain `umount` succeeded.
    Unmounted,
    /// The plain `umount` failed and forced recovery detached the filesystem.
    ForceUnmounted,
    /// Nothing was mounted; no command was issued.
    NotMounted,
}

impl UnmountOutcome {
    pub fn was_forced(self) -> bool {
        self == UnmountOutcome::ForceUnmounted
    }
}

impl<H: CommandRunner> Partition<H> {
    pub(super) fn umount_command(&self, flag: Option<&str>, mountpoint: &Path) -> CommandSpec {
        CommandSpec::new("umount")
            .args(flag)
            .arg(mountpoint.to_string_lossy())
            .elevated()
            .timeout(self.settings.commands.timeout())
    }

    /// Unmount the partition.
    ///
    /// With `force`, a failed unmount escalates to killing the processes holding the mount
    /// point followed by a forced, then a lazy unmount. A loop-backed partition has its loop
    /// device detached afterwards, outside the lock; if that fails the error kind is
    /// [`PartitionErrorKind::LoopCleanupFailed`] and the filesystem is already unmounted.
    pub fn unmount(&mut self, force: bool) -> PartitionResult<UnmountOutcome> {
        let outcome = {
            let _lock = MtabLock::acquire(&self.settings)
                .map_err(|e| PartitionError::lock(self.device(), e))?;

            let Some(mountpoint) = self.mounted_at()? else {
                log::debug!("{} not mounted", self.device());
                return Ok(UnmountOutcome::NotMounted);
            };

            log::info!("unmounting {} from {}", self.device(), mountpoint.display());
            match self.hal.run(&self.umount_command(None, &mountpoint)) {
                Ok(_) => UnmountOutcome::Unmounted,
                Err(err) if force => {
                    log::debug!(
                        "standard umount failed on {} ({}), forcing",
                        mountpoint.display(),
                        err
                    );
                    self.force_unmount(&mountpoint)?;
                    UnmountOutcome::ForceUnmounted
                }
                Err(err) => {
                    return Err(self.error_with(PartitionErrorKind::UnmountFailed, err));
                }
            }
        };

        if self.is_loop_backed() {
            match self.device.active.clone() {
                Some(loop_device) => {
                    losetup_detach(&self.hal, &loop_device, self.settings.commands.timeout())
                        .map_err(|e| self.error_with(PartitionErrorKind::LoopCleanupFailed, e))?;
                    log::info!("detached loop device {}", loop_device);
                    self.device.active = None;
                }
                None => log::debug!(
                    "{} has no loop device bound by this partition, nothing to detach",
                    self.device.requested()
                ),
            }
        }

        Ok(outcome)
    }
}
