use super::Partition;
use crate::error::{PartitionErrorKind, PartitionResult};
use partkit_hal::procfs::mounts::parse_lsof_pids;
use partkit_hal::{CommandRunner, CommandSpec, HalError};
use std::path::Path;

impl<H: CommandRunner> Partition<H> {
    /// PIDs of processes with files open under `mountpoint`.
    fn pids_on_mountpoint(&self, mountpoint: &Path) -> PartitionResult<Vec<u32>> {
        let cmd = CommandSpec::new("lsof")
            .arg(mountpoint.to_string_lossy())
            .elevated()
            .timeout(self.settings.commands.timeout());
        let out = self.hal.run_unchecked(&cmd).map_err(|e| {
            log::error!("could not run lsof to identify processes using {}", mountpoint.display());
            self.error_with(PartitionErrorKind::ProcessEnumerationFailed, e)
        })?;

        if out.success() {
            return Ok(parse_lsof_pids(&out.stdout));
        }
        // lsof exits 1 without output when nothing has the path open.
        if out.exit_code == Some(1) && out.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        log::error!("failure executing {}", cmd);
        Err(self.error_with(
            PartitionErrorKind::ProcessEnumerationFailed,
            HalError::CommandFailed {
                program: cmd.render(),
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            },
        ))
    }

    /// Kill everything using `mountpoint`, then force and finally lazily unmount it.
    pub(super) fn force_unmount(&self, mountpoint: &Path) -> PartitionResult<()> {
        let pids = self.pids_on_mountpoint(mountpoint)?;
        for pid in &pids {
            let kill = CommandSpec::new("kill")
                .args(["-9".to_string(), pid.to_string()])
                .elevated()
                .timeout(self.settings.commands.timeout());
            // The process may already be gone.
            match self.hal.run_unchecked(&kill) {
                Ok(out) if out.success() => {}
                Ok(out) => log::warn!("kill -9 {} exited {:?}", pid, out.exit_code),
                Err(err) => log::warn!("kill -9 {} failed: {}", pid, err),
            }
        }
        if !pids.is_empty() {
            log::info!(
                "killed {} process(es) using {}",
                pids.len(),
                mountpoint.display()
            );
        }

        match self.hal.run(&self.umount_command(Some("-f"), mountpoint)) {
            Ok(_) => return Ok(()),
            Err(err) => log::debug!(
                "forced umount of {} failed ({}), detaching lazily",
                mountpoint.display(),
                err
            ),
        }
        self.hal
            .run(&self.umount_command(Some("-l"), mountpoint))
            .map_err(|e| self.error_with(PartitionErrorKind::ForceUnmountFailed, e))?;
        Ok(())
    }
}
