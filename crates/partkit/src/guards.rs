use partkit_hal::{CommandRunner, CommandSpec, HalError, HalResult};
use std::time::Duration;

/// Bind `backing_file` to the first free loop device, returning its path (e.g. `/dev/loop7`).
pub fn losetup_attach<H: CommandRunner + ?Sized>(
    hal: &H,
    backing_file: &str,
    timeout: Duration,
) -> HalResult<String> {
    let cmd = CommandSpec::new("losetup")
        .args(["--find", "--show", "-f", backing_file])
        .elevated()
        .timeout(timeout);
    let out = hal.run(&cmd)?;
    let device = out.stdout.trim();
    if device.is_empty() {
        return Err(HalError::Parse(format!(
            "`{}` did not report a loop device",
            cmd
        )));
    }
    Ok(device.to_string())
}

/// Detach a loop device.
pub fn losetup_detach<H: CommandRunner + ?Sized>(
    hal: &H,
    loop_device: &str,
    timeout: Duration,
) -> HalResult<()> {
    let cmd = CommandSpec::new("losetup")
        .args(["-d", loop_device])
        .elevated()
        .timeout(timeout);
    hal.run(&cmd)?;
    Ok(())
}

/// RAII guard that detaches a loop device when dropped.
#[derive(Debug)]
pub struct LoopGuard<'a, H: CommandRunner + ?Sized> {
    hal: &'a H,
    loop_device: String,
    timeout: Duration,
    active: bool,
}

impl<'a, H: CommandRunner + ?Sized> LoopGuard<'a, H> {
    /// Attach `backing_file` and guard the resulting loop device.
    pub fn attach(hal: &'a H, backing_file: &str, timeout: Duration) -> HalResult<Self> {
        let loop_device = losetup_attach(hal, backing_file, timeout)?;
        Ok(Self {
            hal,
            loop_device,
            timeout,
            active: true,
        })
    }

    /// Prevent automatic detach and return the loop device path.
    pub fn release(mut self) -> String {
        self.active = false;
        self.loop_device.clone()
    }

    pub fn device(&self) -> &str {
        &self.loop_device
    }
}

impl<'a, H: CommandRunner + ?Sized> Drop for LoopGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = losetup_detach(self.hal, &self.loop_device, self.timeout) {
            log::warn!("loop guard failed to detach {}: {}", self.loop_device, err);
        }
    }
}
