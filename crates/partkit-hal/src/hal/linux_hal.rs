//! Linux HAL implementation spawning real processes.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::{HalError, HalResult};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone)]
pub struct LinuxHal {
    default_timeout: Duration,
    use_sudo: bool,
}

impl Default for LinuxHal {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxHal {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            use_sudo: true,
        }
    }

    /// Timeout applied to commands that do not carry their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Whether elevated commands are prefixed with `sudo -n` when not running as root.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    fn build_command(&self, spec: &CommandSpec) -> Command {
        if spec.elevate && self.use_sudo && !nix::unistd::geteuid().is_root() {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&spec.program).args(&spec.args);
            cmd
        } else {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args);
            cmd
        }
    }
}

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_with_timeout(
    spec: &CommandSpec,
    cmd: &mut Command,
    timeout: Duration,
) -> HalResult<CommandOutput> {
    let stdin = if spec.auto_confirm {
        Stdio::piped()
    } else {
        // Avoid commands hanging waiting for input.
        Stdio::null()
    };
    // Own process group, so a timeout also reaches anything the command forked.
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    let mut child = cmd
        .spawn()
        .map_err(|e| map_command_err(&spec.program, e))?;

    // Equivalent of `yes | <cmd>`: keep answering until the child closes its stdin.
    let confirm_handle = child.stdin.take().map(|mut input| {
        std::thread::spawn(move || while input.write_all(b"y\n").is_ok() {})
    });

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            if let Err(err) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
                log::debug!("killpg for {} failed: {}", spec.program, err);
            }
            let _ = child.kill();
            let _ = child.wait();
            // Descendants we could not signal may still hold the pipes; leave the reader
            // threads detached instead of joining them.
            drop((stdout_handle, stderr_handle, confirm_handle));
            return Err(HalError::CommandTimeout {
                program: spec.render(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    if let Some(h) = confirm_handle {
        let _ = h.join();
    }
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

impl CommandRunner for LinuxHal {
    fn run_unchecked(&self, spec: &CommandSpec) -> HalResult<CommandOutput> {
        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        log::debug!("exec: {} (timeout {}s)", spec, timeout.as_secs());
        let mut cmd = self.build_command(spec);
        output_with_timeout(spec, &mut cmd, timeout)
    }
}
