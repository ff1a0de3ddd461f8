//! Process execution helpers.
//!
//! External commands are considered "world-touching" and must go through the HAL so we can
//! test partition workflows without spawning real processes.

use crate::{HalError, HalResult};
use std::fmt;
use std::time::Duration;

/// A single external command, assembled as an ordered list of arguments.
///
/// Flags are collected structurally and only rendered to a command line at the boundary
/// (logging, test assertions, error messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run with elevated privileges.
    pub elevate: bool,
    /// Answer "y" to every interactive prompt on stdin.
    pub auto_confirm: bool,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            elevate: false,
            auto_confirm: false,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a free-form option string, split on whitespace.
    pub fn raw_args(self, raw: &str) -> Self {
        self.args(raw.split_whitespace())
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn auto_confirm(mut self) -> Self {
        self.auto_confirm = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render as a single shell-like command line.
    pub fn render(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Exit status plus captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Process execution trait (external command runner).
pub trait CommandRunner: Send + Sync {
    /// Run a command and return its status and output whatever the exit code.
    ///
    /// Errors only when the command cannot be started or exceeds its timeout.
    fn run_unchecked(&self, cmd: &CommandSpec) -> HalResult<CommandOutput>;

    /// Run a command, failing with [`HalError::CommandFailed`] on a non-zero exit.
    fn run(&self, cmd: &CommandSpec) -> HalResult<CommandOutput> {
        let output = self.run_unchecked(cmd)?;
        if !output.success() {
            return Err(HalError::CommandFailed {
                program: cmd.render(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run_unchecked(&self, cmd: &CommandSpec) -> HalResult<CommandOutput> {
        (**self).run_unchecked(cmd)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run_unchecked(&self, cmd: &CommandSpec) -> HalResult<CommandOutput> {
        (**self).run_unchecked(cmd)
    }
}
