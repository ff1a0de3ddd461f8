//! Fake HAL implementation for testing.
//!
//! This implementation records all commands without executing them, allowing for CI-safe
//! testing without root privileges or real block devices. Responses can be scripted per
//! command line; anything unscripted succeeds with empty output.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::{HalError, HalResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Rendered command line.
    pub command: String,
    pub elevate: bool,
    pub auto_confirm: bool,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    NotFound,
}

#[derive(Debug, Clone)]
struct Script {
    pattern: String,
    replies: VecDeque<Reply>,
    /// The last reply repeats once the queue drains.
    last: Reply,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All commands that were recorded
    operations: Vec<Operation>,
    scripts: Vec<Script>,
}

/// Fake HAL implementation that records commands without executing them.
///
/// Clones share state, so a test can hand one clone to the code under test and inspect the
/// recording through another.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        // A poisoned lock only means another test thread panicked mid-record.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reply with `output` to every command whose rendered line starts with `pattern`.
    ///
    /// The longest matching pattern wins; scripting the same pattern twice replaces it.
    pub fn on(&self, pattern: impl Into<String>, output: CommandOutput) -> &Self {
        self.script(pattern.into(), vec![Reply::Output(output)]);
        self
    }

    /// Reply with each output in turn; the last one keeps repeating.
    pub fn on_sequence(&self, pattern: impl Into<String>, outputs: Vec<CommandOutput>) -> &Self {
        self.script(pattern.into(), outputs.into_iter().map(Reply::Output).collect());
        self
    }

    /// Make commands matching `pattern` fail to spawn.
    pub fn on_missing(&self, pattern: impl Into<String>) -> &Self {
        self.script(pattern.into(), vec![Reply::NotFound]);
        self
    }

    fn script(&self, pattern: String, replies: Vec<Reply>) {
        let mut replies: VecDeque<Reply> = replies.into();
        let last = replies
            .back()
            .cloned()
            .unwrap_or(Reply::Output(CommandOutput::ok("")));
        if replies.len() == 1 {
            replies.clear();
        }
        let mut state = self.state();
        state.scripts.retain(|s| s.pattern != pattern);
        state.scripts.push(Script {
            pattern,
            replies,
            last,
        });
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Rendered command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .operations
            .iter()
            .map(|op| op.command.clone())
            .collect()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Number of recorded commands starting with `prefix`.
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|op| op.command.starts_with(prefix))
            .count()
    }

    /// Clear recorded operations, keeping scripted replies.
    pub fn clear(&self) {
        self.state().operations.clear();
    }

    fn reply_for(&self, rendered: &str) -> Reply {
        let mut state = self.state();
        let script = state
            .scripts
            .iter_mut()
            .filter(|s| rendered.starts_with(&s.pattern))
            .max_by_key(|s| s.pattern.len());
        match script {
            Some(script) => script
                .replies
                .pop_front()
                .unwrap_or_else(|| script.last.clone()),
            None => Reply::Output(CommandOutput::ok("")),
        }
    }
}

impl CommandRunner for FakeHal {
    fn run_unchecked(&self, cmd: &CommandSpec) -> HalResult<CommandOutput> {
        let rendered = cmd.render();
        log::info!("FAKE HAL: {}", rendered);
        self.state().operations.push(Operation {
            command: rendered.clone(),
            elevate: cmd.elevate,
            auto_confirm: cmd.auto_confirm,
        });
        match self.reply_for(&rendered) {
            Reply::Output(output) => Ok(output),
            Reply::NotFound => Err(HalError::CommandNotFound(cmd.program.clone())),
        }
    }
}
