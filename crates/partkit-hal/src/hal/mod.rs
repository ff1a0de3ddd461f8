//! HAL trait definitions and implementations.
//!
//! This module defines the command runner trait used for every external command and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod fake_hal;
pub mod linux_hal;
pub mod process_ops;

pub use fake_hal::{FakeHal, Operation};
pub use linux_hal::LinuxHal;
pub use process_ops::{CommandOutput, CommandRunner, CommandSpec};
