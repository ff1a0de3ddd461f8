//! partkit Hardware Abstraction Layer (HAL).
//!
//! Every external command partkit issues (`mount`, `losetup`, `mkfs`, ...) goes through
//! [`CommandRunner`] so the partition workflows can be exercised against [`FakeHal`].

mod error;
pub mod hal;

pub mod procfs {
    pub mod mounts;
}

pub use error::{HalError, HalResult};
pub use hal::{CommandOutput, CommandRunner, CommandSpec, FakeHal, LinuxHal, Operation};
