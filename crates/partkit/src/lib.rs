//! Partition lifecycle management.
//!
//! [`Partition`] formats, mounts and unmounts block devices and loop-backed files through
//! external commands, serializing mount table changes across processes with a file lock and
//! recovering busy mounts by escalating from a graceful to a forced to a lazy unmount.
//!
//! ```no_run
//! use partkit::{MountRequest, Partition, PartitionOptions};
//! use partkit_hal::LinuxHal;
//!
//! # fn main() -> Result<(), partkit::PartitionError> {
//! let mut part = Partition::new(
//!     LinuxHal::new(),
//!     "/var/tmp/scratch.img",
//!     PartitionOptions::new().loop_size_mib(64).mountpoint("/mnt/scratch"),
//! )?;
//! part.mkfs(Some("ext4"), "")?;
//! part.mount(MountRequest::new())?;
//! let outcome = part.unmount(true)?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod guards;
pub mod lock;
pub mod mount_table;
pub mod partition;

pub use config::Settings;
pub use error::{PartitionError, PartitionErrorKind, PartitionResult};
pub use lock::{LockError, MtabLock, NamedLock, NamedLockGuard};
pub use mount_table::MountTable;
pub use partition::{
    DeviceRef, MkfsPlan, MountRequest, Partition, PartitionOptions, UnmountOutcome,
    DEFAULT_FSTYPE,
};
