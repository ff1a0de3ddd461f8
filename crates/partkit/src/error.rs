use crate::lock::LockError;
use partkit_hal::HalError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type PartitionResult<T> = std::result::Result<T, PartitionError>;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// The step of a partition operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionErrorKind {
    LockTimeout,
    LockFailed,
    AlreadyMounted,
    MountPointBusy,
    NoMountpoint,
    MountPointCreate,
    MountTableRead,
    MountFailed,
    UnmountFailed,
    ForceUnmountFailed,
    LoopSetupFailed,
    LoopCleanupFailed,
    FormatFailed,
    ProcessEnumerationFailed,
    BackingFileFailed,
}

impl fmt::Display for PartitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::LockTimeout => "timed out waiting for the mtab lock",
            Self::LockFailed => "unable to take the mtab lock",
            Self::AlreadyMounted => "device is already mounted",
            Self::MountPointBusy => "mount point is busy",
            Self::NoMountpoint => {
                "no mountpoint specified and no default provided to this partition"
            }
            Self::MountPointCreate => "unable to create mount point",
            Self::MountTableRead => "unable to read the mount table",
            Self::MountFailed => "mount failed",
            Self::UnmountFailed => "unable to unmount gracefully",
            Self::ForceUnmountFailed => "force unmount failed",
            Self::LoopSetupFailed => "unable to set up loop device",
            Self::LoopCleanupFailed => "unable to clean up loop device",
            Self::FormatFailed => "mkfs failed",
            Self::ProcessEnumerationFailed => "unable to list processes using the mount point",
            Self::BackingFileFailed => "unable to create loop backing file",
        };
        f.write_str(reason)
    }
}

/// Failure of a partition operation, naming the device and the step that failed.
#[derive(Error, Debug)]
#[error("Partition({device}): {kind}{}", cause_suffix(.source))]
pub struct PartitionError {
    device: String,
    kind: PartitionErrorKind,
    #[source]
    source: Option<Cause>,
}

fn cause_suffix(source: &Option<Cause>) -> String {
    match source {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

impl PartitionError {
    pub fn new(device: impl Into<String>, kind: PartitionErrorKind) -> Self {
        Self {
            device: device.into(),
            kind,
            source: None,
        }
    }

    pub fn with_cause(
        device: impl Into<String>,
        kind: PartitionErrorKind,
        cause: impl Into<Cause>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            source: Some(cause.into()),
        }
    }

    /// Wrap a lock failure, keeping timeouts distinguishable from I/O trouble.
    pub fn lock(device: impl Into<String>, err: LockError) -> Self {
        let kind = match err {
            LockError::Timeout { .. } => PartitionErrorKind::LockTimeout,
            LockError::Io { .. } => PartitionErrorKind::LockFailed,
        };
        Self::with_cause(device, kind, err)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn kind(&self) -> PartitionErrorKind {
        self.kind
    }

    /// The command failure behind this error, if any.
    pub fn hal_error(&self) -> Option<&HalError> {
        self.source.as_ref()?.downcast_ref::<HalError>()
    }
}
