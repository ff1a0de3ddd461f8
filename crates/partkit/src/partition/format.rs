use super::Partition;
use crate::error::{PartitionErrorKind, PartitionResult};
use partkit_hal::{CommandRunner, CommandSpec};

/// Filesystem used when neither the caller nor an earlier mkfs/mount chose one.
pub const DEFAULT_FSTYPE: &str = "ext2";

/// How a single mkfs invocation is assembled.
///
/// Kept separate from execution so the flag combination rules can be checked on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsPlan<'a> {
    pub fstype: &'a str,
    /// Caller-supplied arguments, kept verbatim and in order.
    pub args: &'a str,
    pub mkfs_flags: Option<&'a str>,
    pub loop_backed: bool,
}

impl<'a> MkfsPlan<'a> {
    /// Flag that makes mkfs overwrite an existing filesystem, if this target needs one.
    ///
    /// xfs and btrfs refuse to overwrite without it; loop devices often carry stale
    /// superblocks that make ext* and reiserfs prompt or abort.
    pub fn force_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if matches!(self.fstype, "xfs" | "btrfs") {
            flags.push("-f");
        }
        if self.loop_backed {
            if self.fstype.starts_with("ext") {
                flags.push("-F");
            } else if self.fstype == "reiserfs" {
                flags.push("-f");
            }
        }
        flags
    }

    /// Whether the caller's arguments (or the partition's mkfs flags) already pick a type.
    pub fn has_type_flag(&self) -> bool {
        self.args
            .split_whitespace()
            .chain(self.mkfs_flags.unwrap_or_default().split_whitespace())
            .any(|arg| arg == "-t" || arg == "--type" || arg.starts_with("--type="))
    }

    pub fn command(&self, device: &str) -> CommandSpec {
        let mut cmd = CommandSpec::new("mkfs");
        if !self.has_type_flag() {
            cmd = cmd.args(["-t", self.fstype]);
        }
        cmd = cmd.raw_args(self.args);
        if let Some(flags) = self.mkfs_flags {
            cmd = cmd.raw_args(flags);
        }
        cmd.args(self.force_flags()).arg(device).auto_confirm()
    }
}

impl<H: CommandRunner> Partition<H> {
    /// Format the partition.
    ///
    /// `fstype` falls back to the recorded type, then to [`DEFAULT_FSTYPE`]. `args` are
    /// passed to mkfs verbatim; a `-t` is only injected when they do not name a type.
    pub fn mkfs(&mut self, fstype: Option<&str>, args: &str) -> PartitionResult<()> {
        self.ensure_device_unmounted()?;

        let fstype = fstype
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.fstype.clone())
            .unwrap_or_else(|| DEFAULT_FSTYPE.to_string());

        let plan = MkfsPlan {
            fstype: &fstype,
            args,
            mkfs_flags: self.mkfs_flags.as_deref(),
            loop_backed: self.is_loop_backed(),
        };
        let cmd = plan
            .command(self.device())
            .timeout(self.settings.commands.format_timeout());

        log::info!("formatting {} as {}: {}", self.device(), fstype, cmd);
        self.hal
            .run(&cmd)
            .map_err(|e| self.error_with(PartitionErrorKind::FormatFailed, e))?;

        self.fstype = Some(fstype);
        Ok(())
    }
}
