use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "partctl", author, version)]
#[command(about = "Format, mount and unmount partitions safely")]
pub struct Cli {
    /// TOML settings file (mount table paths, lock and command timeouts)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a filesystem on an unmounted device
    Mkfs {
        #[arg(long)]
        device: String,
        /// Filesystem type (default: ext2)
        #[arg(long)]
        fstype: Option<String>,
        /// Arguments passed to mkfs verbatim
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
        /// Extra flags appended after the arguments
        #[arg(long, allow_hyphen_values = true)]
        mkfs_flags: Option<String>,
    },

    /// Mount a device
    Mount {
        #[arg(long)]
        device: String,
        #[arg(long)]
        mountpoint: PathBuf,
        #[arg(long)]
        fstype: Option<String>,
        /// Arguments passed to mount verbatim
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
        /// Mount options (passed as -o)
        #[arg(long)]
        options: Option<String>,
        /// Skip the already-mounted and busy mount point checks
        #[arg(long)]
        no_check: bool,
    },

    /// Unmount a device, killing processes that keep it busy unless --no-force
    Unmount {
        #[arg(long)]
        device: String,
        #[arg(long)]
        mountpoint: PathBuf,
        #[arg(long)]
        no_force: bool,
    },

    /// Report whether a device is mounted
    Status {
        #[arg(long)]
        device: String,
        #[arg(long)]
        mountpoint: Option<PathBuf>,
    },
}
