//! Parsing helpers for mount listings: `/proc/mounts` (and `/etc/mtab`), the output of `mount`
//! and `swapon -s`, and `lsof` process listings.

use std::path::PathBuf;

/// One line of a `/proc/mounts`-format file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: Option<String>,
}

/// Parse one `/proc/mounts` / `/etc/mtab` line:
///   <device> <mount point> <fstype> <options> <dump> <pass>
pub fn parse_mounts_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let device = fields.next()?;
    let mount_point = fields.next()?;
    Some(MountEntry {
        device: unescape_mount_path(device),
        mount_point: PathBuf::from(unescape_mount_path(mount_point)),
        fstype: fields.next().map(str::to_string),
    })
}

/// A line of `mount` output: `<device> on <mount point> type <fstype> (<options>)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountListing {
    pub device: String,
    pub mount_point: String,
}

pub fn parse_mount_listing(output: &str) -> Vec<MountListing> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            Some(MountListing {
                device: fields[0].to_string(),
                mount_point: fields[2].to_string(),
            })
        })
        .collect()
}

/// Swap devices from `swapon -s` output; the header and non-path entries are skipped.
pub fn parse_swap_summary(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with('/'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// PIDs from `lsof <path>` output (second column, header skipped, deduplicated).
pub fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|pid| pid.parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
