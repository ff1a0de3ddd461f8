//! Read-only queries over the live mount table and swap list.
//!
//! Nothing is cached: every query re-reads system state, since other processes mutate the
//! mount table behind our back.

use crate::config::MountTablePaths;
use partkit_hal::procfs::mounts::{parse_mount_listing, parse_mounts_line, parse_swap_summary};
use partkit_hal::{CommandRunner, CommandSpec, HalError, HalResult};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub struct MountTable<'a, H: CommandRunner + ?Sized> {
    hal: &'a H,
    paths: &'a MountTablePaths,
}

impl<'a, H: CommandRunner + ?Sized> MountTable<'a, H> {
    pub fn new(hal: &'a H, paths: &'a MountTablePaths) -> Self {
        Self { hal, paths }
    }

    /// Devices backing active mounts plus active swap devices.
    pub fn mounted_devices(&self) -> HalResult<Vec<String>> {
        let mut devices: Vec<String> = self
            .mount_listing()?
            .into_iter()
            .map(|entry| entry.device)
            .collect();
        devices.extend(self.swap_devices()?);
        Ok(devices)
    }

    /// Targets of active mounts.
    pub fn mount_points(&self) -> HalResult<Vec<String>> {
        Ok(self
            .mount_listing()?
            .into_iter()
            .map(|entry| entry.mount_point)
            .collect())
    }

    pub fn is_device_mounted(&self, device: &str) -> HalResult<bool> {
        Ok(self.mounted_devices()?.iter().any(|d| d == device))
    }

    pub fn is_mount_point(&self, path: &Path) -> HalResult<bool> {
        let path = path.to_string_lossy();
        Ok(self.mount_points()?.iter().any(|mp| *mp == path))
    }

    /// Active swap devices. A missing or failing `swapon` means no swap, not an error.
    fn swap_devices(&self) -> HalResult<Vec<String>> {
        match self.hal.run_unchecked(&CommandSpec::new("swapon").arg("-s")) {
            Ok(out) => {
                if !out.success() {
                    log::debug!("swapon -s exited {:?}: {}", out.exit_code, out.stderr.trim());
                }
                Ok(parse_swap_summary(&out.stdout))
            }
            Err(HalError::CommandNotFound(_)) => {
                log::debug!("swapon not available, assuming no swap devices");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn mount_listing(&self) -> HalResult<Vec<partkit_hal::procfs::mounts::MountListing>> {
        let out = self.hal.run(&CommandSpec::new("mount"))?;
        Ok(parse_mount_listing(&out.stdout))
    }

    /// Where `device` is mounted, provided that is `mountpoint`.
    ///
    /// With `source_file` only that file is scanned. Without it the primary list is scanned
    /// first; if it has no match the legacy list is consulted, and its answer is only trusted
    /// when it is `/` (the root device is sometimes reported as an alias such as `/dev/root`
    /// in `/proc/mounts`).
    pub fn resolve_mount_point(
        &self,
        device: &str,
        mountpoint: Option<&Path>,
        source_file: Option<&Path>,
    ) -> HalResult<Option<PathBuf>> {
        if let Some(file) = source_file {
            return scan_mount_file(file, device, mountpoint);
        }

        if let Some(found) = scan_mount_file(&self.paths.proc_mounts, device, mountpoint)? {
            return Ok(Some(found));
        }
        let fallback = scan_mount_file(&self.paths.mtab, device, mountpoint)?;
        Ok(fallback.filter(|mp| mp == Path::new("/")))
    }
}

fn scan_mount_file(
    file: &Path,
    device: &str,
    mountpoint: Option<&Path>,
) -> HalResult<Option<PathBuf>> {
    let Some(mountpoint) = mountpoint else {
        return Ok(None);
    };
    let reader = BufReader::new(File::open(file).map_err(|e| {
        HalError::Other(format!("failed to open {}: {}", file.display(), e))
    })?);

    let device_real = resolve_path(Path::new(device));
    // Mount paths are raw bytes; a line that is not UTF-8 must not hide the others.
    for line in reader.split(b'\n') {
        let line = String::from_utf8_lossy(&line?).into_owned();
        let Some(entry) = parse_mounts_line(&line) else {
            continue;
        };
        let same_device = entry.device == device
            || resolve_path(Path::new(&entry.device)) == device_real;
        if same_device && entry.mount_point == mountpoint {
            return Ok(Some(entry.mount_point));
        }
    }
    Ok(None)
}

/// Resolve symlinks; paths that cannot be resolved (missing, pseudo devices) stay literal.
fn resolve_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
