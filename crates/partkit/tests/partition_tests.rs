use partkit::config::Settings;
use partkit::{MountRequest, Partition, PartitionErrorKind, PartitionOptions, UnmountOutcome};
use partkit_hal::{CommandOutput, FakeHal};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch mount table files and lock directory, plus a recording HAL.
struct Sandbox {
    dir: TempDir,
    settings: Settings,
    hal: FakeHal,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.mount_table.proc_mounts = dir.path().join("mounts");
        settings.mount_table.mtab = dir.path().join("mtab");
        settings.lock.dir = dir.path().join("locks");
        settings.lock.timeout_secs = 5;
        std::fs::create_dir_all(&settings.lock.dir).unwrap();
        std::fs::write(&settings.mount_table.proc_mounts, "").unwrap();
        std::fs::write(&settings.mount_table.mtab, "").unwrap();
        Self {
            dir,
            settings,
            hal: FakeHal::new(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn set_proc_mounts(&self, content: &str) {
        std::fs::write(&self.settings.mount_table.proc_mounts, content).unwrap();
    }

    fn mount_listing(&self, listing: &str) {
        self.hal.on("mount", CommandOutput::ok(listing));
    }

    fn partition(&self, device: &str, options: PartitionOptions) -> Partition<FakeHal> {
        Partition::with_settings(self.hal.clone(), device, options, self.settings.clone())
            .unwrap()
    }

    /// Commands other than the mount-table reads.
    fn mutating_commands(&self) -> Vec<String> {
        self.hal
            .commands()
            .into_iter()
            .filter(|c| c != "mount" && c != "swapon -s")
            .collect()
    }
}

#[test]
fn mkfs_refuses_mounted_device() {
    let sb = Sandbox::new();
    sb.mount_listing("/dev/sdb1 on /data type ext4 (rw)\n");
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new());

    let err = part.mkfs(Some("ext4"), "").unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::AlreadyMounted);
    assert!(sb.mutating_commands().is_empty());
    assert_eq!(part.fstype(), None);
}

#[test]
fn mkfs_refuses_active_swap_device() {
    let sb = Sandbox::new();
    sb.hal.on(
        "swapon -s",
        CommandOutput::ok("Filename Type Size Used Priority\n/dev/sdb2 partition 1024 0 -2\n"),
    );
    let mut part = sb.partition("/dev/sdb2", PartitionOptions::new());

    let err = part.mkfs(None, "").unwrap_err();
    assert_eq!(err.kind(), PartitionErrorKind::AlreadyMounted);
}

#[test]
fn mount_refuses_mounted_device_without_running_mount() {
    let sb = Sandbox::new();
    sb.mount_listing("/dev/sdb1 on /data type ext4 (rw)\n");
    let mut part = sb.partition(
        "/dev/sdb1",
        PartitionOptions::new().mountpoint(sb.path("mnt")),
    );

    let err = part.mount(MountRequest::new()).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::AlreadyMounted);
    assert!(sb.mutating_commands().is_empty());
    assert!(!sb.path("mnt").exists());
}

#[test]
fn mount_refuses_busy_mount_point() {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    sb.mount_listing(&format!("/dev/sdc1 on {} type ext4 (rw)\n", target.display()));
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new());

    let err = part.mount(MountRequest::new().at(&target)).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::MountPointBusy);
    assert!(sb.mutating_commands().is_empty());
}

#[test]
fn mount_without_check_skips_table_reads() {
    let sb = Sandbox::new();
    sb.mount_listing("/dev/sdb1 on /data type ext4 (rw)\n");
    let target = sb.path("mnt");
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new());

    part.mount(MountRequest::new().at(&target).check(false))
        .unwrap();

    assert_eq!(
        sb.hal.commands(),
        vec![format!("mount /dev/sdb1 {}", target.display())]
    );
}

#[test]
fn mount_without_any_mountpoint_fails() {
    let sb = Sandbox::new();
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new());

    let err = part.mount(MountRequest::new()).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::NoMountpoint);
    assert_eq!(sb.hal.operation_count(), 0);
}

#[test]
fn mount_creates_target_and_records_type() {
    let sb = Sandbox::new();
    let target = sb.path("nested/mnt");
    let mut part = sb.partition(
        "/dev/sdb1",
        PartitionOptions::new()
            .mountpoint(&target)
            .mount_options("noatime"),
    );

    part.mount(MountRequest::new().fstype("xfs")).unwrap();

    assert!(target.is_dir());
    assert_eq!(part.fstype(), Some("xfs"));
    let mount_cmd = sb.hal.commands().pop().unwrap();
    assert_eq!(
        mount_cmd,
        format!("mount -o noatime -t xfs /dev/sdb1 {}", target.display())
    );
    assert!(sb.hal.has_operation(|op| op.command == mount_cmd && op.elevate));
}

#[test]
fn failed_mount_keeps_resolved_type() {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    sb.hal.on(
        "mount -t ext3 /dev/sdb1",
        CommandOutput::failed(32, "wrong fs type, bad option, bad superblock"),
    );
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let err = part.mount(MountRequest::new().fstype("ext3")).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::MountFailed);
    assert!(err.to_string().contains("wrong fs type"));
    assert_eq!(part.fstype(), Some("ext3"));
}

#[test]
fn loop_backed_lifecycle_binds_and_detaches_loop_device() {
    let sb = Sandbox::new();
    let image = sb.path("disk.img");
    let image = image.to_str().unwrap();
    let target = sb.path("mnt");
    sb.hal
        .on("losetup --find", CommandOutput::ok("/dev/loop7\n"));
    let mut part = sb.partition(
        image,
        PartitionOptions::new().loop_size_mib(100).mountpoint(&target),
    );
    assert_eq!(
        sb.hal.count_commands("dd if=/dev/zero"),
        1,
        "backing file is zero-filled exactly once"
    );
    assert!(sb
        .hal
        .commands()
        .contains(&format!("dd if=/dev/zero of={} bs=1M count=100", image)));

    part.mkfs(Some("xfs"), "").unwrap();
    let mkfs = sb
        .hal
        .commands()
        .into_iter()
        .find(|c| c.starts_with("mkfs"))
        .unwrap();
    assert_eq!(mkfs, format!("mkfs -t xfs -f {}", image));

    part.mount(MountRequest::new()).unwrap();
    assert_eq!(part.device(), "/dev/loop7");
    assert_eq!(part.device_ref().requested(), image);
    assert!(sb
        .hal
        .commands()
        .contains(&format!("mount -t xfs /dev/loop7 {}", target.display())));

    sb.set_proc_mounts(&format!("/dev/loop7 {} xfs rw 0 0\n", target.display()));
    sb.hal.clear();
    let outcome = part.unmount(true).unwrap();

    assert_eq!(outcome, UnmountOutcome::Unmounted);
    assert_eq!(
        sb.hal.commands(),
        vec![
            format!("umount {}", target.display()),
            "losetup -d /dev/loop7".to_string()
        ]
    );
    assert_eq!(part.device(), image);
    assert_eq!(part.device_ref().active(), None);
}

#[test]
fn failed_mount_detaches_fresh_loop_device() {
    let sb = Sandbox::new();
    let image = sb.path("disk.img");
    let image = image.to_str().unwrap();
    sb.hal
        .on("losetup --find", CommandOutput::ok("/dev/loop2\n"))
        .on("mount -t ext4 /dev/loop2", CommandOutput::failed(32, "bad superblock"));
    let mut part = sb.partition(
        image,
        PartitionOptions::new().loop_size_mib(8).mountpoint(sb.path("mnt")),
    );

    let err = part.mount(MountRequest::new().fstype("ext4")).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::MountFailed);
    assert_eq!(err.device(), "/dev/loop2");
    assert_eq!(sb.hal.count_commands("losetup -d /dev/loop2"), 1);
    assert_eq!(part.device(), image);
}

#[test]
fn loop_setup_failure_is_reported() {
    let sb = Sandbox::new();
    let image = sb.path("disk.img");
    sb.hal.on(
        "losetup --find",
        CommandOutput::failed(1, "could not find any free loop device"),
    );
    let mut part = sb.partition(
        image.to_str().unwrap(),
        PartitionOptions::new().loop_size_mib(8).mountpoint(sb.path("mnt")),
    );

    let err = part.mount(MountRequest::new()).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::LoopSetupFailed);
    assert_eq!(sb.hal.count_commands("mount -"), 0);
    assert_eq!(sb.hal.count_commands("losetup -d"), 0);
}

#[test]
fn unmount_of_unmounted_device_issues_no_commands() {
    let sb = Sandbox::new();
    sb.set_proc_mounts("/dev/sda3 / ext4 rw 0 0\n");
    let mut part = sb.partition(
        "/dev/sdb1",
        PartitionOptions::new().mountpoint(sb.path("mnt")),
    );

    let outcome = part.unmount(true).unwrap();

    assert_eq!(outcome, UnmountOutcome::NotMounted);
    assert_eq!(sb.hal.operation_count(), 0);
}

fn mounted_sandbox() -> (Sandbox, PathBuf) {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    sb.set_proc_mounts(&format!("/dev/sdb1 {} ext4 rw 0 0\n", target.display()));
    sb.hal.on(
        &format!("umount {}", target.display()),
        CommandOutput::failed(32, "target is busy"),
    );
    (sb, target)
}

#[test]
fn busy_unmount_escalates_to_forced() {
    let (sb, target) = mounted_sandbox();
    sb.hal.on(
        "lsof",
        CommandOutput::ok(format!(
            "COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME\n\
             bash 111 root cwd DIR 8,17 4096 2 {0}\n\
             tail 222 root 3r REG 8,17 12 13 {0}/log\n",
            target.display()
        )),
    );
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let outcome = part.unmount(true).unwrap();

    assert_eq!(outcome, UnmountOutcome::ForceUnmounted);
    let mp = target.display();
    assert_eq!(
        sb.hal.commands(),
        vec![
            format!("umount {}", mp),
            format!("lsof {}", mp),
            "kill -9 111".to_string(),
            "kill -9 222".to_string(),
            format!("umount -f {}", mp),
        ]
    );
}

#[test]
fn forced_unmount_falls_back_to_lazy() {
    let (sb, target) = mounted_sandbox();
    sb.hal
        .on("lsof", CommandOutput::failed(1, ""))
        .on(
            &format!("umount -f {}", target.display()),
            CommandOutput::failed(32, "target is busy"),
        );
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let outcome = part.unmount(true).unwrap();

    assert_eq!(outcome, UnmountOutcome::ForceUnmounted);
    let commands = sb.hal.commands();
    let forced = commands.iter().position(|c| c.starts_with("umount -f")).unwrap();
    let lazy = commands.iter().position(|c| c.starts_with("umount -l")).unwrap();
    assert!(forced < lazy);
    assert_eq!(sb.hal.count_commands("kill"), 0);
}

#[test]
fn forced_and_lazy_failure_is_an_error() {
    let (sb, target) = mounted_sandbox();
    sb.hal
        .on("lsof", CommandOutput::failed(1, ""))
        .on("umount -", CommandOutput::failed(32, "target is busy"));
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let err = part.unmount(true).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::ForceUnmountFailed);
    assert_eq!(sb.hal.count_commands("umount -l"), 1);
}

#[test]
fn kill_failures_do_not_abort_recovery() {
    let (sb, target) = mounted_sandbox();
    sb.hal
        .on(
            "lsof",
            CommandOutput::ok("COMMAND PID USER\nsh 4242 root\n"),
        )
        .on("kill -9 4242", CommandOutput::failed(1, "No such process"));
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    assert_eq!(part.unmount(true).unwrap(), UnmountOutcome::ForceUnmounted);
}

#[test]
fn process_enumeration_failure_aborts_recovery() {
    let (sb, target) = mounted_sandbox();
    sb.hal.on_missing("lsof");
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let err = part.unmount(true).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::ProcessEnumerationFailed);
    assert_eq!(sb.hal.count_commands("umount -"), 0);
}

#[test]
fn unforced_unmount_failure_is_an_error() {
    let (sb, target) = mounted_sandbox();
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let err = part.unmount(false).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::UnmountFailed);
    assert_eq!(sb.hal.count_commands("lsof"), 0);
    assert!(err.to_string().starts_with("Partition(/dev/sdb1): unable to unmount gracefully"));
}

#[test]
fn loop_cleanup_failure_follows_successful_unmount() {
    let sb = Sandbox::new();
    let image = sb.path("disk.img");
    let image = image.to_str().unwrap();
    let target = sb.path("mnt");
    sb.hal
        .on("losetup --find", CommandOutput::ok("/dev/loop5\n"))
        .on("losetup -d", CommandOutput::failed(1, "device is busy"));
    let mut part = sb.partition(
        image,
        PartitionOptions::new().loop_size_mib(8).mountpoint(&target),
    );
    part.mount(MountRequest::new()).unwrap();
    sb.set_proc_mounts(&format!("/dev/loop5 {} ext2 rw 0 0\n", target.display()));

    let err = part.unmount(true).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::LoopCleanupFailed);
    assert_eq!(sb.hal.count_commands(&format!("umount {}", target.display())), 1);
    assert_eq!(part.device_ref().active(), Some("/dev/loop5"));
}

#[test]
fn mkfs_reuses_recorded_type_then_default() {
    let sb = Sandbox::new();
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mkfs_flags("-q"));

    part.mkfs(None, "").unwrap();
    assert_eq!(part.fstype(), Some("ext2"));

    part.mount(MountRequest::new().at(sb.path("mnt")).fstype("ext4"))
        .unwrap();
    sb.hal.clear();
    part.mkfs(None, "-t ext4 -b 4096").unwrap();

    let mkfs: Vec<String> = sb
        .hal
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("mkfs"))
        .collect();
    assert_eq!(mkfs, vec!["mkfs -t ext4 -b 4096 -q /dev/sdb1"]);
    assert!(sb.hal.has_operation(|op| op.command.starts_with("mkfs") && op.auto_confirm));
    assert!(!sb.hal.has_operation(|op| op.command.starts_with("mkfs") && op.elevate));
}

#[test]
fn mkfs_failure_leaves_type_unrecorded() {
    let sb = Sandbox::new();
    sb.hal.on("mkfs", CommandOutput::failed(1, "device not found"));
    let mut part = sb.partition("/dev/sdz9", PartitionOptions::new());

    let err = part.mkfs(Some("ext4"), "").unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::FormatFailed);
    assert_eq!(part.fstype(), None);
    assert!(err.to_string().contains("device not found"));
}

#[test]
fn lock_contention_times_out() {
    let mut sb = Sandbox::new();
    sb.settings.lock.timeout_secs = 1;
    let _held = partkit::NamedLock::acquire(
        &sb.settings.lock.dir,
        &sb.settings.mount_table.mtab.to_string_lossy(),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    let mut part = sb.partition(
        "/dev/sdb1",
        PartitionOptions::new().mountpoint(sb.path("mnt")),
    );

    let err = part.unmount(true).unwrap_err();

    assert_eq!(err.kind(), PartitionErrorKind::LockTimeout);
    assert_eq!(sb.hal.operation_count(), 0);
}

#[test]
fn state_queries_reread_the_table() {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    let part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    assert!(!part.is_mounted().unwrap());
    sb.set_proc_mounts(&format!("/dev/sdb1 {} ext4 rw 0 0\n", target.display()));
    assert_eq!(part.mounted_at().unwrap().as_deref(), Some(Path::new(&target)));
}

#[test]
fn mtab_lock_is_released_after_failed_locked_steps() {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    sb.mount_listing("/dev/sdb1 on /data type ext4 (rw)\n");
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    let err = part.mount(MountRequest::new()).unwrap_err();
    assert_eq!(err.kind(), PartitionErrorKind::AlreadyMounted);

    sb.set_proc_mounts(&format!("/dev/sdb1 {} ext4 rw 0 0\n", target.display()));
    sb.hal.on_sequence(
        format!("umount {}", target.display()),
        vec![
            CommandOutput::failed(32, "target is busy"),
            CommandOutput::ok(""),
        ],
    );
    let err = part.unmount(false).unwrap_err();
    assert_eq!(err.kind(), PartitionErrorKind::UnmountFailed);
    assert_eq!(part.unmount(false).unwrap(), UnmountOutcome::Unmounted);

    let guard = partkit::NamedLock::acquire(
        &sb.settings.lock.dir,
        &sb.settings.mount_table.mtab.to_string_lossy(),
        std::time::Duration::from_millis(200),
    );
    assert!(guard.is_ok());
}

#[test]
fn unmount_ignores_undecodable_mount_table_lines() {
    let sb = Sandbox::new();
    let target = sb.path("mnt");
    let mut content = b"/dev/sdc1 /mnt/caf\xe9 ext4 rw 0 0\n".to_vec();
    content.extend_from_slice(format!("/dev/sdb1 {} ext4 rw 0 0\n", target.display()).as_bytes());
    std::fs::write(&sb.settings.mount_table.proc_mounts, content).unwrap();
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new().mountpoint(&target));

    assert_eq!(part.unmount(true).unwrap(), UnmountOutcome::Unmounted);
    assert_eq!(sb.hal.commands(), vec![format!("umount {}", target.display())]);
}

#[test]
fn mkfs_without_swapon_checks_mounts_only() {
    let sb = Sandbox::new();
    sb.hal.on_missing("swapon");
    let mut part = sb.partition("/dev/sdb1", PartitionOptions::new());

    part.mkfs(Some("ext4"), "").unwrap();

    assert_eq!(part.fstype(), Some("ext4"));
    assert_eq!(sb.mutating_commands(), vec!["mkfs -t ext4 /dev/sdb1"]);
}
