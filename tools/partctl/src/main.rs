use anyhow::{Context, Result};
use clap::Parser;
use partkit::{MountRequest, MountTable, Partition, PartitionOptions, Settings, UnmountOutcome};
use partkit_hal::LinuxHal;

mod cli;
mod logging;

fn load_settings(cli: &cli::Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init(cli.verbose);
    let settings = load_settings(&cli)?;
    let hal = LinuxHal::new()
        .with_default_timeout(settings.commands.timeout())
        .with_sudo(settings.commands.use_sudo);

    match cli.command {
        cli::Command::Mkfs {
            device,
            fstype,
            args,
            mkfs_flags,
        } => {
            let mut options = PartitionOptions::new();
            options.mkfs_flags = mkfs_flags;
            let mut part = Partition::with_settings(hal, device, options, settings)?;
            part.mkfs(fstype.as_deref(), &args)?;
            println!(
                "{}: formatted as {}",
                part.device(),
                part.fstype().unwrap_or("unknown")
            );
        }
        cli::Command::Mount {
            device,
            mountpoint,
            fstype,
            args,
            options,
            no_check,
        } => {
            let mut part_options = PartitionOptions::new();
            part_options.mount_options = options;
            let mut part = Partition::with_settings(hal, device, part_options, settings)?;
            let mut request = MountRequest::new().at(&mountpoint).args(args).check(!no_check);
            request.fstype = fstype;
            part.mount(request)?;
            println!("{}: mounted at {}", part.device(), mountpoint.display());
        }
        cli::Command::Unmount {
            device,
            mountpoint,
            no_force,
        } => {
            let mut part = Partition::with_settings(
                hal,
                device,
                PartitionOptions::new().mountpoint(&mountpoint),
                settings,
            )?;
            let outcome = part.unmount(!no_force)?;
            let status = match outcome {
                UnmountOutcome::Unmounted => "unmounted",
                UnmountOutcome::ForceUnmounted => "unmounted (forced)",
                UnmountOutcome::NotMounted => "not mounted",
            };
            println!("{}: {}", part.device(), status);
        }
        cli::Command::Status {
            device,
            mountpoint: Some(mountpoint),
        } => {
            let part = Partition::with_settings(
                hal,
                device,
                PartitionOptions::new().mountpoint(mountpoint),
                settings,
            )?;
            match part.mounted_at()? {
                Some(mp) => println!("{}: mounted at {}", part.device(), mp.display()),
                None => println!("{}: not mounted there", part.device()),
            }
        }
        cli::Command::Status {
            device,
            mountpoint: None,
        } => {
            let table = MountTable::new(&hal, &settings.mount_table);
            if table.is_device_mounted(&device)? {
                println!("{}: in use", device);
            } else {
                println!("{}: not mounted", device);
            }
        }
    }

    Ok(())
}
