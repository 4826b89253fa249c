//! Program and read-back command implementations.

use {
    crate::{
        Cli, config::Config, ensure_not_interrupted, finish_session, open_programmer, progress_bar,
        select_target,
    },
    anyhow::{Context, Result},
    console::style,
    esprog::{ChipRegistry, CommitTarget, FirmwareImage, protocol::checksum},
    std::path::Path,
};

/// Program command implementation.
pub(crate) fn cmd_program(cli: &Cli, config: &mut Config, file: &Path, save: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            file.display()
        );
    }
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to load image {}", file.display()))?;

    let registry = ChipRegistry::builtin();
    let mut programmer = open_programmer(cli, config)?;

    let result = (|| -> Result<()> {
        let chip = select_target(cli, config, &mut programmer, &registry)?;
        let zone = chip.zone(cli.zone);
        image
            .validate_for(zone)
            .with_context(|| format!("{} does not fit {chip} {}", image.name(), cli.zone))?;
        ensure_not_interrupted()?;

        let target = if save {
            CommitTarget::Programmer
        } else {
            CommitTarget::Chip
        };
        let pb = progress_bar(cli, u64::from(zone.size), &format!("Writing {}", cli.zone));
        programmer.program(cli.zone, image.data(), target, |done, _total| {
            pb.set_position(done as u64);
        })?;
        pb.finish_with_message("Complete");

        if !cli.quiet {
            let destination = if save { "programmer storage" } else { "chip" };
            eprintln!(
                "\n{} Wrote {} bytes to {} {} (checksum {:#010x})",
                style("🎉").green().bold(),
                image.len(),
                destination,
                cli.zone,
                image.checksum()
            );
        }
        Ok(())
    })();

    finish_session(programmer, result)
}

/// Read command implementation.
pub(crate) fn cmd_read(cli: &Cli, config: &mut Config, output: &Path) -> Result<()> {
    let registry = ChipRegistry::builtin();
    let mut programmer = open_programmer(cli, config)?;

    let result = (|| -> Result<Vec<u8>> {
        let chip = select_target(cli, config, &mut programmer, &registry)?;
        let zone = chip.zone(cli.zone);
        ensure_not_interrupted()?;

        let pb = progress_bar(cli, u64::from(zone.size), &format!("Reading {}", cli.zone));
        let data = programmer.read_chip(cli.zone, |done, _total| {
            pb.set_position(done as u64);
        })?;
        pb.finish_with_message("Complete");
        Ok(data)
    })();

    let data = finish_session(programmer, result)?;

    std::fs::write(output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes of {} to {} (checksum {:#010x})",
            style("✓").green(),
            data.len(),
            cli.zone,
            output.display(),
            checksum(&data)
        );
    }
    Ok(())
}
