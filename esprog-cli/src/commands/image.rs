//! Offline image inspection.

use {
    crate::{Cli, config::Config, resolve_chip},
    anyhow::{Context, Result},
    console::style,
    esprog::{ChipRegistry, FirmwareImage},
    std::path::Path,
};

/// Image command implementation.
///
/// When a chip is configured the image is also checked against the
/// selected zone.
pub(crate) fn cmd_image(
    cli: &Cli,
    config: &Config,
    file: &Path,
    json: bool,
    dump: bool,
) -> Result<()> {
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to load image {}", file.display()))?;

    let registry = ChipRegistry::builtin();
    let target = resolve_chip(cli, config, &registry)?;
    let fits = target
        .as_ref()
        .map(|(chip, _)| (chip, image.validate_for(chip.zone(cli.zone))));

    if json {
        let mut data = serde_json::json!({
            "name": image.name(),
            "size": image.len(),
            "checksum": format!("{:#010x}", image.checksum()),
        });
        if let Some((chip, result)) = &fits {
            data["target"] = serde_json::json!({
                "chip": chip.name(),
                "zone": cli.zone.to_string(),
                "size": chip.zone(cli.zone).size,
                "fits": result.is_ok(),
                "error": result.as_ref().err().map(ToString::to_string),
            });
        }
        if dump {
            data["dump"] = serde_json::Value::from(image.hexdump());
        }
        let output = serde_json::json!({
            "ok": true,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style(image.name()).bold().underlined());
    println!("Size:      {} bytes", image.len());
    println!("Checksum:  {:#010x}", image.checksum());
    if let Some((chip, result)) = &fits {
        let zone = chip.zone(cli.zone);
        match result {
            Ok(()) => println!(
                "Target:    {} {} ({} bytes) {}",
                chip,
                cli.zone,
                zone.size,
                style("fits").green()
            ),
            Err(e) => println!("Target:    {} {} {}", chip, cli.zone, style(e).red()),
        }
    }
    if dump {
        println!();
        print!("{}", image.hexdump());
    }
    Ok(())
}
