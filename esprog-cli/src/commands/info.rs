//! Port listing, chip table and status command implementations.

use {
    crate::{
        Cli, CliError, config::Config, ensure_not_interrupted, finish_session, open_programmer,
        resolve_chip, select_target, session_config,
    },
    anyhow::{Context, Result},
    console::style,
    esprog::{
        ChipModel, ChipRegistry, DetectedChip, Programmer, Transport, ZoneKind, detect_programmer,
        discover_ports,
    },
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": p.device.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in esprog::device::format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    let probe_first = esprog::device::probe_order(detected)
        .into_iter()
        .next();
    if let Some(port) = probe_first {
        eprintln!(
            "\n{} Auto-detection tries {} first",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }

    Ok(())
}

fn zone_json(chip: &ChipModel, kind: ZoneKind) -> serde_json::Value {
    let zone = chip.zone(kind);
    serde_json::json!({
        "offset": zone.offset,
        "size": zone.size,
        "block_size": zone.block_size(),
        "blocks": zone.block_count(),
    })
}

/// Chip table command implementation.
pub(crate) fn cmd_chips(json: bool) -> Result<()> {
    let registry = ChipRegistry::builtin();

    if json {
        let chips: Vec<serde_json::Value> = registry
            .iter()
            .map(|chip| {
                serde_json::json!({
                    "name": chip.name(),
                    "part": chip.part,
                    "addresses": chip.addresses,
                    "default_address": chip.default_address(),
                    "zones": {
                        "mtp": zone_json(chip, ZoneKind::Mtp),
                        "config": zone_json(chip, ZoneKind::Config),
                        "trim": zone_json(chip, ZoneKind::Trim),
                    },
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "chips": chips,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style("Supported chips:").bold().underlined());
    for chip in registry.iter() {
        let addresses: Vec<String> = chip
            .addresses
            .iter()
            .map(|a| format!("{a:#04x}"))
            .collect();
        println!(
            "  {} {}  addresses {}",
            style("•").green(),
            style(chip).cyan().bold(),
            addresses.join(", ")
        );
        for kind in ZoneKind::ALL {
            let zone = chip.zone(kind);
            println!(
                "      {:<7} 0x{:08X}  {:>6} bytes  {:>3} x {} byte blocks",
                kind.to_string(),
                zone.offset,
                zone.size,
                zone.block_count(),
                zone.block_size()
            );
        }
    }
    Ok(())
}

/// Print status of the selected chip on an open programmer.
fn print_chip_status(programmer: &mut Programmer<Transport>, chip: &ChipModel) -> Result<()> {
    let info = programmer.chip_info()?;
    let uid = programmer.chip_uid()?;
    let zone = programmer.current_zone()?;
    println!("Chip:         {chip}");
    println!("Part number:  {:#04x}", info.part_number);
    println!("Revision:     {}", info.version);
    println!("UID:          {uid:#010x}");
    println!("Active zone:  {zone}");
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config) -> Result<()> {
    let registry = ChipRegistry::builtin();
    let mut programmer = open_programmer(cli, config)?;

    let result = (|| -> Result<()> {
        let info = programmer.probe()?;
        println!("Programmer:   {}", info.version);
        println!("Built:        {}", info.compile_time);
        println!("Protocol:     {}", programmer.revision());
        println!("Gate mode:    {}", programmer.gate_mode()?);

        if resolve_chip(cli, config, &registry)?.is_some() {
            let chip = select_target(cli, config, &mut programmer, &registry)?;
            print_chip_status(&mut programmer, &chip)?;
        }
        Ok(())
    })();

    finish_session(programmer, result)
}

fn print_detected(port: &str, found: Option<&DetectedChip>) {
    println!("Port:         {port}");
    match found {
        Some(found) => {
            println!("Chip:         {}", found.chip);
            println!("Address:      {:#04x}", found.address);
            println!("Part number:  {:#04x}", found.info.part_number);
            println!("Revision:     {}", found.info.version);
            println!("UID:          {:#010x}", found.uid);
        },
        None => println!("Chip:         none answered"),
    }
}

/// Detect command implementation.
///
/// Probes every port unless one is given, then scans the chip table.
pub(crate) fn cmd_detect(cli: &Cli, config: &mut Config) -> Result<()> {
    let registry = ChipRegistry::builtin();

    let (port, mut programmer) = if cli.port.is_some() || config.port.serial.is_some() {
        let programmer = open_programmer(cli, config)?;
        let name = programmer.link().name().to_string();
        (name, programmer)
    } else {
        if !cli.quiet {
            eprintln!("{} Probing serial ports...", style("⏳").yellow());
        }
        let (port, programmer) = detect_programmer(&session_config(cli, config))
            .map_err(|e| match e {
                esprog::Error::DeviceNotFound => anyhow::Error::new(CliError::DeviceNotFound(
                    "No programmer answered on any serial port".into(),
                )),
                other => anyhow::Error::new(other),
            })?;
        (port.name, programmer)
    };

    let result = (|| -> Result<Option<DetectedChip>> {
        ensure_not_interrupted()?;
        if let Some(power) = crate::power_settings(cli, config) {
            programmer.apply_power(&power)?;
        }
        programmer
            .autodetect_chip(&registry)
            .context("Chip scan failed")
    })();

    let found = finish_session(programmer, result)?;
    print_detected(&port, found.as_ref());
    Ok(())
}
