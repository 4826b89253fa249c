//! Register access, storage format and raw command implementations.

use {
    crate::{Cli, config::Config, finish_session, open_programmer, select_target},
    anyhow::Result,
    console::style,
    esprog::{ChipRegistry, Programmer, Transport},
};

/// Run `op` on an open programmer and close the port afterwards.
fn with_programmer<T>(
    cli: &Cli,
    config: &mut Config,
    op: impl FnOnce(&mut Programmer<Transport>, &Config) -> Result<T>,
) -> Result<T> {
    let mut programmer = open_programmer(cli, config)?;
    let result = op(&mut programmer, config);
    finish_session(programmer, result)
}

/// Register read command implementation.
pub(crate) fn cmd_reg_read(cli: &Cli, config: &mut Config, address: u8) -> Result<()> {
    let registry = ChipRegistry::builtin();
    let value = with_programmer(cli, config, |programmer, config| {
        select_target(cli, config, programmer, &registry)?;
        Ok(programmer.read_register(address)?)
    })?;
    println!("{address:#04x}: {value:#04x}");
    Ok(())
}

/// Register write command implementation.
pub(crate) fn cmd_reg_write(cli: &Cli, config: &mut Config, address: u8, value: u8) -> Result<()> {
    let registry = ChipRegistry::builtin();
    with_programmer(cli, config, |programmer, config| {
        select_target(cli, config, programmer, &registry)?;
        Ok(programmer.write_register(address, value)?)
    })?;
    if !cli.quiet {
        eprintln!(
            "{} Wrote {value:#04x} to register {address:#04x}",
            style("✓").green()
        );
    }
    Ok(())
}

/// Format command implementation.
pub(crate) fn cmd_format(cli: &Cli, config: &mut Config) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} Formatting programmer storage...", style("⏳").yellow());
    }
    with_programmer(cli, config, |programmer, _| Ok(programmer.format_device()?))?;
    if !cli.quiet {
        eprintln!("{} Format complete", style("✓").green());
    }
    Ok(())
}

/// Raw command implementation.
///
/// Prints every frame received within the fast response window.
pub(crate) fn cmd_send(cli: &Cli, config: &mut Config, line: &str) -> Result<()> {
    let frames = with_programmer(cli, config, |programmer, _| Ok(programmer.send_raw(line)?))?;
    if frames.is_empty() && !cli.quiet {
        eprintln!("{}", style("No response").dim());
    }
    for frame in frames {
        println!("{frame}");
    }
    Ok(())
}
