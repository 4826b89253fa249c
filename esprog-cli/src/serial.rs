//! Serial port selection.
//!
//! The port comes from, in order: `--port`, the `[port] serial` config entry,
//! or discovery. Discovery auto-selects a single recognised USB bridge and
//! otherwise asks the user, unless `--non-interactive` is set.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    esprog::{DetectedPort, discover_ports},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports, not only recognised USB bridges.
    pub list_all_ports: bool,
    /// Never prompt; fail when the choice is ambiguous.
    pub non_interactive: bool,
    /// Ask before using a single recognised port.
    pub confirm_port: bool,
}

/// Result of port selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether the port sits behind a recognised USB bridge.
    pub is_known: bool,
    /// Whether the user picked the port from a prompt.
    pub prompted: bool,
}

impl SelectedPort {
    fn auto(port: DetectedPort) -> Self {
        Self {
            is_known: port.device.is_known(),
            port,
            prompted: false,
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Narrow `ports` to the candidates worth offering.
fn candidates(ports: Vec<DetectedPort>, list_all: bool) -> Vec<DetectedPort> {
    if list_all {
        return ports;
    }
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.device.is_known())
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

fn select_non_interactive_port(mut ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    match ports.len() {
        0 => Err(CliError::DeviceNotFound("No serial ports found".to_string()).into()),
        1 => Ok(SelectedPort::auto(ports.remove(0))),
        n => Err(usage_err(&format!(
            "{n} serial ports found; pick one with --port"
        ))),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.port.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let mut ports = candidates(discover_ports(), options.list_all_ports);

    if options.non_interactive {
        return select_non_interactive_port(ports);
    }

    match ports.len() {
        0 => Err(CliError::DeviceNotFound("No serial ports found".to_string()).into()),
        1 => {
            let port = ports.remove(0);
            if port.device.is_known() && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort::auto(port))
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, falling back to a bare entry for ports discovery
/// does not list.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = discover_ports();

    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    match found {
        Some(port) => SelectedPort::auto(port.clone()),
        None => SelectedPort::auto(DetectedPort::named(name)),
    }
}

/// Display label for a port in the selection list.
fn port_label(port: &DetectedPort) -> String {
    let name = if port.device.is_known() {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!(
        "{}",
        style("Recognised USB bridges are shown in bold").dim()
    );

    ports.sort_by_key(|p| !p.device.is_known());

    // Keep labels on one line in narrow terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the programmer's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                prompted: true,
                ..SelectedPort::auto(port)
            })
        },
        None => Err(cancelled()),
    }
}

/// Confirm use of a single port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            prompted: true,
            ..SelectedPort::auto(port)
        })
    } else {
        Err(cancelled())
    }
}

/// Offer to store a prompted port in the local config file.
pub fn ask_remember_port(selected: &SelectedPort, config: &mut Config) -> Result<()> {
    if !selected.prompted || config.port.serial.is_some() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Remember {} in {}?",
            selected.port.name,
            crate::config::LOCAL_CONFIG
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&selected.port.name) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
