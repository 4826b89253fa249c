//! esprog CLI - Command-line tool for ESPROG chip programmers.
//!
//! ## Features
//!
//! - Program and read back MTP, configuration and trim zones
//! - Chip and programmer auto-detection
//! - Register access and raw protocol commands
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use esprog::protocol::frame::parse_u8;
use esprog::target::parse_part;
use esprog::{
    ChipModel, ChipRegistry, IoVoltage, PowerMode, PowerSettings, Programmer, ProtocolRevision,
    SerialConfig, SessionConfig, Transport, VddVoltage, ZoneKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// esprog - Host tool for ESPROG MTP chip programmers.
///
/// Environment variables:
///   ESPROG_PORT              - Default serial port
///   ESPROG_BAUD              - Baud rate (default depends on --revision)
///   ESPROG_CHIP              - Target part number, e.g. NU1708
///   ESPROG_ADDR              - Target bus address, e.g. 0x51
///   ESPROG_REVISION          - Programmer firmware dialect (zoned, legacy)
///   ESPROG_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "esprog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ESPROG_PORT")]
    port: Option<String>,

    /// Baud rate (1000000 for zoned, 2000000 for legacy firmware).
    #[arg(short, long, global = true, env = "ESPROG_BAUD")]
    baud: Option<u32>,

    /// Target chip part number, e.g. NU1708 or 0x1708.
    #[arg(short, long, global = true, env = "ESPROG_CHIP", value_parser = parse_chip_arg)]
    chip: Option<u16>,

    /// Target bus address, e.g. 0x51.
    #[arg(short, long, global = true, env = "ESPROG_ADDR", value_parser = parse_byte_arg)]
    addr: Option<u8>,

    /// Memory zone (mtp, config, trim).
    #[arg(short, long, global = true, default_value = "mtp", value_parser = parse_zone_arg)]
    zone: ZoneKind,

    /// VDD switching mode (on-demand, always-on, always-off).
    #[arg(long, global = true, value_parser = parse_power_mode_arg)]
    vdd_mode: Option<PowerMode>,

    /// VDD voltage (5v, 3v3).
    #[arg(long, global = true, value_parser = parse_vdd_arg)]
    vdd_voltage: Option<VddVoltage>,

    /// Bus I/O level (1v8, 3v3, 5v, 5v-hs).
    #[arg(long, global = true, value_parser = parse_io_arg)]
    io_voltage: Option<IoVoltage>,

    /// Programmer firmware dialect (zoned, legacy).
    #[arg(long, global = true, env = "ESPROG_REVISION", value_parser = parse_revision_arg)]
    revision: Option<ProtocolRevision>,

    /// Verbose output (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress progress output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESPROG_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Ask before using a single auto-detected port.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all serial ports, not only recognised USB bridges.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to config file.
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// List supported chips and their zones.
    Chips {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Inspect a firmware image file.
    Image {
        /// Image file (raw binary).
        file: PathBuf,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,

        /// Print a hex dump of the content.
        #[arg(long)]
        dump: bool,
    },

    /// Show programmer and chip status.
    Info,

    /// Find the programmer and the attached chip.
    Detect,

    /// Program an image into the selected zone.
    Program {
        /// Image file (raw binary).
        file: PathBuf,

        /// Store the image in the programmer instead of writing the chip.
        #[arg(long)]
        save: bool,
    },

    /// Read the selected zone into a file.
    Read {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Read or write a chip register.
    Reg {
        #[command(subcommand)]
        action: RegAction,
    },

    /// Format the programmer's image storage.
    Format,

    /// Send a raw protocol line and print the replies.
    Send {
        /// Line to send, e.g. "[GetZone,1]".
        line: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions for the current shell.
        #[arg(long)]
        install: bool,
    },
}

/// Register operations.
#[derive(Subcommand)]
enum RegAction {
    /// Read one register.
    Read {
        /// Register address, e.g. 0x10.
        #[arg(value_parser = parse_byte_arg)]
        address: u8,
    },
    /// Write one register.
    Write {
        /// Register address, e.g. 0x10.
        #[arg(value_parser = parse_byte_arg)]
        address: u8,
        /// Value to write, e.g. 0xA5.
        #[arg(value_parser = parse_byte_arg)]
        value: u8,
    },
}

/// CLI failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration value.
    #[error("{0}")]
    Config(String),
    /// No port or programmer found.
    #[error("{0}")]
    DeviceNotFound(String),
    /// The user cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for an error, looking through its context chain.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(lib) = cause.downcast_ref::<esprog::Error>() {
            match lib {
                esprog::Error::DeviceNotFound => return 4,
                esprog::Error::Interrupted => return 130,
                esprog::Error::Config(_) => return 3,
                _ => {},
            }
        }
    }
    1
}

fn parse_chip_arg(s: &str) -> Result<u16, String> {
    parse_part(s).ok_or_else(|| format!("invalid part number: {s}"))
}

fn parse_byte_arg(s: &str) -> Result<u8, String> {
    parse_u8(s).ok_or_else(|| format!("invalid byte value: {s}"))
}

fn parse_zone_arg(s: &str) -> Result<ZoneKind, String> {
    ZoneKind::from_name(s).ok_or_else(|| format!("unknown zone: {s} (expected mtp, config, trim)"))
}

fn parse_power_mode_arg(s: &str) -> Result<PowerMode, String> {
    PowerMode::from_name(s).ok_or_else(|| format!("unknown power mode: {s}"))
}

fn parse_vdd_arg(s: &str) -> Result<VddVoltage, String> {
    VddVoltage::from_name(s).ok_or_else(|| format!("unknown VDD voltage: {s}"))
}

fn parse_io_arg(s: &str) -> Result<IoVoltage, String> {
    IoVoltage::from_name(s).ok_or_else(|| format!("unknown I/O voltage: {s}"))
}

fn parse_revision_arg(s: &str) -> Result<ProtocolRevision, String> {
    ProtocolRevision::from_name(s).ok_or_else(|| format!("unknown revision: {s}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "esprog v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // First Ctrl-C asks the running transfer to stop; a second one exits.
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    }) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }
    esprog::set_interrupt_checker(was_interrupted);

    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match run(&cli, &mut config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            let code = exit_code_for(&err);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        },
    }
}

fn run(cli: &Cli, config: &mut Config) -> Result<()> {
    use commands::{completions, device, image, info, transfer};

    match &cli.command {
        Commands::ListPorts { json } => info::cmd_list_ports(*json),
        Commands::Chips { json } => info::cmd_chips(*json),
        Commands::Image { file, json, dump } => image::cmd_image(cli, config, file, *json, *dump),
        Commands::Info => info::cmd_info(cli, config),
        Commands::Detect => info::cmd_detect(cli, config),
        Commands::Program { file, save } => transfer::cmd_program(cli, config, file, *save),
        Commands::Read { output } => transfer::cmd_read(cli, config, output),
        Commands::Reg { action } => match action {
            RegAction::Read { address } => device::cmd_reg_read(cli, config, *address),
            RegAction::Write { address, value } => {
                device::cmd_reg_write(cli, config, *address, *value)
            },
        },
        Commands::Format => device::cmd_format(cli, config),
        Commands::Send { line } => device::cmd_send(cli, config, line),
        Commands::Completions { shell, install } => {
            if *install {
                completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "Specify a shell type, e.g.: esprog completions bash \
                         (or use esprog completions --install)"
                            .to_string(),
                    )
                })?;
                completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Protocol revision from the command line, then config.
pub(crate) fn revision(cli: &Cli, config: &Config) -> ProtocolRevision {
    cli.revision
        .or(config.protocol.revision)
        .unwrap_or_default()
}

/// Serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;
    if !cli.non_interactive {
        ask_remember_port(&selected, config)?;
    }

    Ok(selected.port.name)
}

/// Session parameters for the configured revision.
pub(crate) fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let session = SessionConfig::for_revision(revision(cli, config));
    match config.protocol.queue_depth {
        Some(depth) => session.with_queue_depth(depth),
        None => session,
    }
}

/// Close the session, then hand back `result`.
///
/// A close failure is returned only when the operation succeeded; otherwise
/// it is logged and the operation's own error wins.
pub(crate) fn finish_session<T>(
    mut programmer: Programmer<Transport>,
    result: Result<T>,
) -> Result<T> {
    let closed = programmer.close();
    merge_close(result, closed)
}

fn merge_close<T>(result: Result<T>, closed: esprog::Result<()>) -> Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(anyhow::Error::new(e).context("Failed to close port")),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!("Failed to close port after error: {close}");
            Err(e)
        },
    }
}

/// Select a port, open it and check that a programmer answers.
pub(crate) fn open_programmer(cli: &Cli, config: &mut Config) -> Result<Programmer<Transport>> {
    let port = get_port(cli, config)?;
    let session = session_config(cli, config);
    let baud = cli
        .baud
        .or(config.port.baud)
        .unwrap_or_else(|| session.revision.baud_rate());

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            baud
        );
    }

    let serial = SerialConfig::new(&port, baud);
    let mut programmer = Programmer::open_with(&serial, &session)
        .with_context(|| format!("Failed to open {port}"))?;
    let info = programmer
        .probe()
        .with_context(|| format!("No programmer answered on {port}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Programmer {} (built {})",
            style("✓").green(),
            info.version,
            info.compile_time
        );
    }
    Ok(programmer)
}

/// Power settings, when any were given on the command line or in config.
pub(crate) fn power_settings(cli: &Cli, config: &Config) -> Option<PowerSettings> {
    let vdd = cli.vdd_voltage.or(config.power.vdd_voltage);
    let vdd_mode = cli.vdd_mode.or(config.power.vdd_mode);
    let io = cli.io_voltage.or(config.power.io_voltage);

    if vdd.is_none() && vdd_mode.is_none() && io.is_none() {
        return None;
    }
    Some(PowerSettings {
        vdd: vdd.unwrap_or_default(),
        vdd_mode: vdd_mode.unwrap_or_default(),
        io: io.unwrap_or_default(),
    })
}

/// Part number from the command line, then config.
pub(crate) fn chip_part(cli: &Cli, config: &Config) -> Result<Option<u16>> {
    if let Some(part) = cli.chip {
        return Ok(Some(part));
    }
    match &config.chip.part {
        Some(part) => parse_part(part)
            .map(Some)
            .ok_or_else(|| CliError::Config(format!("Invalid [chip] part in config: {part}")).into()),
        None => Ok(None),
    }
}

/// Bus address from the command line, then config, then the chip default.
pub(crate) fn chip_address(cli: &Cli, config: &Config, chip: &ChipModel) -> Result<u8> {
    if let Some(address) = cli.addr {
        return Ok(address);
    }
    match &config.chip.address {
        Some(address) => parse_u8(address).ok_or_else(|| {
            CliError::Config(format!("Invalid [chip] address in config: {address}")).into()
        }),
        None => Ok(chip.default_address()),
    }
}

/// Resolve the chip from the registry without touching the programmer.
pub(crate) fn resolve_chip(
    cli: &Cli,
    config: &Config,
    registry: &ChipRegistry,
) -> Result<Option<(ChipModel, u8)>> {
    let Some(part) = chip_part(cli, config)? else {
        return Ok(None);
    };
    let chip = registry
        .require(part)
        .map_err(|e| CliError::Usage(e.to_string()))?
        .clone();
    let address = chip_address(cli, config, &chip)?;
    registry
        .validate(part, address)
        .map_err(|e| CliError::Usage(e.to_string()))?;
    Ok(Some((chip, address)))
}

/// Apply power settings and select the target chip on an open programmer.
pub(crate) fn select_target(
    cli: &Cli,
    config: &Config,
    programmer: &mut Programmer<Transport>,
    registry: &ChipRegistry,
) -> Result<ChipModel> {
    let (chip, address) = resolve_chip(cli, config, registry)?.ok_or_else(|| {
        CliError::Usage("No chip selected; pass --chip or set [chip] part in esprog.toml".into())
    })?;

    if let Some(power) = power_settings(cli, config) {
        debug!("Applying power settings: {power:?}");
        programmer.apply_power(&power)?;
    }
    programmer.select_chip_and_address(registry, chip.part, address)?;

    if !cli.quiet {
        eprintln!(
            "{} Target {} at {:#04x}",
            style("ℹ").blue(),
            style(&chip).cyan(),
            address
        );
    }
    Ok(chip)
}

/// Byte progress bar on stderr, hidden in quiet or plain output.
pub(crate) fn progress_bar(cli: &Cli, total: u64, message: &str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message.to_string());
    pb
}

/// Turn a pending Ctrl-C into a cancellation error.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}
