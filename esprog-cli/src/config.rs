//! Configuration file support for esprog.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESPROG_*)
//! 3. Local config file (./esprog.toml)
//! 4. Global config file (~/.config/esprog/config.toml)

use directories::ProjectDirs;
use esprog::{IoVoltage, PowerMode, ProtocolRevision, VddVoltage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "esprog.toml";

/// Serial port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate override.
    pub baud: Option<u32>,
}

/// Target chip configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChipConfig {
    /// Part number, e.g. "NU1708".
    pub part: Option<String>,
    /// Bus address, e.g. "0x51".
    pub address: Option<String>,
}

/// Target supply configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerConfig {
    /// VDD switching mode.
    pub vdd_mode: Option<PowerMode>,
    /// VDD voltage.
    pub vdd_voltage: Option<VddVoltage>,
    /// Bus I/O level.
    pub io_voltage: Option<IoVoltage>,
}

/// Protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Firmware dialect of the programmer.
    pub revision: Option<ProtocolRevision>,
    /// Frames buffered between the receive thread and the dispatcher.
    pub queue_depth: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Serial port.
    #[serde(default)]
    pub port: PortConfig,
    /// Target chip.
    #[serde(default)]
    pub chip: ChipConfig,
    /// Target supply.
    #[serde(default)]
    pub power: PowerConfig,
    /// Protocol.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Invalid TOML in config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "esprog").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields of `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.port.serial, other.port.serial);
        take(&mut self.port.baud, other.port.baud);
        take(&mut self.chip.part, other.chip.part);
        take(&mut self.chip.address, other.chip.address);
        take(&mut self.power.vdd_mode, other.power.vdd_mode);
        take(&mut self.power.vdd_voltage, other.power.vdd_voltage);
        take(&mut self.power.io_voltage, other.power.io_voltage);
        take(&mut self.protocol.revision, other.protocol.revision);
        take(&mut self.protocol.queue_depth, other.protocol.queue_depth);
    }

    /// Remember `serial` as the preferred port in the local config file.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<()> {
        let path = Path::new(LOCAL_CONFIG);
        let mut stored = Self::load_from_file(path).unwrap_or_default();
        stored.port.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&stored)?;
        fs::write(path, content)?;
        self.port.serial = Some(serial.to_string());
        info!("Saved port {serial} to {}", path.display());

        Ok(())
    }
}
