use clap::ArgMatches;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modbus::constants::{MAX_DEVICE_ID, MIN_DEVICE_ID};
use crate::services::rtu_server::inter_frame_gap;
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Connection settings
    pub serial_port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    // Silence that ends a frame; derived from the baud rate when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_timeout_us: Option<u64>,

    pub server: ServerConfig,
    pub registers: RegisterMapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub device_id: u8,
    pub accept_broadcast: bool,
}

/// Address layout of the in-memory device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMapConfig {
    pub coils: BlockConfig,
    pub discrete_inputs: BlockConfig,
    pub holding_registers: BlockConfig,
    pub input_registers: BlockConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub start: u16,
    pub count: u16,
}

impl BlockConfig {
    pub fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    fn validate(&self, name: &str) -> Result<(), ModbusError> {
        if self.start as u32 + self.count as u32 > 0x1_0000 {
            return Err(ModbusError::ConfigError(format!(
                "{} block {}+{} runs past address 0xFFFF",
                name, self.start, self.count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

impl std::str::FromStr for ParityConfig {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(ParityConfig::None),
            "even" | "e" => Ok(ParityConfig::Even),
            "odd" | "o" => Ok(ParityConfig::Odd),
            other => Err(ModbusError::ConfigError(format!("Unknown parity: {}", other))),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            accept_broadcast: false,
        }
    }
}

impl Default for RegisterMapConfig {
    fn default() -> Self {
        Self {
            coils: BlockConfig::new(0, 64),
            discrete_inputs: BlockConfig::new(0, 64),
            holding_registers: BlockConfig::new(0, 128),
            input_registers: BlockConfig::new(0, 128),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyS0".to_string(),
            baud_rate: 9600,
            parity: ParityConfig::Even,
            frame_timeout_us: None,
            server: ServerConfig::default(),
            registers: RegisterMapConfig::default(),
        }
    }
}

impl Config {
    /// Load `--config` if given, then apply command line overrides.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, ModbusError> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = matches.get_one::<String>("port") {
            config.serial_port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            config.baud_rate = baud
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid baud rate: {}", baud)))?;
        }
        if let Some(parity) = matches.get_one::<String>("parity") {
            config.parity = parity.parse()?;
        }
        if let Some(device_id) = matches.get_one::<String>("device-id") {
            config.server.device_id = device_id.parse().map_err(|_| {
                ModbusError::ConfigError(format!("Invalid device id: {}", device_id))
            })?;
        }
        if matches.get_flag("broadcast") {
            config.server.accept_broadcast = true;
        }

        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ModbusError::ConfigError(format!("Cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("📄 Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read timeout that delimits RTU frames.
    pub fn frame_timeout(&self) -> Duration {
        match self.frame_timeout_us {
            Some(us) => Duration::from_micros(us.max(1)),
            None => inter_frame_gap(self.baud_rate),
        }
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        let id = self.server.device_id;
        if !(MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&id) {
            return Err(ModbusError::ConfigError(format!(
                "Device id {} outside {}..={}",
                id, MIN_DEVICE_ID, MAX_DEVICE_ID
            )));
        }
        if self.serial_port.trim().is_empty() {
            return Err(ModbusError::ConfigError("Serial port is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::ConfigError("Baud rate must be positive".to_string()));
        }

        self.registers.coils.validate("coils")?;
        self.registers.discrete_inputs.validate("discrete_inputs")?;
        self.registers.holding_registers.validate("holding_registers")?;
        self.registers.input_registers.validate("input_registers")?;
        Ok(())
    }
}
