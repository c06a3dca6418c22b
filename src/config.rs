//! # Application Configuration
//!
//! Recognized options, their defaults, JSON file loading and the
//! process-wide frozen snapshot. The backend choice is read once at
//! startup (file, then the `LORA_BACKEND` environment variable) and never
//! changes for the lifetime of the process.
//!
//! ```json
//! {
//!   "lora_backend": "sx1276",
//!   "spi_bus": "spidev0.0",
//!   "frequency_hz": 915000000,
//!   "beacon": { "message": "BEACON", "interval_ms": 5000 },
//!   "echo": { "prefix": "ECHO:", "delay_ms": 150 }
//! }
//! ```

use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::radio::RadioConfig;

/// Environment variable overriding the configured backend.
pub const BACKEND_ENV: &str = "LORA_BACKEND";

/// Which radio drives the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Register-level SX1276 over SPI (Dragino HAT).
    Sx1276,
    /// RN2903 modem over a serial port.
    Rn2903,
}

impl std::str::FromStr for Backend {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sx1276" => Ok(Backend::Sx1276),
            "rn2903" => Ok(Backend::Rn2903),
            other => Err(LinkError::InvalidParam(format!(
                "unknown backend {other:?} (expected sx1276 or rn2903)"
            ))),
        }
    }
}

/// Beacon defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub message: String,
    pub interval_ms: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            message: "BEACON".to_string(),
            interval_ms: 5000,
        }
    }
}

/// Echo responder defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    pub prefix: String,
    pub delay_ms: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            prefix: "ECHO:".to_string(),
            delay_ms: 150,
        }
    }
}

/// Every recognized option with its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub lora_backend: Backend,
    pub serial_port: String,
    pub spi_bus: String,
    pub spi_speed_hz: u32,
    pub reset_pin: u8,
    pub cs_pin: u8,
    pub dio0_pin: u8,
    pub frequency_hz: u32,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate: u8,
    pub tx_power_dbm: u8,
    pub sync_word: u8,
    pub beacon: BeaconConfig,
    pub echo: EchoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let radio = RadioConfig::default();
        Self {
            lora_backend: Backend::Rn2903,
            serial_port: "/dev/ttyACM0".to_string(),
            spi_bus: "spidev0.0".to_string(),
            spi_speed_hz: 8_000_000,
            reset_pin: 17,
            cs_pin: 25,
            dio0_pin: 4,
            frequency_hz: radio.frequency_hz,
            spreading_factor: radio.spreading_factor,
            bandwidth_hz: radio.bandwidth_hz,
            coding_rate: radio.coding_rate,
            tx_power_dbm: radio.tx_power_dbm,
            sync_word: radio.sync_word,
            beacon: BeaconConfig::default(),
            echo: EchoConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, or start from defaults when no file is
    /// given. The `LORA_BACKEND` environment variable wins over both.
    pub fn load(path: Option<&Path>) -> Result<Self, LinkError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| LinkError::io("config read", e))?;
                serde_json::from_str(&text)
                    .map_err(|e| LinkError::InvalidParam(format!("config parse: {e}")))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.radio_config().validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) -> Result<(), LinkError> {
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            self.lora_backend = value.parse()?;
        }
        Ok(())
    }

    /// The radio-parameter subset handed to the selected backend.
    pub fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            frequency_hz: self.frequency_hz,
            spreading_factor: self.spreading_factor,
            bandwidth_hz: self.bandwidth_hz,
            coding_rate: self.coding_rate,
            tx_power_dbm: self.tx_power_dbm,
            sync_word: self.sync_word,
            ..RadioConfig::default()
        }
    }
}

static GLOBAL: OnceCell<AppConfig> = OnceCell::new();

/// Freeze the configuration for the process. Later calls are ignored;
/// the first snapshot wins.
pub fn init_global(config: AppConfig) -> &'static AppConfig {
    GLOBAL.get_or_init(|| config)
}

/// The frozen process configuration (defaults if never initialized).
pub fn global() -> &'static AppConfig {
    GLOBAL.get_or_init(AppConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.lora_backend, Backend::Rn2903);
        assert_eq!(config.serial_port, "/dev/ttyACM0");
        assert_eq!(config.spi_bus, "spidev0.0");
        assert_eq!(config.spi_speed_hz, 8_000_000);
        assert_eq!(
            (config.reset_pin, config.cs_pin, config.dio0_pin),
            (17, 25, 4)
        );
        assert_eq!(config.frequency_hz, 915_000_000);
        assert_eq!(config.beacon.message, "BEACON");
        assert_eq!(config.beacon.interval_ms, 5000);
        assert_eq!(config.echo.prefix, "ECHO:");
        assert_eq!(config.echo.delay_ms, 150);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"lora_backend": "sx1276", "spreading_factor": 9}"#).unwrap();
        assert_eq!(config.lora_backend, Backend::Sx1276);
        assert_eq!(config.spreading_factor, 9);
        assert_eq!(config.bandwidth_hz, 125_000);
        assert_eq!(config.echo.delay_ms, 150);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("sx1276".parse::<Backend>().unwrap(), Backend::Sx1276);
        assert_eq!("RN2903".parse::<Backend>().unwrap(), Backend::Rn2903);
        assert!("lr1110".parse::<Backend>().is_err());
    }
}
