//! Configuration for the car server
//!
//! Loads the listener, control-layer and board settings from a TOML file.
//! Every section and field is optional; missing values take their defaults.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use super::{
    connection::server::ServerConfig,
    controllers::{CarConfig, ShieldConfig},
    math::Bounds,
};

/// Longest accepted ultrasonic read bound.
pub const MAX_DISTANCE_TIMEOUT_MS: u64 = 10_000;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub car: CarConfig,
    pub shield: ShieldConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error); `RUST_LOG` wins.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use rcar_core::utils::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("car.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the control layer cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let car = &self.car;
        for (name, bounds) in [
            ("car.steering", car.steering),
            ("car.camera_pan", car.camera_pan),
            ("car.camera_tilt", car.camera_tilt),
        ] {
            check_centered(name, bounds)?;
        }

        let hz = car.buzzer_hz;
        if !hz.is_valid() || hz.min < 1 || hz.max > i32::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "car.buzzer_hz must lie within 1..=65535, got {}..={}",
                hz.min, hz.max
            )));
        }
        if car.distance_timeout_ms > MAX_DISTANCE_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "car.distance_timeout_ms must not exceed {MAX_DISTANCE_TIMEOUT_MS}, got {}",
                car.distance_timeout_ms
            )));
        }
        if car.max_duty == 0 {
            return Err(ConfigError::Invalid("car.max_duty must be non-zero".into()));
        }

        let server = &self.server;
        if server.max_line_length == 0 {
            return Err(ConfigError::Invalid(
                "server.max_line_length must be non-zero".into(),
            ));
        }
        if server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "server.max_connections must be non-zero".into(),
            ));
        }
        if !(0x03..=0x77).contains(&self.shield.address) {
            return Err(ConfigError::Invalid(format!(
                "shield.address 0x{:02X} is not a 7-bit device address",
                self.shield.address
            )));
        }
        Ok(())
    }
}

/// Angle ranges must be ordered and contain the neutral position.
fn check_centered(
    name: &str,
    bounds: Bounds,
) -> Result<(), ConfigError> {
    if bounds.is_valid() && bounds.contains(0) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must satisfy min <= 0 <= max, got {}..={}",
            bounds.min, bounds.max
        )))
    }
}
