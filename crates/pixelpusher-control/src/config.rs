//! Registry configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! listen_port = 7331
//! controller_timeout_ms = 5000
//!
//! [logging]
//! level = "debug"
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::protocol::{DEFAULT_DEVICE_PORT, DISCOVERY_PORT, MAX_UDP_PAYLOAD};
use crate::{error::PusherError, Result};

/// Smallest packet that can carry a sequence number and one strip index
const MIN_PACKET_SIZE: usize = 5;

/// Discovery and output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PusherConfig {
    /// Address the discovery socket binds to
    pub bind_address: IpAddr,
    /// Discovery port
    pub listen_port: u16,
    /// Pixel port for devices that do not advertise one
    pub default_device_port: u16,
    /// Silence after which a controller is dropped
    pub controller_timeout_ms: u64,
    /// Interval of the stale-controller sweep
    pub sweep_interval_ms: u64,
    /// Upper bound for an encoded pixel packet
    pub max_packet_size: usize,
    /// Depth of the event channels
    pub event_capacity: usize,
    pub logging: LogConfig,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DISCOVERY_PORT,
            default_device_port: DEFAULT_DEVICE_PORT,
            controller_timeout_ms: 5_000,
            sweep_interval_ms: 1_000,
            max_packet_size: MAX_UDP_PAYLOAD,
            event_capacity: 64,
            logging: LogConfig::default(),
        }
    }
}

impl PusherConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("PixelPusher");
            p.push("config.toml");
            p
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from [`PusherConfig::default_path`], falling back to defaults when
    /// the file is missing or invalid
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller_timeout_ms == 0 {
            return Err(PusherError::ConfigError(
                "controller_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(PusherError::ConfigError(
                "sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(MIN_PACKET_SIZE..=MAX_UDP_PAYLOAD).contains(&self.max_packet_size) {
            return Err(PusherError::ConfigError(format!(
                "max_packet_size must be between {} and {}",
                MIN_PACKET_SIZE, MAX_UDP_PAYLOAD
            )));
        }
        if self.event_capacity == 0 {
            return Err(PusherError::ConfigError(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }

    pub fn controller_timeout(&self) -> Duration {
        Duration::from_millis(self.controller_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PusherConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:7331".parse().unwrap());
        assert_eq!(config.default_device_port, 9761);
        assert_eq!(config.controller_timeout(), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = PusherConfig::from_toml_str("").unwrap();
        assert_eq!(config, PusherConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = PusherConfig::from_toml_str(
            r#"
            bind_address = "127.0.0.1"
            listen_port = 17331
            max_packet_size = 1460

            [logging]
            level = "debug"
            file_output = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:17331".parse().unwrap());
        assert_eq!(config.max_packet_size, 1460);
        assert_eq!(config.controller_timeout_ms, 5_000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file_output);
        assert!(config.logging.console_output);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PusherConfig::from_toml_str("sweep_interval_ms = 0"),
            Err(PusherError::ConfigError(_))
        ));
        assert!(matches!(
            PusherConfig::from_toml_str("max_packet_size = 4"),
            Err(PusherError::ConfigError(_))
        ));
        assert!(matches!(
            PusherConfig::from_toml_str("listen_port = \"nope\""),
            Err(PusherError::TomlError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "controller_timeout_ms = 2500\n").unwrap();

        let config = PusherConfig::load(&path).unwrap();
        assert_eq!(config.controller_timeout(), Duration::from_millis(2500));

        let missing = PusherConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(PusherError::IoError(_))));
    }
}
