//! Error types for discovery and pixel output
use thiserror::Error;

use crate::protocol::{DeviceType, MacAddress};

/// PixelPusher control errors
#[derive(Error, Debug)]
pub enum PusherError {
    /// Datagram too short to carry a discovery header
    #[error("Malformed packet: {len} octets (need at least {min})")]
    MalformedPacket { len: usize, min: usize },

    /// Operation only valid for PixelPusher controllers
    #[error("Unsupported device {mac} ({device_type:?})")]
    UnsupportedDevice {
        mac: MacAddress,
        device_type: DeviceType,
    },

    /// Controller was removed from the registry
    #[error("Controller {mac} has been retired")]
    Retired { mac: MacAddress },

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    ConfigError(String),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type for PixelPusher operations
pub type Result<T> = std::result::Result<T, PusherError>;
