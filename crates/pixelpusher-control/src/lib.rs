//! PixelPusher Control - discovery and paced pixel output
//!
//! This crate finds PixelPusher LED controllers on the local network and
//! streams pixel data to them without overrunning their render loop:
//! - **Discovery**: listens for Universal Discovery Protocol broadcasts on
//!   UDP port 7331 and keeps one [`Controller`] per MAC address
//! - **Telemetry**: repeat broadcasts adjust each controller's sending cadence
//!   and prune its backlog when the device falls behind
//! - **Output**: strip updates are batched into packets and sent no faster
//!   than the update period the device reports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixelpusher_control::{PusherConfig, Registry, RegistryEvent, StripUpdate};
//!
//! # #[tokio::main]
//! # async fn main() -> pixelpusher_control::Result<()> {
//! let registry = Registry::bind(PusherConfig::default()).await?;
//! let mut events = registry.subscribe();
//!
//! if let Ok(RegistryEvent::Discover(controller)) = events.recv().await {
//!     let pixels = vec![0x20; 3 * 240];
//!     controller.refresh(&[StripUpdate::new(0, pixels)])?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Discovery decoding and pixel packet encoding
//! - [`controller`] - Per-device send scheduler
//! - [`registry`] - Discovery listener and stale-controller sweep
//! - [`transport`] - Datagram send and receive seams
//! - [`events`] - Registry and controller events
//! - [`config`] - Configuration
//! - [`logging`] - Logging collaborator and subscriber setup
//! - [`error`] - Error types

/// Configuration
pub mod config;
/// Per-device send scheduler
pub mod controller;
/// Error types
pub mod error;
/// Registry and controller events
pub mod events;
/// Logging collaborator and subscriber setup
pub mod logging;
/// Wire protocol
pub mod protocol;
/// Discovery listener and sweep
pub mod registry;
/// Datagram I/O seams
pub mod transport;

// Re-exports
pub use config::PusherConfig;
pub use controller::{Controller, ControllerOptions};
pub use error::{PusherError, Result};
pub use events::{ControllerEvent, RegistryEvent};
pub use logging::{LogConfig, LogLevel, LogSink, TracingLogSink};
pub use protocol::{
    parse_discovery, DeviceType, DiscoveryRecord, MacAddress, Particulars,
    PixelPusherParticulars, StripUpdate,
};
pub use registry::Registry;
pub use transport::{DatagramSink, DatagramSource};
