//! Events published to subscribers
//!
//! Both the registry and each controller expose a `subscribe()` method
//! returning a `tokio::sync::broadcast` receiver. Publishing with no
//! subscribers is not an error.

use std::sync::Arc;

use crate::controller::Controller;
use crate::error::PusherError;

/// Registry level events
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was seen for the first time
    Discover(Arc<Controller>),
    /// The discovery socket reported an error; listening continues
    Error(Arc<PusherError>),
}

/// Per-controller events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Telemetry was applied
    Update,
    /// The device went silent and was removed from the registry
    Timeout,
}
