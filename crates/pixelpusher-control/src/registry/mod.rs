//! Controller registry
//!
//! The [`Registry`] owns the UDP socket. One task listens for discovery
//! datagrams and turns them into [`Controller`]s or telemetry updates, a
//! second task sweeps out controllers that have gone silent. Controllers send
//! their pixel packets through the same socket.
//!
//! ```rust,no_run
//! use pixelpusher_control::{PusherConfig, Registry, RegistryEvent, StripUpdate};
//!
//! # async fn run() -> pixelpusher_control::Result<()> {
//! let registry = Registry::bind(PusherConfig::default()).await?;
//! let mut events = registry.subscribe();
//!
//! while let Ok(event) = events.recv().await {
//!     if let RegistryEvent::Discover(controller) = event {
//!         controller.refresh(&[StripUpdate::new(0, vec![0xff; 3 * 240])])?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod listener;
mod sweeper;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::PusherConfig;
use crate::controller::{Controller, ControllerOptions};
use crate::events::RegistryEvent;
use crate::logging::{LogSink, TracingLogSink};
use crate::protocol::MacAddress;
use crate::Result;

pub(crate) struct RegistryInner {
    pub(crate) config: PusherConfig,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) controllers: RwLock<HashMap<MacAddress, Arc<Controller>>>,
    pub(crate) events: broadcast::Sender<RegistryEvent>,
    pub(crate) logger: Arc<dyn LogSink>,
}

impl RegistryInner {
    pub(crate) fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            sink: self.socket.clone(),
            logger: self.logger.clone(),
            max_packet_size: self.config.max_packet_size,
            event_capacity: self.config.event_capacity,
        }
    }
}

/// Discovered controllers, keyed by MAC address
pub struct Registry {
    inner: Arc<RegistryInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    /// Bind the discovery socket and start listening and sweeping
    pub async fn bind(config: PusherConfig) -> Result<Self> {
        Self::bind_with_logger(config, Arc::new(TracingLogSink)).await
    }

    pub async fn bind_with_logger(config: PusherConfig, logger: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(config.listen_addr()).await?;
        socket.set_broadcast(true)?;
        let local = socket.local_addr()?;
        logger.info(
            &format!("PixelPusher listening on udp://*:{}", local.port()),
            None,
        );

        let (events, _) = broadcast::channel(config.event_capacity);
        let inner = Arc::new(RegistryInner {
            config,
            socket: Arc::new(socket),
            controllers: RwLock::new(HashMap::new()),
            events,
            logger,
        });

        let tasks = vec![
            tokio::spawn(listener::run(inner.clone(), inner.socket.clone())),
            tokio::spawn(sweeper::run(inner.clone())),
        ];

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Address of the discovery socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn config(&self) -> &PusherConfig {
        &self.inner.config
    }

    pub fn get(&self, mac: &MacAddress) -> Option<Arc<Controller>> {
        self.inner.controllers.read().get(mac).cloned()
    }

    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        self.inner.controllers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.controllers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.controllers.read().is_empty()
    }

    /// Handle one datagram as if it had arrived on the discovery socket
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        listener::dispatch(&self.inner, datagram, from);
    }

    /// Evict controllers silent for longer than the configured timeout,
    /// returning their MAC addresses
    pub fn sweep(&self) -> Vec<MacAddress> {
        sweeper::sweep(&self.inner)
    }

    /// Remove a controller, cancelling its timer first
    pub fn remove(&self, mac: &MacAddress) -> Option<Arc<Controller>> {
        let mut controllers = self.inner.controllers.write();
        let controller = controllers.get(mac)?.clone();
        controller.retire();
        controllers.remove(mac)
    }

    /// Stop listening and sweeping and retire every controller
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let mut controllers = self.inner.controllers.write();
        for controller in controllers.values() {
            controller.retire();
        }
        let count = controllers.len();
        controllers.clear();

        if count > 0 {
            self.inner.logger.info(
                "PixelPusher registry shut down",
                Some(&json!({ "retired": count })),
            );
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
