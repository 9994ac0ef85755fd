//! Discovery socket listener

use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::RegistryInner;
use crate::controller::Controller;
use crate::error::PusherError;
use crate::events::RegistryEvent;
use crate::protocol::{parse_discovery_with_port, MacAddress, MAX_UDP_PAYLOAD};
use crate::transport::DatagramSource;

/// Pause after a failed receive so a persistent socket error does not spin
pub(crate) const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receive datagrams until the task is aborted. Socket errors are reported
/// and listening continues after [`RECV_ERROR_BACKOFF`].
pub(super) async fn run<S: DatagramSource>(inner: Arc<RegistryInner>, source: Arc<S>) {
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];

    loop {
        match source.recv_datagram(&mut buf).await {
            Ok((len, from)) => dispatch(&inner, &buf[..len], from),
            Err(e) => {
                inner.logger.error(
                    "PixelPusher error",
                    Some(&json!({ "error": e.to_string() })),
                );
                let _ = inner
                    .events
                    .send(RegistryEvent::Error(Arc::new(PusherError::from(e))));
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Route one datagram to a new or an existing controller
pub(super) fn dispatch(inner: &RegistryInner, datagram: &[u8], from: SocketAddr) {
    let mac = match MacAddress::from_datagram(datagram) {
        Ok(mac) => mac,
        Err(_) => {
            inner.logger.debug(
                &format!("message too short ({} octets)", datagram.len()),
                Some(&json!({ "from": from.to_string() })),
            );
            return;
        }
    };

    let existing = inner.controllers.read().get(&mac).cloned();
    if let Some(controller) = existing {
        if let Err(e) = controller.apply_telemetry(datagram) {
            inner.logger.debug(
                "telemetry dropped",
                Some(&json!({ "mac": mac.to_string(), "error": e.to_string() })),
            );
        }
        return;
    }

    let record = match parse_discovery_with_port(datagram, inner.config.default_device_port) {
        Ok(record) => record,
        Err(e) => {
            inner.logger.debug(
                "discovery dropped",
                Some(&json!({ "from": from.to_string(), "error": e.to_string() })),
            );
            return;
        }
    };
    let details = serde_json::to_value(&record).ok();

    let controller = {
        let mut controllers = inner.controllers.write();
        match controllers.entry(mac) {
            // Raced with another dispatch for the same device
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => slot
                .insert(Controller::new(record, inner.controller_options()))
                .clone(),
        }
    };

    inner
        .logger
        .notice(&format!("discovered {}", mac), details.as_ref());
    let _ = inner.events.send(RegistryEvent::Discover(controller));
}
