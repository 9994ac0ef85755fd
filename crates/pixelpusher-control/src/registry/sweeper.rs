//! Stale controller eviction

use std::sync::Arc;

use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};

use super::RegistryInner;
use crate::protocol::MacAddress;

pub(super) async fn run(inner: Arc<RegistryInner>) {
    let mut interval = tokio::time::interval(inner.config.sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        sweep(&inner);
    }
}

/// Evict every controller silent for longer than the timeout. Each one has
/// its timer cancelled and is told about the timeout before it leaves the map.
pub(super) fn sweep(inner: &RegistryInner) -> Vec<MacAddress> {
    let now = Instant::now();
    let timeout = inner.config.controller_timeout();

    let mut controllers = inner.controllers.write();
    let expired: Vec<MacAddress> = controllers
        .iter()
        .filter(|(_, c)| now.saturating_duration_since(c.last_updated()) > timeout)
        .map(|(mac, _)| *mac)
        .collect();

    for mac in &expired {
        if let Some(controller) = controllers.get(mac) {
            controller.retire();
            controller.notify_timeout();
        }
        controllers.remove(mac);
        inner.logger.info(
            &format!("controller {} timed out", mac),
            Some(&json!({ "timeout_ms": inner.config.controller_timeout_ms })),
        );
    }

    expired
}
