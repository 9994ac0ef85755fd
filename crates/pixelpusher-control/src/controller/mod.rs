//! Discovered controllers and their send scheduler
//!
//! Each [`Controller`] owns the telemetry of one device, a FIFO of encoded
//! pixel packets and at most one pending timer. Packets leave the queue no
//! faster than the update period the device reports for itself:
//!
//! - [`Controller::refresh`] batches strip updates into packets and queues
//!   them, starting the scheduler if it is idle.
//! - [`Controller::sync`] sends the head of the queue once the next update is
//!   due and re-arms the timer while packets remain.
//! - [`Controller::trim`] drops queued packets whose strips are all sent again
//!   later, used when the device reports that it is falling behind.
//!
//! All state sits behind one mutex, so a send and a trim never interleave.
//! Timers are tokio tasks tagged with a generation number; re-arming aborts
//! the previous task and a task that fires with a stale generation does
//! nothing.

mod queue;

pub use queue::OutboundQueue;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::events::ControllerEvent;
use crate::logging::{LogSink, TracingLogSink};
use crate::protocol::{
    adjust_cadence, encode_packets, parse_telemetry, CadenceAdjustment, DiscoveryRecord,
    MacAddress, StripUpdate, MAX_UDP_PAYLOAD,
};
use crate::transport::DatagramSink;
use crate::{error::PusherError, Result};

/// Collaborators and limits shared by the controllers of one registry
#[derive(Clone)]
pub struct ControllerOptions {
    pub sink: Arc<dyn DatagramSink>,
    pub logger: Arc<dyn LogSink>,
    /// Upper bound for an encoded pixel packet
    pub max_packet_size: usize,
    /// Depth of the per-controller event channel
    pub event_capacity: usize,
}

impl ControllerOptions {
    pub fn new(sink: Arc<dyn DatagramSink>) -> Self {
        Self {
            sink,
            logger: Arc::new(TracingLogSink),
            max_packet_size: MAX_UDP_PAYLOAD,
            event_capacity: 64,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct ControllerState {
    record: DiscoveryRecord,
    last_updated: Instant,
    next_update: Instant,
    sequence_number: u32,
    queue: OutboundQueue,
    timer: Option<ArmedTimer>,
    timer_generation: u64,
    retired: bool,
}

impl ControllerState {
    fn update_period(&self) -> Duration {
        self.record
            .pixel_pusher()
            .map(|p| p.update_period)
            .unwrap_or_default()
    }

    fn destination(&self) -> SocketAddr {
        let port = self
            .record
            .pixel_pusher()
            .map(|p| p.my_port)
            .unwrap_or(crate::protocol::DEFAULT_DEVICE_PORT);
        SocketAddr::new(IpAddr::V4(self.record.ip_address), port)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

/// A discovered device
pub struct Controller {
    mac: MacAddress,
    options: ControllerOptions,
    events: broadcast::Sender<ControllerEvent>,
    state: Mutex<ControllerState>,
    this: Weak<Controller>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Controller")
            .field("mac", &self.mac)
            .field("destination", &state.destination())
            .field("device_type", &state.record.device_type)
            .field("queued", &state.queue.len())
            .field("waiting", &state.timer.is_some())
            .finish()
    }
}

impl Controller {
    /// Create a controller from its first discovery datagram.
    ///
    /// The first packet is held back for one update period, aligning it with
    /// the cadence the device reported.
    pub fn new(record: DiscoveryRecord, options: ControllerOptions) -> Arc<Self> {
        let now = Instant::now();
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        Arc::new_cyclic(|this| {
            let mut state = ControllerState {
                record,
                last_updated: now,
                next_update: now,
                sequence_number: 0,
                queue: OutboundQueue::new(),
                timer: None,
                timer_generation: 0,
                retired: false,
            };
            state.next_update = now + state.update_period();

            Self {
                mac: state.record.mac_address,
                options,
                events,
                state: Mutex::new(state),
                this: this.clone(),
            }
        })
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Snapshot of the current telemetry
    pub fn record(&self) -> DiscoveryRecord {
        self.state.lock().record.clone()
    }

    pub fn is_pixel_pusher(&self) -> bool {
        self.state.lock().record.pixel_pusher().is_some()
    }

    /// Address pixel packets are sent to
    pub fn destination(&self) -> SocketAddr {
        self.state.lock().destination()
    }

    /// Current pacing interval
    pub fn update_period(&self) -> Duration {
        self.state.lock().update_period()
    }

    pub fn last_updated(&self) -> Instant {
        self.state.lock().last_updated
    }

    pub fn next_update(&self) -> Instant {
        self.state.lock().next_update
    }

    /// Sequence number of the most recently encoded packet
    pub fn sequence_number(&self) -> u32 {
        self.state.lock().sequence_number
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Sequence numbers of the queued packets, head first
    pub fn queued_sequence_numbers(&self) -> Vec<u32> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|m| m.sequence_number)
            .collect()
    }

    /// A timer is armed, i.e. the scheduler is waiting for the next slot
    pub fn is_waiting(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// Removed from its registry; no further packets are queued or sent
    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Queue new pixel data for sending.
    ///
    /// Returns the number of packets queued. Nothing is sent from inside this
    /// call; if the scheduler is idle, [`Controller::sync`] is scheduled for
    /// the moment the next update is due (immediately if it already is).
    pub fn refresh(&self, strips: &[StripUpdate]) -> Result<usize> {
        let mut state = self.state.lock();

        if state.retired {
            return Err(PusherError::Retired { mac: self.mac });
        }
        let Some(strips_per_packet) = state.record.pixel_pusher().map(|p| p.strips_per_packet)
        else {
            return Err(PusherError::UnsupportedDevice {
                mac: self.mac,
                device_type: state.record.device_type,
            });
        };

        let packets = encode_packets(
            strips,
            strips_per_packet,
            self.options.max_packet_size,
            &mut state.sequence_number,
        );
        let count = packets.len();
        state.queue.extend(packets);

        if state.timer.is_none() && !state.queue.is_empty() {
            // Start the scheduler from the timer, even when a slot is due now
            let delay = state.next_update.saturating_duration_since(Instant::now());
            self.arm_timer(&mut state, delay);
        }
        Ok(count)
    }

    /// Run one step of the send scheduler.
    ///
    /// Before the next update is due this only arms the timer for the
    /// remaining time. Otherwise the head of the queue is sent, the next
    /// update is set one update period from now, and the timer is armed for
    /// that period while packets remain.
    pub fn sync(&self) {
        let mut state = self.state.lock();
        self.sync_locked(&mut state);
    }

    /// Drop queued packets fully superseded by later ones, returning how many
    /// were dropped
    pub fn trim(&self) -> usize {
        self.state.lock().queue.trim()
    }

    /// Apply a repeat discovery datagram from this device.
    ///
    /// Only PixelPusher devices are paced, so for other device types this just
    /// records that the device is still alive and returns `Ok(None)`.
    pub fn apply_telemetry(&self, datagram: &[u8]) -> Result<Option<CadenceAdjustment>> {
        let telemetry = parse_telemetry(datagram)?;

        let mut state = self.state.lock();
        if state.retired {
            return Ok(None);
        }
        let now = Instant::now();
        if state.record.pixel_pusher().is_none() {
            state.last_updated = now;
            return Ok(None);
        }

        let adjustment = adjust_cadence(telemetry.update_period, telemetry.delta_sequence);
        if let Some(pusher) = state.record.pixel_pusher_mut() {
            pusher.update_period = adjustment.update_period;
            pusher.power_total = telemetry.power_total;
            pusher.delta_sequence = telemetry.delta_sequence;
        }

        if adjustment.trim_backlog {
            let dropped = state.queue.trim();
            if dropped > 0 {
                self.options.logger.debug(
                    "trimmed backlog",
                    Some(&json!({
                        "mac": self.mac.to_string(),
                        "dropped": dropped,
                        "remaining": state.queue.len(),
                        "delta_sequence": telemetry.delta_sequence,
                    })),
                );
            }
        }

        state.last_updated = now;
        let candidate = now + adjustment.update_period;
        if candidate > state.next_update {
            state.next_update = candidate;
        }

        if state.timer.is_some() {
            state.cancel_timer();
            self.sync_locked(&mut state);
        }
        drop(state);

        let _ = self.events.send(ControllerEvent::Update);
        Ok(Some(adjustment))
    }

    /// Cancel the timer, drop the backlog and refuse further work.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.retired = true;
        state.cancel_timer();
        state.queue.clear();
    }

    pub(crate) fn notify_timeout(&self) {
        let _ = self.events.send(ControllerEvent::Timeout);
    }

    fn sync_locked(&self, state: &mut ControllerState) {
        if state.retired || state.queue.is_empty() {
            state.cancel_timer();
            return;
        }

        let now = Instant::now();
        if now < state.next_update {
            let delay = state.next_update - now;
            self.arm_timer(state, delay);
            return;
        }

        state.cancel_timer();
        let Some(message) = state.queue.pop() else {
            return;
        };

        let target = state.destination();
        if let Err(e) = self.options.sink.send_datagram(&message.bytes, target) {
            self.options.logger.warning(
                "pixel packet send failed",
                Some(&json!({
                    "mac": self.mac.to_string(),
                    "target": target.to_string(),
                    "sequence": message.sequence_number,
                    "error": e.to_string(),
                })),
            );
        }

        let period = state.update_period();
        state.next_update = now + period;
        if !state.queue.is_empty() {
            self.arm_timer(state, period);
        }
    }

    fn arm_timer(&self, state: &mut ControllerState, delay: Duration) {
        state.cancel_timer();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.options.logger.error(
                "no tokio runtime, send timer not armed",
                Some(&json!({ "mac": self.mac.to_string() })),
            );
            return;
        };

        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        let this = self.this.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = this.upgrade() {
                controller.on_timer(generation);
            }
        });
        state.timer = Some(ArmedTimer { generation, handle });
    }

    fn on_timer(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.timer.as_ref().map(|t| t.generation) != Some(generation) {
            return;
        }
        // Firing task is finishing on its own
        state.timer = None;
        self.sync_locked(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::protocol::parse_discovery;
    use std::io;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Instant, Vec<u8>, SocketAddr)>>,
    }

    impl DatagramSink for Recorder {
        fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
            self.sent
                .lock()
                .push((Instant::now(), payload.to_vec(), target));
            Ok(payload.len())
        }
    }

    fn datagram(device_type: u8, strips_per_packet: u8, period_us: u32, delta: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 54];
        bytes[0..6].copy_from_slice(&[0, 4, 0xa3, 0, 0, 1]);
        bytes[6..10].copy_from_slice(&[10, 0, 0, 7]);
        bytes[10] = device_type;
        bytes[24] = 8;
        bytes[25] = strips_per_packet;
        bytes[28..32].copy_from_slice(&period_us.to_le_bytes());
        bytes[36..40].copy_from_slice(&delta.to_le_bytes());
        bytes[52..54].copy_from_slice(&9897u16.to_le_bytes());
        bytes
    }

    fn controller(strips_per_packet: u8, period_us: u32) -> (Arc<Controller>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let record = parse_discovery(&datagram(2, strips_per_packet, period_us, 0)).unwrap();
        let controller = Controller::new(record, ControllerOptions::new(recorder.clone()));
        (controller, recorder)
    }

    fn strips(indices: &[u8]) -> Vec<StripUpdate> {
        indices
            .iter()
            .map(|&i| StripUpdate::new(i, vec![i; 6]))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_queues_without_sending() {
        let (controller, recorder) = controller(4, 100_000);

        let queued = controller.refresh(&strips(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9])).unwrap();

        assert_eq!(queued, 3);
        assert_eq!(controller.queue_len(), 3);
        assert_eq!(controller.sequence_number(), 3);
        assert_eq!(controller.queued_sequence_numbers(), vec![1, 2, 3]);
        assert!(controller.is_waiting());
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_send_waits_for_update_period() {
        let (controller, recorder) = controller(1, 100_000);
        let start = Instant::now();

        controller.refresh(&strips(&[0])).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0 - start >= Duration::from_millis(100));
        assert_eq!(sent[0].2, "10.0.0.7:9897".parse().unwrap());
        assert!(!controller.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_paces_sends() {
        let (controller, recorder) = controller(1, 100_000);
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.refresh(&strips(&[0, 1, 2])).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= Duration::from_millis(100), "gap {:?}", gap);
            assert!(gap < Duration::from_millis(105), "gap {:?}", gap);
        }
        let sequences: Vec<u8> = sent.iter().map(|s| s.1[0]).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(!controller.is_waiting());
        assert_eq!(controller.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_never_sends_inline() {
        let (controller, recorder) = controller(1, 10_000);
        tokio::time::sleep(Duration::from_millis(50)).await;

        controller.refresh(&strips(&[0])).unwrap();
        assert!(recorder.sent.lock().is_empty());
        assert!(controller.is_waiting());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_while_waiting_does_not_rearm() {
        let (controller, recorder) = controller(1, 100_000);
        controller.refresh(&strips(&[0])).unwrap();
        let deadline = controller.next_update();

        tokio::time::sleep(Duration::from_millis(40)).await;
        controller.refresh(&strips(&[1])).unwrap();
        assert_eq!(controller.next_update(), deadline);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(recorder.sent.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_tightens_cadence() {
        let (controller, _) = controller(1, 2_000);
        let adj = controller
            .apply_telemetry(&datagram(2, 1, 2_000, 0))
            .unwrap()
            .unwrap();

        assert_eq!(adj.update_period, Duration::from_millis(1));
        assert_eq!(controller.update_period(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_backlog_trims_queue() {
        let (controller, _) = controller(4, 20_000);
        let mut rx = controller.subscribe();

        controller.refresh(&strips(&[0, 1])).unwrap();
        controller.refresh(&strips(&[0, 1])).unwrap();
        controller.refresh(&strips(&[0, 1])).unwrap();
        assert_eq!(controller.queue_len(), 3);

        let adj = controller
            .apply_telemetry(&datagram(2, 4, 20_000, 7))
            .unwrap()
            .unwrap();

        assert!(adj.trim_backlog);
        assert_eq!(controller.update_period(), Duration::from_millis(25));
        assert_eq!(controller.queued_sequence_numbers(), vec![3]);
        assert!(controller.is_waiting());
        assert_eq!(rx.try_recv().unwrap(), ControllerEvent::Update);

        let record = controller.record();
        assert_eq!(record.pixel_pusher().unwrap().delta_sequence, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_small_delta_keeps_queue() {
        let (controller, _) = controller(4, 20_000);
        controller.refresh(&strips(&[0])).unwrap();
        controller.refresh(&strips(&[0])).unwrap();

        controller
            .apply_telemetry(&datagram(2, 4, 20_000, 3))
            .unwrap();

        assert_eq!(controller.update_period(), Duration::from_millis(20));
        assert_eq!(controller.queue_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_update_never_moves_back() {
        let (controller, _) = controller(1, 100_000);
        let before = controller.next_update();

        controller
            .apply_telemetry(&datagram(2, 1, 10_000, 3))
            .unwrap();

        assert_eq!(controller.next_update(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_pixel_pusher_is_not_paced() {
        let recorder = Arc::new(Recorder::default());
        let record = parse_discovery(&datagram(0, 1, 0, 0)).unwrap();
        let controller = Controller::new(record, ControllerOptions::new(recorder));

        let err = controller.refresh(&strips(&[0])).unwrap_err();
        assert!(matches!(err, PusherError::UnsupportedDevice { .. }));
        assert!(controller
            .apply_telemetry(&datagram(0, 1, 0, 9))
            .unwrap()
            .is_none());
        assert!(!controller.is_pixel_pusher());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_cancels_timer() {
        let (controller, recorder) = controller(1, 50_000);
        controller.refresh(&strips(&[0, 1])).unwrap();
        assert!(controller.is_waiting());

        controller.retire();
        assert!(!controller.is_waiting());
        assert!(controller.is_retired());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(recorder.sent.lock().is_empty());
        assert!(matches!(
            controller.refresh(&strips(&[0])),
            Err(PusherError::Retired { .. })
        ));
    }

    struct FailingSink;

    impl DatagramSink for FailingSink {
        fn send_datagram(&self, _payload: &[u8], _target: SocketAddr) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "socket buffer full"))
        }
    }

    #[derive(Default)]
    struct Warnings(Mutex<Vec<String>>);

    impl LogSink for Warnings {
        fn log(&self, level: LogLevel, message: &str, _details: Option<&serde_json::Value>) {
            if level == LogLevel::Warning {
                self.0.lock().push(message.to_string());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sends_are_logged_and_pacing_continues() {
        let warnings = Arc::new(Warnings::default());
        let record = parse_discovery(&datagram(2, 4, 10_000, 0)).unwrap();
        // Room for two 6-byte strips per packet
        let options = ControllerOptions::new(Arc::new(FailingSink))
            .with_logger(warnings.clone())
            .with_max_packet_size(4 + 2 * (1 + 6));
        let controller = Controller::new(record, options);

        assert_eq!(controller.refresh(&strips(&[0, 1, 2, 3])).unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.queue_len(), 0);
        assert!(!controller.is_waiting());
        assert_eq!(
            *warnings.0.lock(),
            vec!["pixel packet send failed".to_string(); 2]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_trim() {
        let (controller, _) = controller(2, 100_000);
        controller.refresh(&strips(&[1, 2])).unwrap();
        controller.refresh(&strips(&[2, 3])).unwrap();
        controller.refresh(&strips(&[1])).unwrap();

        assert_eq!(controller.trim(), 1);
        assert_eq!(controller.queued_sequence_numbers(), vec![2, 3]);
    }
}
