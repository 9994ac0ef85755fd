//! PixelPusher wire protocol
//!
//! Pure encoders and decoders for the Universal Discovery Protocol and the
//! PixelPusher pixel packets. Nothing in here performs I/O.
//!
//! ## Discovery
//!
//! Every device broadcasts a discovery datagram to UDP port 7331 roughly once
//! a second. The first 24 bytes are a common header; PixelPusher devices
//! (device type 2) append their particulars, later firmware revisions adding
//! optional trailing fields.
//!
//! ## Pixel packets
//!
//! Outbound packets carry a little-endian 32-bit sequence number followed by
//! one or more `(strip index, pixel bytes)` pairs, sent to the port the device
//! advertised (9761 when it did not).
//!
//! ```rust
//! use pixelpusher_control::protocol::{encode_packets, StripUpdate};
//!
//! let strips = vec![
//!     StripUpdate::new(0, vec![0xff, 0x00, 0x00]),
//!     StripUpdate::new(1, vec![0x00, 0xff, 0x00]),
//! ];
//! let mut sequence = 0;
//! let packets = encode_packets(&strips, 2, 1460, &mut sequence);
//! assert_eq!(packets.len(), 1);
//! assert_eq!(packets[0].bytes.len(), 4 + 2 * (1 + 3));
//! ```

pub mod discovery;
pub mod pixels;
pub mod telemetry;

pub use discovery::{
    parse_discovery, parse_discovery_with_port, DeviceType, DiscoveryRecord, MacAddress,
    Particulars, PixelPusherParticulars, DEFAULT_DEVICE_PORT, DISCOVERY_PORT,
    MIN_DISCOVERY_LEN, PUSHER_FLAG_PROTECTED, STRIP_FLAG_RGBOW, STRIP_FLAG_WIDE_PIXELS,
};
pub use pixels::{encode_packets, PendingMessage, StripUpdate, MAX_UDP_PAYLOAD};
pub use telemetry::{adjust_cadence, parse_telemetry, CadenceAdjustment, Telemetry};
