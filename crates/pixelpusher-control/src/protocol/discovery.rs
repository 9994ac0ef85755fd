//! Universal Discovery Protocol decoder
//!
//! Layout (all multi-byte integers little-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 6    | MAC address |
//! | 6      | 4    | IPv4 address (network order) |
//! | 10     | 1    | device type |
//! | 11     | 1    | protocol version |
//! | 12     | 2    | vendor ID |
//! | 14     | 2    | product ID |
//! | 16     | 2    | hardware revision |
//! | 18     | 2    | software revision |
//! | 20     | 4    | link speed (bits per second) |
//!
//! PixelPusher particulars start at offset 24, see [`PixelPusherParticulars`].

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::{error::PusherError, Result};

/// UDP port devices broadcast discovery datagrams to
pub const DISCOVERY_PORT: u16 = 7331;

/// Pixel port used when a device does not advertise one
pub const DEFAULT_DEVICE_PORT: u16 = 9761;

/// Header plus the mandatory PixelPusher particulars
pub const MIN_DISCOVERY_LEN: usize = 48;

/// Strip carries RGBOW pixels
pub const STRIP_FLAG_RGBOW: u8 = 1 << 0;
/// Strip carries 16-bit wide pixels
pub const STRIP_FLAG_WIDE_PIXELS: u8 = 1 << 1;
/// Pusher is password protected
pub const PUSHER_FLAG_PROTECTED: u32 = 1 << 0;

const PARTICULARS_OFFSET: usize = 24;
const ARTNET_LEN: usize = 54;
const STRIP_FLAGS_LEN: usize = 62;
const PUSHER_FLAGS_LEN: usize = 66;

/// 6-byte hardware address, the identity of a discovered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Read the MAC address from the first six bytes of a datagram
    pub fn from_datagram(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_DISCOVERY_LEN {
            return Err(PusherError::MalformedPacket {
                len: bytes.len(),
                min: MIN_DISCOVERY_LEN,
            });
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[0..6]);
        Ok(Self(mac))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        let pairs: Vec<&str> = (0..6).map(|i| &encoded[i * 2..i * 2 + 2]).collect();
        write!(f, "{}", pairs.join(":"))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Device family announced in byte 10 of the discovery header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    EtherDream,
    LumiaBridge,
    PixelPusher,
    Unknown(u8),
}

impl From<u8> for DeviceType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::EtherDream,
            1 => Self::LumiaBridge,
            2 => Self::PixelPusher,
            other => Self::Unknown(other),
        }
    }
}

impl DeviceType {
    /// Wire value of this device type
    pub fn code(&self) -> u8 {
        match self {
            Self::EtherDream => 0,
            Self::LumiaBridge => 1,
            Self::PixelPusher => 2,
            Self::Unknown(code) => *code,
        }
    }
}

/// PixelPusher specific part of a discovery datagram
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 24 | 1 | strips attached |
/// | 25 | 1 | max strips per packet |
/// | 26 | 2 | pixels per strip |
/// | 28 | 4 | update period (µs) |
/// | 32 | 4 | power total (PWM units) |
/// | 36 | 4 | delta sequence |
/// | 40 | 4 | controller ordinal (signed) |
/// | 44 | 4 | group ordinal (signed) |
/// | 48 | 2 | artnet universe (len ≥ 54) |
/// | 50 | 2 | artnet channel (len ≥ 54) |
/// | 52 | 2 | pixel port (len ≥ 54) |
/// | 54 | 8 | strip flags (len ≥ 62) |
/// | 62 | 4 | pusher flags (len ≥ 66) |
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PixelPusherParticulars {
    pub number_strips: u8,
    pub strips_per_packet: u8,
    pub pixels_per_strip: u16,
    /// Time the device needs per frame
    #[serde(serialize_with = "serialize_millis")]
    pub update_period: Duration,
    pub power_total: u32,
    pub delta_sequence: u32,
    pub controller_ordinal: i32,
    pub group_ordinal: i32,
    pub artnet_universe: Option<u16>,
    pub artnet_channel: Option<u16>,
    /// Destination port for pixel packets
    pub my_port: u16,
    pub strip_flags: Option<[u8; 8]>,
    pub pusher_flags: Option<u32>,
}

impl PixelPusherParticulars {
    fn strip_flag(&self, strip: usize, flag: u8) -> bool {
        self.strip_flags
            .and_then(|flags| flags.get(strip).copied())
            .is_some_and(|f| f & flag != 0)
    }

    pub fn strip_is_rgbow(&self, strip: usize) -> bool {
        self.strip_flag(strip, STRIP_FLAG_RGBOW)
    }

    pub fn strip_has_wide_pixels(&self, strip: usize) -> bool {
        self.strip_flag(strip, STRIP_FLAG_WIDE_PIXELS)
    }

    pub fn is_protected(&self) -> bool {
        self.pusher_flags
            .is_some_and(|flags| flags & PUSHER_FLAG_PROTECTED != 0)
    }

    /// Update period in fractional milliseconds
    pub fn update_period_ms(&self) -> f64 {
        self.update_period.as_secs_f64() * 1000.0
    }
}

fn serialize_millis<S: Serializer>(
    period: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(period.as_secs_f64() * 1000.0)
}

/// Device-type specific data following the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Particulars {
    PixelPusher(PixelPusherParticulars),
    /// Undecoded bytes after the header, hex encoded
    Opaque { payload: String },
}

/// Fully decoded discovery datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryRecord {
    pub mac_address: MacAddress,
    pub ip_address: Ipv4Addr,
    pub device_type: DeviceType,
    pub protocol_version: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub hardware_revision: u16,
    pub software_revision: u16,
    pub link_speed_bps: u32,
    pub particulars: Particulars,
}

impl DiscoveryRecord {
    pub fn pixel_pusher(&self) -> Option<&PixelPusherParticulars> {
        match &self.particulars {
            Particulars::PixelPusher(p) => Some(p),
            Particulars::Opaque { .. } => None,
        }
    }

    pub fn pixel_pusher_mut(&mut self) -> Option<&mut PixelPusherParticulars> {
        match &mut self.particulars {
            Particulars::PixelPusher(p) => Some(p),
            Particulars::Opaque { .. } => None,
        }
    }
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decode a discovery datagram, defaulting the pixel port to 9761
pub fn parse_discovery(bytes: &[u8]) -> Result<DiscoveryRecord> {
    parse_discovery_with_port(bytes, DEFAULT_DEVICE_PORT)
}

/// Decode a discovery datagram
///
/// `default_port` is used as the pixel port when the datagram is too short to
/// advertise one.
pub fn parse_discovery_with_port(bytes: &[u8], default_port: u16) -> Result<DiscoveryRecord> {
    let mac_address = MacAddress::from_datagram(bytes)?;
    let ip_address = Ipv4Addr::new(bytes[6], bytes[7], bytes[8], bytes[9]);
    let device_type = DeviceType::from(bytes[10]);

    let particulars = if device_type == DeviceType::PixelPusher {
        Particulars::PixelPusher(parse_pixel_pusher(bytes, default_port))
    } else {
        Particulars::Opaque {
            payload: hex::encode(&bytes[PARTICULARS_OFFSET..]),
        }
    };

    Ok(DiscoveryRecord {
        mac_address,
        ip_address,
        device_type,
        protocol_version: bytes[11],
        vendor_id: read_u16(bytes, 12),
        product_id: read_u16(bytes, 14),
        hardware_revision: read_u16(bytes, 16),
        software_revision: read_u16(bytes, 18),
        link_speed_bps: read_u32(bytes, 20),
        particulars,
    })
}

fn parse_pixel_pusher(bytes: &[u8], default_port: u16) -> PixelPusherParticulars {
    let len = bytes.len();

    let (artnet_universe, artnet_channel, my_port) = if len >= ARTNET_LEN {
        (
            Some(read_u16(bytes, 48)),
            Some(read_u16(bytes, 50)),
            read_u16(bytes, 52),
        )
    } else {
        (None, None, default_port)
    };

    let strip_flags = (len >= STRIP_FLAGS_LEN).then(|| {
        let mut flags = [0u8; 8];
        flags.copy_from_slice(&bytes[54..62]);
        flags
    });

    let pusher_flags = (len >= PUSHER_FLAGS_LEN).then(|| read_u32(bytes, 62));

    PixelPusherParticulars {
        number_strips: bytes[24],
        strips_per_packet: bytes[25],
        pixels_per_strip: read_u16(bytes, 26),
        update_period: Duration::from_micros(u64::from(read_u32(bytes, 28))),
        power_total: read_u32(bytes, 32),
        delta_sequence: read_u32(bytes, 36),
        controller_ordinal: read_i32(bytes, 40),
        group_ordinal: read_i32(bytes, 44),
        artnet_universe,
        artnet_channel,
        my_port,
        strip_flags,
        pusher_flags,
    }
}
