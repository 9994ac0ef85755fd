#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use pixelpusher_control::{DatagramSink, LogLevel, LogSink};
use serde_json::Value;
use tokio::time::Instant;

/// Builder for PixelPusher discovery datagrams
#[derive(Debug, Clone)]
pub struct DatagramBuilder {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
    pub device_type: u8,
    pub strips_per_packet: u8,
    pub update_period_us: u32,
    pub power_total: u32,
    pub delta_sequence: u32,
    /// Advertised pixel port; `None` builds the 48-byte form
    pub port: Option<u16>,
}

impl Default for DatagramBuilder {
    fn default() -> Self {
        Self {
            mac: [0xd8, 0x80, 0x39, 0x00, 0x00, 0x01],
            ip: [127, 0, 0, 1],
            device_type: 2,
            strips_per_packet: 1,
            update_period_us: 100_000,
            power_total: 0,
            delta_sequence: 0,
            port: None,
        }
    }
}

impl DatagramBuilder {
    pub fn build(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 48];
        bytes[0..6].copy_from_slice(&self.mac);
        bytes[6..10].copy_from_slice(&self.ip);
        bytes[10] = self.device_type;
        bytes[11] = 1;
        bytes[24] = 8;
        bytes[25] = self.strips_per_packet;
        bytes[26..28].copy_from_slice(&240u16.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.update_period_us.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.power_total.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.delta_sequence.to_le_bytes());
        if let Some(port) = self.port {
            bytes.extend_from_slice(&0u16.to_le_bytes());
            bytes.extend_from_slice(&0u16.to_le_bytes());
            bytes.extend_from_slice(&port.to_le_bytes());
        }
        bytes
    }
}

/// Records every datagram with the (tokio) time it was sent
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(Instant, Vec<u8>, SocketAddr)>>,
}

impl RecordingSink {
    pub fn times(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|s| s.0).collect()
    }

    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| u32::from_le_bytes([s.1[0], s.1[1], s.1[2], s.1[3]]))
            .collect()
    }
}

impl DatagramSink for RecordingSink {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), payload.to_vec(), target));
        Ok(payload.len())
    }
}

/// Keeps log messages for inspection
#[derive(Default)]
pub struct CaptureLog {
    pub entries: Mutex<Vec<(LogLevel, String)>>,
}

impl CaptureLog {
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl LogSink for CaptureLog {
    fn log(&self, level: LogLevel, message: &str, _details: Option<&Value>) {
        self.entries
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}
