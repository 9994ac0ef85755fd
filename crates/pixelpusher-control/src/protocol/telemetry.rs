//! Telemetry carried by repeat discovery datagrams
//!
//! A PixelPusher keeps broadcasting its discovery datagram after it has been
//! found. The update period and delta sequence in those datagrams tell the
//! sender how well the device keeps up with the packets it is fed.

use std::time::Duration;

use super::discovery::{read_u32, MacAddress};
use crate::Result;

/// Delta sequence above which the device is considered to be falling behind
pub const BACKLOG_DELTA_THRESHOLD: u32 = 5;

/// Added to the update period while the device is falling behind
pub const BACKOFF_STEP: Duration = Duration::from_millis(5);

/// Removed from the update period while the device keeps up
pub const TIGHTEN_STEP: Duration = Duration::from_millis(1);

/// Fields of a repeat discovery datagram used for pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    /// Update period as reported by the device
    pub update_period: Duration,
    pub power_total: u32,
    pub delta_sequence: u32,
}

/// Decode the telemetry fields of a PixelPusher discovery datagram
pub fn parse_telemetry(bytes: &[u8]) -> Result<Telemetry> {
    MacAddress::from_datagram(bytes)?;
    Ok(Telemetry {
        update_period: Duration::from_micros(u64::from(read_u32(bytes, 28))),
        power_total: read_u32(bytes, 32),
        delta_sequence: read_u32(bytes, 36),
    })
}

/// Outcome of the cadence update rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceAdjustment {
    /// Update period the sender paces with from now on
    pub update_period: Duration,
    /// Queued packets superseded by later ones should be dropped
    pub trim_backlog: bool,
}

/// Derive the sending cadence from the reported period and delta sequence.
///
/// A delta above [`BACKLOG_DELTA_THRESHOLD`] backs off by [`BACKOFF_STEP`]
/// and asks for the backlog to be trimmed. A zero delta with a period above
/// one millisecond tightens by [`TIGHTEN_STEP`]. Anything else keeps the
/// reported period.
pub fn adjust_cadence(reported: Duration, delta_sequence: u32) -> CadenceAdjustment {
    if delta_sequence > BACKLOG_DELTA_THRESHOLD {
        CadenceAdjustment {
            update_period: reported + BACKOFF_STEP,
            trim_backlog: true,
        }
    } else if delta_sequence == 0 && reported > TIGHTEN_STEP {
        CadenceAdjustment {
            update_period: reported - TIGHTEN_STEP,
            trim_backlog: false,
        }
    } else {
        CadenceAdjustment {
            update_period: reported,
            trim_backlog: false,
        }
    }
}
