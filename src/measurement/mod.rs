//! Data types exchanged between the subsystems, the polling loop and the log sink.
//!
//! Positions are kept in the actuator's native encoder ticks. Voltages arrive already
//! scaled by the sampler's configured linear transform.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single positioning axis on the actuator controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position reported by the actuator for one channel, in native ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSample {
    /// Channel the position was read from
    pub channel: ChannelId,
    /// Position in native ticks
    pub ticks: i64,
}

/// One scaled analog reading.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct VoltageSample(pub f64);

impl fmt::Display for VoltageSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Origin for displacement, captured once after homing.
///
/// A `ZeroReference` cannot be updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroReference(PositionSample);

impl ZeroReference {
    /// Fix the origin at `sample`.
    pub fn capture(sample: PositionSample) -> Self {
        Self(sample)
    }

    /// The captured origin.
    pub fn position(&self) -> PositionSample {
        self.0
    }

    /// Displacement of `current` from the origin. Travel toward negative ticks
    /// (the homing direction) is positive.
    pub fn displacement(&self, current: &PositionSample) -> i64 {
        self.0.ticks - current.ticks
    }
}

/// The unit of output: one aligned (voltage, displacement) pair per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementRecord {
    /// Scaled analog reading
    pub voltage: VoltageSample,
    /// Ticks travelled from the zero reference
    pub displacement: i64,
}

/// Classification of a packet received from the actuator's response queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Nothing arrived before the receive timeout.
    None,
    /// The controller reported an error; `data` holds the status code.
    Error,
    /// Answer to a position query; `data` holds the position in ticks.
    Position,
    /// Any other packet type, carried with its raw type code.
    Other(u32),
}

/// A response packet from the actuator's asynchronous command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// What the packet is
    pub kind: PacketKind,
    /// Channel the packet refers to
    pub channel: ChannelId,
    /// Position ticks or status code, depending on `kind`
    pub data: i64,
}

impl Packet {
    /// Answer to a position query.
    pub fn position(channel: ChannelId, ticks: i64) -> Self {
        Self {
            kind: PacketKind::Position,
            channel,
            data: ticks,
        }
    }

    /// Error report carrying a status code.
    pub fn error(channel: ChannelId, code: i64) -> Self {
        Self {
            kind: PacketKind::Error,
            channel,
            data: code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacement_is_positive_toward_home() {
        let zero = ZeroReference::capture(PositionSample {
            channel: ChannelId(0),
            ticks: 5_000,
        });
        let current = PositionSample {
            channel: ChannelId(0),
            ticks: -2_000,
        };
        assert_eq!(zero.displacement(&current), 7_000);
        assert_eq!(zero.position().ticks, 5_000);
    }

    #[test]
    fn voltage_displays_like_f64() {
        assert_eq!(VoltageSample(1.25).to_string(), "1.25");
    }
}
