//! Capability traits for the two subsystems.
//!
//! The polling loop only ever talks to these traits, so the vendor sessions and the
//! simulated rig are interchangeable. Opening a session is a constructor on the
//! concrete type; everything after that goes through here.

use std::time::Duration;

use crate::config::MotionProfile;
use crate::error::AppResult;
use crate::measurement::{ChannelId, Packet, VoltageSample};

/// Closed-loop positioning controller in asynchronous command mode.
///
/// Commands are queued and return immediately. Position queries are two-phase:
/// [`query_position`](Self::query_position) enqueues the request and
/// [`receive_packet`](Self::receive_packet) pulls the next response off the shared,
/// ordered response queue. Each query must be matched by exactly one receive before
/// the next query on the same channel.
pub trait ActuatorSession {
    /// Number of channels the controller enumerated when it was opened.
    fn channel_count(&self) -> u32;

    /// Turn on the position sensors.
    fn enable_sensors(&mut self) -> AppResult<()>;

    /// Apply speed, acceleration and operation mode to one channel. Idempotent.
    fn configure(&mut self, channel: ChannelId, profile: &MotionProfile) -> AppResult<()>;

    /// Hold commands until the next `flush_output` when `buffered` is true.
    fn set_buffered_output(&mut self, buffered: bool) -> AppResult<()>;

    /// Enqueue an absolute move. Does not wait for arrival.
    fn move_absolute(&mut self, channel: ChannelId, target: i64, hold_time: u32) -> AppResult<()>;

    /// Cancel any move on `channel`. Safe on a stationary channel.
    fn stop(&mut self, channel: ChannelId) -> AppResult<()>;

    /// Enqueue a position request. The value arrives later as a packet.
    fn query_position(&mut self, channel: ChannelId) -> AppResult<()>;

    /// Block until the next response packet arrives or `timeout` elapses.
    fn receive_packet(&mut self, timeout: Duration) -> AppResult<Packet>;

    /// Send all buffered commands to the controller.
    fn flush_output(&mut self) -> AppResult<()>;

    /// Release the session. Called exactly once.
    fn close(&mut self) -> AppResult<()>;
}

/// Started analog acquisition task producing scaled samples.
pub trait SamplerSession {
    /// Blocking read of the next available sample.
    fn read_next(&mut self, timeout: Duration) -> AppResult<VoltageSample>;

    /// Stop and release the task. Called exactly once.
    fn close(&mut self) -> AppResult<()>;
}

impl<T: ActuatorSession + ?Sized> ActuatorSession for Box<T> {
    fn channel_count(&self) -> u32 {
        (**self).channel_count()
    }

    fn enable_sensors(&mut self) -> AppResult<()> {
        (**self).enable_sensors()
    }

    fn configure(&mut self, channel: ChannelId, profile: &MotionProfile) -> AppResult<()> {
        (**self).configure(channel, profile)
    }

    fn set_buffered_output(&mut self, buffered: bool) -> AppResult<()> {
        (**self).set_buffered_output(buffered)
    }

    fn move_absolute(&mut self, channel: ChannelId, target: i64, hold_time: u32) -> AppResult<()> {
        (**self).move_absolute(channel, target, hold_time)
    }

    fn stop(&mut self, channel: ChannelId) -> AppResult<()> {
        (**self).stop(channel)
    }

    fn query_position(&mut self, channel: ChannelId) -> AppResult<()> {
        (**self).query_position(channel)
    }

    fn receive_packet(&mut self, timeout: Duration) -> AppResult<Packet> {
        (**self).receive_packet(timeout)
    }

    fn flush_output(&mut self) -> AppResult<()> {
        (**self).flush_output()
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }
}

impl<T: SamplerSession + ?Sized> SamplerSession for Box<T> {
    fn read_next(&mut self, timeout: Duration) -> AppResult<VoltageSample> {
        (**self).read_next(timeout)
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }
}
