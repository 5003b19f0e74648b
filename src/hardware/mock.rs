//! Simulated Hardware Implementations
//!
//! Provides a simulated positioning stage and analog sampler so the traverse can run
//! without vendor hardware. Both record every call in a shared [`CallJournal`] and
//! support fault injection at each call site the traverse depends on.
//!
//! # Available Simulations
//!
//! - `SimulatedStage` - Closed-loop stage with an asynchronous, ordered response queue
//! - `SimulatedSampler` - Scripted or linearly ramping voltage source
//!
//! # Timing
//!
//! The stage advances a fixed number of ticks per trusted position reading while it is
//! moving, so runs are deterministic. The sampler can block for a sample period with
//! `std::thread::sleep` to mimic a hardware clock; it defaults to no delay.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LinearScale, MotionProfile};
use crate::error::{AppResult, DaqError, Subsystem};
use crate::hardware::capabilities::{ActuatorSession, SamplerSession};
use crate::hardware::status::{check, check_config};
use crate::measurement::{ChannelId, Packet, PacketKind, VoltageSample};

/// Second query issued on a channel before the first was received.
pub const STATUS_QUERY_OUTSTANDING: i64 = 3;
/// Channel index beyond what the stage enumerated.
pub const STATUS_INVALID_CHANNEL: i64 = 4;
/// Call on a session that has already been closed.
pub const STATUS_NOT_OPEN: i64 = 5;

/// Placeholder the stage reports for stale packets after a long-travel move.
pub const STALE_POSITION: i64 = -1;

fn describe_stage_status(code: i64) -> String {
    match code {
        STATUS_QUERY_OUTSTANDING => "position query already outstanding".to_string(),
        STATUS_INVALID_CHANNEL => "invalid channel index".to_string(),
        STATUS_NOT_OPEN => "system not open".to_string(),
        other => format!("simulated MCS error {other}"),
    }
}

fn describe_sampler_status(code: i64) -> String {
    match code {
        STATUS_NOT_OPEN => "task not running".to_string(),
        other => format!("simulated DAQ error {other}"),
    }
}

// =============================================================================
// Call Journal
// =============================================================================

/// One call made against a simulated subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    /// `enable_sensors`
    EnableSensors,
    /// `configure`
    Configure(ChannelId),
    /// `set_buffered_output`
    SetBufferedOutput(bool),
    /// `move_absolute`
    MoveAbsolute {
        /// Channel commanded
        channel: ChannelId,
        /// Absolute target in ticks
        target: i64,
    },
    /// `stop`
    Stop(ChannelId),
    /// `query_position`
    QueryPosition(ChannelId),
    /// `receive_packet`
    ReceivePacket,
    /// `flush_output`
    FlushOutput,
    /// Actuator `close`
    CloseActuator,
    /// `read_voltage`
    ReadVoltage,
    /// Sampler `close`
    CloseSampler,
}

/// Ordered record of calls, shared between the simulations and the test observing them.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<HardwareCall>>>,
}

impl CallJournal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one call.
    pub fn record(&self, call: HardwareCall) {
        self.calls.lock().push(call);
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&HardwareCall) -> bool,
    {
        self.calls.lock().iter().filter(|c| predicate(*c)).count()
    }

    /// Index of the first call matching `predicate`.
    pub fn position<F>(&self, predicate: F) -> Option<usize>
    where
        F: FnMut(&HardwareCall) -> bool,
    {
        self.calls.lock().iter().position(predicate)
    }

    /// Index of the last call matching `predicate`.
    pub fn rposition<F>(&self, predicate: F) -> Option<usize>
    where
        F: FnMut(&HardwareCall) -> bool,
    {
        self.calls.lock().iter().rposition(predicate)
    }
}

// =============================================================================
// SimulatedStage - Closed-loop positioning controller
// =============================================================================

/// Faults injected into a [`SimulatedStage`]. Query and flush indices are 1-based and
/// count calls across the whole session.
#[derive(Debug, Clone, Default)]
pub struct StageFaults {
    /// Fail `configure` with this status code.
    pub reject_configure: Option<i64>,
    /// Fail `move_absolute` with this status code.
    pub reject_move: Option<i64>,
    /// Fail the nth `stop` with a status code.
    pub reject_stop: Option<(u64, i64)>,
    /// Fail the nth `flush_output` with a status code.
    pub reject_flush: Option<(u64, i64)>,
    /// The response to the nth query never arrives.
    pub timeout_on_query: Option<u64>,
    /// Answer the nth query with an error packet carrying this code.
    pub error_packet_on_query: Option<(u64, i64)>,
    /// Fail `close` with this status code.
    pub reject_close: Option<i64>,
}

/// A command held back while buffered output is on.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Move { channel: ChannelId, target: i64 },
    Stop(ChannelId),
    Query(ChannelId),
}

#[derive(Debug, Clone, Default)]
struct Axis {
    position: i64,
    target: Option<i64>,
    stale_remaining: usize,
}

/// Simulated stage with an asynchronous, ordered response queue.
///
/// Each position query enqueues exactly one packet. A second query on a channel
/// before the first response was received fails with [`STATUS_QUERY_OUTSTANDING`].
///
/// With [`with_buffered_output`](Self::with_buffered_output), the stage behaves like the
/// controller in buffered mode instead: moves, stops and queries wait for the next
/// `flush_output`, queries may pipeline, and a receive with nothing in flight returns a
/// [`PacketKind::None`] packet.
pub struct SimulatedStage {
    journal: CallJournal,
    axes: Vec<Axis>,
    ticks_per_read: i64,
    stale_packets: usize,
    script: VecDeque<i64>,
    responses: VecDeque<Packet>,
    outstanding: HashMap<ChannelId, u32>,
    queries: u64,
    flushes: u64,
    stops: u64,
    honours_buffering: bool,
    buffered: bool,
    pending: VecDeque<Pending>,
    faults: StageFaults,
    open: bool,
}

impl SimulatedStage {
    /// Two-channel stage at position 0, moving 200 000 ticks per reading.
    pub fn new(journal: CallJournal) -> Self {
        Self {
            journal,
            axes: vec![Axis::default(); 2],
            ticks_per_read: 200_000,
            stale_packets: 3,
            script: VecDeque::new(),
            responses: VecDeque::new(),
            outstanding: HashMap::new(),
            queries: 0,
            flushes: 0,
            stops: 0,
            honours_buffering: false,
            buffered: false,
            pending: VecDeque::new(),
            faults: StageFaults::default(),
            open: true,
        }
    }

    /// Number of axes the stage enumerates.
    pub fn with_channels(mut self, channels: u32) -> Self {
        self.axes = vec![Axis::default(); channels as usize];
        self
    }

    /// Position of every axis before any move.
    pub fn with_start_position(mut self, ticks: i64) -> Self {
        for axis in &mut self.axes {
            axis.position = ticks;
        }
        self
    }

    /// Ticks travelled between consecutive trusted readings while moving.
    pub fn with_ticks_per_read(mut self, ticks: i64) -> Self {
        self.ticks_per_read = ticks.abs();
        self
    }

    /// Number of placeholder packets reported after each absolute move.
    pub fn with_stale_packets(mut self, count: usize) -> Self {
        self.stale_packets = count;
        self
    }

    /// Explicit positions to report, in order, after the stale packets. Once the script
    /// runs out the last scripted position is held.
    pub fn with_position_script<I>(mut self, positions: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        self.script = positions.into_iter().collect();
        self
    }

    /// Inject faults.
    pub fn with_faults(mut self, faults: StageFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Honour `set_buffered_output(true)`: hold commands until `flush_output`.
    pub fn with_buffered_output(mut self) -> Self {
        self.honours_buffering = true;
        self
    }

    /// Whether `channel` still has a move in progress.
    pub fn is_moving(&self, channel: ChannelId) -> bool {
        self.axes
            .get(channel.0 as usize)
            .is_some_and(|axis| axis.target.is_some())
    }

    fn status(&self, code: i64) -> AppResult<()> {
        check(Subsystem::Actuator, code, describe_stage_status)
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            self.status(STATUS_NOT_OPEN)
        }
    }

    fn axis_mut(&mut self, channel: ChannelId) -> AppResult<&mut Axis> {
        if (channel.0 as usize) < self.axes.len() {
            Ok(&mut self.axes[channel.0 as usize])
        } else {
            Err(DaqError::HardwareProtocol {
                subsystem: Subsystem::Actuator,
                code: STATUS_INVALID_CHANNEL,
                message: describe_stage_status(STATUS_INVALID_CHANNEL),
            })
        }
    }

    /// Carry out a command that has reached the controller.
    fn execute(&mut self, command: Pending) -> AppResult<()> {
        match command {
            Pending::Move { channel, target } => {
                let stale = self.stale_packets;
                let axis = self.axis_mut(channel)?;
                axis.target = Some(target);
                axis.stale_remaining = stale;
            }
            Pending::Stop(channel) => self.axis_mut(channel)?.target = None,
            Pending::Query(channel) => self.answer_query(channel)?,
        }
        Ok(())
    }

    fn answer_query(&mut self, channel: ChannelId) -> AppResult<()> {
        self.queries += 1;
        let n = self.queries;
        if self.faults.timeout_on_query == Some(n) {
            return Ok(());
        }
        let packet = match self.faults.error_packet_on_query {
            Some((at, code)) if at == n => Packet::error(channel, code),
            _ => Packet::position(channel, self.sample_position(channel)?),
        };
        self.responses.push_back(packet);
        *self.outstanding.entry(channel).or_insert(0) += 1;
        Ok(())
    }

    fn sample_position(&mut self, channel: ChannelId) -> AppResult<i64> {
        let step = self.ticks_per_read;
        let scripted = if self.axis_mut(channel)?.stale_remaining == 0 {
            self.script.pop_front()
        } else {
            None
        };
        let script_empty = self.script.is_empty();
        let axis = self.axis_mut(channel)?;

        if axis.stale_remaining > 0 {
            axis.stale_remaining -= 1;
            return Ok(STALE_POSITION);
        }
        if let Some(ticks) = scripted {
            axis.position = ticks;
            if script_empty {
                axis.target = None;
            }
            return Ok(ticks);
        }

        let reported = axis.position;
        if let Some(target) = axis.target {
            let remaining = target - axis.position;
            if remaining.abs() <= step {
                axis.position = target;
                axis.target = None;
            } else {
                axis.position += step * remaining.signum();
            }
        }
        Ok(reported)
    }
}

impl ActuatorSession for SimulatedStage {
    fn channel_count(&self) -> u32 {
        self.axes.len() as u32
    }

    fn enable_sensors(&mut self) -> AppResult<()> {
        self.journal.record(HardwareCall::EnableSensors);
        self.ensure_open()
    }

    fn configure(&mut self, channel: ChannelId, _profile: &MotionProfile) -> AppResult<()> {
        self.journal.record(HardwareCall::Configure(channel));
        self.ensure_open()?;
        self.axis_mut(channel)?;
        if let Some(code) = self.faults.reject_configure {
            return check_config(
                Subsystem::Actuator,
                code,
                "closed-loop profile",
                describe_stage_status,
            );
        }
        Ok(())
    }

    fn set_buffered_output(&mut self, buffered: bool) -> AppResult<()> {
        self.journal.record(HardwareCall::SetBufferedOutput(buffered));
        self.ensure_open()?;
        if self.honours_buffering {
            self.buffered = buffered;
        }
        Ok(())
    }

    fn move_absolute(&mut self, channel: ChannelId, target: i64, _hold_time: u32) -> AppResult<()> {
        self.journal
            .record(HardwareCall::MoveAbsolute { channel, target });
        self.ensure_open()?;
        if let Some(code) = self.faults.reject_move {
            return self.status(code);
        }
        self.axis_mut(channel)?;
        if self.buffered {
            self.pending.push_back(Pending::Move { channel, target });
            return Ok(());
        }
        self.execute(Pending::Move { channel, target })
    }

    fn stop(&mut self, channel: ChannelId) -> AppResult<()> {
        self.journal.record(HardwareCall::Stop(channel));
        self.ensure_open()?;
        self.stops += 1;
        if let Some((at, code)) = self.faults.reject_stop {
            if at == self.stops {
                return self.status(code);
            }
        }
        self.axis_mut(channel)?;
        if self.buffered {
            self.pending.push_back(Pending::Stop(channel));
            return Ok(());
        }
        self.execute(Pending::Stop(channel))
    }

    fn query_position(&mut self, channel: ChannelId) -> AppResult<()> {
        self.journal.record(HardwareCall::QueryPosition(channel));
        self.ensure_open()?;
        self.axis_mut(channel)?;
        if self.buffered {
            self.pending.push_back(Pending::Query(channel));
            return Ok(());
        }
        if self.outstanding.get(&channel).copied().unwrap_or(0) > 0 {
            return self.status(STATUS_QUERY_OUTSTANDING);
        }
        self.execute(Pending::Query(channel))
    }

    fn receive_packet(&mut self, timeout: Duration) -> AppResult<Packet> {
        self.journal.record(HardwareCall::ReceivePacket);
        self.ensure_open()?;
        let Some(packet) = self.responses.pop_front() else {
            if self.buffered {
                return Ok(Packet {
                    kind: PacketKind::None,
                    channel: ChannelId(0),
                    data: 0,
                });
            }
            return Err(DaqError::HardwareTimeout {
                subsystem: Subsystem::Actuator,
                operation: "position packet",
                timeout,
            });
        };
        if let Some(count) = self.outstanding.get_mut(&packet.channel) {
            *count = count.saturating_sub(1);
        }
        Ok(packet)
    }

    fn flush_output(&mut self) -> AppResult<()> {
        self.journal.record(HardwareCall::FlushOutput);
        self.ensure_open()?;
        self.flushes += 1;
        if let Some((at, code)) = self.faults.reject_flush {
            if at == self.flushes {
                return self.status(code);
            }
        }
        while let Some(command) = self.pending.pop_front() {
            self.execute(command)?;
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.journal.record(HardwareCall::CloseActuator);
        self.ensure_open()?;
        self.open = false;
        match self.faults.reject_close {
            Some(code) => self.status(code),
            None => Ok(()),
        }
    }
}

// =============================================================================
// SimulatedSampler - Analog voltage source
// =============================================================================

/// Faults injected into a [`SimulatedSampler`]. Read indices are 1-based.
#[derive(Debug, Clone, Default)]
pub struct SamplerFaults {
    /// The nth read produces nothing within its timeout.
    pub timeout_on_read: Option<u64>,
    /// The nth read fails with this status code.
    pub error_on_read: Option<(u64, i64)>,
    /// Fail `close` with this status code.
    pub reject_close: Option<i64>,
}

/// Simulated acquisition task producing scaled samples.
///
/// Raw values come from the script while it lasts and then ramp linearly from the
/// last value. The configured [`LinearScale`] is applied to every raw value.
pub struct SimulatedSampler {
    journal: CallJournal,
    script: VecDeque<f64>,
    raw: f64,
    raw_step: f64,
    scale: LinearScale,
    sample_period: Duration,
    reads: u64,
    faults: SamplerFaults,
    open: bool,
}

impl SimulatedSampler {
    /// Ramp starting at 0.5 raw volts, 0.01 per sample, identity scale.
    pub fn new(journal: CallJournal) -> Self {
        Self {
            journal,
            script: VecDeque::new(),
            raw: 0.5,
            raw_step: 0.01,
            scale: LinearScale::default(),
            sample_period: Duration::ZERO,
            reads: 0,
            faults: SamplerFaults::default(),
            open: true,
        }
    }

    /// Raw readings start at `start` and grow by `step` per read.
    pub fn with_ramp(mut self, start: f64, step: f64) -> Self {
        self.raw = start;
        self.raw_step = step;
        self
    }

    /// Return these raw readings first, then continue the ramp from the last one.
    pub fn with_script<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.script = values.into_iter().collect();
        self
    }

    /// Scale applied to raw readings.
    pub fn with_scale(mut self, scale: LinearScale) -> Self {
        self.scale = scale;
        self
    }

    /// Block this long on every read, like a hardware sample clock would.
    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    /// Inject sampler faults.
    pub fn with_faults(mut self, faults: SamplerFaults) -> Self {
        self.faults = faults;
        self
    }

    fn next_raw(&mut self) -> f64 {
        match self.script.pop_front() {
            Some(value) => {
                self.raw = value;
                value
            }
            None => {
                let value = self.raw;
                self.raw += self.raw_step;
                value
            }
        }
    }
}

impl SamplerSession for SimulatedSampler {
    fn read_next(&mut self, timeout: Duration) -> AppResult<VoltageSample> {
        self.journal.record(HardwareCall::ReadVoltage);
        if !self.open {
            return check(Subsystem::Sampler, STATUS_NOT_OPEN, describe_sampler_status)
                .map(|()| VoltageSample(0.0));
        }

        self.reads += 1;
        if self.faults.timeout_on_read == Some(self.reads) {
            return Err(DaqError::HardwareTimeout {
                subsystem: Subsystem::Sampler,
                operation: "analog sample",
                timeout,
            });
        }
        if let Some((at, code)) = self.faults.error_on_read {
            if at == self.reads {
                check(Subsystem::Sampler, code, describe_sampler_status)?;
            }
        }

        if !self.sample_period.is_zero() {
            std::thread::sleep(self.sample_period);
        }
        let raw = self.next_raw();
        Ok(VoltageSample(self.scale.apply(raw)))
    }

    fn close(&mut self) -> AppResult<()> {
        self.journal.record(HardwareCall::CloseSampler);
        if !self.open {
            return check(Subsystem::Sampler, STATUS_NOT_OPEN, describe_sampler_status);
        }
        self.open = false;
        match self.faults.reject_close {
            Some(code) => check(Subsystem::Sampler, code, describe_sampler_status),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
