//! Synchronized polling loop.
//!
//! Drives one traverse from the long-travel move to the stopped actuator:
//!
//! ```text
//! Idle -> Homing -> ZeroCapture -> Polling -> Draining -> Stopped
//! ```
//!
//! Each polling iteration takes one voltage sample, then one position reading, in that
//! order. The two are only loosely time-correlated; there is no hardware trigger
//! between the subsystems. Nothing here retries: the first error from either subsystem
//! ends the traverse and is returned to the caller, who owns shutdown.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Settings;
use crate::data::RecordSink;
use crate::error::AppResult;
use crate::hardware::{ActuatorSession, PositionReader, SamplerSession};
use crate::measurement::{ChannelId, DisplacementRecord, PositionSample, ZeroReference};

/// Where the traverse currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversePhase {
    /// Not started
    Idle,
    /// Long-travel move issued, stale readings being discarded
    Homing,
    /// Reading the zero reference
    ZeroCapture,
    /// Reading voltage and position until the threshold
    Polling,
    /// Stop issued, final reading pending
    Draining,
    /// Done
    Stopped,
}

impl fmt::Display for TraversePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Homing => "homing",
            Self::ZeroCapture => "zero-capture",
            Self::Polling => "polling",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Parameters of one traverse.
#[derive(Debug, Clone)]
pub struct TraverseParams {
    /// Driven channel
    pub channel: ChannelId,
    /// Absolute target of the long-travel move
    pub home_target: i64,
    /// Hold time passed with the move, in milliseconds
    pub hold_time: u32,
    /// Readings discarded after the move is issued
    pub stale_readings: usize,
    /// Wait for one position packet
    pub position_timeout: Duration,
    /// Wait for one voltage sample
    pub read_timeout: Duration,
    /// Stop once displacement reaches this value
    pub travel_threshold: i64,
}

impl From<&Settings> for TraverseParams {
    fn from(settings: &Settings) -> Self {
        Self {
            channel: settings.actuator.channel,
            home_target: settings.actuator.home_target,
            hold_time: settings.actuator.hold_time,
            stale_readings: settings.actuator.stale_readings,
            position_timeout: settings.actuator.position_timeout,
            read_timeout: settings.sampler.read_timeout,
            travel_threshold: settings.traverse.travel_threshold,
        }
    }
}

/// Outcome of a completed traverse.
#[derive(Debug, Clone, PartialEq)]
pub struct TraverseSummary {
    /// Number of records written
    pub iterations: u64,
    /// Origin the displacements are measured from
    pub zero: ZeroReference,
    /// Record that crossed the threshold
    pub last_record: DisplacementRecord,
    /// Last position read while polling
    pub last_position: PositionSample,
    /// Reading taken after the stop command
    pub final_position: PositionSample,
}

/// One traverse's state machine.
pub struct Traverse {
    params: TraverseParams,
    reader: PositionReader,
    phase: TraversePhase,
    zero: Option<ZeroReference>,
    iterations: u64,
}

impl Traverse {
    /// A traverse in the idle phase.
    pub fn new(params: TraverseParams) -> Self {
        let reader = PositionReader::new(params.channel, params.position_timeout);
        Self {
            params,
            reader,
            phase: TraversePhase::Idle,
            zero: None,
            iterations: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TraversePhase {
        self.phase
    }

    /// The zero, once captured.
    pub fn zero_reference(&self) -> Option<ZeroReference> {
        self.zero
    }

    /// Records emitted so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    fn enter(&mut self, phase: TraversePhase) {
        info!(from = %self.phase, to = %phase, "Traverse phase change");
        self.phase = phase;
    }

    /// Run the traverse to completion.
    ///
    /// On error the phase is left where the failure happened, and the actuator may
    /// still be moving. The caller must run the shutdown sequence either way.
    pub fn run<A, S, K>(
        &mut self,
        actuator: &mut A,
        sampler: &mut S,
        sink: &mut K,
    ) -> AppResult<TraverseSummary>
    where
        A: ActuatorSession + ?Sized,
        S: SamplerSession + ?Sized,
        K: RecordSink + ?Sized,
    {
        let channel = self.reader.channel();

        self.enter(TraversePhase::Homing);
        actuator.move_absolute(channel, self.params.home_target, self.params.hold_time)?;
        self.reader
            .drain_stale(actuator, self.params.stale_readings)?;

        self.enter(TraversePhase::ZeroCapture);
        let zero = self.capture_zero(actuator)?;

        self.enter(TraversePhase::Polling);
        let (last_record, last_position) = loop {
            let voltage = sampler.read_next(self.params.read_timeout)?;
            let position = self.reader.read(actuator)?;
            actuator.flush_output()?;

            let record = DisplacementRecord {
                voltage,
                displacement: zero.displacement(&position),
            };
            sink.append(&record)?;
            self.iterations += 1;
            debug!(
                iteration = self.iterations,
                voltage = record.voltage.0,
                displacement = record.displacement,
                "Record"
            );

            if record.displacement >= self.params.travel_threshold {
                info!(
                    iterations = self.iterations,
                    displacement = record.displacement,
                    threshold = self.params.travel_threshold,
                    "Travel threshold reached"
                );
                break (record, position);
            }
        };

        self.enter(TraversePhase::Draining);
        actuator.stop(channel)?;
        actuator.flush_output()?;
        let final_position = self.reader.read(actuator)?;
        info!(
            final_ticks = final_position.ticks,
            last_ticks = last_position.ticks,
            "Actuator stopped"
        );
        sink.final_position(&final_position, &last_position)?;

        self.enter(TraversePhase::Stopped);
        Ok(TraverseSummary {
            iterations: self.iterations,
            zero,
            last_record,
            last_position,
            final_position,
        })
    }

    fn capture_zero<A>(&mut self, actuator: &mut A) -> AppResult<ZeroReference>
    where
        A: ActuatorSession + ?Sized,
    {
        if let Some(zero) = self.zero {
            return Ok(zero);
        }
        let zero = ZeroReference::capture(self.reader.read(actuator)?);
        info!(ticks = zero.position().ticks, "Zero reference captured");
        self.zero = Some(zero);
        Ok(zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySink;
    use crate::hardware::mock::{CallJournal, HardwareCall, SimulatedSampler, SimulatedStage};

    fn params(threshold: i64) -> TraverseParams {
        TraverseParams {
            channel: ChannelId(0),
            home_target: -1_000_000_000,
            hold_time: 1,
            stale_readings: 3,
            position_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            travel_threshold: threshold,
        }
    }

    #[test]
    fn params_follow_settings() {
        let settings = Settings::default();
        let params = TraverseParams::from(&settings);
        assert_eq!(params.travel_threshold, 20_000_000);
        assert_eq!(params.stale_readings, 3);
        assert_eq!(params.read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn traverse_walks_every_phase() {
        let journal = CallJournal::new();
        let mut stage = SimulatedStage::new(journal.clone()).with_ticks_per_read(1_000);
        let mut sampler = SimulatedSampler::new(journal.clone());
        let mut sink = MemorySink::new();

        let mut traverse = Traverse::new(params(5_000));
        assert_eq!(traverse.phase(), TraversePhase::Idle);

        let summary = traverse.run(&mut stage, &mut sampler, &mut sink).unwrap();
        assert_eq!(traverse.phase(), TraversePhase::Stopped);
        assert_eq!(summary.iterations, 5);
        assert_eq!(summary.last_record.displacement, 5_000);
        assert_eq!(traverse.zero_reference(), Some(summary.zero));
        assert!(!stage.is_moving(ChannelId(0)));

        let calls = journal.calls();
        assert_eq!(
            calls[0],
            HardwareCall::MoveAbsolute {
                channel: ChannelId(0),
                target: -1_000_000_000
            }
        );
        let stop = journal
            .position(|c| *c == HardwareCall::Stop(ChannelId(0)))
            .unwrap();
        let last_read = journal
            .rposition(|c| *c == HardwareCall::ReadVoltage)
            .unwrap();
        assert!(stop > last_read);
    }

    #[test]
    fn voltage_is_read_before_position_each_iteration() {
        let journal = CallJournal::new();
        let mut stage = SimulatedStage::new(journal.clone()).with_ticks_per_read(1_000);
        let mut sampler = SimulatedSampler::new(journal.clone());
        let mut sink = MemorySink::new();

        Traverse::new(params(2_000))
            .run(&mut stage, &mut sampler, &mut sink)
            .unwrap();

        let polling: Vec<HardwareCall> = journal
            .calls()
            .into_iter()
            .skip_while(|c| *c != HardwareCall::ReadVoltage)
            .take(4)
            .collect();
        assert_eq!(
            polling,
            vec![
                HardwareCall::ReadVoltage,
                HardwareCall::QueryPosition(ChannelId(0)),
                HardwareCall::ReceivePacket,
                HardwareCall::FlushOutput,
            ]
        );
    }

    #[test]
    fn final_position_goes_to_sink() {
        let journal = CallJournal::new();
        let mut stage = SimulatedStage::new(journal.clone()).with_ticks_per_read(1_000);
        let mut sampler = SimulatedSampler::new(journal);
        let sink = MemorySink::new();
        let mut handle = sink.clone();

        let summary = Traverse::new(params(1_000))
            .run(&mut stage, &mut sampler, &mut handle)
            .unwrap();

        let (final_position, last) = sink.contents().final_position.unwrap();
        assert_eq!(final_position, summary.final_position);
        assert_eq!(last, summary.last_position);
    }
}
