//! Synchronous position reads on top of the actuator's query/response protocol.

use std::time::Duration;
use tracing::debug;

use crate::error::{AppResult, DaqError, Subsystem};
use crate::hardware::capabilities::ActuatorSession;
use crate::measurement::{ChannelId, PacketKind, PositionSample};

/// Pairs one position query with the next response packet for a single channel.
#[derive(Debug, Clone, Copy)]
pub struct PositionReader {
    channel: ChannelId,
    timeout: Duration,
}

impl PositionReader {
    /// Reader for `channel`, waiting at most `timeout` per packet.
    pub fn new(channel: ChannelId, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Channel this reader queries.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Query the channel and wait for its answer.
    ///
    /// The response must be a position packet for this channel. Error packets become
    /// [`DaqError::HardwareProtocol`]; anything else means the queue is out of step.
    pub fn read<A>(&self, actuator: &mut A) -> AppResult<PositionSample>
    where
        A: ActuatorSession + ?Sized,
    {
        actuator.query_position(self.channel)?;
        let packet = actuator.receive_packet(self.timeout)?;

        match packet.kind {
            PacketKind::Position if packet.channel == self.channel => Ok(PositionSample {
                channel: self.channel,
                ticks: packet.data,
            }),
            PacketKind::None => Err(DaqError::HardwareTimeout {
                subsystem: Subsystem::Actuator,
                operation: "position packet",
                timeout: self.timeout,
            }),
            PacketKind::Error => Err(DaqError::HardwareProtocol {
                subsystem: Subsystem::Actuator,
                code: packet.data,
                message: format!("error packet on channel {}", packet.channel),
            }),
            _ => Err(DaqError::UnexpectedPacket {
                expected: self.channel,
                packet,
            }),
        }
    }

    /// Discard `count` readings, then flush the output buffer.
    ///
    /// Right after a long-travel move the response queue can still hold pre-move
    /// packets, and with buffered output the queries have not even been sent yet.
    /// Whatever comes back (a stale position, no packet at all, or nothing within the
    /// timeout) is discarded. A query the controller rejects is still an error.
    pub fn drain_stale<A>(&self, actuator: &mut A, count: usize) -> AppResult<()>
    where
        A: ActuatorSession + ?Sized,
    {
        for n in 0..count {
            actuator.query_position(self.channel)?;
            match actuator.receive_packet(self.timeout) {
                Ok(packet) => debug!(
                    channel = %self.channel,
                    n,
                    kind = ?packet.kind,
                    data = packet.data,
                    "Discarded stale reading"
                ),
                Err(DaqError::HardwareTimeout { .. }) => {
                    debug!(channel = %self.channel, n, "No stale reading to discard");
                }
                Err(err) => return Err(err),
            }
        }
        actuator.flush_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{CallJournal, HardwareCall, SimulatedStage, StageFaults};

    fn stage(journal: &CallJournal) -> SimulatedStage {
        SimulatedStage::new(journal.clone()).with_start_position(1_000)
    }

    #[test]
    fn read_pairs_query_with_receive() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal);
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        let sample = reader.read(&mut stage).unwrap();
        assert_eq!(sample.ticks, 1_000);
        assert_eq!(
            journal.calls(),
            vec![
                HardwareCall::QueryPosition(ChannelId(0)),
                HardwareCall::ReceivePacket,
            ]
        );
    }

    #[test]
    fn drain_discards_and_flushes() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal);
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        reader.drain_stale(&mut stage, 3).unwrap();
        assert_eq!(journal.count(|c| *c == HardwareCall::QueryPosition(ChannelId(0))), 3);
        assert_eq!(journal.calls().last(), Some(&HardwareCall::FlushOutput));
    }

    #[test]
    fn drain_tolerates_missing_packets() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal).with_faults(StageFaults {
            timeout_on_query: Some(2),
            error_packet_on_query: Some((3, 141)),
            ..StageFaults::default()
        });
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        reader.drain_stale(&mut stage, 3).unwrap();
        assert_eq!(journal.count(|c| *c == HardwareCall::ReceivePacket), 3);
        assert_eq!(reader.read(&mut stage).unwrap().ticks, 1_000);
    }

    #[test]
    fn drain_on_buffered_stage_discards_empty_receives() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal).with_buffered_output();
        stage.set_buffered_output(true).unwrap();
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        reader.drain_stale(&mut stage, 3).unwrap();
        // The flush sent the three queued queries; their answers now lead the queue.
        assert_eq!(reader.read(&mut stage).unwrap().ticks, 1_000);
    }

    #[test]
    fn error_packet_is_protocol_error() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal).with_faults(StageFaults {
            error_packet_on_query: Some((1, 141)),
            ..StageFaults::default()
        });
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        let err = reader.read(&mut stage).unwrap_err();
        assert!(matches!(err, DaqError::HardwareProtocol { code: 141, .. }));
    }

    #[test]
    fn missing_response_times_out() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal).with_faults(StageFaults {
            timeout_on_query: Some(1),
            ..StageFaults::default()
        });
        let reader = PositionReader::new(ChannelId(0), Duration::from_millis(100));

        let err = reader.read(&mut stage).unwrap_err();
        assert!(matches!(
            err,
            DaqError::HardwareTimeout {
                subsystem: Subsystem::Actuator,
                ..
            }
        ));
    }

    #[test]
    fn packet_for_other_channel_is_rejected() {
        let journal = CallJournal::new();
        let mut stage = stage(&journal);
        let reader = PositionReader::new(ChannelId(1), Duration::from_millis(100));

        // The simulated stage answers on the queried channel, so query channel 0
        // behind the reader's back to put a foreign packet at the head of the queue.
        stage.query_position(ChannelId(0)).unwrap();
        let err = reader.read(&mut stage).unwrap_err();
        assert!(matches!(err, DaqError::UnexpectedPacket { expected: ChannelId(1), .. }));
    }
}
