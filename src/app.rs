//! Top-level run handler.
//!
//! [`run_traverse`] is the single place fatal errors surface. Whatever goes wrong in
//! bring-up or in the polling loop, the shutdown sequence runs before the error is
//! returned, so the actuator is never left moving.

use tracing::{error, info, warn};

use crate::config::{ActuatorConfig, Settings};
use crate::data::RecordSink;
use crate::error::{AppResult, DaqError};
use crate::hardware::{ActuatorSession, SamplerSession};
use crate::shutdown::ShutdownSequencer;
use crate::traverse::{Traverse, TraverseParams, TraverseSummary};

/// The opened sessions and log sink for one run.
pub struct Rig {
    /// Positioning controller session.
    pub actuator: Box<dyn ActuatorSession>,
    /// Analog acquisition session.
    pub sampler: Box<dyn SamplerSession>,
    /// Where records go.
    pub sink: Box<dyn RecordSink>,
}

/// Check the channel count and put both channels into a known, tuned, stopped state.
pub fn bring_up_actuator<A>(actuator: &mut A, config: &ActuatorConfig) -> AppResult<()>
where
    A: ActuatorSession + ?Sized,
{
    let available = actuator.channel_count();
    let required = config.required_channels();
    info!(available, required, "Actuator channels enumerated");
    if available < required {
        return Err(DaqError::HardwareConnect(format!(
            "controller reports {available} channel(s), need {required}"
        )));
    }

    actuator.enable_sensors()?;
    info!("Sensors are enabled");

    let channels = [config.channel, config.auxiliary_channel];
    for channel in channels {
        actuator.stop(channel)?;
    }
    info!("All channels stopped");

    let profile = config.motion_profile();
    for channel in channels {
        actuator.configure(channel, &profile)?;
    }
    info!(
        speed = profile.speed,
        acceleration = profile.acceleration,
        low_vibration = profile.low_vibration,
        "Closed-loop profile set"
    );

    actuator.set_buffered_output(true)?;
    actuator.flush_output()
}

/// Bring up the actuator, run one traverse, and shut the rig down.
///
/// The traverse error wins over a shutdown error; the latter is still logged.
pub fn run_traverse(rig: Rig, settings: &Settings) -> AppResult<TraverseSummary> {
    let actuator_config = &settings.actuator;
    let mut shutdown = ShutdownSequencer::new(
        rig,
        vec![actuator_config.channel, actuator_config.auxiliary_channel],
    );
    let mut traverse = Traverse::new(TraverseParams::from(settings));

    let outcome = match shutdown.rig_mut() {
        Some(Rig {
            actuator,
            sampler,
            sink,
        }) => bring_up_actuator(actuator, actuator_config)
            .and_then(|()| traverse.run(actuator, sampler, sink)),
        None => Err(DaqError::Configuration(
            "rig was released before the traverse started".to_string(),
        )),
    };

    if let Err(err) = &outcome {
        error!(
            phase = %traverse.phase(),
            iterations = traverse.iterations(),
            hardware = err.is_hardware(),
            error = %err,
            "Traverse aborted"
        );
    }

    let shutdown_result = shutdown.run();
    match (outcome, shutdown_result) {
        (Ok(summary), Ok(())) => {
            info!(
                iterations = summary.iterations,
                displacement = summary.last_record.displacement,
                "Traverse complete"
            );
            Ok(summary)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(shutdown_err)) => {
            warn!(error = %shutdown_err, "Shutdown after failed traverse also failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySink;
    use crate::hardware::mock::{
        CallJournal, HardwareCall, SimulatedSampler, SimulatedStage, StageFaults,
    };
    use crate::measurement::ChannelId;

    #[test]
    fn bring_up_tunes_both_channels() {
        let journal = CallJournal::new();
        let mut stage = SimulatedStage::new(journal.clone());

        bring_up_actuator(&mut stage, &ActuatorConfig::default()).unwrap();
        assert_eq!(
            journal.calls(),
            vec![
                HardwareCall::EnableSensors,
                HardwareCall::Stop(ChannelId(0)),
                HardwareCall::Stop(ChannelId(1)),
                HardwareCall::Configure(ChannelId(0)),
                HardwareCall::Configure(ChannelId(1)),
                HardwareCall::SetBufferedOutput(true),
                HardwareCall::FlushOutput,
            ]
        );
    }

    #[test]
    fn bring_up_rejects_missing_channels() {
        let mut stage = SimulatedStage::new(CallJournal::new()).with_channels(1);
        let err = bring_up_actuator(&mut stage, &ActuatorConfig::default()).unwrap_err();
        assert!(matches!(err, DaqError::HardwareConnect(_)));
    }

    #[test]
    fn rejected_profile_still_shuts_down() {
        let journal = CallJournal::new();
        let sink = MemorySink::new();
        let rig = Rig {
            actuator: Box::new(SimulatedStage::new(journal.clone()).with_faults(StageFaults {
                reject_configure: Some(17),
                ..StageFaults::default()
            })),
            sampler: Box::new(SimulatedSampler::new(journal.clone())),
            sink: Box::new(sink.clone()),
        };

        let err = run_traverse(rig, &Settings::default()).unwrap_err();
        assert!(matches!(err, DaqError::HardwareConfig(_)));
        assert_eq!(journal.count(|c| *c == HardwareCall::CloseActuator), 1);
        assert_eq!(journal.count(|c| *c == HardwareCall::CloseSampler), 1);
        assert!(sink.contents().records.is_empty());
        assert_eq!(sink.contents().closes, 1);
    }
}
