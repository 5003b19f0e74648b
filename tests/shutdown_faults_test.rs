//! The shutdown sequence runs exactly once whichever call fails.

use traverse_daq::{
    app::{run_traverse, Rig},
    config::Settings,
    data::MemorySink,
    error::Subsystem,
    hardware::mock::{
        CallJournal, HardwareCall, SamplerFaults, SimulatedSampler, SimulatedStage, StageFaults,
    },
    measurement::ChannelId,
    DaqError,
};

const CH0: ChannelId = ChannelId(0);
const CH1: ChannelId = ChannelId(1);

struct Outcome {
    result: Result<u64, DaqError>,
    journal: CallJournal,
    sink: MemorySink,
}

fn run_with(stage_faults: StageFaults, sampler_faults: SamplerFaults) -> Outcome {
    let journal = CallJournal::new();
    let sink = MemorySink::new();
    let rig = Rig {
        actuator: Box::new(
            SimulatedStage::new(journal.clone())
                .with_ticks_per_read(1_000_000)
                .with_faults(stage_faults),
        ),
        sampler: Box::new(SimulatedSampler::new(journal.clone()).with_faults(sampler_faults)),
        sink: Box::new(sink.clone()),
    };
    let mut settings = Settings::default();
    settings.traverse.travel_threshold = 5_000_000;

    let result = run_traverse(rig, &settings).map(|summary| summary.iterations);
    Outcome {
        result,
        journal,
        sink,
    }
}

/// Both channels stopped, then every session closed once, in order.
fn assert_shut_down_once(outcome: &Outcome) {
    let journal = &outcome.journal;
    assert_eq!(journal.count(|c| *c == HardwareCall::CloseActuator), 1);
    assert_eq!(journal.count(|c| *c == HardwareCall::CloseSampler), 1);
    assert_eq!(outcome.sink.contents().closes, 1);

    let stop0 = journal
        .rposition(|c| *c == HardwareCall::Stop(CH0))
        .expect("driven channel stopped");
    let stop1 = journal
        .rposition(|c| *c == HardwareCall::Stop(CH1))
        .expect("auxiliary channel stopped");
    let close_actuator = journal
        .position(|c| *c == HardwareCall::CloseActuator)
        .expect("actuator closed");
    let close_sampler = journal
        .position(|c| *c == HardwareCall::CloseSampler)
        .expect("sampler closed");
    assert!(stop0 < stop1);
    assert!(stop1 < close_actuator);
    assert!(close_actuator < close_sampler);
    assert_eq!(journal.calls().last(), Some(&HardwareCall::CloseSampler));
}

#[test]
fn test_clean_run_shuts_down_once() {
    let outcome = run_with(StageFaults::default(), SamplerFaults::default());
    assert_eq!(outcome.result.as_ref().ok(), Some(&5));
    assert_shut_down_once(&outcome);
}

#[test]
fn test_rejected_move_shuts_down_once() {
    let outcome = run_with(
        StageFaults {
            reject_move: Some(11),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareProtocol {
            subsystem: Subsystem::Actuator,
            code: 11,
            ..
        })
    ));
    assert!(outcome.sink.contents().records.is_empty());
    assert_eq!(outcome.journal.count(|c| *c == HardwareCall::ReadVoltage), 0);
    assert_shut_down_once(&outcome);
}

#[test]
fn test_lost_position_packet_shuts_down_once() {
    // Queries 1-3 drain, 4 captures zero, 5 is the first polling read.
    let outcome = run_with(
        StageFaults {
            timeout_on_query: Some(5),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareTimeout {
            subsystem: Subsystem::Actuator,
            ..
        })
    ));
    assert!(outcome.sink.contents().records.is_empty());
    assert_shut_down_once(&outcome);
}

#[test]
fn test_error_packet_shuts_down_once() {
    let outcome = run_with(
        StageFaults {
            error_packet_on_query: Some((6, 137)),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareProtocol { code: 137, .. })
    ));
    assert_eq!(outcome.sink.contents().records.len(), 1);
    assert_shut_down_once(&outcome);
}

#[test]
fn test_rejected_flush_shuts_down_once() {
    // Flush 1 is bring-up, 2 follows the drain, 3 ends the first iteration.
    let outcome = run_with(
        StageFaults {
            reject_flush: Some((3, 42)),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareProtocol { code: 42, .. })
    ));
    assert!(outcome.sink.contents().records.is_empty());
    assert_shut_down_once(&outcome);
}

#[test]
fn test_sampler_error_shuts_down_once() {
    let outcome = run_with(
        StageFaults::default(),
        SamplerFaults {
            error_on_read: Some((3, -200279)),
            ..SamplerFaults::default()
        },
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareProtocol {
            subsystem: Subsystem::Sampler,
            code: -200279,
            ..
        })
    ));
    assert_eq!(outcome.sink.contents().records.len(), 2);
    assert_shut_down_once(&outcome);
}

#[test]
fn test_stop_failure_still_closes_sessions() {
    let outcome = run_with(
        StageFaults {
            reject_stop: Some((1, 9)),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    // Bring-up stops both channels first, so the traverse never starts.
    assert!(outcome.result.is_err());
    assert_shut_down_once(&outcome);
}

#[test]
fn test_close_failure_is_reported_after_success() {
    let outcome = run_with(
        StageFaults {
            reject_close: Some(2),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    match &outcome.result {
        Err(DaqError::ShutdownFailed(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("expected ShutdownFailed, got {other:?}"),
    }
    assert_eq!(outcome.sink.contents().records.len(), 5);
    assert_shut_down_once(&outcome);
}

#[test]
fn test_stop_failure_after_threshold_retries_stop() {
    // Stops 1-2 are bring-up, 3 is the first stop after the threshold trips.
    let outcome = run_with(
        StageFaults {
            reject_stop: Some((3, 21)),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareProtocol { code: 21, .. })
    ));

    let contents = outcome.sink.contents();
    let displacements: Vec<i64> = contents.records.iter().map(|r| r.displacement).collect();
    assert_eq!(
        displacements,
        vec![1_000_000, 2_000_000, 3_000_000, 4_000_000, 5_000_000]
    );
    assert!(contents.final_position.is_none());

    // Bring-up, the rejected stop, then the shutdown sequence.
    assert_eq!(outcome.journal.count(|c| *c == HardwareCall::Stop(CH0)), 3);
    assert_shut_down_once(&outcome);
}

#[test]
fn test_final_read_failure_still_stops_and_closes() {
    // Queries 1-3 drain, 4 captures zero, 5-9 poll, 10 is the read after the stop.
    let outcome = run_with(
        StageFaults {
            timeout_on_query: Some(10),
            ..StageFaults::default()
        },
        SamplerFaults::default(),
    );
    assert!(matches!(
        outcome.result,
        Err(DaqError::HardwareTimeout {
            subsystem: Subsystem::Actuator,
            ..
        })
    ));

    let contents = outcome.sink.contents();
    assert_eq!(contents.records.len(), 5);
    assert_eq!(contents.records[4].displacement, 5_000_000);
    assert!(contents.final_position.is_none());

    assert_eq!(outcome.journal.count(|c| *c == HardwareCall::Stop(CH0)), 3);
    assert_shut_down_once(&outcome);
}
