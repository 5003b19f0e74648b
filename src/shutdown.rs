//! Shutdown sequence for the rig.
//!
//! Runs once per rig, on every exit path: stop motion, close the actuator session, close
//! the sampler session, close the log sink. Stop failures are logged and otherwise
//! ignored so the sessions are still released. Dropping a sequencer that has not run
//! runs it, which covers panics and early returns.

use tracing::{debug, error, info, warn};

use crate::app::Rig;
use crate::error::{AppResult, DaqError};
use crate::measurement::ChannelId;

/// Stops the actuator and closes every session exactly once.
///
/// If `run` was never called, dropping the sequencer runs it.
pub struct ShutdownSequencer {
    rig: Option<Rig>,
    stop_channels: Vec<ChannelId>,
}

impl ShutdownSequencer {
    /// Take ownership of the rig. `stop_channels` are stopped in order, driven channel
    /// first.
    pub fn new(rig: Rig, stop_channels: Vec<ChannelId>) -> Self {
        Self {
            rig: Some(rig),
            stop_channels,
        }
    }

    /// Access to the sessions until the sequence has run.
    pub fn rig_mut(&mut self) -> Option<&mut Rig> {
        self.rig.as_mut()
    }

    /// Whether the sequence has already run.
    pub fn has_run(&self) -> bool {
        self.rig.is_none()
    }

    /// Run the sequence. Later calls are no-ops.
    ///
    /// Close failures are collected into [`DaqError::ShutdownFailed`] after every
    /// close has been attempted.
    pub fn run(&mut self) -> AppResult<()> {
        let Some(mut rig) = self.rig.take() else {
            debug!("Shutdown sequence already ran");
            return Ok(());
        };
        info!("Shutting down rig");

        for channel in &self.stop_channels {
            match rig.actuator.stop(*channel) {
                Ok(()) => info!(%channel, "Channel stopped"),
                Err(err) => warn!(%channel, error = %err, "Stop failed during shutdown"),
            }
        }
        if let Err(err) = rig.actuator.flush_output() {
            warn!(error = %err, "Flush failed during shutdown");
        }

        let mut errors = Vec::new();
        let steps: [(&str, AppResult<()>); 3] = [
            ("actuator", rig.actuator.close()),
            ("sampler", rig.sampler.close()),
            ("log sink", rig.sink.close()),
        ];
        for (what, result) in steps {
            match result {
                Ok(()) => info!("Closed {what}"),
                Err(err) => {
                    error!(error = %err, "Failed to close {what}");
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

impl Drop for ShutdownSequencer {
    fn drop(&mut self) {
        if self.rig.is_some() {
            warn!("Shutdown sequencer dropped before running; shutting down now");
            if let Err(err) = self.run() {
                error!(error = %err, "Shutdown on drop failed");
            }
        }
    }
}
