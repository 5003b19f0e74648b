//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while driving the rig.
//!
//! ## Error Hierarchy
//!
//! - **`HardwareConnect`**: A vendor session could not be opened, or the device does not
//!   expose the channels the traverse needs.
//! - **`HardwareConfig`**: A subsystem rejected a tuning or setup parameter.
//! - **`HardwareProtocol`**: A subsystem call returned a nonzero status code. The code is
//!   kept alongside the translated, human-readable diagnostic.
//! - **`HardwareTimeout`**: A blocking read produced nothing within its timeout.
//! - **`UnexpectedPacket`**: The actuator answered a position query with a packet that does
//!   not belong to it. Requests and responses are out of step from that point on.
//! - **`Config`** / **`Configuration`**: Loading or semantic validation of the settings.
//! - **`Io`** / **`Csv`**: Failures writing the displacement log.
//! - **`ShutdownFailed`**: Errors collected while releasing the sessions.
//!
//! Every hardware error is fatal at this layer. Nothing retries a motion command.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::measurement::{ChannelId, Packet};

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Which vendor subsystem produced a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Closed-loop positioning controller.
    Actuator,
    /// Analog voltage acquisition device.
    Sampler,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actuator => write!(f, "actuator"),
            Self::Sampler => write!(f, "sampler"),
        }
    }
}

/// Application error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The controller or device could not be opened.
    #[error("Hardware connect error: {0}")]
    HardwareConnect(String),

    /// A setup call was rejected during bring-up.
    #[error("Hardware config error: {0}")]
    HardwareConfig(String),

    /// A call returned a nonzero status code.
    #[error("{subsystem} error {code}: {message}")]
    HardwareProtocol {
        /// Which side reported it
        subsystem: Subsystem,
        /// Vendor status code
        code: i64,
        /// Vendor text for the code, when known
        message: String,
    },

    /// No answer within the allowed time.
    #[error("{subsystem} timed out after {timeout:?} waiting for {operation}")]
    HardwareTimeout {
        /// Which side failed to answer
        subsystem: Subsystem,
        /// The call that was waiting
        operation: &'static str,
        /// How long it waited
        timeout: Duration,
    },

    /// A response packet did not answer the pending query.
    #[error("Unexpected packet while reading channel {expected}: {packet:?}")]
    UnexpectedPacket {
        /// Channel the query was sent for
        expected: ChannelId,
        /// What arrived instead
        packet: Packet,
    },

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings were loaded but are not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV writer failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A vendor SDK was requested in a build without it.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Closing one or more sessions failed.
    #[error("Shutdown failed with {} error(s)", .0.len())]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// True for errors raised by a hardware subsystem (as opposed to local I/O or config).
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::HardwareConnect(_)
                | Self::HardwareConfig(_)
                | Self::HardwareProtocol { .. }
                | Self::HardwareTimeout { .. }
                | Self::UnexpectedPacket { .. }
        )
    }
}
