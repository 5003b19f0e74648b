//! Hardware sessions for the positioning controller and the analog sampler.
//!
//! - [`capabilities`]: the traits the traverse is written against
//! - [`position`]: synchronous position reads over the asynchronous query protocol
//! - [`mock`]: simulated stage and sampler
//! - `mcs` / `nidaqmx`: vendor SDK sessions, behind the `mcs_sdk` and `nidaqmx_sdk`
//!   features

pub mod capabilities;
pub mod mock;
pub mod position;
pub mod status;

#[cfg(feature = "mcs_sdk")]
pub mod mcs;
#[cfg(feature = "nidaqmx_sdk")]
pub mod nidaqmx;

pub use capabilities::{ActuatorSession, SamplerSession};
pub use position::PositionReader;
