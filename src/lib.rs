//! Core library for the traverse_daq application.
//!
//! Coordinates a closed-loop positioning stage and an analog voltage sampler to log
//! time-aligned (voltage, displacement) pairs during a linear traverse. The binary in
//! `main.rs` wires configuration, logging and hardware selection around
//! [`app::run_traverse`].

pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod measurement;
pub mod shutdown;
pub mod traverse;

pub use app::{run_traverse, Rig};
pub use error::{AppResult, DaqError};
pub use traverse::{Traverse, TraversePhase, TraverseSummary};
