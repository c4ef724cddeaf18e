//! AmpCycle instrument control core.
//!
//! Pure-logic library for the supervisory controller of a battery-powered
//! sample-processing instrument: a top-level device state machine, a nested
//! thermal-cycle sequencer, heater zone control, and a watchdog liveness
//! monitor. All hardware access sits behind the port traits in [`ports`];
//! the workers communicate over the bounded channels in [`channels`], so
//! the whole crate builds and tests on the host.

#![deny(unused_must_use)]

pub mod channels;
pub mod config;
pub mod control;
pub mod cycle;
pub mod heater;
pub mod logger;
pub mod messages;
pub mod ports;
pub mod supervisor;
pub mod watchdog;

mod error;

pub use error::{CoreError, Result};
