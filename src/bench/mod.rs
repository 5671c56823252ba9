//! Small dense test bench around a single device.
//!
//! The bench wires one device to ideal voltage sources or resistors,
//! assembles everything into one dense system and runs Newton on it. It
//! drives the DC operating point (with DiodePDE continuation), DC sweeps
//! and a fixed-step backward Euler transient that maintains the LTRA
//! time list.
//!
//! - [`newton`]: Newton-Raphson over a [`NonlinearSystem`]
//! - [`circuit`]: the bench itself

pub mod circuit;
pub mod newton;

pub use circuit::{Bench, SweepPoint, Termination, TransientPoint, Waveform, GROUND_NAMES};
pub use newton::{NewtonDriver, NonlinearSystem};
