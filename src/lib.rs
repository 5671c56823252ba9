//! # Devsim Core
//!
//! Two device models for a SPICE-class circuit simulator.
//!
//! This library provides:
//! - A lossy transmission line (LTRA) using convolution with closed-form
//!   impulse responses for RLC, RC, RG and lossless lines
//! - A one-dimensional drift-diffusion device (DiodePDE) for diodes and
//!   bipolar structures, discretized with Scharfetter-Gummel fluxes
//! - The instance/master contract both models expose to a host solver
//! - A small deck reader and a dense test bench for driving one device
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`netlist`] - Reader for `.model` and device cards
//! - [`device`] - Solver state, options and the instance/master traits
//! - [`linalg`] - Matrix trait, Jacobian offsets and a dense LU solver
//! - [`ltra`] - Lossy transmission line model and instances
//! - [`pde`] - Drift-diffusion device
//! - [`bench`] - Newton driver and single-device test bench
//! - [`error`] - Error type shared by every module
//!
//! ## Usage
//!
//! ### Native CLI
//!
//! ```bash
//! devsim line.deck --tstop 20n --tstep 0.1n
//! devsim diode.deck --sweep-start 0 --sweep-stop 0.8 --sweep-step 0.05
//! ```
//!
//! ### Library
//!
//! ```no_run
//! use devsim_core::{netlist, Bench, DeviceOptions};
//!
//! let deck = netlist::parse("YD1 anode 0 NA=1e16 ND=1e16\n")?;
//! let mut bench = Bench::from_netlist(&deck, DeviceOptions::default())?;
//! bench.set_source("anode", 0.6)?;
//! bench.dc_operating_point()?;
//! println!("{:?}", bench.terminal_currents());
//! # Ok::<(), devsim_core::DevsimError>(())
//! ```
//!
//! ## Solver Contract
//!
//! The host owns the solution, state and matrix storage. For each Newton
//! iteration it calls, per device type:
//!
//! 1. `update_state` to pull terminal and internal values
//! 2. `update_secondary_state` with state derivatives (transient only)
//! 3. `load_dae_vectors` and `load_dae_matrices` to sum `f`, `q`, `df/dx`
//!    and `dq/dx`
//!
//! and `accept_step` once per accepted time point. Devices only ever write
//! to the Jacobian entries they registered through their stamp.

pub mod bench;
pub mod device;
pub mod error;
pub mod linalg;
pub mod ltra;
pub mod netlist;
pub mod pde;

// Re-export main types for convenience
pub use bench::{Bench, NewtonDriver, Termination, Waveform};
pub use device::{Device, DeviceInstance, DeviceMaster, DeviceOptions, SolverState};
pub use error::{DevsimError, Result};
pub use ltra::{LtraInstance, LtraMaster, LtraModel};
pub use pde::{DiodePdeInstance, DiodePdeParams, PdeMaster};

/// Newton convergence tolerance on the largest update
pub const CONVERGENCE_TOLERANCE: f64 = 1e-6;

/// Maximum Newton iterations per solve
pub const MAX_ITERATIONS: usize = 50;
