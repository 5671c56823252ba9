//! One-dimensional drift-diffusion device (DiodePDE).
//!
//! A semiconductor bar of length `L` discretized on a uniform mesh. Each
//! mesh node carries three unknowns (potential V, electron density n,
//! hole density p) and each external node is an electrode sitting on a
//! mesh node. Currents between nodes use the Scharfetter-Gummel scheme
//! with doping-, carrier- and field-dependent mobilities; SRH and Auger
//! recombination couple the continuity equations.
//!
//! Everything is solved in scaled units (see [`scaling`]). The first DC
//! sub-step solves nonlinear Poisson with Boltzmann densities to get a
//! good starting point; later solves use full drift-diffusion. Large
//! terminal voltage changes are applied by continuation, ramping the
//! contact voltages in steps no larger than `MAXVOLTDELTA`.
//!
//! - [`params`]: instance parameters
//! - [`material`], [`mobility`]: material tables and mobility models
//! - [`mesh`]: mesh, doping profiles, per-node arrays
//! - [`electrode`]: electrode placement and contact records
//! - [`stencil`]: variable layout and Jacobian stencil
//! - [`bernoulli`], [`physics`]: Bernoulli functions, fluxes, recombination
//! - [`instance`]: setup, state update, continuation
//! - [`load`], [`terminal`]: residual/Jacobian loads, terminal currents
//! - [`master`]: loops over every instance

pub mod bernoulli;
pub mod electrode;
pub mod instance;
pub mod load;
pub mod master;
pub mod material;
pub mod mesh;
pub mod mobility;
pub mod params;
pub mod physics;
pub mod scaling;
pub mod stencil;
pub mod terminal;

pub use electrode::{CarrierType, Electrode};
pub use instance::DiodePdeInstance;
pub use master::PdeMaster;
pub use material::Material;
pub use mesh::{Doping, Mesh, MeshFields};
pub use mobility::{Carrier, Mobility, MobilityModel};
pub use params::{DiodePdeParams, ElectrodeSpec, Given};
pub use scaling::ScalingVars;
pub use stencil::{NodeKind, VarLayout};

/// Elementary charge (C).
pub const ELEMENTARY_CHARGE: f64 = 1.602176565e-19;

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.3806488e-23;

/// Boltzmann constant (eV/K).
pub const BOLTZMANN_EV: f64 = 8.6173324e-5;

/// Vacuum permittivity (F/cm).
pub const VACUUM_PERMITTIVITY: f64 = 8.854187817e-14;

/// Electron rest mass (kg).
pub const ELECTRON_MASS: f64 = 9.10938291e-31;

/// Planck constant (J s).
pub const PLANCK: f64 = 6.62606957e-34;

/// Reference temperature (K).
pub const REF_TEMP: f64 = 300.15;
