//! Lossy transmission line (LTRA) device.
//!
//! A two-port line described per unit length by R, L, G, C and a total
//! length. Four combinations have closed-form impulse responses:
//!
//! | Case | Nonzero | Treatment                                    |
//! |------|---------|----------------------------------------------|
//! | LC   | L, C    | Lossless delay line                          |
//! | RLC  | R, L, C | Delay line plus `h1'`, `h2`, `h3'` convolutions |
//! | RC   | R, C    | Diffusive line, convolutions without delay   |
//! | RG   | R, G    | Static two-port (`cosh`/`sinh`)              |
//!
//! During transient analysis each instance keeps the port voltages and
//! currents at every accepted time point. Convolution coefficients are
//! recomputed for every new time, the delayed samples `t - td` are
//! interpolated from the history, and accepted steps may schedule
//! breakpoints where a slope change will reach the far end.
//!
//! - [`special`]: Bessel, `erfc`, impulse responses, integration helpers
//! - [`coeffs`]: convolution coefficient tables
//! - [`model`]: model parameters and derived constants
//! - [`instance`]: per-instance history, loads and step control
//! - [`master`]: loops over every instance

pub mod coeffs;
pub mod instance;
pub mod master;
pub mod model;
pub mod special;

pub use coeffs::CoeffHistory;
pub use instance::{BreakpointPhase, LtraInstance, LtraInstanceParams};
pub use master::LtraMaster;
pub use model::{Interpolation, LtraModel, LtraParams, RgConstants, SpecialCase, StepLimit};
