//! Unit scaling for the drift-diffusion unknowns.
//!
//! The solver works on dimensionless variables: lengths in units of `x0`,
//! densities in `C0`, potentials in the thermal voltage `V0`, times in
//! `t0`. All physics formulas are written against the scaled values; the
//! constants here convert back.

use super::{ELEMENTARY_CHARGE, VACUUM_PERMITTIVITY};

/// Diffusion constant used when no time scale is given (cm^2/s).
pub const DEFAULT_DIFFUSION: f64 = 35.0;

/// Density scale when not scaling to the peak doping (cm^-3).
pub const DEFAULT_DENSITY_SCALE: f64 = 1.0e17;

/// Scale factors derived from the device geometry and temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingVars {
    /// Length (cm)
    pub x0: f64,
    /// Area (cm^2)
    pub a0: f64,
    /// Time (s)
    pub t0: f64,
    /// Potential (V)
    pub v0: f64,
    /// 1 / V0
    pub rv0: f64,
    /// Density (cm^-3)
    pub c0: f64,
    /// Diffusion coefficient (cm^2/s)
    pub d0: f64,
    /// Mobility (cm^2/Vs)
    pub u0: f64,
    /// Recombination rate (cm^-3/s)
    pub r0: f64,
    /// Electric field (V/cm)
    pub e0: f64,
    /// Current density (A/cm^2)
    pub j0: f64,
    /// Squared normalized Debye length
    pub l0: f64,
    /// Rate constant (cm^3/s)
    pub k0: f64,
}

/// What the scale factors are derived from.
#[derive(Debug, Clone, Copy)]
pub struct ScalingInputs {
    /// Thermal voltage (V)
    pub thermal_voltage: f64,
    /// Mesh extent (cm)
    pub width: f64,
    /// User length scale
    pub x0: Option<f64>,
    /// User density scale
    pub c0: Option<f64>,
    /// User time scale
    pub t0: Option<f64>,
    /// Peak doping times the density fraction, when scaling to it
    pub peak_density: Option<f64>,
}

impl ScalingVars {
    /// Derive all scale factors.
    pub fn new(inputs: &ScalingInputs) -> Self {
        let x0 = inputs.x0.unwrap_or(inputs.width);
        let a0 = x0 * x0;
        let v0 = inputs.thermal_voltage;
        let c0 = inputs
            .c0
            .or(inputs.peak_density)
            .unwrap_or(DEFAULT_DENSITY_SCALE);

        let (d0, t0) = match inputs.t0 {
            Some(t0) => (x0 * x0 / t0, t0),
            None => (DEFAULT_DIFFUSION, x0 * x0 / DEFAULT_DIFFUSION),
        };

        Self {
            x0,
            a0,
            t0,
            v0,
            rv0: 1.0 / v0,
            c0,
            d0,
            u0: d0 / v0,
            r0: d0 * c0 / a0,
            e0: v0 / x0,
            j0: ELEMENTARY_CHARGE * d0 * c0 / x0,
            l0: v0 * VACUUM_PERMITTIVITY / (ELEMENTARY_CHARGE * a0 * c0),
            k0: 1.0 / (c0 * t0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs() -> ScalingInputs {
        ScalingInputs {
            thermal_voltage: 0.025865,
            width: 1.0e-3,
            x0: None,
            c0: None,
            t0: None,
            peak_density: Some(1.0e14),
        }
    }

    #[test]
    fn test_defaults_follow_geometry() {
        let s = ScalingVars::new(&inputs());
        assert_eq!(s.x0, 1.0e-3);
        assert_eq!(s.c0, 1.0e14);
        assert_eq!(s.d0, DEFAULT_DIFFUSION);
        assert_relative_eq!(s.t0, 1.0e-6 / 35.0, max_relative = 1e-14);
        // R0 = C0 / t0 whenever t0 = x0^2 / D0
        assert_relative_eq!(s.r0, s.c0 / s.t0, max_relative = 1e-12);
        assert_relative_eq!(s.u0 * s.v0, s.d0, max_relative = 1e-14);
    }

    #[test]
    fn test_user_overrides() {
        let s = ScalingVars::new(&ScalingInputs {
            x0: Some(1.0e-4),
            c0: Some(1.0e16),
            t0: Some(1.0e-9),
            ..inputs()
        });
        assert_eq!(s.x0, 1.0e-4);
        assert_eq!(s.c0, 1.0e16);
        assert_eq!(s.t0, 1.0e-9);
        assert_relative_eq!(s.d0, 1.0e-8 / 1.0e-9, max_relative = 1e-14);
    }

    #[test]
    fn test_fixed_density_scale() {
        let s = ScalingVars::new(&ScalingInputs {
            peak_density: None,
            ..inputs()
        });
        assert_eq!(s.c0, DEFAULT_DENSITY_SCALE);
    }
}
