//! Bernoulli-type auxiliary functions for the Scharfetter-Gummel flux.
//!
//! Both functions are generic over [`DualNum`] so the same code yields
//! values (`f64`) and forward-mode derivatives (`Dual64`).
//!
//!   aux1(x) = x / sinh(x)
//!   aux2(x) = 1 / (1 + exp(x))

use num_dual::DualNum;

/// Largest argument for which `exp` does not overflow.
pub const MAX_EXP_ARG: f64 = 709.78;

/// Below this magnitude `aux1` switches to its Taylor series.
const AUX1_SERIES_LIMIT: f64 = 1.0e-3;

/// Beyond this magnitude `aux2` saturates at 0 or 1.
const AUX2_SATURATION: f64 = 37.0;

/// Beyond this argument `exp(-x)` underflows.
const AUX2_UNDERFLOW: f64 = 745.0;

/// `x / sinh(x)`, with a series near 0 and a clamped argument.
pub fn aux1<D: DualNum<f64> + Copy>(x: D) -> D {
    let xr = x.re();
    if xr.abs() < AUX1_SERIES_LIMIT {
        let x2 = x * x;
        D::from(1.0) - x2 / 6.0 * (D::from(1.0) - x2 * (7.0 / 60.0))
    } else {
        let x = if xr > MAX_EXP_ARG {
            D::from(MAX_EXP_ARG)
        } else if xr < -MAX_EXP_ARG {
            D::from(-MAX_EXP_ARG)
        } else {
            x
        };
        x / x.sinh()
    }
}

/// `1 / (1 + exp(x))`, evaluated piecewise to avoid overflow.
pub fn aux2<D: DualNum<f64> + Copy>(x: D) -> D {
    let xr = x.re();
    if xr <= -AUX2_SATURATION {
        D::from(1.0)
    } else if xr <= AUX2_SATURATION {
        (D::from(1.0) + x.exp()).recip()
    } else if xr <= AUX2_UNDERFLOW {
        (-x).exp()
    } else {
        D::from(0.0)
    }
}

/// `exp(x)` with the argument capped at [`MAX_EXP_ARG`].
pub fn safe_exp<D: DualNum<f64> + Copy>(x: D) -> D {
    if x.re() > MAX_EXP_ARG {
        D::from(MAX_EXP_ARG).exp()
    } else {
        x.exp()
    }
}
