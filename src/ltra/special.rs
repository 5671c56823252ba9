//! Special functions and piecewise-linear integral helpers for the
//! transmission line impulse responses.
//!
//! Bessel functions use the polynomial approximations from Abramowitz and
//! Stegun 9.8; `erfc` is evaluated to near `f64` precision from its
//! power series and continued fraction.

use std::f64::consts::PI;

/// Modified Bessel function of the first kind, order 0.
pub fn bess_i0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75) * (x / 3.75);
        1.0 + y
            * (3.5156229
                + y * (3.0899424
                    + y * (1.2067492 + y * (0.2659732 + y * (0.360768e-1 + y * 0.45813e-2)))))
    } else {
        let y = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + y * (0.1328592e-1
                    + y * (0.225319e-2
                        + y * (-0.157565e-2
                            + y * (0.916281e-2
                                + y * (-0.2057706e-1
                                    + y * (0.2635537e-1
                                        + y * (-0.1647633e-1 + y * 0.392377e-2))))))))
    }
}

/// Modified Bessel function of the first kind, order 1.
pub fn bess_i1(x: f64) -> f64 {
    let ax = x.abs();
    let ans = if ax < 3.75 {
        let y = (x / 3.75) * (x / 3.75);
        ax * (0.5
            + y * (0.87890594
                + y * (0.51498869
                    + y * (0.15084934 + y * (0.2658733e-1 + y * (0.301532e-2 + y * 0.32411e-3))))))
    } else {
        let y = 3.75 / ax;
        let tail = 0.2282967e-1 + y * (-0.2895312e-1 + y * (0.1787654e-1 - y * 0.420059e-2));
        let poly = 0.39894228
            + y * (-0.3988024e-1
                + y * (-0.362018e-2 + y * (0.163801e-2 + y * (-0.1031555e-1 + y * tail))));
        poly * (ax.exp() / ax.sqrt())
    };
    if x < 0.0 {
        -ans
    } else {
        ans
    }
}

/// `I1(x) / x`, finite at the origin (limit 0.5).
pub fn bess_i1x_over_x(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75) * (x / 3.75);
        0.5 + y
            * (0.87890594
                + y * (0.51498869
                    + y * (0.15084934 + y * (0.2658733e-1 + y * (0.301532e-2 + y * 0.32411e-3)))))
    } else {
        let y = 3.75 / ax;
        let tail = 0.2282967e-1 + y * (-0.2895312e-1 + y * (0.1787654e-1 - y * 0.420059e-2));
        let poly = 0.39894228
            + y * (-0.3988024e-1
                + y * (-0.362018e-2 + y * (0.163801e-2 + y * (-0.1031555e-1 + y * tail))));
        poly * (ax.exp() / (ax * ax.sqrt()))
    }
}

/// Below this argument `erfc` sums the `erf` series; above it the
/// continued fraction converges quickly.
const ERFC_SERIES_LIMIT: f64 = 2.5;

/// Term count cap for the `erfc` series and continued fraction.
const ERFC_MAX_TERMS: usize = 500;

/// Complementary error function, accurate to a few ulps of `f64` for
/// arguments below the series limit and to roughly 1e-14 relative
/// beyond it.
pub fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    if x < ERFC_SERIES_LIMIT {
        1.0 - erf_series(x)
    } else {
        erfc_continued_fraction(x)
    }
}

/// `erf(x) = 2/sqrt(pi) exp(-x^2) sum 2^n x^(2n+1) / (2n+1)!!`; every term
/// is positive so nothing cancels.
fn erf_series(x: f64) -> f64 {
    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    for n in 1..ERFC_MAX_TERMS {
        term *= 2.0 * x2 / (2 * n + 1) as f64;
        sum += term;
        if term < sum * f64::EPSILON {
            break;
        }
    }
    2.0 / PI.sqrt() * (-x2).exp() * sum
}

/// `erfc(x) = exp(-x^2) / (sqrt(pi) (x + (1/2)/(x + 1/(x + (3/2)/(x + ...)))))`
/// evaluated with the modified Lentz method.
fn erfc_continued_fraction(x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut f = x;
    let mut c = x;
    let mut d = 0.0;
    for n in 1..ERFC_MAX_TERMS {
        let a = 0.5 * n as f64;
        d = x + a * d;
        if d == 0.0 {
            d = TINY;
        }
        c = x + a / c;
        if c == 0.0 {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = c * d;
        f *= delta;
        if (delta - 1.0).abs() < f64::EPSILON {
            break;
        }
    }
    (-x * x).exp() / (PI.sqrt() * f)
}

/// Integral over `[lo, hi]` of the line through `(t1, lo_val)` and
/// `(t2, hi_val)`.
pub fn intlin(lo: f64, hi: f64, lo_val: f64, hi_val: f64, t1: f64, t2: f64) -> f64 {
    let width = t2 - t1;
    if width == 0.0 {
        return 0.0;
    }
    let m = (hi_val - lo_val) / width;
    (hi - lo) * lo_val + 0.5 * m * ((hi - t1) * (hi - t1) - (lo - t1) * (lo - t1))
}

/// Integral over `[lo, hi]` of the once-integrated line, the inner
/// integral starting at `other_lo`.
pub fn twice_intlin(
    lo: f64,
    hi: f64,
    other_lo: f64,
    lo_val: f64,
    hi_val: f64,
    t1: f64,
    t2: f64,
) -> f64 {
    let width = t2 - t1;
    if width == 0.0 {
        return 0.0;
    }
    let m = (hi_val - lo_val) / width;

    let temp1 = hi - t1;
    let temp2 = lo - t1;
    let temp3 = other_lo - t1;

    let mut dummy = lo_val * ((hi - other_lo) * (hi - other_lo) - (lo - other_lo) * (lo - other_lo));
    dummy += m * ((temp1 * temp1 * temp1 - temp2 * temp2 * temp2) / 3.0 - temp3 * temp3 * (hi - lo));
    dummy * 0.5
}

/// Integral over `[lo, hi]` of the twice-integrated line, inner
/// integrals starting at `second_lo` and `third_lo`.
#[allow(clippy::too_many_arguments)]
pub fn thrice_intlin(
    lo: f64,
    hi: f64,
    second_lo: f64,
    third_lo: f64,
    lo_val: f64,
    hi_val: f64,
    t1: f64,
    t2: f64,
) -> f64 {
    let width = t2 - t1;
    if width == 0.0 {
        return 0.0;
    }
    let m = (hi_val - lo_val) / width;

    let temp1 = hi - t1;
    let temp2 = lo - t1;
    let temp3 = second_lo - t1;
    let temp4 = third_lo - t1;
    let temp5 = hi - third_lo;
    let temp6 = lo - third_lo;
    let temp7 = second_lo - third_lo;
    let temp8 = hi - lo;
    let temp9 = hi - second_lo;
    let temp10 = lo - second_lo;

    let mut dummy = lo_val * ((temp5.powi(3) - temp6.powi(3)) / 3.0 - temp7 * temp5 * temp8);
    dummy += m
        * (((temp1.powi(4) - temp2.powi(4)) * 0.25 - temp3.powi(3) * temp8) / 3.0
            - temp4 * temp4 * 0.5 * (temp9 * temp9 - temp10 * temp10));
    dummy * 0.5
}

/// Lagrange weights for quadratic interpolation at `t` through `t1, t2, t3`.
///
/// Returns `None` when two of the points coincide.
pub fn quad_interp(t: f64, t1: f64, t2: f64, t3: f64) -> Option<[f64; 3]> {
    if t == t1 {
        return Some([1.0, 0.0, 0.0]);
    }
    if t == t2 {
        return Some([0.0, 1.0, 0.0]);
    }
    if t == t3 {
        return Some([0.0, 0.0, 1.0]);
    }
    if t2 == t1 || t2 == t3 || t1 == t3 {
        return None;
    }

    let c1 = (t - t2) * (t - t3) / ((t1 - t2) * (t1 - t3));
    let c2 = (t - t1) * (t - t3) / ((t2 - t1) * (t2 - t3));
    let c3 = (t - t1) * (t - t2) / ((t2 - t3) * (t1 - t3));
    Some([c1, c2, c3])
}

/// Weights for linear interpolation at `t` between `t1` and `t2`.
///
/// Returns `None` when the points coincide.
pub fn lin_interp(t: f64, t1: f64, t2: f64) -> Option<[f64; 2]> {
    if t1 == t2 {
        return None;
    }
    if t == t1 {
        return Some([1.0, 0.0]);
    }
    if t == t2 {
        return Some([0.0, 1.0]);
    }
    let c2 = (t - t1) / (t2 - t1);
    Some([1.0 - c2, c2])
}

/// Area test for whether three samples lie on a straight line.
///
/// Compares the trapezoid under the chord from the first to the third
/// point with the two trapezoids through the middle point.
#[allow(clippy::too_many_arguments)]
pub fn straight_line_check(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
    reltol: f64,
    abstol: f64,
) -> bool {
    let q1 = 0.5 * (y1 + y2) * (x2 - x1);
    let q2 = 0.5 * (y2 + y3) * (x3 - x2);
    let q3 = 0.5 * (y1 + y3) * (x3 - x1);
    let error = (q3 - q1 - q2).abs();
    let area = (q1 + q2).abs();
    area * reltol + abstol >= error
}

// Impulse responses of the RLC line

/// `h1'(t)`: derivative part of the input admittance response.
pub fn rlc_h1dash(t: f64, alpha: f64, beta: f64) -> f64 {
    if alpha == 0.0 {
        return 0.0;
    }
    let exparg = -beta * t;
    let besselarg = alpha * t;
    (bess_i1(besselarg) - bess_i0(besselarg)) * alpha * exparg.exp()
}

/// `h2(t)`: delayed current-transfer response, zero before the delay `td`.
pub fn rlc_h2(t: f64, td: f64, alpha: f64, beta: f64) -> f64 {
    if alpha == 0.0 || t < td {
        return 0.0;
    }
    let besselarg = if t != td {
        alpha * (t * t - td * td).sqrt()
    } else {
        0.0
    };
    alpha * alpha * td * (-beta * t).exp() * bess_i1x_over_x(besselarg)
}

/// `h3'(t)`: delayed voltage-transfer response, zero before the delay `td`.
pub fn rlc_h3dash(t: f64, td: f64, alpha: f64, beta: f64) -> f64 {
    if alpha == 0.0 || t < td {
        return 0.0;
    }
    let besselarg = if t != td {
        alpha * (t * t - td * td).sqrt()
    } else {
        0.0
    };
    let returnval = alpha * t * bess_i1x_over_x(besselarg) - bess_i0(besselarg);
    returnval * alpha * (-beta * t).exp()
}

/// Twice-integrated `h1'`.
pub fn rlc_h1dash_twice_int(t: f64, beta: f64) -> f64 {
    if beta == 0.0 {
        return t;
    }
    let arg = beta * t;
    if arg == 0.0 {
        return 0.0;
    }
    (bess_i1(arg) + bess_i0(arg)) * t * (-arg).exp() - t
}

/// Once-integrated `h3'`.
pub fn rlc_h3dash_int(t: f64, td: f64, beta: f64) -> f64 {
    if t <= td || beta == 0.0 {
        return 0.0;
    }
    let besselarg = beta * (t * t - td * td).sqrt();
    (-beta * t).exp() * bess_i0(besselarg) - (-beta * td).exp()
}

// Impulse responses of the RC line

/// Twice-integrated `h1'` of the RC line.
pub fn rc_h1dash_twice_int(t: f64, cbyr: f64) -> f64 {
    (4.0 * cbyr * t / PI).sqrt()
}

/// Twice-integrated `h2` of the RC line.
pub fn rc_h2_twice_int(t: f64, rclsqr: f64) -> f64 {
    if t == 0.0 {
        return 0.0;
    }
    let temp = rclsqr / (4.0 * t);
    let erfc_term = if temp >= 100.0 { 0.0 } else { erfc(temp.sqrt()) };
    (t + rclsqr * 0.5) * erfc_term - (t * rclsqr / PI).sqrt() * (-temp).exp()
}

/// Twice-integrated `h3'` of the RC line.
pub fn rc_h3dash_twice_int(t: f64, cbyr: f64, rclsqr: f64) -> f64 {
    if t == 0.0 {
        return 0.0;
    }
    let temp = rclsqr / (4.0 * t);
    let erfc_term = if temp >= 100.0 { 0.0 } else { erfc(temp.sqrt()) };
    cbyr.sqrt() * (2.0 * (t / PI).sqrt() * (-temp).exp() - rclsqr.sqrt() * erfc_term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_bessel_reference_values() {
        assert_abs_diff_eq!(bess_i0(0.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(bess_i0(1.0), 1.2660658777, max_relative = 1e-6);
        assert_relative_eq!(bess_i0(5.0), 27.239871823, max_relative = 1e-6);
        assert_relative_eq!(bess_i1(1.0), 0.5651591040, max_relative = 1e-6);
        assert_relative_eq!(bess_i1(-1.0), -0.5651591040, max_relative = 1e-6);
        assert_relative_eq!(bess_i1(5.0), 24.335642142, max_relative = 1e-6);
    }

    #[test]
    fn test_i1x_over_x_matches_ratio() {
        assert_abs_diff_eq!(bess_i1x_over_x(0.0), 0.5, epsilon = 1e-12);
        for &x in &[0.3, 2.0, 3.74, 3.76, 8.0] {
            assert_relative_eq!(bess_i1x_over_x(x), bess_i1(x) / x, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_erfc_reference_values() {
        assert_eq!(erfc(0.0), 1.0);
        assert_relative_eq!(erfc(0.5), 0.4795001221869535, max_relative = 1e-13);
        assert_relative_eq!(erfc(1.0), 0.15729920705028513, max_relative = 1e-13);
        assert_relative_eq!(erfc(2.0), 4.677734981047266e-3, max_relative = 1e-12);
        assert_relative_eq!(erfc(-1.0), 1.8427007929497148, max_relative = 1e-13);
    }

    #[test]
    fn test_erfc_tail_keeps_relative_precision() {
        assert_relative_eq!(erfc(3.0), 2.209049699858544e-5, max_relative = 1e-12);
        assert_relative_eq!(erfc(5.0), 1.5374597944280349e-12, max_relative = 1e-12);
        // Both branches agree where they meet
        let below = erfc(ERFC_SERIES_LIMIT - 1e-12);
        let above = erfc(ERFC_SERIES_LIMIT);
        assert_relative_eq!(below, above, max_relative = 1e-11);
    }

    #[test]
    fn test_interval_helpers_degenerate_to_zero() {
        assert_eq!(intlin(0.0, 1.0, 1.0, 2.0, 3.0, 3.0), 0.0);
        assert_eq!(twice_intlin(0.0, 1.0, 0.0, 1.0, 2.0, 3.0, 3.0), 0.0);
        assert_eq!(thrice_intlin(0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0), 0.0);
    }

    #[test]
    fn test_intlin_matches_trapezoid() {
        // Line from (0, 1) to (2, 3); integral over [0, 2] is 4
        assert_relative_eq!(intlin(0.0, 2.0, 1.0, 3.0, 0.0, 2.0), 4.0);
        // Over [1, 2]: values 2 and 3
        assert_relative_eq!(intlin(1.0, 2.0, 1.0, 3.0, 0.0, 2.0), 2.5);
    }

    #[test]
    fn test_twice_intlin_of_constant() {
        // Constant 1 integrated twice from 0 to t gives t^2 / 2
        assert_relative_eq!(twice_intlin(0.0, 2.0, 0.0, 1.0, 1.0, 0.0, 1.0), 2.0);
    }

    #[test]
    fn test_quad_interp_exact_hits_and_sum() {
        assert_eq!(quad_interp(1.0, 1.0, 2.0, 4.0), Some([1.0, 0.0, 0.0]));
        assert_eq!(quad_interp(2.0, 1.0, 2.0, 4.0), Some([0.0, 1.0, 0.0]));
        assert_eq!(quad_interp(4.0, 1.0, 2.0, 4.0), Some([0.0, 0.0, 1.0]));
        assert_eq!(quad_interp(3.0, 1.0, 1.0, 4.0), None);

        for &t in &[0.5, 1.5, 3.0, 5.0] {
            let c = quad_interp(t, 1.0, 2.0, 4.0).unwrap();
            assert_relative_eq!(c.iter().sum::<f64>(), 1.0, max_relative = 1e-12);
            // Reproduces a parabola exactly
            let y = |x: f64| x * x - 3.0 * x + 1.0;
            let interp = c[0] * y(1.0) + c[1] * y(2.0) + c[2] * y(4.0);
            assert_relative_eq!(interp, y(t), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_lin_interp() {
        assert_eq!(lin_interp(1.0, 1.0, 3.0), Some([1.0, 0.0]));
        assert_eq!(lin_interp(3.0, 1.0, 3.0), Some([0.0, 1.0]));
        assert_eq!(lin_interp(2.0, 3.0, 3.0), None);
        let c = lin_interp(1.5, 1.0, 3.0).unwrap();
        assert_relative_eq!(c[0], 0.75);
        assert_relative_eq!(c[0] + c[1], 1.0);
    }

    #[test]
    fn test_straight_line_check() {
        // Exactly collinear, crossing zero
        assert!(straight_line_check(0.0, -1.0, 1.0, 0.0, 2.0, 1.0, 0.0, 0.0));
        assert!(straight_line_check(2.0, 1.0, 1.0, 0.0, 0.0, -1.0, 0.0, 0.0));
        // A kink is rejected with tight tolerances
        assert!(!straight_line_check(0.0, 0.0, 1.0, 1.0, 2.0, 0.0, 1e-3, 1e-12));

        let a = straight_line_check(0.0, 1.0, 0.5, 1.3, 2.0, 1.1, 0.1, 1e-3);
        let b = straight_line_check(2.0, 1.1, 0.5, 1.3, 0.0, 1.0, 0.1, 1e-3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rlc_responses_vanish_before_delay() {
        assert_eq!(rlc_h2(0.5, 1.0, 0.2, 0.2), 0.0);
        assert_eq!(rlc_h3dash(0.5, 1.0, 0.2, 0.2), 0.0);
        assert_eq!(rlc_h3dash_int(1.0, 1.0, 0.2), 0.0);
        assert_eq!(rlc_h1dash(1.0, 0.0, 0.0), 0.0);
        assert_eq!(rlc_h1dash_twice_int(2.0, 0.0), 2.0);
        assert!(rlc_h2(1.5, 1.0, 0.2, 0.2) > 0.0);
    }

    #[test]
    fn test_rc_responses_at_origin() {
        assert_eq!(rc_h2_twice_int(0.0, 1.0), 0.0);
        assert_eq!(rc_h3dash_twice_int(0.0, 1.0, 1.0), 0.0);
        assert_relative_eq!(rc_h1dash_twice_int(PI, 1.0), 2.0);
    }
}
