//! Convolution coefficient setup.
//!
//! For the current time the impulse responses are integrated twice
//! against a piecewise-linear history, so each convolution reduces to a
//! weighted sum over the stored time points. Coefficients are filled from
//! the newest point backwards and the scan stops once a coefficient drops
//! below `reltol` times the first coefficient.

use std::f64::consts::PI;

use super::special::{bess_i0, bess_i1, bess_i1x_over_x, erfc, intlin, rlc_h2, twice_intlin};

/// Entries added each time a history buffer grows.
pub const HISTORY_BLOCK: usize = 10;

/// Per-instance convolution coefficients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoeffHistory {
    /// Coefficients of `h1'` against the port voltages
    pub h1dash: Vec<f64>,
    /// Coefficients of `h2` against the far-end currents
    pub h2: Vec<f64>,
    /// Coefficients of `h3'` against the far-end voltages
    pub h3dash: Vec<f64>,
    /// Weight of the current time point in the `h1'` sum
    pub h1dash_first: f64,
    /// Weight of the delayed point in the `h2` sum
    pub h2_first: f64,
    /// Weight of the delayed point in the `h3'` sum
    pub h3dash_first: f64,
    /// Index of the newest time point at least one delay in the past
    pub aux_index: usize,
}

impl CoeffHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated length of the coefficient lists.
    pub fn len(&self) -> usize {
        self.h1dash.len()
    }

    /// True before the first allocation.
    pub fn is_empty(&self) -> bool {
        self.h1dash.is_empty()
    }

    /// Resize all three lists, zero-filling new entries. Never shrinks.
    pub fn grow_to(&mut self, size: usize) {
        if size > self.len() {
            self.h1dash.resize(size, 0.0);
            self.h2.resize(size, 0.0);
            self.h3dash.resize(size, 0.0);
        }
    }

    /// Make sure `index` can be written, growing by whole blocks.
    pub fn ensure_index(&mut self, index: usize) {
        if index >= self.len() {
            let blocks = index / HISTORY_BLOCK + 1;
            self.grow_to(blocks * HISTORY_BLOCK);
        }
    }

    /// Coefficients for an RC line at `curtime`.
    ///
    /// `timelist[timeindex]` is the newest accepted point.
    pub fn setup_rc(
        &mut self,
        cbyr: f64,
        rclsqr: f64,
        curtime: f64,
        timelist: &[f64],
        timeindex: usize,
        reltol: f64,
    ) {
        self.ensure_index(timeindex);

        let sqrt_rclsqr = rclsqr.sqrt();
        let sqrt_cbyr = cbyr.sqrt();
        let erfc_exp = |hilimit: f64| {
            let temp = rclsqr / (4.0 * hilimit);
            let erfc_term = if temp >= 100.0 { 0.0 } else { erfc(temp.sqrt()) };
            (erfc_term, (-temp).exp())
        };
        let h1_at = |hilimit: f64| (4.0 * cbyr * hilimit / PI).sqrt();
        let h2_at = |hilimit: f64, erfc_term: f64, exp_term: f64| {
            if hilimit != 0.0 {
                (hilimit + rclsqr * 0.5) * erfc_term - (hilimit * rclsqr / PI).sqrt() * exp_term
            } else {
                0.0
            }
        };
        let h3_at = |hilimit: f64, erfc_term: f64, exp_term: f64| {
            if hilimit != 0.0 {
                sqrt_cbyr * (2.0 * (hilimit / PI).sqrt() * exp_term - sqrt_rclsqr * erfc_term)
            } else {
                0.0
            }
        };

        // The first coefficients
        let mut delta1 = curtime - timelist[timeindex];
        let mut hilimit1 = delta1;

        let mut h1hi = h1_at(hilimit1);
        let mut h1dummy = h1hi / delta1;
        self.h1dash_first = h1dummy;
        let h1rel = (h1dummy * reltol).abs();

        let (erfc_term, exp_term) = erfc_exp(hilimit1);

        let mut h2hi = h2_at(hilimit1, erfc_term, exp_term);
        let mut h2dummy = h2hi / delta1;
        self.h2_first = h2dummy;
        let h2rel = (h2dummy * reltol).abs();

        let mut h3hi = h3_at(hilimit1, erfc_term, exp_term);
        let mut h3dummy = h3hi / delta1;
        self.h3dash_first = h3dummy;
        let h3rel = (h3dummy * reltol).abs();

        let (mut doh1, mut doh2, mut doh3) = (true, true, true);

        for i in (1..=timeindex).rev() {
            delta1 = timelist[i] - timelist[i - 1];
            hilimit1 = curtime - timelist[i - 1];

            if doh1 {
                let h1lo = h1hi;
                h1hi = h1_at(hilimit1);
                let previous = h1dummy;
                h1dummy = (h1hi - h1lo) / delta1;
                self.h1dash[i] = h1dummy - previous;
                if self.h1dash[i].abs() < h1rel {
                    doh1 = false;
                }
            } else {
                self.h1dash[i] = 0.0;
            }

            let (erfc_term, exp_term) = if doh2 || doh3 {
                erfc_exp(hilimit1)
            } else {
                (0.0, 0.0)
            };

            if doh2 {
                let h2lo = h2hi;
                h2hi = h2_at(hilimit1, erfc_term, exp_term);
                let previous = h2dummy;
                h2dummy = (h2hi - h2lo) / delta1;
                self.h2[i] = h2dummy - previous;
                if self.h2[i].abs() < h2rel {
                    doh2 = false;
                }
            } else {
                self.h2[i] = 0.0;
            }

            if doh3 {
                let h3lo = h3hi;
                h3hi = h3_at(hilimit1, erfc_term, exp_term);
                let previous = h3dummy;
                h3dummy = (h3hi - h3lo) / delta1;
                self.h3dash[i] = h3dummy - previous;
                if self.h3dash[i].abs() < h3rel {
                    doh3 = false;
                }
            } else {
                self.h3dash[i] = 0.0;
            }
        }
    }

    /// Coefficients for an RLC line with delay `td` at `curtime`.
    ///
    /// Also records `aux_index`, the newest point lying at least `td`
    /// before `curtime`.
    #[allow(clippy::too_many_arguments)]
    pub fn setup_rlc(
        &mut self,
        td: f64,
        alpha: f64,
        beta: f64,
        curtime: f64,
        timelist: &[f64],
        timeindex: usize,
        reltol: f64,
    ) {
        self.ensure_index(timeindex);

        let aux_index = delayed_index(td, curtime, timelist, timeindex);

        let alphasq_t = alpha * alpha * td;
        let exp_beta_t = (-beta * td).exp();
        let besselarg_at = |hilimit: f64| {
            if hilimit > td {
                alpha * (hilimit * hilimit - td * td).sqrt()
            } else {
                0.0
            }
        };
        let h2_at = |hilimit: f64, expterm: f64, besselarg: f64| {
            if alpha == 0.0 || hilimit < td {
                0.0
            } else {
                alphasq_t * expterm * bess_i1x_over_x(besselarg)
            }
        };
        let h3_at = |hilimit: f64, expterm: f64, besselarg: f64| {
            if hilimit <= td || beta == 0.0 {
                0.0
            } else {
                expterm * bess_i0(besselarg) - exp_beta_t
            }
        };
        let h1_at = |hilimit: f64, expterm: f64| {
            if beta == 0.0 {
                hilimit
            } else if hilimit == 0.0 {
                0.0
            } else {
                let arg = beta * hilimit;
                (bess_i1(arg) + bess_i0(arg)) * hilimit * expterm - hilimit
            }
        };

        // The first coefficients of the delayed responses
        let (mut h2lo, mut h2hi, mut h2dummy, h2rel, mut h3hi, mut h3dummy, h3rel) = if aux_index != 0 {
            let lolimit = td;
            let hilimit = curtime - timelist[aux_index];
            let delta = hilimit - lolimit;

            let expterm = (-beta * hilimit).exp();
            let besselarg = besselarg_at(hilimit);

            let h2lo = rlc_h2(td, td, alpha, beta);
            let h2hi = h2_at(hilimit, expterm, besselarg);
            let h2dummy = twice_intlin(lolimit, hilimit, lolimit, h2lo, h2hi, lolimit, hilimit) / delta;

            // h3 starts from zero at the delay
            let h3hi = h3_at(hilimit, expterm, besselarg);
            let h3dummy = intlin(lolimit, hilimit, 0.0, h3hi, lolimit, hilimit) / delta;

            (
                h2lo,
                h2hi,
                h2dummy,
                (reltol * h2dummy).abs(),
                h3hi,
                h3dummy,
                (h3dummy * reltol).abs(),
            )
        } else {
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
        };
        self.h2_first = h2dummy;
        self.h3dash_first = h3dummy;

        let mut lolimit1 = 0.0;
        let mut hilimit1 = curtime - timelist[timeindex];
        let mut delta1 = hilimit1 - lolimit1;
        let mut expterm = (-beta * hilimit1).exp();

        let mut h1hi = h1_at(hilimit1, expterm);
        let mut h1dummy = h1hi / delta1;
        self.h1dash_first = h1dummy;
        let h1rel = (h1dummy * reltol).abs();

        let (mut doh1, mut doh2, mut doh3) = (true, true, true);

        for i in (1..=timeindex).rev() {
            let (lolimit2, hilimit2) = (lolimit1, hilimit1);
            if doh1 || doh2 || doh3 {
                lolimit1 = hilimit2;
                hilimit1 = curtime - timelist[i - 1];
                delta1 = timelist[i] - timelist[i - 1];
                expterm = (-beta * hilimit1).exp();
            }

            if doh1 {
                let h1lo = h1hi;
                h1hi = h1_at(hilimit1, expterm);
                let previous = h1dummy;
                h1dummy = (h1hi - h1lo) / delta1;
                self.h1dash[i] = h1dummy - previous;
                if self.h1dash[i].abs() <= h1rel {
                    doh1 = false;
                }
            } else {
                self.h1dash[i] = 0.0;
            }

            if i > aux_index {
                continue;
            }

            let besselarg = if doh2 || doh3 {
                besselarg_at(hilimit1)
            } else {
                0.0
            };

            if doh2 {
                let (h2lo2, h2hi2) = (h2lo, h2hi);
                h2lo = h2hi2;
                h2hi = h2_at(hilimit1, expterm, besselarg);
                let previous = h2dummy;
                h2dummy =
                    twice_intlin(lolimit1, hilimit1, lolimit1, h2lo, h2hi, lolimit1, hilimit1) / delta1;
                self.h2[i] = h2dummy - previous
                    + intlin(lolimit2, hilimit2, h2lo2, h2hi2, lolimit2, hilimit2);
                if self.h2[i].abs() <= h2rel {
                    doh2 = false;
                }
            } else {
                self.h2[i] = 0.0;
            }

            if doh3 {
                let h3lo = h3hi;
                h3hi = h3_at(hilimit1, expterm, besselarg);
                let previous = h3dummy;
                h3dummy = intlin(lolimit1, hilimit1, h3lo, h3hi, lolimit1, hilimit1) / delta1;
                self.h3dash[i] = h3dummy - previous;
                if self.h3dash[i].abs() <= h3rel {
                    doh3 = false;
                }
            } else {
                self.h3dash[i] = 0.0;
            }
        }

        self.aux_index = aux_index;
    }
}

/// Newest time point lying at least `td` before `curtime`, stepping back
/// one more when a point sits exactly one delay back.
pub fn delayed_index(td: f64, curtime: f64, timelist: &[f64], timeindex: usize) -> usize {
    if td == 0.0 {
        return timeindex;
    }
    if curtime - td <= 0.0 {
        return 0;
    }
    for i in (0..=timeindex).rev() {
        let elapsed = curtime - timelist[i];
        if elapsed == td {
            return i.saturating_sub(1);
        }
        if elapsed > td {
            return i;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltra::special::{rc_h1dash_twice_int, rc_h2_twice_int, rc_h3dash_twice_int};
    use approx::assert_relative_eq;

    #[test]
    fn test_history_grows_in_blocks() {
        let mut coeffs = CoeffHistory::new();
        assert!(coeffs.is_empty());
        coeffs.ensure_index(0);
        assert_eq!(coeffs.len(), 10);
        coeffs.ensure_index(9);
        assert_eq!(coeffs.len(), 10);
        coeffs.ensure_index(10);
        assert_eq!(coeffs.len(), 20);
        coeffs.grow_to(5);
        assert_eq!(coeffs.len(), 20);
    }

    #[test]
    fn test_rc_first_coefficients() {
        let (cbyr, rclsqr) = (1e-10, 1e-8);
        let times = [0.0, 1e-9, 2e-9];
        let curtime = 3e-9;
        let mut coeffs = CoeffHistory::new();
        coeffs.setup_rc(cbyr, rclsqr, curtime, &times, 2, 0.0);

        let h = curtime - times[2];
        assert_relative_eq!(coeffs.h1dash_first, rc_h1dash_twice_int(h, cbyr) / h, max_relative = 1e-12);
        assert_relative_eq!(coeffs.h2_first, rc_h2_twice_int(h, rclsqr) / h, max_relative = 1e-12);
        assert_relative_eq!(
            coeffs.h3dash_first,
            rc_h3dash_twice_int(h, cbyr, rclsqr) / h,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_rc_coefficients_are_second_differences() {
        let cbyr = 1e-10;
        let times = [0.0, 1e-9, 2e-9, 3e-9];
        let curtime = 4e-9;
        let mut coeffs = CoeffHistory::new();
        coeffs.setup_rc(cbyr, 1e-8, curtime, &times, 3, 0.0);

        // Rebuild h1' coefficients from the twice-integrated response
        let f = |t: f64| rc_h1dash_twice_int(t, cbyr);
        let mut prev_slope = f(curtime - times[3]) / (curtime - times[3]);
        for i in (1..=3).rev() {
            let slope = (f(curtime - times[i - 1]) - f(curtime - times[i])) / (times[i] - times[i - 1]);
            assert_relative_eq!(coeffs.h1dash[i], slope - prev_slope, max_relative = 1e-10);
            prev_slope = slope;
        }
    }

    #[test]
    fn test_rc_truncation_zeroes_tail() {
        let times: Vec<f64> = (0..8).map(|i| i as f64 * 1e-9).collect();
        let mut coeffs = CoeffHistory::new();
        // A huge reltol stops every scan after the first entry
        coeffs.setup_rc(1e-10, 1e-8, 8e-9, &times, 7, 1e6);
        assert_ne!(coeffs.h1dash[7], 0.0);
        for i in 1..7 {
            assert_eq!(coeffs.h1dash[i], 0.0);
        }
    }

    #[test]
    fn test_delayed_index() {
        let times = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(delayed_index(0.0, 3.5, &times, 3), 3);
        assert_eq!(delayed_index(4.0, 3.5, &times, 3), 0);
        assert_eq!(delayed_index(1.2, 3.5, &times, 3), 2);
        // A point exactly one delay back steps back one more
        assert_eq!(delayed_index(1.5, 3.5, &times, 3), 1);
        assert_eq!(delayed_index(1.0, 3.0, &times, 3), 1);
    }

    #[test]
    fn test_rlc_lossless_limit() {
        // beta == 0 reduces h1' to the identity ramp and drops h2/h3
        let times = [0.0, 1.0, 2.0];
        let mut coeffs = CoeffHistory::new();
        coeffs.setup_rlc(1.0, 0.0, 0.0, 3.0, &times, 2, 0.0);
        assert_relative_eq!(coeffs.h1dash_first, 1.0);
        assert_eq!(coeffs.h1dash[2], 0.0);
        assert_eq!(coeffs.h2_first, 0.0);
        assert_eq!(coeffs.h3dash_first, 0.0);
        assert_eq!(coeffs.aux_index, 1);
    }

    #[test]
    fn test_rlc_delayed_first_coefficients() {
        let (td, alpha, beta) = (0.5, 0.3, 0.4);
        let times = [0.0, 1.0, 2.0];
        let mut coeffs = CoeffHistory::new();
        coeffs.setup_rlc(td, alpha, beta, 3.0, &times, 2, 0.0);
        assert_eq!(coeffs.aux_index, 2);

        // h3' rises linearly from zero at the delay to its value one step back
        let hilimit = 1.0;
        let h3hi = (-beta * hilimit).exp() * bess_i0(alpha * (hilimit * hilimit - td * td).sqrt())
            - (-beta * td).exp();
        assert_relative_eq!(coeffs.h3dash_first, 0.5 * h3hi, max_relative = 1e-12);
        assert_relative_eq!(
            coeffs.h3dash_first,
            intlin(td, hilimit, 0.0, h3hi, td, hilimit) / (hilimit - td),
            max_relative = 1e-12
        );
        assert!(coeffs.h2_first > 0.0);

        // Without a delayed point both start at zero
        let mut early = CoeffHistory::new();
        early.setup_rlc(5.0, alpha, beta, 3.0, &times, 2, 0.0);
        assert_eq!(early.aux_index, 0);
        assert_eq!(early.h2_first, 0.0);
        assert_eq!(early.h3dash_first, 0.0);
    }
}
