//! Edge fluxes and recombination in scaled units.
//!
//! Every formula here is generic over [`DualNum`]. Plain `f64` evaluation
//! gives values; seeding one [`Dual64`] per unknown gives the partial
//! derivatives the Jacobian load uses, so residual and Jacobian can never
//! drift apart.

use num_dual::{Dual64, DualNum};

use super::bernoulli::{aux1, aux2};
use super::mobility::{Carrier, Mobility, MobilityPoint};

/// Position of each edge unknown in an [`EdgeFlux`] derivative array.
pub const EDGE_V1: usize = 0;
pub const EDGE_V2: usize = 1;
pub const EDGE_N1: usize = 2;
pub const EDGE_N2: usize = 3;
pub const EDGE_P1: usize = 4;
pub const EDGE_P2: usize = 5;

/// Auger coefficients (cm^6/s) for electrons and holes.
pub const AUGER_ELECTRON: f64 = 2.8e-31;
pub const AUGER_HOLE: f64 = 1.2e-31;

fn magnitude<D: DualNum<f64> + Copy>(x: D) -> D {
    if x.re() < 0.0 {
        -x
    } else {
        x
    }
}

/// Electric field on every mesh edge; the last entry repeats the one before.
pub fn efield(v: &[f64], dx: &[f64]) -> Vec<f64> {
    let lx = v.len() - 1;
    let mut e: Vec<f64> = (0..lx).map(|i| -(v[i + 1] - v[i]) / dx[i]).collect();
    e.push(e[lx - 1]);
    e
}

/// Scharfetter-Gummel density at the edge midpoint for charge number `z`.
pub fn n_midpoint<D: DualNum<f64> + Copy>(n1: D, n2: D, e: D, h: f64, ut: f64, z: f64) -> D {
    let dv = -e * (h / (2.0 * ut));
    (n1 * aux2(dv * z) + n2 * aux2(dv * -z)) * z
}

/// Scharfetter-Gummel current density for charge number `z`.
pub fn j_qdep<D: DualNum<f64> + Copy>(n1: D, n2: D, e: D, u: D, h: f64, ut: f64, z: f64) -> D {
    let dv = -e * (h / (2.0 * ut));
    let n = (n1 * aux2(dv * z) + n2 * aux2(dv * -z)) * z;
    let dndx = aux1(dv * -z) * (n2 - n1) / h;
    u * (n * e - dndx * ut)
}

/// Fixed data of one mesh edge.
#[derive(Debug, Clone, Copy)]
pub struct EdgeContext<'a> {
    /// Edge length (scaled)
    pub h: f64,
    /// Thermal voltage (scaled)
    pub ut: f64,
    /// Mean doping magnitude over the edge (cm^-3)
    pub doping: f64,
    /// Temperature (K)
    pub temp: f64,
    /// Density scale
    pub c0: f64,
    /// Field scale
    pub e0: f64,
    /// Mobility scale
    pub u0: f64,
    pub mobility: &'a Mobility,
}

/// Electron and hole current densities on an edge with their partial
/// derivatives with respect to `[V1, V2, n1, n2, p1, p2]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeFlux {
    pub jn: f64,
    pub jp: f64,
    pub djn: [f64; 6],
    pub djp: [f64; 6],
}

fn edge_currents<D: DualNum<f64> + Copy>(ctx: &EdgeContext<'_>, x: [D; 6]) -> (D, D) {
    let [v1, v2, n1, n2, p1, p2] = x;
    let e = -(v2 - v1) / ctx.h;

    let point = MobilityPoint {
        doping: ctx.doping,
        n: magnitude(n_midpoint(n1, n2, e, ctx.h, ctx.ut, -1.0)) * ctx.c0,
        p: magnitude(n_midpoint(p1, p2, e, ctx.h, ctx.ut, 1.0)) * ctx.c0,
        epar: magnitude(e) * ctx.e0,
        temp: ctx.temp,
    };
    let un = ctx.mobility.eval(Carrier::Electron, &point) / ctx.u0;
    let up = ctx.mobility.eval(Carrier::Hole, &point) / ctx.u0;

    let jn = -j_qdep(n1, n2, e, un, ctx.h, ctx.ut, -1.0);
    let jp = j_qdep(p1, p2, e, up, ctx.h, ctx.ut, 1.0);
    (jn, jp)
}

/// Evaluate both fluxes and their derivatives, one dual pass per unknown.
pub fn edge_flux(ctx: &EdgeContext<'_>, x: [f64; 6]) -> EdgeFlux {
    let (jn, jp) = edge_currents(ctx, x);
    let mut flux = EdgeFlux {
        jn,
        jp,
        ..EdgeFlux::default()
    };
    for k in 0..6 {
        let seeded: [Dual64; 6] = std::array::from_fn(|j| {
            if j == k {
                Dual64::new(x[j], 1.0)
            } else {
                Dual64::from(x[j])
            }
        });
        let (djn, djp) = edge_currents(ctx, seeded);
        flux.djn[k] = djn.eps;
        flux.djp[k] = djp.eps;
    }
    flux
}

/// Net recombination rate and its density derivatives at one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Recombination {
    pub r: f64,
    pub drdn: f64,
    pub drdp: f64,
}

/// SRH plus Auger recombination in scaled units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecombinationModel {
    pub srh: bool,
    pub auger: bool,
    /// Intrinsic concentration (scaled)
    pub ni: f64,
    /// Electron Auger coefficient (scaled)
    pub cn: f64,
    /// Hole Auger coefficient (scaled)
    pub cp: f64,
}

impl RecombinationModel {
    /// Model with Auger coefficients scaled by `c0` and `t0`.
    pub fn new(srh: bool, auger: bool, ni: f64, c0: f64, t0: f64) -> Self {
        Self {
            srh,
            auger,
            ni,
            cn: AUGER_ELECTRON * c0 * c0 * t0,
            cp: AUGER_HOLE * c0 * c0 * t0,
        }
    }

    fn rate<D: DualNum<f64> + Copy>(&self, n: D, p: D, tn: f64, tp: f64) -> D {
        let excess = n * p - self.ni * self.ni;
        let mut r = D::from(0.0);
        if self.srh {
            r = r + excess / ((n + self.ni) * tp + (p + self.ni) * tn);
        }
        if self.auger {
            r = r + (n * self.cn + p * self.cp) * excess;
        }
        r
    }

    /// Rate at densities `n`, `p` with lifetimes `tn`, `tp`.
    pub fn eval(&self, n: f64, p: f64, tn: f64, tp: f64) -> Recombination {
        if !self.srh && !self.auger {
            return Recombination::default();
        }
        Recombination {
            r: self.rate(n, p, tn, tp),
            drdn: self.rate(Dual64::new(n, 1.0), Dual64::from(p), tn, tp).eps,
            drdp: self.rate(Dual64::from(n), Dual64::new(p, 1.0), tn, tp).eps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pde::material::Material;
    use crate::pde::mobility::MobilityModel;
    use approx::assert_relative_eq;

    #[test]
    fn test_pure_drift_and_pure_diffusion() {
        // Equal densities: only drift remains
        let j = j_qdep(2.0, 2.0, 3.0, 5.0, 0.1, 1.0, 1.0);
        assert_relative_eq!(j, 5.0 * 2.0 * 3.0, max_relative = 1e-12);

        // No field: Fick's law
        let j = j_qdep(1.0, 3.0, 0.0, 5.0, 0.5, 1.0, 1.0);
        assert_relative_eq!(j, -5.0 * (3.0 - 1.0) / 0.5, max_relative = 1e-12);
    }

    #[test]
    fn test_midpoint_lies_between_densities() {
        let m = n_midpoint(1.0, 9.0, 0.4, 1.0, 1.0, 1.0);
        assert!(m > 1.0 && m < 9.0);
        assert_relative_eq!(n_midpoint(1.0, 9.0, 0.0, 1.0, 1.0, 1.0), 5.0);
    }

    #[test]
    fn test_efield() {
        let e = efield(&[0.0, 1.0, 3.0], &[0.5, 1.0, 1.0]);
        assert_eq!(e, vec![-2.0, -2.0, -2.0]);
    }

    fn check_edge_derivatives(model: MobilityModel, field_dependent: bool) {
        let mobility = Mobility::new(model, Material::Si, field_dependent).unwrap();
        let ctx = EdgeContext {
            h: 0.1,
            ut: 1.0,
            doping: 1.0e15,
            temp: 300.15,
            c0: 1.0e14,
            e0: 25.0,
            u0: 1.0e3,
            mobility: &mobility,
        };
        let x = [0.3, -0.4, 2.0, 5.0, 0.7, 0.2];
        let flux = edge_flux(&ctx, x);
        for k in 0..6 {
            let step = 1e-6 * x[k].abs().max(1.0);
            let mut hi = x;
            let mut lo = x;
            hi[k] += step;
            lo[k] -= step;
            let (fh, fl) = (edge_flux(&ctx, hi), edge_flux(&ctx, lo));
            let fd_n = (fh.jn - fl.jn) / (2.0 * step);
            let fd_p = (fh.jp - fl.jp) / (2.0 * step);
            assert_relative_eq!(flux.djn[k], fd_n, max_relative = 1e-5, epsilon = 1e-8);
            assert_relative_eq!(flux.djp[k], fd_p, max_relative = 1e-5, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_edge_flux_derivatives_arora() {
        check_edge_derivatives(MobilityModel::Arora, false);
    }

    #[test]
    fn test_edge_flux_derivatives_field_dependent() {
        check_edge_derivatives(MobilityModel::Arora, true);
    }

    #[test]
    fn test_edge_flux_derivatives_carr() {
        check_edge_derivatives(MobilityModel::Carr, false);
    }

    #[test]
    fn test_recombination_vanishes_at_equilibrium() {
        let model = RecombinationModel::new(true, true, 2.0, 1.0e15, 1.0e-6);
        let r = model.eval(1.0, 4.0, 1.0, 1.0);
        assert_relative_eq!(r.r, 0.0, epsilon = 1e-15);
        assert_eq!(RecombinationModel::new(false, false, 2.0, 1.0, 1.0).eval(9.0, 9.0, 1.0, 1.0).r, 0.0);
    }

    #[test]
    fn test_recombination_derivatives() {
        let model = RecombinationModel::new(true, true, 0.1, 1.0e15, 1.0e-6);
        let (n, p, tn, tp) = (3.0, 0.5, 2.0, 0.7);
        let r = model.eval(n, p, tn, tp);
        let h = 1e-6;
        let fd_n = (model.eval(n + h, p, tn, tp).r - model.eval(n - h, p, tn, tp).r) / (2.0 * h);
        let fd_p = (model.eval(n, p + h, tn, tp).r - model.eval(n, p - h, tn, tp).r) / (2.0 * h);
        assert!(r.r > 0.0);
        assert_relative_eq!(r.drdn, fd_n, max_relative = 1e-6);
        assert_relative_eq!(r.drdp, fd_p, max_relative = 1e-6);
    }
}
