//! Residual and Jacobian loads of a DiodePDE instance.
//!
//! Three formulations share one stencil:
//!
//! - nonlinear Poisson (first DC sub-step): Boltzmann densities, the
//!   density rows are identities and the electrodes sit at their
//!   equilibrium potential.
//! - drift-diffusion: Poisson plus both continuity equations, with
//!   Dirichlet contacts and KCL rows carrying the terminal currents.
//! - outer two-level: only the KCL rows, linearized around the last inner
//!   solve through the terminal conductance.

use super::electrode::CarrierType;
use super::instance::DiodePdeInstance;
use super::physics::EdgeFlux;
use super::stencil::NodeKind;
use crate::device::{SolverState, TwoLevelMode};
use crate::error::Result;
use crate::linalg::DaeMatrix;

impl DiodePdeInstance {
    fn poisson_coef(&self, i: usize) -> f64 {
        let dx = &self.fields.dx;
        self.scaling.l0 * self.rel_perm / (dx[i - 1] * dx[i])
    }

    fn ave_dx(&self, i: usize) -> f64 {
        0.5 * (self.fields.dx[i - 1] + self.fields.dx[i])
    }

    fn poisson_residual(&self, i: usize) -> f64 {
        let f = &self.fields;
        let lap = f.v[i + 1] - 2.0 * f.v[i] + f.v[i - 1];
        -self.poisson_coef(i) * lap - (f.p[i] - f.n[i] + f.c[i])
    }

    fn electron_residual(&self, i: usize) -> f64 {
        (self.fluxes[i].jn - self.fluxes[i - 1].jn) / self.ave_dx(i) - self.rates[i].r
    }

    fn hole_residual(&self, i: usize) -> f64 {
        -(self.fluxes[i].jp - self.fluxes[i - 1].jp) / self.ave_dx(i) - self.rates[i].r
    }

    /// Sum this instance's residual and charge into `f` and `q`.
    pub fn load_vectors(&self, state: &SolverState, f: &mut [f64], q: &mut [f64]) -> Result<()> {
        let lids = &self.lids;

        if state.two_level_mode == TwoLevelMode::Outer {
            let v0 = self.scaling.v0;
            for (k, e) in self.electrodes.iter().enumerate() {
                let coupling: f64 = self
                    .electrodes
                    .iter()
                    .zip(&self.conductance[k])
                    .map(|(ej, g)| g * (ej.v_ckt - ej.v_ckt_inner) * v0)
                    .sum();
                f[lids[k]] += e.current + coupling;
            }
            return Ok(());
        }

        let layout = &self.layout;
        let fields = &self.fields;

        if Self::nonlinear_poisson(state) {
            for i in 0..fields.len() {
                let row = lids[layout.v(i)];
                match layout.kind(i) {
                    NodeKind::Edge(k) | NodeKind::Internal(k) => {
                        f[row] += fields.v[i] - self.electrodes[k].v_equ;
                    }
                    NodeKind::Interior => f[row] += self.poisson_residual(i),
                }
            }
            return Ok(());
        }

        let t0 = self.scaling.t0;
        for i in 0..fields.len() {
            let (v_row, n_row, p_row) = (lids[layout.v(i)], lids[layout.n(i)], lids[layout.p(i)]);
            match layout.kind(i) {
                NodeKind::Edge(k) => {
                    let e = &self.electrodes[k];
                    f[v_row] += fields.v[i] - e.v_bc;
                    f[n_row] += fields.n[i] - e.n_bc;
                    f[p_row] += fields.p[i] - e.p_bc;
                }
                NodeKind::Internal(k) => {
                    let e = &self.electrodes[k];
                    f[v_row] += fields.v[i] - e.v_bc;
                    match e.carrier {
                        CarrierType::NType => {
                            f[n_row] += fields.n[i] - e.n_bc;
                            f[p_row] += self.hole_residual(i);
                            q[p_row] -= t0 * fields.p[i];
                        }
                        CarrierType::PType => {
                            f[n_row] += self.electron_residual(i);
                            q[n_row] -= t0 * fields.n[i];
                            f[p_row] += fields.p[i] - e.p_bc;
                        }
                    }
                }
                NodeKind::Interior => {
                    f[v_row] += self.poisson_residual(i);
                    f[n_row] += self.electron_residual(i);
                    f[p_row] += self.hole_residual(i);
                    q[n_row] -= t0 * fields.n[i];
                    q[p_row] -= t0 * fields.p[i];
                }
            }
        }

        if state.two_level_mode != TwoLevelMode::Inner {
            for (k, e) in self.electrodes.iter().enumerate() {
                f[lids[k]] += e.current;
            }
        }
        Ok(())
    }

    /// Sum this instance's `df/dx` and `dq/dx` into the solver matrices.
    pub fn load_matrices(
        &self,
        state: &SolverState,
        df: &mut dyn DaeMatrix,
        dq: &mut dyn DaeMatrix,
    ) -> Result<()> {
        let jac = &self.jac;
        let layout = &self.layout;
        let num_ext = layout.num_ext();

        if state.two_level_mode == TwoLevelMode::Outer {
            for k in 0..num_ext {
                for j in 0..num_ext {
                    jac.add(df, k, j, self.conductance[k][j])?;
                }
            }
            for i in 0..self.fields.len() {
                for row in [layout.v(i), layout.n(i), layout.p(i)] {
                    jac.add(df, row, row, 1.0)?;
                }
            }
            return Ok(());
        }

        if Self::nonlinear_poisson(state) {
            let ut = self.vt * self.scaling.rv0;
            let fields = &self.fields;
            for i in 0..fields.len() {
                let v = layout.v(i);
                jac.add(df, layout.n(i), layout.n(i), 1.0)?;
                jac.add(df, layout.p(i), layout.p(i), 1.0)?;
                match layout.kind(i) {
                    NodeKind::Edge(_) | NodeKind::Internal(_) => jac.add(df, v, v, 1.0)?,
                    NodeKind::Interior => {
                        let coef = self.poisson_coef(i);
                        jac.add(df, v, layout.v(i - 1), -coef)?;
                        jac.add(df, v, v, 2.0 * coef + (fields.p[i] + fields.n[i]) / ut)?;
                        jac.add(df, v, layout.v(i + 1), -coef)?;
                    }
                }
            }
            return Ok(());
        }

        let couple_bc = state.two_level_mode == TwoLevelMode::Full && !state.pde_continuation;
        let rv0 = self.scaling.rv0;
        let t0 = self.scaling.t0;

        for i in 0..self.fields.len() {
            let (v, n, p) = (layout.v(i), layout.n(i), layout.p(i));
            match layout.kind(i) {
                NodeKind::Edge(k) => {
                    jac.add(df, v, v, 1.0)?;
                    if couple_bc {
                        jac.add(df, v, k, -rv0)?;
                    }
                    jac.add(df, n, n, 1.0)?;
                    jac.add(df, p, p, 1.0)?;
                }
                NodeKind::Internal(k) => {
                    jac.add(df, v, v, 1.0)?;
                    if couple_bc {
                        jac.add(df, v, k, -rv0)?;
                    }
                    match self.electrodes[k].carrier {
                        CarrierType::NType => {
                            jac.add(df, n, n, 1.0)?;
                            self.load_hole_row(i, df)?;
                            jac.add(dq, p, p, -t0)?;
                        }
                        CarrierType::PType => {
                            self.load_electron_row(i, df)?;
                            jac.add(dq, n, n, -t0)?;
                            jac.add(df, p, p, 1.0)?;
                        }
                    }
                }
                NodeKind::Interior => {
                    let coef = self.poisson_coef(i);
                    jac.add(df, v, layout.v(i - 1), -coef)?;
                    jac.add(df, v, v, 2.0 * coef)?;
                    jac.add(df, v, layout.v(i + 1), -coef)?;
                    jac.add(df, v, n, 1.0)?;
                    jac.add(df, v, p, -1.0)?;
                    self.load_electron_row(i, df)?;
                    self.load_hole_row(i, df)?;
                    jac.add(dq, n, n, -t0)?;
                    jac.add(dq, p, p, -t0)?;
                }
            }
        }

        match state.two_level_mode {
            TwoLevelMode::Inner => {
                for k in 0..num_ext {
                    jac.add(df, k, k, 1.0)?;
                }
            }
            _ => {
                for (k, e) in self.electrodes.iter().enumerate() {
                    for &(col, val) in &e.di_dx {
                        jac.add(df, k, col, val)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Electron continuity row at node `i`.
    fn load_electron_row(&self, i: usize, df: &mut dyn DaeMatrix) -> Result<()> {
        let row = self.layout.n(i);
        let ave = self.ave_dx(i);
        self.load_flux_columns(row, i, |flux| flux.djn, 1.0 / ave, df)?;
        let r = &self.rates[i];
        self.jac.add(df, row, self.layout.n(i), -r.drdn)?;
        self.jac.add(df, row, self.layout.p(i), -r.drdp)
    }

    /// Hole continuity row at node `i`.
    fn load_hole_row(&self, i: usize, df: &mut dyn DaeMatrix) -> Result<()> {
        let row = self.layout.p(i);
        let ave = self.ave_dx(i);
        self.load_flux_columns(row, i, |flux| flux.djp, -1.0 / ave, df)?;
        let r = &self.rates[i];
        self.jac.add(df, row, self.layout.n(i), -r.drdn)?;
        self.jac.add(df, row, self.layout.p(i), -r.drdp)
    }

    /// `weight * (dJ_i - dJ_{i-1})` over the columns of both edges.
    fn load_flux_columns(
        &self,
        row: usize,
        i: usize,
        pick: fn(&EdgeFlux) -> [f64; 6],
        weight: f64,
        df: &mut dyn DaeMatrix,
    ) -> Result<()> {
        for (edge, sign) in [(i, 1.0), (i - 1, -1.0)] {
            let d = pick(&self.fluxes[edge]);
            for (col, dj) in self.layout.edge_columns(edge).into_iter().zip(d) {
                self.jac.add(df, row, col, sign * weight * dj)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInstance;
    use crate::linalg::DenseMatrix;
    use crate::pde::params::{DiodePdeParams, ElectrodeSpec};
    use approx::assert_relative_eq;

    /// An instance registered on an identity LID map, with a dense matrix
    /// resolved against its stamp.
    fn setup(num_nodes: usize, params: DiodePdeParams) -> (DiodePdeInstance, usize) {
        let mut inst = DiodePdeInstance::new("YD1", num_nodes, params).unwrap();
        let ext: Vec<usize> = (0..inst.num_ext_vars()).collect();
        let int: Vec<usize> = (ext.len()..ext.len() + inst.num_int_vars()).collect();
        inst.register_lids(&ext, &int).unwrap();
        let sta: Vec<usize> = (0..inst.num_state_vars()).collect();
        inst.register_state_lids(&sta).unwrap();
        let size = ext.len() + int.len();
        inst.register_jac_lids(&DenseMatrix::new(size)).unwrap();
        (inst, size)
    }

    fn drift_diffusion_state(mode: TwoLevelMode) -> SolverState {
        SolverState {
            double_dcop_step: 1,
            two_level_mode: mode,
            ..SolverState::default()
        }
    }

    /// Perturbed equilibrium plus a forward bias on the anode.
    fn biased_solution(inst: &mut DiodePdeInstance, size: usize) -> Vec<f64> {
        let mut sol = vec![0.0; size];
        inst.set_initial_guess(&mut sol).unwrap();
        let layout = inst.layout().clone();
        for i in 1..inst.fields().len() - 1 {
            sol[layout.v(i)] += 0.05 * (i as f64).sin();
            sol[layout.n(i)] *= 1.0 + 0.1 * (i as f64).cos();
            sol[layout.p(i)] *= 1.0 + 0.1 * (i as f64 * 0.7).sin();
        }
        sol[1] = 0.2;
        sol
    }

    fn residual(inst: &mut DiodePdeInstance, state: &SolverState, sol: &[f64]) -> Vec<f64> {
        let mut x = sol.to_vec();
        let mut sta = vec![0.0; inst.num_state_vars()];
        inst.update_state(state, &mut x, &mut sta).unwrap();
        let mut f = vec![0.0; sol.len()];
        let mut q = vec![0.0; sol.len()];
        inst.load_vectors(state, &mut f, &mut q).unwrap();
        f
    }

    fn check_jacobian(num_nodes: usize, params: DiodePdeParams, mode: TwoLevelMode) {
        let (mut inst, size) = setup(num_nodes, params);
        let state = drift_diffusion_state(mode);
        let sol = biased_solution(&mut inst, size);
        let f0 = residual(&mut inst, &state, &sol);

        let mut df = DenseMatrix::new(size);
        let mut dq = DenseMatrix::new(size);
        inst.load_matrices(&state, &mut df, &mut dq).unwrap();

        let mut fd = vec![vec![0.0; size]; size];
        for col in 0..size {
            let step = 1e-7 * sol[col].abs().max(1e-3);
            let mut hi = sol.clone();
            let mut lo = sol.clone();
            hi[col] += step;
            lo[col] -= step;
            let fh = residual(&mut inst, &state, &hi);
            let fl = residual(&mut inst, &state, &lo);
            for row in 0..size {
                fd[row][col] = (fh[row] - fl[row]) / (2.0 * step);
            }
        }
        for row in 0..size {
            let scale = fd[row].iter().fold(f0[row].abs(), |m, v| m.max(v.abs())).max(1e-12);
            for col in 0..size {
                let tol = 1e-4 * scale;
                assert!(
                    (df.at(row, col) - fd[row][col]).abs() <= tol,
                    "df[{}][{}] = {:e}, finite difference {:e}",
                    row,
                    col,
                    df.at(row, col),
                    fd[row][col]
                );
            }
        }
    }

    #[test]
    fn test_drift_diffusion_jacobian_matches_finite_differences() {
        check_jacobian(2, DiodePdeParams::default(), TwoLevelMode::Full);
    }

    #[test]
    fn test_field_dependent_jacobian_matches_finite_differences() {
        let params = DiodePdeParams::default()
            .with_field_dependent(true)
            .with_mobility_model("carr")
            .with_na(1e16);
        check_jacobian(2, params, TwoLevelMode::Full);
    }

    #[test]
    fn test_three_terminal_jacobian_matches_finite_differences() {
        let params = DiodePdeParams::default().with_base_location(0.3e-3).with_graded(true);
        check_jacobian(3, params, TwoLevelMode::Full);
    }

    #[test]
    fn test_inner_mode_freezes_terminal_rows() {
        let (mut inst, size) = setup(2, DiodePdeParams::default());
        let state = drift_diffusion_state(TwoLevelMode::Inner);
        let sol = biased_solution(&mut inst, size);
        let f = residual(&mut inst, &state, &sol);
        assert_eq!(f[0], 0.0);
        assert_eq!(f[1], 0.0);

        let mut df = DenseMatrix::new(size);
        let mut dq = DenseMatrix::new(size);
        inst.load_matrices(&state, &mut df, &mut dq).unwrap();
        assert_eq!(df.at(0, 0), 1.0);
        let v_row = inst.layout().v(0);
        assert_eq!(df.at(v_row, 1), 0.0);
    }

    #[test]
    fn test_charge_only_on_continuity_rows() {
        let (mut inst, size) = setup(2, DiodePdeParams::default());
        let state = drift_diffusion_state(TwoLevelMode::Full);
        let sol = biased_solution(&mut inst, size);
        let mut x = sol.clone();
        inst.update_state(&state, &mut x, &mut vec![0.0; inst.num_state_vars()]).unwrap();
        let mut f = vec![0.0; size];
        let mut q = vec![0.0; size];
        inst.load_vectors(&state, &mut f, &mut q).unwrap();

        let layout = inst.layout().clone();
        let t0 = inst.scaling().t0;
        assert_eq!(q[layout.v(4)], 0.0);
        assert_relative_eq!(q[layout.n(4)], -t0 * sol[layout.n(4)], max_relative = 1e-12);
        assert_eq!(q[layout.n(0)], 0.0);
        assert_eq!(q[0], 0.0);
    }

    #[test]
    fn test_nonlinear_poisson_rows() {
        let (mut inst, size) = setup(2, DiodePdeParams::default());
        let state = SolverState::default();
        let mut sol = vec![0.0; size];
        inst.set_initial_guess(&mut sol).unwrap();
        let f = residual(&mut inst, &state, &sol);

        let layout = inst.layout().clone();
        // Equilibrium guess: contacts sit exactly at their built-in potential
        assert_relative_eq!(f[layout.v(0)], 0.0, epsilon = 1e-12);
        // No terminal current and no density residual
        assert_eq!(f[0], 0.0);
        assert_eq!(f[layout.n(5)], 0.0);

        let mut df = DenseMatrix::new(size);
        let mut dq = DenseMatrix::new(size);
        inst.load_matrices(&state, &mut df, &mut dq).unwrap();
        assert_eq!(df.at(layout.n(5), layout.n(5)), 1.0);
        let ut = inst.thermal_voltage() * inst.scaling().rv0;
        let mut x = sol.clone();
        inst.update_state(&state, &mut x, &mut vec![0.0; inst.num_state_vars()]).unwrap();
        let coef = inst.poisson_coef(5);
        let expected = 2.0 * coef + (x[layout.n(5)] + x[layout.p(5)]) / ut;
        assert_relative_eq!(df.at(layout.v(5), layout.v(5)), expected, max_relative = 1e-12);
        assert!(dq.a.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_every_mode_stays_inside_the_stencil() {
        let params = DiodePdeParams::default()
            .with_electrode(ElectrodeSpec::new("collector", "right"))
            .with_electrode(ElectrodeSpec::new("base", "middle").with_location(0.7e-3))
            .with_electrode(ElectrodeSpec::new("emitter", "left"));
        let (mut inst, size) = setup(3, params);
        let sol = biased_solution(&mut inst, size);
        for state in [
            SolverState::default(),
            drift_diffusion_state(TwoLevelMode::Full),
            drift_diffusion_state(TwoLevelMode::Inner),
            drift_diffusion_state(TwoLevelMode::Outer),
        ] {
            let mut x = sol.clone();
            inst.update_state(&state, &mut x, &mut vec![0.0; inst.num_state_vars()]).unwrap();
            let mut df = DenseMatrix::new(size);
            let mut dq = DenseMatrix::new(size);
            inst.load_matrices(&state, &mut df, &mut dq).unwrap();
        }
    }

    #[test]
    fn test_conductance_matches_bias_perturbation() {
        let (mut inst, size) = setup(2, DiodePdeParams::default());
        let state = drift_diffusion_state(TwoLevelMode::Full);
        let sol = biased_solution(&mut inst, size);
        let mut x = sol.clone();
        inst.update_state(&state, &mut x, &mut vec![0.0; inst.num_state_vars()]).unwrap();

        // Mesh-only Jacobian: replace the KCL rows by identities
        let mut df = DenseMatrix::new(size);
        let mut dq = DenseMatrix::new(size);
        inst.load_matrices(&state, &mut df, &mut dq).unwrap();
        for k in 0..2 {
            for col in 0..size {
                df.set(k, col, 0.0);
            }
            df.set(k, k, 1.0);
        }
        df.factor().unwrap();
        let mut dxdv = Vec::new();
        for j in 0..2 {
            let mut rhs = vec![0.0; size];
            for (lid, val) in inst.conductance_rhs(j) {
                rhs[lid] = val;
            }
            let mut out = vec![0.0; size];
            df.solve(&rhs, &mut out).unwrap();
            dxdv.push(out);
        }
        inst.calc_conductance(&dxdv).unwrap();
        let g = inst.conductance().to_vec();

        // Current leaving the device is conserved, so the columns sum to zero
        assert!(g[1][1].abs() > 0.0);
        assert_relative_eq!(g[0][1] + g[1][1], 0.0, epsilon = 1e-6 * g[1][1].abs());
        assert!(inst.calc_conductance(&dxdv[..1]).is_err());
    }
}
