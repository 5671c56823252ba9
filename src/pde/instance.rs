//! DiodePDE device instances.
//!
//! An instance owns its mesh, doping, electrodes and every per-node array.
//! Construction runs the whole one-time setup: material and mobility
//! lookup, mesh, doping profile, electrode placement, variable layout,
//! lifetimes, boundary conditions, initial guess and scaling. After that
//! the instance always lives in scaled units; [`update_temperature`]
//! round-trips through physical units to refresh temperature-dependent
//! quantities.
//!
//! [`update_temperature`]: DeviceInstance::update_temperature

use log::{debug, trace};

use super::bernoulli::MAX_EXP_ARG;
use super::electrode::{layout, Electrode};
use super::material::{srh_lifetime, Material};
use super::mesh::{Doping, Mesh, MeshFields};
use super::mobility::{Mobility, MobilityModel};
use super::params::DiodePdeParams;
use super::physics::{self, EdgeContext, EdgeFlux, Recombination, RecombinationModel};
use super::scaling::{ScalingInputs, ScalingVars};
use super::stencil::VarLayout;
use super::{BOLTZMANN, ELEMENTARY_CHARGE, VACUUM_PERMITTIVITY};
use crate::device::{check_lid_count, DeviceInstance, DeviceOptions, SolverState, TwoLevelMode};
use crate::error::{DevsimError, Result};
use crate::linalg::{DaeMatrix, JacobianOffsets};

/// Largest upward applied-voltage step accepted by the limiter (V).
const LIMIT_UP: f64 = 1.25;

/// Largest downward applied-voltage step accepted by the limiter (V).
const LIMIT_DOWN: f64 = 0.75;

/// Applied-voltage change (scaled) below which continuation is not needed.
const CONTINUATION_THRESHOLD: f64 = 1.0e-3;

/// A one-dimensional drift-diffusion device.
#[derive(Debug)]
pub struct DiodePdeInstance {
    pub(super) name: String,
    pub(super) params: DiodePdeParams,
    pub(super) material: Material,
    pub(super) mobility: Mobility,
    pub(super) rel_perm: f64,
    pub(super) mesh: Mesh,
    pub(super) fields: MeshFields,
    pub(super) electrodes: Vec<Electrode>,
    pub(super) layout: VarLayout,
    pub(super) scaling: ScalingVars,
    pub(super) scaled: bool,

    /// Thermal voltage (V)
    pub(super) vt: f64,
    /// Intrinsic concentration
    pub(super) ni: f64,
    /// Acceptor level used by the nonlinear Poisson densities
    pub(super) na: f64,
    /// Donor level used by the nonlinear Poisson densities
    pub(super) nd: f64,
    pub(super) vmin_exp: f64,
    pub(super) vmax_exp: f64,
    /// Built-in potential across the device
    pub(super) vbi: f64,
    pub(super) max_volt_delta: f64,
    pub(super) recombination: RecombinationModel,

    pub(super) lids: Vec<usize>,
    pub(super) sta_lids: Vec<usize>,
    pub(super) jac: JacobianOffsets,

    pub(super) efield: Vec<f64>,
    pub(super) fluxes: Vec<EdgeFlux>,
    pub(super) rates: Vec<Recombination>,
    pub(super) conductance: Vec<Vec<f64>>,

    continuation_called: bool,
    continuation_alpha: f64,
}

impl DiodePdeInstance {
    /// Build an instance with `num_nodes` external nodes.
    pub fn new(name: &str, num_nodes: usize, params: DiodePdeParams) -> Result<Self> {
        params.validate(name)?;

        let material = Material::parse(&params.bulk_material)?;
        let model = MobilityModel::parse(&params.mobility_model, material)?;
        let mobility = Mobility::new(model, material, params.field_dependent)?;
        let rel_perm = material.rel_perm()?;

        let width = params.width();
        let mesh = Mesh::uniform(params.nx, width);
        let doping = if params.graded {
            let wj = params.wj.get().unwrap_or(width / 10.0);
            Doping::graded(name, &mesh, params.na, params.nd, wj)?
        } else {
            Doping::step(name, &mesh, params.na, params.nd)?
        };

        let electrodes = layout(name, num_nodes, &mesh, &doping, &params)?;
        let layout = VarLayout::new(params.nx, &electrodes);
        let mut fields = MeshFields::new(&mesh, &doping);
        for i in 0..fields.len() {
            fields.tn[i] = srh_lifetime(false, fields.c[i]);
            fields.tp[i] = srh_lifetime(true, fields.c[i]);
        }

        let num_ext = electrodes.len();
        let mut instance = Self {
            name: name.to_string(),
            material,
            mobility,
            rel_perm,
            mesh,
            fields,
            electrodes,
            layout,
            scaling: ScalingVars::new(&ScalingInputs {
                thermal_voltage: 1.0,
                width,
                x0: None,
                c0: None,
                t0: None,
                peak_density: None,
            }),
            scaled: false,
            vt: 0.0,
            ni: 0.0,
            na: params.na,
            nd: params.nd,
            vmin_exp: 0.0,
            vmax_exp: 0.0,
            vbi: 0.0,
            max_volt_delta: params.max_volt_delta,
            recombination: RecombinationModel::new(params.srh, params.auger, 0.0, 1.0, 1.0),
            lids: Vec::new(),
            sta_lids: Vec::new(),
            jac: JacobianOffsets::default(),
            efield: Vec::new(),
            fluxes: Vec::new(),
            rates: Vec::new(),
            conductance: vec![vec![0.0; num_ext]; num_ext],
            continuation_called: false,
            continuation_alpha: 1.0,
            params,
        };

        instance.setup_physics()?;
        instance.calc_initial_guess();
        instance.scale();

        debug!(
            "DiodePDE {}: {} nodes, {} material, {} mobility, Vbi={:.4} V",
            instance.name,
            instance.fields.len(),
            instance.material,
            instance.mobility.model().name(),
            instance.vbi * instance.scaling.v0
        );
        for e in &instance.electrodes {
            debug!(
                "DiodePDE {}: electrode {} at node {} (neighbor {}, {}, {})",
                instance.name,
                e.name,
                e.mesh_index,
                e.neighbor,
                if e.edge { "edge" } else { "internal" },
                e.carrier
            );
        }
        let s = &instance.scaling;
        debug!(
            "DiodePDE {}: scaling x0={:e} C0={:e} V0={:e} t0={:e} J0={:e}",
            instance.name, s.x0, s.c0, s.v0, s.t0, s.j0
        );

        Ok(instance)
    }

    /// Temperature-dependent constants, boundary conditions and scale
    /// factors. Expects physical units.
    fn setup_physics(&mut self) -> Result<()> {
        let temp = self.params.temp;
        self.vt = BOLTZMANN * temp / ELEMENTARY_CHARGE;
        self.ni = self.material.intrinsic_concentration(temp)?;

        let peak = self.fields.c.iter().fold(0.0_f64, |m, c| m.max(c.abs()));
        self.scaling = ScalingVars::new(&ScalingInputs {
            thermal_voltage: self.vt,
            width: self.params.width(),
            x0: self.params.x0.get(),
            c0: self.params.c0.get(),
            t0: self.params.t0.get(),
            peak_density: self
                .params
                .scale_density_to_max_doping
                .then(|| peak * self.params.density_scalar_fraction),
        });

        let ni = self.ni;
        for e in &mut self.electrodes {
            let c = self.fields.c[e.mesh_index];
            let root = (c * c + 4.0 * ni * ni).sqrt();
            e.n_bc = 0.5 * (root + c);
            e.p_bc = 0.5 * (root - c);
            match self.params.contact_potential(&e.name) {
                Some(v) => {
                    e.v_equ = v;
                    e.v_equ_given = true;
                }
                None if c > 0.0 => e.v_equ = self.vt * (e.n_bc / ni).ln(),
                None => e.v_equ = -self.vt * (e.p_bc / ni).ln(),
            }
        }
        let (lo, hi) = self
            .electrodes
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| {
                (lo.min(e.v_equ), hi.max(e.v_equ))
            });
        self.vbi = hi - lo;
        self.na = self.params.na;
        self.nd = self.params.nd;
        self.max_volt_delta = self.params.max_volt_delta;
        Ok(())
    }

    /// Equilibrium densities from charge neutrality and the matching
    /// potential. Expects physical units.
    fn calc_initial_guess(&mut self) {
        let ni = self.ni;
        let f = &mut self.fields;
        for i in 0..f.len() {
            let c = f.c[i];
            let tmp = (c.abs() + (c * c + 4.0 * ni * ni).sqrt()) / 2.0;
            f.n[i] = if c >= 0.0 { tmp } else { ni * ni / tmp };
            f.p[i] = if c <= 0.0 { tmp } else { ni * ni / tmp };
            f.v[i] = if f.n[i] >= f.p[i] {
                self.vt * (f.n[i] / ni).ln()
            } else {
                -self.vt * (f.p[i] / ni).ln()
            };
        }
        self.vmax_exp = f.v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.vmin_exp = f.v.iter().copied().fold(f64::INFINITY, f64::min);
    }

    /// Convert every array and scalar to scaled units.
    pub(super) fn scale(&mut self) {
        if self.scaled {
            return;
        }
        let s = self.scaling;
        self.fields.scale(&s);
        for e in &mut self.electrodes {
            for v in e.voltages_mut() {
                *v /= s.v0;
            }
            e.n_bc /= s.c0;
            e.p_bc /= s.c0;
            e.area /= s.a0;
        }
        self.ni /= s.c0;
        self.na /= s.c0;
        self.nd /= s.c0;
        self.vmin_exp /= s.v0;
        self.vmax_exp /= s.v0;
        self.vbi /= s.v0;
        self.max_volt_delta /= s.v0;
        self.recombination = RecombinationModel::new(self.params.srh, self.params.auger, self.ni, s.c0, s.t0);
        self.scaled = true;
    }

    /// Convert back to physical units.
    pub(super) fn unscale(&mut self) {
        if !self.scaled {
            return;
        }
        let s = self.scaling;
        self.fields.unscale(&s);
        for e in &mut self.electrodes {
            for v in e.voltages_mut() {
                *v *= s.v0;
            }
            e.n_bc *= s.c0;
            e.p_bc *= s.c0;
            e.area *= s.a0;
        }
        self.ni *= s.c0;
        self.na *= s.c0;
        self.nd *= s.c0;
        self.vmin_exp *= s.v0;
        self.vmax_exp *= s.v0;
        self.vbi *= s.v0;
        self.max_volt_delta *= s.v0;
        self.scaled = false;
    }

    fn check_registered(&self) -> Result<()> {
        check_lid_count(&self.name, "solution", self.layout.len(), self.lids.len())
    }

    /// First DC sub-step: nonlinear Poisson with Boltzmann densities.
    pub(super) fn nonlinear_poisson(state: &SolverState) -> bool {
        state.dcop && state.double_dcop_step == 0
    }

    /// Pull the solution, refresh boundary conditions and evaluate fluxes,
    /// recombination and terminal currents.
    pub fn update_state(&mut self, state: &SolverState, sol: &mut [f64], sta: &mut [f64]) -> Result<()> {
        self.check_registered()?;
        let rv0 = self.scaling.rv0;
        let refresh = !(state.two_level_mode == TwoLevelMode::Inner && state.newton_iter != 0);

        for (k, e) in self.electrodes.iter_mut().enumerate() {
            e.v_ckt = sol[self.lids[k]] * rv0;
            if refresh {
                let applied = if state.pde_continuation {
                    e.v_ckt_ramp
                } else {
                    e.v_ckt
                };
                e.v_bc = applied + e.v_equ;
            }
            if state.two_level_mode == TwoLevelMode::Inner {
                e.v_ckt_inner = e.v_ckt;
            }
        }

        for i in 0..self.fields.len() {
            self.fields.v[i] = sol[self.lids[self.layout.v(i)]];
            self.fields.n[i] = sol[self.lids[self.layout.n(i)]];
            self.fields.p[i] = sol[self.lids[self.layout.p(i)]];
        }

        if Self::nonlinear_poisson(state) {
            let ut = self.vt * rv0;
            for i in 0..self.fields.len() {
                let v = self.fields.v[i];
                let n = self.nd * ((v - self.vmax_exp) / ut).min(MAX_EXP_ARG).exp();
                let p = self.na * ((self.vmin_exp - v) / ut).min(MAX_EXP_ARG).exp();
                self.fields.n[i] = n;
                self.fields.p[i] = p;
                sol[self.lids[self.layout.n(i)]] = n;
                sol[self.lids[self.layout.p(i)]] = p;
            }
            return Ok(());
        }

        self.efield = physics::efield(&self.fields.v, &self.fields.dx);
        self.calc_fluxes();
        self.calc_recombination();
        self.calc_terminal_currents();

        if !self.sta_lids.is_empty() {
            let num_ext = self.layout.num_ext();
            for (k, e) in self.electrodes.iter().enumerate() {
                sta[self.sta_lids[k]] = e.current;
            }
            let scale = self.rel_perm * VACUUM_PERMITTIVITY * self.scaling.e0;
            for i in 0..self.fields.len() - 1 {
                sta[self.sta_lids[num_ext + i]] = scale * self.efield[i];
            }
        }
        Ok(())
    }

    /// Add displacement current from the time derivative of the electric
    /// displacement.
    pub fn update_secondary_state(&mut self, sta_deriv: &[f64]) {
        if !self.params.displacement_current || self.sta_lids.is_empty() {
            return;
        }
        let num_ext = self.layout.num_ext();
        let a0 = self.scaling.a0;
        for e in &mut self.electrodes {
            let rate = sta_deriv[self.sta_lids[num_ext + e.edge_index()]];
            e.displ_current = e.flux_sign() * e.area * a0 * rate;
            e.current = e.conduction_current() + e.displ_current;
        }
    }

    fn calc_fluxes(&mut self) {
        let f = &self.fields;
        let s = &self.scaling;
        let ut = self.vt * s.rv0;
        self.fluxes = (0..f.len() - 1)
            .map(|i| {
                let mut doping = 0.5 * (f.c[i].abs() + f.c[i + 1].abs()) * s.c0;
                if doping == 0.0 {
                    doping = 1.0;
                }
                let ctx = EdgeContext {
                    h: f.dx[i],
                    ut,
                    doping,
                    temp: self.params.temp,
                    c0: s.c0,
                    e0: s.e0,
                    u0: s.u0,
                    mobility: &self.mobility,
                };
                physics::edge_flux(&ctx, [f.v[i], f.v[i + 1], f.n[i], f.n[i + 1], f.p[i], f.p[i + 1]])
            })
            .collect();
    }

    fn calc_recombination(&mut self) {
        let f = &self.fields;
        let model = &self.recombination;
        self.rates = (0..f.len())
            .map(|i| model.eval(f.n[i], f.p[i], f.tn[i], f.tp[i]))
            .collect();
    }

    /// Record the target boundary voltages of a continuation.
    ///
    /// Returns true when any applied voltage moved by more than the
    /// continuation threshold. Raises `max_pde_continuation_steps` so no
    /// step exceeds `MAXVOLTDELTA`.
    pub fn enable_continuation(&mut self, state: &mut SolverState, opts: &DeviceOptions, sol: &[f64]) -> Result<bool> {
        self.check_registered()?;
        self.continuation_alpha = 1.0;
        let rv0 = self.scaling.rv0;
        let v0 = self.scaling.v0;
        let limit = opts.voltage_limiter && self.params.voltage_limit;
        let first = !self.continuation_called;

        let mut changed = false;
        for (k, e) in self.electrodes.iter_mut().enumerate() {
            if first {
                e.v_ckt_old = e.v_ckt;
            }
            e.v_ckt = sol[self.lids[k]] * rv0;
            e.v_ckt_final = e.v_ckt;
            e.v_ckt_orig = e.v_ckt;

            if limit {
                let step = (e.v_ckt - e.v_ckt_old) * v0;
                if step > LIMIT_UP {
                    e.v_ckt = e.v_ckt_old + LIMIT_UP * rv0;
                } else if step < -LIMIT_DOWN {
                    e.v_ckt = e.v_ckt_old - LIMIT_DOWN * rv0;
                }
                e.v_ckt_final = e.v_ckt;
            }

            let dv = e.v_ckt_final - e.v_ckt_old;
            e.v_ckt_delta = dv;
            e.v_ckt_delta_c = dv / state.max_pde_continuation_steps as f64;
            if e.v_ckt_delta_c.abs() > self.max_volt_delta {
                let steps = (dv.abs() / self.max_volt_delta) as usize + 1;
                state.max_pde_continuation_steps = steps;
                e.v_ckt_delta_c = dv / steps as f64;
            }
            if dv.abs() > CONTINUATION_THRESHOLD {
                changed = true;
            }
            e.v_ckt_ramp = e.v_ckt_old;
        }
        self.continuation_called = true;

        trace!(
            "DiodePDE {}: continuation enabled, {} steps, changed={}",
            self.name,
            state.max_pde_continuation_steps,
            changed
        );
        Ok(changed)
    }

    /// Move every applied voltage a fraction `alpha` of the way to its
    /// target, never past it.
    pub fn set_continuation_alpha(&mut self, alpha: f64) {
        self.continuation_alpha = alpha;
        for e in &mut self.electrodes {
            e.v_ckt_ramp = e.v_ckt_old + e.v_ckt_delta * alpha;
            if (e.v_ckt_delta > 0.0 && e.v_ckt_ramp > e.v_ckt_final)
                || (e.v_ckt_delta <= 0.0 && e.v_ckt_ramp <= e.v_ckt_final)
            {
                e.v_ckt_ramp = e.v_ckt_final;
            }
        }
    }

    /// Make the reached targets the start of the next continuation.
    pub fn disable_continuation(&mut self) {
        for e in &mut self.electrodes {
            e.v_ckt_old = e.v_ckt_final;
        }
    }

    /// Last continuation fraction.
    pub fn continuation_alpha(&self) -> f64 {
        self.continuation_alpha
    }

    /// Instance parameters.
    pub fn params(&self) -> &DiodePdeParams {
        &self.params
    }

    /// Electrodes in external-node order.
    pub fn electrodes(&self) -> &[Electrode] {
        &self.electrodes
    }

    /// Terminal currents (A) in external-node order.
    pub fn terminal_currents(&self) -> Vec<f64> {
        self.electrodes.iter().map(|e| e.current).collect()
    }

    /// Variable layout.
    pub fn layout(&self) -> &VarLayout {
        &self.layout
    }

    /// Per-node arrays (scaled).
    pub fn fields(&self) -> &MeshFields {
        &self.fields
    }

    /// The unscaled mesh.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Scale factors.
    pub fn scaling(&self) -> &ScalingVars {
        &self.scaling
    }

    /// Thermal voltage (V).
    pub fn thermal_voltage(&self) -> f64 {
        self.vt
    }

    /// Intrinsic concentration (cm^-3).
    pub fn intrinsic_concentration(&self) -> f64 {
        self.ni * self.scaling.c0
    }

    /// Built-in potential (V).
    pub fn built_in_potential(&self) -> f64 {
        self.vbi * self.scaling.v0
    }

    /// Bulk material.
    pub fn material(&self) -> Material {
        self.material
    }

    /// Solver LID of local variable `local`.
    pub fn lid(&self, local: usize) -> usize {
        self.lids[local]
    }
}

impl DeviceInstance for DiodePdeInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_ext_vars(&self) -> usize {
        self.layout.num_ext()
    }

    fn num_int_vars(&self) -> usize {
        self.layout.num_int()
    }

    fn num_state_vars(&self) -> usize {
        self.layout.num_ext() + self.layout.nx() - 1
    }

    fn register_lids(&mut self, ext: &[usize], int: &[usize]) -> Result<()> {
        check_lid_count(&self.name, "external", self.num_ext_vars(), ext.len())?;
        check_lid_count(&self.name, "internal", self.num_int_vars(), int.len())?;
        self.lids = ext.iter().chain(int).copied().collect();
        Ok(())
    }

    fn register_state_lids(&mut self, sta: &[usize]) -> Result<()> {
        check_lid_count(&self.name, "state", self.num_state_vars(), sta.len())?;
        self.sta_lids = sta.to_vec();
        Ok(())
    }

    fn jacobian_stamp(&self) -> Vec<Vec<usize>> {
        self.layout.jacobian_stamp(&self.electrodes)
    }

    fn register_jac_lids(&mut self, matrix: &dyn DaeMatrix) -> Result<()> {
        self.check_registered()?;
        let stamp = self.jacobian_stamp();
        self.jac = JacobianOffsets::resolve(&self.name, &stamp, &self.lids, matrix)?;
        Ok(())
    }

    fn set_initial_guess(&mut self, sol: &mut [f64]) -> Result<()> {
        self.check_registered()?;
        for i in 0..self.fields.len() {
            sol[self.lids[self.layout.v(i)]] = self.fields.v[i];
            sol[self.lids[self.layout.n(i)]] = self.fields.n[i];
            sol[self.lids[self.layout.p(i)]] = self.fields.p[i];
        }
        Ok(())
    }

    fn update_temperature(&mut self, temp: f64) -> Result<()> {
        if temp <= 0.0 {
            return Err(DevsimError::invalid_parameter(
                &self.name,
                "TEMP",
                "temperature must be positive",
            ));
        }
        self.unscale();
        self.params.temp = temp;
        self.setup_physics()?;
        self.scale();
        debug!(
            "DiodePDE {}: temperature {} K, Vt={:.5} V, ni={:e}",
            self.name,
            temp,
            self.vt,
            self.intrinsic_concentration()
        );
        Ok(())
    }
}
