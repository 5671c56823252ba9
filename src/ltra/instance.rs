//! LTRA device instances.
//!
//! An instance owns its terminal history (`v1`, `v2`, `i1`, `i2`, one
//! entry per accepted time point), its convolution coefficients and its
//! breakpoint bookkeeping. The model it references is shared and
//! read-only.

use std::rc::Rc;

use log::{debug, trace};

use super::coeffs::{delayed_index, CoeffHistory, HISTORY_BLOCK};
use super::model::{Interpolation, LtraModel, SpecialCase, StepLimit};
use super::special::{
    intlin, lin_interp, quad_interp, rc_h1dash_twice_int, rc_h2_twice_int, rc_h3dash_twice_int,
    rlc_h1dash_twice_int, rlc_h2, rlc_h3dash_int, thrice_intlin, twice_intlin,
};
use crate::device::{
    check_lid_count, DeviceInstance, DeviceOptions, DeviceState, SolverState, UNLIMITED_TIME_STEP,
};
use crate::error::{DevsimError, Result};
use crate::linalg::{DaeMatrix, JacobianOffsets};
use crate::netlist::ParamMap;

/// Port 1 positive node
pub const POS1: usize = 0;
/// Port 1 negative node
pub const NEG1: usize = 1;
/// Port 2 positive node
pub const POS2: usize = 2;
/// Port 2 negative node
pub const NEG2: usize = 3;
/// Port 1 branch current
pub const IBR1: usize = 4;
/// Port 2 branch current
pub const IBR2: usize = 5;

/// External (node) variables per instance.
pub const NUM_EXT_VARS: usize = 4;
/// Internal (branch current) variables per instance.
pub const NUM_INT_VARS: usize = 2;

/// Local Jacobian stamp shared by every LTRA instance.
pub const JACOBIAN_STAMP: [&[usize]; 6] = [
    &[POS1, IBR1],
    &[NEG1, IBR1],
    &[POS2, IBR2],
    &[NEG2, IBR2],
    &[POS1, NEG1, POS2, NEG2, IBR1, IBR2],
    &[POS1, NEG1, POS2, NEG2, IBR1, IBR2],
];

/// Factor on the breakpoint spread test.
const BREAKPOINT_SPREAD: f64 = 50.0;

/// Safety factor on the truncation-error tolerance.
const LTE_TOLERANCE_FACTOR: f64 = 7.0;

/// Newton iterations for the truncation-error step estimate.
const LTE_NEWTON_ITERATIONS: usize = 2;

/// Initial conditions from an instance card.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LtraInstanceParams {
    /// Initial port 1 voltage
    pub v1: f64,
    /// Initial port 2 voltage
    pub v2: f64,
    /// Initial port 1 current
    pub i1: f64,
    /// Initial port 2 current
    pub i2: f64,
}

impl LtraInstanceParams {
    /// Read `V1`, `V2`, `I1`, `I2` from an instance card.
    pub fn from_params(name: &str, params: &ParamMap) -> Result<Self> {
        Ok(Self {
            v1: params.number(name, "V1")?.unwrap_or(0.0),
            v2: params.number(name, "V2")?.unwrap_or(0.0),
            i1: params.number(name, "I1")?.unwrap_or(0.0),
            i2: params.number(name, "I2")?.unwrap_or(0.0),
        })
    }
}

/// Breakpoint reporting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointPhase {
    /// No breakpoint request has been seen yet
    NotStarted,
    /// Normal operation
    Active,
}

/// Where the delayed time `t - td` falls in the history.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DelayedPoint {
    /// Newest history index before the delayed time
    isaved: usize,
    /// Quadratic weights over `isaved-1..=isaved+1`
    quad: Option<[f64; 3]>,
    /// Linear weights over `isaved..=isaved+1`
    lin: [f64; 2],
}

/// Delayed terminal values.
#[derive(Debug, Clone, Copy, Default)]
struct DelayedValues {
    v1: f64,
    v2: f64,
    i1: f64,
    i2: f64,
}

/// A lossy transmission line instance.
#[derive(Debug)]
pub struct LtraInstance {
    name: String,
    model: Rc<LtraModel>,
    params: LtraInstanceParams,
    lids: Vec<usize>,
    jac: JacobianOffsets,

    vpos1: f64,
    vneg1: f64,
    vpos2: f64,
    vneg2: f64,
    currp1: f64,
    currp2: f64,

    init_volt1: f64,
    init_volt2: f64,
    init_cur1: f64,
    init_cur2: f64,
    input1: f64,
    input2: f64,

    v1: Vec<f64>,
    v2: Vec<f64>,
    i1: Vec<f64>,
    i2: Vec<f64>,
    coeffs: CoeffHistory,

    delayed: Option<DelayedPoint>,
    max_time_step: f64,
    phase: BreakpointPhase,
    pending_breakpoint: Option<f64>,
}

impl LtraInstance {
    /// Build an instance from its card parameters.
    pub fn from_params(name: &str, model: Rc<LtraModel>, params: &ParamMap) -> Result<Self> {
        Ok(Self::new(name, model, LtraInstanceParams::from_params(name, params)?))
    }

    /// Create an instance of `model`.
    pub fn new(name: &str, model: Rc<LtraModel>, params: LtraInstanceParams) -> Self {
        Self {
            name: name.to_string(),
            model,
            params,
            lids: Vec::new(),
            jac: JacobianOffsets::default(),
            vpos1: 0.0,
            vneg1: 0.0,
            vpos2: 0.0,
            vneg2: 0.0,
            currp1: 0.0,
            currp2: 0.0,
            init_volt1: params.v1,
            init_volt2: params.v2,
            init_cur1: params.i1,
            init_cur2: params.i2,
            input1: 0.0,
            input2: 0.0,
            v1: Vec::new(),
            v2: Vec::new(),
            i1: Vec::new(),
            i2: Vec::new(),
            coeffs: CoeffHistory::new(),
            delayed: None,
            max_time_step: UNLIMITED_TIME_STEP,
            phase: BreakpointPhase::NotStarted,
            pending_breakpoint: None,
        }
    }

    /// The shared model.
    pub fn model(&self) -> &LtraModel {
        &self.model
    }

    /// Allocated history length.
    pub fn history_len(&self) -> usize {
        self.v1.len()
    }

    /// Port 1 voltage history.
    pub fn v1_history(&self) -> &[f64] {
        &self.v1
    }

    /// Port 2 voltage history.
    pub fn v2_history(&self) -> &[f64] {
        &self.v2
    }

    /// Port 1 current history.
    pub fn i1_history(&self) -> &[f64] {
        &self.i1
    }

    /// Port 2 current history.
    pub fn i2_history(&self) -> &[f64] {
        &self.i2
    }

    /// Convolution coefficients from the latest evaluation.
    pub fn coeffs(&self) -> &CoeffHistory {
        &self.coeffs
    }

    /// Source terms `(input1, input2)` from the latest load.
    pub fn inputs(&self) -> (f64, f64) {
        (self.input1, self.input2)
    }

    /// Port currents from the latest solution.
    pub fn port_currents(&self) -> (f64, f64) {
        (self.currp1, self.currp2)
    }

    /// Breakpoint reporting phase.
    pub fn breakpoint_phase(&self) -> BreakpointPhase {
        self.phase
    }

    /// Breakpoint scheduled by the last accepted step, not yet reported.
    pub fn pending_breakpoint(&self) -> Option<f64> {
        self.pending_breakpoint
    }

    fn lid(&self, local: usize) -> usize {
        self.lids[local]
    }

    /// True when the DC closed form applies.
    fn uses_dc_form(&self, state: &SolverState) -> bool {
        state.dcop || self.model.special_case == SpecialCase::Rg
    }

    /// Pull port voltages and branch currents from the solution.
    pub fn update_state(&mut self, state: &SolverState, sol: &[f64]) -> Result<()> {
        check_lid_count(&self.name, "registered", NUM_EXT_VARS + NUM_INT_VARS, self.lids.len())?;
        if let Some(&max) = self.lids.iter().max() {
            if max >= sol.len() {
                return Err(DevsimError::lid_count(&self.name, "solution", max + 1, sol.len()));
            }
        }

        self.vpos1 = sol[self.lid(POS1)];
        self.vneg1 = sol[self.lid(NEG1)];
        self.vpos2 = sol[self.lid(POS2)];
        self.vneg2 = sol[self.lid(NEG2)];
        self.currp1 = sol[self.lid(IBR1)];
        self.currp2 = sol[self.lid(IBR2)];

        if state.dcop {
            self.init_volt1 = self.vpos1 - self.vneg1;
            self.init_volt2 = self.vpos2 - self.vneg2;
            self.init_cur1 = self.currp1;
            self.init_cur2 = self.currp2;
        }
        Ok(())
    }

    /// Refresh the convolution coefficients and delayed-point weights for
    /// the current time.
    pub fn model_calculations(&mut self, state: &SolverState) -> Result<()> {
        let model = Rc::clone(&self.model);
        let points = &state.ltra_time_points;
        let index = state.ltra_time_index;
        let now = state.curr_time;
        self.delayed = None;

        match model.special_case {
            SpecialCase::Rlc => {
                self.coeffs.setup_rlc(
                    model.td,
                    model.alpha,
                    model.beta,
                    now,
                    points,
                    index,
                    model.params.chop_reltol,
                );
                self.locate_delayed_point(state)?;
            }
            SpecialCase::Lc => self.locate_delayed_point(state)?,
            SpecialCase::Rc => {
                self.coeffs.setup_rc(
                    model.cbyr,
                    model.rclsqr,
                    now,
                    points,
                    index,
                    model.params.chop_reltol,
                );
            }
            SpecialCase::Rg => {}
        }
        Ok(())
    }

    /// Find the history interval holding `t - td` and its interpolation
    /// weights. Leaves `delayed` empty while `t <= td`.
    fn locate_delayed_point(&mut self, state: &SolverState) -> Result<()> {
        let td = self.model.td;
        let now = state.curr_time;
        if now <= td {
            return Ok(());
        }

        let points = &state.ltra_time_points;
        let index = state.ltra_time_index;
        let target = now - td;

        let mut found = (0..=index).rev().find(|&i| points[i] < target);
        if found == Some(index) {
            // Step larger than the delay: extrapolate from the last interval
            found = index.checked_sub(1);
        }
        let isaved = found.ok_or_else(|| DevsimError::DelayedPointNotFound {
            device: self.name.clone(),
            time: now,
        })?;

        let t2 = points[isaved];
        let t3 = points[isaved + 1];
        let quad = if isaved != 0 && self.model.interpolation != Interpolation::Linear {
            quad_interp(target, points[isaved - 1], t2, t3)
        } else {
            None
        };
        let lin = lin_interp(target, t2, t3).unwrap_or([1.0, 0.0]);

        self.delayed = Some(DelayedPoint { isaved, quad, lin });
        Ok(())
    }

    /// Interpolate one history array at the delayed time.
    fn delayed_sample(&self, history: &[f64], point: &DelayedPoint) -> f64 {
        let i = point.isaved;
        if let Some(q) = point.quad {
            let (a, b, c) = (history[i - 1], history[i], history[i + 1]);
            let value = a * q[0] + b * q[1] + c * q[2];
            let max = a.max(b).max(c);
            let min = a.min(b).min(c);
            if value <= max && value >= min {
                return value;
            }
            trace!(
                "LTRA {}: quadratic interpolation overshoots at index {}, using linear",
                self.name,
                i
            );
        }
        history[i] * point.lin[0] + history[i + 1] * point.lin[1]
    }

    fn delayed_values(&self) -> Option<DelayedValues> {
        let point = self.delayed?;
        Some(DelayedValues {
            v1: self.delayed_sample(&self.v1, &point),
            v2: self.delayed_sample(&self.v2, &point),
            i1: self.delayed_sample(&self.i1, &point),
            i2: self.delayed_sample(&self.i2, &point),
        })
    }

    /// Sum this instance's residual contributions into `f`.
    pub fn load_vectors(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        f: &mut [f64],
    ) -> Result<()> {
        if self.uses_dc_form(state) {
            self.load_dc_vector(opts, f);
        } else {
            self.model_calculations(state)?;
            self.input1 = 0.0;
            self.input2 = 0.0;

            match self.model.special_case {
                SpecialCase::Rlc => {
                    let delayed = self.delayed_values();
                    self.add_rlc_convolutions(state, delayed.as_ref());
                    self.load_lossless_terms(f, delayed.as_ref());
                }
                SpecialCase::Lc => {
                    let delayed = self.delayed_values();
                    self.load_lossless_terms(f, delayed.as_ref());
                }
                SpecialCase::Rc => self.load_rc_terms(state, f),
                SpecialCase::Rg => {}
            }
        }

        f[self.lid(POS1)] += self.currp1;
        f[self.lid(NEG1)] -= self.currp1;
        f[self.lid(POS2)] += self.currp2;
        f[self.lid(NEG2)] -= self.currp2;
        Ok(())
    }

    fn load_dc_vector(&self, opts: &DeviceOptions, f: &mut [f64]) {
        let model = &self.model;
        if model.special_case == SpecialCase::Rg {
            let rg = &model.rg;
            let gmin1 = 1.0 + opts.gmin;
            f[self.lid(IBR1)] += self.vpos1 - self.vneg1 - rg.cosh * self.vpos2
                + rg.cosh * self.vneg2
                + gmin1 * rg.r_sinh * self.currp2;
            f[self.lid(IBR2)] += rg.cosh * self.currp2 - gmin1 * rg.g_sinh * self.vpos2
                + gmin1 * rg.g_sinh * self.vneg2
                + self.currp1;
        } else {
            f[self.lid(IBR1)] += self.currp1 + self.currp2;
            f[self.lid(IBR2)] +=
                self.vpos1 - self.vpos2 - self.currp1 * model.params.resist * model.params.length;
        }
    }

    /// Convolutions of `h1'`, `h2` and `h3'` for the RLC line.
    fn add_rlc_convolutions(&mut self, state: &SolverState, delayed: Option<&DelayedValues>) {
        let model = Rc::clone(&self.model);
        let c = &self.coeffs;
        let index = state.ltra_time_index;
        let (iv1, iv2, ic1, ic2) = (self.init_volt1, self.init_volt2, self.init_cur1, self.init_cur2);

        // h1' against v1 and v2
        let (mut d1, mut d2) = (0.0, 0.0);
        for j in (1..=index).rev() {
            if c.h1dash[j] != 0.0 {
                d1 += c.h1dash[j] * (self.v1[j] - iv1);
                d2 += c.h1dash[j] * (self.v2[j] - iv2);
            }
        }
        d1 += iv1 * model.int_h1dash - iv1 * c.h1dash_first;
        d2 += iv2 * model.int_h1dash - iv2 * c.h1dash_first;
        self.input1 -= d1 * model.admit;
        self.input2 -= d2 * model.admit;

        // h2 against i2 and i1
        let (mut d1, mut d2) = (0.0, 0.0);
        if let Some(d) = delayed {
            d1 = (d.i2 - ic2) * c.h2_first;
            d2 = (d.i1 - ic1) * c.h2_first;
            for j in (1..=c.aux_index).rev() {
                if c.h2[j] != 0.0 {
                    d1 += c.h2[j] * (self.i2[j] - ic2);
                    d2 += c.h2[j] * (self.i1[j] - ic1);
                }
            }
        }
        d1 += ic2 * model.int_h2;
        d2 += ic1 * model.int_h2;
        self.input1 += d1;
        self.input2 += d2;

        // h3' against v2 and v1
        let (mut d1, mut d2) = (0.0, 0.0);
        if let Some(d) = delayed {
            d1 = (d.v2 - iv2) * c.h3dash_first;
            d2 = (d.v1 - iv1) * c.h3dash_first;
            for j in (1..=c.aux_index).rev() {
                if c.h3dash[j] != 0.0 {
                    d1 += c.h3dash[j] * (self.v2[j] - iv2);
                    d2 += c.h3dash[j] * (self.v1[j] - iv1);
                }
            }
        }
        d1 += iv2 * model.int_h3dash;
        d2 += iv1 * model.int_h3dash;
        self.input1 += model.admit * d1;
        self.input2 += model.admit * d2;
    }

    /// Delayed-wave terms and branch equations shared by LC and RLC.
    fn load_lossless_terms(&mut self, f: &mut [f64], delayed: Option<&DelayedValues>) {
        let model = &self.model;
        let att = model.attenuation;
        match delayed {
            Some(d) => {
                self.input1 += att * (d.v2 * model.admit + d.i2);
                self.input2 += att * (d.v1 * model.admit + d.i1);
            }
            None => {
                self.input1 += att * (self.init_volt2 * model.admit + self.init_cur2);
                self.input2 += att * (self.init_volt1 * model.admit + self.init_cur1);
            }
        }

        let g = model.admit * (self.coeffs.h1dash_first + 1.0);
        f[self.lid(IBR1)] += g * (self.vpos1 - self.vneg1) - self.currp1 - self.input1;
        f[self.lid(IBR2)] += g * (self.vpos2 - self.vneg2) - self.currp2 - self.input2;
    }

    /// Convolutions and branch equations of the RC line.
    fn load_rc_terms(&mut self, state: &SolverState, f: &mut [f64]) {
        let model = Rc::clone(&self.model);
        let c = &self.coeffs;
        let index = state.ltra_time_index;
        let (iv1, iv2, ic1, ic2) = (self.init_volt1, self.init_volt2, self.init_cur1, self.init_cur2);

        // h1' against v1 and v2
        let (mut d1, mut d2) = (0.0, 0.0);
        for j in (1..=index).rev() {
            if c.h1dash[j] != 0.0 {
                d1 += c.h1dash[j] * (self.v1[j] - iv1);
                d2 += c.h1dash[j] * (self.v2[j] - iv2);
            }
        }
        d1 += iv1 * model.int_h1dash - iv1 * c.h1dash_first;
        d2 += iv2 * model.int_h1dash - iv2 * c.h1dash_first;
        self.input1 -= d1;
        self.input2 -= d2;

        // h2 against i2 and i1
        let (mut d1, mut d2) = (0.0, 0.0);
        for j in (1..=index).rev() {
            if c.h2[j] != 0.0 {
                d1 += c.h2[j] * (self.i2[j] - ic2);
                d2 += c.h2[j] * (self.i1[j] - ic1);
            }
        }
        d1 += ic2 * model.int_h2 - ic2 * c.h2_first;
        d2 += ic1 * model.int_h2 - ic1 * c.h2_first;
        self.input1 += d1;
        self.input2 += d2;

        // h3' against v2 and v1
        let (mut d1, mut d2) = (0.0, 0.0);
        for j in (1..=index).rev() {
            if c.h3dash[j] != 0.0 {
                d1 += c.h3dash[j] * (self.v2[j] - iv2);
                d2 += c.h3dash[j] * (self.v1[j] - iv1);
            }
        }
        d1 += iv2 * model.int_h3dash - iv2 * c.h3dash_first;
        d2 += iv1 * model.int_h3dash - iv1 * c.h3dash_first;
        self.input1 += d1;
        self.input2 += d2;

        let port1 = self.vpos1 - self.vneg1;
        let port2 = self.vpos2 - self.vneg2;
        f[self.lid(IBR1)] += c.h1dash_first * port1
            - c.h3dash_first * port2
            - c.h2_first * self.currp2
            - self.currp1
            - self.input1;
        f[self.lid(IBR2)] += c.h1dash_first * port2
            - c.h3dash_first * port1
            - c.h2_first * self.currp1
            - self.currp2
            - self.input2;
    }

    /// Sum this instance's Jacobian contributions into `df`.
    ///
    /// Uses the coefficients computed by the preceding
    /// [`load_vectors`](Self::load_vectors) call.
    pub fn load_matrices(
        &self,
        state: &SolverState,
        opts: &DeviceOptions,
        df: &mut dyn DaeMatrix,
    ) -> Result<()> {
        let jac = &self.jac;
        let model = &self.model;

        jac.add(df, POS1, IBR1, 1.0)?;
        jac.add(df, NEG1, IBR1, -1.0)?;
        jac.add(df, POS2, IBR2, 1.0)?;
        jac.add(df, NEG2, IBR2, -1.0)?;

        if self.uses_dc_form(state) {
            if model.special_case == SpecialCase::Rg {
                let rg = &model.rg;
                let gmin1 = 1.0 + opts.gmin;
                jac.add(df, IBR1, POS1, 1.0)?;
                jac.add(df, IBR1, NEG1, -1.0)?;
                jac.add(df, IBR1, POS2, -rg.cosh)?;
                jac.add(df, IBR1, NEG2, rg.cosh)?;
                jac.add(df, IBR1, IBR2, gmin1 * rg.r_sinh)?;

                jac.add(df, IBR2, IBR2, rg.cosh)?;
                jac.add(df, IBR2, POS2, -gmin1 * rg.g_sinh)?;
                jac.add(df, IBR2, NEG2, gmin1 * rg.g_sinh)?;
                jac.add(df, IBR2, IBR1, 1.0)?;
            } else {
                jac.add(df, IBR1, IBR1, 1.0)?;
                jac.add(df, IBR1, IBR2, 1.0)?;

                jac.add(df, IBR2, POS1, 1.0)?;
                jac.add(df, IBR2, POS2, -1.0)?;
                jac.add(df, IBR2, IBR1, -model.params.resist * model.params.length)?;
            }
            return Ok(());
        }

        let c = &self.coeffs;
        match model.special_case {
            SpecialCase::Rlc | SpecialCase::Lc => {
                let g = if model.special_case == SpecialCase::Rlc {
                    model.admit * (c.h1dash_first + 1.0)
                } else {
                    model.admit
                };
                jac.add(df, IBR1, POS1, g)?;
                jac.add(df, IBR1, NEG1, -g)?;
                jac.add(df, IBR1, IBR1, -1.0)?;

                jac.add(df, IBR2, POS2, g)?;
                jac.add(df, IBR2, NEG2, -g)?;
                jac.add(df, IBR2, IBR2, -1.0)?;
            }
            SpecialCase::Rc => {
                jac.add(df, IBR1, IBR1, -1.0)?;
                jac.add(df, IBR2, IBR2, -1.0)?;

                jac.add(df, IBR1, POS1, c.h1dash_first)?;
                jac.add(df, IBR1, NEG1, -c.h1dash_first)?;
                jac.add(df, IBR2, POS2, c.h1dash_first)?;
                jac.add(df, IBR2, NEG2, -c.h1dash_first)?;

                jac.add(df, IBR1, IBR2, -c.h2_first)?;
                jac.add(df, IBR2, IBR1, -c.h2_first)?;

                jac.add(df, IBR1, POS2, -c.h3dash_first)?;
                jac.add(df, IBR1, NEG2, c.h3dash_first)?;
                jac.add(df, IBR2, POS1, -c.h3dash_first)?;
                jac.add(df, IBR2, NEG1, c.h3dash_first)?;
            }
            SpecialCase::Rg => {}
        }
        Ok(())
    }

    /// Record the accepted point, schedule breakpoints, compact the
    /// history and update the time step bound.
    pub fn accept_step(&mut self, state: &mut SolverState, opts: &DeviceOptions) -> Result<()> {
        let index = state.ltra_time_index;
        self.ensure_history(index);

        self.v1[index] = self.vpos1 - self.vneg1;
        self.v2[index] = self.vpos2 - self.vneg2;
        self.i1[index] = self.currp1;
        self.i2[index] = self.currp2;

        if state.init_tran && !state.dcop {
            self.coeffs.grow_to(HISTORY_BLOCK);
        } else if !state.dcop {
            self.coeffs.ensure_index(index);
        }

        let compact = opts.try_to_compact && index >= 2 && self.history_is_straight(state);

        if index > 0 && self.model.is_delay_line() {
            if let Some(time) = self.breakpoint_check(state, opts) {
                trace!("LTRA {}: breakpoint scheduled at {:e}", self.name, time);
                self.pending_breakpoint = Some(time);
            }
        }

        if compact {
            self.v1[index - 1] = self.v1[index];
            self.v2[index - 1] = self.v2[index];
            self.i1[index - 1] = self.i1[index];
            self.i2[index - 1] = self.i2[index];
            state.ltra_do_compact = true;
            trace!("LTRA {}: compacting history at index {}", self.name, index);
        }

        self.calculate_max_time_step(state, opts);
        Ok(())
    }

    /// Grow the terminal history so `index` can be written.
    fn ensure_history(&mut self, index: usize) {
        if index >= self.v1.len() {
            let size = (index / HISTORY_BLOCK + 1) * HISTORY_BLOCK;
            self.v1.resize(size, 0.0);
            self.v2.resize(size, 0.0);
            self.i1.resize(size, 0.0);
            self.i2.resize(size, 0.0);
        }
    }

    /// Whether the last three samples of every tracked quantity lie on a
    /// straight line.
    fn history_is_straight(&self, state: &SolverState) -> bool {
        let k = state.ltra_time_index;
        let t = [
            state.ltra_time_points[k - 2],
            state.ltra_time_points[k - 1],
            state.ltra_time_points[k],
        ];
        [&self.v1, &self.v2, &self.i1, &self.i2]
            .iter()
            .all(|h| self.model.straight_line(t, [h[k - 2], h[k - 1], h[k]]))
    }

    /// Detect a slope change in the outgoing waves that will reach the
    /// far end one delay later.
    fn breakpoint_check(&self, state: &SolverState, opts: &DeviceOptions) -> Option<f64> {
        let model = &self.model;
        let k = state.ltra_time_index;
        let t = &state.ltra_time_points;
        let wave = |v: &[f64], i: &[f64], at: usize| (v[at] + i[at] * model.imped) * model.attenuation;

        let v1_ = wave(&self.v1, &self.i1, k);
        let v2_ = wave(&self.v1, &self.i1, k - 1);
        let v3_ = if k < 2 { v2_ } else { wave(&self.v1, &self.i1, k - 2) };
        let v4_ = wave(&self.v2, &self.i2, k);
        let v5_ = wave(&self.v2, &self.i2, k - 1);
        let v6_ = if k < 2 { v5_ } else { wave(&self.v2, &self.i2, k - 2) };

        let d1 = (v1_ - v2_) / (t[k] - t[k - 1]);
        let d2 = if k < 2 { d1 } else { (v2_ - v3_) / (t[k - 1] - t[k - 2]) };
        let d3 = (v4_ - v5_) / (t[k] - t[k - 1]);
        let d4 = if k < 2 { d3 } else { (v5_ - v6_) / (t[k - 1] - t[k - 2]) };

        let spread = |a: f64, b: f64, c: f64| {
            let max = a.max(b).max(c);
            let min = a.min(b).min(c);
            max - min >= (BREAKPOINT_SPREAD * (opts.reltol / 3.0 * (a + b + c) + opts.abstol)).abs()
        };

        let port1 = (d1 - d2).abs() > model.params.reltol * d1.abs().max(d2.abs()) + model.params.abstol
            && spread(v1_, v2_, v3_);
        let port2 = (d3 - d4).abs() >= model.params.reltol * d3.abs().max(d4.abs()) + model.params.abstol
            && spread(v4_, v5_, v6_);

        if port1 || port2 {
            Some(t[k - 1] + model.td)
        } else {
            None
        }
    }

    /// Update the time step bound after an accepted step.
    pub fn calculate_max_time_step(&mut self, state: &SolverState, opts: &DeviceOptions) {
        let model = Rc::clone(&self.model);
        let k = state.ltra_time_index;

        if !model.is_delay_line() && !model.params.lte_step_control {
            self.max_time_step = UNLIMITED_TIME_STEP;
            return;
        }
        if k < 2 {
            self.max_time_step = if model.is_delay_line() {
                model.td.min(model.max_safe_step)
            } else {
                UNLIMITED_TIME_STEP
            };
            return;
        }

        let mut max_step = UNLIMITED_TIME_STEP;
        if model.is_delay_line() {
            match model.step_limit {
                StepLimit::Delay => max_step = model.td,
                StepLimit::SlopeChange => {
                    let t = &state.ltra_time_points;
                    let wave =
                        |v: &[f64], i: &[f64], at: usize| (v[at] * model.admit + i[at]) * model.attenuation;
                    let i1_ = wave(&self.v2, &self.i2, k);
                    let i2_ = wave(&self.v2, &self.i2, k - 1);
                    let i3_ = wave(&self.v2, &self.i2, k - 2);
                    let i4_ = wave(&self.v1, &self.i1, k);
                    let i5_ = wave(&self.v1, &self.i1, k - 1);
                    let i6_ = wave(&self.v1, &self.i1, k - 2);

                    let d1 = (i1_ - i2_) / (t[k] - t[k - 1]);
                    let d2 = (i2_ - i3_) / (t[k - 1] - t[k - 2]);
                    let d3 = (i4_ - i5_) / (t[k] - t[k - 1]);
                    let d4 = (i5_ - i6_) / (t[k - 1] - t[k - 2]);

                    let (rel, abs) = (model.params.reltol, model.params.abstol);
                    if (d1 - d2).abs() >= rel * d1.abs().max(d2.abs()) + abs
                        || (d3 - d4).abs() >= rel * d3.abs().max(d4.abs()) + abs
                    {
                        max_step = max_step.min(model.td);
                    }
                }
            }
        }

        if model.special_case == SpecialCase::Rlc && !model.params.trunc_dont_cut {
            max_step = max_step.min(model.max_safe_step);
        }

        if model.params.lte_step_control
            && matches!(model.special_case, SpecialCase::Rlc | SpecialCase::Rc)
        {
            max_step = self.lte_step_bound(state, opts, max_step);
        }

        self.max_time_step = max_step;
    }

    /// Experimental truncation-error step control.
    fn lte_step_bound(&self, state: &SolverState, opts: &DeviceOptions, max_step: f64) -> f64 {
        let tolerance = LTE_TOLERANCE_FACTOR
            * (opts.reltol * (self.input1.abs() + self.input2.abs()) + opts.abstol);
        let current = self.lte_calculate(state, state.curr_time);
        if current < tolerance {
            return max_step;
        }

        if !self.model.params.trunc_nr {
            return max_step * 0.5;
        }

        let k = state.ltra_time_index;
        let previous = state.ltra_time_points[k - 1];
        let mut x = state.ltra_time_points[k];
        let mut y = current;
        let mut iterations = 0;
        loop {
            let delta = 0.01 * (x - previous);
            let deriv = (self.lte_calculate(state, x + delta) - y) / delta;
            x += (tolerance - y) / deriv;
            iterations += 1;
            if iterations >= LTE_NEWTON_ITERATIONS {
                break;
            }
            y = self.lte_calculate(state, x);
        }
        debug!("LTRA {}: truncation error limits step to {:e}", self.name, x - previous);
        max_step.min(x - previous)
    }

    /// Divided-difference estimate of the second derivative at index `i`.
    fn second_deriv(state: &SolverState, i: usize, a: f64, b: f64, c: f64) -> f64 {
        let t = &state.ltra_time_points;
        let oof = state.time_point(i);
        ((c - b) / (oof - t[i - 1]) - (b - a) / (t[i - 1] - t[i - 2])) / (oof - t[i - 2])
    }

    /// Local truncation error of the two convolution equations at `curtime`.
    pub fn lte_calculate(&self, state: &SolverState, curtime: f64) -> f64 {
        let model = &self.model;
        let k = state.ltra_time_index;
        if k < 2 {
            return 0.0;
        }
        let t = &state.ltra_time_points;
        let step = curtime - t[k - 1];
        let (mut eq1, mut eq2) = (0.0, 0.0);

        match model.special_case {
            SpecialCase::Lc | SpecialCase::Rg => return 0.0,
            SpecialCase::Rlc => {
                let td = model.td;
                let aux = if curtime > td {
                    Some(delayed_index(td, curtime, t, k - 1))
                } else {
                    None
                };

                let hi = step;
                let hival = rlc_h1dash_twice_int(hi, model.beta);
                let h1t = 0.5 * hival * step - intlin(0.0, hi, 0.0, hival, 0.0, hi);

                let (mut h2t, mut h3t) = (0.0, 0.0);
                if let Some(aux) = aux {
                    let hi = curtime - t[aux];
                    let lo = (t[k - 1] - t[aux]).max(td);
                    let span = curtime - td - t[aux];

                    let hival = rlc_h2(hi, td, model.alpha, model.beta);
                    let loval = rlc_h2(lo, td, model.alpha, model.beta);
                    let f1 = twice_intlin(lo, hi, lo, loval, hival, lo, hi);
                    let g1 = thrice_intlin(lo, hi, lo, lo, loval, hival, lo, hi);
                    h2t = 0.5 * f1 * span - g1;

                    let hival = rlc_h3dash_int(hi, td, model.beta);
                    let loval = rlc_h3dash_int(lo, td, model.beta);
                    let f1 = intlin(lo, hi, loval, hival, lo, hi);
                    let g1 = twice_intlin(lo, hi, lo, loval, hival, lo, hi);
                    h3t = 0.5 * f1 * span - g1;
                }

                let dd = |h: &[f64]| Self::second_deriv(state, k, h[k - 2], h[k - 1], h[k]);
                eq1 += model.admit * (dd(&self.v1) * h1t).abs();
                eq2 += model.admit * (dd(&self.v2) * h1t).abs();

                // Delayed terms need two points before the delayed index
                if let Some(aux) = aux.filter(|&a| a >= 1 && a < k) {
                    let dd = |h: &[f64]| {
                        Self::second_deriv(state, aux + 1, h[aux - 1], h[aux], h[aux + 1])
                    };
                    eq2 += model.admit * (dd(&self.v1) * h3t).abs();
                    eq1 += model.admit * (dd(&self.v2) * h3t).abs();
                    eq2 += (dd(&self.i1) * h2t).abs();
                    eq1 += (dd(&self.i2) * h2t).abs();
                }
            }
            SpecialCase::Rc => {
                let hi = step;
                let first = |hival: f64| 0.5 * hival * step - intlin(0.0, hi, 0.0, hival, 0.0, hi);
                let h1t = first(rc_h1dash_twice_int(hi, model.cbyr));
                let h2t = first(rc_h2_twice_int(hi, model.rclsqr));
                let h3t = first(rc_h3dash_twice_int(hi, model.cbyr, model.rclsqr));

                let dd = |h: &[f64]| Self::second_deriv(state, k, h[k - 2], h[k - 1], h[k]);
                let (dv1, dv2) = (dd(&self.v1), dd(&self.v2));
                eq1 += (dv1 * h1t).abs();
                eq2 += (dv1 * h3t).abs();
                eq2 += (dv2 * h1t).abs();
                eq1 += (dv2 * h3t).abs();
                eq2 += (dd(&self.i1) * h2t).abs();
                eq1 += (dd(&self.i2) * h2t).abs();
            }
        }

        eq1.abs() + eq2.abs()
    }
}

impl DeviceInstance for LtraInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_ext_vars(&self) -> usize {
        NUM_EXT_VARS
    }

    fn num_int_vars(&self) -> usize {
        NUM_INT_VARS
    }

    fn register_lids(&mut self, ext: &[usize], int: &[usize]) -> Result<()> {
        check_lid_count(&self.name, "external", NUM_EXT_VARS, ext.len())?;
        check_lid_count(&self.name, "internal", NUM_INT_VARS, int.len())?;
        self.lids = ext.iter().chain(int.iter()).copied().collect();
        Ok(())
    }

    fn jacobian_stamp(&self) -> Vec<Vec<usize>> {
        JACOBIAN_STAMP.iter().map(|row| row.to_vec()).collect()
    }

    fn register_jac_lids(&mut self, matrix: &dyn DaeMatrix) -> Result<()> {
        self.jac = JacobianOffsets::resolve(&self.name, &self.jacobian_stamp(), &self.lids, matrix)?;
        Ok(())
    }

    fn breakpoints(&mut self, state: &SolverState, out: &mut Vec<f64>) {
        if state.time_step_number != 0 && self.phase == BreakpointPhase::Active {
            if let Some(time) = self.pending_breakpoint.take() {
                out.push(time);
            }
        }
        self.phase = BreakpointPhase::Active;
    }

    fn max_time_step(&self) -> f64 {
        self.max_time_step
    }

    fn set_initial_guess(&mut self, sol: &mut [f64]) -> Result<()> {
        if !self.lids.is_empty() {
            sol[self.lid(IBR1)] = self.params.i1;
            sol[self.lid(IBR2)] = self.params.i2;
        }
        Ok(())
    }

    fn internal_state(&self) -> Option<DeviceState> {
        let list = self.v1.len();
        let coeff_list = self.coeffs.len();
        let mut data = Vec::with_capacity(6 + 4 * list + 3 * coeff_list);
        data.extend_from_slice(&[
            self.input1,
            self.input2,
            self.init_volt1,
            self.init_volt2,
            self.init_cur1,
            self.init_cur2,
        ]);
        for k in 0..list {
            data.extend_from_slice(&[self.v1[k], self.v2[k], self.i1[k], self.i2[k]]);
        }
        for k in 0..coeff_list {
            data.extend_from_slice(&[self.coeffs.h1dash[k], self.coeffs.h2[k], self.coeffs.h3dash[k]]);
        }
        Some(DeviceState {
            id: self.name.clone(),
            data,
            data_size_t: vec![list, coeff_list],
        })
    }

    fn set_internal_state(&mut self, state: &DeviceState) -> Result<()> {
        if state.id != self.name {
            return Err(DevsimError::RestartIdMismatch {
                device: self.name.clone(),
                found: state.id.clone(),
            });
        }
        let (list, coeff_list) = match state.data_size_t.as_slice() {
            [a, b] => (*a, *b),
            other => {
                return Err(DevsimError::RestartSizeMismatch {
                    device: self.name.clone(),
                    message: format!("expected 2 size markers, got {}", other.len()),
                })
            }
        };
        let expected = 6 + 4 * list + 3 * coeff_list;
        if state.data.len() != expected {
            return Err(DevsimError::RestartSizeMismatch {
                device: self.name.clone(),
                message: format!("expected {} values, got {}", expected, state.data.len()),
            });
        }

        let d = &state.data;
        self.input1 = d[0];
        self.input2 = d[1];
        self.init_volt1 = d[2];
        self.init_volt2 = d[3];
        self.init_cur1 = d[4];
        self.init_cur2 = d[5];

        let history = &d[6..6 + 4 * list];
        self.v1 = history.chunks_exact(4).map(|c| c[0]).collect();
        self.v2 = history.chunks_exact(4).map(|c| c[1]).collect();
        self.i1 = history.chunks_exact(4).map(|c| c[2]).collect();
        self.i2 = history.chunks_exact(4).map(|c| c[3]).collect();

        let coeffs = &d[6 + 4 * list..];
        self.coeffs.h1dash = coeffs.chunks_exact(3).map(|c| c[0]).collect();
        self.coeffs.h2 = coeffs.chunks_exact(3).map(|c| c[1]).collect();
        self.coeffs.h3dash = coeffs.chunks_exact(3).map(|c| c[2]).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::DenseMatrix;
    use crate::ltra::model::LtraParams;
    use approx::assert_relative_eq;

    fn rc_model() -> Rc<LtraModel> {
        let params = LtraParams::new().with_rlgc(10.0, 0.0, 0.0, 1e-9, 1.0);
        Rc::new(LtraModel::new("rcline", params, &DeviceOptions::default()).unwrap())
    }

    fn lc_model() -> Rc<LtraModel> {
        let params = LtraParams::new().with_rlgc(0.0, 250e-9, 0.0, 100e-12, 1.0);
        Rc::new(LtraModel::new("lcline", params, &DeviceOptions::default()).unwrap())
    }

    fn registered(model: Rc<LtraModel>) -> (LtraInstance, DenseMatrix) {
        let mut inst = LtraInstance::new("O1", model, LtraInstanceParams::default());
        inst.register_lids(&[0, 1, 2, 3], &[4, 5]).unwrap();
        let matrix = DenseMatrix::new(6);
        inst.register_jac_lids(&matrix).unwrap();
        (inst, matrix)
    }

    #[test]
    fn test_lid_counts_validated() {
        let mut inst = LtraInstance::new("O1", rc_model(), LtraInstanceParams::default());
        let err = inst.register_lids(&[0, 1, 2], &[4, 5]).unwrap_err();
        assert!(matches!(err, DevsimError::LidCountMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_update_requires_registered_lids() {
        let state = SolverState::default();
        let sol = [0.0; 6];
        let mut inst = LtraInstance::new("O1", rc_model(), LtraInstanceParams::default());
        let err = inst.update_state(&state, &sol).unwrap_err();
        assert!(matches!(err, DevsimError::LidCountMismatch { expected: 6, actual: 0, .. }));

        // A solution shorter than the registered LIDs
        let (mut inst, _) = registered(rc_model());
        let err = inst.update_state(&state, &sol[..4]).unwrap_err();
        assert!(matches!(err, DevsimError::LidCountMismatch { expected: 6, actual: 4, .. }));
        assert!(inst.update_state(&state, &sol).is_ok());
    }

    #[test]
    fn test_rc_dc_load() {
        let (mut inst, _) = registered(rc_model());
        let state = SolverState::default();
        let opts = DeviceOptions::default();
        let sol = [1.0, 0.0, 0.4, 0.0, 2e-3, -1e-3];
        inst.update_state(&state, &sol).unwrap();

        let mut f = [0.0; 6];
        inst.load_vectors(&state, &opts, &mut f).unwrap();
        assert_relative_eq!(f[IBR1], 2e-3 - 1e-3);
        assert_relative_eq!(f[IBR2], 1.0 - 0.4 - 2e-3 * 10.0 * 1.0);
        assert_relative_eq!(f[POS1], 2e-3);
        assert_relative_eq!(f[NEG1], -2e-3);
        assert_relative_eq!(f[POS2], -1e-3);
        assert_relative_eq!(f[NEG2], 1e-3);
    }

    #[test]
    fn test_dc_jacobian_matches_finite_difference() {
        let (mut inst, mut df) = registered(rc_model());
        let state = SolverState::default();
        let opts = DeviceOptions::default();
        let sol = [1.0, 0.1, 0.4, 0.05, 2e-3, -1e-3];
        inst.update_state(&state, &sol).unwrap();
        let mut f = [0.0; 6];
        inst.load_vectors(&state, &opts, &mut f).unwrap();
        inst.load_matrices(&state, &opts, &mut df).unwrap();

        let h = 1e-6;
        for col in 0..6 {
            let mut plus = sol;
            let mut minus = sol;
            plus[col] += h;
            minus[col] -= h;
            let (mut fp, mut fm) = ([0.0; 6], [0.0; 6]);
            inst.update_state(&state, &plus).unwrap();
            inst.load_vectors(&state, &opts, &mut fp).unwrap();
            inst.update_state(&state, &minus).unwrap();
            inst.load_vectors(&state, &opts, &mut fm).unwrap();
            for row in 0..6 {
                let fd = (fp[row] - fm[row]) / (2.0 * h);
                assert!((df.at(row, col) - fd).abs() < 1e-6, "({row}, {col})");
            }
        }
    }

    #[test]
    fn test_rc_convolution_uses_each_history_point() {
        let (mut inst, _) = registered(rc_model());
        let opts = DeviceOptions::default();
        let mut state = SolverState::default();

        // DC point with zero initial conditions
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();

        // Two accepted transient points with nonzero currents
        state.dcop = false;
        state.init_tran = true;
        let samples = [[0.5, 0.0, 0.1, 0.0, 1e-3, 2e-4], [0.8, 0.0, 0.3, 0.0, 1.5e-3, 4e-4]];
        for (n, sol) in samples.iter().enumerate() {
            state.ltra_time_index += 1;
            state.curr_time = (n + 1) as f64 * 1e-9;
            state.ltra_time_points.push(state.curr_time);
            inst.update_state(&state, sol).unwrap();
            inst.accept_step(&mut state, &opts).unwrap();
            state.init_tran = false;
        }

        state.curr_time = 3e-9;
        let sol = [1.0, 0.0, 0.4, 0.0, 2e-3, 5e-4];
        inst.update_state(&state, &sol).unwrap();
        let mut f = [0.0; 6];
        inst.load_vectors(&state, &opts, &mut f).unwrap();

        // Independent evaluation of the three convolution sums
        let c = inst.coeffs().clone();
        let h = |coeffs: &[f64], hist: &[f64]| (1..=2).map(|j| coeffs[j] * hist[j]).sum::<f64>();
        let input1 = -h(&c.h1dash, inst.v1_history())
            + h(&c.h2, inst.i2_history())
            + h(&c.h3dash, inst.v2_history());
        let (in1, _) = inst.inputs();
        assert_relative_eq!(in1, input1, max_relative = 1e-12);
        assert!(c.h2[1] != 0.0 && c.h2[2] != 0.0);

        let expected = c.h1dash_first * 1.0 - c.h3dash_first * 0.4 - c.h2_first * 5e-4 - 2e-3 - input1;
        assert_relative_eq!(f[IBR1], expected, max_relative = 1e-12);
    }

    #[test]
    fn test_history_grows_and_restart_round_trip() {
        let (mut inst, _) = registered(rc_model());
        let opts = DeviceOptions::default();
        let mut state = SolverState::default();
        inst.update_state(&state, &[0.1, 0.0, 0.1, 0.0, 0.0, 0.0]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();
        assert_eq!(inst.history_len(), 10);

        state.dcop = false;
        state.init_tran = true;
        let mut last_len = inst.history_len();
        for n in 1..=12 {
            state.curr_time = n as f64 * 1e-10;
            let v = 0.1 + 0.01 * (n as f64).sin();
            let sol = [v, 0.0, v * 0.5, 0.0, v * 1e-3, -v * 1e-3];
            inst.update_state(&state, &sol).unwrap();
            let mut f = [0.0; 6];
            inst.load_vectors(&state, &opts, &mut f).unwrap();

            state.ltra_time_index = n;
            state.ltra_time_points.push(state.curr_time);
            inst.accept_step(&mut state, &opts).unwrap();
            state.init_tran = false;
            assert!(inst.history_len() >= last_len);
            assert!(inst.history_len() > n);
            last_len = inst.history_len();
        }
        assert_eq!(inst.history_len(), 20);

        let saved = inst.internal_state().unwrap();
        assert_eq!(saved.data_size_t, vec![20, inst.coeffs().len()]);

        let mut fresh = LtraInstance::new("O1", rc_model(), LtraInstanceParams::default());
        fresh.set_internal_state(&saved).unwrap();
        assert_eq!(fresh.v1_history(), inst.v1_history());
        assert_eq!(fresh.i2_history(), inst.i2_history());
        assert_eq!(fresh.coeffs().h2, inst.coeffs().h2);
        assert_eq!(fresh.internal_state().unwrap(), saved);
    }

    #[test]
    fn test_restart_rejects_foreign_or_short_records() {
        let mut inst = LtraInstance::new("O1", rc_model(), LtraInstanceParams::default());
        let other = DeviceState {
            id: "O2".to_string(),
            data: vec![0.0; 6],
            data_size_t: vec![0, 0],
        };
        assert!(matches!(
            inst.set_internal_state(&other),
            Err(DevsimError::RestartIdMismatch { .. })
        ));
        let short = DeviceState {
            id: "O1".to_string(),
            data: vec![0.0; 7],
            data_size_t: vec![1, 0],
        };
        assert!(matches!(
            inst.set_internal_state(&short),
            Err(DevsimError::RestartSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_lc_max_step_before_two_points() {
        let (mut inst, _) = registered(lc_model());
        let mut state = SolverState::default();
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &DeviceOptions::default()).unwrap();
        assert_relative_eq!(inst.max_time_step(), 5e-9, max_relative = 1e-12);
    }

    #[test]
    fn test_breakpoint_phases() {
        let (mut inst, _) = registered(lc_model());
        let mut state = SolverState::default();
        let mut out = Vec::new();

        assert_eq!(inst.breakpoint_phase(), BreakpointPhase::NotStarted);
        inst.pending_breakpoint = Some(1e-9);
        inst.breakpoints(&state, &mut out);
        assert!(out.is_empty());
        assert_eq!(inst.breakpoint_phase(), BreakpointPhase::Active);

        state.time_step_number = 3;
        inst.breakpoints(&state, &mut out);
        assert_eq!(out, vec![1e-9]);
        assert_eq!(inst.pending_breakpoint(), None);
    }

    #[test]
    fn test_delayed_point_not_found() {
        let (mut inst, _) = registered(lc_model());
        let opts = DeviceOptions::default();
        let mut state = SolverState::default();
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();

        // First transient step ten delays long
        state.dcop = false;
        state.curr_time = 50e-9;
        let mut f = [0.0; 6];
        let err = inst.load_vectors(&state, &opts, &mut f).unwrap_err();
        assert!(matches!(err, DevsimError::DelayedPointNotFound { .. }));
    }

    fn rlc_model() -> Rc<LtraModel> {
        let params = LtraParams::new().with_rlgc(5.0, 250e-9, 0.0, 100e-12, 1.0);
        Rc::new(LtraModel::new("rlcline", params, &DeviceOptions::default()).unwrap())
    }

    /// Solve-then-accept at `time` the way the bench does, without the
    /// time list shrink.
    fn accept_at(inst: &mut LtraInstance, state: &mut SolverState, opts: &DeviceOptions, time: f64, sol: &[f64]) {
        state.curr_time = time;
        inst.update_state(state, sol).unwrap();
        let mut f = [0.0; 6];
        inst.load_vectors(state, opts, &mut f).unwrap();
        state.ltra_time_index += 1;
        state.ltra_time_points.push(time);
        inst.accept_step(state, opts).unwrap();
    }

    /// Drop the second newest time point after a compacting accept.
    fn shrink_time_list(state: &mut SolverState) -> bool {
        if !state.ltra_do_compact {
            return false;
        }
        let k = state.ltra_time_index;
        state.ltra_time_points[k - 1] = state.ltra_time_points[k];
        state.ltra_time_points.pop();
        state.ltra_time_index -= 1;
        state.ltra_do_compact = false;
        true
    }

    fn finish_step(state: &mut SolverState) {
        state.init_tran = false;
        state.time_step_number += 1;
    }

    #[test]
    fn test_transient_jacobians_match_finite_difference() {
        let opts = DeviceOptions::default();
        for model in [rlc_model(), lc_model(), rc_model()] {
            let (mut inst, mut df) = registered(Rc::clone(&model));
            let mut state = SolverState::default();
            inst.update_state(&state, &[0.3, 0.0, 0.2, 0.0, 1e-3, -1e-3]).unwrap();
            let mut f = [0.0; 6];
            inst.load_vectors(&state, &opts, &mut f).unwrap();
            inst.accept_step(&mut state, &opts).unwrap();

            // Past one delay so the lossless cases read delayed history
            state.dcop = false;
            state.init_tran = true;
            for n in 1..=6 {
                let s = (n as f64).sin();
                let sol = [0.3 + 0.1 * s, 0.01 * s, 0.2 - 0.05 * s, 0.0, 1e-3 * (1.0 + s), -1e-3 * s];
                accept_at(&mut inst, &mut state, &opts, n as f64 * 1e-9, &sol);
                finish_step(&mut state);
            }

            state.curr_time = 7e-9;
            let sol = [0.45, 0.02, 0.15, -0.01, 1.5e-3, -4e-4];
            inst.update_state(&state, &sol).unwrap();
            let mut f = [0.0; 6];
            inst.load_vectors(&state, &opts, &mut f).unwrap();
            df.clear();
            inst.load_matrices(&state, &opts, &mut df).unwrap();
            if model.special_case != SpecialCase::Rc {
                assert!(inst.delayed.is_some(), "{:?}", model.special_case);
            }

            let h = 1e-6;
            for col in 0..6 {
                let mut plus = sol;
                let mut minus = sol;
                plus[col] += h;
                minus[col] -= h;
                let (mut fp, mut fm) = ([0.0; 6], [0.0; 6]);
                inst.update_state(&state, &plus).unwrap();
                inst.load_vectors(&state, &opts, &mut fp).unwrap();
                inst.update_state(&state, &minus).unwrap();
                inst.load_vectors(&state, &opts, &mut fm).unwrap();
                for row in 0..6 {
                    let fd = (fp[row] - fm[row]) / (2.0 * h);
                    assert!(
                        (df.at(row, col) - fd).abs() < 1e-6 * (1.0 + fd.abs()),
                        "{:?} ({row}, {col}): {} vs {}",
                        model.special_case,
                        df.at(row, col),
                        fd
                    );
                }
            }
        }
    }

    #[test]
    fn test_straight_history_compacts_time_list() {
        let opts = DeviceOptions::default().with_try_to_compact(true);
        let params = LtraParams::new().with_rlgc(0.0, 250e-9, 0.0, 100e-12, 1.0);
        let model = Rc::new(LtraModel::new("lcline", params, &opts).unwrap());
        assert_eq!(model.interpolation, Interpolation::Linear);
        let (mut inst, _) = registered(model);

        let mut state = SolverState::default();
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();
        assert!(!state.ltra_do_compact);

        // Every quantity ramps linearly from the DC point
        let ramp = |t: f64| {
            let v = 1e8 * t;
            [v, 0.0, 0.5 * v, 0.0, 1e-3 * v, -1e-3 * v]
        };
        state.dcop = false;
        state.init_tran = true;

        accept_at(&mut inst, &mut state, &opts, 1e-9, &ramp(1e-9));
        assert!(!state.ltra_do_compact);
        assert!(!shrink_time_list(&mut state));
        finish_step(&mut state);

        accept_at(&mut inst, &mut state, &opts, 2e-9, &ramp(2e-9));
        assert!(state.ltra_do_compact);
        assert_eq!(state.ltra_time_index, 2);
        // The middle sample now holds the newest one
        assert_relative_eq!(inst.v1_history()[1], 0.2, max_relative = 1e-12);
        assert_eq!(inst.v1_history()[1], inst.v1_history()[2]);
        assert_eq!(inst.i2_history()[1], inst.i2_history()[2]);
        assert!(shrink_time_list(&mut state));
        finish_step(&mut state);
        assert_eq!(state.ltra_time_points, vec![0.0, 2e-9]);
        assert_eq!(state.ltra_time_index, 1);

        let mut compactions = 1;
        for n in 3..=5 {
            let t = n as f64 * 1e-9;
            accept_at(&mut inst, &mut state, &opts, t, &ramp(t));
            if shrink_time_list(&mut state) {
                compactions += 1;
            }
            finish_step(&mut state);
            assert_eq!(state.ltra_time_points.len(), state.ltra_time_index + 1);
        }
        assert_eq!(compactions, 4);
        assert_eq!(state.ltra_time_index, 1);
        assert_eq!(state.ltra_time_points, vec![0.0, 5e-9]);
        assert_eq!(inst.v1_history()[0], 0.0);
        assert_relative_eq!(inst.v1_history()[1], 0.5, max_relative = 1e-12);
    }

    #[test]
    fn test_bent_history_is_kept() {
        let opts = DeviceOptions::default().with_try_to_compact(true);
        let params = LtraParams::new().with_rlgc(0.0, 250e-9, 0.0, 100e-12, 1.0);
        let (mut inst, _) = registered(Rc::new(LtraModel::new("lcline", params, &opts).unwrap()));
        let mut state = SolverState::default();
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();

        state.dcop = false;
        state.init_tran = true;
        for (n, v) in [0.1, 0.4].iter().enumerate() {
            accept_at(&mut inst, &mut state, &opts, (n + 1) as f64 * 1e-9, &[*v, 0.0, 0.0, 0.0, 0.0, 0.0]);
            assert!(!shrink_time_list(&mut state));
            finish_step(&mut state);
        }
        assert_eq!(state.ltra_time_points, vec![0.0, 1e-9, 2e-9]);
        assert_relative_eq!(inst.v1_history()[1], 0.1);
    }

    #[test]
    fn test_slope_reversal_schedules_breakpoint_one_delay_later() {
        let (mut inst, _) = registered(lc_model());
        let opts = DeviceOptions::default();
        let mut state = SolverState::default();
        inst.update_state(&state, &[0.0; 6]).unwrap();
        inst.accept_step(&mut state, &opts).unwrap();

        state.dcop = false;
        state.init_tran = true;
        // Up, up, then back down on port 1
        for (n, v) in [0.1, 0.2].iter().enumerate() {
            accept_at(&mut inst, &mut state, &opts, (n + 1) as f64 * 1e-9, &[*v, 0.0, 0.0, 0.0, 0.0, 0.0]);
            finish_step(&mut state);
            assert_eq!(inst.pending_breakpoint(), None);
        }

        accept_at(&mut inst, &mut state, &opts, 3e-9, &[0.1, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let expected = state.ltra_time_points[2] + 5e-9;
        let scheduled = inst.pending_breakpoint().unwrap();
        assert_relative_eq!(scheduled, expected, max_relative = 1e-12);
        assert_relative_eq!(scheduled, 7e-9, max_relative = 1e-9);
    }

    #[test]
    fn test_quadratic_overshoot_falls_back_to_linear() {
        let (inst, _) = registered(lc_model());
        let times = [0.0, 1.0, 2.0];
        let target = 1.5;
        let point = DelayedPoint {
            isaved: 1,
            quad: quad_interp(target, times[0], times[1], times[2]),
            lin: lin_interp(target, times[1], times[2]).unwrap(),
        };

        // The parabola through (0,0) (1,1) (2,1) peaks above 1 at t = 1.5
        let history = [0.0, 1.0, 1.0];
        let q = point.quad.unwrap();
        assert!(q[1] * 1.0 + q[2] * 1.0 > 1.0);
        assert_relative_eq!(inst.delayed_sample(&history, &point), 1.0);

        // Inside the sample range the quadratic value stands
        let history = [0.0, 0.0, 1.0];
        assert_relative_eq!(inst.delayed_sample(&history, &point), 0.375, max_relative = 1e-12);

        // Linear weights alone when no quadratic fit exists
        let linear = DelayedPoint { quad: None, ..point };
        assert_relative_eq!(inst.delayed_sample(&history, &linear), 0.5, max_relative = 1e-12);
    }
}
