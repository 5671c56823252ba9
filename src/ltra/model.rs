//! LTRA model cards.
//!
//! A model holds the per-unit-length line parameters and everything
//! derived from them once at setup: the special case, the propagation
//! constants and the RLC safe step. It is immutable after construction
//! and shared between instances; convolution histories live on the
//! instances.

use log::{debug, warn};

use super::special::{rlc_h2, rlc_h3dash, straight_line_check};
use crate::device::{DeviceOptions, UNLIMITED_TIME_STEP};
use crate::error::{DevsimError, Result};
use crate::netlist::ParamMap;

/// Parameters from a `.model <name> LTRA` card.
#[derive(Debug, Clone, PartialEq)]
pub struct LtraParams {
    /// Resistance per unit length
    pub resist: f64,
    /// Inductance per unit length
    pub induct: f64,
    /// Conductance per unit length
    pub conduct: f64,
    /// Capacitance per unit length
    pub capac: f64,
    /// Line length
    pub length: f64,
    /// Relative rate of change of derivative for breakpoints
    pub reltol: f64,
    /// Absolute rate of change of derivative for breakpoints
    pub abstol: f64,
    /// Limit the step to the line delay (`None` when not given)
    pub step_limit: Option<bool>,
    /// Do not limit the step to the line delay
    pub no_step_limit: bool,
    /// Linear interpolation of delayed values
    pub lin_interp: bool,
    /// Quadratic interpolation of delayed values
    pub quad_interp: bool,
    /// Quadratic with linear fallback on overshoot
    pub mixed_interp: bool,
    /// Straight-line reltol for compaction and the safe step (0 uses the device options)
    pub compact_reltol: f64,
    /// Straight-line abstol for compaction and the safe step (0 uses the device options)
    pub compact_abstol: f64,
    /// Newton iterations for the truncation-error step estimate
    pub trunc_nr: bool,
    /// Skip the RLC safe-step limit
    pub trunc_dont_cut: bool,
    /// Experimental truncation-error step control
    pub lte_step_control: bool,
    /// Relative cutoff for convolution coefficients
    pub chop_reltol: f64,
}

impl Default for LtraParams {
    fn default() -> Self {
        Self {
            resist: 0.0,
            induct: 0.0,
            conduct: 0.0,
            capac: 0.0,
            length: 0.0,
            reltol: 1.0,
            abstol: 1.0,
            step_limit: None,
            no_step_limit: false,
            lin_interp: false,
            quad_interp: true,
            mixed_interp: false,
            compact_reltol: 1.0e-3,
            compact_abstol: 1.0e-12,
            trunc_nr: false,
            trunc_dont_cut: false,
            lte_step_control: false,
            chop_reltol: 0.0,
        }
    }
}

impl LtraParams {
    /// Create parameters with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-unit-length R, L, G, C and the line length.
    pub fn with_rlgc(mut self, r: f64, l: f64, g: f64, c: f64, len: f64) -> Self {
        self.resist = r;
        self.induct = l;
        self.conduct = g;
        self.capac = c;
        self.length = len;
        self
    }

    /// Set the breakpoint tolerances.
    pub fn with_breakpoint_tolerances(mut self, reltol: f64, abstol: f64) -> Self {
        self.reltol = reltol;
        self.abstol = abstol;
        self
    }

    /// Set the step limit flags.
    pub fn with_step_limit(mut self, step_limit: Option<bool>, no_step_limit: bool) -> Self {
        self.step_limit = step_limit;
        self.no_step_limit = no_step_limit;
        self
    }

    /// Choose the interpolation of delayed values.
    pub fn with_interpolation(mut self, mode: Interpolation) -> Self {
        self.lin_interp = mode == Interpolation::Linear;
        self.quad_interp = mode == Interpolation::Quadratic;
        self.mixed_interp = mode == Interpolation::Mixed;
        self
    }

    /// Set the straight-line tolerances.
    pub fn with_compaction_tolerances(mut self, reltol: f64, abstol: f64) -> Self {
        self.compact_reltol = reltol;
        self.compact_abstol = abstol;
        self
    }

    /// Enable the experimental truncation-error step control.
    pub fn with_lte_step_control(mut self, enabled: bool, trunc_nr: bool) -> Self {
        self.lte_step_control = enabled;
        self.trunc_nr = trunc_nr;
        self
    }

    /// Skip the RLC safe-step limit.
    pub fn with_trunc_dont_cut(mut self, dont_cut: bool) -> Self {
        self.trunc_dont_cut = dont_cut;
        self
    }

    /// Set the relative cutoff for convolution coefficients.
    pub fn with_chop_reltol(mut self, reltol: f64) -> Self {
        self.chop_reltol = reltol;
        self
    }

    /// Read a model card.
    pub fn from_params(name: &str, params: &ParamMap) -> Result<Self> {
        let mut p = Self::default();
        let num = |key: &str, target: &mut f64| -> Result<()> {
            if let Some(v) = params.number(name, key)? {
                *target = v;
            }
            Ok(())
        };
        num("R", &mut p.resist)?;
        num("L", &mut p.induct)?;
        num("G", &mut p.conduct)?;
        num("C", &mut p.capac)?;
        num("LEN", &mut p.length)?;
        num("REL", &mut p.reltol)?;
        num("ABS", &mut p.abstol)?;
        num("COMPACTREL", &mut p.compact_reltol)?;
        num("COMPACTABS", &mut p.compact_abstol)?;
        num("CHOPREL", &mut p.chop_reltol)?;

        let flag = |key: &str, target: &mut bool| -> Result<()> {
            if let Some(v) = params.flag(name, key)? {
                *target = v;
            }
            Ok(())
        };
        p.step_limit = params.flag(name, "STEPLIMIT")?;
        flag("NOSTEPLIMIT", &mut p.no_step_limit)?;
        flag("LININTERP", &mut p.lin_interp)?;
        flag("QUADINTERP", &mut p.quad_interp)?;
        flag("MIXEDINTERP", &mut p.mixed_interp)?;
        flag("TRUNCNR", &mut p.trunc_nr)?;
        flag("TRUNCDONTCUT", &mut p.trunc_dont_cut)?;
        flag("COMPLEXSTEPCONTROL", &mut p.lte_step_control)?;
        Ok(p)
    }
}

/// Line configuration, chosen from which of R, L, G, C are nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCase {
    /// Lossless line
    Lc,
    /// Lossy line with series resistance
    Rlc,
    /// Distributed RC line
    Rc,
    /// Resistive line with shunt conductance
    Rg,
}

/// How delayed terminal values are interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Two-point linear
    Linear,
    /// Three-point quadratic, linear when the fit overshoots
    Quadratic,
    /// Same fallback as `Quadratic`, with linear weights precomputed
    Mixed,
}

/// Time step limiting for LC and RLC lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepLimit {
    /// Never step past the line delay
    Delay,
    /// Limit only where the delayed waveform changes slope
    SlopeChange,
}

/// Closed-form DC constants of an RG line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RgConstants {
    /// `cosh(len sqrt(RG))`
    pub cosh: f64,
    /// `sinh(len sqrt(RG)) sqrt(R/G)`, or `len R` for tiny G
    pub r_sinh: f64,
    /// `sinh(len sqrt(RG)) sqrt(G/R)`, or `len G` for tiny R
    pub g_sinh: f64,
}

/// Guard below which G or R is treated as zero in the RG constants.
const RG_GUARD: f64 = 1.0e-10;

/// Halvings allowed when searching the RLC safe step.
const SAFE_STEP_MAX_ITER: usize = 50;

/// A resolved LTRA model.
#[derive(Debug, Clone)]
pub struct LtraModel {
    /// Model card name
    pub name: String,
    /// Card parameters
    pub params: LtraParams,
    /// Line configuration
    pub special_case: SpecialCase,
    /// Interpolation of delayed values
    pub interpolation: Interpolation,
    /// Step limiting mode
    pub step_limit: StepLimit,
    /// Characteristic impedance
    pub imped: f64,
    /// Characteristic admittance
    pub admit: f64,
    /// Propagation delay
    pub td: f64,
    /// Attenuation rate
    pub alpha: f64,
    /// Decay rate
    pub beta: f64,
    /// `exp(-beta td)`
    pub attenuation: f64,
    /// Integral of `h1'` over all time
    pub int_h1dash: f64,
    /// Integral of `h2` over all time
    pub int_h2: f64,
    /// Integral of `h3'` over all time
    pub int_h3dash: f64,
    /// `C / R` of an RC line
    pub cbyr: f64,
    /// `R C len^2` of an RC line
    pub rclsqr: f64,
    /// RG closed-form constants
    pub rg: RgConstants,
    /// Largest step keeping the RLC impulse responses near-linear
    pub max_safe_step: f64,
    /// Effective straight-line reltol
    pub st_line_reltol: f64,
    /// Effective straight-line abstol
    pub st_line_abstol: f64,
}

impl LtraModel {
    /// Build a model from a parameter card.
    pub fn from_params(name: &str, params: &ParamMap, opts: &DeviceOptions) -> Result<Self> {
        Self::new(name, LtraParams::from_params(name, params)?, opts)
    }

    /// Classify the line and derive its constants.
    pub fn new(name: &str, params: LtraParams, opts: &DeviceOptions) -> Result<Self> {
        let special_case = classify(name, &params)?;

        let st_line_reltol = if params.compact_reltol == 0.0 {
            opts.reltol
        } else {
            params.compact_reltol
        };
        let st_line_abstol = if params.compact_abstol == 0.0 {
            opts.abstol
        } else {
            params.compact_abstol
        };

        let interpolation = if opts.try_to_compact || params.lin_interp && !params.mixed_interp {
            Interpolation::Linear
        } else if params.mixed_interp {
            Interpolation::Mixed
        } else {
            Interpolation::Quadratic
        };

        let step_limit = match (params.step_limit, params.no_step_limit) {
            (Some(true), true) => {
                warn!(
                    "LTRA model {}: conflicting STEPLIMIT and NOSTEPLIMIT given, using STEPLIMIT",
                    name
                );
                StepLimit::Delay
            }
            (_, false) => StepLimit::Delay,
            (_, true) => StepLimit::SlopeChange,
        };

        let mut model = Self {
            name: name.to_string(),
            params,
            special_case,
            interpolation,
            step_limit,
            imped: 0.0,
            admit: 0.0,
            td: 0.0,
            alpha: 0.0,
            beta: 0.0,
            attenuation: 0.0,
            int_h1dash: 0.0,
            int_h2: 0.0,
            int_h3dash: 0.0,
            cbyr: 0.0,
            rclsqr: 0.0,
            rg: RgConstants::default(),
            max_safe_step: UNLIMITED_TIME_STEP,
            st_line_reltol,
            st_line_abstol,
        };

        let p = &model.params;
        match special_case {
            SpecialCase::Lc => {
                model.imped = (p.induct / p.capac).sqrt();
                model.admit = 1.0 / model.imped;
                model.td = (p.induct * p.capac).sqrt() * p.length;
                model.attenuation = 1.0;
            }
            SpecialCase::Rlc => {
                model.imped = (p.induct / p.capac).sqrt();
                model.admit = 1.0 / model.imped;
                model.td = (p.induct * p.capac).sqrt() * p.length;
                model.alpha = 0.5 * (p.resist / p.induct);
                model.beta = model.alpha;
                model.attenuation = (-model.beta * model.td).exp();

                if model.alpha < 0.0 {
                    return Err(DevsimError::NegativeAttenuation {
                        model: name.to_string(),
                        alpha: model.alpha,
                    });
                }
                if model.alpha > 0.0 {
                    model.int_h1dash = -1.0;
                    model.int_h2 = 1.0 - model.attenuation;
                    model.int_h3dash = -model.attenuation;
                }
                if !model.params.trunc_dont_cut {
                    model.max_safe_step = model.rlc_safe_step();
                }
            }
            SpecialCase::Rc => {
                model.cbyr = p.capac / p.resist;
                model.rclsqr = p.resist * p.capac * p.length * p.length;
                model.int_h2 = 1.0;
            }
            SpecialCase::Rg => {
                let d = p.length * (p.resist * p.conduct).sqrt();
                model.rg.cosh = d.cosh();
                model.rg.r_sinh = if p.conduct <= RG_GUARD {
                    p.length * p.resist
                } else {
                    d.sinh() * (p.resist / p.conduct).sqrt()
                };
                model.rg.g_sinh = if p.resist <= RG_GUARD {
                    p.length * p.conduct
                } else {
                    d.sinh() * (p.conduct / p.resist).sqrt()
                };
            }
        }

        debug!(
            "LTRA model {}: {:?} line, td={:e}, Z0={:e}, attenuation={:e}, safe step={:e}",
            model.name, model.special_case, model.td, model.imped, model.attenuation, model.max_safe_step
        );

        Ok(model)
    }

    /// True for the cases that carry a propagation delay.
    pub fn is_delay_line(&self) -> bool {
        matches!(self.special_case, SpecialCase::Lc | SpecialCase::Rlc)
    }

    /// Straight-line test with this model's compaction tolerances.
    pub fn straight_line(&self, x: [f64; 3], y: [f64; 3]) -> bool {
        straight_line_check(
            x[0],
            y[0],
            x[1],
            y[1],
            x[2],
            y[2],
            self.st_line_reltol,
            self.st_line_abstol,
        )
    }

    /// Bisect from `10 td` toward `td` until the `h2` and `h3'` responses
    /// look straight over the step.
    fn rlc_safe_step(&self) -> f64 {
        let (td, alpha, beta) = (self.td, self.alpha, self.beta);

        let xsmall = td;
        let mut xbig = 10.0 * td;
        let mut xmid = 0.5 * (xbig + xsmall);
        let y1small = rlc_h2(xsmall, td, alpha, beta);
        let y2small = rlc_h3dash(xsmall, td, beta, beta);

        let mut iters = 0;
        loop {
            iters += 1;
            let y1big = rlc_h2(xbig, td, alpha, beta);
            let y1mid = rlc_h2(xmid, td, alpha, beta);
            let y2big = rlc_h3dash(xbig, td, beta, beta);
            let y2mid = rlc_h3dash(xmid, td, beta, beta);

            let done = self.straight_line([xbig, xmid, xsmall], [y1big, y1mid, y1small])
                && self.straight_line([xbig, xmid, xsmall], [y2big, y2mid, y2small]);
            if done || iters > SAFE_STEP_MAX_ITER {
                break;
            }
            xbig = xmid;
            xmid = 0.5 * (xbig + xsmall);
        }
        xbig - td
    }
}

/// Pick the special case from the nonzero parameters.
pub fn classify(name: &str, p: &LtraParams) -> Result<SpecialCase> {
    let (r, l, g, c) = (
        p.resist != 0.0,
        p.induct != 0.0,
        p.conduct != 0.0,
        p.capac != 0.0,
    );
    let nonzero = [r, l, g, c].iter().filter(|&&b| b).count();
    let unsupported = |message: &str| DevsimError::UnsupportedLineType {
        model: name.to_string(),
        message: message.to_string(),
    };

    if nonzero <= 1 {
        return Err(unsupported(
            "specify at least two of R, L, G or C with nonzero values; supported: RC, RG, LC, RLC",
        ));
    }

    match (r, l, g, c) {
        (false, true, false, true) => Ok(SpecialCase::Lc),
        (true, true, false, true) => Ok(SpecialCase::Rlc),
        (true, false, false, true) => Ok(SpecialCase::Rc),
        (true, false, true, false) => Ok(SpecialCase::Rg),
        (true, true, false, false) => Err(unsupported("RL line not supported; supported: RC, RG, LC, RLC")),
        _ => Err(unsupported(
            "nonzero G (except RG) not supported; supported: RC, RG, LC, RLC",
        )),
    }
}
