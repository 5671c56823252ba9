//! Solver-facing device contract.
//!
//! The outer solver owns the solution, state, residual and Jacobian
//! storage. Devices see it through:
//!
//! - [`SolverState`]: time, DC/transient flags, the LTRA time list and the
//!   two-level coupling mode
//! - [`DeviceOptions`]: global tolerances and switches
//! - [`DeviceInstance`]: per-instance setup (LID registration, Jacobian
//!   stamp, breakpoints, restart)
//! - [`DeviceMaster`]: one call per evaluation that loops over every
//!   instance of a device type

use crate::error::{DevsimError, Result};
use crate::linalg::DaeMatrix;
use crate::ltra::{LtraInstance, LtraModel};
use crate::netlist::{DeviceDef, DeviceKind, Netlist};
use crate::pde::{DiodePdeInstance, DiodePdeParams};

use std::collections::HashMap;
use std::rc::Rc;

/// Bound returned by devices that do not limit the time step.
pub const UNLIMITED_TIME_STEP: f64 = 1.0e99;

/// Which half of a two-level Newton solve is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TwoLevelMode {
    /// Device and circuit are solved together
    #[default]
    Full,
    /// Device-only solve with terminal voltages held fixed
    Inner,
    /// Circuit-only solve using terminal currents and conductances
    Outer,
}

/// Time-stepping context shared by all devices.
#[derive(Debug, Clone)]
pub struct SolverState {
    /// Current simulation time
    pub curr_time: f64,
    /// Accepted time steps so far (the DC point and first step are both 0)
    pub time_step_number: usize,
    /// Solving the DC operating point
    pub dcop: bool,
    /// First transient step after the DC operating point
    pub init_tran: bool,
    /// Index of the DC sub-step (0 solves nonlinear Poisson only)
    pub double_dcop_step: usize,
    /// Newton iteration within the current solve
    pub newton_iter: usize,
    /// Two-level coupling mode
    pub two_level_mode: TwoLevelMode,
    /// PDE continuation in progress
    pub pde_continuation: bool,
    /// Continuation steps requested by the devices
    pub max_pde_continuation_steps: usize,
    /// Accepted time points; index 0 is the DC operating point
    pub ltra_time_points: Vec<f64>,
    /// Index of the newest time point
    pub ltra_time_index: usize,
    /// Set by a device that compacted its history on accept
    pub ltra_do_compact: bool,
}

impl Default for SolverState {
    fn default() -> Self {
        Self {
            curr_time: 0.0,
            time_step_number: 0,
            dcop: true,
            init_tran: false,
            double_dcop_step: 0,
            newton_iter: 0,
            two_level_mode: TwoLevelMode::Full,
            pde_continuation: false,
            max_pde_continuation_steps: 1,
            ltra_time_points: vec![0.0],
            ltra_time_index: 0,
            ltra_do_compact: false,
        }
    }
}

impl SolverState {
    /// Create a state positioned at the DC operating point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of history point `i`, using the current time for the newest.
    pub fn time_point(&self, i: usize) -> f64 {
        if i == self.ltra_time_index {
            self.curr_time
        } else {
            self.ltra_time_points[i]
        }
    }
}

/// Global device options.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Relative tolerance
    pub reltol: f64,
    /// Absolute tolerance
    pub abstol: f64,
    /// Minimum conductance
    pub gmin: f64,
    /// Let transmission lines compact their history
    pub try_to_compact: bool,
    /// Allow devices to limit terminal voltage steps
    pub voltage_limiter: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            reltol: 1.0e-3,
            abstol: 1.0e-12,
            gmin: 1.0e-12,
            try_to_compact: false,
            voltage_limiter: true,
        }
    }
}

impl DeviceOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Set the absolute tolerance.
    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Enable or disable history compaction.
    pub fn with_try_to_compact(mut self, compact: bool) -> Self {
        self.try_to_compact = compact;
        self
    }

    /// Enable or disable the terminal voltage limiter.
    pub fn with_voltage_limiter(mut self, enabled: bool) -> Self {
        self.voltage_limiter = enabled;
        self
    }
}

/// Opaque restart record: a flat array of doubles plus size markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Name of the instance that wrote the record
    pub id: String,
    /// Values in a device-defined positional layout
    pub data: Vec<f64>,
    /// Size markers describing `data`
    pub data_size_t: Vec<usize>,
}

/// Per-instance setup contract.
pub trait DeviceInstance {
    /// Instance name.
    fn name(&self) -> &str;

    /// External (circuit node) variables.
    fn num_ext_vars(&self) -> usize;

    /// Internal solution variables.
    fn num_int_vars(&self) -> usize;

    /// State variables.
    fn num_state_vars(&self) -> usize {
        0
    }

    /// Receive solver LIDs for external then internal variables.
    fn register_lids(&mut self, ext: &[usize], int: &[usize]) -> Result<()>;

    /// Receive solver LIDs for state variables.
    fn register_state_lids(&mut self, sta: &[usize]) -> Result<()> {
        check_lid_count(self.name(), "state", self.num_state_vars(), sta.len())
    }

    /// Local Jacobian stamp: for each local row, the local columns with a
    /// nonzero partial derivative.
    fn jacobian_stamp(&self) -> Vec<Vec<usize>>;

    /// Resolve the stamp against the solver matrix once.
    fn register_jac_lids(&mut self, matrix: &dyn DaeMatrix) -> Result<()>;

    /// Hand pending breakpoints to the solver.
    fn breakpoints(&mut self, _state: &SolverState, _out: &mut Vec<f64>) {}

    /// Largest time step this instance tolerates.
    fn max_time_step(&self) -> f64 {
        UNLIMITED_TIME_STEP
    }

    /// Write an initial guess into the solution vector.
    fn set_initial_guess(&mut self, _sol: &mut [f64]) -> Result<()> {
        Ok(())
    }

    /// Re-evaluate temperature-dependent quantities.
    fn update_temperature(&mut self, _temp: f64) -> Result<()> {
        Ok(())
    }

    /// Snapshot for restart.
    fn internal_state(&self) -> Option<DeviceState> {
        None
    }

    /// Restore from a restart snapshot.
    fn set_internal_state(&mut self, _state: &DeviceState) -> Result<()> {
        Ok(())
    }
}

/// Per-evaluation entry points, called once for all instances of a type.
pub trait DeviceMaster {
    /// Pull terminal and internal values from the solution.
    ///
    /// `sol` is mutable because some devices overwrite their own internal
    /// unknowns (equilibrium densities during the first DC sub-step).
    fn update_state(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        sol: &mut [f64],
        sta: &mut [f64],
    ) -> Result<()>;

    /// Consume time derivatives of the state vector.
    fn update_secondary_state(
        &mut self,
        _state: &SolverState,
        _opts: &DeviceOptions,
        _sta_deriv: &[f64],
    ) -> Result<()> {
        Ok(())
    }

    /// Sum residual (`f`) and charge (`q`) contributions.
    fn load_dae_vectors(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        sol: &[f64],
        f: &mut [f64],
        q: &mut [f64],
    ) -> Result<()>;

    /// Sum `df/dx` and `dq/dx` contributions.
    fn load_dae_matrices(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        df: &mut dyn DaeMatrix,
        dq: &mut dyn DaeMatrix,
    ) -> Result<()>;

    /// Called once per accepted time step.
    fn accept_step(&mut self, _state: &mut SolverState, _opts: &DeviceOptions) -> Result<()> {
        Ok(())
    }
}

/// Validate a LID vector length.
pub fn check_lid_count(device: &str, kind: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DevsimError::lid_count(device, kind, expected, actual))
    }
}

/// A device built from a netlist card.
#[derive(Debug)]
pub enum Device {
    /// Lossy transmission line
    Ltra(LtraInstance),
    /// One-dimensional drift-diffusion device
    DiodePde(DiodePdeInstance),
}

impl Device {
    /// Build a device from its card, resolving LTRA model references.
    pub fn from_def(
        def: &DeviceDef,
        models: &HashMap<String, Rc<LtraModel>>,
    ) -> Result<Self> {
        match def.kind {
            DeviceKind::Ltra => {
                let model_name = def.model.as_deref().unwrap_or_default();
                let model = models
                    .get(&model_name.to_ascii_lowercase())
                    .ok_or_else(|| DevsimError::UndefinedModel {
                        model: model_name.to_string(),
                        device: def.name.clone(),
                    })?;
                let instance = LtraInstance::from_params(&def.name, Rc::clone(model), &def.params)?;
                Ok(Self::Ltra(instance))
            }
            DeviceKind::DiodePde => {
                let params = DiodePdeParams::from_params(&def.name, &def.params)?;
                let instance = DiodePdeInstance::new(&def.name, def.nodes.len(), params)?;
                Ok(Self::DiodePde(instance))
            }
        }
    }

    /// Build every model and device in a netlist.
    pub fn build_all(netlist: &Netlist, opts: &DeviceOptions) -> Result<Vec<Device>> {
        let mut models = HashMap::new();
        for def in &netlist.models {
            let model = LtraModel::from_params(&def.name, &def.params, opts)?;
            models.insert(def.name.to_ascii_lowercase(), Rc::new(model));
        }
        netlist
            .devices
            .iter()
            .map(|def| Self::from_def(def, &models))
            .collect()
    }

    /// Access the instance contract.
    pub fn instance(&self) -> &dyn DeviceInstance {
        match self {
            Self::Ltra(d) => d,
            Self::DiodePde(d) => d,
        }
    }

    /// Mutable access to the instance contract.
    pub fn instance_mut(&mut self) -> &mut dyn DeviceInstance {
        match self {
            Self::Ltra(d) => d,
            Self::DiodePde(d) => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_state_defaults_to_dcop() {
        let state = SolverState::default();
        assert!(state.dcop);
        assert_eq!(state.ltra_time_index, 0);
        assert_eq!(state.ltra_time_points, vec![0.0]);
        assert_eq!(state.two_level_mode, TwoLevelMode::Full);
    }

    #[test]
    fn test_device_options_builders() {
        let opts = DeviceOptions::new().with_reltol(1e-4).with_try_to_compact(true);
        assert_eq!(opts.reltol, 1e-4);
        assert!(opts.try_to_compact);
        assert_eq!(opts.gmin, 1e-12);
    }

    #[test]
    fn test_check_lid_count() {
        assert!(check_lid_count("O1", "external", 4, 4).is_ok());
        assert!(matches!(
            check_lid_count("O1", "external", 4, 3),
            Err(DevsimError::LidCountMismatch { expected: 4, actual: 3, .. })
        ));
    }
}
