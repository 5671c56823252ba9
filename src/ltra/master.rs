//! Master-level evaluation over every LTRA instance.

use log::trace;

use super::instance::LtraInstance;
use crate::device::{DeviceInstance, DeviceMaster, DeviceOptions, SolverState, UNLIMITED_TIME_STEP};
use crate::error::{DevsimError, Result};
use crate::linalg::DaeMatrix;

/// All LTRA instances in a circuit.
#[derive(Debug, Default)]
pub struct LtraMaster {
    instances: Vec<LtraInstance>,
}

impl LtraMaster {
    /// Wrap a set of instances.
    pub fn new(instances: Vec<LtraInstance>) -> Self {
        Self { instances }
    }

    /// Add an instance.
    pub fn push(&mut self, instance: LtraInstance) {
        self.instances.push(instance);
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True when no instance is held.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The instances.
    pub fn instances(&self) -> &[LtraInstance] {
        &self.instances
    }

    /// Mutable access to the instances.
    pub fn instances_mut(&mut self) -> &mut [LtraInstance] {
        &mut self.instances
    }

    /// Smallest time step bound over all instances.
    pub fn max_time_step(&self) -> f64 {
        self.instances
            .iter()
            .map(|inst| inst.max_time_step())
            .fold(UNLIMITED_TIME_STEP, f64::min)
    }

    /// Collect breakpoints from every instance.
    pub fn breakpoints(&mut self, state: &SolverState, out: &mut Vec<f64>) {
        for inst in &mut self.instances {
            inst.breakpoints(state, out);
        }
    }
}

impl DeviceMaster for LtraMaster {
    fn update_state(
        &mut self,
        state: &SolverState,
        _opts: &DeviceOptions,
        sol: &mut [f64],
        _sta: &mut [f64],
    ) -> Result<()> {
        let failures = self
            .instances
            .iter_mut()
            .filter_map(|inst| inst.update_state(state, sol).err())
            .collect();
        DevsimError::collect(failures)
    }

    fn load_dae_vectors(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        _sol: &[f64],
        f: &mut [f64],
        _q: &mut [f64],
    ) -> Result<()> {
        let mut failures = Vec::new();
        for inst in &mut self.instances {
            if let Err(e) = inst.load_vectors(state, opts, f) {
                trace!("LTRA {}: load failed: {}", inst.name(), e);
                failures.push(e);
            }
        }
        DevsimError::collect(failures)
    }

    fn load_dae_matrices(
        &mut self,
        state: &SolverState,
        opts: &DeviceOptions,
        df: &mut dyn DaeMatrix,
        _dq: &mut dyn DaeMatrix,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for inst in &self.instances {
            if let Err(e) = inst.load_matrices(state, opts, df) {
                failures.push(e);
            }
        }
        DevsimError::collect(failures)
    }

    fn accept_step(&mut self, state: &mut SolverState, opts: &DeviceOptions) -> Result<()> {
        let mut failures = Vec::new();
        for inst in &mut self.instances {
            if let Err(e) = inst.accept_step(state, opts) {
                failures.push(e);
            }
        }
        DevsimError::collect(failures)
    }
}
