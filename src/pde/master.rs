//! Master-level evaluation over every DiodePDE instance.

use log::trace;

use super::instance::DiodePdeInstance;
use crate::device::{DeviceInstance, DeviceMaster, DeviceOptions, SolverState};
use crate::error::{DevsimError, Result};
use crate::linalg::DaeMatrix;

/// All DiodePDE instances in a circuit.
#[derive(Debug, Default)]
pub struct PdeMaster {
    instances: Vec<DiodePdeInstance>,
}

impl PdeMaster {
    /// Wrap a set of instances.
    pub fn new(instances: Vec<DiodePdeInstance>) -> Self {
        Self { instances }
    }

    /// Add an instance.
    pub fn push(&mut self, instance: DiodePdeInstance) {
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
    pub fn instances(&self) -> &[DiodePdeInstance] {
        &self.instances
    }

    /// Mutable access to the instances.
    pub fn instances_mut(&mut self) -> &mut [DiodePdeInstance] {
        &mut self.instances
    }

    /// Start a voltage continuation on every instance. True if any
    /// applied voltage moved.
    pub fn enable_continuation(
        &mut self,
        state: &mut SolverState,
        opts: &DeviceOptions,
        sol: &[f64],
    ) -> Result<bool> {
        let mut changed = false;
        let mut failures = Vec::new();
        for inst in &mut self.instances {
            match inst.enable_continuation(state, opts, sol) {
                Ok(c) => changed |= c,
                Err(e) => failures.push(e),
            }
        }
        DevsimError::collect(failures)?;
        Ok(changed)
    }

    /// Ramp every instance to `alpha` of its continuation.
    pub fn set_continuation_alpha(&mut self, alpha: f64) {
        for inst in &mut self.instances {
            inst.set_continuation_alpha(alpha);
        }
    }

    /// Finish the continuation on every instance.
    pub fn disable_continuation(&mut self) {
        for inst in &mut self.instances {
            inst.disable_continuation();
        }
    }
}

impl DeviceMaster for PdeMaster {
    fn update_state(
        &mut self,
        state: &SolverState,
        _opts: &DeviceOptions,
        sol: &mut [f64],
        sta: &mut [f64],
    ) -> Result<()> {
        let failures = self
            .instances
            .iter_mut()
            .filter_map(|inst| inst.update_state(state, sol, sta).err())
            .collect();
        DevsimError::collect(failures)
    }

    fn update_secondary_state(
        &mut self,
        _state: &SolverState,
        _opts: &DeviceOptions,
        sta_deriv: &[f64],
    ) -> Result<()> {
        for inst in &mut self.instances {
            inst.update_secondary_state(sta_deriv);
        }
        Ok(())
    }

    fn load_dae_vectors(
        &mut self,
        state: &SolverState,
        _opts: &DeviceOptions,
        _sol: &[f64],
        f: &mut [f64],
        q: &mut [f64],
    ) -> Result<()> {
        let mut failures = Vec::new();
        for inst in &self.instances {
            if let Err(e) = inst.load_vectors(state, f, q) {
                trace!("DiodePDE {}: load failed: {}", inst.name(), e);
                failures.push(e);
            }
        }
        DevsimError::collect(failures)
    }

    fn load_dae_matrices(
        &mut self,
        state: &SolverState,
        _opts: &DeviceOptions,
        df: &mut dyn DaeMatrix,
        dq: &mut dyn DaeMatrix,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for inst in &self.instances {
            if let Err(e) = inst.load_matrices(state, df, dq) {
                trace!("DiodePDE {}: matrix load failed: {}", inst.name(), e);
                failures.push(e);
            }
        }
        DevsimError::collect(failures)
    }
}
