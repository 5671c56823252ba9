//! Newton-Raphson iteration over a dense system.

use log::trace;

use crate::error::{DevsimError, Result};
use crate::linalg::DenseMatrix;
use crate::{CONVERGENCE_TOLERANCE, MAX_ITERATIONS};

/// A square nonlinear system `f(x) = 0`.
pub trait NonlinearSystem {
    /// Number of unknowns.
    fn size(&self) -> usize;

    /// Residual and Jacobian at `x`.
    ///
    /// `f` and `jac` arrive cleared. `x` is mutable because devices may
    /// overwrite their own unknowns while reading the solution.
    fn evaluate(&mut self, iter: usize, x: &mut [f64], f: &mut [f64], jac: &mut DenseMatrix) -> Result<()>;
}

/// Undamped Newton-Raphson solver.
#[derive(Debug, Clone, Copy)]
pub struct NewtonDriver {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Convergence tolerance on the largest update
    pub tolerance: f64,
}

impl Default for NewtonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NewtonDriver {
    /// Create a solver with the default limits.
    pub fn new() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            tolerance: CONVERGENCE_TOLERANCE,
        }
    }

    /// Set the maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Iterate from `x` until the largest update falls below the tolerance.
    ///
    /// Returns the number of iterations used.
    pub fn solve(&self, system: &mut dyn NonlinearSystem, x: &mut [f64]) -> Result<usize> {
        let n = system.size();
        let mut f = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        let mut dx = vec![0.0; n];
        let mut jac = DenseMatrix::new(n);
        let mut max_dx = f64::INFINITY;

        for iter in 0..self.max_iterations {
            f.fill(0.0);
            jac.clear();
            system.evaluate(iter, x, &mut f, &mut jac)?;

            for (r, v) in rhs.iter_mut().zip(&f) {
                *r = -v;
            }
            jac.factor()?;
            jac.solve(&rhs, &mut dx)?;

            max_dx = dx.iter().fold(0.0f64, |m, d| m.max(d.abs()));
            for (xi, d) in x.iter_mut().zip(&dx) {
                *xi += d;
            }
            trace!("Newton iteration {}: max |dx| = {:.3e}", iter, max_dx);

            if max_dx < self.tolerance {
                return Ok(iter + 1);
            }
        }

        Err(DevsimError::convergence_failure(self.max_iterations, max_dx))
    }
}
