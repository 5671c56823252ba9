//! Terminal currents and the small-signal terminal conductance.

use super::instance::DiodePdeInstance;
use crate::error::{DevsimError, Result};

impl DiodePdeInstance {
    /// Currents through every electrode from the flux on its edge, with
    /// the derivatives the KCL rows need.
    pub(super) fn calc_terminal_currents(&mut self) {
        let s = self.scaling;
        for e in &mut self.electrodes {
            let edge = e.edge_index();
            let flux = &self.fluxes[edge];
            let a = e.flux_sign() * s.j0 * s.a0 * e.area;
            e.elec_current = flux.jn * a;
            e.hole_current = flux.jp * a;
            e.current = e.conduction_current();
            if self.params.displacement_current {
                e.current += e.displ_current;
            }

            let (wn, wp) = e.carrier_weights();
            e.di_dx = self
                .layout
                .edge_columns(edge)
                .iter()
                .enumerate()
                .map(|(j, &col)| (col, a * (wn * flux.djn[j] + wp * flux.djp[j])))
                .collect();
        }
    }

    /// Right-hand side for the `dx/dV_j` solve: `-df/dV_j` as
    /// `(solver LID, value)` pairs.
    pub fn conductance_rhs(&self, j: usize) -> Vec<(usize, f64)> {
        let row = self.layout.v(self.electrodes[j].mesh_index);
        vec![(self.lids[row], self.scaling.rv0)]
    }

    /// Fill the terminal conductance `dI_k/dV_j` from the solved
    /// sensitivities, one solution-length vector per electrode.
    pub fn calc_conductance(&mut self, dxdv: &[Vec<f64>]) -> Result<()> {
        let num_ext = self.electrodes.len();
        if dxdv.len() != num_ext {
            return Err(DevsimError::lid_count(&self.name, "sensitivity", num_ext, dxdv.len()));
        }
        let needed = self.lids.iter().copied().max().map_or(0, |m| m + 1);
        if let Some(short) = dxdv.iter().find(|v| v.len() < needed) {
            return Err(DevsimError::lid_count(&self.name, "sensitivity entry", needed, short.len()));
        }

        for (k, e) in self.electrodes.iter().enumerate() {
            for (j, sens) in dxdv.iter().enumerate() {
                self.conductance[k][j] = e
                    .di_dx
                    .iter()
                    .map(|&(col, val)| val * sens[self.lids[col]])
                    .sum();
            }
        }
        Ok(())
    }

    /// Terminal conductance matrix (A/V), row = terminal current.
    pub fn conductance(&self) -> &[Vec<f64>] {
        &self.conductance
    }
}
