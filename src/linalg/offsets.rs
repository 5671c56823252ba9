//! Jacobian offsets resolved once at setup.

use crate::error::{DevsimError, Result};

use super::DaeMatrix;

/// Per-device table mapping each local stamp entry to a matrix offset.
///
/// Built once from a device's local Jacobian stamp, its LIDs and the
/// solver matrix. Every later write goes through [`add`](Self::add), which
/// refuses entries the stamp never registered.
#[derive(Debug, Clone, Default)]
pub struct JacobianOffsets {
    /// Global row for each local row
    rows: Vec<usize>,
    /// For each local row: (local column, offset within the global row)
    entries: Vec<Vec<(usize, usize)>>,
}

impl JacobianOffsets {
    /// Resolve `stamp` (local row -> local columns) against `matrix`.
    pub fn resolve(
        device: &str,
        stamp: &[Vec<usize>],
        lids: &[usize],
        matrix: &dyn DaeMatrix,
    ) -> Result<Self> {
        if stamp.len() != lids.len() {
            return Err(DevsimError::lid_count(device, "Jacobian row", stamp.len(), lids.len()));
        }

        let mut entries = Vec::with_capacity(stamp.len());
        for (row, cols) in stamp.iter().enumerate() {
            let global_row = lids[row];
            let mut resolved = Vec::with_capacity(cols.len());
            for &col in cols {
                let global_col = *lids.get(col).ok_or_else(|| DevsimError::JacobianLidMismatch {
                    device: device.to_string(),
                    row,
                })?;
                let offset = matrix.offset(global_row, global_col).ok_or_else(|| {
                    DevsimError::JacobianLidMismatch {
                        device: device.to_string(),
                        row,
                    }
                })?;
                resolved.push((col, offset));
            }
            entries.push(resolved);
        }

        Ok(Self {
            rows: lids.to_vec(),
            entries,
        })
    }

    /// True once [`resolve`](Self::resolve) has run.
    pub fn is_resolved(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Offset of local entry `(row, col)`, if it is in the stamp.
    pub fn offset(&self, row: usize, col: usize) -> Option<usize> {
        self.entries
            .get(row)?
            .iter()
            .find(|(c, _)| *c == col)
            .map(|&(_, off)| off)
    }

    /// Add `value` at local entry `(row, col)`.
    pub fn add(&self, matrix: &mut dyn DaeMatrix, row: usize, col: usize, value: f64) -> Result<()> {
        let offset = self
            .offset(row, col)
            .ok_or(DevsimError::OutOfStencil { row, col })?;
        matrix.sum_into(self.rows[row], offset, value);
        Ok(())
    }

    /// Local columns registered for `row`.
    pub fn columns(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .get(row)
            .into_iter()
            .flat_map(|cols| cols.iter().map(|&(c, _)| c))
    }
}
