//! Matrix abstraction the devices load into.
//!
//! Devices never see the solver's matrix storage directly. At setup they
//! ask the matrix for an offset per stamp entry ([`DaeMatrix::offset`]),
//! store the result in a [`JacobianOffsets`] table, and at evaluation time
//! sum values into `(row, offset)` pairs. Residual and charge vectors are
//! plain `f64` slices indexed by LID.

mod dense;
mod offsets;

pub use dense::DenseMatrix;
pub use offsets::JacobianOffsets;

/// A Jacobian the devices can sum their partial derivatives into.
pub trait DaeMatrix {
    /// Number of rows (and columns).
    fn size(&self) -> usize;

    /// Storage offset of entry `(row, col)` within `row`, or `None` if the
    /// entry is not part of the sparsity pattern.
    fn offset(&self, row: usize, col: usize) -> Option<usize>;

    /// Add `value` to the entry at `offset` within `row`.
    fn sum_into(&mut self, row: usize, offset: usize, value: f64);

    /// Read the entry at `offset` within `row`.
    fn get(&self, row: usize, offset: usize) -> f64;
}
