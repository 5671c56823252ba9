//! Dense row-major matrix with LU decomposition.

use crate::error::{DevsimError, Result};

use super::DaeMatrix;

/// Pivot magnitude below which the matrix is treated as singular.
const SINGULAR_PIVOT: f64 = 1e-15;

/// Dense square matrix. Every entry is part of the pattern, so the
/// offset of `(row, col)` is simply `col`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    /// Matrix entries (row-major)
    pub a: Vec<f64>,
    /// Matrix dimension
    pub size: usize,
    /// LU decomposition of `a`
    lu: Vec<f64>,
    /// Row permutation from partial pivoting
    pivots: Vec<usize>,
}

impl DenseMatrix {
    /// Create a zero matrix of the given dimension.
    pub fn new(size: usize) -> Self {
        Self {
            a: vec![0.0; size * size],
            size,
            lu: vec![0.0; size * size],
            pivots: (0..size).collect(),
        }
    }

    /// Clear all entries to zero.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
    }

    /// Get matrix element at (row, col).
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Set matrix element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] = value;
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
    }

    /// `self += scale * other`, entry by entry.
    pub fn add_scaled(&mut self, other: &DenseMatrix, scale: f64) {
        for (a, b) in self.a.iter_mut().zip(&other.a) {
            *a += scale * b;
        }
    }

    /// Perform LU decomposition with partial pivoting.
    pub fn factor(&mut self) -> Result<()> {
        let n = self.size;
        self.lu.copy_from_slice(&self.a);

        for (i, p) in self.pivots.iter_mut().enumerate() {
            *p = i;
        }

        for k in 0..n {
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < SINGULAR_PIVOT {
                return Err(DevsimError::SingularMatrix);
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    /// Solve `A x = b` using the decomposition from [`factor`](Self::factor).
    pub fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let n = self.size;

        for i in 0..n {
            x[i] = b[self.pivots[i]];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                x[i] -= self.lu[i * n + j] * x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                x[i] -= self.lu[i * n + j] * x[j];
            }
            let diag = self.lu[i * n + i];
            if diag.abs() < SINGULAR_PIVOT {
                return Err(DevsimError::SingularMatrix);
            }
            x[i] /= diag;
        }

        Ok(())
    }

    /// Matrix-vector product `y = A x`.
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        let n = self.size;
        for (i, yi) in y.iter_mut().enumerate().take(n) {
            *yi = self.a[i * n..(i + 1) * n]
                .iter()
                .zip(x)
                .map(|(a, b)| a * b)
                .sum();
        }
    }
}

impl DaeMatrix for DenseMatrix {
    fn size(&self) -> usize {
        self.size
    }

    fn offset(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.size && col < self.size).then_some(col)
    }

    fn sum_into(&mut self, row: usize, offset: usize, value: f64) {
        self.add(row, offset, value);
    }

    fn get(&self, row: usize, offset: usize) -> f64 {
        self.at(row, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lu_solves_with_pivoting() {
        // Zero leading entry forces a row swap
        let mut m = DenseMatrix::new(3);
        m.set(0, 1, 2.0);
        m.set(0, 2, 1.0);
        m.set(1, 0, 1.0);
        m.set(1, 1, 1.0);
        m.set(2, 0, 3.0);
        m.set(2, 2, 4.0);
        m.factor().unwrap();

        let b = [5.0, 3.0, 11.0];
        let mut x = [0.0; 3];
        m.solve(&b, &mut x).unwrap();

        let mut check = [0.0; 3];
        m.mul_vec(&x, &mut check);
        for i in 0..3 {
            assert_relative_eq!(check[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_singular_matrix_detected() {
        let mut m = DenseMatrix::new(2);
        m.set(0, 0, 1.0);
        m.set(0, 1, 2.0);
        m.set(1, 0, 2.0);
        m.set(1, 1, 4.0);
        assert!(matches!(m.factor(), Err(DevsimError::SingularMatrix)));
    }

    #[test]
    fn test_offset_is_column() {
        let m = DenseMatrix::new(4);
        assert_eq!(m.offset(2, 3), Some(3));
        assert_eq!(m.offset(4, 0), None);
    }
}
