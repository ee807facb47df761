//! Small dense matrix type
//!
//! Row-major storage with just the operations reconciliation needs:
//! products, transposition and Gauss-Jordan inversion. Hierarchies handled
//! here have at most a few hundred nodes, so no blocking or BLAS.

use crate::{MathError, Result};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Pivots smaller than this are treated as zero during inversion
const PIVOT_EPSILON: f64 = 1e-12;

/// Dense row-major matrix of `f64`
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix filled with zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create an identity matrix of size `n`
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Create a square diagonal matrix
    pub fn from_diagonal(diagonal: &[f64]) -> Self {
        let mut m = Self::zeros(diagonal.len(), diagonal.len());
        for (i, &v) in diagonal.iter().enumerate() {
            m[(i, i)] = v;
        }
        m
    }

    /// Create a matrix from a vector of rows
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n_rows * n_cols);

        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(MathError::InvalidInput(format!(
                    "Row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    n_cols
                )));
            }
            data.extend(row);
        }

        Ok(Self {
            rows: n_rows,
            cols: n_cols,
            data,
        })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Borrow a row as a slice
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Mutably borrow a row as a slice
    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Copy a column out of the matrix
    pub fn column(&self, c: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self[(r, c)]).collect()
    }

    /// Diagonal entries of a square matrix
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols)).map(|i| self[(i, i)]).collect()
    }

    /// Transposed copy
    pub fn transpose(&self) -> Self {
        let mut t = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                t[(c, r)] = self[(r, c)];
            }
        }
        t
    }

    /// Matrix product `self * other`
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(MathError::InvalidInput(format!(
                "Cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }

        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(i, k)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    out[(i, j)] += a * other[(k, j)];
                }
            }
        }
        Ok(out)
    }

    /// Multiply every entry by a scalar
    pub fn scale(&self, factor: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    /// Inverse via Gauss-Jordan elimination with partial pivoting
    pub fn inverse(&self) -> Result<Matrix> {
        if !self.is_square() {
            return Err(MathError::InvalidInput(format!(
                "Cannot invert non-square {}x{} matrix",
                self.rows, self.cols
            )));
        }

        let n = self.rows;
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for i in 0..n {
            let mut max_row = i;
            for k in (i + 1)..n {
                if a[(k, i)].abs() > a[(max_row, i)].abs() {
                    max_row = k;
                }
            }

            let pivot = a[(max_row, i)];
            if pivot.abs() < PIVOT_EPSILON {
                return Err(MathError::SingularMatrix(format!(
                    "Pivot {:e} in column {} is numerically zero",
                    pivot, i
                )));
            }

            if max_row != i {
                for j in 0..n {
                    a.data.swap(i * n + j, max_row * n + j);
                    inv.data.swap(i * n + j, max_row * n + j);
                }
            }

            for j in 0..n {
                a[(i, j)] /= pivot;
                inv[(i, j)] /= pivot;
            }

            for k in 0..n {
                if k == i {
                    continue;
                }
                let factor = a[(k, i)];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..n {
                    a[(k, j)] -= factor * a[(i, j)];
                    inv[(k, j)] -= factor * inv[(i, j)];
                }
            }
        }

        Ok(inv)
    }

    /// Largest absolute difference between two matrices of equal shape
    pub fn max_abs_diff(&self, other: &Matrix) -> Result<f64> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(MathError::InvalidInput(format!(
                "Shape mismatch: {}x{} vs {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }

        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max))
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let row: Vec<String> = self.row(r).iter().map(|v| format!("{:.4}", v)).collect();
            writeln!(f, "[{}]", row.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_matmul_and_transpose() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let at = a.transpose();
        assert_eq!(at.rows(), 2);
        assert_eq!(at.cols(), 3);

        let ata = at.matmul(&a).unwrap();
        assert_eq!(ata.row(0), &[35.0, 44.0]);
        assert_eq!(ata.row(1), &[44.0, 56.0]);

        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let a = Matrix::from_rows(vec![
            vec![4.0, 7.0, 2.0],
            vec![3.0, 6.0, 1.0],
            vec![2.0, 5.0, 3.0],
        ])
        .unwrap();

        let inv = a.inverse().unwrap();
        let product = a.matmul(&inv).unwrap();
        let diff = product.max_abs_diff(&Matrix::identity(3)).unwrap();
        assert_abs_diff_eq!(diff, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_inverse_needs_pivoting() {
        // Zero in the leading position forces a row swap
        let a = Matrix::from_rows(vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let inv = a.inverse().unwrap();
        assert_eq!(inv, a);
    }

    #[test]
    fn test_singular_matrix() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
        assert!(matches!(a.inverse(), Err(MathError::SingularMatrix(_))));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(result, Err(MathError::InvalidInput(_))));
    }
}
