//! Small dense matrix type with LU-based inversion and solving.
//!
//! The identification pipeline works on matrices whose shapes are only known
//! at runtime (regression windows with a per-axis subset of telemetry
//! channels), so this is a plain row-major `Vec<f64>` container rather than a
//! statically-sized type. Singularity is an explicit, recoverable condition:
//! callers are expected to catch [`MatrixError::Singular`] and skip the
//! update that needed the solve, keeping their previous state.

use thiserror::Error;

/// Pivot magnitudes below this are treated as numerically zero.
const PIVOT_TOLERANCE: f64 = 1e-13;

/// Errors raised by matrix decomposition and solving.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    /// The matrix is singular to working precision; no decomposition exists.
    #[error("matrix is singular to working precision (pivot {pivot:.3e} in column {column})")]
    Singular { column: usize, pivot: f64 },

    /// Inversion and decomposition require a square matrix.
    #[error("expected a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// Right-hand side shape does not match the decomposed matrix.
    #[error("dimension mismatch: {expected} rows expected, right-hand side has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Dense row-major matrix of `f64` values.
///
/// Value-semantic: clones are fully independent. Transient instances are
/// cheap enough for the per-tick control path; the only heavy operations
/// (least-squares normal equations) run on the background solve worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a zero-initialized matrix.
    ///
    /// # Panics
    /// Panics if either dimension is 0.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        assert!(rows > 0 && cols > 0, "Matrix dimensions must be > 0");
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create a matrix from row slices.
    ///
    /// # Panics
    /// Panics if `rows` is empty or the rows have unequal lengths.
    pub fn from_rows(rows: &[&[f64]]) -> Self {
        assert!(!rows.is_empty(), "Matrix must have at least one row");
        let cols = rows[0].len();
        let mut m = Matrix::zeros(rows.len(), cols);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), cols, "All rows must have the same length");
            for (j, &v) in row.iter().enumerate() {
                m[(i, j)] = v;
            }
        }
        m
    }

    /// Create a single-column matrix from a slice.
    pub fn column(values: &[f64]) -> Self {
        let mut m = Matrix::zeros(values.len(), 1);
        for (i, &v) in values.iter().enumerate() {
            m[(i, 0)] = v;
        }
        m
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The transposed matrix.
    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out[(j, i)] = self[(i, j)];
            }
        }
        out
    }

    /// Matrix product `self * rhs`.
    ///
    /// # Panics
    /// Panics on a dimension mismatch; shapes are fixed by construction in
    /// every caller, so a mismatch is a programming error.
    pub fn multiply(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, rhs.rows,
            "Matrix product dimension mismatch: {}x{} * {}x{}",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let lhs = self[(i, k)];
                if lhs == 0.0 {
                    continue;
                }
                for j in 0..rhs.cols {
                    out[(i, j)] += lhs * rhs[(k, j)];
                }
            }
        }
        out
    }

    /// LU-decompose with partial pivoting.
    ///
    /// # Errors
    /// [`MatrixError::NotSquare`] for non-square input,
    /// [`MatrixError::Singular`] when the best available pivot of some
    /// column is below tolerance. A failed decomposition leaves the input
    /// untouched and returns no partial factors.
    pub fn lu(&self) -> Result<LuDecomposition, MatrixError> {
        if self.rows != self.cols {
            return Err(MatrixError::NotSquare {
                rows: self.rows,
                cols: self.cols,
            });
        }

        let n = self.rows;
        let mut lu = self.clone();
        let mut perm: Vec<usize> = (0..n).collect();

        for col in 0..n {
            // Partial pivoting: bring the largest remaining entry up.
            let mut pivot_row = col;
            let mut pivot = lu[(col, col)].abs();
            for row in (col + 1)..n {
                let candidate = lu[(row, col)].abs();
                if candidate > pivot {
                    pivot = candidate;
                    pivot_row = row;
                }
            }
            if !(pivot > PIVOT_TOLERANCE) {
                return Err(MatrixError::Singular { column: col, pivot });
            }
            if pivot_row != col {
                for j in 0..n {
                    let tmp = lu[(col, j)];
                    lu[(col, j)] = lu[(pivot_row, j)];
                    lu[(pivot_row, j)] = tmp;
                }
                perm.swap(col, pivot_row);
            }

            let diag = lu[(col, col)];
            for row in (col + 1)..n {
                let factor = lu[(row, col)] / diag;
                lu[(row, col)] = factor;
                for j in (col + 1)..n {
                    lu[(row, j)] -= factor * lu[(col, j)];
                }
            }
        }

        Ok(LuDecomposition { lu, perm })
    }

    /// Invert via LU decomposition.
    ///
    /// # Errors
    /// Same conditions as [`Matrix::lu`].
    pub fn invert(&self) -> Result<Matrix, MatrixError> {
        let decomp = self.lu()?;
        let n = self.rows;
        let mut identity = Matrix::zeros(n, n);
        for i in 0..n {
            identity[(i, i)] = 1.0;
        }
        decomp.solve(&identity)
    }

    /// Solve `self * x = rhs` via LU decomposition.
    ///
    /// `rhs` may have any number of columns; each is solved independently.
    ///
    /// # Errors
    /// Same conditions as [`Matrix::lu`], plus
    /// [`MatrixError::DimensionMismatch`] when the right-hand side row count
    /// does not match.
    pub fn solve(&self, rhs: &Matrix) -> Result<Matrix, MatrixError> {
        self.lu()?.solve(rhs)
    }
}

impl std::ops::Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        debug_assert!(row < self.rows && col < self.cols);
        &self.data[row * self.cols + col]
    }
}

impl std::ops::IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        debug_assert!(row < self.rows && col < self.cols);
        &mut self.data[row * self.cols + col]
    }
}

/// Result of an LU decomposition with partial pivoting.
///
/// Holds the combined L/U factors and the row permutation; reusable for
/// multiple right-hand sides.
#[derive(Debug, Clone)]
pub struct LuDecomposition {
    lu: Matrix,
    perm: Vec<usize>,
}

impl LuDecomposition {
    /// Solve `A * x = rhs` for the decomposed `A`.
    ///
    /// # Errors
    /// [`MatrixError::DimensionMismatch`] when `rhs` has the wrong row count.
    pub fn solve(&self, rhs: &Matrix) -> Result<Matrix, MatrixError> {
        let n = self.lu.rows();
        if rhs.rows() != n {
            return Err(MatrixError::DimensionMismatch {
                expected: n,
                got: rhs.rows(),
            });
        }

        let mut out = Matrix::zeros(n, rhs.cols());
        for col in 0..rhs.cols() {
            // Forward substitution on the permuted right-hand side.
            let mut y = vec![0.0; n];
            for i in 0..n {
                let mut sum = rhs[(self.perm[i], col)];
                for j in 0..i {
                    sum -= self.lu[(i, j)] * y[j];
                }
                y[i] = sum;
            }
            // Back substitution.
            for i in (0..n).rev() {
                let mut sum = y[i];
                for j in (i + 1)..n {
                    sum -= self.lu[(i, j)] * out[(j, col)];
                }
                out[(i, col)] = sum / self.lu[(i, i)];
            }
        }
        Ok(out)
    }
}

/// Ordinary least squares: `(X^T X)^-1 X^T y` via LU-solve of the normal
/// equations.
///
/// # Errors
/// [`MatrixError::Singular`] when the normal matrix is rank-deficient (e.g.
/// a design column is all zeros or two columns are collinear).
pub fn least_squares(design: &Matrix, target: &Matrix) -> Result<Matrix, MatrixError> {
    let xt = design.transpose();
    let normal = xt.multiply(design);
    let moment = xt.multiply(target);
    normal.solve(&moment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity(n: usize) -> Matrix {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    #[test]
    fn test_transpose() {
        let m = Matrix::from_rows(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let t = m.transpose();
        assert_eq!(t.rows(), 3);
        assert_eq!(t.cols(), 2);
        assert_eq!(t[(0, 1)], 4.0);
        assert_eq!(t[(2, 0)], 3.0);
    }

    #[test]
    fn test_multiply() {
        let a = Matrix::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = Matrix::from_rows(&[&[5.0, 6.0], &[7.0, 8.0]]);
        let c = a.multiply(&b);
        assert_eq!(c[(0, 0)], 19.0);
        assert_eq!(c[(0, 1)], 22.0);
        assert_eq!(c[(1, 0)], 43.0);
        assert_eq!(c[(1, 1)], 50.0);
    }

    #[test]
    fn test_invert_times_original_is_identity() {
        let a = Matrix::from_rows(&[&[4.0, 7.0, 2.0], &[3.0, 6.0, 1.0], &[2.0, 5.0, 3.0]]);
        let inv = a.invert().unwrap();
        let product = inv.multiply(&a);
        let id = identity(3);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(product[(i, j)], id[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_solve_known_system() {
        // 2x + y = 5, x + 3y = 10 -> x = 1, y = 3
        let a = Matrix::from_rows(&[&[2.0, 1.0], &[1.0, 3.0]]);
        let b = Matrix::column(&[5.0, 10.0]);
        let x = a.solve(&b).unwrap();
        assert_relative_eq!(x[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[(1, 0)], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_reported() {
        let a = Matrix::from_rows(&[&[1.0, 2.0], &[2.0, 4.0]]);
        let original = a.clone();
        let err = a.invert().unwrap_err();
        assert!(matches!(err, MatrixError::Singular { .. }));
        // No partial mutation of the input.
        assert_eq!(a, original);
    }

    #[test]
    fn test_zero_matrix_is_singular() {
        let a = Matrix::zeros(3, 3);
        assert!(matches!(a.lu(), Err(MatrixError::Singular { .. })));
    }

    #[test]
    fn test_not_square() {
        let a = Matrix::zeros(2, 3);
        assert!(matches!(
            a.invert(),
            Err(MatrixError::NotSquare { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn test_solve_dimension_mismatch() {
        let a = identity(3);
        let b = Matrix::column(&[1.0, 2.0]);
        assert!(matches!(
            a.solve(&b),
            Err(MatrixError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn test_pivoting_handles_zero_leading_entry() {
        // Leading zero forces a row swap; the system is well-conditioned.
        let a = Matrix::from_rows(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let b = Matrix::column(&[2.0, 3.0]);
        let x = a.solve(&b).unwrap();
        assert_relative_eq!(x[(0, 0)], 3.0, epsilon = 1e-12);
        assert_relative_eq!(x[(1, 0)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_squares_recovers_coefficients() {
        // y = 2*x0 - 3*x1 + 0.5*x2 over an overdetermined sample set.
        let truth = [2.0, -3.0, 0.5];
        let samples: Vec<[f64; 3]> = (0..12)
            .map(|i| {
                let t = i as f64;
                [t, (t * 0.7).sin(), 1.0 + 0.1 * t * t]
            })
            .collect();
        let rows: Vec<&[f64]> = samples.iter().map(|r| r.as_slice()).collect();
        let design = Matrix::from_rows(&rows);
        let target = Matrix::column(
            &samples
                .iter()
                .map(|r| truth[0] * r[0] + truth[1] * r[1] + truth[2] * r[2])
                .collect::<Vec<_>>(),
        );
        let coeffs = least_squares(&design, &target).unwrap();
        for (i, &expected) in truth.iter().enumerate() {
            assert_relative_eq!(coeffs[(i, 0)], expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_least_squares_singular_on_zero_column() {
        let design = Matrix::from_rows(&[&[1.0, 0.0], &[2.0, 0.0], &[3.0, 0.0]]);
        let target = Matrix::column(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            least_squares(&design, &target),
            Err(MatrixError::Singular { .. })
        ));
    }
}
