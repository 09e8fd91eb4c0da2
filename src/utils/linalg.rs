//! Dense linear algebra on ndarray used by the minimizers and the covariance
//! calculation.

use crate::error::{FitError, Result};
use ndarray::{Array1, Array2};

/// A pivot is treated as zero once elimination has cancelled it down to
/// this fraction of its scale: the original diagonal entry for Cholesky,
/// the largest entry of the pivot row for Gaussian elimination.
const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-12;

fn check_square(a: &Array2<f64>, b_len: Option<usize>) -> Result<usize> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(FitError::DimensionMismatch(format!(
            "expected a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }
    if let Some(len) = b_len {
        if len != n {
            return Err(FitError::DimensionMismatch(format!(
                "right-hand side has {} entries, matrix has {} rows",
                len, n
            )));
        }
    }
    Ok(n)
}

/// Lower-triangular Cholesky factor `L` with `A = L Lᵀ`.
///
/// Fails with `SingularMatrix` if `A` is not positive definite, or if a
/// pivot is lost to cancellation so that `A` is numerically rank deficient.
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = check_square(a, None)?;
    let mut l = Array2::zeros((n, n));

    for k in 0..n {
        let mut diag = a[[k, k]];
        for j in 0..k {
            diag -= l[[k, j]] * l[[k, j]];
        }
        if !(diag > RELATIVE_PIVOT_TOLERANCE * a[[k, k]].abs()) || !diag.is_finite() {
            return Err(FitError::SingularMatrix(format!(
                "matrix is not positive definite (pivot {} = {:e})",
                k, diag
            )));
        }
        let lkk = diag.sqrt();
        l[[k, k]] = lkk;

        for i in (k + 1)..n {
            let mut value = a[[i, k]];
            for j in 0..k {
                value -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] = value / lkk;
        }
    }

    Ok(l)
}

/// Solve `A x = b` for symmetric positive definite `A`.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    check_square(a, Some(b.len()))?;
    let l = cholesky(a)?;
    let n = b.len();

    // Forward substitution (L * y = b)
    let mut y = b.clone();
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution (L^T * x = y)
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }

    Ok(x)
}

/// Largest magnitude in each row, for relative pivot tests.
fn row_scales(a: &Array2<f64>) -> Array1<f64> {
    a.rows()
        .into_iter()
        .map(|row| row.iter().fold(0.0_f64, |m, v| m.max(v.abs())))
        .collect()
}

fn check_pivot(m: &Array2<f64>, scales: &Array1<f64>, pivot: usize, k: usize) -> Result<()> {
    let value = m[[pivot, k]];
    if !value.is_finite() || value.abs() <= RELATIVE_PIVOT_TOLERANCE * scales[pivot] {
        return Err(FitError::SingularMatrix(format!(
            "zero pivot in column {}",
            k
        )));
    }
    Ok(())
}

/// Solve a general square system with partial pivoting.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = check_square(a, Some(b.len()))?;
    let mut m = a.clone();
    let mut rhs = b.clone();
    let mut scales = row_scales(a);

    for k in 0..n {
        let pivot = (k..n)
            .max_by(|&i, &j| m[[i, k]].abs().total_cmp(&m[[j, k]].abs()))
            .unwrap_or(k);
        check_pivot(&m, &scales, pivot, k)?;
        if pivot != k {
            for j in 0..n {
                m.swap([k, j], [pivot, j]);
            }
            rhs.swap(k, pivot);
            scales.swap(k, pivot);
        }
        for i in (k + 1)..n {
            let factor = m[[i, k]] / m[[k, k]];
            for j in k..n {
                m[[i, j]] -= factor * m[[k, j]];
            }
            rhs[i] -= factor * rhs[k];
        }
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut value = rhs[i];
        for j in (i + 1)..n {
            value -= m[[i, j]] * x[j];
        }
        x[i] = value / m[[i, i]];
    }
    Ok(x)
}

/// Inverse of a square matrix by Gauss-Jordan elimination.
pub fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = check_square(a, None)?;
    let mut m = a.clone();
    let mut inv = Array2::eye(n);
    let mut scales = row_scales(a);

    for k in 0..n {
        let pivot = (k..n)
            .max_by(|&i, &j| m[[i, k]].abs().total_cmp(&m[[j, k]].abs()))
            .unwrap_or(k);
        check_pivot(&m, &scales, pivot, k)?;
        if pivot != k {
            for j in 0..n {
                m.swap([k, j], [pivot, j]);
                inv.swap([k, j], [pivot, j]);
            }
            scales.swap(k, pivot);
        }

        let p = m[[k, k]];
        for j in 0..n {
            m[[k, j]] /= p;
            inv[[k, j]] /= p;
        }
        for i in 0..n {
            if i == k {
                continue;
            }
            let factor = m[[i, k]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[[i, j]] -= factor * m[[k, j]];
                inv[[i, j]] -= factor * inv[[k, j]];
            }
        }
    }

    Ok(inv)
}
