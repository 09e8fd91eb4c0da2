//! # Covariance Matrix Calculations
//!
//! Parameter covariance estimated from the weighted Jacobian at the best
//! fit point:
//!
//! ```text
//! covar = scale * inv(Jᵀ J)
//! ```
//!
//! `J` already carries the `1/σ` weights, so for a weighted fit `scale` is
//! one. An unweighted fit has no uncertainty information and scales by the
//! reduced chi-square instead.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::utils::linalg::invert;

/// Calculate the covariance matrix from a weighted Jacobian.
///
/// Fails with `SingularMatrix` when the parameters are not all determined
/// by the data.
pub fn calculate_covariance(jacobian: &Array2<f64>, scale: f64) -> Result<Array2<f64>> {
    let jtj = jacobian.t().dot(jacobian);
    Ok(invert(&jtj)? * scale)
}

/// Correlation matrix `covar_ij / sqrt(covar_ii covar_jj)`.
///
/// Entries involving a parameter with zero variance are zero, except on
/// the diagonal.
pub fn calculate_correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    let mut correl = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..n {
            if i == j {
                correl[[i, j]] = 1.0;
            } else {
                let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
                if denom > 0.0 {
                    correl[[i, j]] = covar[[i, j]] / denom;
                }
            }
        }
    }

    correl
}

/// Correlations in percent, as reported in the normalised covariance table.
pub fn normalised_covariance(covar: &Array2<f64>) -> Array2<f64> {
    calculate_correlation(covar) * 100.0
}

/// Square roots of the diagonal; negative variances give zero.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar.diag().mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}
