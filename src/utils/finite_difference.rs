//! Finite difference methods for numerical differentiation.
//!
//! Functions without analytic derivatives, composites asked for `NumDeriv`
//! and cost functions with ties all use the central-difference Jacobian here.

use crate::error::{FitError, Result};
use ndarray::ArrayViewMut2;

/// Relative step used for central differences.
pub const RELATIVE_STEP: f64 = 1e-6;

/// Smallest absolute step, used when a parameter is at or near zero.
pub const MIN_STEP: f64 = 1e-8;

/// Step size for a parameter with the given value.
pub fn step_size(value: f64) -> f64 {
    (value.abs() * RELATIVE_STEP).max(MIN_STEP)
}

/// Compute a Jacobian with central differences.
///
/// `eval(params, out)` must write `n_points` model values for the given
/// parameter vector. Column `j` of `jacobian` receives
/// `(f(p + h e_j) - f(p - h e_j)) / 2h`.
///
/// # Arguments
///
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `n_points` - Number of model values produced by `eval`
/// * `eval` - Model evaluation for a full parameter vector
/// * `jacobian` - Output of shape `(n_points, params.len())`
pub fn central_difference_jacobian<F>(
    params: &[f64],
    n_points: usize,
    mut eval: F,
    mut jacobian: ArrayViewMut2<'_, f64>,
) -> Result<()>
where
    F: FnMut(&[f64], &mut [f64]) -> Result<()>,
{
    if jacobian.dim() != (n_points, params.len()) {
        return Err(FitError::DimensionMismatch(format!(
            "Jacobian is {:?}, expected ({}, {})",
            jacobian.dim(),
            n_points,
            params.len()
        )));
    }

    let mut probe = params.to_vec();
    let mut forward = vec![0.0; n_points];
    let mut backward = vec![0.0; n_points];

    for j in 0..params.len() {
        let h = step_size(params[j]);

        probe[j] = params[j] + h;
        eval(&probe, &mut forward)?;
        probe[j] = params[j] - h;
        eval(&probe, &mut backward)?;
        probe[j] = params[j];

        for i in 0..n_points {
            jacobian[[i, j]] = (forward[i] - backward[i]) / (2.0 * h);
        }
    }

    Ok(())
}
