//! Configuration options for the Levenberg-Marquardt minimizer.

use serde::{Deserialize, Serialize};

/// How the damping term scales the diagonal of the normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DampingScaling {
    /// `λ · diag(JᵀJ)` at the current point (Marquardt).
    #[default]
    Marquardt,

    /// `λ · max(diag(JᵀJ))` over all points seen so far (Moré).
    More,
}

/// Configuration options for the Levenberg-Marquardt minimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    /// Tolerance for the relative decrease of the cost. Default: 1e-10
    pub ftol: f64,

    /// Tolerance for the relative step length. Default: 1e-10
    pub xtol: f64,

    /// Tolerance for the gradient norm. Default: 1e-10
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda after a rejected step. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda after an accepted step. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-12
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e12
    pub max_lambda: f64,

    /// Rejected trial steps allowed within one iteration. Default: 20
    pub max_retries: usize,

    /// Diagonal scaling of the damping term. Default: Marquardt
    pub scaling: DampingScaling,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
            max_retries: 20,
            scaling: DampingScaling::default(),
        }
    }
}
