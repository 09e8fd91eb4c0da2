//! # Cost Functions
//!
//! The scalar objective a minimizer reduces. A cost function owns the fit
//! function and the bound data, and exposes the function's *active*
//! parameters (neither fixed nor tied) as a flat vector.
//!
//! Setting the vector re-applies ties in dependency order, so every
//! evaluation sees tied parameters consistent with their formulas.

mod least_squares;

pub use least_squares::LeastSquares;

use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// Objective over the active parameter vector.
pub trait CostFunction: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Number of active parameters.
    fn n_params(&self) -> usize;

    /// Current active parameter vector.
    fn parameters(&self) -> Array1<f64>;

    /// Replace the active parameter vector and re-apply ties.
    ///
    /// A vector whose length disagrees with `n_params()` fails with
    /// `InconsistentParameters`.
    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()>;

    /// Cost at the current parameters.
    fn val(&mut self) -> Result<f64>;

    /// Gradient with respect to the active parameters.
    fn deriv(&mut self) -> Result<Array1<f64>> {
        Ok(self.val_and_deriv()?.1)
    }

    fn val_and_deriv(&mut self) -> Result<(f64, Array1<f64>)>;

    /// Value, gradient and a (possibly approximate) Hessian.
    fn val_deriv_hessian(&mut self) -> Result<(f64, Array1<f64>, Array2<f64>)>;

    fn hessian(&mut self) -> Result<Array2<f64>> {
        Ok(self.val_deriv_hessian()?.2)
    }
}

/// The cost function choices of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CostFunctionKind {
    /// Residuals weighted by `1/sigma`.
    #[default]
    #[serde(rename = "Least squares")]
    LeastSquares,

    /// All weights equal to one.
    #[serde(rename = "Unweighted least squares")]
    UnweightedLeastSquares,
}

impl CostFunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            CostFunctionKind::LeastSquares => "Least squares",
            CostFunctionKind::UnweightedLeastSquares => "Unweighted least squares",
        }
    }

    /// Look a kind up by its display name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim() {
            "Least squares" => Ok(CostFunctionKind::LeastSquares),
            "Unweighted least squares" => Ok(CostFunctionKind::UnweightedLeastSquares),
            other => Err(FitError::InvalidInput(format!(
                "unknown cost function '{}'",
                other
            ))),
        }
    }

    pub fn is_weighted(self) -> bool {
        self == CostFunctionKind::LeastSquares
    }
}

impl fmt::Display for CostFunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for kind in [
            CostFunctionKind::LeastSquares,
            CostFunctionKind::UnweightedLeastSquares,
        ] {
            assert_eq!(CostFunctionKind::from_name(kind.name()).unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
        assert!(CostFunctionKind::from_name("Poisson").is_err());
    }
}
