//! Bound constraints on parameters
//!
//! A bound never clamps a parameter. Instead the cost function adds a
//! penalty `factor * violation^2` whenever the value leaves `[lower, upper]`,
//! so a very large factor approximates a hard wall.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Penalty factor used when a constraint does not specify one.
pub const DEFAULT_PENALTY_FACTOR: f64 = 1000.0;

/// Errors that can occur when constructing a bound constraint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: lower ({lower}) must not exceed upper ({upper})")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error("A bound constraint needs at least one finite limit")]
    Unbounded,

    #[error("Penalty factor must be positive and finite, got {0}")]
    InvalidPenaltyFactor(f64),
}

/// A soft inequality `lower <= value <= upper`; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundConstraint {
    /// Lower limit, if any
    pub lower: Option<f64>,

    /// Upper limit, if any
    pub upper: Option<f64>,

    /// Multiplier of the squared violation
    #[serde(default = "default_penalty_factor")]
    pub penalty_factor: f64,
}

fn default_penalty_factor() -> f64 {
    DEFAULT_PENALTY_FACTOR
}

impl BoundConstraint {
    /// Create a new constraint with the default penalty factor.
    ///
    /// # Arguments
    ///
    /// * `lower` - Optional lower limit
    /// * `upper` - Optional upper limit
    ///
    /// # Returns
    ///
    /// The constraint, or an error if both limits are missing or `lower > upper`
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore_rs::parameters::bounds::BoundConstraint;
    ///
    /// let bound = BoundConstraint::new(Some(0.0), Some(10.0)).unwrap();
    /// assert_eq!(bound.penalty(12.0), 1000.0 * 4.0);
    /// assert_eq!(bound.penalty(5.0), 0.0);
    /// ```
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Result<Self, BoundsError> {
        match (lower, upper) {
            (None, None) => return Err(BoundsError::Unbounded),
            (Some(lo), Some(hi)) if lo > hi => {
                return Err(BoundsError::InvalidBounds {
                    lower: lo,
                    upper: hi,
                })
            }
            _ => {}
        }
        Ok(Self {
            lower,
            upper,
            penalty_factor: DEFAULT_PENALTY_FACTOR,
        })
    }

    /// Set the penalty factor.
    pub fn with_penalty_factor(mut self, factor: f64) -> Result<Self, BoundsError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(BoundsError::InvalidPenaltyFactor(factor));
        }
        self.penalty_factor = factor;
        Ok(self)
    }

    /// Signed distance of `value` outside the bound, zero inside.
    pub fn violation(&self, value: f64) -> f64 {
        match (self.lower, self.upper) {
            (Some(lo), _) if value < lo => value - lo,
            (_, Some(hi)) if value > hi => value - hi,
            _ => 0.0,
        }
    }

    /// Whether `value` lies within the bound.
    pub fn contains(&self, value: f64) -> bool {
        self.violation(value) == 0.0
    }

    /// Penalty added to the cost.
    pub fn penalty(&self, value: f64) -> f64 {
        let v = self.violation(value);
        self.penalty_factor * v * v
    }

    /// First derivative of the penalty with respect to the parameter.
    pub fn penalty_deriv(&self, value: f64) -> f64 {
        2.0 * self.penalty_factor * self.violation(value)
    }

    /// Second derivative of the penalty with respect to the parameter.
    pub fn penalty_deriv2(&self, value: f64) -> f64 {
        if self.contains(value) {
            0.0
        } else {
            2.0 * self.penalty_factor
        }
    }

    /// Render the constraint in definition-string form, e.g. `0<Sigma<1`.
    pub fn to_definition(&self, name: &str) -> String {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => format!("{}<{}<{}", lo, name, hi),
            (Some(lo), None) => format!("{}<{}", lo, name),
            (None, Some(hi)) => format!("{}<{}", name, hi),
            (None, None) => name.to_string(),
        }
    }
}
