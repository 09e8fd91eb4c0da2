//! Parameter definition
//!
//! A parameter is a named value owned by one function. It may be fixed, tied
//! to a formula over other parameters, or softly bounded.

use crate::parameters::bounds::BoundConstraint;
use serde::{Deserialize, Serialize};

/// A fit parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter, unique within its function
    name: String,

    /// Current value of the parameter
    value: f64,

    /// Whether the parameter is held at its current value
    fixed: bool,

    /// Tie formula computing this parameter from others
    tie: Option<String>,

    /// Soft bound contributing a penalty to the cost
    bound: Option<BoundConstraint>,

    /// Standard error of the parameter (set after fitting)
    error: Option<f64>,
}

impl Parameter {
    /// Create a new free, untied, unbounded parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore_rs::parameters::parameter::Parameter;
    ///
    /// let param = Parameter::new("Height", 10.0);
    /// assert_eq!(param.name(), "Height");
    /// assert_eq!(param.value(), 10.0);
    /// assert!(param.is_active());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            fixed: false,
            tie: None,
            bound: None,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn tie(&self) -> Option<&str> {
        self.tie.as_deref()
    }

    pub fn is_tied(&self) -> bool {
        self.tie.is_some()
    }

    pub(crate) fn set_tie(&mut self, tie: Option<String>) {
        self.tie = tie;
    }

    pub fn bound(&self) -> Option<&BoundConstraint> {
        self.bound.as_ref()
    }

    pub fn set_bound(&mut self, bound: Option<BoundConstraint>) {
        self.bound = bound;
    }

    pub fn error(&self) -> Option<f64> {
        self.error
    }

    pub fn set_error(&mut self, error: Option<f64>) {
        self.error = error;
    }

    /// Whether the parameter belongs to the vector a minimizer optimizes.
    pub fn is_active(&self) -> bool {
        !self.fixed && self.tie.is_none()
    }

    /// Penalty contributed by this parameter's bound at its current value.
    pub fn penalty(&self) -> f64 {
        self.bound.map_or(0.0, |b| b.penalty(self.value))
    }
}
