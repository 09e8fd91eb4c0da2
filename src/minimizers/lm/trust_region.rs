//! Damping control for the Levenberg-Marquardt minimizer.
//!
//! The damping parameter shrinks after accepted steps and grows after
//! rejected ones, in proportion to how well the quadratic model predicted
//! the actual change of the cost.

use super::config::LmConfig;

/// Damping state of one Levenberg-Marquardt run.
#[derive(Debug, Clone)]
pub struct TrustRegion {
    /// Current value of the damping parameter
    pub lambda: f64,

    lambda_min: f64,
    lambda_max: f64,
    increase: f64,
    decrease: f64,

    /// Gain ratio above which an accepted step shrinks lambda
    pub good_gain_ratio: f64,
}

impl TrustRegion {
    pub fn from_config(config: &LmConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            lambda_min: config.min_lambda,
            lambda_max: config.max_lambda,
            increase: config.lambda_up_factor,
            decrease: config.lambda_down_factor,
            good_gain_ratio: 0.25,
        }
    }

    /// Update lambda after an accepted step.
    pub fn accept(&mut self, gain_ratio: f64) {
        if gain_ratio > self.good_gain_ratio {
            self.lambda = (self.lambda * self.decrease).max(self.lambda_min);
        }
    }

    /// Grow lambda after a rejected step. Returns `false` once lambda has
    /// reached its maximum.
    pub fn reject(&mut self) -> bool {
        if self.lambda >= self.lambda_max {
            return false;
        }
        self.lambda = (self.lambda * self.increase).min(self.lambda_max);
        true
    }

    /// Ratio of the actual to the predicted reduction of the cost.
    ///
    /// # Arguments
    ///
    /// * `current_cost` - The cost before the step
    /// * `new_cost` - The cost after the step
    /// * `predicted_reduction` - Reduction predicted by the quadratic model
    pub fn gain_ratio(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;

        if predicted_reduction.abs() < 1e-300 {
            if actual_reduction.abs() < 1e-300 {
                1.0
            } else {
                0.0
            }
        } else {
            actual_reduction / predicted_reduction
        }
    }
}
