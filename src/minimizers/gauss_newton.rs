use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    finish_step, norm, parse_option, ready, start_run, unknown_option, Minimizer,
    MinimizerStatus,
};
use crate::cost::CostFunction;
use crate::error::Result;
use crate::utils::linalg::cholesky_solve;

/// Configuration for [`DampedGaussNewton`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussNewtonConfig {
    /// Constant added to the diagonal of the Hessian. Default: 0
    pub damping: f64,
    /// Convergence tolerance on the relative cost change. Default: 1e-10
    pub ftol: f64,
    /// Convergence tolerance on the relative step size. Default: 1e-10
    pub xtol: f64,
    /// Times a step may be halved before the run fails. Default: 20
    pub max_halvings: usize,
}

impl Default for GaussNewtonConfig {
    fn default() -> Self {
        Self {
            damping: 0.0,
            ftol: 1e-10,
            xtol: 1e-10,
            max_halvings: 20,
        }
    }
}

/// Gauss-Newton with a constant diagonal damping and step halving.
///
/// Solves `(H + μI) δ = -g` with `H` the Gauss-Newton Hessian of the cost,
/// then halves `δ` until the cost decreases.
#[derive(Debug, Clone, Default)]
pub struct DampedGaussNewton {
    config: GaussNewtonConfig,
    x: Array1<f64>,
    status: MinimizerStatus,
}

impl DampedGaussNewton {
    const NAME: &'static str = "Damped GaussNewton";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.config.damping = damping;
        self
    }

    pub fn config(&self) -> &GaussNewtonConfig {
        &self.config
    }

    fn step(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        let (value, gradient, mut hessian) = cost.val_deriv_hessian()?;
        self.status.cost = value;
        if value == 0.0 || norm(&gradient) == 0.0 {
            return Ok(false);
        }
        for k in 0..hessian.nrows() {
            hessian[[k, k]] += self.config.damping;
        }
        let mut delta = cholesky_solve(&hessian, &(-&gradient))?;
        if norm(&delta) <= self.config.xtol * (norm(&self.x) + self.config.xtol) {
            return Ok(false);
        }

        for halving in 0..=self.config.max_halvings {
            let trial = &self.x + &delta;
            cost.set_parameters(&trial)?;
            let new_value = match cost.val() {
                Ok(v) if v.is_finite() => v,
                Ok(_) => f64::INFINITY,
                Err(err) if err.is_recoverable() => f64::INFINITY,
                Err(err) => return Err(err),
            };
            if new_value <= value {
                debug!(iteration, halving, cost = new_value, "step accepted");
                let small_step = norm(&delta) <= self.config.xtol * (norm(&self.x) + self.config.xtol);
                let small_reduction = value - new_value <= self.config.ftol * value;
                self.x = trial;
                self.status.cost = new_value;
                return Ok(!(small_step || small_reduction));
            }
            if (new_value - value).abs() <= self.config.ftol * value {
                cost.set_parameters(&self.x)?;
                return Ok(false);
            }
            delta *= 0.5;
        }

        cost.set_parameters(&self.x)?;
        self.status.fail("Failed to decrease cost function");
        Ok(false)
    }
}

impl Minimizer for DampedGaussNewton {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "Damping" => self.config.damping = parse_option(Self::NAME, key, value)?,
            "RelError" => self.config.ftol = parse_option(Self::NAME, key, value)?,
            "StepTolerance" => self.config.xtol = parse_option(Self::NAME, key, value)?,
            _ => return Err(unknown_option(Self::NAME, key)),
        }
        Ok(())
    }

    fn initialize(&mut self, cost: &mut dyn CostFunction, _max_iterations: usize) -> Result<()> {
        self.x = start_run(&mut self.status, cost)?;
        Ok(())
    }

    fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        if !ready(&self.status, Self::NAME)? {
            return Ok(false);
        }
        let outcome = self.step(cost, iteration);
        let accepted = self.x.clone();
        finish_step(&mut self.status, cost, &accepted, outcome)
    }

    fn status(&self) -> &MinimizerStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut MinimizerStatus {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimizers::test_problems::{decay_fit, line_fit, run};
    use crate::minimizers::MinimizerState;
    use approx::assert_relative_eq;

    #[test]
    fn test_line_in_few_steps() {
        let mut cost = line_fit();
        let mut gn = DampedGaussNewton::new();
        let steps = run(&mut gn, &mut cost, 20);
        assert!(steps <= 3);
        assert_eq!(gn.status_string(), "success");
        let p = cost.parameters();
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(p[1], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn test_damped_decay() {
        let mut cost = decay_fit();
        let mut gn = DampedGaussNewton::new();
        gn.set_option("Damping", "0.1").unwrap();
        assert_eq!(gn.config().damping, 0.1);
        run(&mut gn, &mut cost, 500);
        assert_eq!(gn.state(), MinimizerState::Converged);
        let p = cost.parameters();
        assert_relative_eq!(p[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(p[1], 2.0, epsilon = 1e-4);
    }
}
