//! Levenberg-Marquardt minimizer.
//!
//! Each step solves the damped normal equations
//!
//! ```text
//! (JᵀWJ + λ D) δ = JᵀW r
//! ```
//!
//! where `D` is a diagonal scaling, accepts the step if the cost decreases
//! and shrinks λ, or rejects it and grows λ. Bound penalties enter through
//! the gradient and Hessian supplied by the cost function.

pub mod config;
pub mod trust_region;

pub use config::{DampingScaling, LmConfig};
pub use trust_region::TrustRegion;

use ndarray::Array1;
use tracing::debug;

use super::{
    finish_step, norm, parse_option, ready, start_run, unknown_option, Minimizer,
    MinimizerStatus,
};
use crate::cost::CostFunction;
use crate::error::{FitError, Result};
use crate::utils::linalg::cholesky_solve;

/// Floor for diagonal entries of the scaling matrix.
const MIN_DIAGONAL: f64 = 1e-12;

/// The Levenberg-Marquardt minimizer.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    name: &'static str,
    config: LmConfig,
    region: TrustRegion,
    /// Accepted point
    x: Array1<f64>,
    /// Running maximum of the Hessian diagonal, for Moré scaling
    max_diagonal: Array1<f64>,
    status: MinimizerStatus,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create a new minimizer with default configuration.
    pub fn new() -> Self {
        Self::with_config(LmConfig::default())
    }

    /// Create a new minimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self {
            name: "Levenberg-Marquardt",
            region: TrustRegion::from_config(&config),
            config,
            x: Array1::zeros(0),
            max_diagonal: Array1::zeros(0),
            status: MinimizerStatus::default(),
        }
    }

    /// The `Levenberg-MarquardtMD` variant with Moré's diagonal scaling.
    pub fn more() -> Self {
        let mut lm = Self::with_config(LmConfig {
            scaling: DampingScaling::More,
            ..LmConfig::default()
        });
        lm.name = "Levenberg-MarquardtMD";
        lm
    }

    /// Set the tolerance for the relative decrease of the cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for the relative step length.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for the gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the number of rejected steps allowed within one iteration.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Current damping parameter.
    pub fn lambda(&self) -> f64 {
        self.region.lambda
    }

    fn step(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        let (value, gradient, hessian) = cost.val_deriv_hessian()?;
        self.status.cost = value;
        if norm(&gradient) <= self.config.gtol || value == 0.0 {
            return Ok(false);
        }

        // Normal equations in the JᵀJ scale
        let a = &hessian * 0.5;
        let b = &gradient * -0.5;
        let diagonal = match self.config.scaling {
            DampingScaling::Marquardt => a.diag().mapv(|d| d.max(MIN_DIAGONAL)),
            DampingScaling::More => {
                if self.max_diagonal.len() != a.nrows() {
                    self.max_diagonal = Array1::zeros(a.nrows());
                }
                self.max_diagonal
                    .zip_mut_with(&a.diag(), |m, &d| *m = m.max(d).max(MIN_DIAGONAL));
                self.max_diagonal.clone()
            }
        };

        for attempt in 0..=self.config.max_retries {
            let lambda = self.region.lambda;
            let mut damped = a.clone();
            for (k, d) in diagonal.iter().enumerate() {
                damped[[k, k]] += lambda * d;
            }

            let delta = match cholesky_solve(&damped, &b) {
                Ok(delta) => delta,
                Err(FitError::SingularMatrix(message)) => {
                    debug!(lambda, %message, "damped system is singular, increasing damping");
                    if !self.region.reject() {
                        return Err(FitError::SingularMatrix(message));
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let predicted = -(gradient.dot(&delta) + 0.5 * delta.dot(&hessian.dot(&delta)));
            let trial = &self.x + &delta;
            cost.set_parameters(&trial)?;
            let new_value = match cost.val() {
                Ok(v) if v.is_finite() => v,
                Ok(_) => f64::INFINITY,
                Err(err) if err.is_recoverable() => f64::INFINITY,
                Err(err) => return Err(err),
            };

            if new_value < value {
                let ratio = TrustRegion::gain_ratio(value, new_value, predicted);
                self.region.accept(ratio);
                let small_step =
                    norm(&delta) <= self.config.xtol * (norm(&self.x) + self.config.xtol);
                let small_reduction = value - new_value <= self.config.ftol * value;
                debug!(iteration, cost = new_value, lambda, ratio, "step accepted");
                self.x = trial;
                self.status.cost = new_value;
                return Ok(!(small_step || small_reduction));
            }

            cost.set_parameters(&self.x)?;
            debug!(iteration, attempt, lambda, cost = new_value, "step rejected");
            // No decrease beyond rounding: already at the minimum
            if (new_value - value).abs() <= self.config.ftol * value {
                return Ok(false);
            }
            if !self.region.reject() {
                break;
            }
        }

        self.status.fail("Failed to decrease cost function");
        Ok(false)
    }
}

impl Minimizer for LevenbergMarquardt {
    fn name(&self) -> &str {
        self.name
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "RelError" => self.config.ftol = parse_option(self.name, key, value)?,
            "StepTolerance" => self.config.xtol = parse_option(self.name, key, value)?,
            "AbsError" => self.config.gtol = parse_option(self.name, key, value)?,
            "InitialLambda" => self.config.initial_lambda = parse_option(self.name, key, value)?,
            "MaxRetries" => self.config.max_retries = parse_option(self.name, key, value)?,
            _ => return Err(unknown_option(self.name, key)),
        }
        Ok(())
    }

    fn initialize(&mut self, cost: &mut dyn CostFunction, _max_iterations: usize) -> Result<()> {
        self.region = TrustRegion::from_config(&self.config);
        self.max_diagonal = Array1::zeros(cost.n_params());
        self.x = start_run(&mut self.status, cost)?;
        Ok(())
    }

    fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        if !ready(&self.status, self.name)? {
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
