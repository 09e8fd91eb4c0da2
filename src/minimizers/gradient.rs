//! Line-search minimizers driven by the gradient: steepest descent,
//! conjugate gradient and BFGS.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::line_search::{backtracking_armijo, LineSearch, LineSearchSettings};
use super::{
    finish_step, norm, parse_option, ready, start_run, unknown_option, Minimizer,
    MinimizerStatus,
};
use crate::cost::CostFunction;
use crate::error::{FitError, Result};

/// Settings shared by the gradient minimizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientConfig {
    /// Convergence tolerance on the gradient norm. Default: 1e-8
    pub gtol: f64,
    /// Convergence tolerance on the relative cost change. Default: 1e-12
    pub ftol: f64,
    /// Convergence tolerance on the relative step size. Default: 1e-12
    pub xtol: f64,
    /// Armijo condition parameter. Default: 1e-4
    pub armijo_c1: f64,
    /// Maximum trial points per line search. Default: 40
    pub max_line_search: usize,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            gtol: 1e-8,
            ftol: 1e-12,
            xtol: 1e-12,
            armijo_c1: 1e-4,
            max_line_search: 40,
        }
    }
}

/// Formula for the conjugate gradient β.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConjugateGradientVariant {
    /// `β = |g₊|² / |g|²`
    FletcherReeves,
    /// `β = max(0, g₊·(g₊ - g) / |g|²)`
    PolakRibiere,
}

/// How the search direction is chosen.
#[derive(Debug, Clone)]
enum Rule {
    Steepest,
    Conjugate {
        variant: ConjugateGradientVariant,
        /// Direction for the next step; `None` restarts along `-g`
        next: Option<Array1<f64>>,
        since_restart: usize,
    },
    Bfgs {
        /// Inverse Hessian approximation
        inverse: Array2<f64>,
    },
}

impl Rule {
    fn reset(&mut self, n: usize) {
        match self {
            Rule::Steepest => {}
            Rule::Conjugate {
                next,
                since_restart,
                ..
            } => {
                *next = None;
                *since_restart = 0;
            }
            Rule::Bfgs { inverse } => *inverse = Array2::eye(n),
        }
    }

    fn direction(&self, gradient: &Array1<f64>) -> Array1<f64> {
        match self {
            Rule::Steepest => -gradient,
            Rule::Conjugate { next, .. } => next.clone().unwrap_or_else(|| -gradient),
            Rule::Bfgs { inverse } => -inverse.dot(gradient),
        }
    }

    /// Update after an accepted step `s` that changed the gradient from
    /// `gradient` to `new_gradient`.
    fn update(
        &mut self,
        direction: &Array1<f64>,
        s: &Array1<f64>,
        gradient: &Array1<f64>,
        new_gradient: &Array1<f64>,
    ) {
        match self {
            Rule::Steepest => {}
            Rule::Conjugate {
                variant,
                next,
                since_restart,
            } => {
                *since_restart += 1;
                let gg = gradient.dot(gradient);
                if *since_restart >= s.len() || gg == 0.0 {
                    *next = None;
                    *since_restart = 0;
                    return;
                }
                let beta = match variant {
                    ConjugateGradientVariant::FletcherReeves => new_gradient.dot(new_gradient) / gg,
                    ConjugateGradientVariant::PolakRibiere => {
                        (new_gradient.dot(&(new_gradient - gradient)) / gg).max(0.0)
                    }
                };
                *next = Some(direction * beta - new_gradient);
            }
            Rule::Bfgs { inverse } => {
                let y = new_gradient - gradient;
                let ys = y.dot(s);
                if ys <= f64::EPSILON {
                    return;
                }
                let rho = 1.0 / ys;
                let hy = inverse.dot(&y);
                let factor = (1.0 + rho * y.dot(&hy)) * rho;
                let n = s.len();
                for i in 0..n {
                    for j in 0..n {
                        inverse[[i, j]] += factor * s[i] * s[j] - rho * (hy[i] * s[j] + s[i] * hy[j]);
                    }
                }
            }
        }
    }
}

/// Shared state of the line-search minimizers.
#[derive(Debug, Clone)]
struct LineSearchMinimizer {
    name: &'static str,
    config: GradientConfig,
    rule: Rule,
    x: Array1<f64>,
    value: f64,
    gradient: Array1<f64>,
    /// Step length and `∇f·p` of the previous step, for the next initial step
    previous: Option<(f64, f64)>,
    status: MinimizerStatus,
}

impl LineSearchMinimizer {
    fn new(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            config: GradientConfig::default(),
            rule,
            x: Array1::zeros(0),
            value: f64::NAN,
            gradient: Array1::zeros(0),
            previous: None,
            status: MinimizerStatus::default(),
        }
    }

    fn settings(&self) -> LineSearchSettings {
        LineSearchSettings {
            c1: self.config.armijo_c1,
            max_iter: self.config.max_line_search,
            ..LineSearchSettings::default()
        }
    }

    fn initial_alpha(&self, direction: &Array1<f64>, grad_dot_p: f64) -> f64 {
        match (&self.rule, self.previous) {
            (Rule::Bfgs { .. }, Some(_)) => 1.0,
            (_, Some((alpha, previous_gdp))) if grad_dot_p != 0.0 => {
                (alpha * previous_gdp / grad_dot_p).min(1e10)
            }
            _ => (1.0 / norm(direction)).min(1.0),
        }
    }

    fn search(&mut self, cost: &mut dyn CostFunction, direction: &Array1<f64>) -> Result<(LineSearch, f64)> {
        let grad_dot_p = self.gradient.dot(direction);
        let alpha = self.initial_alpha(direction, grad_dot_p);
        let settings = self.settings();
        let outcome =
            backtracking_armijo(cost, &self.x, self.value, grad_dot_p, direction, alpha, &settings)?;
        Ok((outcome, grad_dot_p))
    }

    fn step(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        if norm(&self.gradient) <= self.config.gtol {
            return Ok(false);
        }

        let mut direction = self.rule.direction(&self.gradient);
        if self.gradient.dot(&direction) >= 0.0 {
            // Not a descent direction
            self.rule.reset(self.x.len());
            direction = -&self.gradient;
        }

        let (mut outcome, mut grad_dot_p) = self.search(cost, &direction)?;
        if matches!(outcome, LineSearch::Failed { .. }) && !matches!(self.rule, Rule::Steepest) {
            debug!(iteration, minimizer = self.name, "line search failed, restarting along the gradient");
            self.rule.reset(self.x.len());
            self.previous = None;
            direction = -&self.gradient;
            (outcome, grad_dot_p) = self.search(cost, &direction)?;
        }

        let (alpha, new_value) = match outcome {
            LineSearch::Accepted { alpha, value } => (alpha, value),
            LineSearch::Failed { best } if best.is_finite() => {
                if self.value - best <= self.config.ftol * (1.0 + self.value.abs()) {
                    // No decrease beyond rounding
                    return Ok(false);
                }
                self.status.fail("Line search failed to decrease cost function");
                return Ok(false);
            }
            LineSearch::Failed { .. } => {
                return Err(FitError::FunctionEvaluation(
                    "cost function is not finite along the search direction".to_string(),
                ));
            }
        };

        let s = &direction * alpha;
        let new_x = &self.x + &s;
        let (_, new_gradient) = cost.val_and_deriv()?;
        self.rule.update(&direction, &s, &self.gradient, &new_gradient);

        let small_step = norm(&s) <= self.config.xtol * (1.0 + norm(&self.x));
        let small_change = self.value - new_value <= self.config.ftol * (1.0 + self.value.abs());
        debug!(iteration, minimizer = self.name, cost = new_value, alpha, "step accepted");

        self.previous = Some((alpha, grad_dot_p));
        self.x = new_x;
        self.value = new_value;
        self.gradient = new_gradient;
        self.status.cost = new_value;
        Ok(!(small_step || small_change))
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "GradientTolerance" => self.config.gtol = parse_option(self.name, key, value)?,
            "RelError" => self.config.ftol = parse_option(self.name, key, value)?,
            "StepTolerance" => self.config.xtol = parse_option(self.name, key, value)?,
            _ => return Err(unknown_option(self.name, key)),
        }
        Ok(())
    }

    fn initialize(&mut self, cost: &mut dyn CostFunction) -> Result<()> {
        self.x = start_run(&mut self.status, cost)?;
        self.rule.reset(self.x.len());
        self.previous = None;
        if self.status.state.is_terminal() {
            return Ok(());
        }
        match cost.val_and_deriv() {
            Ok((value, gradient)) => {
                self.value = value;
                self.gradient = gradient;
            }
            Err(err) if err.is_recoverable() => self.status.fail(err.to_string()),
            Err(err) => return Err(err),
        }
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
}

macro_rules! line_search_minimizer {
    ($(#[$meta:meta])* $ty:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $ty(LineSearchMinimizer);

        impl $ty {
            pub fn config(&self) -> &GradientConfig {
                &self.0.config
            }

            pub fn with_config(mut self, config: GradientConfig) -> Self {
                self.0.config = config;
                self
            }
        }

        impl Minimizer for $ty {
            fn name(&self) -> &str {
                self.0.name
            }

            fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
                self.0.set_option(key, value)
            }

            fn initialize(&mut self, cost: &mut dyn CostFunction, _max_iterations: usize) -> Result<()> {
                self.0.initialize(cost)
            }

            fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
                self.0.iterate(cost, iteration)
            }

            fn status(&self) -> &MinimizerStatus {
                &self.0.status
            }

            fn status_mut(&mut self) -> &mut MinimizerStatus {
                &mut self.0.status
            }
        }
    };
}

line_search_minimizer!(
    /// Steepest descent with a backtracking line search.
    SteepestDescent
);
line_search_minimizer!(
    /// Nonlinear conjugate gradient, restarted along the gradient every
    /// `n` steps.
    ConjugateGradient
);
line_search_minimizer!(
    /// BFGS quasi-Newton method with an inverse Hessian approximation.
    Bfgs
);

impl SteepestDescent {
    pub fn new() -> Self {
        Self(LineSearchMinimizer::new("SteepestDescent", Rule::Steepest))
    }
}

impl Default for SteepestDescent {
    fn default() -> Self {
        Self::new()
    }
}

impl ConjugateGradient {
    pub fn new(variant: ConjugateGradientVariant) -> Self {
        let name = match variant {
            ConjugateGradientVariant::FletcherReeves => "Conjugate gradient (Fletcher-Reeves imp.)",
            ConjugateGradientVariant::PolakRibiere => "Conjugate gradient (Polak-Ribiere imp.)",
        };
        Self(LineSearchMinimizer::new(
            name,
            Rule::Conjugate {
                variant,
                next: None,
                since_restart: 0,
            },
        ))
    }

    pub fn fletcher_reeves() -> Self {
        Self::new(ConjugateGradientVariant::FletcherReeves)
    }

    pub fn polak_ribiere() -> Self {
        Self::new(ConjugateGradientVariant::PolakRibiere)
    }
}

impl Bfgs {
    pub fn new() -> Self {
        Self(LineSearchMinimizer::new(
            "BFGS",
            Rule::Bfgs {
                inverse: Array2::eye(0),
            },
        ))
    }
}

impl Default for Bfgs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimizers::test_problems::{line_fit, run, Quadratic};
    use approx::assert_relative_eq;

    fn check_quadratic(minimizer: &mut dyn Minimizer, max_iterations: usize) {
        let mut cost = Quadratic {
            x: Array1::from(vec![5.0, 5.0]),
        };
        run(minimizer, &mut cost, max_iterations);
        assert!(minimizer.status().is_success(), "{}: {}", minimizer.name(), minimizer.status_string());
        assert_relative_eq!(cost.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(cost.x[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_steepest_descent() {
        check_quadratic(&mut SteepestDescent::new(), 2000);
    }

    #[test]
    fn test_conjugate_gradient() {
        check_quadratic(&mut ConjugateGradient::fletcher_reeves(), 2000);
        check_quadratic(&mut ConjugateGradient::polak_ribiere(), 2000);
    }

    #[test]
    fn test_bfgs() {
        let mut bfgs = Bfgs::new();
        check_quadratic(&mut bfgs, 200);

        let mut cost = line_fit();
        run(&mut bfgs, &mut cost, 500);
        assert!(bfgs.status().is_success(), "{}", bfgs.status_string());
        let p = cost.parameters();
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(p[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_names() {
        assert_eq!(
            ConjugateGradient::polak_ribiere().name(),
            "Conjugate gradient (Polak-Ribiere imp.)"
        );
        assert_eq!(SteepestDescent::new().name(), "SteepestDescent");
    }
}
