//! # Minimizers
//!
//! Interchangeable optimizers over a [`CostFunction`]. Every minimizer is a
//! small state machine driven one step at a time by the fit loop:
//!
//! ```text
//! Uninitialized -> Initialized -> Iterating -> Converged | Failed | MaxIterationsReached
//! ```
//!
//! `iterate` performs exactly one step and leaves the cost function at the
//! best accepted point, so the caller can stop (or cancel) between any two
//! calls. Recoverable numerical failures (a singular system, non-finite model
//! values) end the run with a `Failed` state instead of an error.

mod factory;
mod fabada;
mod gauss_newton;
mod gradient;
mod line_search;
pub mod lm;
mod simplex;

pub use fabada::{Fabada, FabadaConfig};
pub use factory::MinimizerFactory;
pub use gauss_newton::{DampedGaussNewton, GaussNewtonConfig};
pub use gradient::{
    Bfgs, ConjugateGradient, ConjugateGradientVariant, GradientConfig, SteepestDescent,
};
pub use lm::{LevenbergMarquardt, LmConfig};
pub use simplex::{Simplex, SimplexConfig};

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use tracing::debug;

use crate::cost::CostFunction;
use crate::error::{FitError, Result};

/// Lifecycle of a minimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinimizerState {
    #[default]
    Uninitialized,
    Initialized,
    Iterating,
    Converged,
    Failed,
    MaxIterationsReached,
    Cancelled,
}

impl MinimizerState {
    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MinimizerState::Converged
                | MinimizerState::Failed
                | MinimizerState::MaxIterationsReached
                | MinimizerState::Cancelled
        )
    }
}

/// State, message and progress of a minimizer run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimizerStatus {
    pub state: MinimizerState,
    /// Failure reason, when the state is `Failed`.
    pub message: Option<String>,
    /// Cost at the best accepted point.
    pub cost: f64,
    /// Steps taken so far.
    pub iterations: usize,
}

impl MinimizerStatus {
    /// Reset for a fresh run starting at `cost`.
    pub fn start(&mut self, cost: f64) {
        *self = Self {
            state: MinimizerState::Initialized,
            message: None,
            cost,
            iterations: 0,
        };
    }

    pub fn converge(&mut self) {
        self.state = MinimizerState::Converged;
        self.message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = MinimizerState::Failed;
        self.message = Some(message.into());
    }

    pub fn is_success(&self) -> bool {
        self.state == MinimizerState::Converged
    }
}

impl fmt::Display for MinimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            MinimizerState::Converged => write!(f, "success"),
            MinimizerState::Failed => {
                write!(f, "{}", self.message.as_deref().unwrap_or("Failed"))
            }
            MinimizerState::MaxIterationsReached => write!(
                f,
                "Failed to converge after {} iterations",
                self.iterations
            ),
            MinimizerState::Cancelled => write!(f, "cancelled"),
            MinimizerState::Uninitialized => write!(f, "not started"),
            MinimizerState::Initialized | MinimizerState::Iterating => write!(f, "running"),
        }
    }
}

/// An optimizer that reduces a cost function one step at a time.
pub trait Minimizer: fmt::Debug + Send {
    /// Registered name, e.g. `Levenberg-Marquardt`.
    fn name(&self) -> &str;

    /// Apply a `Key=Value` option given after the minimizer name.
    fn set_option(&mut self, key: &str, value: &str) -> Result<()>;

    /// Capture the starting point of a run.
    fn initialize(&mut self, cost: &mut dyn CostFunction, max_iterations: usize) -> Result<()>;

    /// Take one step. Returns `true` to continue and `false` once the run
    /// has converged or failed.
    fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool>;

    fn status(&self) -> &MinimizerStatus;

    fn status_mut(&mut self) -> &mut MinimizerStatus;

    /// Parameter uncertainties the minimizer estimated itself, if any.
    fn parameter_errors(&self) -> Option<Array1<f64>> {
        None
    }

    fn state(&self) -> MinimizerState {
        self.status().state
    }

    /// `success` after convergence, otherwise a description of what happened.
    fn status_string(&self) -> String {
        self.status().to_string()
    }

    fn final_cost_value(&self) -> f64 {
        self.status().cost
    }
}

/// Parse a minimizer option value.
pub(crate) fn parse_option<T: FromStr>(minimizer: &str, key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        FitError::InvalidInput(format!(
            "invalid value '{}' for option '{}' of {}",
            value, key, minimizer
        ))
    })
}

pub(crate) fn unknown_option(minimizer: &str, key: &str) -> FitError {
    FitError::InvalidInput(format!("{} has no option '{}'", minimizer, key))
}

/// Common bookkeeping around one step.
///
/// Recoverable errors restore the cost function to `accepted` and mark the
/// run failed; fatal errors propagate.
pub(crate) fn finish_step(
    status: &mut MinimizerStatus,
    cost: &mut dyn CostFunction,
    accepted: &Array1<f64>,
    outcome: Result<bool>,
) -> Result<bool> {
    status.iterations += 1;
    match outcome {
        Ok(true) => {
            status.state = MinimizerState::Iterating;
            Ok(true)
        }
        Ok(false) => {
            if !status.state.is_terminal() {
                status.converge();
            }
            Ok(false)
        }
        Err(err) if err.is_recoverable() => {
            debug!(error = %err, "minimizer step failed");
            cost.set_parameters(accepted)?;
            status.fail(err.to_string());
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Capture the starting point and cost of a run.
///
/// A recoverable failure to evaluate the starting cost leaves the run
/// `Failed` rather than returning an error.
pub(crate) fn start_run(
    status: &mut MinimizerStatus,
    cost: &mut dyn CostFunction,
) -> Result<Array1<f64>> {
    let x = cost.parameters();
    match cost.val() {
        Ok(value) => status.start(value),
        Err(err) if err.is_recoverable() => {
            status.start(f64::NAN);
            status.fail(err.to_string());
        }
        Err(err) => return Err(err),
    }
    Ok(x)
}

/// Whether a step may be taken: `false` once the run has ended, an error
/// before `initialize`.
pub(crate) fn ready(status: &MinimizerStatus, name: &str) -> Result<bool> {
    match status.state {
        MinimizerState::Uninitialized => Err(FitError::InvalidInput(format!(
            "{} must be initialized before iterating",
            name
        ))),
        state => Ok(!state.is_terminal()),
    }
}

/// Euclidean norm.
pub(crate) fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
