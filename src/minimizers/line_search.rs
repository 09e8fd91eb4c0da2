use ndarray::Array1;

use crate::cost::CostFunction;
use crate::error::Result;

/// Settings for the backtracking line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LineSearchSettings {
    /// Armijo condition parameter (sufficient decrease).
    pub c1: f64,
    /// Smallest contraction per trial.
    pub min_contraction: f64,
    /// Largest contraction per trial.
    pub max_contraction: f64,
    /// Maximum number of trial points.
    pub max_iter: usize,
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            min_contraction: 0.1,
            max_contraction: 0.5,
            max_iter: 40,
        }
    }
}

/// Outcome of a line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LineSearch {
    /// A point satisfying the Armijo condition; the cost is left there.
    Accepted { alpha: f64, value: f64 },
    /// No acceptable point; the cost is left at the start point. `best` is
    /// the lowest value seen.
    Failed { best: f64 },
}

/// Backtracking line search along `direction` from `x`, satisfying the
/// Armijo (sufficient decrease) condition
/// `f(x + α·p) ≤ f(x) + c1·α·(∇f · p)` with a strict decrease.
///
/// Each rejected trial is replaced by the minimizer of the quadratic that
/// interpolates `f(x)`, `∇f · p` and the rejected value, kept within the
/// contraction limits. Trial points where the cost cannot be evaluated
/// count as rejected.
pub(crate) fn backtracking_armijo(
    cost: &mut dyn CostFunction,
    x: &Array1<f64>,
    value: f64,
    grad_dot_p: f64,
    direction: &Array1<f64>,
    initial_alpha: f64,
    settings: &LineSearchSettings,
) -> Result<LineSearch> {
    let mut alpha = initial_alpha;
    let mut best = f64::INFINITY;

    for _ in 0..settings.max_iter {
        let trial = x + &(direction * alpha);
        cost.set_parameters(&trial)?;
        let trial_value = match cost.val() {
            Ok(v) if v.is_finite() => v,
            Ok(_) => f64::INFINITY,
            Err(err) if err.is_recoverable() => f64::INFINITY,
            Err(err) => return Err(err),
        };
        best = best.min(trial_value);

        if trial_value < value && trial_value <= value + settings.c1 * alpha * grad_dot_p {
            return Ok(LineSearch::Accepted {
                alpha,
                value: trial_value,
            });
        }

        let next = if trial_value.is_finite() {
            let curvature = trial_value - value - grad_dot_p * alpha;
            if curvature > 0.0 {
                -grad_dot_p * alpha * alpha / (2.0 * curvature)
            } else {
                alpha * settings.max_contraction
            }
        } else {
            alpha * settings.min_contraction
        };
        alpha = next.clamp(
            alpha * settings.min_contraction,
            alpha * settings.max_contraction,
        );
    }

    cost.set_parameters(x)?;
    Ok(LineSearch::Failed { best })
}
