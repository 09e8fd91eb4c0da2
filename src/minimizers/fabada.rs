//! Metropolis sampler of the posterior `exp(-cost / 2)`.
//!
//! Every iteration proposes a Gaussian jump for each parameter in turn and
//! accepts it with the Metropolis probability. Jump widths adapt towards an
//! acceptance rate of one half. The cost function is left at the best point
//! visited, and the chain after burn-in gives the parameter errors.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_option, ready, start_run, unknown_option, Minimizer, MinimizerState, MinimizerStatus};
use crate::cost::CostFunction;
use crate::error::{FitError, Result};

/// Configuration for [`Fabada`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabadaConfig {
    /// Steps in the chain; `None` uses the fit's maximum iterations
    pub chain_length: Option<usize>,
    /// Steps discarded before collecting statistics. Default: 0
    pub burn_in: usize,
    /// Target acceptance rate of the jumps. Default: 0.5
    pub target_acceptance: f64,
    /// Initial jump relative to the parameter value. Default: 0.1
    pub initial_jump: f64,
    /// Random seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for FabadaConfig {
    fn default() -> Self {
        Self {
            chain_length: None,
            burn_in: 0,
            target_acceptance: 0.5,
            initial_jump: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fabada {
    config: FabadaConfig,
    rng: StdRng,
    x: Array1<f64>,
    value: f64,
    best: Array1<f64>,
    jumps: Array1<f64>,
    chain: Vec<Array1<f64>>,
    chain_length: usize,
    status: MinimizerStatus,
}

impl Default for Fabada {
    fn default() -> Self {
        Self::with_config(FabadaConfig::default())
    }
}

impl Fabada {
    const NAME: &'static str = "FABADA";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FabadaConfig) -> Self {
        Self {
            rng: seeded(config.seed),
            config,
            x: Array1::zeros(0),
            value: f64::NAN,
            best: Array1::zeros(0),
            jumps: Array1::zeros(0),
            chain: Vec::new(),
            chain_length: 0,
            status: MinimizerStatus::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self.rng = seeded(Some(seed));
        self
    }

    pub fn config(&self) -> &FabadaConfig {
        &self.config
    }

    /// Chain points collected after burn-in.
    pub fn chain(&self) -> &[Array1<f64>] {
        &self.chain
    }

    /// Mean of the collected chain.
    pub fn posterior_mean(&self) -> Option<Array1<f64>> {
        if self.chain.is_empty() {
            return None;
        }
        let mut sum = Array1::zeros(self.x.len());
        for point in &self.chain {
            sum += point;
        }
        Some(sum / self.chain.len() as f64)
    }

    /// One sweep of single-parameter Metropolis updates.
    fn sweep(&mut self, cost: &mut dyn CostFunction) -> Result<()> {
        for k in 0..self.x.len() {
            let normal = Normal::new(0.0, self.jumps[k])
                .map_err(|e| FitError::InvalidInput(format!("invalid jump width: {}", e)))?;
            let mut trial = self.x.clone();
            trial[k] += normal.sample(&mut self.rng);
            cost.set_parameters(&trial)?;
            let trial_value = match cost.val() {
                Ok(v) if v.is_finite() => v,
                Ok(_) => f64::INFINITY,
                Err(err) if err.is_recoverable() => f64::INFINITY,
                Err(err) => return Err(err),
            };

            let probability = (-(trial_value - self.value) / 2.0).exp().min(1.0);
            let accepted = self.rng.gen::<f64>() < probability;
            if accepted {
                self.x = trial;
                self.value = trial_value;
                if trial_value < self.status.cost {
                    self.status.cost = trial_value;
                    self.best = self.x.clone();
                }
            }

            // Robbins-Monro style adaptation towards the target rate
            let observed = if accepted { 1.0 } else { 0.0 };
            self.jumps[k] *= (observed - self.config.target_acceptance).exp();
            if !(self.jumps[k].is_finite() && self.jumps[k] > 0.0) {
                self.jumps[k] = f64::EPSILON;
            }
        }
        Ok(())
    }
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl Minimizer for Fabada {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "ChainLength" => self.config.chain_length = Some(parse_option(Self::NAME, key, value)?),
            "BurnIn" => self.config.burn_in = parse_option(Self::NAME, key, value)?,
            "Seed" => {
                let seed = parse_option(Self::NAME, key, value)?;
                self.config.seed = Some(seed);
                self.rng = seeded(Some(seed));
            }
            _ => return Err(unknown_option(Self::NAME, key)),
        }
        Ok(())
    }

    fn initialize(&mut self, cost: &mut dyn CostFunction, max_iterations: usize) -> Result<()> {
        self.x = start_run(&mut self.status, cost)?;
        self.value = self.status.cost;
        self.best = self.x.clone();
        self.chain.clear();
        self.chain_length = self
            .config
            .chain_length
            .unwrap_or(max_iterations)
            .min(max_iterations);
        self.jumps = self.x.mapv(|v| {
            if v == 0.0 {
                self.config.initial_jump
            } else {
                self.config.initial_jump * v.abs()
            }
        });
        Ok(())
    }

    fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        if !ready(&self.status, Self::NAME)? {
            return Ok(false);
        }
        self.sweep(cost)?;
        cost.set_parameters(&self.best)?;
        self.status.iterations += 1;
        if self.status.iterations > self.config.burn_in {
            self.chain.push(self.x.clone());
        }
        debug!(iteration, cost = self.value, best = self.status.cost, "chain step");

        if self.status.iterations >= self.chain_length {
            self.status.converge();
            return Ok(false);
        }
        self.status.state = MinimizerState::Iterating;
        Ok(true)
    }

    fn status(&self) -> &MinimizerStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut MinimizerStatus {
        &mut self.status
    }

    /// Standard deviations of the chain after burn-in.
    fn parameter_errors(&self) -> Option<Array1<f64>> {
        let mean = self.posterior_mean()?;
        if self.chain.len() < 2 {
            return None;
        }
        let mut variance = Array1::<f64>::zeros(mean.len());
        for point in &self.chain {
            let d = point - &mean;
            variance += &(&d * &d);
        }
        Some((variance / (self.chain.len() - 1) as f64).mapv(f64::sqrt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimizers::test_problems::{line_fit, run};
    use approx::assert_relative_eq;

    #[test]
    fn test_chain_finds_line() {
        let mut cost = line_fit();
        let mut fabada = Fabada::new().with_seed(7);
        fabada.set_option("BurnIn", "1000").unwrap();
        let steps = run(&mut fabada, &mut cost, 4000);
        assert_eq!(steps, 3999);
        assert_eq!(fabada.status_string(), "success");
        assert_eq!(fabada.chain().len(), 3000);

        let p = cost.parameters();
        assert_relative_eq!(p[0], 1.0, epsilon = 0.3);
        assert_relative_eq!(p[1], 2.0, epsilon = 0.02);

        // Posterior widths of a unit-σ straight line fit
        let errors = fabada.parameter_errors().unwrap();
        assert!(errors[0] > 0.1 && errors[0] < 1.0, "{}", errors[0]);
        assert!(errors[1] > 0.005 && errors[1] < 0.05, "{}", errors[1]);
    }

    #[test]
    fn test_seed_reproducible() {
        let final_point = |seed: &str| {
            let mut cost = line_fit();
            let mut fabada = Fabada::new();
            fabada.set_option("Seed", seed).unwrap();
            run(&mut fabada, &mut cost, 200);
            cost.parameters()
        };
        assert_eq!(final_point("3"), final_point("3"));
    }
}
