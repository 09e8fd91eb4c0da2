use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    finish_step, norm, parse_option, ready, start_run, unknown_option, Minimizer,
    MinimizerStatus,
};
use crate::cost::CostFunction;
use crate::error::Result;

/// Configuration for [`Simplex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplexConfig {
    /// The run converges once the simplex size falls below this. Default: 1e-6
    pub size_tolerance: f64,
    /// Initial vertex offset relative to the parameter value. Default: 0.05
    pub relative_step: f64,
    /// Initial vertex offset for parameters that are zero. Default: 0.00025
    pub zero_step: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            size_tolerance: 1e-6,
            relative_step: 0.05,
            zero_step: 0.00025,
        }
    }
}

/// Nelder-Mead downhill simplex. Uses cost values only.
///
/// Each call to `iterate` performs one reflection, expansion, contraction
/// or shrink. The cost function is left at the best vertex.
#[derive(Debug, Clone, Default)]
pub struct Simplex {
    config: SimplexConfig,
    vertices: Vec<Array1<f64>>,
    values: Vec<f64>,
    status: MinimizerStatus,
}

impl Simplex {
    const NAME: &'static str = "Simplex";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size_tolerance(mut self, tolerance: f64) -> Self {
        self.config.size_tolerance = tolerance;
        self
    }

    pub fn config(&self) -> &SimplexConfig {
        &self.config
    }

    /// Mean distance of the vertices from their centroid.
    pub fn size(&self) -> f64 {
        if self.vertices.is_empty() {
            return 0.0;
        }
        let centroid = centroid(&self.vertices, self.vertices.len());
        self.vertices
            .iter()
            .map(|v| norm(&(v - &centroid)))
            .sum::<f64>()
            / self.vertices.len() as f64
    }

    fn best(&self) -> Array1<f64> {
        self.vertices.first().cloned().unwrap_or_else(|| Array1::zeros(0))
    }

    fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        self.vertices = order.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    fn step(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        self.sort();
        if self.size() < self.config.size_tolerance {
            return Ok(false);
        }

        let n = self.vertices.len() - 1;
        let worst = self.vertices[n].clone();
        let worst_value = self.values[n];
        let second_worst_value = self.values[n.saturating_sub(1)];
        let best_value = self.values[0];
        let centroid = centroid(&self.vertices, n);

        let reflected = &centroid + &(&centroid - &worst);
        let reflected_value = evaluate(cost, &reflected)?;

        let (vertex, value, kind) = if reflected_value < best_value {
            let expanded = &centroid + &((&centroid - &worst) * 2.0);
            let expanded_value = evaluate(cost, &expanded)?;
            if expanded_value < reflected_value {
                (expanded, expanded_value, "expand")
            } else {
                (reflected, reflected_value, "reflect")
            }
        } else if reflected_value < second_worst_value {
            (reflected, reflected_value, "reflect")
        } else {
            let contracted = if reflected_value < worst_value {
                &centroid + &((&reflected - &centroid) * 0.5)
            } else {
                &centroid + &((&worst - &centroid) * 0.5)
            };
            let contracted_value = evaluate(cost, &contracted)?;
            if contracted_value < reflected_value.min(worst_value) {
                (contracted, contracted_value, "contract")
            } else {
                self.shrink(cost)?;
                (self.vertices[n].clone(), self.values[n], "shrink")
            }
        };
        self.vertices[n] = vertex;
        self.values[n] = value;
        self.sort();

        debug!(iteration, kind, cost = self.values[0], size = self.size(), "simplex step");
        cost.set_parameters(&self.vertices[0])?;
        self.status.cost = self.values[0];
        Ok(true)
    }

    /// Move every vertex halfway towards the best one.
    fn shrink(&mut self, cost: &mut dyn CostFunction) -> Result<()> {
        let best = self.vertices[0].clone();
        for i in 1..self.vertices.len() {
            let vertex = &best + &((&self.vertices[i] - &best) * 0.5);
            self.values[i] = evaluate(cost, &vertex)?;
            self.vertices[i] = vertex;
        }
        Ok(())
    }
}

/// Centroid of the first `count` vertices.
fn centroid(vertices: &[Array1<f64>], count: usize) -> Array1<f64> {
    let mut sum = Array1::zeros(vertices[0].len());
    for v in &vertices[..count] {
        sum += v;
    }
    sum / count as f64
}

/// Cost at `x`; points that cannot be evaluated count as infinitely bad.
fn evaluate(cost: &mut dyn CostFunction, x: &Array1<f64>) -> Result<f64> {
    cost.set_parameters(x)?;
    match cost.val() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Ok(f64::INFINITY),
        Err(err) if err.is_recoverable() => Ok(f64::INFINITY),
        Err(err) => Err(err),
    }
}

impl Minimizer for Simplex {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "SizeTolerance" => self.config.size_tolerance = parse_option(Self::NAME, key, value)?,
            _ => return Err(unknown_option(Self::NAME, key)),
        }
        Ok(())
    }

    fn initialize(&mut self, cost: &mut dyn CostFunction, _max_iterations: usize) -> Result<()> {
        let x = start_run(&mut self.status, cost)?;
        self.vertices = vec![x.clone()];
        self.values = vec![self.status.cost];
        if self.status.state.is_terminal() {
            return Ok(());
        }
        for i in 0..x.len() {
            let mut vertex = x.clone();
            vertex[i] += if x[i] == 0.0 {
                self.config.zero_step
            } else {
                self.config.relative_step * x[i].abs()
            };
            self.values.push(evaluate(cost, &vertex)?);
            self.vertices.push(vertex);
        }
        self.sort();
        cost.set_parameters(&self.vertices[0])?;
        self.status.cost = self.values[0];
        Ok(())
    }

    fn iterate(&mut self, cost: &mut dyn CostFunction, iteration: usize) -> Result<bool> {
        if !ready(&self.status, Self::NAME)? {
            return Ok(false);
        }
        let outcome = if self.vertices.len() < 2 {
            Ok(false)
        } else {
            self.step(cost, iteration)
        };
        let accepted = self.best();
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
    use crate::minimizers::test_problems::{decay_fit, run, Quadratic};
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic() {
        let mut cost = Quadratic {
            x: Array1::from(vec![5.0, 5.0]),
        };
        let mut simplex = Simplex::new().with_size_tolerance(1e-8);
        run(&mut simplex, &mut cost, 5000);
        assert_eq!(simplex.status_string(), "success");
        assert!(simplex.size() < 1e-8);
        assert_relative_eq!(cost.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(cost.x[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_decay() {
        let mut cost = decay_fit();
        let mut simplex = Simplex::new();
        run(&mut simplex, &mut cost, 5000);
        assert!(simplex.status().is_success(), "{}", simplex.status_string());
        let p = cost.parameters();
        assert_relative_eq!(p[0], 3.0, epsilon = 1e-3);
        assert_relative_eq!(p[1], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_cost_left_at_best_vertex() {
        let mut cost = Quadratic {
            x: Array1::from(vec![5.0, 5.0]),
        };
        let mut simplex = Simplex::new();
        simplex.initialize(&mut cost, 10).unwrap();
        for i in 0..10 {
            simplex.iterate(&mut cost, i).unwrap();
            assert_eq!(cost.val().unwrap(), simplex.final_cost_value());
        }
    }

    #[test]
    fn test_option() {
        let mut simplex = Simplex::new();
        simplex.set_option("SizeTolerance", "0.01").unwrap();
        assert_eq!(simplex.config().size_tolerance, 0.01);
        assert!(simplex.set_option("Alpha", "1").is_err());
    }
}
