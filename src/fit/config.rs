//! Typed configuration of a fit.

use serde::{Deserialize, Serialize};

use crate::cost::CostFunctionKind;
use crate::domain::{ExcludeRanges, FitWindow};
use crate::error::Result;

/// One dataset taking part in a fit: a spectrum of a named workspace and the
/// part of it that is fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetBinding {
    /// Name of the workspace in the data service
    pub workspace: String,
    /// Spectrum within the workspace
    #[serde(default)]
    pub workspace_index: usize,
    #[serde(default)]
    pub start_x: Option<f64>,
    #[serde(default)]
    pub end_x: Option<f64>,
    /// Flat list of excluded ranges `[a1, b1, a2, b2, ...]`
    #[serde(default)]
    pub exclude: Vec<f64>,
}

impl DatasetBinding {
    pub fn new(workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            workspace_index: 0,
            start_x: None,
            end_x: None,
            exclude: Vec::new(),
        }
    }

    pub fn with_workspace_index(mut self, index: usize) -> Self {
        self.workspace_index = index;
        self
    }

    pub fn with_range(mut self, start_x: f64, end_x: f64) -> Self {
        self.start_x = Some(start_x);
        self.end_x = Some(end_x);
        self
    }

    pub fn with_exclude(mut self, exclude: &[f64]) -> Self {
        self.exclude = exclude.to_vec();
        self
    }

    /// The fit range and exclusions of this dataset.
    pub fn window(&self) -> Result<FitWindow> {
        Ok(FitWindow {
            start_x: self.start_x,
            end_x: self.end_x,
            exclude: ExcludeRanges::from_pairs(&self.exclude)?,
        })
    }
}

/// Everything needed to run one fit.
///
/// # Examples
///
/// ```
/// use fitcore_rs::fit::{DatasetBinding, FitConfig};
///
/// let config = FitConfig::new("name=LinearBackground")
///     .with_dataset(DatasetBinding::new("run_1").with_range(0.0, 10.0))
///     .with_minimizer("Simplex")
///     .with_max_iterations(200);
///
/// let json = config.to_json().unwrap();
/// assert_eq!(FitConfig::from_json(&json).unwrap(), config);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Function definition string
    pub function: String,
    /// Datasets, one per domain of the fit
    pub datasets: Vec<DatasetBinding>,
    /// Extra tie list, e.g. `f1.Sigma=f0.Sigma,A1=2*A0`
    pub ties: Option<String>,
    /// Extra constraint list, e.g. `0<Sigma<2,Height>0`
    pub constraints: Option<String>,
    /// Penalty factor for the constraints of this config
    pub penalty_factor: Option<f64>,
    /// Minimizer name with optional `,Key=Value` options
    pub minimizer: String,
    pub cost_function: CostFunctionKind,
    pub max_iterations: usize,
    /// Store computed curves and build the parameter and covariance tables
    pub create_output: bool,
    /// Base name of the output workspaces and tables
    pub output: Option<String>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            function: String::new(),
            datasets: Vec::new(),
            ties: None,
            constraints: None,
            penalty_factor: None,
            minimizer: "Levenberg-Marquardt".to_string(),
            cost_function: CostFunctionKind::default(),
            max_iterations: 500,
            create_output: false,
            output: None,
        }
    }
}

impl FitConfig {
    pub fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            ..Self::default()
        }
    }

    pub fn with_dataset(mut self, dataset: DatasetBinding) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn with_minimizer(mut self, minimizer: &str) -> Self {
        self.minimizer = minimizer.to_string();
        self
    }

    pub fn with_cost_function(mut self, kind: CostFunctionKind) -> Self {
        self.cost_function = kind;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_ties(mut self, ties: &str) -> Self {
        self.ties = Some(ties.to_string());
        self
    }

    pub fn with_constraints(mut self, constraints: &str) -> Self {
        self.constraints = Some(constraints.to_string());
        self
    }

    pub fn with_penalty_factor(mut self, factor: f64) -> Self {
        self.penalty_factor = Some(factor);
        self
    }

    /// Request output workspaces and tables under `name`.
    pub fn with_output(mut self, name: &str) -> Self {
        self.create_output = true;
        self.output = Some(name.to_string());
        self
    }

    /// Base name for outputs; defaults to the first workspace name.
    pub fn output_name(&self) -> String {
        self.output.clone().unwrap_or_else(|| {
            self.datasets
                .first()
                .map_or_else(|| "Fit".to_string(), |d| d.workspace.clone())
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_sparse_json() {
        let config = FitConfig::from_json(
            r#"{"function": "name=FlatBackground", "datasets": [{"workspace": "ws"}],
                "cost_function": "Unweighted least squares"}"#,
        )
        .unwrap();
        assert_eq!(config.minimizer, "Levenberg-Marquardt");
        assert_eq!(config.max_iterations, 500);
        assert_eq!(config.cost_function, CostFunctionKind::UnweightedLeastSquares);
        assert_eq!(config.datasets[0].workspace_index, 0);
        assert_eq!(config.output_name(), "ws");
    }

    #[test]
    fn test_window() {
        let binding = DatasetBinding::new("ws")
            .with_range(1.0, 5.0)
            .with_exclude(&[2.0, 3.0]);
        let window = binding.window().unwrap();
        assert_eq!(window.start_x, Some(1.0));
        assert!(window.exclude.contains(2.5));
        assert!(DatasetBinding::new("ws").with_exclude(&[1.0]).window().is_err());
    }
}
