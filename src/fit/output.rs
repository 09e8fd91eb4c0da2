//! Tables and workspaces produced by a fit.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::data_service::{Spectrum, Workspace};
use crate::domain::FitData;
use crate::error::Result;
use crate::function::FitFunction;

/// Name of the last row of a parameter table.
pub const COST_FUNCTION_ROW: &str = "Cost function value";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRow {
    pub name: String,
    pub value: f64,
    pub error: f64,
}

/// Fitted parameters with their errors, followed by a
/// `Cost function value` row holding chi-square over degrees of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    pub name: String,
    pub rows: Vec<ParameterRow>,
}

impl ParameterTable {
    pub(crate) fn build(name: String, function: &dyn FitFunction, chi2_over_dof: f64) -> Result<Self> {
        let mut rows = Vec::with_capacity(function.n_params() + 1);
        for i in 0..function.n_params() {
            let param = function.parameter(i)?;
            rows.push(ParameterRow {
                name: function.parameter_name(i)?,
                value: param.value(),
                error: param.error().unwrap_or(0.0),
            });
        }
        rows.push(ParameterRow {
            name: COST_FUNCTION_ROW.to_string(),
            value: chi2_over_dof,
            error: 0.0,
        });
        Ok(Self { name, rows })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterRow> {
        self.rows.iter().find(|row| row.name == name)
    }
}

/// Correlations of the free parameters in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceTable {
    pub name: String,
    pub parameters: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CovarianceTable {
    pub(crate) fn new(name: String, parameters: Vec<String>, matrix: &Array2<f64>) -> Self {
        let values = matrix.outer_iter().map(|row| row.to_vec()).collect();
        Self {
            name,
            parameters,
            values,
        }
    }

    /// Entry for a pair of parameter names.
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let i = self.parameters.iter().position(|p| p == row)?;
        let j = self.parameters.iter().position(|p| p == column)?;
        Some(self.values[i][j])
    }
}

/// One workspace per dataset with `data`, `calc` and `diff` spectra over
/// every point in the fit range, including excluded ones. `calculated`
/// holds the model over the whole joint domain.
pub(crate) fn curve_workspaces(data: &FitData, calculated: &[f64]) -> Result<Vec<Workspace>> {
    let domain = data.domain();
    let values = data.values();
    let mut workspaces = Vec::with_capacity(domain.n_domains());
    for d in 0..domain.n_domains() {
        let range = domain.range(d);
        let x = domain.domain(d).x().to_vec();
        let y = values.observed()[range.clone()].to_vec();
        let e = values.errors()[range.clone()].to_vec();
        let calc = calculated[range].to_vec();
        let diff: Vec<f64> = y.iter().zip(&calc).map(|(y, c)| y - c).collect();
        let zeros = vec![0.0; x.len()];

        let mut workspace = Workspace::new();
        workspace.push("data", Spectrum::new(x.clone(), y, e)?);
        workspace.push("calc", Spectrum::new(x.clone(), calc, zeros.clone())?);
        workspace.push("diff", Spectrum::new(x, diff, zeros)?);
        workspaces.push(workspace);
    }
    Ok(workspaces)
}
