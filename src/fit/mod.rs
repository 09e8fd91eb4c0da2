//! # Fit
//!
//! The [`Fit`] orchestrator ties everything together: it parses the function
//! definition, reads the datasets from a [`DataService`], builds the cost
//! function and minimizer named in the [`FitConfig`], runs the iteration
//! loop and writes the result back into the function.
//!
//! Setup problems (bad definitions, missing workspaces, empty ranges) are
//! returned as errors before any iteration. Numerical trouble during the
//! iterations only shows up in the status of the [`FitOutcome`].

mod cancel;
mod config;
pub mod covariance;
mod data_service;
mod output;
mod sequential;

pub use cancel::CancellationToken;
pub use config::{DatasetBinding, FitConfig};
pub use data_service::{DataService, InMemoryDataService, Spectrum, Workspace};
pub use output::{CovarianceTable, ParameterRow, ParameterTable, COST_FUNCTION_ROW};
pub use sequential::{SequentialFit, SequentialResult};

use std::fmt;
use std::sync::Arc;

use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::cost::{CostFunction, LeastSquares};
use crate::domain::FitData;
use crate::error::{FitError, Result};
use crate::function::parser::{apply_ties, parse_constraint, parse_function};
use crate::function::{FitFunction, FunctionFactory};
use crate::minimizers::{Minimizer, MinimizerFactory, MinimizerState};

/// Result of one fit invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// `success`, or why the minimizer stopped
    pub status: String,
    pub state: MinimizerState,
    /// Final cost function value
    pub cost: f64,
    pub chi2_over_dof: f64,
    pub degrees_of_freedom: usize,
    pub iterations: usize,
    /// Fitted function in definition-string form
    pub function: String,
    pub parameters: ParameterTable,
    /// Present when output was requested and the covariance could be computed
    pub covariance: Option<CovarianceTable>,
    /// Names of the workspaces stored in the data service
    pub output_workspaces: Vec<String>,
}

impl FitOutcome {
    pub fn is_success(&self) -> bool {
        self.state == MinimizerState::Converged
    }
}

impl fmt::Display for FitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations, Chi2/DoF = {:.6}",
            self.status, self.iterations, self.chi2_over_dof
        )
    }
}

/// A single fit of one function to one or more datasets.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use fitcore_rs::fit::{DatasetBinding, Fit, FitConfig, InMemoryDataService, Spectrum, Workspace};
/// use fitcore_rs::fit::DataService;
///
/// let x: Vec<f64> = (0..30).map(f64::from).collect();
/// let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
/// let service = Arc::new(InMemoryDataService::new());
/// service
///     .store("line", Workspace::from_spectrum(Spectrum::unweighted(x, y).unwrap()))
///     .unwrap();
///
/// let config = FitConfig::new("name=LinearBackground,A0=0,A1=0")
///     .with_dataset(DatasetBinding::new("line"));
/// let mut fit = Fit::new(config, service);
/// let outcome = fit.execute().unwrap();
///
/// assert_eq!(outcome.status, "success");
/// let line = fit.function().unwrap();
/// assert!((line.get_parameter_by_name("A1").unwrap() - 2.0).abs() < 1e-6);
/// ```
pub struct Fit {
    config: FitConfig,
    function: Option<Box<dyn FitFunction>>,
    service: Arc<dyn DataService>,
    functions: Arc<FunctionFactory>,
    minimizers: Arc<MinimizerFactory>,
    cancel: CancellationToken,
}

impl Fit {
    /// A fit with the built-in function and minimizer registries.
    pub fn new(config: FitConfig, service: Arc<dyn DataService>) -> Self {
        Self {
            config,
            function: None,
            service,
            functions: Arc::new(FunctionFactory::with_defaults()),
            minimizers: Arc::new(MinimizerFactory::with_defaults()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_factories(
        mut self,
        functions: Arc<FunctionFactory>,
        minimizers: Arc<MinimizerFactory>,
    ) -> Self {
        self.functions = functions;
        self.minimizers = minimizers;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FitConfig {
        &mut self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Parse and set the function. Definition errors surface here, before
    /// any fit is run.
    pub fn set_function(&mut self, definition: &str) -> Result<()> {
        let function = parse_function(definition, &self.functions)?;
        self.config.function = definition.to_string();
        self.function = Some(function);
        Ok(())
    }

    /// Set an already built function. A composite without members is
    /// rejected with `EmptyFunction`; members without parameters are fine.
    pub fn set_function_object(&mut self, function: Box<dyn FitFunction>) -> Result<()> {
        if function.member_count() == Some(0) {
            return Err(FitError::EmptyFunction(format!(
                "{} has no member functions",
                function.name()
            )));
        }
        self.config.function = function.to_definition();
        self.function = Some(function);
        Ok(())
    }

    pub fn with_function(mut self, function: Box<dyn FitFunction>) -> Result<Self> {
        self.set_function_object(function)?;
        Ok(self)
    }

    /// The function, with fitted values once a fit has run.
    pub fn function(&self) -> Option<&dyn FitFunction> {
        self.function.as_deref()
    }

    pub fn into_function(self) -> Option<Box<dyn FitFunction>> {
        self.function
    }

    pub fn add_dataset(&mut self, dataset: DatasetBinding) {
        self.config.datasets.push(dataset);
    }

    /// The function to fit with the config's extra ties and constraints.
    fn prepared_function(&mut self) -> Result<Box<dyn FitFunction>> {
        if self.function.is_none() {
            let definition = self.config.function.clone();
            self.set_function(&definition)?;
        }
        let mut function = match &self.function {
            Some(function) => function.clone_box(),
            None => return Err(FitError::EmptyFunction("no function set".to_string())),
        };

        if let Some(ties) = &self.config.ties {
            apply_ties(function.as_mut(), ties)?;
        }
        if let Some(constraints) = &self.config.constraints {
            for item in constraints.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                let (name, mut bound) = parse_constraint(item)?;
                if let Some(factor) = self.config.penalty_factor {
                    bound = bound.with_penalty_factor(factor)?;
                }
                function.add_constraint(&name, bound)?;
            }
        }
        Ok(function)
    }

    /// Read every bound dataset into one joint domain.
    fn load_data(&self) -> Result<FitData> {
        if self.config.datasets.is_empty() {
            return Err(FitError::InvalidInput(
                "no input workspace given".to_string(),
            ));
        }
        let mut data = FitData::new();
        for binding in &self.config.datasets {
            let workspace = self.service.retrieve(&binding.workspace)?;
            let spectrum = workspace.spectrum(binding.workspace_index)?;
            data.add_dataset(&spectrum.x, &spectrum.y, &spectrum.e, &binding.window()?)?;
        }
        Ok(data)
    }

    /// Run the fit.
    ///
    /// Returns an error for setup problems and for fatal errors during the
    /// iterations; in that case the function keeps its previous values.
    /// Otherwise the fitted values and errors are written back, including
    /// after a failed or cancelled run.
    pub fn execute(&mut self) -> Result<FitOutcome> {
        let function = self.prepared_function()?;
        let data = self.load_data()?;
        let mut cost = LeastSquares::new(function, data, self.config.cost_function)?;
        let mut minimizer = self.minimizers.create(&self.config.minimizer)?;
        let max_iterations = self.config.max_iterations;

        info!(
            function = %self.config.function,
            minimizer = minimizer.name(),
            cost_function = cost.name(),
            points = cost.n_data(),
            free_parameters = cost.n_params(),
            "starting fit"
        );

        let (state, status, iterations) = if cost.n_params() == 0 {
            // Nothing to optimize: evaluate only
            match cost.val() {
                Ok(_) => (MinimizerState::Converged, "success".to_string(), 0),
                Err(err) if err.is_recoverable() => (MinimizerState::Failed, err.to_string(), 0),
                Err(err) => return Err(err),
            }
        } else {
            self.iterate(&mut cost, minimizer.as_mut(), max_iterations)?;
            (
                minimizer.state(),
                minimizer.status_string(),
                minimizer.status().iterations,
            )
        };

        let final_cost = match cost.val() {
            Ok(value) => value,
            Err(err) if err.is_recoverable() => minimizer.final_cost_value(),
            Err(err) => return Err(err),
        };
        let n_free = cost.n_params();
        let degrees_of_freedom = cost.n_data().saturating_sub(n_free);
        let chi2_over_dof = final_cost / degrees_of_freedom.max(1) as f64;

        let covariance_matrix = self.write_errors(&mut cost, minimizer.as_ref(), chi2_over_dof);
        let output = self.config.output_name();
        let covariance = match covariance_matrix {
            Some(matrix) if self.config.create_output => {
                let names = cost
                    .active_indices()
                    .iter()
                    .map(|&j| cost.function().parameter_name(j))
                    .collect::<Result<Vec<_>>>()?;
                Some(CovarianceTable::new(
                    format!("{}_NormalisedCovarianceMatrix", output),
                    names,
                    &covariance::normalised_covariance(&matrix),
                ))
            }
            _ => None,
        };
        let output_workspaces = if self.config.create_output {
            self.store_curves(&mut cost, &output)?
        } else {
            Vec::new()
        };
        let parameters = ParameterTable::build(
            format!("{}_Parameters", output),
            cost.function(),
            chi2_over_dof,
        )?;

        info!(%status, chi2_over_dof, iterations, "fit finished");
        let function = cost.into_function();
        let outcome = FitOutcome {
            status,
            state,
            cost: final_cost,
            chi2_over_dof,
            degrees_of_freedom,
            iterations,
            function: function.to_definition(),
            parameters,
            covariance,
            output_workspaces,
        };
        self.function = Some(function);
        Ok(outcome)
    }

    /// The iteration loop. The minimizer is re-initialized whenever the
    /// function changes its parameter count between iterations.
    fn iterate(
        &self,
        cost: &mut LeastSquares,
        minimizer: &mut dyn Minimizer,
        max_iterations: usize,
    ) -> Result<()> {
        minimizer.initialize(cost, max_iterations)?;
        for iteration in 0..max_iterations {
            if self.cancel.is_cancelled() {
                info!(iteration, "fit cancelled");
                minimizer.status_mut().state = MinimizerState::Cancelled;
                return Ok(());
            }

            let more = minimizer.iterate(cost, iteration)?;
            cost.function_mut().iteration_finished();
            debug!(iteration, cost = minimizer.final_cost_value(), "iteration finished");

            if cost.layout_changed() {
                warn!(
                    iteration,
                    parameters = cost.function().n_params(),
                    "function changed its parameters, re-initializing the minimizer"
                );
                cost.refresh()?;
                let iterations = minimizer.status().iterations;
                minimizer.initialize(cost, max_iterations - iteration)?;
                minimizer.status_mut().iterations = iterations;
                continue;
            }
            if !more {
                return Ok(());
            }
        }

        if !minimizer.state().is_terminal() {
            minimizer.status_mut().state = MinimizerState::MaxIterationsReached;
        }
        Ok(())
    }

    /// Store parameter errors in the function and return the covariance of
    /// the free parameters when it can be computed.
    fn write_errors(
        &self,
        cost: &mut LeastSquares,
        minimizer: &dyn Minimizer,
        chi2_over_dof: f64,
    ) -> Option<ndarray::Array2<f64>> {
        let scale = if cost.kind().is_weighted() {
            1.0
        } else {
            chi2_over_dof
        };
        let covariance = cost
            .weighted_jacobian()
            .and_then(|jacobian| covariance::calculate_covariance(&jacobian, scale));
        let covariance = match covariance {
            Ok(matrix) => Some(matrix),
            Err(err) => {
                warn!(error = %err, "parameter errors could not be computed");
                None
            }
        };

        let errors: Array1<f64> = match (minimizer.parameter_errors(), &covariance) {
            (Some(errors), _) if errors.len() == cost.n_params() => errors,
            (_, Some(matrix)) => covariance::standard_errors_from_covariance(matrix),
            _ => Array1::zeros(cost.n_params()),
        };

        let active = cost.active_indices().to_vec();
        let function = cost.function_mut();
        for i in 0..function.n_params() {
            let error = active.iter().position(|&j| j == i).map_or(0.0, |k| errors[k]);
            if let Ok(param) = function.parameter_mut(i) {
                param.set_error(Some(error));
            }
        }
        covariance
    }

    /// Store `data`, `calc` and `diff` curves for every dataset.
    fn store_curves(&self, cost: &mut LeastSquares, output: &str) -> Result<Vec<String>> {
        cost.calculate()?;
        let calculated = cost.data().values().calculated().to_vec();
        let workspaces = output::curve_workspaces(cost.data(), &calculated)?;
        let single = workspaces.len() == 1;
        let mut names = Vec::with_capacity(workspaces.len());
        for (i, workspace) in workspaces.into_iter().enumerate() {
            let name = if single {
                format!("{}_Workspace", output)
            } else {
                format!("{}_Workspace_{}", output, i)
            };
            self.service.store(&name, workspace)?;
            names.push(name);
        }
        Ok(names)
    }
}

impl fmt::Debug for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fit")
            .field("config", &self.config)
            .field("function", &self.function)
            .finish()
    }
}
