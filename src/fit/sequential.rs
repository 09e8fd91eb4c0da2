use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use super::{CancellationToken, DataService, DatasetBinding, Fit, FitConfig, FitOutcome};
use crate::error::Result;
use crate::function::{FitFunction, FunctionFactory};
use crate::minimizers::MinimizerFactory;

/// Outcome of one dataset of a batch.
#[derive(Debug)]
pub struct SequentialResult {
    pub dataset: DatasetBinding,
    pub outcome: Result<FitOutcome>,
}

impl SequentialResult {
    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().map_or(false, FitOutcome::is_success)
    }
}

/// The same fit applied to many datasets, one after another.
///
/// Each dataset is fitted on its own. Unless disabled, a fit starts from the
/// parameters of the last successful one. A dataset that fails is recorded
/// and the batch moves on.
pub struct SequentialFit {
    template: FitConfig,
    datasets: Vec<DatasetBinding>,
    pass_parameters: bool,
    service: Arc<dyn DataService>,
    functions: Arc<FunctionFactory>,
    minimizers: Arc<MinimizerFactory>,
    cancel: CancellationToken,
}

impl SequentialFit {
    /// `template` supplies everything but the datasets.
    pub fn new(template: FitConfig, datasets: Vec<DatasetBinding>, service: Arc<dyn DataService>) -> Self {
        Self {
            template,
            datasets,
            pass_parameters: true,
            service,
            functions: Arc::new(FunctionFactory::with_defaults()),
            minimizers: Arc::new(MinimizerFactory::with_defaults()),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether each fit starts from the previous result. Default: true
    pub fn with_pass_parameters(mut self, pass: bool) -> Self {
        self.pass_parameters = pass;
        self
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

    fn config_for(&self, index: usize, dataset: &DatasetBinding) -> FitConfig {
        let mut config = self.template.clone();
        config.datasets = vec![dataset.clone()];
        if config.create_output {
            config.output = Some(format!("{}_{}", self.template.output_name(), index));
        }
        config
    }

    fn fit_for(&self, index: usize, dataset: &DatasetBinding) -> Fit {
        Fit::new(self.config_for(index, dataset), self.service.clone())
            .with_factories(self.functions.clone(), self.minimizers.clone())
            .with_cancellation(self.cancel.clone())
    }

    fn record(index: usize, dataset: &DatasetBinding, outcome: &Result<FitOutcome>) {
        match outcome {
            Ok(outcome) if outcome.is_success() => {
                info!(index, workspace = %dataset.workspace, chi2_over_dof = outcome.chi2_over_dof, "dataset fitted")
            }
            Ok(outcome) => {
                warn!(index, workspace = %dataset.workspace, status = %outcome.status, "dataset fit failed")
            }
            Err(err) => warn!(index, workspace = %dataset.workspace, error = %err, "dataset fit failed"),
        }
    }

    /// Fit the datasets in order. Stops early only when cancelled.
    pub fn run(&self) -> Vec<SequentialResult> {
        let mut results = Vec::with_capacity(self.datasets.len());
        let mut seed: Option<Box<dyn FitFunction>> = None;

        for (index, dataset) in self.datasets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(index, "batch cancelled");
                break;
            }
            let mut fit = self.fit_for(index, dataset);
            let outcome = match seed.as_ref().filter(|_| self.pass_parameters) {
                Some(function) => fit
                    .set_function_object(function.clone_box())
                    .and_then(|_| fit.execute()),
                None => fit.execute(),
            };
            Self::record(index, dataset, &outcome);
            if outcome.as_ref().map_or(false, FitOutcome::is_success) {
                seed = fit.into_function();
            }
            results.push(SequentialResult {
                dataset: dataset.clone(),
                outcome,
            });
        }
        results
    }

    /// Fit every dataset independently on the rayon thread pool, each from
    /// the template's starting values. Results keep the dataset order.
    pub fn run_parallel(&self) -> Vec<SequentialResult> {
        self.datasets
            .par_iter()
            .enumerate()
            .map(|(index, dataset)| {
                let outcome = self.fit_for(index, dataset).execute();
                Self::record(index, dataset, &outcome);
                SequentialResult {
                    dataset: dataset.clone(),
                    outcome,
                }
            })
            .collect()
    }
}
