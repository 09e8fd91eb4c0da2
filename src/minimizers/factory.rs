use std::collections::BTreeMap;
use std::fmt;

use super::{
    Bfgs, ConjugateGradient, DampedGaussNewton, Fabada, LevenbergMarquardt, Minimizer, Simplex,
    SteepestDescent,
};
use crate::error::{FitError, Result};

type Creator = Box<dyn Fn() -> Box<dyn Minimizer> + Send + Sync>;

/// Registry of minimizers by name.
///
/// A minimizer description is the name optionally followed by
/// comma-separated `Key=Value` options:
///
/// ```
/// use fitcore_rs::minimizers::MinimizerFactory;
///
/// let factory = MinimizerFactory::with_defaults();
/// let simplex = factory.create("Simplex,SizeTolerance=1e-8").unwrap();
/// assert_eq!(simplex.name(), "Simplex");
/// assert!(factory.create("Newton").is_err());
/// ```
pub struct MinimizerFactory {
    creators: BTreeMap<String, Creator>,
}

impl MinimizerFactory {
    pub fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    /// A factory with every built-in minimizer.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("Levenberg-Marquardt", LevenbergMarquardt::new);
        factory.register("Levenberg-MarquardtMD", LevenbergMarquardt::more);
        factory.register("Simplex", Simplex::new);
        factory.register("SteepestDescent", SteepestDescent::new);
        factory.register(
            "Conjugate gradient (Fletcher-Reeves imp.)",
            ConjugateGradient::fletcher_reeves,
        );
        factory.register(
            "Conjugate gradient (Polak-Ribiere imp.)",
            ConjugateGradient::polak_ribiere,
        );
        factory.register("BFGS", Bfgs::new);
        factory.register("Damped GaussNewton", DampedGaussNewton::new);
        factory.register("FABADA", Fabada::new);
        factory
    }

    /// Register a minimizer under `name`, replacing any previous entry.
    pub fn register<F, M>(&mut self, name: &str, create: F)
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Minimizer + 'static,
    {
        self.creators.insert(
            name.to_string(),
            Box::new(move || Box::new(create()) as Box<dyn Minimizer>),
        );
    }

    /// Create a minimizer from `Name[,Key=Value...]`.
    pub fn create(&self, description: &str) -> Result<Box<dyn Minimizer>> {
        let mut parts = description.split(',');
        let name = parts.next().unwrap_or_default().trim();
        let create = self
            .creators
            .get(name)
            .ok_or_else(|| FitError::UnknownMinimizer(name.to_string()))?;
        let mut minimizer = create();
        for option in parts.map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = option.split_once('=').ok_or_else(|| {
                FitError::InvalidInput(format!("minimizer option '{}' is not Key=Value", option))
            })?;
            minimizer.set_option(key.trim(), value.trim())?;
        }
        Ok(minimizer)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }
}

impl Default for MinimizerFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for MinimizerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinimizerFactory")
            .field("minimizers", &self.creators.keys().collect::<Vec<_>>())
            .finish()
    }
}
