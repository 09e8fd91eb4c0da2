use std::collections::BTreeMap;
use std::fmt;

use super::{CompositeFunction, CompositeKind, FitFunction, ParamFunction};
use crate::error::{FitError, Result};
use crate::models::{
    ExpDecay, FlatBackground, Gaussian, LinearBackground, Lorentzian, Polynomial, Quadratic,
    UserFunction,
};

type Creator = Box<dyn Fn() -> Result<Box<dyn FitFunction>> + Send + Sync>;

/// Registry of function types by name.
///
/// # Examples
///
/// ```
/// use fitcore_rs::function::{FitFunction, FunctionFactory};
///
/// let factory = FunctionFactory::with_defaults();
/// let gaussian = factory.create("Gaussian").unwrap();
/// assert_eq!(gaussian.n_params(), 3);
/// assert!(factory.create("Voigt").is_err());
/// ```
pub struct FunctionFactory {
    creators: BTreeMap<String, Creator>,
    composites: BTreeMap<String, CompositeKind>,
}

impl FunctionFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
            composites: BTreeMap::new(),
        }
    }

    /// A factory with every built-in function and composite type.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("FlatBackground", || ParamFunction::new(FlatBackground));
        factory.register("LinearBackground", || ParamFunction::new(LinearBackground));
        factory.register("Quadratic", || ParamFunction::new(Quadratic));
        factory.register("Polynomial", || ParamFunction::new(Polynomial::default()));
        factory.register("Gaussian", || ParamFunction::new(Gaussian));
        factory.register("Lorentzian", || ParamFunction::new(Lorentzian));
        factory.register("ExpDecay", || ParamFunction::new(ExpDecay));
        factory.register("UserFunction", || ParamFunction::new(UserFunction::default()));
        for kind in [
            CompositeKind::Sum,
            CompositeKind::Product,
            CompositeKind::MultiDomain,
        ] {
            factory.composites.insert(kind.type_name().to_string(), kind);
        }
        factory
    }

    /// Register a function type under `name`, replacing any previous entry.
    pub fn register<F, T>(&mut self, name: &str, create: F)
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
        T: FitFunction + 'static,
    {
        self.creators.insert(
            name.to_string(),
            Box::new(move || Ok(Box::new(create()?) as Box<dyn FitFunction>)),
        );
    }

    /// Create a function with default parameters and attributes.
    pub fn create(&self, name: &str) -> Result<Box<dyn FitFunction>> {
        let name = name.trim();
        if let Some(kind) = self.composites.get(name) {
            return Ok(Box::new(CompositeFunction::new(*kind)));
        }
        match self.creators.get(name) {
            Some(create) => create(),
            None => Err(FitError::UnknownFunctionType(name.to_string())),
        }
    }

    /// Create an empty composite of a registered composite type.
    pub fn create_composite(&self, name: &str) -> Result<CompositeFunction> {
        self.composites
            .get(name.trim())
            .map(|kind| CompositeFunction::new(*kind))
            .ok_or_else(|| FitError::UnknownFunctionType(name.to_string()))
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.composites.contains_key(name.trim())
    }

    /// Names of every registered type.
    pub fn names(&self) -> Vec<String> {
        self.creators
            .keys()
            .chain(self.composites.keys())
            .cloned()
            .collect()
    }
}

impl Default for FunctionFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for FunctionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionFactory")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let factory = FunctionFactory::with_defaults();
        for name in ["FlatBackground", "Gaussian", "Polynomial", "UserFunction"] {
            assert_eq!(factory.create(name).unwrap().name(), name);
        }
        let composite = factory.create("ProductFunction").unwrap();
        assert_eq!(composite.n_params(), 0);
        assert!(factory.is_composite("MultiDomainFunction"));
    }

    #[test]
    fn test_unknown_type() {
        let factory = FunctionFactory::with_defaults();
        assert!(matches!(
            factory.create("Voigt"),
            Err(FitError::UnknownFunctionType(name)) if name == "Voigt"
        ));
    }

    #[test]
    fn test_register() {
        let mut factory = FunctionFactory::new();
        factory.register("Shifted", || {
            ParamFunction::new(Gaussian)?.with_parameter("PeakCentre", 5.0)
        });
        let f = factory.create("Shifted").unwrap();
        assert_eq!(f.get_parameter_by_name("PeakCentre").unwrap(), 5.0);
    }
}
