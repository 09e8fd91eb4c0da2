//! Ordered parameter storage for a single function
//!
//! The store keeps parameters in declaration order, which is also the order
//! of the function's parameter vector. Names are unique within a store.

use std::collections::HashMap;

use crate::error::{FitError, Result};
use crate::parameters::bounds::BoundConstraint;
use crate::parameters::expression::Expression;
use crate::parameters::parameter::Parameter;
use crate::parameters::ties::{order_ties, parse_tie, ResolvedTie, TieDefinition};

/// Parameters owned by one primitive function.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    params: Vec<Parameter>,
    lookup: HashMap<String, usize>,
}

impl ParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from `(name, default value)` pairs.
    pub fn from_declarations(declarations: &[(String, f64)]) -> Result<Self> {
        let mut store = Self::new();
        for (name, value) in declarations {
            store.declare(name, *value)?;
        }
        Ok(store)
    }

    /// Declare a new parameter at the end of the vector.
    ///
    /// # Returns
    ///
    /// The index of the new parameter, or an error if the name is taken
    pub fn declare(&mut self, name: &str, value: f64) -> Result<usize> {
        if self.lookup.contains_key(name) {
            return Err(FitError::InvalidInput(format!(
                "Parameter '{}' declared twice",
                name
            )));
        }
        let index = self.params.len();
        self.params.push(Parameter::new(name, value));
        self.lookup.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(Parameter::value).collect()
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    pub fn get(&self, index: usize) -> Result<&Parameter> {
        self.params
            .get(index)
            .ok_or_else(|| FitError::UnknownParameter(format!("index {}", index)))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        self.params
            .get_mut(index)
            .ok_or_else(|| FitError::UnknownParameter(format!("index {}", index)))
    }

    /// Set a parameter value by name.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self.index_of(name)?;
        self.params[index].set_value(value);
        Ok(())
    }

    /// Tie a parameter to a formula over the other parameters of this store.
    ///
    /// A formula without variables fixes the parameter at its value instead.
    /// Fails with `InvalidTieExpression` if the formula does not parse,
    /// references unknown names, or closes a cycle.
    pub fn tie(&mut self, name: &str, formula: &str) -> Result<()> {
        let target = self.index_of(name)?;
        match parse_tie(formula)? {
            TieDefinition::Constant(value) => {
                let param = &mut self.params[target];
                param.set_tie(None);
                param.set_value(value);
                param.set_fixed(true);
                Ok(())
            }
            TieDefinition::Formula(expression) => {
                let resolved = self.resolve(&expression).map_err(|missing| {
                    FitError::InvalidTieExpression {
                        expression: formula.to_string(),
                        message: format!("unknown parameter '{}'", missing),
                    }
                })?;
                if resolved.parameters().contains(&target) {
                    return Err(FitError::InvalidTieExpression {
                        expression: formula.to_string(),
                        message: format!("'{}' cannot be tied to itself", name),
                    });
                }

                let previous = self.params[target].tie().map(str::to_string);
                self.params[target].set_tie(Some(formula.to_string()));
                let ties = self.resolved_ties()?;
                if order_ties(&ties).is_err() {
                    self.params[target].set_tie(previous);
                    return Err(FitError::InvalidTieExpression {
                        expression: formula.to_string(),
                        message: "circular tie dependency".to_string(),
                    });
                }
                self.params[target].set_fixed(false);
                Ok(())
            }
        }
    }

    /// Remove the tie on a parameter; the parameter keeps its current value.
    pub fn remove_tie(&mut self, name: &str) -> Result<()> {
        let index = self.index_of(name)?;
        self.params[index].set_tie(None);
        Ok(())
    }

    /// Hold a parameter at its current value.
    pub fn fix(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?.set_fixed(true);
        Ok(())
    }

    /// Let a fixed parameter vary again.
    pub fn free(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?.set_fixed(false);
        Ok(())
    }

    /// Attach a bound constraint to a parameter.
    pub fn add_constraint(&mut self, name: &str, bound: BoundConstraint) -> Result<()> {
        let index = self.index_of(name)?;
        self.params[index].set_bound(Some(bound));
        Ok(())
    }

    /// Ties of this store resolved to local parameter positions.
    pub fn resolved_ties(&self) -> Result<Vec<ResolvedTie>> {
        let mut ties = Vec::new();
        for (target, param) in self.params.iter().enumerate() {
            let Some(formula) = param.tie() else {
                continue;
            };
            let expression =
                Expression::parse(formula).map_err(|e| FitError::InvalidTieExpression {
                    expression: formula.to_string(),
                    message: e.to_string(),
                })?;
            let expression =
                self.resolve(&expression)
                    .map_err(|missing| FitError::StaleTieReference {
                        parameter: param.name().to_string(),
                        missing,
                    })?;
            ties.push(ResolvedTie { target, expression });
        }
        Ok(ties)
    }

    /// Replace the declared parameter list, keeping state by name.
    ///
    /// Parameters whose names survive keep their value, fixed flag, tie and
    /// bound. New parameters take their default values. Ties and bounds on
    /// removed parameters disappear with them. If a surviving tie would
    /// reference a removed parameter the resize is rejected with
    /// `StaleTieReference` and the store is left unchanged.
    pub fn resize(&mut self, declarations: &[(String, f64)]) -> Result<()> {
        let mut params = Vec::with_capacity(declarations.len());
        let mut lookup = HashMap::with_capacity(declarations.len());
        for (name, default) in declarations {
            if lookup.contains_key(name) {
                return Err(FitError::InvalidInput(format!(
                    "Parameter '{}' declared twice",
                    name
                )));
            }
            let param = match self.lookup.get(name) {
                Some(&old) => self.params[old].clone(),
                None => Parameter::new(name, *default),
            };
            lookup.insert(name.clone(), params.len());
            params.push(param);
        }

        for param in &params {
            let Some(formula) = param.tie() else {
                continue;
            };
            let expression =
                Expression::parse(formula).map_err(|e| FitError::InvalidTieExpression {
                    expression: formula.to_string(),
                    message: e.to_string(),
                })?;
            if let Some(missing) = expression
                .variables()
                .into_iter()
                .find(|v| !lookup.contains_key(v))
            {
                return Err(FitError::StaleTieReference {
                    parameter: param.name().to_string(),
                    missing,
                });
            }
        }

        self.params = params;
        self.lookup = lookup;
        Ok(())
    }

    fn resolve(&self, expression: &Expression) -> std::result::Result<Expression, String> {
        expression
            .resolve(&|name: &str| self.lookup.get(name).copied())
            .map_err(|e| match e {
                crate::parameters::expression::ExpressionError::UndefinedVariable { name } => name,
                other => other.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polynomial_declarations(order: usize) -> Vec<(String, f64)> {
        (0..=order).map(|i| (format!("A{}", i), 0.0)).collect()
    }

    #[test]
    fn test_declare_and_lookup() {
        let mut store = ParameterStore::new();
        store.declare("Height", 1.0).unwrap();
        store.declare("Sigma", 0.5).unwrap();
        assert!(store.declare("Height", 2.0).is_err());

        assert_eq!(store.len(), 2);
        assert_eq!(store.index_of("Sigma").unwrap(), 1);
        assert!(matches!(
            store.set_parameter("Width", 1.0),
            Err(FitError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_tie_validation() {
        let mut store =
            ParameterStore::from_declarations(&polynomial_declarations(2)).unwrap();

        store.tie("A2", "A1 / 2").unwrap();
        assert!(store.get(2).unwrap().is_tied());

        assert!(matches!(
            store.tie("A0", "A7 + 1"),
            Err(FitError::InvalidTieExpression { .. })
        ));
        assert!(matches!(
            store.tie("A0", "A0 * 2"),
            Err(FitError::InvalidTieExpression { .. })
        ));
        // A1 -> A2 -> A1
        assert!(matches!(
            store.tie("A1", "A2 + 1"),
            Err(FitError::InvalidTieExpression { .. })
        ));
        assert!(!store.get(1).unwrap().is_tied());
    }

    #[test]
    fn test_constant_tie_fixes() {
        let mut store =
            ParameterStore::from_declarations(&polynomial_declarations(1)).unwrap();
        store.tie("A1", "2.5").unwrap();
        let param = store.get(1).unwrap();
        assert!(param.is_fixed());
        assert!(!param.is_tied());
        assert_eq!(param.value(), 2.5);
    }

    #[test]
    fn test_resize_keeps_values_by_name() {
        let mut store =
            ParameterStore::from_declarations(&polynomial_declarations(3)).unwrap();
        for i in 0..4 {
            store.get_mut(i).unwrap().set_value(i as f64 + 1.0);
        }
        store.fix(1).unwrap();

        store.resize(&polynomial_declarations(1)).unwrap();
        assert_eq!(store.values(), vec![1.0, 2.0]);
        assert!(store.get(1).unwrap().is_fixed());

        store.resize(&polynomial_declarations(3)).unwrap();
        assert_eq!(store.values(), vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_resize_rejects_stale_tie() {
        let mut store =
            ParameterStore::from_declarations(&polynomial_declarations(3)).unwrap();
        store.tie("A0", "A3 * 2").unwrap();

        let err = store.resize(&polynomial_declarations(2)).unwrap_err();
        assert!(matches!(err, FitError::StaleTieReference { .. }));
        assert_eq!(store.len(), 4);

        // A tie whose target disappears is simply dropped
        store.remove_tie("A0").unwrap();
        store.tie("A3", "A0 * 2").unwrap();
        store.resize(&polynomial_declarations(2)).unwrap();
        assert!(store.resolved_ties().unwrap().is_empty());
    }
}
