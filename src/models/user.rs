//! A function defined by a formula string.

use super::check_lengths;
use crate::error::{FitError, Result};
use crate::function::{Attribute, Evaluable};
use crate::parameters::expression::{Expression, SlotContext};

/// A function of `x` given by its `Formula` attribute, e.g. `a*x^2 + b`.
///
/// Every variable other than `x` becomes a parameter, in alphabetical order.
/// Setting a new formula resizes the parameter vector. No analytic
/// derivative is provided.
#[derive(Debug, Clone, Default)]
pub struct UserFunction {
    formula: String,
    names: Vec<String>,
    /// Parameters resolved to slots `0..n`, `x` to slot `n`
    compiled: Option<Expression>,
}

impl UserFunction {
    pub fn new(formula: &str) -> Result<Self> {
        let mut function = Self::default();
        function.set_formula(formula)?;
        Ok(function)
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    fn set_formula(&mut self, formula: &str) -> Result<()> {
        if formula.trim().is_empty() {
            *self = Self::default();
            return Ok(());
        }
        let expression = Expression::parse(formula).map_err(|e| FitError::InvalidAttribute {
            name: "Formula".to_string(),
            message: e.to_string(),
        })?;
        let names: Vec<String> = expression
            .variables()
            .into_iter()
            .filter(|v| v != "x")
            .collect();
        let x_slot = names.len();
        let compiled = expression
            .resolve(&|name: &str| {
                if name == "x" {
                    Some(x_slot)
                } else {
                    names.iter().position(|n| n == name)
                }
            })
            .map_err(|e| FitError::InvalidAttribute {
                name: "Formula".to_string(),
                message: e.to_string(),
            })?;

        self.formula = formula.to_string();
        self.names = names;
        self.compiled = Some(compiled);
        Ok(())
    }
}

impl Evaluable for UserFunction {
    fn type_name(&self) -> &str {
        "UserFunction"
    }

    fn parameter_declarations(&self) -> Vec<(String, f64)> {
        self.names.iter().map(|n| (n.clone(), 0.0)).collect()
    }

    fn attribute_names(&self) -> Vec<String> {
        vec!["Formula".to_string()]
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        match name {
            "Formula" => Ok(Attribute::Str(self.formula.clone())),
            _ => Err(FitError::UnknownAttribute(format!(
                "UserFunction has no attribute '{}'",
                name
            ))),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<()> {
        match (name, value) {
            ("Formula", Attribute::Str(formula)) => self.set_formula(&formula),
            ("Formula", other) => Err(FitError::InvalidAttribute {
                name: name.to_string(),
                message: format!("expected a string, got {}", other.kind_name()),
            }),
            _ => Err(FitError::UnknownAttribute(format!(
                "UserFunction has no attribute '{}'",
                name
            ))),
        }
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths(x, out.len())?;
        let Some(compiled) = &self.compiled else {
            out.fill(0.0);
            return Ok(());
        };
        let mut slots = params.to_vec();
        slots.push(0.0);
        let x_slot = params.len();
        for (o, &xi) in out.iter_mut().zip(x) {
            slots[x_slot] = xi;
            *o = compiled.evaluate(&SlotContext(&slots))?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Evaluable> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_formula_parameters() {
        let f = UserFunction::new("b + a*x^2").unwrap();
        let names: Vec<String> = f.parameter_declarations().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        let mut out = [0.0; 2];
        f.eval(&[2.0, 1.0], &[1.0, 3.0], &mut out).unwrap();
        assert_relative_eq!(out[0], 3.0);
        assert_relative_eq!(out[1], 19.0);
    }

    #[test]
    fn test_invalid_formula() {
        assert!(matches!(
            UserFunction::new("a*(x"),
            Err(FitError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_empty_formula() {
        let f = UserFunction::default();
        assert!(f.parameter_declarations().is_empty());
        let mut out = [1.0; 3];
        f.eval(&[], &[0.0, 1.0, 2.0], &mut out).unwrap();
        assert_eq!(out, [0.0; 3]);
    }
}
