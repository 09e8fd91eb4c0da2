use std::fmt;

use ndarray::ArrayViewMut2;
use tracing::warn;

use super::{parameter_clauses, Attribute, FitFunction};
use crate::error::{FitError, Result};
use crate::parameters::parameter::Parameter;
use crate::parameters::store::ParameterStore;
use crate::parameters::ties::ResolvedTie;
use crate::utils::finite_difference::central_difference_jacobian;

/// The mathematical part of a primitive function.
///
/// An `Evaluable` knows its parameter names and defaults and how to evaluate
/// itself for an explicit parameter vector. Parameter state lives in the
/// [`ParamFunction`] that wraps it.
pub trait Evaluable: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    /// `(name, default value)` for every parameter, in vector order.
    fn parameter_declarations(&self) -> Vec<(String, f64)>;

    fn attribute_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        Err(FitError::UnknownAttribute(format!(
            "{} has no attribute '{}'",
            self.type_name(),
            name
        )))
    }

    /// Change an attribute. The wrapper re-reads the parameter declarations
    /// afterwards, so attributes may change the parameter count.
    fn set_attribute(&mut self, name: &str, _value: Attribute) -> Result<()> {
        Err(FitError::UnknownAttribute(format!(
            "{} has no attribute '{}'",
            self.type_name(),
            name
        )))
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()>;

    /// Analytic derivatives, if the kind provides them.
    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        None
    }

    fn clone_box(&self) -> Box<dyn Evaluable>;
}

/// Analytic derivatives of an [`Evaluable`].
pub trait Differentiable {
    /// Write `d f(x_i) / d p_j` into `jacobian[[i, j]]`.
    fn eval_deriv(&self, params: &[f64], x: &[f64], jacobian: ArrayViewMut2<'_, f64>)
        -> Result<()>;
}

impl Clone for Box<dyn Evaluable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A primitive function: an [`Evaluable`] plus its parameters.
#[derive(Debug, Clone)]
pub struct ParamFunction {
    kind: Box<dyn Evaluable>,
    params: ParameterStore,
}

impl ParamFunction {
    /// Wrap an evaluable kind, declaring its parameters at their defaults.
    pub fn new<E: Evaluable + 'static>(kind: E) -> Result<Self> {
        Self::from_box(Box::new(kind))
    }

    pub fn from_box(kind: Box<dyn Evaluable>) -> Result<Self> {
        let params = ParameterStore::from_declarations(&kind.parameter_declarations())?;
        Ok(Self { kind, params })
    }

    /// Builder-style parameter assignment by name.
    pub fn with_parameter(mut self, name: &str, value: f64) -> Result<Self> {
        self.params.set_parameter(name, value)?;
        Ok(self)
    }

    pub fn kind(&self) -> &dyn Evaluable {
        self.kind.as_ref()
    }

    pub fn store(&self) -> &ParameterStore {
        &self.params
    }
}

impl FitFunction for ParamFunction {
    fn name(&self) -> &str {
        self.kind.type_name()
    }

    fn n_params(&self) -> usize {
        self.params.len()
    }

    fn parameter_name(&self, index: usize) -> Result<String> {
        Ok(self.params.get(index)?.name().to_string())
    }

    fn parameter(&self, index: usize) -> Result<&Parameter> {
        self.params.get(index)
    }

    fn parameter_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        self.params.get_mut(index)
    }

    fn parameter_index(&self, name: &str) -> Result<usize> {
        self.params.index_of(name)
    }

    fn tie(&mut self, name: &str, formula: &str) -> Result<()> {
        self.params.tie(name, formula)
    }

    fn remove_tie(&mut self, name: &str) -> Result<()> {
        self.params.remove_tie(name)
    }

    fn is_tied(&self, index: usize) -> bool {
        self.params.get(index).map_or(false, Parameter::is_tied)
    }

    fn resolved_ties(&self) -> Result<Vec<ResolvedTie>> {
        self.params.resolved_ties()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.kind.attribute_names()
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        self.kind.attribute(name)
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<()> {
        let previous = self.kind.clone_box();
        self.kind.set_attribute(name, value)?;
        if let Err(err) = self.params.resize(&self.kind.parameter_declarations()) {
            self.kind = previous;
            return Err(err);
        }
        Ok(())
    }

    fn function(&self, x: &[f64], out: &mut [f64]) -> Result<()> {
        if out.len() != x.len() {
            return Err(FitError::DimensionMismatch(format!(
                "{} points but {} outputs",
                x.len(),
                out.len()
            )));
        }
        self.kind.eval(&self.params.values(), x, out)
    }

    fn function_deriv(&self, x: &[f64], mut jacobian: ArrayViewMut2<'_, f64>) -> Result<()> {
        let values = self.params.values();
        if let Some(analytic) = self.kind.as_differentiable() {
            analytic.eval_deriv(&values, x, jacobian.view_mut())?;
            if jacobian.iter().all(|v| v.is_finite()) {
                return Ok(());
            }
            warn!(
                function = self.kind.type_name(),
                "analytic derivative is not finite, falling back to numeric derivative"
            );
        }
        central_difference_jacobian(
            &values,
            x.len(),
            |p, out| self.kind.eval(p, x, out),
            jacobian,
        )
    }

    fn clone_box(&self) -> Box<dyn FitFunction> {
        Box::new(self.clone())
    }

    fn to_definition(&self) -> String {
        let mut parts = vec![format!("name={}", self.kind.type_name())];
        for attr in self.kind.attribute_names() {
            if let Ok(value) = self.kind.attribute(&attr) {
                parts.push(format!("{}={}", attr, value.to_definition_value()));
            }
        }
        parts.extend(parameter_clauses(self));
        parts.join(",")
    }
}
