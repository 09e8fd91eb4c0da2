//! # Fit Functions
//!
//! Every model a fit can use implements [`FitFunction`]. Primitive models are
//! [`ParamFunction`]s wrapping an [`Evaluable`] kind, and composites hold
//! their members rather than inheriting from them:
//!
//! - [`CompositeFunction`] sums (or, as a product function, multiplies) its
//!   members over the same domain.
//! - A multi-domain composite additionally binds each member to a subset of
//!   the datasets of a joint domain.
//!
//! Parameters of a composite are flattened depth-first. Member `N`'s
//! parameter `P` is addressed as `fN.P`.

mod attribute;
mod composite;
mod factory;
mod multi_domain;
mod param_function;
pub mod parser;

pub use attribute::Attribute;
pub use composite::{CompositeFunction, CompositeKind};
pub use factory::FunctionFactory;
pub use multi_domain::DomainBinding;
pub use param_function::{Differentiable, Evaluable, ParamFunction};

use std::fmt;

use ndarray::{s, ArrayViewMut2};

use crate::domain::JointDomain;
use crate::error::{FitError, Result};
use crate::parameters::bounds::BoundConstraint;
use crate::parameters::parameter::Parameter;
use crate::parameters::ties::{evaluate_ties, order_ties, ResolvedTie};

/// A model with named parameters and attributes.
pub trait FitFunction: fmt::Debug + Send + Sync {
    /// Registered type name, e.g. `Gaussian` or `CompositeFunction`.
    fn name(&self) -> &str;

    /// Number of parameters, including fixed and tied ones.
    fn n_params(&self) -> usize;

    fn parameter_name(&self, index: usize) -> Result<String>;

    fn parameter(&self, index: usize) -> Result<&Parameter>;

    fn parameter_mut(&mut self, index: usize) -> Result<&mut Parameter>;

    fn parameter_index(&self, name: &str) -> Result<usize> {
        (0..self.n_params())
            .find(|&i| self.parameter_name(i).map_or(false, |n| n == name))
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    /// Tie a parameter to a formula over other parameters of this function.
    fn tie(&mut self, name: &str, formula: &str) -> Result<()>;

    fn remove_tie(&mut self, name: &str) -> Result<()>;

    fn is_tied(&self, index: usize) -> bool;

    /// All ties in the function tree, resolved to parameter positions.
    fn resolved_ties(&self) -> Result<Vec<ResolvedTie>>;

    fn attribute_names(&self) -> Vec<String>;

    fn attribute(&self, name: &str) -> Result<Attribute>;

    /// Change an attribute. Attributes may resize the parameter vector.
    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<()>;

    /// Evaluate the model at `x`.
    fn function(&self, x: &[f64], out: &mut [f64]) -> Result<()>;

    /// Jacobian of the model at `x` with respect to every parameter,
    /// shape `(x.len(), n_params())`.
    fn function_deriv(&self, x: &[f64], jacobian: ArrayViewMut2<'_, f64>) -> Result<()>;

    /// Evaluate over all datasets of a joint domain.
    fn function_joint(&self, domain: &JointDomain, out: &mut [f64]) -> Result<()> {
        evaluate_per_domain(self, domain, out)
    }

    /// Jacobian over all datasets of a joint domain.
    fn function_deriv_joint(
        &self,
        domain: &JointDomain,
        jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        differentiate_per_domain(self, domain, jacobian)
    }

    /// Check that a joint domain with `n_domains` datasets can be evaluated.
    fn check_domains(&self, _n_domains: usize) -> Result<()> {
        Ok(())
    }

    /// Number of member functions of a composite, `None` for a primitive.
    fn member_count(&self) -> Option<usize> {
        None
    }

    /// Hook called by the fit loop after every minimizer iteration.
    fn iteration_finished(&mut self) {}

    fn clone_box(&self) -> Box<dyn FitFunction>;

    /// Render the function in definition-string form.
    fn to_definition(&self) -> String;

    fn get_parameter(&self, index: usize) -> Result<f64> {
        Ok(self.parameter(index)?.value())
    }

    fn set_parameter(&mut self, index: usize, value: f64) -> Result<()> {
        self.parameter_mut(index)?.set_value(value);
        Ok(())
    }

    fn get_parameter_by_name(&self, name: &str) -> Result<f64> {
        self.get_parameter(self.parameter_index(name)?)
    }

    fn set_parameter_by_name(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self.parameter_index(name)?;
        self.set_parameter(index, value)
    }

    fn fix(&mut self, index: usize) -> Result<()> {
        self.parameter_mut(index)?.set_fixed(true);
        Ok(())
    }

    fn free(&mut self, index: usize) -> Result<()> {
        self.parameter_mut(index)?.set_fixed(false);
        Ok(())
    }

    fn is_fixed(&self, index: usize) -> bool {
        self.parameter(index).map_or(false, Parameter::is_fixed)
    }

    /// Whether a parameter is optimized, i.e. neither fixed nor tied.
    fn is_active(&self, index: usize) -> bool {
        !self.is_fixed(index) && !self.is_tied(index)
    }

    fn active_indices(&self) -> Vec<usize> {
        (0..self.n_params()).filter(|&i| self.is_active(i)).collect()
    }

    fn n_active(&self) -> usize {
        self.active_indices().len()
    }

    fn add_constraint(&mut self, name: &str, bound: BoundConstraint) -> Result<()> {
        let index = self.parameter_index(name)?;
        self.parameter_mut(index)?.set_bound(Some(bound));
        Ok(())
    }

    fn remove_constraint(&mut self, name: &str) -> Result<()> {
        let index = self.parameter_index(name)?;
        self.parameter_mut(index)?.set_bound(None);
        Ok(())
    }

    /// Sum of the bound penalties of all parameters.
    fn penalty(&self) -> f64 {
        (0..self.n_params())
            .filter_map(|i| self.parameter(i).ok())
            .map(Parameter::penalty)
            .sum()
    }

    fn values(&self) -> Vec<f64> {
        (0..self.n_params())
            .map(|i| self.get_parameter(i).unwrap_or(f64::NAN))
            .collect()
    }

    /// Recompute every tied parameter from its formula.
    fn apply_ties(&mut self) -> Result<()> {
        let ties = self.resolved_ties()?;
        if ties.is_empty() {
            return Ok(());
        }
        let order = order_ties(&ties).map_err(|target| FitError::InvalidTieExpression {
            expression: self.parameter_name(target).unwrap_or_default(),
            message: "circular tie dependency".to_string(),
        })?;
        self.apply_resolved_ties(&ties, &order)
    }

    /// Evaluate already resolved and ordered ties.
    fn apply_resolved_ties(&mut self, ties: &[ResolvedTie], order: &[usize]) -> Result<()> {
        let mut values = self.values();
        evaluate_ties(ties, order, &mut values)?;
        for tie in ties {
            self.set_parameter(tie.target, values[tie.target])?;
        }
        Ok(())
    }
}

impl Clone for Box<dyn FitFunction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Evaluate a function separately on every dataset of a joint domain.
pub(crate) fn evaluate_per_domain<F: FitFunction + ?Sized>(
    function: &F,
    domain: &JointDomain,
    out: &mut [f64],
) -> Result<()> {
    check_output_len(domain, out.len())?;
    for d in 0..domain.n_domains() {
        let range = domain.range(d);
        function.function(domain.domain(d).x(), &mut out[range])?;
    }
    Ok(())
}

pub(crate) fn differentiate_per_domain<F: FitFunction + ?Sized>(
    function: &F,
    domain: &JointDomain,
    mut jacobian: ArrayViewMut2<'_, f64>,
) -> Result<()> {
    check_output_len(domain, jacobian.nrows())?;
    for d in 0..domain.n_domains() {
        let range = domain.range(d);
        function.function_deriv(domain.domain(d).x(), jacobian.slice_mut(s![range, ..]))?;
    }
    Ok(())
}

fn check_output_len(domain: &JointDomain, len: usize) -> Result<()> {
    if len != domain.len() {
        return Err(FitError::DimensionMismatch(format!(
            "output has {} rows, domain has {} points",
            len,
            domain.len()
        )));
    }
    Ok(())
}

/// Write `name=value` pairs, ties and constraints of one primitive term.
pub(crate) fn parameter_clauses<F: FitFunction + ?Sized>(function: &F) -> Vec<String> {
    let mut parts = Vec::new();
    let mut ties = Vec::new();
    let mut constraints = Vec::new();
    for i in 0..function.n_params() {
        let (Ok(param), Ok(name)) = (function.parameter(i), function.parameter_name(i)) else {
            continue;
        };
        parts.push(format!("{}={}", name, param.value()));
        if let Some(formula) = param.tie() {
            ties.push(format!("{}={}", name, formula));
        } else if param.is_fixed() {
            ties.push(format!("{}={}", name, param.value()));
        }
        if let Some(bound) = param.bound() {
            constraints.push(bound.to_definition(&name));
        }
    }
    if !ties.is_empty() {
        parts.push(format!("ties=({})", ties.join(",")));
    }
    if !constraints.is_empty() {
        parts.push(format!("constraints=({})", constraints.join(",")));
    }
    parts
}
