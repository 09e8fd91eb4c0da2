use ndarray::{s, ArrayViewMut2};

use super::{
    differentiate_per_domain, evaluate_per_domain, Attribute, DomainBinding, FitFunction,
};
use crate::domain::JointDomain;
use crate::error::{FitError, Result};
use crate::parameters::expression::{Expression, ExpressionError};
use crate::parameters::parameter::Parameter;
use crate::parameters::ties::{order_ties, parse_tie, ResolvedTie, TieDefinition};
use crate::utils::finite_difference::central_difference_jacobian;

/// How a composite combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    /// Members are summed over the same domain.
    Sum,
    /// Members are multiplied over the same domain.
    Product,
    /// Members are summed, each only over the datasets it is bound to.
    MultiDomain,
}

impl CompositeKind {
    pub fn type_name(self) -> &'static str {
        match self {
            CompositeKind::Sum => "CompositeFunction",
            CompositeKind::Product => "ProductFunction",
            CompositeKind::MultiDomain => "MultiDomainFunction",
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct Member {
    pub(super) function: Box<dyn FitFunction>,
    pub(super) domains: DomainBinding,
}

/// A tie held by the composite itself, in the composite's `fN.` namespace.
#[derive(Debug, Clone, PartialEq)]
struct CompositeTie {
    target: String,
    formula: String,
}

/// A function built from member functions.
///
/// Members own disjoint, contiguous ranges of the composite's parameter
/// vector, assigned in member order. The ranges are derived from the
/// members' current sizes on every access, so a member that resizes shifts
/// the parameters of the members after it.
///
/// # Examples
///
/// ```
/// use fitcore_rs::function::{CompositeFunction, FitFunction, ParamFunction};
/// use fitcore_rs::models::{Gaussian, LinearBackground};
///
/// let mut composite = CompositeFunction::sum();
/// composite.add_function(Box::new(ParamFunction::new(LinearBackground).unwrap()));
/// composite.add_function(Box::new(ParamFunction::new(Gaussian).unwrap()));
///
/// assert_eq!(composite.n_params(), 5);
/// assert_eq!(composite.parameter_name(3).unwrap(), "f1.PeakCentre");
/// composite.tie("f1.Sigma", "f0.A0 / 2").unwrap();
/// assert!(!composite.is_active(4));
/// ```
#[derive(Debug, Clone)]
pub struct CompositeFunction {
    kind: CompositeKind,
    pub(super) members: Vec<Member>,
    ties: Vec<CompositeTie>,
    pub(super) num_deriv: bool,
}

impl CompositeFunction {
    pub fn new(kind: CompositeKind) -> Self {
        Self {
            kind,
            members: Vec::new(),
            ties: Vec::new(),
            num_deriv: false,
        }
    }

    /// A composite that sums its members.
    pub fn sum() -> Self {
        Self::new(CompositeKind::Sum)
    }

    /// A composite that multiplies its members.
    pub fn product() -> Self {
        Self::new(CompositeKind::Product)
    }

    /// A composite whose members are bound to datasets of a joint domain.
    pub fn multi_domain() -> Self {
        Self::new(CompositeKind::MultiDomain)
    }

    pub fn kind(&self) -> CompositeKind {
        self.kind
    }

    /// Append a member bound to every domain.
    pub fn add_function(&mut self, function: Box<dyn FitFunction>) -> usize {
        self.add_function_with_domains(function, DomainBinding::All)
    }

    /// Append a member bound to the given domains.
    pub fn add_function_with_domains(
        &mut self,
        function: Box<dyn FitFunction>,
        domains: DomainBinding,
    ) -> usize {
        self.members.push(Member { function, domains });
        self.members.len() - 1
    }

    pub fn set_domains(&mut self, index: usize, domains: DomainBinding) -> Result<()> {
        self.member(index)?;
        self.members[index].domains = domains;
        Ok(())
    }

    pub fn domains(&self, index: usize) -> Result<&DomainBinding> {
        Ok(&self.member(index)?.domains)
    }

    pub fn n_functions(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get_function(&self, index: usize) -> Result<&dyn FitFunction> {
        Ok(self.member(index)?.function.as_ref())
    }

    /// Mutable access to a member. Attribute changes that resize the member
    /// should go through `set_attribute("fN.name", ..)` so the composite's
    /// own ties are validated.
    pub fn get_function_mut(&mut self, index: usize) -> Result<&mut dyn FitFunction> {
        self.member(index)?;
        Ok(self.members[index].function.as_mut())
    }

    /// Use numeric differentiation for the whole composite.
    pub fn set_num_deriv(&mut self, num_deriv: bool) {
        self.num_deriv = num_deriv;
    }

    fn member(&self, index: usize) -> Result<&Member> {
        self.members.get(index).ok_or_else(|| {
            FitError::InvalidInput(format!(
                "{} has no member function {}",
                self.kind.type_name(),
                index
            ))
        })
    }

    /// First parameter index of a member.
    pub(super) fn member_offset(&self, member: usize) -> usize {
        self.members[..member]
            .iter()
            .map(|m| m.function.n_params())
            .sum()
    }

    /// Map a composite parameter index to `(member, local index)`.
    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        let mut offset = 0;
        for (m, member) in self.members.iter().enumerate() {
            let n = member.function.n_params();
            if index < offset + n {
                return Ok((m, index - offset));
            }
            offset += n;
        }
        Err(FitError::UnknownParameter(format!("index {}", index)))
    }

    /// Split `fN.rest` into `(N, rest)`.
    fn split_name<'a>(&self, name: &'a str) -> Option<(usize, &'a str)> {
        let (head, rest) = name.split_once('.')?;
        let member: usize = head.strip_prefix('f')?.parse().ok()?;
        (member < self.members.len()).then_some((member, rest))
    }

    fn resolve_formula(&self, formula: &str) -> std::result::Result<Expression, String> {
        let expression = Expression::parse(formula).map_err(|e| e.to_string())?;
        expression
            .resolve(&|name: &str| self.parameter_index(name).ok())
            .map_err(|e| match e {
                ExpressionError::UndefinedVariable { name } => name,
                other => other.to_string(),
            })
    }

    /// Numeric Jacobian of `eval` over the full composite parameter vector.
    fn numeric_jacobian<F>(
        &self,
        n_points: usize,
        mut eval: F,
        jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()>
    where
        F: FnMut(&CompositeFunction, &mut [f64]) -> Result<()>,
    {
        let mut probe = self.clone();
        central_difference_jacobian(
            &self.values(),
            n_points,
            |p, out| {
                for (i, &v) in p.iter().enumerate() {
                    probe.set_parameter(i, v)?;
                }
                eval(&probe, out)
            },
            jacobian,
        )
    }
}

impl FitFunction for CompositeFunction {
    fn name(&self) -> &str {
        self.kind.type_name()
    }

    fn n_params(&self) -> usize {
        self.members.iter().map(|m| m.function.n_params()).sum()
    }

    fn parameter_name(&self, index: usize) -> Result<String> {
        let (m, local) = self.locate(index)?;
        Ok(format!(
            "f{}.{}",
            m,
            self.members[m].function.parameter_name(local)?
        ))
    }

    fn parameter(&self, index: usize) -> Result<&Parameter> {
        let (m, local) = self.locate(index)?;
        self.members[m].function.parameter(local)
    }

    fn parameter_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        let (m, local) = self.locate(index)?;
        self.members[m].function.parameter_mut(local)
    }

    fn parameter_index(&self, name: &str) -> Result<usize> {
        let unknown = || FitError::UnknownParameter(name.to_string());
        let (m, rest) = self.split_name(name).ok_or_else(unknown)?;
        let local = self.members[m]
            .function
            .parameter_index(rest)
            .map_err(|_| unknown())?;
        Ok(self.member_offset(m) + local)
    }

    fn tie(&mut self, name: &str, formula: &str) -> Result<()> {
        let target = self.parameter_index(name)?;
        let canonical = self.parameter_name(target)?;
        let (m, local) = self.locate(target)?;
        let local_name = self.members[m].function.parameter_name(local)?;

        match parse_tie(formula)? {
            TieDefinition::Constant(value) => {
                self.ties.retain(|t| t.target != canonical);
                let member = &mut self.members[m].function;
                if member.is_tied(local) {
                    member.remove_tie(&local_name)?;
                }
                let param = member.parameter_mut(local)?;
                param.set_value(value);
                param.set_fixed(true);
                Ok(())
            }
            TieDefinition::Formula(_) => {
                let resolved =
                    self.resolve_formula(formula)
                        .map_err(|missing| FitError::InvalidTieExpression {
                            expression: formula.to_string(),
                            message: format!("unknown parameter '{}'", missing),
                        })?;
                if resolved.parameters().contains(&target) {
                    return Err(FitError::InvalidTieExpression {
                        expression: formula.to_string(),
                        message: format!("'{}' cannot be tied to itself", canonical),
                    });
                }

                let previous_ties = self.ties.clone();
                let previous_member = self.members[m].function.clone_box();

                self.ties.retain(|t| t.target != canonical);
                if self.members[m].function.is_tied(local) {
                    self.members[m].function.remove_tie(&local_name)?;
                }
                self.ties.push(CompositeTie {
                    target: canonical,
                    formula: formula.to_string(),
                });

                let acyclic = self
                    .resolved_ties()
                    .map(|ties| order_ties(&ties).is_ok())
                    .unwrap_or(false);
                if !acyclic {
                    self.ties = previous_ties;
                    self.members[m].function = previous_member;
                    return Err(FitError::InvalidTieExpression {
                        expression: formula.to_string(),
                        message: "circular tie dependency".to_string(),
                    });
                }
                self.members[m].function.free(local)
            }
        }
    }

    fn remove_tie(&mut self, name: &str) -> Result<()> {
        let index = self.parameter_index(name)?;
        let canonical = self.parameter_name(index)?;
        let before = self.ties.len();
        self.ties.retain(|t| t.target != canonical);
        if self.ties.len() != before {
            return Ok(());
        }
        let (m, local) = self.locate(index)?;
        let local_name = self.members[m].function.parameter_name(local)?;
        self.members[m].function.remove_tie(&local_name)
    }

    fn is_tied(&self, index: usize) -> bool {
        let Ok((m, local)) = self.locate(index) else {
            return false;
        };
        if self.members[m].function.is_tied(local) {
            return true;
        }
        match self.parameter_name(index) {
            Ok(name) => self.ties.iter().any(|t| t.target == name),
            Err(_) => false,
        }
    }

    fn resolved_ties(&self) -> Result<Vec<ResolvedTie>> {
        let mut ties = Vec::new();
        let mut offset = 0;
        for member in &self.members {
            for tie in member.function.resolved_ties()? {
                ties.push(tie.shifted(offset));
            }
            offset += member.function.n_params();
        }

        for tie in &self.ties {
            let target =
                self.parameter_index(&tie.target)
                    .map_err(|_| FitError::StaleTieReference {
                        parameter: tie.target.clone(),
                        missing: tie.target.clone(),
                    })?;
            let expression =
                self.resolve_formula(&tie.formula)
                    .map_err(|missing| FitError::StaleTieReference {
                        parameter: tie.target.clone(),
                        missing,
                    })?;
            ties.push(ResolvedTie { target, expression });
        }
        Ok(ties)
    }

    fn attribute_names(&self) -> Vec<String> {
        let mut names = vec!["NumDeriv".to_string()];
        for (m, member) in self.members.iter().enumerate() {
            names.extend(
                member
                    .function
                    .attribute_names()
                    .into_iter()
                    .map(|a| format!("f{}.{}", m, a)),
            );
        }
        names
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        if name == "NumDeriv" {
            return Ok(Attribute::Bool(self.num_deriv));
        }
        let (m, rest) = self
            .split_name(name)
            .ok_or_else(|| FitError::UnknownAttribute(name.to_string()))?;
        self.members[m].function.attribute(rest)
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<()> {
        if name == "NumDeriv" {
            self.num_deriv = value.as_bool().ok_or_else(|| FitError::InvalidAttribute {
                name: name.to_string(),
                message: format!("expected a boolean, got {}", value.kind_name()),
            })?;
            return Ok(());
        }

        let (m, rest) = self
            .split_name(name)
            .ok_or_else(|| FitError::UnknownAttribute(name.to_string()))?;
        let previous_member = self.members[m].function.clone_box();
        let previous_ties = self.ties.clone();

        self.members[m].function.set_attribute(rest, value)?;

        // Ties on parameters that no longer exist go with them
        let keep: Vec<bool> = self
            .ties
            .iter()
            .map(|t| self.parameter_index(&t.target).is_ok())
            .collect();
        let mut keep = keep.into_iter();
        self.ties.retain(|_| keep.next().unwrap_or(true));

        if let Err(err) = self.resolved_ties() {
            self.members[m].function = previous_member;
            self.ties = previous_ties;
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
        let mut partial = vec![0.0; x.len()];
        match self.kind {
            CompositeKind::Product => {
                out.fill(1.0);
                for member in &self.members {
                    member.function.function(x, &mut partial)?;
                    out.iter_mut().zip(&partial).for_each(|(o, p)| *o *= p);
                }
            }
            CompositeKind::Sum | CompositeKind::MultiDomain => {
                out.fill(0.0);
                for member in &self.members {
                    member.function.function(x, &mut partial)?;
                    out.iter_mut().zip(&partial).for_each(|(o, p)| *o += p);
                }
            }
        }
        Ok(())
    }

    fn function_deriv(&self, x: &[f64], mut jacobian: ArrayViewMut2<'_, f64>) -> Result<()> {
        if self.num_deriv {
            return self.numeric_jacobian(x.len(), |f, out| f.function(x, out), jacobian);
        }

        match self.kind {
            CompositeKind::Sum | CompositeKind::MultiDomain => {
                let mut offset = 0;
                for member in &self.members {
                    let n = member.function.n_params();
                    member
                        .function
                        .function_deriv(x, jacobian.slice_mut(s![.., offset..offset + n]))?;
                    offset += n;
                }
            }
            CompositeKind::Product => {
                let values = self
                    .members
                    .iter()
                    .map(|member| {
                        let mut v = vec![0.0; x.len()];
                        member.function.function(x, &mut v)?;
                        Ok(v)
                    })
                    .collect::<Result<Vec<_>>>()?;

                let mut offset = 0;
                for (k, member) in self.members.iter().enumerate() {
                    let n = member.function.n_params();
                    let mut block = jacobian.slice_mut(s![.., offset..offset + n]);
                    member.function.function_deriv(x, block.view_mut())?;
                    for i in 0..x.len() {
                        let others: f64 = values
                            .iter()
                            .enumerate()
                            .filter(|(j, _)| *j != k)
                            .map(|(_, v)| v[i])
                            .product();
                        block.row_mut(i).mapv_inplace(|d| d * others);
                    }
                    offset += n;
                }
            }
        }
        Ok(())
    }

    fn function_joint(&self, domain: &JointDomain, out: &mut [f64]) -> Result<()> {
        match self.kind {
            CompositeKind::MultiDomain => self.multi_domain_function(domain, out),
            _ => evaluate_per_domain(self, domain, out),
        }
    }

    fn function_deriv_joint(
        &self,
        domain: &JointDomain,
        jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        match self.kind {
            CompositeKind::MultiDomain if self.num_deriv => self.numeric_jacobian(
                domain.len(),
                |f, out| f.multi_domain_function(domain, out),
                jacobian,
            ),
            CompositeKind::MultiDomain => self.multi_domain_deriv(domain, jacobian),
            _ => differentiate_per_domain(self, domain, jacobian),
        }
    }

    fn check_domains(&self, n_domains: usize) -> Result<()> {
        if self.kind == CompositeKind::MultiDomain {
            self.check_multi_domain(n_domains)
        } else {
            Ok(())
        }
    }

    fn member_count(&self) -> Option<usize> {
        Some(self.members.len())
    }

    fn iteration_finished(&mut self) {
        for member in &mut self.members {
            member.function.iteration_finished();
        }
    }

    fn clone_box(&self) -> Box<dyn FitFunction> {
        Box::new(self.clone())
    }

    fn to_definition(&self) -> String {
        let mut terms = vec![format!(
            "composite={},NumDeriv={}",
            self.kind.type_name(),
            self.num_deriv
        )];
        for (m, member) in self.members.iter().enumerate() {
            let definition = member.function.to_definition();
            let mut term = if definition.starts_with("composite=") {
                format!("({})", definition)
            } else {
                definition
            };
            if self.kind == CompositeKind::MultiDomain {
                term.push_str(&format!(",$domains={}", member.domains.to_definition(m)));
            }
            terms.push(term);
        }
        if !self.ties.is_empty() {
            let ties: Vec<String> = self
                .ties
                .iter()
                .map(|t| format!("{}={}", t.target, t.formula))
                .collect();
            terms.push(format!("ties=({})", ties.join(",")));
        }
        terms.join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::ParamFunction;
    use crate::models::{FlatBackground, Gaussian, LinearBackground, Polynomial};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn background_plus_peak() -> CompositeFunction {
        let mut composite = CompositeFunction::sum();
        composite.add_function(Box::new(
            ParamFunction::new(LinearBackground)
                .unwrap()
                .with_parameter("A0", 1.0)
                .unwrap(),
        ));
        composite.add_function(Box::new(
            ParamFunction::new(Gaussian)
                .unwrap()
                .with_parameter("Height", 4.0)
                .unwrap()
                .with_parameter("Sigma", 0.5)
                .unwrap(),
        ));
        composite
    }

    #[test]
    fn test_flattened_names() {
        let composite = background_plus_peak();
        let names: Vec<String> = (0..composite.n_params())
            .map(|i| composite.parameter_name(i).unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["f0.A0", "f0.A1", "f1.Height", "f1.PeakCentre", "f1.Sigma"]
        );
        assert_eq!(composite.parameter_index("f1.Sigma").unwrap(), 4);
        assert!(composite.parameter_index("f2.A0").is_err());
        assert!(composite.parameter_index("Sigma").is_err());
    }

    #[test]
    fn test_sum_and_product() {
        let mut composite = background_plus_peak();
        let x = [0.0, 0.25];
        let mut out = [0.0; 2];
        composite.function(&x, &mut out).unwrap();
        assert_relative_eq!(out[0], 1.0 + 4.0);

        let mut product = CompositeFunction::product();
        product.add_function(Box::new(
            ParamFunction::new(FlatBackground).unwrap().with_parameter("A0", 3.0).unwrap(),
        ));
        product.add_function(composite.clone_box());
        let mut prod_out = [0.0; 2];
        product.function(&x, &mut prod_out).unwrap();
        assert_relative_eq!(prod_out[1], 3.0 * out[1]);

        // analytic product rule against numeric
        let mut analytic = Array2::zeros((2, 6));
        product.function_deriv(&x, analytic.view_mut()).unwrap();
        product.set_num_deriv(true);
        let mut numeric = Array2::zeros((2, 6));
        product.function_deriv(&x, numeric.view_mut()).unwrap();
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(*a, *n, epsilon = 1e-5);
        }

        composite.set_parameter(0, 0.0).unwrap();
        composite.function(&x, &mut out).unwrap();
        assert_relative_eq!(out[0], 4.0);
    }

    #[test]
    fn test_composite_ties() {
        let mut composite = background_plus_peak();
        composite.tie("f1.Sigma", "f0.A0 / 2").unwrap();
        assert!(composite.is_tied(4));
        assert_eq!(composite.active_indices(), vec![0, 1, 2, 3]);

        composite.set_parameter(0, 3.0).unwrap();
        composite.apply_ties().unwrap();
        assert_relative_eq!(composite.get_parameter(4).unwrap(), 1.5);

        assert!(matches!(
            composite.tie("f0.A0", "f1.Sigma * 2"),
            Err(FitError::InvalidTieExpression { .. })
        ));
        assert!(matches!(
            composite.tie("f0.A1", "f3.A0"),
            Err(FitError::InvalidTieExpression { .. })
        ));

        composite.tie("f1.Height", "10").unwrap();
        assert!(composite.is_fixed(2));
        assert_eq!(composite.get_parameter(2).unwrap(), 10.0);

        composite.remove_tie("f1.Sigma").unwrap();
        assert!(composite.is_active(4));
    }

    #[test]
    fn test_member_resize_reindexes() {
        let mut composite = CompositeFunction::sum();
        composite.add_function(Box::new(ParamFunction::new(Polynomial::new(1)).unwrap()));
        composite.add_function(Box::new(ParamFunction::new(Gaussian).unwrap()));
        composite.tie("f1.Height", "f0.A1 * 2").unwrap();
        assert_eq!(composite.parameter_index("f1.Height").unwrap(), 2);

        composite.set_attribute("f0.n", Attribute::Int(3)).unwrap();
        assert_eq!(composite.n_params(), 7);
        assert_eq!(composite.parameter_index("f1.Height").unwrap(), 4);
        let ties = composite.resolved_ties().unwrap();
        assert_eq!(ties[0].target, 4);
        assert_eq!(ties[0].dependencies(), vec![1]);

        // Removing A1 would leave the tie dangling
        let err = composite.set_attribute("f0.n", Attribute::Int(0)).unwrap_err();
        assert!(matches!(err, FitError::StaleTieReference { .. }));
        assert_eq!(composite.n_params(), 7);
    }

    #[test]
    fn test_definition() {
        let mut composite = background_plus_peak();
        composite.tie("f1.Sigma", "f0.A0/2").unwrap();
        let definition = composite.to_definition();
        assert!(definition.starts_with("composite=CompositeFunction,NumDeriv=false;"));
        assert!(definition.contains(";name=Gaussian,Height=4,"));
        assert!(definition.ends_with(";ties=(f1.Sigma=f0.A0/2)"));
    }
}
