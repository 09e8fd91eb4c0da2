//! Binding of composite members to datasets of a joint domain.

use std::fmt;

use ndarray::{s, Array2, ArrayViewMut2};

use super::composite::CompositeFunction;
use super::FitFunction;
use crate::domain::JointDomain;
use crate::error::{FitError, Result};

/// The datasets a member of a multi-domain composite contributes to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DomainBinding {
    /// Every dataset.
    #[default]
    All,
    /// Only the listed datasets.
    Domains(Vec<usize>),
}

impl DomainBinding {
    /// Parse a `$domains` value for the member at `member`.
    ///
    /// Accepts `All`, `i` (the dataset with the member's own index), a single
    /// index, or a parenthesized list such as `(0,2)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore_rs::function::DomainBinding;
    ///
    /// assert_eq!(DomainBinding::parse("i", 3).unwrap(), DomainBinding::Domains(vec![3]));
    /// assert_eq!(DomainBinding::parse("(2,0)", 1).unwrap(), DomainBinding::Domains(vec![0, 2]));
    /// assert_eq!(DomainBinding::parse("All", 0).unwrap(), DomainBinding::All);
    /// ```
    pub fn parse(text: &str, member: usize) -> Result<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("all") {
            return Ok(DomainBinding::All);
        }
        if text == "i" {
            return Ok(DomainBinding::Domains(vec![member]));
        }
        let inner = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(text);
        let mut indices = inner
            .split(',')
            .map(|part| {
                part.trim().parse::<usize>().map_err(|_| {
                    FitError::InvalidInput(format!("invalid $domains value '{}'", text))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        indices.sort_unstable();
        indices.dedup();
        Ok(DomainBinding::Domains(indices))
    }

    pub fn covers(&self, domain: usize) -> bool {
        match self {
            DomainBinding::All => true,
            DomainBinding::Domains(indices) => indices.contains(&domain),
        }
    }

    /// Definition-string form. A binding to exactly the member's own index
    /// is written as `i`.
    pub fn to_definition(&self, member: usize) -> String {
        match self {
            DomainBinding::All => "All".to_string(),
            DomainBinding::Domains(indices) if indices.as_slice() == [member] => "i".to_string(),
            DomainBinding::Domains(indices) if indices.len() == 1 => indices[0].to_string(),
            DomainBinding::Domains(_) => self.to_string(),
        }
    }
}

impl fmt::Display for DomainBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainBinding::All => write!(f, "All"),
            DomainBinding::Domains(indices) => {
                let list: Vec<String> = indices.iter().map(usize::to_string).collect();
                write!(f, "({})", list.join(","))
            }
        }
    }
}

impl CompositeFunction {
    /// Members bound to a dataset.
    fn members_for(&self, domain: usize) -> impl Iterator<Item = (usize, &Box<dyn FitFunction>)> {
        self.members
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.domains.covers(domain))
            .map(|(i, m)| (i, &m.function))
    }

    pub(super) fn check_multi_domain(&self, n_domains: usize) -> Result<()> {
        for (m, member) in self.members.iter().enumerate() {
            if let DomainBinding::Domains(indices) = &member.domains {
                if let Some(&d) = indices.iter().find(|&&d| d >= n_domains) {
                    return Err(FitError::InvalidInput(format!(
                        "member {} is bound to dataset {} but only {} datasets are given",
                        m, d, n_domains
                    )));
                }
            }
        }
        match (0..n_domains).find(|&d| self.members_for(d).next().is_none()) {
            Some(d) => Err(FitError::UnboundDomain(d)),
            None => Ok(()),
        }
    }

    /// Sum, per dataset, of the members bound to it.
    pub(super) fn multi_domain_function(&self, domain: &JointDomain, out: &mut [f64]) -> Result<()> {
        if out.len() != domain.len() {
            return Err(FitError::DimensionMismatch(format!(
                "output has {} rows, domain has {} points",
                out.len(),
                domain.len()
            )));
        }
        for d in 0..domain.n_domains() {
            let x = domain.domain(d).x();
            let block = &mut out[domain.range(d)];
            block.fill(0.0);
            let mut partial = vec![0.0; x.len()];
            let mut bound = false;
            for (_, function) in self.members_for(d) {
                function.function(x, &mut partial)?;
                block.iter_mut().zip(&partial).for_each(|(o, p)| *o += p);
                bound = true;
            }
            if !bound {
                return Err(FitError::UnboundDomain(d));
            }
        }
        Ok(())
    }

    /// Jacobian over a joint domain; members write only the rows of the
    /// datasets they are bound to.
    pub(super) fn multi_domain_deriv(
        &self,
        domain: &JointDomain,
        mut jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        if jacobian.dim() != (domain.len(), self.n_params()) {
            return Err(FitError::DimensionMismatch(format!(
                "Jacobian is {:?}, expected ({}, {})",
                jacobian.dim(),
                domain.len(),
                self.n_params()
            )));
        }
        jacobian.fill(0.0);
        for d in 0..domain.n_domains() {
            let x = domain.domain(d).x();
            let range = domain.range(d);
            let mut bound = false;
            for (m, function) in self.members_for(d) {
                let offset = self.member_offset(m);
                let n = function.n_params();
                let mut block = Array2::zeros((x.len(), n));
                function.function_deriv(x, block.view_mut())?;
                jacobian
                    .slice_mut(s![range.clone(), offset..offset + n])
                    .assign(&block);
                bound = true;
            }
            if !bound {
                return Err(FitError::UnboundDomain(d));
            }
        }
        Ok(())
    }
}
