//! Tie resolution and ordering
//!
//! Ties are attached to functions as text and resolved to parameter slots of
//! the function that evaluates them. Within a composite every member's ties
//! are shifted by the member's parameter offset, so a single ordered list of
//! [`ResolvedTie`]s covers the whole function tree.

use std::collections::HashMap;

use crate::error::{FitError, Result};
use crate::parameters::expression::{ExprResult, Expression, SlotContext};

/// A tie whose variables refer to parameter positions.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTie {
    /// Position of the tied parameter
    pub target: usize,

    /// Formula over parameter slots
    pub expression: Expression,
}

impl ResolvedTie {
    /// Slots the formula reads.
    pub fn dependencies(&self) -> Vec<usize> {
        self.expression.parameters()
    }

    /// The same tie in a parameter vector that starts `offset` slots later.
    pub fn shifted(&self, offset: usize) -> Self {
        Self {
            target: self.target + offset,
            expression: self.expression.shifted(offset),
        }
    }
}

/// What a tie formula turns out to be once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum TieDefinition {
    /// A formula without variables; the parameter is fixed at this value.
    Constant(f64),

    /// A formula over other parameters.
    Formula(Expression),
}

/// Parse a tie formula, folding variable-free formulas into a constant.
pub fn parse_tie(formula: &str) -> Result<TieDefinition> {
    let expression =
        Expression::parse(formula).map_err(|e| FitError::InvalidTieExpression {
            expression: formula.to_string(),
            message: e.to_string(),
        })?;
    if expression.variables().is_empty() {
        let value = expression
            .evaluate(&SlotContext(&[]))
            .map_err(|e| FitError::InvalidTieExpression {
                expression: formula.to_string(),
                message: e.to_string(),
            })?;
        Ok(TieDefinition::Constant(value))
    } else {
        Ok(TieDefinition::Formula(expression))
    }
}

/// Order ties so that every tie is evaluated after the ties it depends on.
///
/// Returns indices into `ties`. Fails with the target slot of a tie that
/// takes part in a cycle.
pub fn order_ties(ties: &[ResolvedTie]) -> std::result::Result<Vec<usize>, usize> {
    let by_target: HashMap<usize, usize> = ties
        .iter()
        .enumerate()
        .map(|(i, tie)| (tie.target, i))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        i: usize,
        ties: &[ResolvedTie],
        by_target: &HashMap<usize, usize>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> std::result::Result<(), usize> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(ties[i].target),
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for dep in ties[i].dependencies() {
            if let Some(&j) = by_target.get(&dep) {
                visit(j, ties, by_target, marks, order)?;
            }
        }
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; ties.len()];
    let mut order = Vec::with_capacity(ties.len());
    for i in 0..ties.len() {
        visit(i, ties, &by_target, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Evaluate ties in dependency order, writing each result into `values`.
pub fn evaluate_ties(ties: &[ResolvedTie], order: &[usize], values: &mut [f64]) -> ExprResult<()> {
    for &i in order {
        let tie = &ties[i];
        let value = tie.expression.evaluate(&SlotContext(values))?;
        values[tie.target] = value;
    }
    Ok(())
}
