//! Parser for function definition strings.
//!
//! A definition is a `;`-separated list of terms. A term is a `,`-separated
//! list of `key=value` pairs:
//!
//! ```text
//! name=Gaussian,Height=10,PeakCentre=1,Sigma=0.5,ties=(Height=10),constraints=(0<Sigma<2)
//! composite=CompositeFunction,NumDeriv=true;name=LinearBackground;(composite=ProductFunction;name=ExpDecay;name=FlatBackground)
//! composite=MultiDomainFunction;name=FlatBackground,$domains=All;name=Gaussian,$domains=i;ties=(f1.Sigma=f0.A0)
//! ```
//!
//! Several terms without a `composite=` header form an implicit sum. Nested
//! composites are written in parentheses. A `ties=(..)` or
//! `constraints=(..)` term on its own applies to the enclosing composite.

use tracing::debug;

use super::{CompositeFunction, DomainBinding, FitFunction, FunctionFactory};
use crate::error::{FitError, Result};
use crate::parameters::bounds::BoundConstraint;

/// Parse a definition string into a function.
///
/// # Examples
///
/// ```
/// use fitcore_rs::function::{parser::parse_function, FitFunction, FunctionFactory};
///
/// let factory = FunctionFactory::with_defaults();
/// let f = parse_function("name=LinearBackground,A0=1;name=Gaussian,Height=5", &factory).unwrap();
/// assert_eq!(f.name(), "CompositeFunction");
/// assert_eq!(f.get_parameter_by_name("f1.Height").unwrap(), 5.0);
/// ```
pub fn parse_function(definition: &str, factory: &FunctionFactory) -> Result<Box<dyn FitFunction>> {
    let definition = definition.trim();
    if definition.is_empty() {
        return Err(FitError::EmptyFunction(
            "function definition is empty".to_string(),
        ));
    }
    debug!(definition, "parsing function definition");
    parse_definition(definition, factory)
}

fn parse_definition(definition: &str, factory: &FunctionFactory) -> Result<Box<dyn FitFunction>> {
    let pieces: Vec<&str> = split_top(definition, ';')
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let Some(first) = pieces.first() else {
        return Err(FitError::EmptyFunction(
            "function definition is empty".to_string(),
        ));
    };

    if first.starts_with("composite=") {
        let mut composite = parse_composite_header(first, factory)?;
        fill_composite(&mut composite, &pieces[1..], factory)?;
        return Ok(Box::new(composite));
    }

    let (functions, extras): (Vec<&str>, Vec<&str>) =
        pieces.iter().copied().partition(|p| !is_composite_clause(p));
    if functions.len() == 1 {
        let (mut function, _) = parse_member(functions[0], 0, factory)?;
        for clause in extras {
            apply_clause(function.as_mut(), clause)?;
        }
        return Ok(function);
    }

    let mut composite = CompositeFunction::sum();
    fill_composite(&mut composite, &pieces, factory)?;
    Ok(Box::new(composite))
}

fn parse_composite_header(header: &str, factory: &FunctionFactory) -> Result<CompositeFunction> {
    let pairs = key_values(header)?;
    let mut composite = factory.create_composite(pairs[0].1)?;
    for &(key, value) in &pairs[1..] {
        let current = composite.attribute(key)?;
        composite.set_attribute(key, current.parse_like(key, value)?)?;
    }
    Ok(composite)
}

fn fill_composite(
    composite: &mut CompositeFunction,
    pieces: &[&str],
    factory: &FunctionFactory,
) -> Result<()> {
    let mut clauses = Vec::new();
    for piece in pieces {
        if is_composite_clause(piece) {
            clauses.push(*piece);
            continue;
        }
        let (function, domains) = parse_member(piece, composite.n_functions(), factory)?;
        composite.add_function_with_domains(function, domains.unwrap_or_default());
    }
    if composite.is_empty() {
        return Err(FitError::EmptyFunction(format!(
            "{} has no member functions",
            composite.name()
        )));
    }
    // Composite ties may reference any member, so they go last
    for clause in clauses {
        apply_clause(composite, clause)?;
    }
    Ok(())
}

/// A stand-alone `ties=(..)` or `constraints=(..)` term.
fn is_composite_clause(piece: &str) -> bool {
    let key = piece.split('=').next().unwrap_or("").trim();
    (key == "ties" || key == "constraints") && split_top(piece, ',').len() == 1
}

fn apply_clause(function: &mut dyn FitFunction, clause: &str) -> Result<()> {
    let (key, value) = split_pair(clause)?;
    match key {
        "ties" => apply_ties(function, value),
        "constraints" => apply_constraints(function, value),
        _ => Err(FitError::InvalidInput(format!("unexpected term '{}'", clause))),
    }
}

/// Parse a member term: a primitive or a parenthesized nested definition,
/// plus an optional `$domains` binding.
fn parse_member(
    piece: &str,
    member: usize,
    factory: &FunctionFactory,
) -> Result<(Box<dyn FitFunction>, Option<DomainBinding>)> {
    if piece.starts_with('(') {
        let close = matching_paren(piece).ok_or_else(|| {
            FitError::InvalidInput(format!("unbalanced parentheses in '{}'", piece))
        })?;
        let function = parse_definition(&piece[1..close], factory)?;
        let mut domains = None;
        let rest = piece[close + 1..].trim();
        if !rest.is_empty() {
            let rest = rest.strip_prefix(',').unwrap_or(rest);
            for (key, value) in key_values(rest)? {
                if key != "$domains" {
                    return Err(FitError::InvalidInput(format!(
                        "unexpected '{}' after nested function",
                        key
                    )));
                }
                domains = Some(DomainBinding::parse(value, member)?);
            }
        }
        return Ok((function, domains));
    }
    parse_term(piece, member, factory)
}

fn parse_term(
    term: &str,
    member: usize,
    factory: &FunctionFactory,
) -> Result<(Box<dyn FitFunction>, Option<DomainBinding>)> {
    let pairs = key_values(term)?;
    let type_name = pairs
        .iter()
        .find(|(key, _)| *key == "name")
        .map(|(_, value)| *value)
        .ok_or_else(|| FitError::InvalidInput(format!("term '{}' has no name", term)))?;
    let mut function = factory.create(type_name)?;

    // Attributes first, they may change the parameter list
    let attributes = function.attribute_names();
    for &(key, value) in &pairs {
        if attributes.iter().any(|a| a == key) {
            let current = function.attribute(key)?;
            function.set_attribute(key, current.parse_like(key, value)?)?;
        }
    }

    let mut domains = None;
    let mut ties = Vec::new();
    let mut constraints = Vec::new();
    for &(key, value) in &pairs {
        match key {
            "name" => {}
            "ties" => ties.push(value),
            "constraints" => constraints.push(value),
            "$domains" => domains = Some(DomainBinding::parse(value, member)?),
            _ if attributes.iter().any(|a| a == key) => {}
            _ => match value.parse::<f64>() {
                Ok(parsed) => function.set_parameter_by_name(key, parsed)?,
                Err(_) if function.parameter_index(key).is_ok() => {
                    return Err(FitError::InvalidInput(format!(
                        "value '{}' of parameter '{}' is not a number",
                        value, key
                    )));
                }
                Err(_) => {
                    return Err(FitError::UnknownAttribute(format!(
                        "{} has no attribute '{}'",
                        type_name, key
                    )));
                }
            },
        }
    }
    for value in ties {
        apply_ties(function.as_mut(), value)?;
    }
    for value in constraints {
        apply_constraints(function.as_mut(), value)?;
    }
    Ok((function, domains))
}

/// Apply a tie list `(a=formula,b=c=formula,...)`. Items written as inequalities are
/// treated as constraints.
pub fn apply_ties(function: &mut dyn FitFunction, list: &str) -> Result<()> {
    for item in split_top(strip_parens(list), ',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item.contains('<') || item.contains('>') {
            let (name, bound) = parse_constraint(item)?;
            function.add_constraint(&name, bound)?;
            continue;
        }
        let sides: Vec<&str> = item.split('=').map(str::trim).collect();
        let Some((formula, targets)) = sides.split_last().filter(|(_, t)| !t.is_empty()) else {
            return Err(FitError::InvalidTieExpression {
                expression: item.to_string(),
                message: "expected name=formula".to_string(),
            });
        };
        for target in targets {
            function.tie(target, formula)?;
        }
    }
    Ok(())
}

fn apply_constraints(function: &mut dyn FitFunction, list: &str) -> Result<()> {
    for item in split_top(strip_parens(list), ',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (name, bound) = parse_constraint(item)?;
        function.add_constraint(&name, bound)?;
    }
    Ok(())
}

/// Parse `lo<name<hi`, `lo<name`, `name<hi` or their `>` mirror images.
///
/// # Examples
///
/// ```
/// use fitcore_rs::function::parser::parse_constraint;
///
/// let (name, bound) = parse_constraint("0 < Sigma < 2").unwrap();
/// assert_eq!(name, "Sigma");
/// assert_eq!((bound.lower, bound.upper), (Some(0.0), Some(2.0)));
///
/// let (_, bound) = parse_constraint("Height > 1").unwrap();
/// assert_eq!((bound.lower, bound.upper), (Some(1.0), None));
/// ```
pub fn parse_constraint(text: &str) -> Result<(String, BoundConstraint)> {
    let invalid = || FitError::InvalidConstraint(text.to_string());
    let (mut parts, ascending): (Vec<&str>, bool) = match (text.contains('<'), text.contains('>')) {
        (true, false) => (text.split('<').map(str::trim).collect(), true),
        (false, true) => (text.split('>').map(str::trim).collect(), false),
        _ => return Err(invalid()),
    };
    if !ascending {
        parts.reverse();
    }
    let number = |s: &str| s.parse::<f64>().ok();
    let (lower, name, upper) = match parts.as_slice() {
        [lo, name, hi] => (
            Some(number(lo).ok_or_else(invalid)?),
            *name,
            Some(number(hi).ok_or_else(invalid)?),
        ),
        [a, b] => match (number(a), number(b)) {
            (Some(lo), None) => (Some(lo), *b, None),
            (None, Some(hi)) => (None, *a, Some(hi)),
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };
    if name.is_empty() || number(name).is_some() {
        return Err(invalid());
    }
    Ok((name.to_string(), BoundConstraint::new(lower, upper)?))
}

/// Split on `sep`, ignoring separators inside parentheses or quotes.
fn split_top(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            c if c == sep && depth == 0 && !quoted => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn split_pair(item: &str) -> Result<(&str, &str)> {
    item.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| FitError::InvalidInput(format!("expected key=value, got '{}'", item)))
}

fn key_values(term: &str) -> Result<Vec<(&str, &str)>> {
    split_top(term, ',')
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .map(split_pair)
        .collect()
}

fn strip_parens(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text)
}

/// Byte index of the parenthesis closing the one at the start of `text`.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0;
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
