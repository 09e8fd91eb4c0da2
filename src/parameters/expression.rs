//! Expression parsing and evaluation for ties and user formulas
//!
//! Tie expressions (`f1.Sigma = 2*f0.Sigma`) and `UserFunction` formulas share
//! this engine. Identifiers may contain dots so that a prefixed composite
//! member name is a single variable. Once a tie is attached to a function, its
//! variables are resolved to parameter slots so that evaluation does not need
//! to look names up again.

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::recognize,
    error::{Error as NomError, ErrorKind},
    number::complete::double,
    sequence::pair,
    IResult, Parser,
};
use std::collections::HashMap;
use thiserror::Error;

/// Error that can occur during expression parsing or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Undefined parameter slot: {index}")]
    UndefinedParameter { index: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },
}

/// Result type for expression evaluation
pub type ExprResult<T> = Result<T, ExpressionError>;

type Res<'a, T> = IResult<&'a str, T>;

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number
    Number(f64),

    /// Variable reference by name
    Variable(String),

    /// Variable resolved to a position in a parameter vector
    Parameter(usize),

    /// Unary operations
    Unary(UnaryOp, Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(String, Vec<Expression>),
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,

    /// Subtraction (-)
    Sub,

    /// Multiplication (*)
    Mul,

    /// Division (/)
    Div,

    /// Power (^)
    Pow,
}

impl BinaryOp {
    fn from_char(c: char) -> Self {
        match c {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            _ => BinaryOp::Pow,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

/// Context for expression evaluation, providing variable values
pub trait EvaluationContext {
    /// Get the value of a named variable
    fn get_variable(&self, name: &str) -> ExprResult<f64>;

    /// Get the value of a resolved parameter slot
    fn get_parameter(&self, index: usize) -> ExprResult<f64> {
        Err(ExpressionError::UndefinedParameter { index })
    }
}

impl EvaluationContext for HashMap<String, f64> {
    fn get_variable(&self, name: &str) -> ExprResult<f64> {
        self.get(name)
            .copied()
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

/// Evaluation context over a flat parameter vector.
#[derive(Debug, Clone, Copy)]
pub struct SlotContext<'a>(pub &'a [f64]);

impl EvaluationContext for SlotContext<'_> {
    fn get_variable(&self, name: &str) -> ExprResult<f64> {
        Err(ExpressionError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    fn get_parameter(&self, index: usize) -> ExprResult<f64> {
        self.0
            .get(index)
            .copied()
            .ok_or(ExpressionError::UndefinedParameter { index })
    }
}

impl Expression {
    /// Parse an expression from a string
    pub fn parse(input: &str) -> ExprResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::ParseError {
                message: "empty expression".to_string(),
            });
        }
        match additive(trimmed) {
            Ok((remainder, expr)) => {
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::ParseError {
                        message: format!("Unexpected trailing characters: '{}'", remainder),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{:?}", e),
            }),
        }
    }

    /// Evaluate the expression with the given context
    pub fn evaluate<C: EvaluationContext + ?Sized>(&self, context: &C) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),

            Self::Variable(name) => context.get_variable(name),

            Self::Parameter(index) => context.get_parameter(*index),

            Self::Unary(UnaryOp::Neg, expr) => Ok(-expr.evaluate(context)?),

            Self::Binary(op, left, right) => {
                let lhs = left.evaluate(context)?;
                let rhs = right.evaluate(context)?;

                match op {
                    BinaryOp::Add => Ok(lhs + rhs),
                    BinaryOp::Sub => Ok(lhs - rhs),
                    BinaryOp::Mul => Ok(lhs * rhs),
                    BinaryOp::Div => {
                        if rhs == 0.0 {
                            Err(ExpressionError::DivisionByZero)
                        } else {
                            Ok(lhs / rhs)
                        }
                    }
                    BinaryOp::Pow => Ok(lhs.powf(rhs)),
                }
            }

            Self::Function(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(context))
                    .collect::<ExprResult<Vec<f64>>>()?;
                call_function(name, &values)
            }
        }
    }

    /// Find all variable names used in the expression, sorted and deduplicated
    pub fn variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.visit(&mut |node| {
            if let Self::Variable(name) = node {
                vars.push(name.clone());
            }
        });
        vars.sort();
        vars.dedup();
        vars
    }

    /// Find all parameter slots used in the expression, sorted and deduplicated
    pub fn parameters(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        self.visit(&mut |node| {
            if let Self::Parameter(index) = node {
                slots.push(*index);
            }
        });
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Replace every named variable by the slot returned from `lookup`.
    pub fn resolve<F>(&self, lookup: &F) -> ExprResult<Expression>
    where
        F: Fn(&str) -> Option<usize>,
    {
        Ok(match self {
            Self::Variable(name) => match lookup(name) {
                Some(index) => Self::Parameter(index),
                None => {
                    return Err(ExpressionError::UndefinedVariable { name: name.clone() });
                }
            },
            Self::Number(_) | Self::Parameter(_) => self.clone(),
            Self::Unary(op, expr) => Self::Unary(*op, Box::new(expr.resolve(lookup)?)),
            Self::Binary(op, left, right) => Self::Binary(
                *op,
                Box::new(left.resolve(lookup)?),
                Box::new(right.resolve(lookup)?),
            ),
            Self::Function(name, args) => Self::Function(
                name.clone(),
                args.iter()
                    .map(|arg| arg.resolve(lookup))
                    .collect::<ExprResult<Vec<_>>>()?,
            ),
        })
    }

    /// Move every parameter slot by `offset`.
    pub fn shifted(&self, offset: usize) -> Expression {
        match self {
            Self::Parameter(index) => Self::Parameter(index + offset),
            Self::Number(_) | Self::Variable(_) => self.clone(),
            Self::Unary(op, expr) => Self::Unary(*op, Box::new(expr.shifted(offset))),
            Self::Binary(op, left, right) => Self::Binary(
                *op,
                Box::new(left.shifted(offset)),
                Box::new(right.shifted(offset)),
            ),
            Self::Function(name, args) => {
                Self::Function(name.clone(), args.iter().map(|a| a.shifted(offset)).collect())
            }
        }
    }

    fn visit<F: FnMut(&Expression)>(&self, f: &mut F) {
        f(self);
        match self {
            Self::Unary(_, expr) => expr.visit(f),
            Self::Binary(_, left, right) => {
                left.visit(f);
                right.visit(f);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.visit(f);
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Variable(name) => write!(f, "{}", name),
            Self::Parameter(index) => write!(f, "${}", index),
            Self::Unary(UnaryOp::Neg, expr) => write!(f, "-({})", expr),
            Self::Binary(op, left, right) => write!(f, "({}{}{})", left, op.symbol(), right),
            Self::Function(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn call_function(name: &str, args: &[f64]) -> ExprResult<f64> {
    let unary = |f: fn(f64) -> f64| -> ExprResult<f64> {
        if args.len() != 1 {
            return Err(ExpressionError::InvalidOperation {
                message: format!("{}() requires 1 argument, got {}", name, args.len()),
            });
        }
        Ok(f(args[0]))
    };

    match name {
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "exp" => unary(f64::exp),
        "log" | "ln" => unary(f64::ln),
        "log10" => unary(f64::log10),
        "sqrt" => unary(f64::sqrt),
        "abs" => unary(f64::abs),
        "max" | "min" => {
            if args.len() < 2 {
                return Err(ExpressionError::InvalidOperation {
                    message: format!(
                        "{}() requires at least 2 arguments, got {}",
                        name,
                        args.len()
                    ),
                });
            }
            if name == "max" {
                Ok(args.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
            } else {
                Ok(args.iter().fold(f64::INFINITY, |a, &b| a.min(b)))
            }
        }
        _ => Err(ExpressionError::UndefinedFunction {
            name: name.to_string(),
        }),
    }
}

// Parser functions using nom

fn ws(input: &str) -> Res<'_, &str> {
    multispace0(input)
}

fn symbol(input: &str, c: char) -> Res<'_, char> {
    let (input, _) = ws(input)?;
    char(c).parse(input)
}

fn operator<'a>(input: &'a str, ops: &'static str) -> Res<'a, char> {
    let (input, _) = ws(input)?;
    one_of(ops).parse(input)
}

/// Identifiers start with a letter or underscore; dots are allowed afterwards.
fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))
    .parse(input)
}

/// Numbers must start with a digit or a dot so that `inf`/`nan` stay identifiers.
fn number(input: &str) -> Res<'_, Expression> {
    match input.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => {}
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Digit))),
    }
    let parsed: Res<'_, f64> = double(input);
    let (input, value) = parsed?;
    Ok((input, Expression::Number(value)))
}

fn arguments(input: &str) -> Res<'_, Vec<Expression>> {
    if let Ok((rest, _)) = symbol(input, ')') {
        return Ok((rest, Vec::new()));
    }
    let (mut input, first) = additive(input)?;
    let mut args = vec![first];
    loop {
        if let Ok((rest, _)) = symbol(input, ',') {
            let (rest, arg) = additive(rest)?;
            args.push(arg);
            input = rest;
        } else {
            let (rest, _) = symbol(input, ')')?;
            return Ok((rest, args));
        }
    }
}

fn primary(input: &str) -> Res<'_, Expression> {
    let (input, _) = ws(input)?;

    if let Ok(result) = number(input) {
        return Ok(result);
    }

    if let Ok((rest, _)) = symbol(input, '(') {
        let (rest, expr) = additive(rest)?;
        let (rest, _) = symbol(rest, ')')?;
        return Ok((rest, expr));
    }

    let (rest, name) = identifier(input)?;
    if let Ok((after_paren, _)) = symbol(rest, '(') {
        let (rest, args) = arguments(after_paren)?;
        return Ok((rest, Expression::Function(name.to_string(), args)));
    }
    if name == "pi" {
        return Ok((rest, Expression::Number(std::f64::consts::PI)));
    }
    Ok((rest, Expression::Variable(name.to_string())))
}

/// Power binds tighter than unary minus and is right-associative.
fn power(input: &str) -> Res<'_, Expression> {
    let (input, base) = primary(input)?;
    match operator(input, "^") {
        Ok((rest, _)) => {
            let (rest, exponent) = unary(rest)?;
            Ok((
                rest,
                Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

fn unary(input: &str) -> Res<'_, Expression> {
    match symbol(input, '-') {
        Ok((rest, _)) => {
            let (rest, expr) = unary(rest)?;
            Ok((rest, Expression::Unary(UnaryOp::Neg, Box::new(expr))))
        }
        Err(_) => power(input),
    }
}

fn multiplicative(input: &str) -> Res<'_, Expression> {
    let (mut input, mut acc) = unary(input)?;
    while let Ok((rest, op)) = operator(input, "*/") {
        let (rest, rhs) = unary(rest)?;
        acc = Expression::Binary(BinaryOp::from_char(op), Box::new(acc), Box::new(rhs));
        input = rest;
    }
    Ok((input, acc))
}

fn additive(input: &str) -> Res<'_, Expression> {
    let (mut input, mut acc) = multiplicative(input)?;
    while let Ok((rest, op)) = operator(input, "+-") {
        let (rest, rhs) = multiplicative(rest)?;
        acc = Expression::Binary(BinaryOp::from_char(op), Box::new(acc), Box::new(rhs));
        input = rest;
    }
    Ok((input, acc))
}
