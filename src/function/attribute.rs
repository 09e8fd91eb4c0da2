use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// A non-fitted configuration value of a function, such as a polynomial
/// order or a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Attribute::Double(v) => Some(*v),
            Attribute::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Parse `text` as a value of the same kind as `self`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore_rs::function::Attribute;
    ///
    /// let order = Attribute::Int(2).parse_like("n", "4").unwrap();
    /// assert_eq!(order, Attribute::Int(4));
    ///
    /// let flag = Attribute::Bool(false).parse_like("NumDeriv", "1").unwrap();
    /// assert_eq!(flag, Attribute::Bool(true));
    /// ```
    pub fn parse_like(&self, name: &str, text: &str) -> Result<Attribute> {
        let text = text.trim();
        let invalid = |kind: &str| FitError::InvalidAttribute {
            name: name.to_string(),
            message: format!("'{}' is not a valid {}", text, kind),
        };
        Ok(match self {
            Attribute::Int(_) => Attribute::Int(text.parse().map_err(|_| invalid("integer"))?),
            Attribute::Double(_) => {
                Attribute::Double(text.parse().map_err(|_| invalid("number"))?)
            }
            Attribute::Bool(_) => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Attribute::Bool(true),
                "false" | "0" => Attribute::Bool(false),
                _ => return Err(invalid("boolean")),
            },
            Attribute::Str(_) => Attribute::Str(unquote(text).to_string()),
        })
    }

    /// Value as written in a function definition.
    pub fn to_definition_value(&self) -> String {
        match self {
            Attribute::Int(v) => v.to_string(),
            Attribute::Double(v) => v.to_string(),
            Attribute::Bool(v) => v.to_string(),
            Attribute::Str(v) => format!("\"{}\"", v),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Attribute::Int(_) => "integer",
            Attribute::Double(_) => "number",
            Attribute::Bool(_) => "boolean",
            Attribute::Str(_) => "string",
        }
    }
}

pub(crate) fn unquote(text: &str) -> &str {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}
