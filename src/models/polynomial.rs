//! Background and polynomial kinds.

use ndarray::ArrayViewMut2;

use super::{check_lengths, declarations};
use crate::error::{FitError, Result};
use crate::function::{Attribute, Differentiable, Evaluable};

/// `f(x) = A0`
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatBackground;

/// `f(x) = A0 + A1*x`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackground;

/// `f(x) = A0 + A1*x + A2*x^2`
#[derive(Debug, Clone, Copy, Default)]
pub struct Quadratic;

/// `f(x) = A0 + A1*x + ... + An*x^n`, with the order `n` as an attribute.
///
/// Changing `n` resizes the parameter vector; coefficients that exist
/// before and after the change keep their values.
#[derive(Debug, Clone, Copy)]
pub struct Polynomial {
    order: usize,
}

impl Polynomial {
    pub fn new(order: usize) -> Self {
        Self { order }
    }

    pub fn order(&self) -> usize {
        self.order
    }
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::new(0)
    }
}

fn eval_power_series(params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
    check_lengths(x, out.len())?;
    for (o, &xi) in out.iter_mut().zip(x) {
        // Horner
        *o = params.iter().rev().fold(0.0, |acc, &a| acc * xi + a);
    }
    Ok(())
}

fn deriv_power_series(n_params: usize, x: &[f64], mut jacobian: ArrayViewMut2<'_, f64>) -> Result<()> {
    for (i, &xi) in x.iter().enumerate() {
        let mut power = 1.0;
        for j in 0..n_params {
            jacobian[[i, j]] = power;
            power *= xi;
        }
    }
    Ok(())
}

macro_rules! fixed_power_series {
    ($kind:ident, $name:literal, [$($param:literal),+]) => {
        impl Evaluable for $kind {
            fn type_name(&self) -> &str {
                $name
            }

            fn parameter_declarations(&self) -> Vec<(String, f64)> {
                declarations(&[$(($param, 0.0)),+])
            }

            fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
                eval_power_series(params, x, out)
            }

            fn as_differentiable(&self) -> Option<&dyn Differentiable> {
                Some(self)
            }

            fn clone_box(&self) -> Box<dyn Evaluable> {
                Box::new(*self)
            }
        }

        impl Differentiable for $kind {
            fn eval_deriv(
                &self,
                params: &[f64],
                x: &[f64],
                jacobian: ArrayViewMut2<'_, f64>,
            ) -> Result<()> {
                deriv_power_series(params.len(), x, jacobian)
            }
        }
    };
}

fixed_power_series!(FlatBackground, "FlatBackground", ["A0"]);
fixed_power_series!(LinearBackground, "LinearBackground", ["A0", "A1"]);
fixed_power_series!(Quadratic, "Quadratic", ["A0", "A1", "A2"]);

impl Evaluable for Polynomial {
    fn type_name(&self) -> &str {
        "Polynomial"
    }

    fn parameter_declarations(&self) -> Vec<(String, f64)> {
        (0..=self.order).map(|i| (format!("A{}", i), 0.0)).collect()
    }

    fn attribute_names(&self) -> Vec<String> {
        vec!["n".to_string()]
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        match name {
            "n" => Ok(Attribute::Int(self.order as i64)),
            _ => Err(FitError::UnknownAttribute(format!(
                "Polynomial has no attribute '{}'",
                name
            ))),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<()> {
        if name != "n" {
            return Err(FitError::UnknownAttribute(format!(
                "Polynomial has no attribute '{}'",
                name
            )));
        }
        match value.as_int() {
            Some(order) if order >= 0 => {
                self.order = order as usize;
                Ok(())
            }
            _ => Err(FitError::InvalidAttribute {
                name: name.to_string(),
                message: format!(
                    "expected a non-negative integer, got {} {:?}",
                    value.kind_name(),
                    value
                ),
            }),
        }
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        eval_power_series(params, x, out)
    }

    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn Evaluable> {
        Box::new(*self)
    }
}

impl Differentiable for Polynomial {
    fn eval_deriv(
        &self,
        params: &[f64],
        x: &[f64],
        jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        deriv_power_series(params.len(), x, jacobian)
    }
}
