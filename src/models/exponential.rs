//! Exponential kinds.

use ndarray::ArrayViewMut2;

use super::{check_lengths, declarations};
use crate::error::Result;
use crate::function::{Differentiable, Evaluable};

/// An exponential decay.
///
/// f(x) = Height * exp(-x / Lifetime)
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpDecay;

impl Evaluable for ExpDecay {
    fn type_name(&self) -> &str {
        "ExpDecay"
    }

    fn parameter_declarations(&self) -> Vec<(String, f64)> {
        declarations(&[("Height", 1.0), ("Lifetime", 1.0)])
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths(x, out.len())?;
        let (height, lifetime) = (params[0], params[1]);
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = height * (-xi / lifetime).exp();
        }
        Ok(())
    }

    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn Evaluable> {
        Box::new(*self)
    }
}

impl Differentiable for ExpDecay {
    fn eval_deriv(
        &self,
        params: &[f64],
        x: &[f64],
        mut jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        let (height, lifetime) = (params[0], params[1]);
        for (i, &xi) in x.iter().enumerate() {
            let e = (-xi / lifetime).exp();
            jacobian[[i, 0]] = e;
            jacobian[[i, 1]] = height * e * xi / (lifetime * lifetime);
        }
        Ok(())
    }
}
