//! Built-in function kinds.
//!
//! Each kind implements [`Evaluable`](crate::function::Evaluable) and, where
//! the derivative is known in closed form,
//! [`Differentiable`](crate::function::Differentiable). The default
//! [`FunctionFactory`](crate::function::FunctionFactory) registers all of them.

mod exponential;
mod peak;
mod polynomial;
mod user;

pub use exponential::ExpDecay;
pub use peak::{Gaussian, Lorentzian, FWHM_PER_SIGMA};
pub use polynomial::{FlatBackground, LinearBackground, Polynomial, Quadratic};
pub use user::UserFunction;

use crate::error::{FitError, Result};

fn declarations(params: &[(&str, f64)]) -> Vec<(String, f64)> {
    params.iter().map(|(n, v)| (n.to_string(), *v)).collect()
}

fn check_lengths(x: &[f64], out_len: usize) -> Result<()> {
    if x.len() != out_len {
        return Err(FitError::DimensionMismatch(format!(
            "{} points but {} outputs",
            x.len(),
            out_len
        )));
    }
    Ok(())
}
