//! Peak kinds.

use std::f64::consts::PI;

use ndarray::ArrayViewMut2;

use super::{check_lengths, declarations};
use crate::error::Result;
use crate::function::{Differentiable, Evaluable};

/// Ratio of the full width at half maximum to sigma for a Gaussian,
/// `2 * sqrt(2 * ln 2)`.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// A Gaussian peak.
///
/// f(x) = Height * exp(-(x - PeakCentre)² / (2 * Sigma²))
///
/// The full width at half maximum is `FWHM_PER_SIGMA * Sigma`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl Evaluable for Gaussian {
    fn type_name(&self) -> &str {
        "Gaussian"
    }

    fn parameter_declarations(&self) -> Vec<(String, f64)> {
        declarations(&[("Height", 0.0), ("PeakCentre", 0.0), ("Sigma", 1.0)])
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths(x, out.len())?;
        let (height, centre, sigma) = (params[0], params[1], params[2]);
        let w = 1.0 / (sigma * sigma);
        for (o, &xi) in out.iter_mut().zip(x) {
            let d = xi - centre;
            *o = height * (-0.5 * d * d * w).exp();
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

impl Differentiable for Gaussian {
    fn eval_deriv(
        &self,
        params: &[f64],
        x: &[f64],
        mut jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        let (height, centre, sigma) = (params[0], params[1], params[2]);
        let w = 1.0 / (sigma * sigma);
        for (i, &xi) in x.iter().enumerate() {
            let d = xi - centre;
            let e = (-0.5 * d * d * w).exp();
            jacobian[[i, 0]] = e;
            jacobian[[i, 1]] = height * e * d * w;
            jacobian[[i, 2]] = height * e * d * d * w / sigma;
        }
        Ok(())
    }
}

/// A Lorentzian peak with integrated intensity `Amplitude`.
///
/// f(x) = Amplitude / π * (FWHM/2) / ((x - PeakCentre)² + (FWHM/2)²)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lorentzian;

impl Evaluable for Lorentzian {
    fn type_name(&self) -> &str {
        "Lorentzian"
    }

    fn parameter_declarations(&self) -> Vec<(String, f64)> {
        declarations(&[("Amplitude", 1.0), ("PeakCentre", 0.0), ("FWHM", 1.0)])
    }

    fn eval(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths(x, out.len())?;
        let (amplitude, centre, g) = (params[0], params[1], 0.5 * params[2]);
        for (o, &xi) in out.iter_mut().zip(x) {
            let d = xi - centre;
            *o = amplitude * g / (PI * (d * d + g * g));
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

impl Differentiable for Lorentzian {
    fn eval_deriv(
        &self,
        params: &[f64],
        x: &[f64],
        mut jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        let (amplitude, centre, g) = (params[0], params[1], 0.5 * params[2]);
        for (i, &xi) in x.iter().enumerate() {
            let d = xi - centre;
            let denom = d * d + g * g;
            jacobian[[i, 0]] = g / (PI * denom);
            jacobian[[i, 1]] = amplitude * g * 2.0 * d / (PI * denom * denom);
            jacobian[[i, 2]] = amplitude * (d * d - g * g) / (2.0 * PI * denom * denom);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::finite_difference::central_difference_jacobian;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn check_against_numeric(kind: &dyn Evaluable, params: &[f64], x: &[f64]) {
        let n = params.len();
        let mut analytic = Array2::zeros((x.len(), n));
        kind.as_differentiable()
            .unwrap()
            .eval_deriv(params, x, analytic.view_mut())
            .unwrap();
        let mut numeric = Array2::zeros((x.len(), n));
        central_difference_jacobian(params, x.len(), |p, out| kind.eval(p, x, out), numeric.view_mut())
            .unwrap();
        for (a, b) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_gaussian_half_maximum() {
        let sigma = 1.3;
        let half_width = 0.5 * FWHM_PER_SIGMA * sigma;
        let mut out = [0.0; 2];
        Gaussian
            .eval(&[10.0, 2.0, sigma], &[2.0, 2.0 + half_width], &mut out)
            .unwrap();
        assert_relative_eq!(out[0], 10.0);
        assert_relative_eq!(out[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lorentzian_peak_value() {
        let mut out = [0.0];
        Lorentzian.eval(&[2.0, 0.0, 0.5], &[0.0], &mut out).unwrap();
        assert_relative_eq!(out[0], 2.0 / (PI * 0.25));
    }

    #[test]
    fn test_derivatives() {
        let x = [-1.0, 0.3, 1.1, 2.4];
        check_against_numeric(&Gaussian, &[3.0, 0.8, 0.9], &x);
        check_against_numeric(&Lorentzian, &[3.0, 0.8, 0.9], &x);
    }
}
