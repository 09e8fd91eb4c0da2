use ndarray::{Array1, Array2};

use super::{CostFunction, CostFunctionKind};
use crate::domain::FitData;
use crate::error::{FitError, Result};
use crate::function::FitFunction;
use crate::parameters::ties::{order_ties, ResolvedTie};
use crate::utils::finite_difference::central_difference_jacobian;

/// Weighted (or unweighted) least squares plus bound penalties.
///
/// ```text
/// cost = Σ_active (w_i (y_i - f_i))² + Σ_bounded penalty_j
/// ```
///
/// The Jacobian is analytic when the function has no ties. With ties it is
/// taken numerically over the active vector, re-applying the ties for every
/// probe so the dependence of tied parameters is included.
#[derive(Debug)]
pub struct LeastSquares {
    function: Box<dyn FitFunction>,
    data: FitData,
    kind: CostFunctionKind,
    /// Indices of the active parameters in the function's full vector
    active: Vec<usize>,
    n_total: usize,
    ties: Vec<ResolvedTie>,
    tie_order: Vec<usize>,
}

impl LeastSquares {
    /// Bind a function to data.
    ///
    /// Fails if no data point is active or the function cannot cover every
    /// dataset of the joint domain.
    pub fn new(function: Box<dyn FitFunction>, data: FitData, kind: CostFunctionKind) -> Result<Self> {
        data.ensure_active()?;
        function.check_domains(data.domain().n_domains())?;
        let mut cost = Self {
            function,
            data,
            kind,
            active: Vec::new(),
            n_total: 0,
            ties: Vec::new(),
            tie_order: Vec::new(),
        };
        cost.refresh()?;
        Ok(cost)
    }

    /// Re-read the active set and ties from the function, e.g. after a
    /// parameter resize.
    pub fn refresh(&mut self) -> Result<()> {
        self.ties = self.function.resolved_ties()?;
        self.tie_order = order_ties(&self.ties).map_err(|target| FitError::InvalidTieExpression {
            expression: self.function.parameter_name(target).unwrap_or_default(),
            message: "circular tie dependency".to_string(),
        })?;
        self.function.apply_resolved_ties(&self.ties, &self.tie_order)?;
        self.active = self.function.active_indices();
        self.n_total = self.function.n_params();
        Ok(())
    }

    pub fn function(&self) -> &dyn FitFunction {
        self.function.as_ref()
    }

    /// Mutable access to the function. Call [`LeastSquares::refresh`] after
    /// changes that alter the parameter layout.
    pub fn function_mut(&mut self) -> &mut dyn FitFunction {
        self.function.as_mut()
    }

    pub fn into_function(self) -> Box<dyn FitFunction> {
        self.function
    }

    pub fn data(&self) -> &FitData {
        &self.data
    }

    pub fn kind(&self) -> CostFunctionKind {
        self.kind
    }

    /// Number of points entering the cost.
    pub fn n_data(&self) -> usize {
        self.data.n_active()
    }

    /// Full-vector indices of the active parameters.
    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    fn weight(&self, global: usize) -> f64 {
        if self.kind.is_weighted() {
            self.data.values().weights()[global]
        } else {
            1.0
        }
    }

    /// Whether the function's parameter count changed since the last
    /// [`LeastSquares::refresh`].
    pub fn layout_changed(&self) -> bool {
        self.function.n_params() != self.n_total
    }

    fn check_layout(&self) -> Result<()> {
        let n = self.function.n_params();
        if n != self.n_total {
            return Err(FitError::InconsistentParameters(format!(
                "function has {} parameters, cost function was set up for {}",
                n, self.n_total
            )));
        }
        Ok(())
    }

    /// Evaluate the model at every domain point into the calculated values.
    pub fn calculate(&mut self) -> Result<()> {
        let mut calculated = vec![0.0; self.data.domain().len()];
        self.function
            .function_joint(self.data.domain(), &mut calculated)?;
        self.data.values_mut().calculated_mut().copy_from_slice(&calculated);
        Ok(())
    }

    /// Weighted residuals `w_i (y_i - f_i)` over the active points.
    pub fn residuals(&mut self) -> Result<Array1<f64>> {
        self.check_layout()?;
        self.calculate()?;
        let values = self.data.values();
        let mut residuals = Array1::zeros(self.data.n_active());
        for (k, &i) in self.data.active().iter().enumerate() {
            let f = values.calculated()[i];
            if !f.is_finite() {
                return Err(FitError::FunctionEvaluation(format!(
                    "{} is not finite at x = {}",
                    self.function.name(),
                    self.x_at(i)
                )));
            }
            residuals[k] = self.weight(i) * (values.observed()[i] - f);
        }
        Ok(residuals)
    }

    fn x_at(&self, global: usize) -> f64 {
        self.data
            .domain()
            .locate(global)
            .map_or(f64::NAN, |(d, local)| self.data.domain().domain(d).x()[local])
    }

    /// Jacobian of the weighted model values `w_i f_i`, rows over the active
    /// points and columns over the active parameters.
    pub fn weighted_jacobian(&self) -> Result<Array2<f64>> {
        self.check_layout()?;
        let rows = self.data.active();
        let domain = self.data.domain();
        let mut jacobian = Array2::zeros((rows.len(), self.active.len()));

        if self.ties.is_empty() {
            let mut full = Array2::zeros((domain.len(), self.n_total));
            self.function.function_deriv_joint(domain, full.view_mut())?;
            for (r, &i) in rows.iter().enumerate() {
                let w = self.weight(i);
                for (c, &j) in self.active.iter().enumerate() {
                    jacobian[[r, c]] = w * full[[i, j]];
                }
            }
        } else {
            let mut probe = self.function.clone_box();
            let mut buffer = vec![0.0; domain.len()];
            central_difference_jacobian(
                &self.parameters().to_vec(),
                rows.len(),
                |p, out| {
                    for (&index, &v) in self.active.iter().zip(p) {
                        probe.set_parameter(index, v)?;
                    }
                    probe.apply_resolved_ties(&self.ties, &self.tie_order)?;
                    probe.function_joint(domain, &mut buffer)?;
                    for (o, &i) in out.iter_mut().zip(rows) {
                        *o = self.weight(i) * buffer[i];
                    }
                    Ok(())
                },
                jacobian.view_mut(),
            )?;
        }

        if jacobian.iter().any(|v| !v.is_finite()) {
            return Err(FitError::FunctionEvaluation(format!(
                "Jacobian of {} is not finite",
                self.function.name()
            )));
        }
        Ok(jacobian)
    }

    /// Bound penalty value, gradient and Hessian diagonal over the active
    /// parameters. The value includes tied and fixed parameters.
    fn penalty_terms(&self) -> (f64, Array1<f64>, Array1<f64>) {
        let mut gradient = Array1::zeros(self.active.len());
        let mut curvature = Array1::zeros(self.active.len());
        for (k, &j) in self.active.iter().enumerate() {
            if let Ok(param) = self.function.parameter(j) {
                if let Some(bound) = param.bound() {
                    gradient[k] = bound.penalty_deriv(param.value());
                    curvature[k] = bound.penalty_deriv2(param.value());
                }
            }
        }
        (self.function.penalty(), gradient, curvature)
    }
}

impl CostFunction for LeastSquares {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn n_params(&self) -> usize {
        self.active.len()
    }

    fn parameters(&self) -> Array1<f64> {
        self.active
            .iter()
            .map(|&j| self.function.get_parameter(j).unwrap_or(f64::NAN))
            .collect()
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        self.check_layout()?;
        if params.len() != self.active.len() {
            return Err(FitError::InconsistentParameters(format!(
                "expected {} active parameters, got {}",
                self.active.len(),
                params.len()
            )));
        }
        for (&j, &v) in self.active.iter().zip(params.iter()) {
            self.function.set_parameter(j, v)?;
        }
        self.function
            .apply_resolved_ties(&self.ties, &self.tie_order)
    }

    fn val(&mut self) -> Result<f64> {
        let residuals = self.residuals()?;
        Ok(residuals.dot(&residuals) + self.function.penalty())
    }

    fn val_and_deriv(&mut self) -> Result<(f64, Array1<f64>)> {
        let residuals = self.residuals()?;
        let jacobian = self.weighted_jacobian()?;
        let (penalty, penalty_gradient, _) = self.penalty_terms();
        let value = residuals.dot(&residuals) + penalty;
        let gradient = jacobian.t().dot(&residuals) * -2.0 + penalty_gradient;
        Ok((value, gradient))
    }

    fn val_deriv_hessian(&mut self) -> Result<(f64, Array1<f64>, Array2<f64>)> {
        let residuals = self.residuals()?;
        let jacobian = self.weighted_jacobian()?;
        let (penalty, penalty_gradient, penalty_curvature) = self.penalty_terms();
        let value = residuals.dot(&residuals) + penalty;
        let gradient = jacobian.t().dot(&residuals) * -2.0 + penalty_gradient;
        let mut hessian = jacobian.t().dot(&jacobian) * 2.0;
        for (k, c) in penalty_curvature.iter().enumerate() {
            hessian[[k, k]] += c;
        }
        Ok((value, gradient, hessian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitWindow;
    use crate::function::{Attribute, ParamFunction};
    use crate::models::{Gaussian, LinearBackground, Polynomial};
    use crate::parameters::BoundConstraint;
    use approx::assert_relative_eq;

    fn line_data(sigma: f64) -> FitData {
        let x: Vec<f64> = (0..5).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
        let mut data = FitData::new();
        data.add_dataset(&x, &y, &vec![sigma; 5], &FitWindow::default())
            .unwrap();
        data
    }

    fn line(a0: f64, a1: f64) -> Box<dyn FitFunction> {
        Box::new(
            ParamFunction::new(LinearBackground)
                .unwrap()
                .with_parameter("A0", a0)
                .unwrap()
                .with_parameter("A1", a1)
                .unwrap(),
        )
    }

    #[test]
    fn test_weighted_value() {
        let mut cost = LeastSquares::new(line(0.0, 2.0), line_data(0.5), CostFunctionKind::LeastSquares)
            .unwrap();
        // every residual is 1 / 0.5
        assert_relative_eq!(cost.val().unwrap(), 5.0 * 4.0);

        let mut unweighted = LeastSquares::new(
            line(0.0, 2.0),
            line_data(0.5),
            CostFunctionKind::UnweightedLeastSquares,
        )
        .unwrap();
        assert_relative_eq!(unweighted.val().unwrap(), 5.0);
    }

    #[test]
    fn test_gradient_matches_numeric() {
        let mut cost = LeastSquares::new(line(0.3, 1.7), line_data(0.5), CostFunctionKind::LeastSquares)
            .unwrap();
        let (_, gradient) = cost.val_and_deriv().unwrap();
        let p = cost.parameters();
        for k in 0..2 {
            let h = 1e-6;
            let mut plus = p.clone();
            plus[k] += h;
            cost.set_parameters(&plus).unwrap();
            let fp = cost.val().unwrap();
            let mut minus = p.clone();
            minus[k] -= h;
            cost.set_parameters(&minus).unwrap();
            let fm = cost.val().unwrap();
            assert_relative_eq!(gradient[k], (fp - fm) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_active_vector_skips_fixed_and_tied() {
        let mut function = ParamFunction::new(Gaussian).unwrap();
        function.fix(1).unwrap();
        function.tie("Sigma", "Height / 10").unwrap();
        let mut cost = LeastSquares::new(Box::new(function), line_data(1.0), CostFunctionKind::LeastSquares)
            .unwrap();
        assert_eq!(cost.n_params(), 1);
        cost.set_parameters(&Array1::from(vec![20.0])).unwrap();
        assert_relative_eq!(cost.function().get_parameter(2).unwrap(), 2.0);
        assert!(matches!(
            cost.set_parameters(&Array1::from(vec![1.0, 2.0])),
            Err(FitError::InconsistentParameters(_))
        ));

        let (_, gradient, hessian) = cost.val_deriv_hessian().unwrap();
        assert_eq!(gradient.len(), 1);
        assert_eq!(hessian.dim(), (1, 1));
    }

    #[test]
    fn test_penalty_enters_cost() {
        let mut function = line(1.0, 2.0);
        function
            .add_constraint("A0", BoundConstraint::new(Some(2.0), None).unwrap())
            .unwrap();
        let mut cost = LeastSquares::new(function, line_data(1.0), CostFunctionKind::LeastSquares).unwrap();
        assert_relative_eq!(cost.val().unwrap(), 1000.0);
        let (_, gradient) = cost.val_and_deriv().unwrap();
        assert!(gradient[0] < 0.0);
    }

    #[test]
    fn test_resize_without_refresh_is_fatal() {
        let function = Box::new(ParamFunction::new(Polynomial::new(1)).unwrap());
        let mut cost = LeastSquares::new(function, line_data(1.0), CostFunctionKind::LeastSquares).unwrap();
        cost.function_mut()
            .set_attribute("n", Attribute::Int(2))
            .unwrap();
        assert!(matches!(cost.val(), Err(FitError::InconsistentParameters(_))));
        cost.refresh().unwrap();
        assert_eq!(cost.n_params(), 3);
        assert!(cost.val().is_ok());
    }

    #[test]
    fn test_non_finite_model() {
        let function = Box::new(
            ParamFunction::new(Gaussian)
                .unwrap()
                .with_parameter("Sigma", 0.0)
                .unwrap()
                .with_parameter("Height", 1.0)
                .unwrap(),
        );
        let mut cost = LeastSquares::new(function, line_data(1.0), CostFunctionKind::LeastSquares).unwrap();
        let err = cost.val().unwrap_err();
        assert!(err.is_recoverable());
    }
}
