//! Reference fits with known answers.

use approx::assert_relative_eq;
use fitcore_rs::fit::{DataService, DatasetBinding, Fit, FitConfig};
use fitcore_rs::function::CompositeFunction;
use fitcore_rs::models::FWHM_PER_SIGMA;
use fitcore_rs::{CostFunctionKind, FitError};

use crate::test_helpers::{add_noise, grid, line_service, service, store};

#[test]
fn test_linear_background_from_zero() {
    let config = FitConfig::new("name=LinearBackground,A0=0,A1=0")
        .with_dataset(DatasetBinding::new("line"));
    let mut fit = Fit::new(config, line_service());
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    assert!(outcome.cost < 1e-10);
    let line = fit.function().unwrap();
    assert_relative_eq!(line.get_parameter_by_name("A0").unwrap(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(line.get_parameter_by_name("A1").unwrap(), 2.0, epsilon = 1e-6);
}

#[test]
fn test_gaussian_peak() {
    let sigma = 2.62 / FWHM_PER_SIGMA;
    let x = grid(5.0, 0.1, 121);
    let mut y: Vec<f64> = x
        .iter()
        .map(|x| 97.8 * (-0.5 * ((x - 11.24) / sigma).powi(2)).exp())
        .collect();
    add_noise(&mut y, 1.0, 42);
    let service = service();
    store(&service, "peak", x, y, vec![1.0; 121]);

    let config = FitConfig::new("name=Gaussian,Height=90,PeakCentre=11,Sigma=1")
        .with_dataset(DatasetBinding::new("peak"))
        .with_output("peak");
    let mut fit = Fit::new(config, service.clone());
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    let peak = fit.function().unwrap();
    assert_relative_eq!(peak.get_parameter_by_name("Height").unwrap(), 97.8, epsilon = 1.5);
    assert_relative_eq!(peak.get_parameter_by_name("PeakCentre").unwrap(), 11.24, epsilon = 0.05);
    let fwhm = FWHM_PER_SIGMA * peak.get_parameter_by_name("Sigma").unwrap();
    assert_relative_eq!(fwhm, 2.62, epsilon = 0.1);

    // Unit noise with unit errors
    assert!(outcome.chi2_over_dof > 0.6 && outcome.chi2_over_dof < 1.4);

    // Errors are written back and reported in the parameter table
    let height = outcome.parameters.get("Height").unwrap();
    assert!(height.error > 0.0 && height.error < 2.0);
    assert_eq!(
        outcome.parameters.rows.last().unwrap().name,
        "Cost function value"
    );
    assert!(service.contains("peak_Workspace"));
}

#[test]
fn test_unweighted_errors_scale_with_scatter() {
    let x = grid(0.0, 1.0, 40);
    let mut y: Vec<f64> = x.iter().map(|x| 3.0 - 0.5 * x).collect();
    add_noise(&mut y, 0.2, 7);
    let service = service();
    // Deliberately wrong uncertainties; the unweighted fit ignores them
    store(&service, "scatter", x, y, vec![100.0; 40]);

    let run = |kind| {
        let config = FitConfig::new("name=LinearBackground")
            .with_dataset(DatasetBinding::new("scatter"))
            .with_cost_function(kind);
        Fit::new(config, service.clone()).execute().unwrap()
    };
    let unweighted = run(CostFunctionKind::UnweightedLeastSquares);
    let error = unweighted.parameters.get("A1").unwrap().error;
    // σ_slope = 0.2 / sqrt(Σ (x - x̄)²) ≈ 0.0027
    assert!(error > 0.0015 && error < 0.0045, "{}", error);

    let weighted = run(CostFunctionKind::LeastSquares);
    assert!(weighted.parameters.get("A1").unwrap().error > 0.5);
}

#[test]
fn test_empty_functions_rejected_before_execute() {
    let mut fit = Fit::new(FitConfig::default(), line_service());
    assert!(matches!(fit.set_function("  "), Err(FitError::EmptyFunction(_))));
    assert!(matches!(
        fit.set_function("composite=CompositeFunction"),
        Err(FitError::EmptyFunction(_))
    ));
    assert!(matches!(
        fit.set_function_object(Box::new(CompositeFunction::multi_domain())),
        Err(FitError::EmptyFunction(_))
    ));
    assert!(fit.function().is_none());

    // With no function at all, execute fails the same way
    let config = FitConfig::default().with_dataset(DatasetBinding::new("line"));
    assert!(matches!(
        Fit::new(config, line_service()).execute(),
        Err(FitError::EmptyFunction(_))
    ));
}

#[test]
fn test_fit_range_and_exclusions() {
    let x = grid(0.0, 1.0, 30);
    let mut y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
    // Spikes outside the range and inside an excluded region
    y[2] = 1000.0;
    y[15] = -1000.0;
    let service = service();
    store(&service, "spiky", x, y, vec![1.0; 30]);

    let config = FitConfig::new("name=LinearBackground")
        .with_dataset(
            DatasetBinding::new("spiky")
                .with_range(5.0, 29.0)
                .with_exclude(&[14.5, 15.5]),
        )
        .with_output("spiky");
    let mut fit = Fit::new(config, service.clone());
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    // 25 points in range, one excluded, two parameters
    assert_eq!(outcome.degrees_of_freedom, 22);
    let line = fit.function().unwrap();
    assert_relative_eq!(line.get_parameter_by_name("A1").unwrap(), 2.0, epsilon = 1e-6);

    // The model is still evaluated at the excluded point
    let curves = service.retrieve("spiky_Workspace").unwrap();
    let calc = curves.spectrum_by_label("calc").unwrap();
    assert_eq!(calc.len(), 25);
    assert_relative_eq!(calc.y[10], 31.0, epsilon = 1e-5);
}
