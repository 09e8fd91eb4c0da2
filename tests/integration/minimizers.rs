//! Every registered minimizer driven through the orchestrator.

use std::sync::Arc;

use approx::assert_relative_eq;
use fitcore_rs::fit::{DatasetBinding, Fit, FitConfig, InMemoryDataService};
use fitcore_rs::minimizers::{MinimizerState, Simplex};
use fitcore_rs::{FitError, FunctionFactory, MinimizerFactory};

use crate::test_helpers::{add_noise, grid, line_service, service, store};

/// `y = 1 + 2x` on a centred grid, so every method sees a well-conditioned
/// problem.
fn centred_line(noise: Option<u64>) -> Arc<InMemoryDataService> {
    let x = grid(-1.0, 0.1, 21);
    let mut y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
    if let Some(seed) = noise {
        add_noise(&mut y, 0.1, seed);
    }
    let service = service();
    store(&service, "centred", x, y, vec![0.1; 21]);
    service
}

fn fit_line(minimizer: &str, service: Arc<InMemoryDataService>) -> Fit {
    let config = FitConfig::new("name=LinearBackground,A0=0,A1=0")
        .with_dataset(DatasetBinding::new("centred"))
        .with_minimizer(minimizer)
        .with_max_iterations(5000);
    Fit::new(config, service)
}

#[test]
fn test_every_minimizer_fits_a_line() {
    let cases = [
        ("Levenberg-Marquardt", 1e-8),
        ("Levenberg-MarquardtMD", 1e-8),
        ("SteepestDescent", 1e-5),
        ("Conjugate gradient (Fletcher-Reeves imp.)", 1e-6),
        ("Conjugate gradient (Polak-Ribiere imp.)", 1e-6),
        ("BFGS", 1e-6),
        ("Damped GaussNewton", 1e-8),
        ("Simplex", 1e-3),
    ];
    for (name, tolerance) in cases {
        let mut fit = fit_line(name, centred_line(None));
        let outcome = fit.execute().unwrap();
        assert_eq!(outcome.status, "success", "{}", name);
        assert_eq!(outcome.state, MinimizerState::Converged, "{}", name);
        assert!(outcome.iterations > 0, "{}", name);

        let line = fit.function().unwrap();
        let a0 = line.get_parameter_by_name("A0").unwrap();
        let a1 = line.get_parameter_by_name("A1").unwrap();
        assert!((a0 - 1.0).abs() < tolerance, "{}: A0 = {}", name, a0);
        assert!((a1 - 2.0).abs() < tolerance, "{}: A1 = {}", name, a1);
    }
}

#[test]
fn test_minimizer_options_are_applied() {
    let mut fit = fit_line("Simplex,SizeTolerance=1e-10", centred_line(None));
    fit.execute().unwrap();
    let a1 = fit.function().unwrap().get_parameter_by_name("A1").unwrap();
    assert_relative_eq!(a1, 2.0, epsilon = 1e-6);

    let mut bad = fit_line("Simplex,Tolerance=1", centred_line(None));
    assert!(matches!(bad.execute(), Err(FitError::InvalidInput(_))));

    let mut unknown = fit_line("Newton", centred_line(None));
    assert!(matches!(unknown.execute(), Err(FitError::UnknownMinimizer(_))));
}

#[test]
fn test_degenerate_parameters_fail_gauss_newton() {
    // Two constant backgrounds only constrain their sum
    let definition = "name=FlatBackground,A0=0;name=FlatBackground,A0=0";
    let config = FitConfig::new(definition)
        .with_dataset(DatasetBinding::new("line"))
        .with_minimizer("Damped GaussNewton");
    let mut fit = Fit::new(config, line_service());
    let outcome = fit.execute().unwrap();
    assert_eq!(outcome.state, MinimizerState::Failed);
    assert_ne!(outcome.status, "success");
    assert!(outcome.status.contains("Singular matrix"), "{}", outcome.status);

    // The rejected step is not applied
    let function = fit.function().unwrap();
    assert_eq!(function.get_parameter_by_name("f0.A0").unwrap(), 0.0);
    assert_eq!(function.get_parameter_by_name("f1.A0").unwrap(), 0.0);

    // Damping regularises the same system
    let config = FitConfig::new(definition)
        .with_dataset(DatasetBinding::new("line"))
        .with_minimizer("Levenberg-Marquardt");
    let mut fit = Fit::new(config, line_service());
    let outcome = fit.execute().unwrap();
    assert_eq!(outcome.status, "success");
    let function = fit.function().unwrap();
    let total = function.get_parameter_by_name("f0.A0").unwrap()
        + function.get_parameter_by_name("f1.A0").unwrap();
    assert_relative_eq!(total, 30.0, epsilon = 1e-6);
}

#[test]
fn test_fabada_errors_come_from_the_chain() {
    let service = centred_line(Some(11));

    let mut reference = fit_line("Levenberg-Marquardt", service.clone());
    let lm = reference.execute().unwrap();

    let mut fit = fit_line("FABADA,ChainLength=4000,BurnIn=1000,Seed=3", service);
    let outcome = fit.execute().unwrap();
    assert_eq!(outcome.status, "success");
    assert_eq!(outcome.iterations, 4000);

    // The best point of the chain is close to the least-squares minimum
    for name in ["A0", "A1"] {
        let best = outcome.parameters.get(name).unwrap();
        let exact = lm.parameters.get(name).unwrap();
        assert!(
            (best.value - exact.value).abs() < exact.error,
            "{}: {} vs {}",
            name,
            best.value,
            exact.value
        );
        // Chain spread agrees with the curvature estimate
        let ratio = best.error / exact.error;
        assert!(ratio > 0.5 && ratio < 2.0, "{}: ratio {}", name, ratio);
    }
}

#[test]
fn test_custom_minimizer_registration() {
    let mut factory = MinimizerFactory::with_defaults();
    factory.register("Quick", Simplex::new);
    let functions = Arc::new(FunctionFactory::with_defaults());
    let mut fit = fit_line("Quick", centred_line(None)).with_factories(functions, Arc::new(factory));
    let outcome = fit.execute().unwrap();
    assert_eq!(outcome.status, "success");
}
