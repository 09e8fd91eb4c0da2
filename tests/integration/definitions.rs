//! Fits set up from definition strings and serialized configs.

use approx::assert_relative_eq;
use fitcore_rs::fit::{DatasetBinding, Fit, FitConfig};
use fitcore_rs::function::parser::parse_function;
use fitcore_rs::{FitError, FunctionFactory};

use crate::test_helpers::{grid, line_service, service, store};

#[test]
fn test_user_formula_fit() {
    let x = grid(0.0, 0.2, 50);
    let y: Vec<f64> = x.iter().map(|x| 3.0 * (-0.7 * x).exp() + 0.5).collect();
    let service = service();
    store(&service, "decay", x, y, vec![0.01; 50]);

    let config = FitConfig::new("name=UserFunction,Formula=\"a*exp(-b*x)+c\",a=2,b=1,c=0")
        .with_dataset(DatasetBinding::new("decay"));
    let mut fit = Fit::new(config, service);
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    let f = fit.function().unwrap();
    assert_relative_eq!(f.get_parameter_by_name("a").unwrap(), 3.0, epsilon = 1e-5);
    assert_relative_eq!(f.get_parameter_by_name("b").unwrap(), 0.7, epsilon = 1e-5);
    assert_relative_eq!(f.get_parameter_by_name("c").unwrap(), 0.5, epsilon = 1e-5);
}

#[test]
fn test_product_function_fit() {
    let x = grid(0.0, 0.1, 60);
    let y: Vec<f64> = x.iter().map(|x| 4.0 * (-x / 2.0).exp()).collect();
    let service = service();
    store(&service, "decay", x, y, vec![0.01; 60]);

    // The height of the decay is fixed so the product is identifiable
    let config = FitConfig::new(
        "composite=ProductFunction;\
         name=ExpDecay,Height=1,Lifetime=1,ties=(Height=1);\
         name=FlatBackground,A0=2",
    )
    .with_dataset(DatasetBinding::new("decay"));
    let mut fit = Fit::new(config, service);
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    let f = fit.function().unwrap();
    assert_eq!(f.get_parameter_by_name("f0.Height").unwrap(), 1.0);
    assert_relative_eq!(f.get_parameter_by_name("f0.Lifetime").unwrap(), 2.0, epsilon = 1e-6);
    assert_relative_eq!(f.get_parameter_by_name("f1.A0").unwrap(), 4.0, epsilon = 1e-6);
}

#[test]
fn test_outcome_definition_reproduces_the_fit() {
    let config = FitConfig::new("name=LinearBackground,A0=0,A1=0;name=FlatBackground,A0=0.5")
        .with_dataset(DatasetBinding::new("line"))
        .with_ties("f1.A0=0.5");
    let mut fit = Fit::new(config, line_service());
    let outcome = fit.execute().unwrap();

    let rebuilt = parse_function(&outcome.function, &FunctionFactory::with_defaults()).unwrap();
    let fitted = fit.function().unwrap();
    assert_eq!(rebuilt.values(), fitted.values());
    assert!(rebuilt.is_fixed(2));
    assert_relative_eq!(rebuilt.get_parameter(0).unwrap(), 0.5, epsilon = 1e-6);

    // Refitting from the rendered definition stays at the minimum
    let again = FitConfig::new(&outcome.function).with_dataset(DatasetBinding::new("line"));
    let second = Fit::new(again, line_service()).execute().unwrap();
    assert!(second.cost <= outcome.cost + 1e-12);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = FitConfig::new("name=LinearBackground")
        .with_dataset(DatasetBinding::new("line").with_range(0.0, 20.0))
        .with_minimizer("BFGS")
        .with_constraints("0 < A0 < 5")
        .with_output("json");
    let json = config.to_json().unwrap();
    let restored = FitConfig::from_json(&json).unwrap();
    assert_eq!(restored, config);

    let service = line_service();
    let outcome = Fit::new(restored, service.clone()).execute().unwrap();
    assert_eq!(outcome.status, "success");
    assert_eq!(outcome.degrees_of_freedom, 21 - 2);
    assert_eq!(outcome.parameters.name, "json_Parameters");
    let covariance = outcome.covariance.unwrap();
    assert_relative_eq!(covariance.get("A0", "A0").unwrap(), 100.0, epsilon = 1e-9);
}

#[test]
fn test_definition_errors_surface_before_iterating() {
    let run = |definition: &str| {
        let config = FitConfig::new(definition).with_dataset(DatasetBinding::new("line"));
        Fit::new(config, line_service()).execute()
    };
    assert!(matches!(run("name=Voigt"), Err(FitError::UnknownFunctionType(_))));
    assert!(matches!(
        run("name=LinearBackground,ties=(A0=2*Missing)"),
        Err(FitError::InvalidTieExpression { .. } | FitError::UnknownParameter(_))
    ));
    assert!(matches!(
        run("name=LinearBackground,constraints=(A0 < A1)"),
        Err(FitError::InvalidConstraint(_))
    ));

    let config = FitConfig::new("name=LinearBackground")
        .with_dataset(DatasetBinding::new("nowhere"));
    assert!(matches!(
        Fit::new(config, line_service()).execute(),
        Err(FitError::WorkspaceNotFound(_))
    ));
}
