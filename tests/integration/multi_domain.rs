//! Fits over several datasets at once.

use approx::assert_relative_eq;
use fitcore_rs::fit::{DatasetBinding, Fit, FitConfig};
use fitcore_rs::FitError;

use crate::test_helpers::{grid, service, store};

fn gaussian(x: f64, height: f64, centre: f64, sigma: f64) -> f64 {
    height * (-0.5 * ((x - centre) / sigma).powi(2)).exp()
}

#[test]
fn test_split_datasets_match_concatenated_fit() {
    let x = grid(0.0, 0.5, 30);
    let y: Vec<f64> = x.iter().map(|x| 0.5 + 1.5 * x + 0.1 * (3.0 * x).sin()).collect();
    let e = vec![0.2; 30];
    let service = service();
    store(&service, "whole", x.clone(), y.clone(), e.clone());
    store(&service, "left", x[..12].to_vec(), y[..12].to_vec(), e[..12].to_vec());
    store(&service, "right", x[12..].to_vec(), y[12..].to_vec(), e[12..].to_vec());

    let whole = FitConfig::new("name=LinearBackground").with_dataset(DatasetBinding::new("whole"));
    let mut single = Fit::new(whole, service.clone());
    let single_outcome = single.execute().unwrap();

    let split = FitConfig::new("name=LinearBackground")
        .with_dataset(DatasetBinding::new("left"))
        .with_dataset(DatasetBinding::new("right"));
    let mut joint = Fit::new(split, service);
    let joint_outcome = joint.execute().unwrap();

    assert_eq!(joint_outcome.degrees_of_freedom, single_outcome.degrees_of_freedom);
    assert_relative_eq!(joint_outcome.cost, single_outcome.cost, max_relative = 1e-8);
    for name in ["A0", "A1"] {
        assert_relative_eq!(
            joint.function().unwrap().get_parameter_by_name(name).unwrap(),
            single.function().unwrap().get_parameter_by_name(name).unwrap(),
            epsilon = 1e-8
        );
    }
}

#[test]
fn test_shared_width_across_datasets() {
    let x = grid(-5.0, 0.1, 101);
    let first: Vec<f64> = x.iter().map(|&x| 1.0 + gaussian(x, 6.0, 0.2, 0.8)).collect();
    let second: Vec<f64> = x.iter().map(|&x| 1.0 + gaussian(x, 2.5, 0.2, 0.8)).collect();
    let service = service();
    store(&service, "first", x.clone(), first, vec![0.05; 101]);
    store(&service, "second", x, second, vec![0.05; 101]);

    let config = FitConfig::new(
        "composite=MultiDomainFunction;\
         name=FlatBackground,A0=0.5,$domains=All;\
         name=Gaussian,Height=5,PeakCentre=0,Sigma=1,$domains=0;\
         name=Gaussian,Height=3,PeakCentre=0,Sigma=1,$domains=1;\
         ties=(f2.Sigma=f1.Sigma,f2.PeakCentre=f1.PeakCentre)",
    )
    .with_dataset(DatasetBinding::new("first"))
    .with_dataset(DatasetBinding::new("second"))
    .with_output("shared");
    let mut fit = Fit::new(config, service.clone());
    let outcome = fit.execute().unwrap();

    assert_eq!(outcome.status, "success");
    // Background, two heights, one shared centre and width
    assert_eq!(outcome.degrees_of_freedom, 202 - 5);
    let f = fit.function().unwrap();
    assert_relative_eq!(f.get_parameter_by_name("f0.A0").unwrap(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(f.get_parameter_by_name("f1.Height").unwrap(), 6.0, epsilon = 1e-6);
    assert_relative_eq!(f.get_parameter_by_name("f2.Height").unwrap(), 2.5, epsilon = 1e-6);
    assert_relative_eq!(f.get_parameter_by_name("f1.Sigma").unwrap(), 0.8, epsilon = 1e-6);
    assert_eq!(
        f.get_parameter_by_name("f2.Sigma").unwrap(),
        f.get_parameter_by_name("f1.Sigma").unwrap()
    );

    // One curve workspace per dataset
    assert_eq!(
        outcome.output_workspaces,
        vec!["shared_Workspace_0".to_string(), "shared_Workspace_1".to_string()]
    );
}

#[test]
fn test_dataset_without_member_is_rejected() {
    let x = grid(0.0, 1.0, 10);
    let service = service();
    store(&service, "a", x.clone(), vec![1.0; 10], vec![1.0; 10]);
    store(&service, "b", x, vec![2.0; 10], vec![1.0; 10]);

    let config = FitConfig::new("composite=MultiDomainFunction;name=FlatBackground,$domains=0")
        .with_dataset(DatasetBinding::new("a"))
        .with_dataset(DatasetBinding::new("b"));
    let result = Fit::new(config, service).execute();
    assert!(matches!(result, Err(FitError::UnboundDomain(1))));
}
