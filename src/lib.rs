//! # fitcore-rs
//!
//! `fitcore-rs` is a nonlinear curve-fitting engine. It fits composite and
//! multi-domain models to one or more datasets with uncertainties, using
//! interchangeable minimizers over a common cost-function abstraction.
//!
//! The library provides:
//! - A parameter system with fixed parameters, ties and soft bound constraints
//! - Primitive, composite (sum or product) and multi-domain functions built
//!   from definition strings such as `name=LinearBackground;name=Gaussian`
//! - Weighted and unweighted least-squares cost functions
//! - Levenberg-Marquardt, simplex, gradient, Gauss-Newton and Metropolis
//!   sampling minimizers
//! - A fit orchestrator with parameter errors, covariance and output curves
//!
//! ## Basic Usage
//!
//! ```
//! use std::sync::Arc;
//! use fitcore_rs::fit::{DataService, DatasetBinding, Fit, FitConfig, InMemoryDataService, Spectrum, Workspace};
//!
//! let x: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.2).collect();
//! let y: Vec<f64> = x.iter().map(|x| 1.0 + 4.0 * (-(x - 5.0).powi(2) / 2.0).exp()).collect();
//! let service = Arc::new(InMemoryDataService::new());
//! service.store("peak", Workspace::from_spectrum(Spectrum::unweighted(x, y)?))?;
//!
//! let config = FitConfig::new(
//!     "name=FlatBackground,A0=0.5;name=Gaussian,Height=3,PeakCentre=4.8,Sigma=1.2",
//! )
//! .with_dataset(DatasetBinding::new("peak"));
//! let mut fit = Fit::new(config, service);
//! let outcome = fit.execute()?;
//!
//! assert_eq!(outcome.status, "success");
//! let centre = fit.function().unwrap().get_parameter_by_name("f1.PeakCentre")?;
//! assert!((centre - 5.0).abs() < 1e-6);
//! # Ok::<(), fitcore_rs::FitError>(())
//! ```

pub mod cost;
pub mod domain;
pub mod error;
pub mod fit;
pub mod function;
pub mod minimizers;
pub mod models;
pub mod parameters;
pub mod utils;

// Re-exports for convenience
pub use cost::{CostFunction, CostFunctionKind, LeastSquares};
pub use error::{FitError, Result};
pub use fit::{DatasetBinding, Fit, FitConfig, FitOutcome, SequentialFit};
pub use function::{CompositeFunction, FitFunction, FunctionFactory};
pub use minimizers::{LevenbergMarquardt, Minimizer, MinimizerFactory};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
