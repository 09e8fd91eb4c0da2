//! Utility functions shared by functions, cost functions and minimizers.
//!
//! - [`finite_difference`]: central-difference Jacobians
//! - [`linalg`]: Cholesky and Gauss-Jordan solvers on ndarray

pub mod finite_difference;
pub mod linalg;
