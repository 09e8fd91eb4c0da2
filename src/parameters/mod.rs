//! # Parameter System
//!
//! Named parameters owned by fit functions, with fixed flags, ties and soft
//! bound constraints.
//!
//! ## Core Components
//!
//! - [`Parameter`]: a value with its fixed flag, tie formula, bound and error
//! - [`ParameterStore`]: the ordered parameters of one primitive function
//! - [`BoundConstraint`]: a soft bound that adds a penalty to the cost
//! - [`Expression`]: the formula engine used by ties and user functions
//! - [`ResolvedTie`]: a tie bound to parameter positions, ready to evaluate
//!
//! ## Example Usage
//!
//! ```rust
//! use fitcore_rs::parameters::ParameterStore;
//!
//! let mut store = ParameterStore::new();
//! store.declare("A0", 1.0).unwrap();
//! store.declare("A1", 0.0).unwrap();
//!
//! // A1 follows A0
//! store.tie("A1", "2*A0").unwrap();
//! assert!(!store.get(1).unwrap().is_active());
//! ```

pub mod bounds;
pub mod expression;
pub mod parameter;
pub mod store;
pub mod ties;

// Re-export key types
pub use bounds::{BoundConstraint, BoundsError, DEFAULT_PENALTY_FACTOR};
pub use expression::{EvaluationContext, Expression, ExpressionError, SlotContext};
pub use parameter::Parameter;
pub use store::ParameterStore;
pub use ties::{order_ties, ResolvedTie};
