use thiserror::Error;

use crate::parameters::bounds::BoundsError;
use crate::parameters::expression::ExpressionError;

/// Error types for the fitcore-rs library.
///
/// Setup errors (parsing a function definition, binding data) are returned
/// before any iteration starts. Errors raised while iterating are either
/// recoverable, in which case minimizers turn them into a failed status, or
/// fatal, in which case they abort the fit invocation.
#[derive(Error, Debug)]
pub enum FitError {
    /// A function definition contained no function terms.
    #[error("Empty function definition: {0}")]
    EmptyFunction(String),

    /// A function definition named a type that is not registered.
    #[error("Unknown function type: {0}")]
    UnknownFunctionType(String),

    /// A parameter name or index that does not exist.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// An attribute name that the function does not declare.
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// An attribute value of the wrong kind or outside its valid range.
    #[error("Invalid value for attribute '{name}': {message}")]
    InvalidAttribute { name: String, message: String },

    /// A tie formula that cannot be parsed, references unknown names or creates a cycle.
    #[error("Invalid tie expression '{expression}': {message}")]
    InvalidTieExpression { expression: String, message: String },

    /// A tie that would reference a parameter removed by a resize.
    #[error("Tie on '{parameter}' references a parameter that no longer exists: {missing}")]
    StaleTieReference { parameter: String, missing: String },

    /// A malformed bound constraint.
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// A dataset of a multi-domain fit that no member function is bound to.
    #[error("Domain {0} is not bound to any member function")]
    UnboundDomain(usize),

    /// No data points remain after fit-range and exclusion filtering.
    #[error("No data points to fit: {0}")]
    NoDataPoints(String),

    /// A named workspace that the data service does not hold.
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// Invalid input data or configuration.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error indicating a mismatch in array dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error during function evaluation, including non-finite model values.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// A linear system that could not be solved.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    /// A minimizer name that is not registered.
    #[error("Unknown minimizer: {0}")]
    UnknownMinimizer(String),

    /// The parameter vector can no longer be reconciled with the function.
    #[error("Inconsistent parameters: {0}")]
    InconsistentParameters(String),

    /// Error raised by the expression engine while evaluating a formula.
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Error constructing bounds.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FitError {
    /// Whether a minimizer may absorb this error into a failed status
    /// instead of aborting the fit.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FitError::SingularMatrix(_) | FitError::FunctionEvaluation(_) | FitError::Expression(_)
        )
    }
}

/// Result type alias for fitcore-rs operations.
pub type Result<T> = std::result::Result<T, FitError>;
