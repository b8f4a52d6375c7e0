use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the Keystone system
#[derive(Error, Debug)]
pub enum KsError {
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Portfolio error: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Coarse classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed instrument definition.
    InvalidTerms,
    /// Malformed simulation, optimization or portfolio request.
    InvalidParameters,
    /// A lattice or root-finder failed to converge, or produced a non-finite value.
    NumericalInstability,
    /// The optimizer exhausted its iteration budget.
    SolverDivergence,
    /// No allocation satisfies the constraints.
    Infeasible,
    /// The caller cancelled the computation.
    Cancelled,
    Other,
}

impl KsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KsError::Pricing(e) => e.kind(),
            KsError::Risk(e) => e.kind(),
            KsError::Optimizer(_) => ErrorKind::InvalidParameters,
            KsError::Portfolio(_) => ErrorKind::InvalidParameters,
            KsError::Config(_) | KsError::Validation(_) => ErrorKind::InvalidParameters,
            KsError::Serialization(_) | KsError::Internal(_) => ErrorKind::Other,
        }
    }
}

/// Pricing-library errors. Every variant names the offending instrument.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid terms for {instrument}: {message}")]
    InvalidTerms { instrument: String, message: String },

    #[error("Numerical instability pricing {instrument}: {message}")]
    NumericalInstability { instrument: String, message: String },

    #[error("Missing market data for {instrument}: {message}")]
    MissingMarketData { instrument: String, message: String },
}

impl PricingError {
    pub fn invalid_terms(instrument: &str, message: impl Into<String>) -> Self {
        Self::InvalidTerms {
            instrument: instrument.to_string(),
            message: message.into(),
        }
    }

    pub fn numerical(instrument: &str, message: impl Into<String>) -> Self {
        Self::NumericalInstability {
            instrument: instrument.to_string(),
            message: message.into(),
        }
    }

    pub fn missing_data(instrument: &str, message: impl Into<String>) -> Self {
        Self::MissingMarketData {
            instrument: instrument.to_string(),
            message: message.into(),
        }
    }

    /// Identity of the instrument that failed to price.
    pub fn instrument(&self) -> &str {
        match self {
            Self::InvalidTerms { instrument, .. }
            | Self::NumericalInstability { instrument, .. }
            | Self::MissingMarketData { instrument, .. } => instrument,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTerms { .. } => ErrorKind::InvalidTerms,
            Self::NumericalInstability { .. } => ErrorKind::NumericalInstability,
            Self::MissingMarketData { .. } => ErrorKind::InvalidParameters,
        }
    }
}

/// Risk-engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Invalid simulation parameter {parameter}: {message}")]
    InvalidParameters { parameter: String, message: String },

    #[error("Scenario revaluation failed on path {path}: {source}")]
    Revaluation {
        path: usize,
        #[source]
        source: PricingError,
    },

    #[error("Simulation cancelled after {completed_batches} of {total_batches} batches")]
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },
}

impl RiskError {
    pub fn invalid(parameter: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            Self::Revaluation { source, .. } => source.kind(),
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Optimizer input errors. Solver outcomes (infeasible, divergent) are
/// reported through the result status, not through this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Invalid optimization parameter {parameter}: {message}")]
    InvalidParameters { parameter: String, message: String },
}

impl OptimizerError {
    pub fn invalid(parameter: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }
}

/// Portfolio construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
    #[error("Negative quantity {quantity} for {instrument} while short positions are disabled")]
    NegativeQuantity {
        instrument: String,
        quantity: Decimal,
    },

    #[error("Instrument {instrument} appears more than once")]
    DuplicateInstrument { instrument: String },

    #[error("Portfolio has no positions")]
    Empty,

    #[error("Non-finite {field} for {instrument}")]
    NonFinite { instrument: String, field: String },
}

/// Result type alias for Keystone operations
pub type KsResult<T> = Result<T, KsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::KsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::KsError::Config(format!($($arg)*))
    };
}
