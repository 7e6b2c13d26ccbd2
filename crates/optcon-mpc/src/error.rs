//! Error taxonomy for the optimizer and the MPC wrapper

use thiserror::Error;

use optcon_core::ModelError;

/// Why a line search found no acceptable step
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LineSearchFailure {
    #[error("rollout non-finite or diverging for all {trials} step sizes")]
    NonFinite { trials: usize },

    #[error("no step size among {trials} decreased the cost (best {best_cost})")]
    NoDecrease { trials: usize, best_cost: f64 },
}

/// Trajectory optimizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("Control Hessian not positive definite at step {step} (mu = {regularization:e})")]
    Numerical { step: usize, regularization: f64 },

    #[error("Cost did not improve within {iterations} iterations (cost {cost})")]
    Diverged { iterations: usize, cost: f64 },

    #[error("Line search failed: {0}")]
    LineSearch(#[from] LineSearchFailure),

    #[error("Solve exceeded time budget: {elapsed_ms:.3} ms > {budget_ms:.3} ms")]
    TimingOverrun { elapsed_ms: f64, budget_ms: f64 },

    #[error("Solve cancelled")]
    Cancelled,

    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Coarse classification of solver failures, used for degraded-control reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Numerical,
    Diverged,
    LineSearch,
    TimingOverrun,
    Cancelled,
    InvalidProblem,
}

impl SolverError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SolverError::Numerical { .. } => FailureKind::Numerical,
            SolverError::Diverged { .. } => FailureKind::Diverged,
            SolverError::LineSearch(_) => FailureKind::LineSearch,
            SolverError::TimingOverrun { .. } => FailureKind::TimingOverrun,
            SolverError::Cancelled => FailureKind::Cancelled,
            SolverError::InvalidProblem(_) | SolverError::Model(_) => FailureKind::InvalidProblem,
        }
    }
}

/// Trajectory invariant violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    #[error("Expected {expected} {what}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Times must be strictly increasing (index {index})")]
    NonIncreasingTime { index: usize },

    #[error("Inconsistent {what} dimension at index {index}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("Trajectory must contain at least one step")]
    Empty,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// MPC wrapper errors
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No valid policy available")]
    NoValidPolicy,

    #[error("Controller stopped")]
    Stopped,

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Failed to start re-plan thread: {0}")]
    Spawn(std::io::Error),
}
