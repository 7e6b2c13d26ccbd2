//! # optcon-mpc
//!
//! Nonlinear optimal control (iterative LQR) and a receding-horizon
//! controller built on it.
//!
//! # Architecture
//!
//! Every re-plan solves a finite-horizon problem from the latest state:
//!
//! ```text
//! minimize    J = Σ l(x_k, u_k, t_k) + φ(x_N, t_N)
//! subject to  x₀ = x_measured
//!             x_{k+1} = F(x_k, u_k, t_k)     (discretized dynamics)
//! ```
//!
//! and yields a time-varying feedback policy `u = u_ff + K (x - x̄)` that the
//! control loop evaluates until the next policy is published.
//!
//! # Components
//!
//! - [`solver`]: iteration driver, regularization, cancellation
//! - [`approximation`]: per-step LQ model of the problem
//! - [`backward`]: Riccati recursion producing gains and step direction
//! - [`line_search`]: forward pass with backtracking
//! - [`trajectory`] / [`policy`]: solution representation and warm starts
//! - [`buffer`]: active policy shared with the control path
//! - [`controller`]: receding-horizon controller
//! - [`timing`]: re-plan schedule, delay compensation, horizon length
//! - [`config`]: TOML-loadable settings
//! - [`scenarios`]: ready-made problems

pub mod config;
pub mod error;
pub mod trajectory;
pub mod policy;
pub mod approximation;
pub mod backward;
pub mod line_search;
pub mod solver;
pub mod buffer;
pub mod timing;
pub mod controller;
pub mod scenarios;

// Re-exports
pub use buffer::{ActivePolicy, PolicyBuffer, PolicyUpdate};
pub use config::{MpcConfig, MpcSettings, NlocConfig};
pub use controller::{ControlOutput, ControlSource, MpcController, MpcState, PlanReport};
pub use error::{ConfigError, FailureKind, LineSearchFailure, MpcError, SolverError};
pub use line_search::{LineSearch, LineSearchOutcome};
pub use policy::{FeedbackPolicy, InterpolationMode};
pub use solver::{CancelToken, NlocSolver, Solution, SolveControl, SolveStatistics};
pub use trajectory::{TailExtension, Trajectory};
