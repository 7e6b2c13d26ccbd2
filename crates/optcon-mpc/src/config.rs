//! Solver and controller configuration
//!
//! Every tunable of the optimizer and the receding-horizon loop lives in
//! plain serde structs. All sections have defaults, so a TOML file only
//! needs to list what it overrides:
//!
//! ```toml
//! [nloc]
//! dt = 0.05
//! max_iterations = 30
//!
//! [mpc]
//! horizon_steps = 40
//!
//! [mpc.timing]
//! overrun = "abort"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use optcon_core::{Discretizer, Integrator};

use crate::error::ConfigError;
use crate::policy::InterpolationMode;
use crate::trajectory::TailExtension;

/// Complete configuration: optimizer + MPC wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcSettings {
    pub nloc: NlocConfig,
    pub mpc: MpcConfig,
}

impl MpcSettings {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.nloc.validate()?;
        self.mpc.validate()
    }
}

/// Trajectory optimizer (iterative LQR) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlocConfig {
    /// Sampling interval of the discretized problem [s]
    pub dt: f64,
    /// Integration scheme for continuous-time models
    pub integrator: Integrator,
    /// Maximum number of optimizer iterations per solve
    pub max_iterations: usize,
    /// Relative cost decrease below which the solve is converged
    pub convergence_tolerance: f64,
    /// Compute the per-stage LQ approximation on the rayon pool
    pub parallel_linearization: bool,
    pub regularization: RegularizationConfig,
    pub line_search: LineSearchConfig,
}

impl Default for NlocConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            integrator: Integrator::Rk4,
            max_iterations: 50,
            convergence_tolerance: 1e-6,
            parallel_linearization: false,
            regularization: RegularizationConfig::default(),
            line_search: LineSearchConfig::default(),
        }
    }
}

impl NlocConfig {
    pub fn discretizer(&self) -> Discretizer {
        Discretizer::new(self.dt, self.integrator)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dt > 0.0) {
            return Err(invalid("nloc.dt", format!("must be > 0, got {}", self.dt)));
        }
        if self.max_iterations == 0 {
            return Err(invalid("nloc.max_iterations", "must be > 0".into()));
        }
        if !(self.convergence_tolerance >= 0.0) {
            return Err(invalid(
                "nloc.convergence_tolerance",
                format!("must be >= 0, got {}", self.convergence_tolerance),
            ));
        }
        self.regularization.validate()?;
        self.line_search.validate()
    }
}

/// Control-Hessian regularization schedule (μ added to Q_uu)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizationConfig {
    /// μ at the start of every solve
    pub initial: f64,
    /// Smallest non-zero μ; decreasing below it snaps μ to zero
    pub min: f64,
    /// μ above this bound means positive-definiteness cannot be restored
    pub max: f64,
    /// Multiplicative growth after a failed backward pass or rejected step
    pub increase_factor: f64,
    /// Multiplicative shrink after enough accepted steps
    pub decrease_factor: f64,
    /// Consecutive accepted steps before μ shrinks
    pub decrease_after: usize,
}

impl Default for RegularizationConfig {
    fn default() -> Self {
        Self {
            initial: 0.0,
            min: 1e-6,
            max: 1e10,
            increase_factor: 10.0,
            decrease_factor: 0.1,
            decrease_after: 2,
        }
    }
}

impl RegularizationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min > 0.0) {
            return Err(invalid(
                "nloc.regularization.min",
                format!("must be > 0, got {}", self.min),
            ));
        }
        if !(self.max >= self.min) {
            return Err(invalid("nloc.regularization.max", "must be >= min".into()));
        }
        if !(self.initial >= 0.0 && self.initial <= self.max) {
            return Err(invalid("nloc.regularization.initial", "must lie in [0, max]".into()));
        }
        if !(self.increase_factor > 1.0) {
            return Err(invalid("nloc.regularization.increase_factor", "must be > 1".into()));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(invalid("nloc.regularization.decrease_factor", "must lie in (0, 1)".into()));
        }
        Ok(())
    }
}

/// Backtracking line search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// When disabled only `initial_step` is tried
    pub enabled: bool,
    /// First step size α₀ ∈ (0, 1]
    pub initial_step: f64,
    /// Geometric contraction of α between trials
    pub contraction: f64,
    /// Number of candidate step sizes
    pub max_trials: usize,
    /// Armijo sufficient-decrease coefficient
    pub armijo: f64,
    /// Rollouts whose state norm exceeds this are treated as diverging
    pub divergence_norm: f64,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_step: 1.0,
            contraction: 0.5,
            max_trials: 10,
            armijo: 1e-4,
            divergence_norm: 1e8,
        }
    }
}

impl LineSearchConfig {
    /// Candidate step sizes, largest first
    pub fn candidates(&self) -> Vec<f64> {
        if !self.enabled {
            return vec![self.initial_step];
        }
        let mut alpha = self.initial_step;
        let mut steps = Vec::with_capacity(self.max_trials);
        for _ in 0..self.max_trials {
            steps.push(alpha);
            alpha *= self.contraction;
        }
        steps
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_step > 0.0 && self.initial_step <= 1.0) {
            return Err(invalid("nloc.line_search.initial_step", "must lie in (0, 1]".into()));
        }
        if !(self.contraction > 0.0 && self.contraction < 1.0) {
            return Err(invalid("nloc.line_search.contraction", "must lie in (0, 1)".into()));
        }
        if self.max_trials == 0 {
            return Err(invalid("nloc.line_search.max_trials", "must be > 0".into()));
        }
        if !(self.armijo >= 0.0 && self.armijo < 1.0) {
            return Err(invalid("nloc.line_search.armijo", "must lie in [0, 1)".into()));
        }
        if !(self.divergence_norm > 0.0) {
            return Err(invalid("nloc.line_search.divergence_norm", "must be > 0".into()));
        }
        Ok(())
    }
}

/// Horizon handling between re-plans
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum HorizonMode {
    /// Horizon length stays `horizon_steps`, window slides forward
    ConstantReceding,
    /// Horizon ends at `final_time` and shrinks as time advances
    FixedFinalTime { final_time: f64 },
}

/// Receding-horizon wrapper settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Number of discrete steps N in each solve
    pub horizon_steps: usize,
    /// Lower bound on N in fixed-final-time mode
    pub min_horizon_steps: usize,
    pub mode: HorizonMode,
    /// Time between re-plans [s]
    pub replan_period: f64,
    pub warm_start: WarmStartConfig,
    pub timing: TimingConfig,
    pub delay: DelayConfig,
    pub fallback: FallbackMode,
    pub interpolation: InterpolationMode,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon_steps: 20,
            min_horizon_steps: 5,
            mode: HorizonMode::ConstantReceding,
            replan_period: 0.1,
            warm_start: WarmStartConfig::default(),
            timing: TimingConfig::default(),
            delay: DelayConfig::default(),
            fallback: FallbackMode::RetainPolicy,
            interpolation: InterpolationMode::ZeroOrderHold,
        }
    }
}

impl MpcConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_steps == 0 {
            return Err(invalid("mpc.horizon_steps", "must be > 0".into()));
        }
        if self.min_horizon_steps == 0 || self.min_horizon_steps > self.horizon_steps {
            return Err(invalid(
                "mpc.min_horizon_steps",
                format!("must lie in [1, horizon_steps], got {}", self.min_horizon_steps),
            ));
        }
        if !(self.replan_period > 0.0) {
            return Err(invalid("mpc.replan_period", "must be > 0".into()));
        }
        if let HorizonMode::FixedFinalTime { final_time } = self.mode {
            if !final_time.is_finite() {
                return Err(invalid("mpc.mode.final_time", "must be finite".into()));
            }
        }
        self.timing.validate()?;
        self.delay.validate()
    }
}

/// Warm-start policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmStartConfig {
    /// Initialize each solve from the shifted previous solution
    pub enabled: bool,
    /// How the shifted guess is extended past the old horizon
    pub tail: TailExtension,
}

impl Default for WarmStartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tail: TailExtension::HoldLastControl,
        }
    }
}

/// What happens when a solve outlives its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Keep applying the previous policy; promote the late result when it arrives
    ApplyStale,
    /// Abort the solve at the deadline and keep the previous policy
    Abort,
}

/// Which failure wins when a timing overrun coincides with a failed solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Report the overrun; next solve keeps the warm start
    PreferTiming,
    /// Report the solver failure; next solve starts cold
    PreferSolver,
}

/// Control-loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Period of the control-output loop [s]; delay compensation
    /// re-evaluates the policy at this rate
    pub control_period: f64,
    /// Wall-clock budget per solve [s]
    pub solve_budget: f64,
    pub overrun: OverrunPolicy,
    pub conflict: ConflictResolution,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period: 0.01,
            solve_budget: 0.1,
            overrun: OverrunPolicy::ApplyStale,
            conflict: ConflictResolution::PreferSolver,
        }
    }
}

impl TimingConfig {
    /// Solve budget as a `Duration`, saturating for out-of-range values
    pub fn budget(&self) -> Duration {
        Duration::try_from_secs_f64(self.solve_budget).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.control_period > 0.0) {
            return Err(invalid("mpc.timing.control_period", "must be > 0".into()));
        }
        if !(self.solve_budget > 0.0) || Duration::try_from_secs_f64(self.solve_budget).is_err() {
            return Err(invalid(
                "mpc.timing.solve_budget",
                format!("must be > 0 and representable as a duration, got {}", self.solve_budget),
            ));
        }
        Ok(())
    }
}

/// Computation-delay compensation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Predict the state at the expected end of computation and plan from there
    pub forward_integration: bool,
    /// Include the measured duration of the last solve in the expected delay
    pub measure_delay: bool,
    /// Constant delay added to every prediction [s]
    pub fixed_delay: f64,
    /// Scale applied to the measured delay
    pub delay_multiplier: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            forward_integration: false,
            measure_delay: true,
            fixed_delay: 0.0,
            delay_multiplier: 1.0,
        }
    }
}

impl DelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_delay >= 0.0) {
            return Err(invalid("mpc.delay.fixed_delay", "must be >= 0".into()));
        }
        if !(self.delay_multiplier >= 0.0) {
            return Err(invalid("mpc.delay.delay_multiplier", "must be >= 0".into()));
        }
        Ok(())
    }
}

/// Control applied while the controller is degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Keep evaluating the last known-good feedback policy
    RetainPolicy,
    /// Hold the last control that was output
    HoldLastControl,
}

fn invalid(field: &'static str, message: String) -> ConfigError {
    ConfigError::Invalid { field, message }
}
