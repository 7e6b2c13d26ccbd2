//! Nonlinear optimal control solver (iterative LQR)
//!
//! Solves
//!
//! ```text
//! minimize    J = Σₖ l(x_k, u_k, t_k) + φ(x_N, t_N)
//! subject to  x_{k+1} = F(x_k, u_k, t_k),  x_0 given
//! ```
//!
//! by repeating: LQ approximation around the nominal trajectory, backward
//! Riccati pass, line-searched forward pass. A linear-quadratic problem is
//! solved in a single accepted iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use optcon_core::{CostFunction, Discretizer, Dynamics, ModelError};

use crate::approximation::LqApproximation;
use crate::backward::{backward_pass, BackwardPass};
use crate::config::{NlocConfig, RegularizationConfig};
use crate::error::{LineSearchFailure, SolverError};
use crate::line_search::LineSearch;
use crate::policy::FeedbackPolicy;
use crate::trajectory::Trajectory;

/// Guards relative tests against a zero cost
const COST_EPSILON: f64 = 1e-12;

/// Shared flag that aborts a running solve
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// External limits on a single solve
#[derive(Debug, Clone, Default)]
pub struct SolveControl {
    /// Checked once per iteration
    pub cancel: Option<CancelToken>,
    /// Wall-clock budget; exceeding it aborts with `TimingOverrun`
    pub budget: Option<Duration>,
}

impl SolveControl {
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    fn check(&self, started: Instant) -> Result<(), SolverError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SolverError::Cancelled);
        }
        if let Some(budget) = self.budget {
            let elapsed = started.elapsed();
            if elapsed > budget {
                return Err(SolverError::TimingOverrun {
                    elapsed_ms: elapsed.as_secs_f64() * 1e3,
                    budget_ms: budget.as_secs_f64() * 1e3,
                });
            }
        }
        Ok(())
    }
}

/// Solution statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    /// Accepted updates
    pub iterations: usize,
    /// LQ approximations built
    pub linearizations: usize,
    /// Forward rollouts evaluated by the line search
    pub line_search_trials: usize,
    /// Regularization when the solve ended
    pub final_regularization: f64,
    /// Cost of the initial guess followed by the cost of every accepted iterate
    pub cost_history: Vec<f64>,
    pub solve_time: Duration,
    pub converged: bool,
}

/// Optimized trajectory and its feedback policy
#[derive(Debug, Clone)]
pub struct Solution {
    pub trajectory: Trajectory,
    pub policy: FeedbackPolicy,
    pub cost: f64,
    pub statistics: SolveStatistics,
}

/// Regularization schedule of one solve
#[derive(Debug, Clone)]
pub(crate) struct Regularization {
    config: RegularizationConfig,
    mu: f64,
    accepted_streak: usize,
}

impl Regularization {
    pub(crate) fn new(config: RegularizationConfig) -> Self {
        Self {
            mu: config.initial,
            config,
            accepted_streak: 0,
        }
    }

    pub(crate) fn value(&self) -> f64 {
        self.mu
    }

    /// Grow μ; `false` once it exceeds the configured maximum
    pub(crate) fn increase(&mut self) -> bool {
        self.accepted_streak = 0;
        self.mu = (self.mu * self.config.increase_factor).max(self.config.min);
        self.mu <= self.config.max
    }

    /// Register an accepted step and shrink μ after enough of them
    pub(crate) fn accepted(&mut self) {
        self.accepted_streak += 1;
        if self.accepted_streak >= self.config.decrease_after {
            self.accepted_streak = 0;
            self.mu *= self.config.decrease_factor;
            if self.mu < self.config.min {
                self.mu = 0.0;
            }
        }
    }

    /// Recovery after a non-finite forward pass: back to the initial value
    /// if μ has grown, otherwise escalate
    pub(crate) fn recover(&mut self) -> bool {
        if self.mu > self.config.initial {
            self.mu = self.config.initial;
            self.accepted_streak = 0;
            true
        } else {
            self.increase()
        }
    }
}

/// Per-solve mutable state
struct SolveContext {
    regularization: Regularization,
    statistics: SolveStatistics,
    attempts: usize,
    non_finite_retried: bool,
}

/// Trajectory optimizer for a fixed dynamics model and cost
pub struct NlocSolver<D, C> {
    dynamics: Arc<D>,
    cost: Arc<C>,
    config: NlocConfig,
    discretizer: Discretizer,
    line_search: LineSearch,
}

impl<D, C> Clone for NlocSolver<D, C> {
    fn clone(&self) -> Self {
        Self {
            dynamics: Arc::clone(&self.dynamics),
            cost: Arc::clone(&self.cost),
            config: self.config.clone(),
            discretizer: self.discretizer,
            line_search: self.line_search.clone(),
        }
    }
}

impl<D, C> NlocSolver<D, C>
where
    D: Dynamics + Send + Sync,
    C: CostFunction + Send + Sync,
{
    pub fn new(dynamics: Arc<D>, cost: Arc<C>, config: NlocConfig) -> Result<Self, SolverError> {
        config
            .validate()
            .map_err(|e| SolverError::InvalidProblem(e.to_string()))?;
        if dynamics.control_dim() == 0 {
            return Err(SolverError::InvalidProblem("model has no control inputs".into()));
        }

        Ok(Self {
            discretizer: config.discretizer(),
            line_search: LineSearch::new(config.line_search.clone()),
            dynamics,
            cost,
            config,
        })
    }

    pub fn config(&self) -> &NlocConfig {
        &self.config
    }

    pub fn dynamics(&self) -> &D {
        &self.dynamics
    }

    pub fn cost(&self) -> &C {
        &self.cost
    }

    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }

    pub fn state_dim(&self) -> usize {
        self.dynamics.state_dim()
    }

    pub fn control_dim(&self) -> usize {
        self.dynamics.control_dim()
    }

    /// Solve from zero controls over `horizon` steps
    pub fn solve_cold(
        &self,
        x0: &DVector<f64>,
        t0: f64,
        horizon: usize,
    ) -> Result<Solution, SolverError> {
        let guess = vec![DVector::zeros(self.control_dim()); horizon];
        self.solve(x0, t0, guess, &SolveControl::default())
    }

    /// Solve from `x0` at `t0` with the given control guess
    ///
    /// The horizon length is the length of `initial_controls`.
    pub fn solve(
        &self,
        x0: &DVector<f64>,
        t0: f64,
        initial_controls: Vec<DVector<f64>>,
        control: &SolveControl,
    ) -> Result<Solution, SolverError> {
        let started = Instant::now();
        self.validate_problem(x0, &initial_controls)?;

        let dynamics = self.dynamics.as_ref();
        let cost = self.cost.as_ref();

        let mut nominal = Trajectory::rollout(dynamics, &self.discretizer, x0, t0, initial_controls)
            .map_err(|e| SolverError::InvalidProblem(e.to_string()))?;
        let mut current_cost = nominal.cost(cost);
        if !nominal.is_finite() || !current_cost.is_finite() {
            return Err(SolverError::InvalidProblem(
                "rollout of the initial guess is not finite".into(),
            ));
        }

        let mut ctx = SolveContext {
            regularization: Regularization::new(self.config.regularization.clone()),
            statistics: SolveStatistics {
                cost_history: vec![current_cost],
                ..Default::default()
            },
            attempts: 0,
            non_finite_retried: false,
        };
        let mut gains: Option<Vec<DMatrix<f64>>> = None;

        while ctx.attempts < self.config.max_iterations {
            ctx.attempts += 1;
            control.check(started)?;

            let lq = LqApproximation::build(
                dynamics,
                cost,
                &self.discretizer,
                &nominal,
                self.config.parallel_linearization,
            );
            ctx.statistics.linearizations += 1;
            if !lq.is_finite() {
                return Err(SolverError::Numerical {
                    step: 0,
                    regularization: ctx.regularization.value(),
                });
            }

            let pass = self.regularized_backward_pass(&lq, &mut ctx.regularization)?;

            let scale = current_cost.abs().max(COST_EPSILON);
            let expected = pass.expected.improvement(self.config.line_search.initial_step);
            debug!(
                "iteration {}: cost {:.6e}, expected improvement {:.3e}, mu {:.1e}",
                ctx.attempts,
                current_cost,
                expected,
                ctx.regularization.value()
            );
            if expected < self.config.convergence_tolerance * scale {
                gains = Some(pass.gains);
                ctx.statistics.converged = true;
                break;
            }

            match self
                .line_search
                .search(dynamics, cost, &self.discretizer, &nominal, current_cost, &pass)
            {
                Ok(outcome) => {
                    ctx.statistics.line_search_trials += outcome.trials;
                    ctx.statistics.iterations += 1;
                    ctx.statistics.cost_history.push(outcome.cost);
                    ctx.regularization.accepted();

                    let decrease = (current_cost - outcome.cost) / scale;
                    debug!("accepted alpha {} with cost {:.6e}", outcome.alpha, outcome.cost);

                    nominal = outcome.trajectory;
                    current_cost = outcome.cost;
                    gains = Some(pass.gains);

                    if decrease < self.config.convergence_tolerance {
                        ctx.statistics.converged = true;
                        break;
                    }
                }
                Err(failure @ LineSearchFailure::NonFinite { trials }) => {
                    ctx.statistics.line_search_trials += trials;
                    if ctx.non_finite_retried {
                        return Err(SolverError::LineSearch(failure));
                    }
                    ctx.non_finite_retried = true;
                    debug!("non-finite forward pass, retrying with reset regularization");
                    if !ctx.regularization.recover() {
                        return Err(SolverError::LineSearch(failure));
                    }
                }
                Err(LineSearchFailure::NoDecrease { trials, .. }) => {
                    ctx.statistics.line_search_trials += trials;
                    if !ctx.regularization.increase() {
                        debug!("regularization exceeded maximum after rejected step");
                        break;
                    }
                }
            }
        }

        control.check(started)?;

        let gains = match gains {
            Some(gains) if ctx.statistics.iterations > 0 || ctx.statistics.converged => gains,
            _ => {
                return Err(SolverError::Diverged {
                    iterations: ctx.attempts,
                    cost: current_cost,
                })
            }
        };

        ctx.statistics.final_regularization = ctx.regularization.value();
        ctx.statistics.solve_time = started.elapsed();
        info!(
            "solve finished: cost {:.6e}, {} iterations, converged {}, {:.2} ms",
            current_cost,
            ctx.statistics.iterations,
            ctx.statistics.converged,
            ctx.statistics.solve_time.as_secs_f64() * 1e3
        );

        let policy = FeedbackPolicy::from_trajectory(&nominal, gains)
            .map_err(|e| SolverError::InvalidProblem(e.to_string()))?;
        Ok(Solution {
            trajectory: nominal,
            policy,
            cost: current_cost,
            statistics: ctx.statistics,
        })
    }

    /// Backward pass, escalating μ until Q_uu + μI is positive definite
    fn regularized_backward_pass(
        &self,
        lq: &LqApproximation,
        regularization: &mut Regularization,
    ) -> Result<BackwardPass, SolverError> {
        loop {
            match backward_pass(lq, regularization.value()) {
                Ok(pass) => return Ok(pass),
                Err(failure) => {
                    debug!(
                        "control Hessian not positive definite at step {} (mu {:.1e})",
                        failure.step,
                        regularization.value()
                    );
                    if !regularization.increase() {
                        return Err(SolverError::Numerical {
                            step: failure.step,
                            regularization: regularization.value(),
                        });
                    }
                }
            }
        }
    }

    fn validate_problem(
        &self,
        x0: &DVector<f64>,
        controls: &[DVector<f64>],
    ) -> Result<(), SolverError> {
        if x0.len() != self.state_dim() {
            return Err(ModelError::DimensionMismatch {
                what: "initial state",
                expected: self.state_dim(),
                got: x0.len(),
            }
            .into());
        }
        if controls.is_empty() {
            return Err(SolverError::InvalidProblem(
                "horizon must contain at least one step".into(),
            ));
        }
        if let Some(u) = controls.iter().find(|u| u.len() != self.control_dim()) {
            return Err(ModelError::DimensionMismatch {
                what: "control guess",
                expected: self.control_dim(),
                got: u.len(),
            }
            .into());
        }
        if x0.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::InvalidProblem("initial state is not finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use optcon_core::dynamics::{DoubleIntegrator, Pendulum};
    use optcon_core::QuadraticCost;

    fn double_integrator_solver(config: NlocConfig) -> NlocSolver<DoubleIntegrator, QuadraticCost> {
        let cost = QuadraticCost::diagonal(&[10.0, 1.0], &[0.1], &[100.0, 100.0]).unwrap();
        NlocSolver::new(Arc::new(DoubleIntegrator::new(1)), Arc::new(cost), config).unwrap()
    }

    #[test]
    fn test_regularization_schedule() {
        let config = RegularizationConfig {
            initial: 0.0,
            min: 1e-6,
            max: 2e-3,
            increase_factor: 10.0,
            decrease_factor: 0.1,
            decrease_after: 2,
        };
        let mut reg = Regularization::new(config);
        assert_eq!(reg.value(), 0.0);

        assert!(reg.increase());
        assert_relative_eq!(reg.value(), 1e-6);
        assert!(reg.increase());
        assert!(reg.increase());
        assert!(reg.increase());
        assert_relative_eq!(reg.value(), 1e-3, max_relative = 1e-12);
        assert!(!reg.increase());
        assert_relative_eq!(reg.value(), 1e-2, max_relative = 1e-12);

        // Two accepted steps shrink μ once
        reg.accepted();
        assert_relative_eq!(reg.value(), 1e-2, max_relative = 1e-12);
        reg.accepted();
        assert_relative_eq!(reg.value(), 1e-3, max_relative = 1e-12);

        // Recovery resets to the initial value
        assert!(reg.recover());
        assert_eq!(reg.value(), 0.0);
    }

    #[test]
    fn test_small_mu_snaps_to_zero() {
        let mut reg = Regularization::new(RegularizationConfig {
            decrease_after: 1,
            ..Default::default()
        });
        assert!(reg.increase());
        reg.accepted();
        assert_eq!(reg.value(), 0.0);
    }

    #[test]
    fn test_lq_problem_single_iteration() {
        let solver = double_integrator_solver(NlocConfig::default());
        let x0 = DVector::from_vec(vec![1.0, 0.0]);
        let solution = solver.solve_cold(&x0, 0.0, 20).unwrap();

        assert!(solution.statistics.converged);
        assert_eq!(solution.statistics.iterations, 1);
        assert_eq!(solution.statistics.cost_history.len(), 2);
        assert_eq!(solution.policy.horizon(), 20);
        assert_relative_eq!(solution.trajectory.end_time(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pendulum_cost_history_non_increasing() {
        let cost = QuadraticCost::diagonal(&[1.0, 0.1], &[0.05], &[50.0, 5.0]).unwrap();
        let config = NlocConfig {
            dt: 0.05,
            ..Default::default()
        };
        let solver =
            NlocSolver::new(Arc::new(Pendulum::default()), Arc::new(cost), config).unwrap();

        let solution = solver.solve_cold(&DVector::from_vec(vec![1.0, 0.0]), 0.0, 40).unwrap();
        let history = &solution.statistics.cost_history;
        assert!(history.len() >= 2);
        for pair in history.windows(2) {
            assert!(pair[1] <= pair[0], "cost increased: {} -> {}", pair[0], pair[1]);
        }
        assert_relative_eq!(solution.cost, *history.last().unwrap());
    }

    #[test]
    fn test_dimension_validation() {
        let solver = double_integrator_solver(NlocConfig::default());
        let err = solver.solve_cold(&DVector::zeros(3), 0.0, 10).unwrap_err();
        assert!(matches!(err, SolverError::Model(ModelError::DimensionMismatch { .. })));

        let err = solver.solve_cold(&DVector::zeros(2), 0.0, 0).unwrap_err();
        assert!(matches!(err, SolverError::InvalidProblem(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let solver = double_integrator_solver(NlocConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let control = SolveControl::default().with_cancel(token);

        let guess = vec![DVector::zeros(1); 10];
        let err = solver.solve(&DVector::from_vec(vec![1.0, 0.0]), 0.0, guess, &control);
        assert_eq!(err.unwrap_err(), SolverError::Cancelled);
    }

    #[test]
    fn test_zero_budget_overruns() {
        let solver = double_integrator_solver(NlocConfig::default());
        let control = SolveControl::default().with_budget(Duration::ZERO);
        let guess = vec![DVector::zeros(1); 10];

        let err = solver
            .solve(&DVector::from_vec(vec![1.0, 0.0]), 0.0, guess, &control)
            .unwrap_err();
        assert!(matches!(err, SolverError::TimingOverrun { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = NlocConfig {
            dt: 0.0,
            ..Default::default()
        };
        let cost = QuadraticCost::diagonal(&[1.0, 1.0], &[1.0], &[1.0, 1.0]).unwrap();
        let result = NlocSolver::new(Arc::new(DoubleIntegrator::new(1)), Arc::new(cost), config);
        assert!(matches!(result, Err(SolverError::InvalidProblem(_))));
    }
}
