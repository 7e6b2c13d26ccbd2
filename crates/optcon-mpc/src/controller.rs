//! Receding-horizon controller
//!
//! Wraps [`NlocSolver`] in an MPC loop:
//!
//! ```text
//! Idle ──plan──▶ Planning ──success──▶ PolicyReady ──control──▶ Applying
//!                    ▲                                              │
//!                    └──────────────── re-plan due ◀────────────────┘
//! ```
//!
//! Control output is served from the [`PolicyBuffer`] and never waits on
//! a solve. Re-plans run either synchronously ([`MpcController::plan`]) or
//! on a background thread ([`MpcController::spawn_replan`]) whose result is
//! published to the buffer in a single swap. Failed solves never reach the
//! output path: the last good policy is retained and the controller is
//! marked degraded until the next successful solve.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nalgebra::DVector;

use optcon_core::{CostFunction, Dynamics};

use crate::buffer::{ActivePolicy, PolicyBuffer, PolicyUpdate};
use crate::config::{ConflictResolution, FallbackMode, MpcConfig, MpcSettings, OverrunPolicy};
use crate::error::{FailureKind, MpcError, SolverError};
use crate::solver::{CancelToken, NlocSolver, SolveControl, SolveStatistics};
use crate::timing::TimeKeeper;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpcState {
    /// No policy computed yet
    Idle,
    /// A solve is in progress
    Planning,
    /// A policy is available but has not been applied
    PolicyReady,
    /// Control is being output from the active policy
    Applying,
    /// Terminal; no further planning or control
    Stopped,
}

/// Where a control output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSource {
    /// Active policy, no failure pending
    Fresh,
    /// Active policy while a re-plan is running past its budget
    Stale,
    /// Retained policy or held control after a failed re-plan
    Fallback,
    /// Last stage of the active policy, past the end of its horizon
    Extrapolated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutput {
    pub u: DVector<f64>,
    pub source: ControlSource,
    /// Version of the policy used, 0 if none
    pub version: u64,
    pub degraded: bool,
}

/// Record of a failed re-plan, cleared by the next successful one
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded {
    pub kind: FailureKind,
    pub message: String,
    /// Time of the first failure in the current streak [s]
    pub since: f64,
    pub consecutive_failures: usize,
}

/// Outcome of one re-plan
#[derive(Debug, Clone)]
pub struct PlanReport {
    /// Version of the published policy, `None` if the solve failed
    pub version: Option<u64>,
    /// Time of the measurement the solve started from [s]
    pub measured_at: f64,
    /// Start time of the planned horizon, after delay compensation [s]
    pub start_time: f64,
    pub horizon: usize,
    pub warm_started: bool,
    pub statistics: Option<SolveStatistics>,
    pub elapsed: Duration,
    pub overrun: bool,
    pub failure: Option<SolverError>,
}

#[derive(Debug, Clone, Copy)]
struct PlanMeta {
    measured_at: f64,
    start_time: f64,
    horizon: usize,
    warm_started: bool,
}

struct PlanRequest {
    meta: PlanMeta,
    x0: DVector<f64>,
    guess: Vec<DVector<f64>>,
}

struct Published {
    version: u64,
    statistics: SolveStatistics,
}

struct Finished {
    outcome: Result<Published, SolverError>,
    elapsed: Duration,
}

struct PendingSolve {
    meta: PlanMeta,
    cancel: CancelToken,
    receiver: Receiver<Finished>,
    handle: Option<JoinHandle<()>>,
    started: Instant,
    /// Buffer version when the solve was spawned
    base_version: u64,
}

/// Model predictive controller around an [`NlocSolver`]
pub struct MpcController<D, C> {
    solver: NlocSolver<D, C>,
    config: MpcConfig,
    buffer: PolicyBuffer,
    timekeeper: TimeKeeper,
    state: MpcState,
    degraded: Option<Degraded>,
    cold_start_next: bool,
    last_control: Option<DVector<f64>>,
    pending: Option<PendingSolve>,
    last_report: Option<PlanReport>,
}

impl<D, C> MpcController<D, C>
where
    D: Dynamics + Send + Sync + 'static,
    C: CostFunction + Send + Sync + 'static,
{
    pub fn new(solver: NlocSolver<D, C>, config: MpcConfig) -> Result<Self, MpcError> {
        config.validate()?;
        let timekeeper = TimeKeeper::new(&config, solver.config().dt);
        Ok(Self {
            solver,
            config,
            buffer: PolicyBuffer::new(),
            timekeeper,
            state: MpcState::Idle,
            degraded: None,
            cold_start_next: false,
            last_control: None,
            pending: None,
            last_report: None,
        })
    }

    /// Build solver and controller from a complete configuration
    pub fn from_settings(
        dynamics: Arc<D>,
        cost: Arc<C>,
        settings: MpcSettings,
    ) -> Result<Self, MpcError> {
        settings.validate()?;
        let solver = NlocSolver::new(dynamics, cost, settings.nloc)?;
        Self::new(solver, settings.mpc)
    }

    pub fn state(&self) -> MpcState {
        self.state
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn solver(&self) -> &NlocSolver<D, C> {
        &self.solver
    }

    pub fn time_keeper(&self) -> &TimeKeeper {
        &self.timekeeper
    }

    pub fn degraded(&self) -> Option<&Degraded> {
        self.degraded.as_ref()
    }

    pub fn last_report(&self) -> Option<&PlanReport> {
        self.last_report.as_ref()
    }

    /// Handle to the policy buffer, for reading policies from another thread
    pub fn buffer(&self) -> PolicyBuffer {
        self.buffer.clone()
    }

    pub fn active_policy(&self) -> Option<Arc<ActivePolicy>> {
        self.buffer.load()
    }

    pub fn is_replanning(&self) -> bool {
        self.pending.is_some()
    }

    /// Control for state `x` at time `t` from the active policy
    pub fn control(&mut self, t: f64, x: &DVector<f64>) -> Result<ControlOutput, MpcError> {
        self.ensure_running()?;
        self.check_state_dim(x)?;

        let active = self.buffer.load();
        let degraded = self.degraded.is_some();

        if degraded && self.config.fallback == FallbackMode::HoldLastControl {
            if let Some(u) = &self.last_control {
                return Ok(ControlOutput {
                    u: u.clone(),
                    source: ControlSource::Fallback,
                    version: active.as_ref().map_or(0, |a| a.version),
                    degraded,
                });
            }
        }

        let active = active.ok_or(MpcError::NoValidPolicy)?;
        let (u, extrapolated) = active.policy.control_clamped(t, x, self.config.interpolation);
        let source = if extrapolated {
            ControlSource::Extrapolated
        } else if degraded {
            ControlSource::Fallback
        } else if self.replan_overrunning() {
            ControlSource::Stale
        } else {
            ControlSource::Fresh
        };

        if self.state == MpcState::PolicyReady {
            self.state = MpcState::Applying;
        }
        self.last_control = Some(u.clone());

        Ok(ControlOutput {
            u,
            source,
            version: active.version,
            degraded,
        })
    }

    /// Re-plan synchronously from state `x` measured at time `t`
    ///
    /// A background re-plan in flight is cancelled first. Solver failures
    /// are returned after the fallback has been put in place.
    pub fn plan(&mut self, t: f64, x: &DVector<f64>) -> Result<PlanReport, MpcError> {
        self.cancel_replan();
        let request = self.prepare(t, x)?;
        let control = self.solve_control(None);

        let started = Instant::now();
        let outcome = self
            .solver
            .solve(&request.x0, request.meta.start_time, request.guess, &control)
            .map(|solution| {
                let statistics = solution.statistics.clone();
                let update = PolicyUpdate::from_solution(solution, request.meta.measured_at);
                Published {
                    version: self.buffer.publish(update),
                    statistics,
                }
            });

        self.finish(request.meta, outcome, started.elapsed())
    }

    /// Start a re-plan on a background thread
    ///
    /// Returns `false` if a re-plan is already running.
    pub fn spawn_replan(&mut self, t: f64, x: &DVector<f64>) -> Result<bool, MpcError> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let PlanRequest { meta, x0, guess } = self.prepare(t, x)?;

        let cancel = CancelToken::new();
        let control = self.solve_control(Some(cancel.clone()));
        let solver = self.solver.clone();
        let buffer = self.buffer.clone();
        let token = cancel.clone();
        let (sender, receiver) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("mpc-replan".into())
            .spawn(move || {
                let started = Instant::now();
                let outcome = solver
                    .solve(&x0, meta.start_time, guess, &control)
                    .and_then(|solution| {
                        let statistics = solution.statistics.clone();
                        let update = PolicyUpdate::from_solution(solution, meta.measured_at);
                        buffer
                            .publish_unless_cancelled(update, &token)
                            .map(|version| Published { version, statistics })
                            .ok_or(SolverError::Cancelled)
                    });
                // The receiver is gone if the re-plan was cancelled
                let _ = sender.send(Finished {
                    outcome,
                    elapsed: started.elapsed(),
                });
            })
            .map_err(MpcError::Spawn)?;

        self.pending = Some(PendingSolve {
            meta,
            cancel,
            receiver,
            handle: Some(handle),
            started: Instant::now(),
            base_version: self.buffer.version(),
        });
        Ok(true)
    }

    /// Collect a finished background re-plan without blocking
    pub fn poll(&mut self) -> Option<Result<PlanReport, MpcError>> {
        let received = match self.pending.as_ref()?.receiver.try_recv() {
            Ok(finished) => Some(finished),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => None,
        };
        let pending = self.pending.take()?;
        Some(self.complete_background(pending, received))
    }

    /// Block until the running background re-plan finishes
    pub fn wait_for_replan(&mut self) -> Option<Result<PlanReport, MpcError>> {
        let pending = self.pending.take()?;
        let received = pending.receiver.recv().ok();
        Some(self.complete_background(pending, received))
    }

    /// Abort the background re-plan
    ///
    /// A result published before the cancel took effect is recorded like
    /// any completed re-plan; anything later is never published.
    pub fn cancel_replan(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if self.buffer.revoke(&pending.cancel) > pending.base_version {
            debug!(
                "re-plan started at t = {:.3} finished before the cancel",
                pending.meta.measured_at
            );
            let received = pending.receiver.recv().ok();
            // Failures are already logged and recorded as degraded
            let _ = self.complete_background(pending, received);
            return;
        }
        debug!("cancelled background re-plan started at t = {:.3}", pending.meta.measured_at);
        if self.state == MpcState::Planning {
            self.state = self.idle_state();
        }
    }

    /// One control-loop tick: collect background results, start a re-plan
    /// when due and return the control for `x`
    ///
    /// Without any policy the first plan runs synchronously.
    pub fn step(&mut self, t: f64, x: &DVector<f64>) -> Result<ControlOutput, MpcError> {
        // Failures are already logged and recorded as degraded
        let _ = self.poll();

        if self.timekeeper.replan_due(t) && self.pending.is_none() {
            if self.buffer.is_empty() {
                self.plan(t, x)?;
            } else {
                self.spawn_replan(t, x)?;
            }
        }

        self.control(t, x)
    }

    /// Enter the terminal state
    pub fn stop(&mut self) {
        self.cancel_replan();
        if self.state != MpcState::Stopped {
            info!("controller stopped");
        }
        self.state = MpcState::Stopped;
    }

    /// Drop all policies and history and return to `Idle`
    pub fn reset(&mut self) {
        self.cancel_replan();
        self.buffer.clear();
        self.timekeeper.reset();
        self.degraded = None;
        self.cold_start_next = false;
        self.last_control = None;
        self.last_report = None;
        self.state = MpcState::Idle;
    }

    fn prepare(&mut self, t: f64, x: &DVector<f64>) -> Result<PlanRequest, MpcError> {
        self.ensure_running()?;
        self.check_state_dim(x)?;

        let active = self.buffer.load();
        let (x0, start_time) = self.predict_start(t, x, active.as_deref());

        let Some(horizon) = self.timekeeper.horizon_steps(start_time) else {
            info!("final time reached at t = {start_time:.3}");
            self.stop();
            return Err(MpcError::Stopped);
        };

        let warm = self.config.warm_start.enabled && !self.cold_start_next;
        let (guess, warm_started) = match active.as_deref() {
            Some(previous) if warm => {
                let dt = self.solver.discretizer().dt;
                let guess = previous
                    .trajectory
                    .resample(start_time, horizon, dt, self.config.warm_start.tail);
                (guess, true)
            }
            _ => (vec![DVector::zeros(self.solver.control_dim()); horizon], false),
        };

        debug!(
            "planning from t = {start_time:.3} over {horizon} steps ({})",
            if warm_started { "warm" } else { "cold" }
        );
        self.timekeeper.mark_replan(t);
        self.state = MpcState::Planning;

        Ok(PlanRequest {
            meta: PlanMeta {
                measured_at: t,
                start_time,
                horizon,
                warm_started,
            },
            x0,
            guess,
        })
    }

    /// State and time the next horizon starts from
    ///
    /// With delay compensation the measured state is integrated forward
    /// over the expected computation delay under the active policy, which
    /// is re-evaluated once per control period.
    fn predict_start(
        &self,
        t: f64,
        x: &DVector<f64>,
        active: Option<&ActivePolicy>,
    ) -> (DVector<f64>, f64) {
        if !self.timekeeper.compensates_delay() {
            return (x.clone(), t);
        }

        let delay = self.timekeeper.expected_delay();
        let discretizer = self.solver.discretizer();
        let period = self.timekeeper.timing().control_period;
        let end = t + delay;
        let mut state = x.clone();
        let mut time = t;

        while end - time > 1e-12 {
            let h = period.min(end - time);
            let u = match active {
                Some(a) => a.policy.control_clamped(time, &state, self.config.interpolation).0,
                None => self
                    .last_control
                    .clone()
                    .unwrap_or_else(|| DVector::zeros(self.solver.control_dim())),
            };
            state = discretizer.propagate(self.solver.dynamics(), &state, &u, time, h);
            time += h;
        }

        debug!("delay compensation: predicted {delay:.4} s ahead");
        (state, end)
    }

    fn complete_background(
        &mut self,
        mut pending: PendingSolve,
        received: Option<Finished>,
    ) -> Result<PlanReport, MpcError> {
        if let Some(handle) = pending.handle.take() {
            if handle.join().is_err() {
                warn!("re-plan thread panicked");
            }
        }
        match received {
            Some(finished) => self.finish(pending.meta, finished.outcome, finished.elapsed),
            None => {
                let elapsed = pending.started.elapsed();
                self.finish(pending.meta, Err(SolverError::Cancelled), elapsed)
            }
        }
    }

    fn finish(
        &mut self,
        meta: PlanMeta,
        outcome: Result<Published, SolverError>,
        elapsed: Duration,
    ) -> Result<PlanReport, MpcError> {
        self.timekeeper.record_solve(elapsed);
        let overrun = self.timekeeper.is_overrun(elapsed);
        let elapsed_ms = elapsed.as_secs_f64() * 1e3;

        let (report, result) = match outcome {
            Ok(published) => {
                if overrun {
                    warn!(
                        "solve took {elapsed_ms:.2} ms, over the {budget_ms:.2} ms budget; \
                         late policy applied",
                        budget_ms = self.timekeeper.budget().as_secs_f64() * 1e3
                    );
                }
                if let Some(previous) = self.degraded.take() {
                    info!(
                        "recovered after {} failed re-plan(s) ({:?})",
                        previous.consecutive_failures, previous.kind
                    );
                }
                self.cold_start_next = false;
                self.state = MpcState::PolicyReady;
                info!(
                    "policy v{} published: {} iterations, {elapsed_ms:.2} ms",
                    published.version, published.statistics.iterations
                );

                let report = self.report(
                    meta,
                    Some(published.version),
                    Some(published.statistics),
                    elapsed,
                    overrun,
                    None,
                );
                (report.clone(), Ok(report))
            }
            Err(error) => {
                let error = self.resolve_failure(error, overrun, elapsed);
                self.enter_degraded(&error, meta.measured_at);
                self.state = self.idle_state();

                let report = self.report(meta, None, None, elapsed, overrun, Some(error.clone()));
                (report, Err(MpcError::Solver(error)))
            }
        };

        self.last_report = Some(report);
        result
    }

    /// Pick the failure to record and decide whether the next solve starts cold
    fn resolve_failure(
        &mut self,
        error: SolverError,
        overrun: bool,
        elapsed: Duration,
    ) -> SolverError {
        match error.kind() {
            FailureKind::Diverged | FailureKind::Numerical => {
                if overrun && self.config.timing.conflict == ConflictResolution::PreferTiming {
                    debug!("overrun coincided with {error}; recording the overrun");
                    return SolverError::TimingOverrun {
                        elapsed_ms: elapsed.as_secs_f64() * 1e3,
                        budget_ms: self.timekeeper.budget().as_secs_f64() * 1e3,
                    };
                }
                self.cold_start_next = true;
                error
            }
            _ => error,
        }
    }

    fn enter_degraded(&mut self, error: &SolverError, t: f64) {
        let fallback = match (self.buffer.is_empty(), self.config.fallback) {
            (true, _) => "no policy available",
            (false, FallbackMode::RetainPolicy) => "retaining last policy",
            (false, FallbackMode::HoldLastControl) => "holding last control",
        };
        warn!("re-plan at t = {t:.3} failed: {error}; {fallback}");

        match &mut self.degraded {
            Some(degraded) => {
                degraded.kind = error.kind();
                degraded.message = error.to_string();
                degraded.consecutive_failures += 1;
            }
            None => {
                self.degraded = Some(Degraded {
                    kind: error.kind(),
                    message: error.to_string(),
                    since: t,
                    consecutive_failures: 1,
                });
            }
        }
    }

    fn report(
        &self,
        meta: PlanMeta,
        version: Option<u64>,
        statistics: Option<SolveStatistics>,
        elapsed: Duration,
        overrun: bool,
        failure: Option<SolverError>,
    ) -> PlanReport {
        PlanReport {
            version,
            measured_at: meta.measured_at,
            start_time: meta.start_time,
            horizon: meta.horizon,
            warm_started: meta.warm_started,
            statistics,
            elapsed,
            overrun,
            failure,
        }
    }

    fn solve_control(&self, cancel: Option<CancelToken>) -> SolveControl {
        let mut control = SolveControl::default();
        if let Some(token) = cancel {
            control = control.with_cancel(token);
        }
        if self.config.timing.overrun == OverrunPolicy::Abort {
            control = control.with_budget(self.timekeeper.budget());
        }
        control
    }

    fn replan_overrunning(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| self.timekeeper.is_overrun(p.started.elapsed()))
    }

    fn idle_state(&self) -> MpcState {
        match (self.buffer.is_empty(), self.last_control.is_some()) {
            (true, _) => MpcState::Idle,
            (false, true) => MpcState::Applying,
            (false, false) => MpcState::PolicyReady,
        }
    }

    fn ensure_running(&self) -> Result<(), MpcError> {
        if self.state == MpcState::Stopped {
            return Err(MpcError::Stopped);
        }
        Ok(())
    }

    fn check_state_dim(&self, x: &DVector<f64>) -> Result<(), MpcError> {
        if x.len() != self.solver.state_dim() {
            return Err(MpcError::DimensionMismatch {
                what: "state",
                expected: self.solver.state_dim(),
                got: x.len(),
            });
        }
        Ok(())
    }
}

impl<D, C> Drop for MpcController<D, C> {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            pending.cancel.cancel();
        }
    }
}
