//! Backtracking line search over the forward pass
//!
//! Each candidate step size α produces a closed-loop rollout
//!
//! ```text
//! u_k = ū_k + α k_k + K_k (x_k - x̄_k)
//! ```
//!
//! which is accepted when it is finite and satisfies the Armijo condition
//! `J_new ≤ J - c·expected(α)`. The search never touches solver state.

use nalgebra::DVector;

use optcon_core::{CostFunction, Discretizer, Dynamics};

use crate::backward::BackwardPass;
use crate::config::LineSearchConfig;
use crate::error::LineSearchFailure;
use crate::trajectory::Trajectory;

/// Accepted step
#[derive(Debug, Clone)]
pub struct LineSearchOutcome {
    pub alpha: f64,
    pub trajectory: Trajectory,
    pub cost: f64,
    /// Rollouts evaluated, including the accepted one
    pub trials: usize,
}

/// Backtracking line search with an Armijo acceptance test
#[derive(Debug, Clone)]
pub struct LineSearch {
    config: LineSearchConfig,
}

impl LineSearch {
    pub fn new(config: LineSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LineSearchConfig {
        &self.config
    }

    /// Try step sizes largest first and return the first acceptable one
    pub fn search<D, C>(
        &self,
        dynamics: &D,
        cost: &C,
        discretizer: &Discretizer,
        nominal: &Trajectory,
        nominal_cost: f64,
        step: &BackwardPass,
    ) -> Result<LineSearchOutcome, LineSearchFailure>
    where
        D: Dynamics + ?Sized,
        C: CostFunction + ?Sized,
    {
        let mut trials = 0;
        let mut best_cost = f64::INFINITY;
        let mut any_finite = false;

        for alpha in self.config.candidates() {
            trials += 1;

            let Some(candidate) = self.rollout(dynamics, discretizer, nominal, step, alpha) else {
                continue;
            };
            let candidate_cost = candidate.cost(cost);
            if !candidate_cost.is_finite() {
                continue;
            }
            any_finite = true;
            best_cost = best_cost.min(candidate_cost);

            let required = self.config.armijo * step.expected.improvement(alpha).max(0.0);
            if candidate_cost <= nominal_cost - required {
                return Ok(LineSearchOutcome {
                    alpha,
                    trajectory: candidate,
                    cost: candidate_cost,
                    trials,
                });
            }
        }

        if any_finite {
            Err(LineSearchFailure::NoDecrease { trials, best_cost })
        } else {
            Err(LineSearchFailure::NonFinite { trials })
        }
    }

    /// Closed-loop forward pass for step size `alpha`
    ///
    /// Returns `None` as soon as a state leaves the finite range or exceeds
    /// the divergence bound.
    pub fn rollout<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        discretizer: &Discretizer,
        nominal: &Trajectory,
        step: &BackwardPass,
        alpha: f64,
    ) -> Option<Trajectory> {
        let n = nominal.horizon();
        let mut states: Vec<DVector<f64>> = Vec::with_capacity(n + 1);
        let mut controls = Vec::with_capacity(n);
        states.push(nominal.initial_state().clone());

        for k in 0..n {
            let x = &states[k];
            let u = &nominal.controls()[k]
                + &step.feedforward[k] * alpha
                + &step.gains[k] * (x - &nominal.states()[k]);
            let next = discretizer.step(dynamics, x, &u, nominal.times()[k]);

            let limit = self.config.divergence_norm;
            if !is_admissible(&u, limit) || !is_admissible(&next, limit) {
                return None;
            }
            controls.push(u);
            states.push(next);
        }

        Trajectory::new(nominal.times().to_vec(), states, controls).ok()
    }
}

fn is_admissible(v: &DVector<f64>, bound: f64) -> bool {
    v.iter().all(|x| x.is_finite()) && v.norm() <= bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximation::LqApproximation;
    use crate::backward::backward_pass;
    use approx::assert_relative_eq;
    use optcon_core::dynamics::DoubleIntegrator;
    use optcon_core::{Integrator, QuadraticCost};

    struct Setup {
        model: DoubleIntegrator,
        cost: QuadraticCost,
        disc: Discretizer,
        nominal: Trajectory,
    }

    fn setup() -> Setup {
        let model = DoubleIntegrator::new(1);
        let cost = QuadraticCost::diagonal(&[10.0, 1.0], &[0.1], &[100.0, 100.0]).unwrap();
        let disc = Discretizer::new(0.1, Integrator::Rk4);
        let controls = vec![DVector::zeros(1); 20];
        let x0 = DVector::from_vec(vec![1.0, 0.0]);
        let nominal = Trajectory::rollout(&model, &disc, &x0, 0.0, controls).unwrap();
        Setup {
            model,
            cost,
            disc,
            nominal,
        }
    }

    #[test]
    fn test_full_step_accepted_for_lq_problem() {
        let s = setup();
        let lq = LqApproximation::build(&s.model, &s.cost, &s.disc, &s.nominal, false);
        let pass = backward_pass(&lq, 0.0).unwrap();
        let j0 = s.nominal.cost(&s.cost);

        let outcome = LineSearch::new(LineSearchConfig::default())
            .search(&s.model, &s.cost, &s.disc, &s.nominal, j0, &pass)
            .unwrap();

        assert_relative_eq!(outcome.alpha, 1.0);
        assert_eq!(outcome.trials, 1);
        assert!(outcome.cost < j0);
        // For an LQ problem the model is exact
        assert_relative_eq!(j0 - outcome.cost, pass.expected.improvement(1.0), epsilon = 1e-8 * j0);
    }

    #[test]
    fn test_zero_alpha_rollout_reproduces_nominal() {
        let s = setup();
        let lq = LqApproximation::build(&s.model, &s.cost, &s.disc, &s.nominal, false);
        let pass = backward_pass(&lq, 0.0).unwrap();

        let search = LineSearch::new(LineSearchConfig::default());
        let same = search.rollout(&s.model, &s.disc, &s.nominal, &pass, 0.0).unwrap();
        assert_relative_eq!(same.final_state(), s.nominal.final_state(), epsilon = 1e-12);
    }

    #[test]
    fn test_divergent_rollouts_rejected() {
        let s = setup();
        let lq = LqApproximation::build(&s.model, &s.cost, &s.disc, &s.nominal, false);
        let pass = backward_pass(&lq, 0.0).unwrap();
        let j0 = s.nominal.cost(&s.cost);

        let config = LineSearchConfig {
            divergence_norm: 1e-3,
            max_trials: 3,
            ..Default::default()
        };
        let err = LineSearch::new(config)
            .search(&s.model, &s.cost, &s.disc, &s.nominal, j0, &pass)
            .unwrap_err();
        assert_eq!(err, LineSearchFailure::NonFinite { trials: 3 });
    }

    #[test]
    fn test_no_decrease_when_direction_is_uphill() {
        let s = setup();
        let lq = LqApproximation::build(&s.model, &s.cost, &s.disc, &s.nominal, false);
        let mut pass = backward_pass(&lq, 0.0).unwrap();
        for k_ff in pass.feedforward.iter_mut() {
            *k_ff *= -1.0;
        }
        let j0 = s.nominal.cost(&s.cost);

        let config = LineSearchConfig {
            max_trials: 4,
            ..Default::default()
        };
        let err = LineSearch::new(config)
            .search(&s.model, &s.cost, &s.disc, &s.nominal, j0, &pass)
            .unwrap_err();
        assert!(matches!(err, LineSearchFailure::NoDecrease { trials: 4, .. }));
    }
}
