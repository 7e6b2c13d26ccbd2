//! Linear-quadratic approximation along a nominal trajectory
//!
//! For every step k the dynamics are linearized and the stage cost is
//! expanded to second order around (x̄_k, ū_k):
//!
//! ```text
//! δx_{k+1} ≈ A_k δx_k + B_k δu_k
//! l_k ≈ l̄_k + l_xᵀ δx + l_uᵀ δu + ½ δxᵀ l_xx δx + ½ δuᵀ l_uu δu + δuᵀ l_ux δx
//! ```
//!
//! Stages are independent of each other, so they may be built on the
//! rayon thread pool.

use nalgebra::DMatrix;
use rayon::prelude::*;

use optcon_core::{CostFunction, Discretizer, Dynamics, StageQuadratic, TerminalQuadratic};

use crate::trajectory::Trajectory;

/// LQ model of one step
#[derive(Debug, Clone)]
pub struct LqStage {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub cost: StageQuadratic,
}

/// LQ model of a whole horizon
#[derive(Debug, Clone)]
pub struct LqApproximation {
    pub stages: Vec<LqStage>,
    pub terminal: TerminalQuadratic,
}

impl LqApproximation {
    /// Approximate the problem around `nominal`
    pub fn build<D, C>(
        dynamics: &D,
        cost: &C,
        discretizer: &Discretizer,
        nominal: &Trajectory,
        parallel: bool,
    ) -> Self
    where
        D: Dynamics + Sync + ?Sized,
        C: CostFunction + Sync + ?Sized,
    {
        let stage = |k: usize| {
            let (x, u, t) = (&nominal.states()[k], &nominal.controls()[k], nominal.times()[k]);
            let jac = discretizer.linearize(dynamics, x, u, t);
            LqStage {
                a: jac.a,
                b: jac.b,
                cost: cost.stage_quadratic(x, u, t),
            }
        };

        let stages = if parallel {
            (0..nominal.horizon()).into_par_iter().map(stage).collect()
        } else {
            (0..nominal.horizon()).map(stage).collect()
        };

        Self {
            stages,
            terminal: cost.terminal_quadratic(nominal.final_state(), nominal.end_time()),
        }
    }

    pub fn horizon(&self) -> usize {
        self.stages.len()
    }

    /// Whether every matrix and vector in the approximation is finite
    pub fn is_finite(&self) -> bool {
        let finite = |s: &[f64]| s.iter().all(|v| v.is_finite());
        self.stages.iter().all(|s| {
            finite(s.a.as_slice())
                && finite(s.b.as_slice())
                && finite(s.cost.lx.as_slice())
                && finite(s.cost.lu.as_slice())
                && finite(s.cost.lxx.as_slice())
                && finite(s.cost.luu.as_slice())
                && finite(s.cost.lux.as_slice())
        }) && finite(self.terminal.vx.as_slice())
            && finite(self.terminal.vxx.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use optcon_core::dynamics::Pendulum;
    use optcon_core::{Integrator, QuadraticCost};

    fn nominal(model: &Pendulum, disc: &Discretizer) -> Trajectory {
        let controls = (0..12).map(|k| DVector::from_vec(vec![0.3 * (k as f64).sin()])).collect();
        Trajectory::rollout(model, disc, &DVector::from_vec(vec![0.4, 0.0]), 0.0, controls).unwrap()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let model = Pendulum::default();
        let disc = Discretizer::new(0.05, Integrator::Rk4);
        let cost = QuadraticCost::diagonal(&[1.0, 0.1], &[0.01], &[10.0, 1.0]).unwrap();
        let traj = nominal(&model, &disc);

        let seq = LqApproximation::build(&model, &cost, &disc, &traj, false);
        let par = LqApproximation::build(&model, &cost, &disc, &traj, true);

        assert_eq!(seq.horizon(), 12);
        assert_eq!(par.horizon(), 12);
        for (s, p) in seq.stages.iter().zip(par.stages.iter()) {
            assert_relative_eq!(s.a, p.a, epsilon = 1e-15);
            assert_relative_eq!(s.b, p.b, epsilon = 1e-15);
            assert_relative_eq!(s.cost.lx, p.cost.lx, epsilon = 1e-15);
        }
        assert!(seq.is_finite());
    }

    #[test]
    fn test_stage_models_match_discretizer() {
        let model = Pendulum::default();
        let disc = Discretizer::new(0.05, Integrator::Rk4);
        let cost = QuadraticCost::diagonal(&[1.0, 0.1], &[0.01], &[10.0, 1.0]).unwrap();
        let traj = nominal(&model, &disc);
        let lq = LqApproximation::build(&model, &cost, &disc, &traj, false);

        let k = 5;
        let jac = disc.linearize(&model, &traj.states()[k], &traj.controls()[k], traj.times()[k]);
        assert_relative_eq!(lq.stages[k].a, jac.a);
        let xf = traj.final_state();
        let expected = DVector::from_vec(vec![10.0 * xf[0], xf[1]]);
        assert_relative_eq!(lq.terminal.vx, expected, epsilon = 1e-12);
    }
}
