//! Discrete state/control trajectories
//!
//! A trajectory over a horizon of N steps holds N+1 time stamps and states
//! and N controls; control `k` is held constant on `[t_k, t_{k+1})`.
//! The previous solution is resampled onto the next planning window to
//! warm-start the optimizer.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use optcon_core::{CostFunction, Discretizer, Dynamics};

use crate::error::TrajectoryError;

/// How a shifted control guess is extended past the end of the old horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailExtension {
    /// Repeat the last control of the previous solution
    #[default]
    HoldLastControl,
    /// Fill with zero control
    Coast,
}

/// State and control sequences with their time stamps
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
    controls: Vec<DVector<f64>>,
}

impl Trajectory {
    /// Build a trajectory, checking lengths, time ordering and dimensions
    pub fn new(
        times: Vec<f64>,
        states: Vec<DVector<f64>>,
        controls: Vec<DVector<f64>>,
    ) -> Result<Self, TrajectoryError> {
        if controls.is_empty() {
            return Err(TrajectoryError::Empty);
        }
        let n = controls.len();
        if states.len() != n + 1 {
            return Err(TrajectoryError::LengthMismatch {
                what: "states",
                expected: n + 1,
                got: states.len(),
            });
        }
        if times.len() != n + 1 {
            return Err(TrajectoryError::LengthMismatch {
                what: "time stamps",
                expected: n + 1,
                got: times.len(),
            });
        }
        if let Some(index) = times.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(TrajectoryError::NonIncreasingTime { index: index + 1 });
        }
        check_uniform_dim("state", &states)?;
        check_uniform_dim("control", &controls)?;

        Ok(Self {
            times,
            states,
            controls,
        })
    }

    /// Open-loop rollout of `controls` from `x0` on the grid `t0 + k·dt`
    pub fn rollout<D: Dynamics + ?Sized>(
        dynamics: &D,
        discretizer: &Discretizer,
        x0: &DVector<f64>,
        t0: f64,
        controls: Vec<DVector<f64>>,
    ) -> Result<Self, TrajectoryError> {
        let mut states = Vec::with_capacity(controls.len() + 1);
        let mut times = Vec::with_capacity(controls.len() + 1);
        states.push(x0.clone());
        times.push(t0);

        for (k, u) in controls.iter().enumerate() {
            let t = t0 + k as f64 * discretizer.dt;
            let next = discretizer.step(dynamics, &states[k], u, t);
            states.push(next);
            times.push(t0 + (k + 1) as f64 * discretizer.dt);
        }

        Self::new(times, states, controls)
    }

    /// Number of steps N
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }

    /// Mean sampling interval
    pub fn dt(&self) -> f64 {
        (self.end_time() - self.start_time()) / self.horizon() as f64
    }

    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.controls
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.states[0]
    }

    pub fn final_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1]
    }

    pub fn state_dim(&self) -> usize {
        self.states[0].len()
    }

    pub fn control_dim(&self) -> usize {
        self.controls[0].len()
    }

    /// All states and controls finite
    pub fn is_finite(&self) -> bool {
        self.states.iter().chain(self.controls.iter()).all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Total cost Σ l(x_k, u_k, t_k) + φ(x_N, t_N)
    pub fn cost<C: CostFunction + ?Sized>(&self, cost: &C) -> f64 {
        let running: f64 = self
            .controls
            .iter()
            .enumerate()
            .map(|(k, u)| cost.stage(&self.states[k], u, self.times[k]))
            .sum();
        running + cost.terminal(self.final_state(), self.end_time())
    }

    /// Index of the step whose interval contains `t`, clamped to [0, N-1]
    pub fn step_index(&self, t: f64) -> usize {
        // times[0..N] partitioned by "<= t"; the last such index is the step
        let after = self.times[..self.horizon()].partition_point(|&tk| tk <= t);
        after.saturating_sub(1)
    }

    /// State at time `t` by linear interpolation, clamped to the horizon
    pub fn state_at(&self, t: f64) -> DVector<f64> {
        if t <= self.start_time() {
            return self.states[0].clone();
        }
        if t >= self.end_time() {
            return self.final_state().clone();
        }

        let k = self.step_index(t);
        let (t0, t1) = (self.times[k], self.times[k + 1]);
        let alpha = (t - t0) / (t1 - t0);
        self.states[k].lerp(&self.states[k + 1], alpha)
    }

    /// Control at time `t` with zero-order hold, clamped to the horizon
    pub fn control_at(&self, t: f64) -> DVector<f64> {
        self.controls[self.step_index(t)].clone()
    }

    /// Control guess shifted forward by `steps`, same horizon length
    pub fn shift_steps(&self, steps: usize, tail: TailExtension) -> Vec<DVector<f64>> {
        let n = self.horizon();
        let mut shifted: Vec<DVector<f64>> = self.controls.iter().skip(steps).cloned().collect();
        while shifted.len() < n {
            shifted.push(self.tail_control(tail));
        }
        shifted
    }

    /// Control guess for a new window of `steps` samples starting at `t0`
    ///
    /// Samples inside the old horizon use zero-order hold; samples past its
    /// end are filled according to `tail`.
    pub fn resample(
        &self,
        t0: f64,
        steps: usize,
        dt: f64,
        tail: TailExtension,
    ) -> Vec<DVector<f64>> {
        // Tolerance so that sample times landing on the old grid stay inside it
        let end = self.end_time() - 1e-9 * dt.abs().max(1.0);
        (0..steps)
            .map(|k| {
                let t = t0 + k as f64 * dt;
                if t < end {
                    self.control_at(t)
                } else {
                    self.tail_control(tail)
                }
            })
            .collect()
    }

    fn tail_control(&self, tail: TailExtension) -> DVector<f64> {
        match tail {
            TailExtension::HoldLastControl => self.controls[self.controls.len() - 1].clone(),
            TailExtension::Coast => DVector::zeros(self.control_dim()),
        }
    }
}

fn check_uniform_dim(what: &'static str, vectors: &[DVector<f64>]) -> Result<(), TrajectoryError> {
    let expected = vectors[0].len();
    match vectors.iter().position(|v| v.len() != expected) {
        Some(index) => Err(TrajectoryError::DimensionMismatch {
            what,
            index,
            expected,
            got: vectors[index].len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use optcon_core::dynamics::DoubleIntegrator;
    use optcon_core::Integrator;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    fn ramp() -> Trajectory {
        // 4 steps of 0.5 s, state = [t], control = [k]
        let times = vec![0.0, 0.5, 1.0, 1.5, 2.0];
        let states = times.iter().map(|&t| v(&[t])).collect();
        let controls = (0..4).map(|k| v(&[k as f64])).collect();
        Trajectory::new(times, states, controls).unwrap()
    }

    #[test]
    fn test_validation() {
        let err = Trajectory::new(vec![0.0, 1.0], vec![v(&[0.0]), v(&[1.0])], vec![]);
        assert_eq!(err, Err(TrajectoryError::Empty));

        let err = Trajectory::new(vec![0.0, 1.0], vec![v(&[0.0])], vec![v(&[0.0])]);
        assert!(matches!(err, Err(TrajectoryError::LengthMismatch { what: "states", .. })));

        let err = Trajectory::new(vec![0.0, 0.0], vec![v(&[0.0]), v(&[1.0])], vec![v(&[0.0])]);
        assert_eq!(err, Err(TrajectoryError::NonIncreasingTime { index: 1 }));

        let err = Trajectory::new(vec![0.0, 1.0], vec![v(&[0.0]), v(&[1.0, 2.0])], vec![v(&[0.0])]);
        assert!(matches!(
            err,
            Err(TrajectoryError::DimensionMismatch { what: "state", index: 1, .. })
        ));
    }

    #[test]
    fn test_interpolation() {
        let traj = ramp();
        assert_eq!(traj.horizon(), 4);
        assert_relative_eq!(traj.dt(), 0.5);

        assert_relative_eq!(traj.state_at(0.75)[0], 0.75, epsilon = 1e-12);
        assert_relative_eq!(traj.state_at(-1.0)[0], 0.0);
        assert_relative_eq!(traj.state_at(5.0)[0], 2.0);

        // Zero-order hold, interval is [t_k, t_{k+1})
        assert_eq!(traj.control_at(0.49)[0], 0.0);
        assert_eq!(traj.control_at(0.5)[0], 1.0);
        assert_eq!(traj.control_at(1.99)[0], 3.0);
        assert_eq!(traj.control_at(10.0)[0], 3.0);
    }

    #[test]
    fn test_shift_steps() {
        let traj = ramp();
        let held = traj.shift_steps(2, TailExtension::HoldLastControl);
        let values: Vec<f64> = held.iter().map(|u| u[0]).collect();
        assert_eq!(values, vec![2.0, 3.0, 3.0, 3.0]);

        let coast = traj.shift_steps(1, TailExtension::Coast);
        let values: Vec<f64> = coast.iter().map(|u| u[0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_resample_new_window() {
        let traj = ramp();
        let guess = traj.resample(1.0, 4, 0.25, TailExtension::Coast);
        let values: Vec<f64> = guess.iter().map(|u| u[0]).collect();
        assert_eq!(values, vec![2.0, 2.0, 3.0, 3.0]);

        let beyond = traj.resample(1.5, 3, 0.5, TailExtension::HoldLastControl);
        let values: Vec<f64> = beyond.iter().map(|u| u[0]).collect();
        assert_eq!(values, vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_rollout_and_cost() {
        let model = DoubleIntegrator::new(1);
        let disc = Discretizer::new(0.1, Integrator::Rk4);
        let controls = vec![v(&[1.0]); 10];
        let traj = Trajectory::rollout(&model, &disc, &v(&[0.0, 0.0]), 2.0, controls).unwrap();

        assert_eq!(traj.horizon(), 10);
        assert_relative_eq!(traj.end_time(), 3.0, epsilon = 1e-12);
        // p = ½ t², v = t after 1 s of unit acceleration
        assert_relative_eq!(traj.final_state()[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(traj.final_state()[1], 1.0, epsilon = 1e-12);
        assert!(traj.is_finite());

        let cost = optcon_core::QuadraticCost::diagonal(&[0.0, 0.0], &[2.0], &[0.0, 0.0]).unwrap();
        // Σ ½·2·1² over 10 steps
        assert_relative_eq!(traj.cost(&cost), 10.0, epsilon = 1e-12);
    }
}
