//! Time-varying affine feedback policy
//!
//! ```text
//! u(t, x) = u_ff[k] + K[k] (x - x̄[k]),   t ∈ [t_k, t_{k+1})
//! ```
//!
//! `u_ff` is the optimized nominal control, `x̄` the nominal state it
//! produces and `K` the feedback gain from the last backward pass.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::TrajectoryError;
use crate::trajectory::Trajectory;

/// Evaluation of the policy between grid points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Stage `k` is applied on all of `[t_k, t_{k+1})`
    #[default]
    ZeroOrderHold,
    /// Feedforward, gain and nominal state blended linearly between stages
    Linear,
}

/// Feedback policy over a finite horizon
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackPolicy {
    times: Vec<f64>,
    feedforward: Vec<DVector<f64>>,
    gains: Vec<DMatrix<f64>>,
    nominal_states: Vec<DVector<f64>>,
}

impl FeedbackPolicy {
    /// Policy around `nominal` with one gain per step
    pub fn from_trajectory(
        nominal: &Trajectory,
        gains: Vec<DMatrix<f64>>,
    ) -> Result<Self, TrajectoryError> {
        if gains.len() != nominal.horizon() {
            return Err(TrajectoryError::LengthMismatch {
                what: "gains",
                expected: nominal.horizon(),
                got: gains.len(),
            });
        }
        let (m, n) = (nominal.control_dim(), nominal.state_dim());
        if let Some(index) = gains.iter().position(|g| g.shape() != (m, n)) {
            return Err(TrajectoryError::DimensionMismatch {
                what: "gain",
                index,
                expected: m * n,
                got: gains[index].len(),
            });
        }

        Ok(Self {
            times: nominal.times().to_vec(),
            feedforward: nominal.controls().to_vec(),
            gains,
            nominal_states: nominal.states().to_vec(),
        })
    }

    pub fn horizon(&self) -> usize {
        self.feedforward.len()
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

    pub fn feedforward(&self) -> &[DVector<f64>] {
        &self.feedforward
    }

    pub fn gains(&self) -> &[DMatrix<f64>] {
        &self.gains
    }

    pub fn nominal_states(&self) -> &[DVector<f64>] {
        &self.nominal_states
    }

    pub fn state_dim(&self) -> usize {
        self.nominal_states[0].len()
    }

    pub fn control_dim(&self) -> usize {
        self.feedforward[0].len()
    }

    /// Whether `t` lies within `[t_0, t_N]`
    pub fn covers(&self, t: f64) -> bool {
        t >= self.start_time() && t <= self.end_time()
    }

    /// Stage index for `t`, or `None` outside the horizon
    pub fn index_at(&self, t: f64) -> Option<usize> {
        if !self.covers(t) {
            return None;
        }
        let after = self.times[..self.horizon()].partition_point(|&tk| tk <= t);
        Some(after.saturating_sub(1))
    }

    /// Control for state `x` at time `t`; `None` outside the horizon
    pub fn control(
        &self,
        t: f64,
        x: &DVector<f64>,
        mode: InterpolationMode,
    ) -> Option<DVector<f64>> {
        let k = self.index_at(t)?;
        match mode {
            InterpolationMode::ZeroOrderHold => Some(self.stage_control(k, x)),
            InterpolationMode::Linear => Some(self.blended_control(k, t, x)),
        }
    }

    /// Control at `t` with the first and last stages held outside the horizon
    ///
    /// The flag is set when `t` is past the end of the horizon.
    pub fn control_clamped(
        &self,
        t: f64,
        x: &DVector<f64>,
        mode: InterpolationMode,
    ) -> (DVector<f64>, bool) {
        if t < self.start_time() {
            return (self.stage_control(0, x), false);
        }
        match self.control(t, x, mode) {
            Some(u) => (u, false),
            None => (self.extrapolate(x), true),
        }
    }

    /// Last-stage feedback law, used past the end of the horizon
    pub fn extrapolate(&self, x: &DVector<f64>) -> DVector<f64> {
        self.stage_control(self.horizon() - 1, x)
    }

    /// Same policy with every time stamp moved by `delta`
    pub fn time_shifted(&self, delta: f64) -> Self {
        Self {
            times: self.times.iter().map(|t| t + delta).collect(),
            ..self.clone()
        }
    }

    fn stage_control(&self, k: usize, x: &DVector<f64>) -> DVector<f64> {
        &self.feedforward[k] + &self.gains[k] * (x - &self.nominal_states[k])
    }

    fn blended_control(&self, k: usize, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let (t0, t1) = (self.times[k], self.times[k + 1]);
        let alpha = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
        let next = (k + 1).min(self.horizon() - 1);

        let u_ff = self.feedforward[k].lerp(&self.feedforward[next], alpha);
        let gain = &self.gains[k] * (1.0 - alpha) + &self.gains[next] * alpha;
        let x_nom = self.nominal_states[k].lerp(&self.nominal_states[k + 1], alpha);
        u_ff + gain * (x - x_nom)
    }
}
