//! Decoupled double integrators
//!
//! For `axes` independent axes the state is interleaved
//! `[p₀, v₀, p₁, v₁, …]` and the control is one acceleration per axis:
//!
//! ```text
//! ṗᵢ = vᵢ
//! v̇ᵢ = uᵢ
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{Dynamics, Jacobians};

/// Continuous-time double integrator along one or more axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubleIntegrator {
    /// Number of independent axes
    pub axes: usize,
}

impl Default for DoubleIntegrator {
    fn default() -> Self {
        Self { axes: 1 }
    }
}

impl DoubleIntegrator {
    pub fn new(axes: usize) -> Self {
        Self { axes }
    }

    /// State vector with the given positions and zero velocities
    pub fn state_at_rest(&self, positions: &[f64]) -> DVector<f64> {
        let mut x = DVector::zeros(self.state_dim());
        for (i, p) in positions.iter().take(self.axes).enumerate() {
            x[2 * i] = *p;
        }
        x
    }
}

impl Dynamics for DoubleIntegrator {
    fn state_dim(&self) -> usize {
        2 * self.axes
    }

    fn control_dim(&self) -> usize {
        self.axes
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _t: f64) -> DVector<f64> {
        let mut xdot = DVector::zeros(self.state_dim());
        for i in 0..self.axes {
            xdot[2 * i] = x[2 * i + 1];
            xdot[2 * i + 1] = u[i];
        }
        xdot
    }

    fn linearize(&self, _x: &DVector<f64>, _u: &DVector<f64>, _t: f64) -> Jacobians {
        let n = self.state_dim();
        let mut a = DMatrix::zeros(n, n);
        let mut b = DMatrix::zeros(n, self.axes);
        for i in 0..self.axes {
            a[(2 * i, 2 * i + 1)] = 1.0;
            b[(2 * i + 1, i)] = 1.0;
        }
        Jacobians { a, b }
    }
}
