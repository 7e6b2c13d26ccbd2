//! Damped torque-driven pendulum
//!
//! State `[θ, ω]` with θ = 0 hanging straight down, control `[τ]`:
//!
//! ```text
//! θ̇ = ω
//! ω̇ = -(g/l)·sin θ - c·ω + τ / (m l²)
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{Dynamics, Jacobians};
use crate::error::ModelError;

/// Pendulum parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pendulum {
    /// Bob mass [kg]
    pub mass: f64,
    /// Rod length [m]
    pub length: f64,
    /// Viscous damping [1/s]
    pub damping: f64,
    /// Gravity [m/s²]
    pub gravity: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self {
            mass: 1.0,
            length: 1.0,
            damping: 0.1,
            gravity: 9.81,
        }
    }
}

impl Pendulum {
    pub fn new(mass: f64, length: f64, damping: f64) -> Result<Self, ModelError> {
        if !(mass > 0.0) {
            return Err(ModelError::InvalidParameter {
                what: "mass",
                message: format!("must be positive, got {mass}"),
            });
        }
        if !(length > 0.0) {
            return Err(ModelError::InvalidParameter {
                what: "length",
                message: format!("must be positive, got {length}"),
            });
        }
        Ok(Self {
            mass,
            length,
            damping,
            ..Default::default()
        })
    }

    fn inertia(&self) -> f64 {
        self.mass * self.length * self.length
    }
}

impl Dynamics for Pendulum {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _t: f64) -> DVector<f64> {
        let theta = x[0];
        let omega = x[1];
        let alpha = -(self.gravity / self.length) * theta.sin() - self.damping * omega
            + u[0] / self.inertia();
        DVector::from_vec(vec![omega, alpha])
    }

    fn linearize(&self, x: &DVector<f64>, _u: &DVector<f64>, _t: f64) -> Jacobians {
        let mut a = DMatrix::zeros(2, 2);
        a[(0, 1)] = 1.0;
        a[(1, 0)] = -(self.gravity / self.length) * x[0].cos();
        a[(1, 1)] = -self.damping;

        let mut b = DMatrix::zeros(2, 1);
        b[(1, 0)] = 1.0 / self.inertia();

        Jacobians { a, b }
    }
}
