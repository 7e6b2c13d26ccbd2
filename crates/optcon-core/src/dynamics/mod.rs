//! Dynamics models
//!
//! The optimizer talks to a plant model only through [`Dynamics`]:
//! evaluate the state transition (or derivative) and linearize it.
//! Concrete models are chosen at configuration time and passed as generic
//! parameters, so the per-timestep loops are statically dispatched.
//!
//! - [`LinearSystem`]: ẋ = Ax + Bu or x⁺ = Ax + Bu
//! - [`DoubleIntegrator`]: decoupled double integrators
//! - [`Pendulum`]: damped, torque-driven pendulum
//! - [`Discretizer`]: zero-order-hold discretization with exact sensitivities

pub mod linear;
pub mod double_integrator;
pub mod pendulum;
pub mod discretization;

pub use linear::*;
pub use double_integrator::*;
pub use pendulum::*;
pub use discretization::*;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::math::central_difference;

/// Whether a model describes a derivative or a one-step map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomain {
    /// `evaluate` returns ẋ = f(x, u, t)
    Continuous,
    /// `evaluate` returns x⁺ = f(x, u, t)
    Discrete,
}

/// Jacobians of the dynamics w.r.t. state (A) and control (B)
#[derive(Debug, Clone, PartialEq)]
pub struct Jacobians {
    /// ∂f/∂x, state_dim × state_dim
    pub a: DMatrix<f64>,
    /// ∂f/∂u, state_dim × control_dim
    pub b: DMatrix<f64>,
}

/// Plant model interface
///
/// Implementations must be deterministic and free of side effects: the
/// line search evaluates the same (x, u, t) repeatedly.
pub trait Dynamics {
    fn state_dim(&self) -> usize;

    fn control_dim(&self) -> usize;

    fn time_domain(&self) -> TimeDomain {
        TimeDomain::Continuous
    }

    /// State derivative (continuous) or successor state (discrete)
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> DVector<f64>;

    /// Jacobians of [`Dynamics::evaluate`]
    ///
    /// Defaults to central finite differences; override with analytic
    /// derivatives where available.
    fn linearize(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> Jacobians {
        numerical_jacobians(self, x, u, t)
    }
}

/// Central-difference Jacobians of an arbitrary model
pub fn numerical_jacobians<D: Dynamics + ?Sized>(
    dynamics: &D,
    x: &DVector<f64>,
    u: &DVector<f64>,
    t: f64,
) -> Jacobians {
    let a = central_difference(x, |xp| dynamics.evaluate(xp, u, t));
    let b = central_difference(u, |up| dynamics.evaluate(x, up, t));
    Jacobians { a, b }
}
