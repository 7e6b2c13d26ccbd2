//! Numerical integration methods
//!
//! Fixed-step Runge-Kutta and Euler schemes on dynamically sized state
//! vectors. Used to discretize continuous-time dynamics under a
//! zero-order-hold control and to propagate measured states forward.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Fixed-step integration scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrator {
    /// First-order explicit Euler
    ForwardEuler,
    /// Classic 4th-order Runge-Kutta
    #[default]
    Rk4,
}

/// Generic RK4 integrator
///
/// Solves dx/dt = f(t, x) using 4th-order Runge-Kutta method.
///
/// # Arguments
/// * `x` - Current state
/// * `t` - Current time
/// * `dt` - Time step
/// * `f` - Derivative function f(t, x) -> dx/dt
///
/// # Returns
/// New state after integration
pub fn rk4<F>(x: &DVector<f64>, t: f64, dt: f64, f: F) -> DVector<f64>
where
    F: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 2.0, &(x + &k1 * (dt / 2.0)));
    let k3 = f(t + dt / 2.0, &(x + &k2 * (dt / 2.0)));
    let k4 = f(t + dt, &(x + &k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Simple Euler integration (first-order)
///
/// Less accurate but faster than RK4.
pub fn euler<F>(x: &DVector<f64>, t: f64, dt: f64, f: F) -> DVector<f64>
where
    F: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    x + f(t, x) * dt
}

impl Integrator {
    /// Advance `x` by one step of length `dt` with the selected scheme
    pub fn integrate<F>(&self, x: &DVector<f64>, t: f64, dt: f64, f: F) -> DVector<f64>
    where
        F: Fn(f64, &DVector<f64>) -> DVector<f64>,
    {
        match self {
            Integrator::ForwardEuler => euler(x, t, dt, f),
            Integrator::Rk4 => rk4(x, t, dt, f),
        }
    }
}
