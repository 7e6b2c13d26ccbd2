//! Zero-order-hold discretization
//!
//! Turns any [`Dynamics`] into a one-step map x⁺ = F(x, u, t) with the
//! control held constant over the sampling interval, together with the
//! discrete Jacobians ∂F/∂x and ∂F/∂u used by the LQ approximation.
//!
//! For RK4 the Jacobians are the exact derivative of the RK4 map, obtained
//! by chaining the stage Jacobians:
//!
//! ```text
//! ∂k₁ = J₁
//! ∂k₂ = J₂ (I + h/2 ∂k₁)      (state part; control part adds B₂)
//! ∂k₃ = J₃ (I + h/2 ∂k₂)
//! ∂k₄ = J₄ (I + h ∂k₃)
//! A_d = I + h/6 (∂k₁ + 2∂k₂ + 2∂k₃ + ∂k₄)
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{Dynamics, Jacobians, TimeDomain};
use crate::math::Integrator;

/// Sampling interval and integration scheme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discretizer {
    /// Sampling interval [s]
    pub dt: f64,
    /// Integration scheme for continuous-time models
    pub integrator: Integrator,
}

impl Default for Discretizer {
    fn default() -> Self {
        Self {
            dt: 0.1,
            integrator: Integrator::Rk4,
        }
    }
}

impl Discretizer {
    pub fn new(dt: f64, integrator: Integrator) -> Self {
        Self { dt, integrator }
    }

    /// Propagate one sampling interval
    pub fn step<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: f64,
    ) -> DVector<f64> {
        match dynamics.time_domain() {
            TimeDomain::Discrete => dynamics.evaluate(x, u, t),
            TimeDomain::Continuous => self
                .integrator
                .integrate(x, t, self.dt, |tau, xs| dynamics.evaluate(xs, u, tau)),
        }
    }

    /// Propagate over an arbitrary duration with the control held constant
    ///
    /// Splits `duration` into whole sampling intervals plus a remainder.
    /// Discrete-time models advance by the number of whole intervals only.
    pub fn propagate<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: f64,
        duration: f64,
    ) -> DVector<f64> {
        if duration <= 0.0 || self.dt <= 0.0 {
            return x.clone();
        }

        let whole = (duration / self.dt).floor() as usize;
        let remainder = duration - whole as f64 * self.dt;

        let mut state = x.clone();
        let mut time = t;
        for _ in 0..whole {
            state = self.step(dynamics, &state, u, time);
            time += self.dt;
        }

        if remainder > 1e-12 && dynamics.time_domain() == TimeDomain::Continuous {
            let partial = Discretizer::new(remainder, self.integrator);
            state = partial.step(dynamics, &state, u, time);
        }

        state
    }

    /// Discrete Jacobians (A_d, B_d) of [`Discretizer::step`]
    pub fn linearize<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: f64,
    ) -> Jacobians {
        if dynamics.time_domain() == TimeDomain::Discrete {
            return dynamics.linearize(x, u, t);
        }

        match self.integrator {
            Integrator::ForwardEuler => self.linearize_euler(dynamics, x, u, t),
            Integrator::Rk4 => self.linearize_rk4(dynamics, x, u, t),
        }
    }

    fn linearize_euler<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: f64,
    ) -> Jacobians {
        let n = x.len();
        let jac = dynamics.linearize(x, u, t);
        Jacobians {
            a: DMatrix::identity(n, n) + jac.a * self.dt,
            b: jac.b * self.dt,
        }
    }

    fn linearize_rk4<D: Dynamics + ?Sized>(
        &self,
        dynamics: &D,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: f64,
    ) -> Jacobians {
        let h = self.dt;
        let n = x.len();
        let identity = DMatrix::<f64>::identity(n, n);

        let k1 = dynamics.evaluate(x, u, t);
        let j1 = dynamics.linearize(x, u, t);
        let dk1_dx = j1.a;
        let dk1_du = j1.b;

        let x2 = x + &k1 * (h / 2.0);
        let k2 = dynamics.evaluate(&x2, u, t + h / 2.0);
        let j2 = dynamics.linearize(&x2, u, t + h / 2.0);
        let dk2_dx = &j2.a * (&identity + &dk1_dx * (h / 2.0));
        let dk2_du = &j2.a * (&dk1_du * (h / 2.0)) + &j2.b;

        let x3 = x + &k2 * (h / 2.0);
        let k3 = dynamics.evaluate(&x3, u, t + h / 2.0);
        let j3 = dynamics.linearize(&x3, u, t + h / 2.0);
        let dk3_dx = &j3.a * (&identity + &dk2_dx * (h / 2.0));
        let dk3_du = &j3.a * (&dk2_du * (h / 2.0)) + &j3.b;

        let x4 = x + &k3 * h;
        let j4 = dynamics.linearize(&x4, u, t + h);
        let dk4_dx = &j4.a * (&identity + &dk3_dx * h);
        let dk4_du = &j4.a * (&dk3_du * h) + &j4.b;

        let a = &identity + (dk1_dx + dk2_dx * 2.0 + dk3_dx * 2.0 + dk4_dx) * (h / 6.0);
        let b = (dk1_du + dk2_du * 2.0 + dk3_du * 2.0 + dk4_du) * (h / 6.0);

        Jacobians { a, b }
    }
}
