//! Test models with switchable failure modes

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nalgebra::{DMatrix, DVector};

use optcon_core::dynamics::DoubleIntegrator;
use optcon_core::{
    CostFunction, Dynamics, Jacobians, QuadraticCost, StageQuadratic, TerminalQuadratic,
};

/// Shared on/off switch
#[derive(Debug, Clone, Default)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 1-axis double integrator that can be made slow or made to return NaN
/// for any non-zero control
#[derive(Debug, Clone, Default)]
pub struct FaultyIntegrator {
    pub poisoned: Switch,
    pub slow: Switch,
}

impl Dynamics for FaultyIntegrator {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> DVector<f64> {
        if self.slow.is_on() {
            thread::sleep(Duration::from_micros(500));
        }
        if self.poisoned.is_on() && u.iter().any(|v| v.abs() > 0.0) {
            return DVector::from_element(2, f64::NAN);
        }
        DoubleIntegrator::new(1).evaluate(x, u, t)
    }

    fn linearize(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> Jacobians {
        DoubleIntegrator::new(1).linearize(x, u, t)
    }
}

/// Quadratic cost that can be switched to a negative control weight
#[derive(Debug, Clone)]
pub struct SwitchableCost {
    pub good: QuadraticCost,
    pub bad: QuadraticCost,
    pub use_bad: Switch,
}

impl SwitchableCost {
    pub fn new() -> Self {
        Self {
            good: regulation_cost(),
            bad: QuadraticCost::diagonal(&[10.0, 1.0], &[-1.0], &[100.0, 100.0]).unwrap(),
            use_bad: Switch::default(),
        }
    }

    fn active(&self) -> &QuadraticCost {
        if self.use_bad.is_on() {
            &self.bad
        } else {
            &self.good
        }
    }
}

impl CostFunction for SwitchableCost {
    fn stage(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> f64 {
        self.active().stage(x, u, t)
    }

    fn terminal(&self, x: &DVector<f64>, t: f64) -> f64 {
        self.active().terminal(x, t)
    }

    fn stage_quadratic(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> StageQuadratic {
        self.active().stage_quadratic(x, u, t)
    }

    fn terminal_quadratic(&self, x: &DVector<f64>, t: f64) -> TerminalQuadratic {
        self.active().terminal_quadratic(x, t)
    }
}

/// Q = diag(10, 1), R = 0.1, Q_f = 100·I
pub fn regulation_cost() -> QuadraticCost {
    QuadraticCost::diagonal(&[10.0, 1.0], &[0.1], &[100.0, 100.0]).unwrap()
}

pub fn v(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

/// Closed-form finite-horizon discrete LQR gains, u_k = -K_k x_k
pub fn lqr_gains(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
    qf: &DMatrix<f64>,
    horizon: usize,
) -> Vec<DMatrix<f64>> {
    let mut p = qf.clone();
    let mut gains = vec![DMatrix::zeros(b.ncols(), a.nrows()); horizon];
    for k in (0..horizon).rev() {
        let bt_p = b.transpose() * &p;
        let k_gain = (r + &bt_p * b).try_inverse().unwrap() * &bt_p * a;
        p = q + a.transpose() * &p * (a - b * &k_gain);
        gains[k] = k_gain;
    }
    gains
}
