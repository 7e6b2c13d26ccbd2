//! Ready-made control problems
//!
//! Each scenario bundles a model, a cost, settings and an initial state, and
//! can build the matching solver or controller. Used by the integration
//! tests and the closed-loop demo.

use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::DVector;

use optcon_core::dynamics::{DoubleIntegrator, Pendulum};
use optcon_core::{CostFunction, Dynamics, ModelError, QuadraticCost};

use crate::config::{MpcConfig, MpcSettings, NlocConfig};
use crate::controller::MpcController;
use crate::error::{MpcError, SolverError};
use crate::solver::NlocSolver;

/// Model, cost, settings and initial state of one problem
#[derive(Debug, Clone)]
pub struct Scenario<D, C> {
    pub name: &'static str,
    pub dynamics: Arc<D>,
    pub cost: Arc<C>,
    pub settings: MpcSettings,
    pub initial_state: DVector<f64>,
}

impl<D, C> Scenario<D, C>
where
    D: Dynamics + Send + Sync + 'static,
    C: CostFunction + Send + Sync + 'static,
{
    pub fn solver(&self) -> Result<NlocSolver<D, C>, SolverError> {
        NlocSolver::new(
            Arc::clone(&self.dynamics),
            Arc::clone(&self.cost),
            self.settings.nloc.clone(),
        )
    }

    pub fn controller(&self) -> Result<MpcController<D, C>, MpcError> {
        MpcController::from_settings(
            Arc::clone(&self.dynamics),
            Arc::clone(&self.cost),
            self.settings.clone(),
        )
    }

    pub fn horizon(&self) -> usize {
        self.settings.mpc.horizon_steps
    }
}

/// 1-axis double integrator displaced by 1 m, N = 20, dt = 0.1 s
///
/// ```text
/// Q = diag(10, 1), R = 0.1, Q_f = 100·I
/// ```
pub fn double_integrator_regulation(
) -> Result<Scenario<DoubleIntegrator, QuadraticCost>, ModelError> {
    let cost = QuadraticCost::diagonal(&[10.0, 1.0], &[0.1], &[100.0, 100.0])?;
    Ok(Scenario {
        name: "double_integrator_regulation",
        dynamics: Arc::new(DoubleIntegrator::new(1)),
        cost: Arc::new(cost),
        settings: MpcSettings {
            nloc: NlocConfig {
                dt: 0.1,
                ..Default::default()
            },
            mpc: MpcConfig {
                horizon_steps: 20,
                replan_period: 0.1,
                ..Default::default()
            },
        },
        initial_state: DoubleIntegrator::new(1).state_at_rest(&[1.0]),
    })
}

/// Damped pendulum released at 1.5 rad, brought back to the hanging position
pub fn pendulum_stabilization() -> Result<Scenario<Pendulum, QuadraticCost>, ModelError> {
    let cost = QuadraticCost::diagonal(&[5.0, 0.5], &[0.05], &[100.0, 10.0])?;
    Ok(Scenario {
        name: "pendulum_stabilization",
        dynamics: Arc::new(Pendulum::default()),
        cost: Arc::new(cost),
        settings: MpcSettings {
            nloc: NlocConfig {
                dt: 0.05,
                max_iterations: 100,
                ..Default::default()
            },
            mpc: MpcConfig {
                horizon_steps: 40,
                replan_period: 0.05,
                ..Default::default()
            },
        },
        initial_state: DVector::from_vec(vec![1.5, 0.0]),
    })
}

/// Pendulum swung up from rest to the upright position (θ = π)
pub fn pendulum_swing_up() -> Result<Scenario<Pendulum, QuadraticCost>, ModelError> {
    let cost = QuadraticCost::diagonal(&[1.0, 0.1], &[0.01], &[500.0, 50.0])?
        .with_reference(DVector::from_vec(vec![PI, 0.0]), DVector::zeros(1))?;
    Ok(Scenario {
        name: "pendulum_swing_up",
        dynamics: Arc::new(Pendulum::default()),
        cost: Arc::new(cost),
        settings: MpcSettings {
            nloc: NlocConfig {
                dt: 0.05,
                max_iterations: 200,
                ..Default::default()
            },
            mpc: MpcConfig {
                horizon_steps: 60,
                replan_period: 0.05,
                ..Default::default()
            },
        },
        initial_state: DVector::from_vec(vec![0.0, 0.0]),
    })
}
