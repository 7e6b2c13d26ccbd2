//! Model validation tests
//!
//! Checks the model layer against closed-form results:
//! 1. Analytic Jacobians agree with finite differences
//! 2. Discretized sensitivities are the derivatives of the step map
//! 3. Quadratic cost expansions are exact
//! 4. Physical behavior of the concrete models

use approx::assert_relative_eq;
use nalgebra::{dmatrix, DMatrix, DVector};
use std::f64::consts::PI;

use optcon_core::dynamics::{numerical_jacobians, DoubleIntegrator, LinearSystem, Pendulum};
use optcon_core::math::central_difference;
use optcon_core::{CostFunction, Discretizer, Dynamics, Integrator, QuadraticCost};

fn v(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

mod jacobian_tests {
    use super::*;

    #[test]
    fn test_pendulum_analytic_matches_numeric() {
        let model = Pendulum::new(0.8, 1.2, 0.3).unwrap();
        for &(theta, omega, tau) in &[(0.0, 0.0, 0.0), (1.1, -0.4, 0.7), (PI, 2.0, -1.5)] {
            let x = v(&[theta, omega]);
            let u = v(&[tau]);
            let analytic = model.linearize(&x, &u, 0.0);
            let numeric = numerical_jacobians(&model, &x, &u, 0.0);
            assert_relative_eq!(analytic.a, numeric.a, epsilon = 1e-8);
            assert_relative_eq!(analytic.b, numeric.b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_multi_axis_double_integrator() {
        let model = DoubleIntegrator::new(3);
        let x = model.state_at_rest(&[1.0, 2.0, 3.0]);
        let u = v(&[0.1, 0.2, 0.3]);
        let analytic = model.linearize(&x, &u, 0.0);
        let numeric = numerical_jacobians(&model, &x, &u, 0.0);

        assert_eq!(analytic.a.shape(), (6, 6));
        assert_eq!(analytic.b.shape(), (6, 3));
        assert_relative_eq!(analytic.a, numeric.a, epsilon = 1e-9);
        assert_relative_eq!(analytic.b, numeric.b, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_system_is_its_own_jacobian() {
        let a = dmatrix![0.0, 1.0; -2.0, -0.5];
        let b = dmatrix![0.0; 1.0];
        let sys = LinearSystem::continuous(a.clone(), b.clone()).unwrap();
        let jac = sys.linearize(&v(&[3.0, -1.0]), &v(&[2.0]), 0.0);
        assert_relative_eq!(jac.a, a);
        assert_relative_eq!(jac.b, b);
    }
}

mod discretization_tests {
    use super::*;

    #[test]
    fn test_sensitivities_are_derivatives_of_step_map() {
        let model = Pendulum::default();
        for integrator in [Integrator::ForwardEuler, Integrator::Rk4] {
            let disc = Discretizer::new(0.02, integrator);
            let x = v(&[2.0, -1.0]);
            let u = v(&[0.5]);
            let jac = disc.linearize(&model, &x, &u, 0.0);

            let a_fd = central_difference(&x, |xp| disc.step(&model, xp, &u, 0.0));
            let b_fd = central_difference(&u, |up| disc.step(&model, &x, up, 0.0));
            assert_relative_eq!(jac.a, a_fd, epsilon = 1e-7);
            assert_relative_eq!(jac.b, b_fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_continuous_linear_system_matches_matrix_exponential_series() {
        // For ẋ = Ax + Bu, RK4 reproduces the 4th-order Taylor expansion of e^{A dt}
        let a = dmatrix![0.0, 1.0; -1.0, 0.0];
        let b = dmatrix![0.0; 1.0];
        let sys = LinearSystem::continuous(a.clone(), b).unwrap();
        let dt = 0.1;
        let disc = Discretizer::new(dt, Integrator::Rk4);
        let jac = disc.linearize(&sys, &v(&[0.0, 0.0]), &v(&[0.0]), 0.0);

        let identity = DMatrix::<f64>::identity(2, 2);
        let a2 = &a * &a;
        let a3 = &a2 * &a;
        let a4 = &a3 * &a;
        let taylor = &identity
            + &a * dt
            + a2 * (dt.powi(2) / 2.0)
            + a3 * (dt.powi(3) / 6.0)
            + a4 * (dt.powi(4) / 24.0);
        assert_relative_eq!(jac.a, taylor, epsilon = 1e-12);
    }

    #[test]
    fn test_rk4_more_accurate_than_euler() {
        // Free double integrator with constant acceleration: exact p(1) = 0.5
        let model = DoubleIntegrator::new(1);
        let x0 = v(&[0.0, 0.0]);
        let u = v(&[1.0]);

        let rk4 = Discretizer::new(0.1, Integrator::Rk4).propagate(&model, &x0, &u, 0.0, 1.0);
        let euler =
            Discretizer::new(0.1, Integrator::ForwardEuler).propagate(&model, &x0, &u, 0.0, 1.0);

        assert_relative_eq!(rk4[0], 0.5, epsilon = 1e-12);
        assert!((euler[0] - 0.5).abs() > 1e-3);
    }
}

mod cost_tests {
    use super::*;

    #[test]
    fn test_quadratic_expansion_matches_finite_differences() {
        let q = dmatrix![2.0, 0.5; 0.5, 1.0];
        let r = dmatrix![0.3];
        let qf = dmatrix![5.0, 0.0; 0.0, 5.0];
        let cost = QuadraticCost::new(q, r, qf)
            .unwrap()
            .with_reference(v(&[1.0, -1.0]), v(&[0.2]))
            .unwrap();

        let x = v(&[0.3, 0.7]);
        let u = v(&[-0.4]);
        let quad = cost.stage_quadratic(&x, &u, 0.0);

        let lx_fd = central_difference(&x, |xp| DVector::from_element(1, cost.stage(xp, &u, 0.0)));
        let lu_fd = central_difference(&u, |up| DVector::from_element(1, cost.stage(&x, up, 0.0)));
        assert_relative_eq!(quad.lx, lx_fd.transpose().column(0).into_owned(), epsilon = 1e-8);
        assert_relative_eq!(quad.lu, lu_fd.transpose().column(0).into_owned(), epsilon = 1e-8);

        // Hessians of a quadratic are constant: expanding at two points gives the same matrices
        let other = cost.stage_quadratic(&v(&[-5.0, 2.0]), &v(&[1.0]), 0.0);
        assert_relative_eq!(quad.lxx, other.lxx);
        assert_relative_eq!(quad.luu, other.luu);
    }

    #[test]
    fn test_terminal_cost_minimum_at_reference() {
        let cost = QuadraticCost::diagonal(&[1.0, 1.0], &[1.0], &[10.0, 10.0])
            .unwrap()
            .with_reference(v(&[PI, 0.0]), v(&[0.0]))
            .unwrap();
        assert_relative_eq!(cost.terminal(&v(&[PI, 0.0]), 1.0), 0.0);
        assert!(cost.terminal(&v(&[PI + 0.1, 0.0]), 1.0) > 0.0);
        assert_relative_eq!(cost.terminal_quadratic(&v(&[PI, 0.0]), 1.0).vx.norm(), 0.0);
    }
}

mod physical_behavior_tests {
    use super::*;

    #[test]
    fn test_pendulum_hanging_equilibrium() {
        let model = Pendulum::default();
        let xdot = model.evaluate(&v(&[0.0, 0.0]), &v(&[0.0]), 0.0);
        assert_relative_eq!(xdot.norm(), 0.0);
    }

    #[test]
    fn test_pendulum_holding_torque() {
        // τ = m g l sin θ keeps the pendulum at rest at θ
        let model = Pendulum::default();
        let theta = 0.6_f64;
        let tau = model.mass * model.gravity * model.length * theta.sin();
        let xdot = model.evaluate(&v(&[theta, 0.0]), &v(&[tau]), 0.0);
        assert_relative_eq!(xdot[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_damping_dissipates_energy() {
        let model = Pendulum::new(1.0, 1.0, 0.5).unwrap();
        let disc = Discretizer::new(0.01, Integrator::Rk4);
        let energy = |x: &DVector<f64>| 0.5 * x[1] * x[1] + model.gravity * (1.0 - x[0].cos());

        let x0 = v(&[1.0, 0.0]);
        let x1 = disc.propagate(&model, &x0, &v(&[0.0]), 0.0, 5.0);
        assert!(energy(&x1) < energy(&x0));
    }
}
