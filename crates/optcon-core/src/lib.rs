//! # optcon-core
//!
//! Model layer for nonlinear optimal control.
//!
//! This library provides the pieces the trajectory optimizer treats as
//! external collaborators: plant dynamics with their Jacobians, and stage /
//! terminal costs with their quadratic expansions.
//!
//! ## Modules
//!
//! - [`math`]: Numerical integrators and finite differences
//! - [`dynamics`]: Dynamics interface, concrete models, discretization
//! - [`cost`]: Cost interface and quadratic tracking cost
//! - [`error`]: Model construction errors

pub mod math;
pub mod dynamics;
pub mod cost;
pub mod error;

pub use cost::{CostFunction, QuadraticCost, StageQuadratic, TerminalQuadratic};
pub use dynamics::{Discretizer, Dynamics, Jacobians, TimeDomain};
pub use error::ModelError;
pub use math::Integrator;

use nalgebra::{DMatrix, DVector};

/// State vector type
pub type State = DVector<f64>;

/// Control vector type
pub type Control = DVector<f64>;

/// Feedback gain type (control_dim × state_dim)
pub type Gain = DMatrix<f64>;
