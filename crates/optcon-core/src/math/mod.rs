//! Mathematical utilities
//!
//! Numerical integrators and finite-difference differentiation.

pub mod integrator;
pub mod differentiation;

pub use integrator::*;
pub use differentiation::*;
