//! Cost models
//!
//! Stage costs are charged once per sampling step; the terminal cost once
//! at the end of the horizon:
//!
//! ```text
//! J = Σₖ l(xₖ, uₖ, tₖ) + φ(x_N, t_N)
//! ```

pub mod quadratic;

pub use quadratic::*;

use nalgebra::{DMatrix, DVector};

/// Second-order expansion of a stage cost around (x, u)
#[derive(Debug, Clone, PartialEq)]
pub struct StageQuadratic {
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
    /// ∂²l/∂u∂x, control_dim × state_dim
    pub lux: DMatrix<f64>,
}

/// Second-order expansion of the terminal cost around x
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalQuadratic {
    pub vx: DVector<f64>,
    pub vxx: DMatrix<f64>,
}

/// Cost interface
///
/// Like [`crate::dynamics::Dynamics`], implementations must be pure.
pub trait CostFunction {
    fn stage(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> f64;

    fn terminal(&self, x: &DVector<f64>, t: f64) -> f64;

    fn stage_quadratic(&self, x: &DVector<f64>, u: &DVector<f64>, t: f64) -> StageQuadratic;

    fn terminal_quadratic(&self, x: &DVector<f64>, t: f64) -> TerminalQuadratic;
}
