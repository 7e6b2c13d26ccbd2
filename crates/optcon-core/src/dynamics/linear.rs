//! Linear time-invariant systems

use nalgebra::{DMatrix, DVector};

use super::{Dynamics, Jacobians, TimeDomain};
use crate::error::{check_dim, ModelError};

/// Linear time-invariant model ẋ = Ax + Bu (or x⁺ = Ax + Bu)
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    domain: TimeDomain,
}

impl LinearSystem {
    /// Create a linear model, checking that A is square and B has matching rows
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, domain: TimeDomain) -> Result<Self, ModelError> {
        if a.nrows() != a.ncols() {
            return Err(ModelError::NotSquare {
                what: "A",
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        check_dim("B rows", a.nrows(), b.nrows())?;
        Ok(Self { a, b, domain })
    }

    /// Continuous-time model ẋ = Ax + Bu
    pub fn continuous(a: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self, ModelError> {
        Self::new(a, b, TimeDomain::Continuous)
    }

    /// Discrete-time model x⁺ = Ax + Bu
    pub fn discrete(a: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self, ModelError> {
        Self::new(a, b, TimeDomain::Discrete)
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }
}

impl Dynamics for LinearSystem {
    fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    fn control_dim(&self) -> usize {
        self.b.ncols()
    }

    fn time_domain(&self) -> TimeDomain {
        self.domain
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _t: f64) -> DVector<f64> {
        &self.a * x + &self.b * u
    }

    fn linearize(&self, _x: &DVector<f64>, _u: &DVector<f64>, _t: f64) -> Jacobians {
        Jacobians {
            a: self.a.clone(),
            b: self.b.clone(),
        }
    }
}
