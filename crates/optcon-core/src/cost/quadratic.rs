//! Quadratic tracking cost
//!
//! ```text
//! l(x, u) = ½ (x - x_ref)ᵀ Q (x - x_ref) + ½ (u - u_ref)ᵀ R (u - u_ref)
//! φ(x)    = ½ (x - x_ref)ᵀ Q_f (x - x_ref)
//! ```

use nalgebra::{DMatrix, DVector};

use super::{CostFunction, StageQuadratic, TerminalQuadratic};
use crate::error::{check_dim, ModelError};

/// Quadratic stage and terminal cost around a fixed reference
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticCost {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    q_final: DMatrix<f64>,
    x_ref: DVector<f64>,
    u_ref: DVector<f64>,
}

fn check_square(what: &'static str, m: &DMatrix<f64>) -> Result<(), ModelError> {
    if m.nrows() != m.ncols() {
        return Err(ModelError::NotSquare {
            what,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    Ok(())
}

impl QuadraticCost {
    /// Regulation cost (zero references) from full weight matrices
    pub fn new(
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        q_final: DMatrix<f64>,
    ) -> Result<Self, ModelError> {
        check_square("Q", &q)?;
        check_square("R", &r)?;
        check_square("Q_f", &q_final)?;
        check_dim("Q_f", q.nrows(), q_final.nrows())?;

        let x_ref = DVector::zeros(q.nrows());
        let u_ref = DVector::zeros(r.nrows());
        Ok(Self {
            q,
            r,
            q_final,
            x_ref,
            u_ref,
        })
    }

    /// Regulation cost from weight diagonals
    pub fn diagonal(q: &[f64], r: &[f64], q_final: &[f64]) -> Result<Self, ModelError> {
        Self::new(
            DMatrix::from_diagonal(&DVector::from_column_slice(q)),
            DMatrix::from_diagonal(&DVector::from_column_slice(r)),
            DMatrix::from_diagonal(&DVector::from_column_slice(q_final)),
        )
    }

    /// Replace the tracking references
    pub fn with_reference(
        mut self,
        x_ref: DVector<f64>,
        u_ref: DVector<f64>,
    ) -> Result<Self, ModelError> {
        self.set_reference(x_ref, u_ref)?;
        Ok(self)
    }

    pub fn set_reference(
        &mut self,
        x_ref: DVector<f64>,
        u_ref: DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("x_ref", self.state_dim(), x_ref.len())?;
        check_dim("u_ref", self.control_dim(), u_ref.len())?;
        self.x_ref = x_ref;
        self.u_ref = u_ref;
        Ok(())
    }

    pub fn state_dim(&self) -> usize {
        self.q.nrows()
    }

    pub fn control_dim(&self) -> usize {
        self.r.nrows()
    }

    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn q_final(&self) -> &DMatrix<f64> {
        &self.q_final
    }

    pub fn x_ref(&self) -> &DVector<f64> {
        &self.x_ref
    }

    pub fn u_ref(&self) -> &DVector<f64> {
        &self.u_ref
    }
}

impl CostFunction for QuadraticCost {
    fn stage(&self, x: &DVector<f64>, u: &DVector<f64>, _t: f64) -> f64 {
        let dx = x - &self.x_ref;
        let du = u - &self.u_ref;
        0.5 * (dx.dot(&(&self.q * &dx)) + du.dot(&(&self.r * &du)))
    }

    fn terminal(&self, x: &DVector<f64>, _t: f64) -> f64 {
        let dx = x - &self.x_ref;
        0.5 * dx.dot(&(&self.q_final * &dx))
    }

    fn stage_quadratic(&self, x: &DVector<f64>, u: &DVector<f64>, _t: f64) -> StageQuadratic {
        // Symmetric part only: the expansion of ½ dxᵀ Q dx uses (Q + Qᵀ)/2
        let q_sym = (&self.q + self.q.transpose()) * 0.5;
        let r_sym = (&self.r + self.r.transpose()) * 0.5;
        StageQuadratic {
            lx: &q_sym * (x - &self.x_ref),
            lu: &r_sym * (u - &self.u_ref),
            lxx: q_sym,
            luu: r_sym,
            lux: DMatrix::zeros(self.control_dim(), self.state_dim()),
        }
    }

    fn terminal_quadratic(&self, x: &DVector<f64>, _t: f64) -> TerminalQuadratic {
        let qf_sym = (&self.q_final + self.q_final.transpose()) * 0.5;
        TerminalQuadratic {
            vx: &qf_sym * (x - &self.x_ref),
            vxx: qf_sym,
        }
    }
}
