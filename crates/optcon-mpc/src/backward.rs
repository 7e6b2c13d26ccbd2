//! Backward Riccati recursion
//!
//! Propagates the quadratic value function from the terminal stage to the
//! first one and produces, per step, the feedforward correction `k` and
//! the feedback gain `K`:
//!
//! ```text
//! Q_x  = l_x  + Aᵀ V_x           Q_u  = l_u  + Bᵀ V_x
//! Q_xx = l_xx + Aᵀ V_xx A        Q_uu = l_uu + Bᵀ V_xx B
//! Q_ux = l_ux + Bᵀ V_xx A
//! k = -(Q_uu + μI)⁻¹ Q_u         K = -(Q_uu + μI)⁻¹ Q_ux
//! V_x  = Q_x  + Kᵀ Q_uu k + Kᵀ Q_u + Q_uxᵀ k
//! V_xx = Q_xx + Kᵀ Q_uu K + Kᵀ Q_ux + Q_uxᵀ K
//! ```
//!
//! The recursion is inherently sequential.

use nalgebra::{DMatrix, DVector};

use crate::approximation::LqApproximation;

/// Predicted cost change of a step of size α: α·ΔV₁ + α²·ΔV₂
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExpectedChange {
    pub linear: f64,
    pub quadratic: f64,
}

impl ExpectedChange {
    /// Expected cost reduction for step size `alpha` (positive means decrease)
    pub fn improvement(&self, alpha: f64) -> f64 {
        -(alpha * self.linear + alpha * alpha * self.quadratic)
    }
}

/// Step direction and gains from one backward pass
#[derive(Debug, Clone)]
pub struct BackwardPass {
    /// Feedforward corrections k, one per step
    pub feedforward: Vec<DVector<f64>>,
    /// Feedback gains K, one per step
    pub gains: Vec<DMatrix<f64>>,
    pub expected: ExpectedChange,
}

/// Q_uu + μI could not be factorized at `step`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotPositiveDefinite {
    pub step: usize,
}

/// Run the recursion with control-Hessian regularization `mu`
pub fn backward_pass(lq: &LqApproximation, mu: f64) -> Result<BackwardPass, NotPositiveDefinite> {
    let n = lq.horizon();
    let mut feedforward = vec![DVector::zeros(0); n];
    let mut gains = vec![DMatrix::zeros(0, 0); n];
    let mut expected = ExpectedChange::default();

    let mut v_x = lq.terminal.vx.clone();
    let mut v_xx = lq.terminal.vxx.clone();

    for k in (0..n).rev() {
        let stage = &lq.stages[k];
        let a_t = stage.a.transpose();
        let b_t = stage.b.transpose();
        let v_xx_a = &v_xx * &stage.a;

        let q_x = &stage.cost.lx + &a_t * &v_x;
        let q_u = &stage.cost.lu + &b_t * &v_x;
        let q_xx = &stage.cost.lxx + &a_t * &v_xx_a;
        let q_uu = &stage.cost.luu + &b_t * &v_xx * &stage.b;
        let q_ux = &stage.cost.lux + &b_t * &v_xx_a;

        let m = q_uu.nrows();
        let regularized = &q_uu + DMatrix::<f64>::identity(m, m) * mu;
        if regularized.iter().any(|v| !v.is_finite()) {
            return Err(NotPositiveDefinite { step: k });
        }
        let chol = regularized.cholesky().ok_or(NotPositiveDefinite { step: k })?;

        let k_ff = -chol.solve(&q_u);
        let k_fb = -chol.solve(&q_ux);

        expected.linear += k_ff.dot(&q_u);
        expected.quadratic += 0.5 * k_ff.dot(&(&q_uu * &k_ff));

        let k_fb_t = k_fb.transpose();
        let q_ux_t = q_ux.transpose();
        v_x = &q_x + &k_fb_t * (&q_uu * &k_ff) + &k_fb_t * &q_u + &q_ux_t * &k_ff;
        let next_v_xx = &q_xx + &k_fb_t * &q_uu * &k_fb + &k_fb_t * &q_ux + &q_ux_t * &k_fb;
        v_xx = (&next_v_xx + next_v_xx.transpose()) * 0.5;

        feedforward[k] = k_ff;
        gains[k] = k_fb;
    }

    Ok(BackwardPass {
        feedforward,
        gains,
        expected,
    })
}
