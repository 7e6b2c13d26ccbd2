//! Finite-difference differentiation
//!
//! Central-difference Jacobians for models that do not provide analytic
//! derivatives.

use nalgebra::{DMatrix, DVector};

/// Relative perturbation for central differences (≈ cbrt of machine epsilon)
pub const CENTRAL_DIFFERENCE_STEP: f64 = 6.0e-6;

/// Central-difference Jacobian of `f` at `x`
///
/// Each column j is `(f(x + h eⱼ) - f(x - h eⱼ)) / 2h` with
/// `h = CENTRAL_DIFFERENCE_STEP · max(1, |xⱼ|)`.
pub fn central_difference<F>(x: &DVector<f64>, f: F) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = x.len();
    let mut columns: Vec<DVector<f64>> = Vec::with_capacity(n);
    let mut shifted = x.clone();

    for j in 0..n {
        let h = CENTRAL_DIFFERENCE_STEP * x[j].abs().max(1.0);

        shifted[j] = x[j] + h;
        let forward = f(&shifted);
        shifted[j] = x[j] - h;
        let backward = f(&shifted);
        shifted[j] = x[j];

        columns.push((forward - backward) / (2.0 * h));
    }

    if columns.is_empty() {
        let rows = f(x).len();
        return DMatrix::zeros(rows, 0);
    }
    DMatrix::from_columns(&columns)
}
