use thiserror::Error;

/// Errors raised while constructing dynamics or cost models
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Matrix {what} must be square, got {rows}x{cols}")]
    NotSquare {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("Invalid parameter {what}: {message}")]
    InvalidParameter { what: &'static str, message: String },
}

/// Check that a vector or matrix dimension matches the expected size
pub(crate) fn check_dim(what: &'static str, expected: usize, got: usize) -> Result<(), ModelError> {
    if expected != got {
        return Err(ModelError::DimensionMismatch { what, expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dim() {
        assert!(check_dim("x", 3, 3).is_ok());
        let err = check_dim("x_ref", 3, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for x_ref: expected 3, got 2"
        );
    }

    #[test]
    fn test_not_square_display() {
        let err = ModelError::NotSquare { what: "Q", rows: 2, cols: 3 };
        assert_eq!(err.to_string(), "Matrix Q must be square, got 2x3");
    }
}
