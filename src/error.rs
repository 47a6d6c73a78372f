use thiserror::Error;

/// Errors raised at the public API boundary.
///
/// All validation happens before any output is allocated or mutated.
/// Numerical safeguards inside the solvers are silent, and
/// non-convergence is reported through the model's iteration count and
/// tolerance history, never as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NmfError {
    #[error("'a' is not square ({nrows} x {ncols})")]
    NotSquare { nrows: usize, ncols: usize },

    #[error("incompatible dimensions: {0}")]
    DimensionMismatch(String),

    #[error("specify exactly one of 'w' or 'h', leaving the other 'None'")]
    BothOrNeitherFactor,

    #[error("L1 penalty must be in [0, 1), got {0}")]
    L1OutOfRange(f64),

    #[error("'mask_zeros' requires sparse input")]
    MaskZerosDense,

    #[error("'mask_zeros' is not supported for in-place updates of 'w'; project the transpose of 'A' instead")]
    MaskZerosInPlace,

    #[error("rank must be at least 1")]
    ZeroRank,
}
