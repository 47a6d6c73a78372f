use faer::{Mat, MatRef};
use rayon::iter::*;

use crate::error::NmfError;
use crate::sparse::MatrixView;
use crate::threads;

/// Mean squared error of a factor model
///
/// Computes the mean of `(A - w * diag(d) * h)^2`, column by column and
/// in parallel. With `mask_zeros`, entries not stored in the sparse input
/// are treated as missing: the sum runs over the stored entries only and
/// is divided by their count.
///
/// `w` and `h` are auto-transposed to their internal orientations
/// (factors x features, factors x samples) when supplied the other way
/// around. For a model without a scaling diagonal pass `d = vec![1.0; k]`.
///
/// ### Params
///
/// * `a` - The matrix that was factorized (sparse or dense view).
/// * `w` - Feature factor matrix.
/// * `d` - Scaling diagonal of rank length.
/// * `h` - Sample factor matrix.
/// * `mask_zeros` - Exclude unstored entries from the loss.
///
/// ### Returns
///
/// The mean squared reconstruction error.
pub fn mse(
    a: MatrixView,
    w: MatRef<f64>,
    d: &[f64],
    h: MatRef<f64>,
    mask_zeros: bool,
) -> Result<f64, NmfError> {
    let m = a.nrows();
    let n = a.ncols();

    let w = if w.nrows() == m {
        w.transpose().to_owned()
    } else {
        w.to_owned()
    };
    let h = if h.nrows() == n {
        h.transpose().to_owned()
    } else {
        h.to_owned()
    };

    if w.nrows() != h.nrows() {
        return Err(NmfError::DimensionMismatch(format!(
            "'w' and 'h' are not of equal rank ({} vs {})",
            w.nrows(),
            h.nrows()
        )));
    }
    if w.ncols() != m {
        return Err(NmfError::DimensionMismatch(
            "dimensions of 'w' and 'A' are incompatible".to_string(),
        ));
    }
    if h.ncols() != n {
        return Err(NmfError::DimensionMismatch(
            "dimensions of 'h' and 'A' are incompatible".to_string(),
        ));
    }
    if d.len() != w.nrows() {
        return Err(NmfError::DimensionMismatch(format!(
            "length of 'd' ({}) is not equal to the rank of 'w' and 'h'",
            d.len()
        )));
    }
    if mask_zeros && !a.is_sparse() {
        return Err(NmfError::MaskZerosDense);
    }

    let k = w.nrows();
    let wd = Mat::from_fn(k, m, |l, i| w[(l, i)] * d[l]);
    let wd = wd.as_ref();
    let h = h.as_ref();

    let col_loss = |j: usize| -> f64 {
        let mut y = vec![0.0; m];
        for i in 0..m {
            let mut acc = 0.0;
            for l in 0..k {
                acc += wd[(l, i)] * h[(l, j)];
            }
            y[i] = acc;
        }

        match a {
            MatrixView::Sparse(s) => {
                if mask_zeros {
                    s.col(j).map(|(row, val)| (val - y[row]) * (val - y[row])).sum()
                } else {
                    for (row, val) in s.col(j) {
                        y[row] -= val;
                    }
                    y.iter().map(|e| e * e).sum()
                }
            }
            MatrixView::Dense(dense) => (0..m)
                .map(|i| {
                    let e = dense[(i, j)] - y[i];
                    e * e
                })
                .sum(),
        }
    };

    let total: f64 = threads::scoped(|| (0..n).into_par_iter().map(col_loss).sum());

    let denom = match a {
        MatrixView::Sparse(s) if mask_zeros => s.nnz(),
        _ => m * n,
    };

    Ok(total / denom as f64)
}

///////////
// Tests //
///////////
