use faer::MatRef;

use crate::{assert_same_dims, assert_same_len};

/// Floor guarding divisions by degenerate scales.
pub(crate) const TINY: f64 = 1e-15;

/// Row sums of a matrix
///
/// ### Params
///
/// * `mat` - The matrix for which to calculate the row-wise sums
///
/// ### Returns
///
/// Vector of the row sums.
pub fn row_sums(mat: MatRef<f64>) -> Vec<f64> {
    let mut sums = vec![0.0; mat.nrows()];
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            sums[i] += mat[(i, j)];
        }
    }

    sums
}

/// Pearson correlation between two slices
///
/// Degenerate inputs (constant slices) yield 0 rather than NaN.
///
/// ### Params
///
/// * `x` - The first slice.
/// * `y` - The second slice, same length.
///
/// ### Returns
///
/// The correlation coefficient.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    assert_same_len!(x, y);

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= 0.0 {
        return 0.0;
    }

    cov / denom
}

/// Mean per-factor Pearson correlation between two factor matrices
///
/// Factors are compared row-by-row in retained position; this is the
/// correlation underlying the alternating-update stopping rule.
///
/// ### Params
///
/// * `a` - The current factor matrix (factors x features).
/// * `b` - The previous factor matrix, same dimensions.
///
/// ### Returns
///
/// The mean correlation across factors.
pub fn mean_factor_cor(a: MatRef<f64>, b: MatRef<f64>) -> f64 {
    assert_same_dims!(a, b);

    let k = a.nrows();
    let m = a.ncols();

    let mut total = 0.0;
    let mut row_a = vec![0.0; m];
    let mut row_b = vec![0.0; m];
    for i in 0..k {
        for j in 0..m {
            row_a[j] = a[(i, j)];
            row_b[j] = b[(i, j)];
        }
        total += pearson(&row_a, &row_b);
    }

    total / k as f64
}

///////////
// Tests //
///////////
