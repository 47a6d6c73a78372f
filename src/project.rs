use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};
use rayon::iter::*;

use crate::error::NmfError;
use crate::nnls::{coordinate_descent, CD_MAXIT, CD_TOL};
use crate::sparse::{MatrixView, SparseColumnMatrix};
use crate::threads;

//////////////////////////
// Parameter structures //
//////////////////////////

/// Parameters for linear model projection
///
/// ### Fields
///
/// * `nonneg` - Enforce non-negativity of the projected factor.
/// * `l1` - L1/LASSO penalty subtracted from the right-hand sides. No
///   scaling is performed; normalize the fixed factor's rows to unit sum
///   so that `l1 = 1` corresponds to a fully sparse solution.
/// * `mask_zeros` - Treat zeros in a sparse input as missing values.
///   Only supported when projecting `h` from `w`.
#[derive(Debug, Clone)]
pub struct ProjectParams {
    pub nonneg: bool,
    pub l1: f64,
    pub mask_zeros: bool,
}

impl Default for ProjectParams {
    fn default() -> Self {
        Self {
            nonneg: true,
            l1: 0.0,
            mask_zeros: false,
        }
    }
}

////////////////
// Projection //
////////////////

/// Project a linear factor model
///
/// Solves `A = w * h` for the factor that was not supplied:
///
/// * Given `w`, each column `h[:, j]` solves `(w * w^T) x = w * A[:, j]`,
///   parallelized across columns.
/// * Given `h`, the right-hand sides are accumulated feature-by-feature
///   without materializing the transpose of `A`, then each feature row of
///   `w` is solved against `h * h^T`.
///
/// Factor matrices are auto-transposed when the orientation is
/// unambiguous. The projected `h` comes back as factors x samples, the
/// projected `w` as factors x features.
///
/// ### Params
///
/// * `a` - The matrix being factorized (sparse or dense view).
/// * `w` - Feature factor matrix, if projecting `h`.
/// * `h` - Sample factor matrix, if projecting `w`.
/// * `params` - Projection parameters, see `ProjectParams`.
///
/// ### Returns
///
/// The projected factor matrix.
pub fn project(
    a: MatrixView,
    w: Option<MatRef<f64>>,
    h: Option<MatRef<f64>>,
    params: &ProjectParams,
) -> Result<Mat<f64>, NmfError> {
    match (w, h) {
        (Some(_), Some(_)) | (None, None) => Err(NmfError::BothOrNeitherFactor),
        (Some(w), None) => {
            if params.mask_zeros && !a.is_sparse() {
                return Err(NmfError::MaskZerosDense);
            }

            let w = orient_factor(w, a.nrows(), a.nrows() != a.ncols());
            if w.ncols() != a.nrows() {
                return Err(NmfError::DimensionMismatch(format!(
                    "'A' has {} rows but 'w' spans {} features",
                    a.nrows(),
                    w.ncols()
                )));
            }

            let mut h_new = Mat::zeros(w.nrows(), a.ncols());
            match (params.mask_zeros, a) {
                (true, MatrixView::Sparse(s)) => {
                    update_h_masked(s, w.as_ref(), &mut h_new, params.nonneg, params.l1)
                }
                _ => update_h(a, w.as_ref(), &mut h_new, params.nonneg, params.l1),
            }
            Ok(h_new)
        }
        (None, Some(h)) => {
            if params.mask_zeros {
                return Err(NmfError::MaskZerosInPlace);
            }

            let h = orient_factor(h, a.ncols(), a.nrows() != a.ncols());
            if h.ncols() != a.ncols() {
                return Err(NmfError::DimensionMismatch(format!(
                    "'A' has {} columns but 'h' spans {} samples",
                    a.ncols(),
                    h.ncols()
                )));
            }

            let mut w_new = Mat::zeros(h.nrows(), a.nrows());
            update_w(a, h.as_ref(), &mut w_new, params.nonneg, params.l1);
            Ok(w_new)
        }
    }
}

// factor matrices may arrive features x factors (or samples x factors);
// flip them when the extent match makes the intent unambiguous
fn orient_factor(f: MatRef<f64>, extent: usize, disambiguate: bool) -> Mat<f64> {
    if f.nrows() == extent && disambiguate {
        f.transpose().to_owned()
    } else {
        f.to_owned()
    }
}

/////////////
// Kernels //
/////////////

/// Update `h` (factors x samples) from a fixed `w` (factors x features)
///
/// The Gram matrix is formed once on a single thread; columns are then
/// solved independently. Parallel evaluation only pays off from rank 3
/// upward, ranks 1 and 2 run serially through the direct solvers.
pub(crate) fn update_h(a: MatrixView, w: MatRef<f64>, h: &mut Mat<f64>, nonneg: bool, l1: f64) {
    let k = w.nrows();
    debug_assert_eq!(w.ncols(), a.nrows());
    debug_assert_eq!(h.ncols(), a.ncols());

    let gram = w * w.transpose();
    let llt = if nonneg {
        None
    } else {
        Llt::new(gram.as_ref(), Side::Lower).ok()
    };
    let det = pair_determinant(gram.as_ref());

    let solve_col = |(j, mut h_j): (usize, faer::ColMut<f64>)| {
        let mut b = vec![0.0; k];
        gather_rhs(a, w, j, &mut b);
        if l1 != 0.0 {
            for v in b.iter_mut() {
                *v -= l1;
            }
        }

        let mut x = vec![0.0; k];
        solve_system(gram.as_ref(), llt.as_ref(), det, &mut b, &mut x, nonneg);
        for i in 0..k {
            h_j[i] = x[i];
        }
    };

    if k > 2 {
        threads::scoped(|| {
            h.par_col_iter_mut()
                .enumerate()
                .for_each(|item| solve_col(item))
        });
    } else {
        h.col_iter_mut().enumerate().for_each(|item| solve_col(item));
    }
}

/// Zero-masked update of `h` from a fixed `w`
///
/// Zeros in `A` are treated as missing: both the Gram matrix and the
/// right-hand side of each column are restricted to the column's stored
/// support, so the Gram matrix is re-computed per column. Columns without
/// support have nothing to fit and stay zero.
pub(crate) fn update_h_masked(
    s: &SparseColumnMatrix,
    w: MatRef<f64>,
    h: &mut Mat<f64>,
    nonneg: bool,
    l1: f64,
) {
    let k = w.nrows();
    debug_assert_eq!(w.ncols(), s.nrow);
    debug_assert_eq!(h.ncols(), s.ncol);

    let solve_col = |(j, mut h_j): (usize, faer::ColMut<f64>)| {
        if s.col_nnz(j) == 0 {
            for i in 0..k {
                h_j[i] = 0.0;
            }
            return;
        }

        let mut gram = Mat::zeros(k, k);
        let mut b = vec![0.0; k];
        for (row, val) in s.col(j) {
            for p in 0..k {
                let w_p = w[(p, row)];
                b[p] += val * w_p;
                for q in p..k {
                    gram[(p, q)] += w_p * w[(q, row)];
                }
            }
        }
        for p in 1..k {
            for q in 0..p {
                gram[(p, q)] = gram[(q, p)];
            }
        }
        if l1 != 0.0 {
            for v in b.iter_mut() {
                *v -= l1;
            }
        }

        // the reduced system differs per column, so the shared-Gram rank
        // specializations do not apply here
        let mut x = vec![0.0; k];
        if nonneg {
            coordinate_descent(gram.as_ref(), &mut b, &mut x, true, CD_MAXIT, CD_TOL);
        } else {
            match Llt::new(gram.as_ref(), Side::Lower) {
                Ok(llt) => {
                    let rhs = Mat::from_fn(k, 1, |i, _| b[i]);
                    let sol = llt.solve(&rhs);
                    for i in 0..k {
                        x[i] = sol[(i, 0)];
                    }
                }
                Err(_) => coordinate_descent(gram.as_ref(), &mut b, &mut x, false, CD_MAXIT, CD_TOL),
            }
        }
        for i in 0..k {
            h_j[i] = x[i];
        }
    };

    if k > 2 {
        threads::scoped(|| {
            h.par_col_iter_mut()
                .enumerate()
                .for_each(|item| solve_col(item))
        });
    } else {
        h.col_iter_mut().enumerate().for_each(|item| solve_col(item));
    }
}

/// Update `w` (factors x features) from a fixed `h` (factors x samples)
/// without materializing the transpose of `A`
///
/// Right-hand sides for all features are accumulated in a single pass
/// over the columns of `A`, then each feature is solved independently
/// against `h * h^T`.
pub(crate) fn update_w(a: MatrixView, h: MatRef<f64>, w: &mut Mat<f64>, nonneg: bool, l1: f64) {
    let k = h.nrows();
    let m = w.ncols();
    debug_assert_eq!(h.ncols(), a.ncols());
    debug_assert_eq!(m, a.nrows());

    let gram = h * h.transpose();
    let llt = if nonneg {
        None
    } else {
        Llt::new(gram.as_ref(), Side::Lower).ok()
    };
    let det = pair_determinant(gram.as_ref());

    let mut buf = Mat::<f64>::zeros(k, m);
    match a {
        MatrixView::Sparse(s) => {
            for j in 0..s.ncol {
                for (row, val) in s.col(j) {
                    for l in 0..k {
                        buf[(l, row)] += val * h[(l, j)];
                    }
                }
            }
        }
        MatrixView::Dense(d) => {
            for j in 0..d.ncols() {
                for i in 0..d.nrows() {
                    let val = d[(i, j)];
                    if val != 0.0 {
                        for l in 0..k {
                            buf[(l, i)] += val * h[(l, j)];
                        }
                    }
                }
            }
        }
    }

    let buf = buf.as_ref();
    let solve_col = |(i, mut w_i): (usize, faer::ColMut<f64>)| {
        let mut b: Vec<f64> = (0..k).map(|l| buf[(l, i)] - l1).collect();
        let mut x = vec![0.0; k];
        solve_system(gram.as_ref(), llt.as_ref(), det, &mut b, &mut x, nonneg);
        for l in 0..k {
            w_i[l] = x[l];
        }
    };

    if k > 2 {
        threads::scoped(|| {
            w.par_col_iter_mut()
                .enumerate()
                .for_each(|item| solve_col(item))
        });
    } else {
        w.col_iter_mut().enumerate().for_each(|item| solve_col(item));
    }
}

// b = w * A[:, j], gathered from the stored entries of column j
fn gather_rhs(a: MatrixView, w: MatRef<f64>, j: usize, b: &mut [f64]) {
    let k = w.nrows();
    for v in b.iter_mut() {
        *v = 0.0;
    }

    match a {
        MatrixView::Sparse(s) => {
            for (row, val) in s.col(j) {
                for l in 0..k {
                    b[l] += val * w[(l, row)];
                }
            }
        }
        MatrixView::Dense(d) => {
            for i in 0..d.nrows() {
                let val = d[(i, j)];
                if val != 0.0 {
                    for l in 0..k {
                        b[l] += val * w[(l, i)];
                    }
                }
            }
        }
    }
}

// the 2x2 determinant is constant across all right-hand sides of a
// half-update, so it is computed once per batch
fn pair_determinant(gram: MatRef<f64>) -> f64 {
    if gram.nrows() == 2 {
        gram[(0, 0)] * gram[(1, 1)] - gram[(0, 1)] * gram[(0, 1)]
    } else {
        0.0
    }
}

// one right-hand side against the shared Gram matrix: direct substitution
// for ranks 1 and 2, Cholesky when unconstrained, coordinate descent
// otherwise
fn solve_system(
    gram: MatRef<f64>,
    llt: Option<&Llt<f64>>,
    det: f64,
    b: &mut [f64],
    x: &mut [f64],
    nonneg: bool,
) {
    match b.len() {
        1 => {
            let mut v = b[0] / gram[(0, 0)];
            if nonneg && v < 0.0 {
                v = 0.0;
            }
            x[0] = v;
        }
        2 => {
            let a11 = gram[(0, 0)];
            let a12 = gram[(0, 1)];
            let a22 = gram[(1, 1)];

            let mut x1 = (a22 * b[0] - a12 * b[1]) / det;
            let mut x2 = (a11 * b[1] - a12 * b[0]) / det;
            if nonneg {
                if x1 < 0.0 {
                    x1 = 0.0;
                    x2 = b[1] / a22;
                    if x2 < 0.0 {
                        x2 = 0.0;
                    }
                } else if x2 < 0.0 {
                    x2 = 0.0;
                    x1 = b[0] / a11;
                    if x1 < 0.0 {
                        x1 = 0.0;
                    }
                }
            }
            x[0] = x1;
            x[1] = x2;
        }
        k => {
            if let Some(llt) = llt {
                let rhs = Mat::from_fn(k, 1, |i, _| b[i]);
                let sol = llt.solve(&rhs);
                for i in 0..k {
                    x[i] = sol[(i, 0)];
                }
            } else {
                coordinate_descent(gram, b, x, nonneg, CD_MAXIT, CD_TOL);
            }
        }
    }
}

///////////
// Tests //
///////////
