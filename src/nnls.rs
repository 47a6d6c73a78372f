use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};

use crate::assert_same_len;
use crate::error::NmfError;
use crate::linalg::TINY;

// shared coordinate-descent limits, also used by the projection engine
pub(crate) const CD_MAXIT: usize = 100;
pub(crate) const CD_TOL: f64 = 1e-8;

//////////////////////////
// Parameter structures //
//////////////////////////

/// Parameters for the non-negative least squares solver
///
/// ### Fields
///
/// * `cd_maxit` - Maximum number of coordinate descent sweeps per column.
/// * `cd_tol` - Stopping criterion, mean relative change in `x` per sweep.
/// * `fast_nnls` - Initialize coordinate descent with a forward active set
///   tuning (FAST) approximation. `a` must be symmetric positive definite
///   for this path; that is not checked.
/// * `l1` - L1/LASSO penalty subtracted from `b` up front. No scaling is
///   applied here; normalize factor rows to unit sum so that `l1 = 1`
///   corresponds to a fully sparse solution.
#[derive(Debug, Clone)]
pub struct NnlsParams {
    pub cd_maxit: usize,
    pub cd_tol: f64,
    pub fast_nnls: bool,
    pub l1: f64,
}

impl Default for NnlsParams {
    fn default() -> Self {
        Self {
            cd_maxit: CD_MAXIT,
            cd_tol: CD_TOL,
            fast_nnls: false,
            l1: 0.0,
        }
    }
}

///////////////
// Algorithm //
///////////////

/// Non-negative least squares
///
/// Solves `a * x = b` for `x` subject to `x >= 0`, one column of `b` at a
/// time. Coordinate descent is the work horse; with `fast_nnls` each
/// column is first approximated by unconstrained least squares on an
/// iteratively reduced feasible set, which sets coordinate descent up for
/// very rapid convergence on well-conditioned systems.
///
/// Non-convergence is not an error; the last iterate is returned.
///
/// ### Params
///
/// * `a` - Symmetric positive semi-definite coefficient matrix.
/// * `b` - Right-hand side(s), one column per system.
/// * `params` - Solver parameters, see `NnlsParams`.
///
/// ### Returns
///
/// The solution matrix with the shape of `b`.
pub fn nnls(a: MatRef<f64>, b: MatRef<f64>, params: &NnlsParams) -> Result<Mat<f64>, NmfError> {
    if a.nrows() != a.ncols() {
        return Err(NmfError::NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols(),
        });
    }
    if a.nrows() != b.nrows() {
        return Err(NmfError::DimensionMismatch(format!(
            "'a' has {} rows but 'b' has {}",
            a.nrows(),
            b.nrows()
        )));
    }

    let m = a.nrows();
    let n = b.ncols();

    // one factorization shared across all right-hand sides
    let a_llt = if params.fast_nnls {
        Llt::new(a, Side::Lower).ok()
    } else {
        None
    };

    let mut x = Mat::zeros(m, n);
    let mut b_col = vec![0.0; m];
    let mut x_col = vec![0.0; m];

    for col in 0..n {
        for i in 0..m {
            b_col[i] = b[(i, col)] - params.l1;
            x_col[i] = 0.0;
        }

        if let Some(llt) = &a_llt {
            fast_active_set(a, llt, &mut b_col, &mut x_col);
        }
        if params.cd_maxit > 0 {
            coordinate_descent(a, &mut b_col, &mut x_col, true, params.cd_maxit, params.cd_tol);
        }

        for i in 0..m {
            x[(i, col)] = x_col[i];
        }
    }

    Ok(x)
}

/// Forward active set tuning for one column
///
/// Starts from the unconstrained solution and repeatedly re-solves the
/// principal sub-system restricted to the strictly positive ("feasible")
/// indices until that solution is non-negative or the feasible set is
/// empty. The feasible set never grows, so the loop runs at most `m`
/// times. On return `b` holds the residual gradient `b - a * x`, ready
/// for coordinate descent refinement.
fn fast_active_set(a: MatRef<f64>, a_llt: &Llt<f64>, b: &mut [f64], x: &mut [f64]) {
    let m = b.len();

    let rhs = Mat::from_fn(m, 1, |i, _| b[i]);
    let x0 = a_llt.solve(&rhs);
    for i in 0..m {
        x[i] = x0[(i, 0)];
    }

    while x.iter().any(|&v| v < 0.0) {
        let feasible: Vec<usize> = (0..m).filter(|&i| x[i] > 0.0).collect();
        for v in x.iter_mut() {
            *v = 0.0;
        }
        if feasible.is_empty() {
            break;
        }

        let a_sub = Mat::from_fn(feasible.len(), feasible.len(), |i, j| {
            a[(feasible[i], feasible[j])]
        });
        let b_sub = Mat::from_fn(feasible.len(), 1, |i, _| b[feasible[i]]);

        // a non-SPD sub-system ends the reduction; coordinate descent
        // takes over from the current iterate
        let llt_sub = match Llt::new(a_sub.as_ref(), Side::Lower) {
            Ok(f) => f,
            Err(_) => break,
        };
        let x_sub = llt_sub.solve(&b_sub);
        for (i, &fi) in feasible.iter().enumerate() {
            x[fi] = x_sub[(i, 0)];
        }
    }

    for i in 0..m {
        let mut ax = 0.0;
        for l in 0..m {
            ax += a[(i, l)] * x[l];
        }
        b[i] -= ax;
    }
}

/// Sequential coordinate descent on one column
///
/// `b` must hold the gradient for the current `x` (for a zero-initialized
/// `x` that is the plain right-hand side) and is consumed. With `nonneg`,
/// coordinates that would cross zero are clamped and their contribution
/// restored to the gradient.
pub(crate) fn coordinate_descent(
    a: MatRef<f64>,
    b: &mut [f64],
    x: &mut [f64],
    nonneg: bool,
    cd_maxit: usize,
    cd_tol: f64,
) {
    assert_same_len!(b, x);

    let m = b.len();
    let mut tol = 1.0;
    let mut it = 0;

    while it < cd_maxit && (tol / m as f64) > cd_tol {
        tol = 0.0;
        for i in 0..m {
            let diff = b[i] / a[(i, i)];
            if nonneg && -diff > x[i] {
                if x[i] != 0.0 {
                    for (l, b_l) in b.iter_mut().enumerate() {
                        *b_l += a[(l, i)] * x[i];
                    }
                    tol = 1.0;
                    x[i] = 0.0;
                }
            } else if diff != 0.0 {
                x[i] += diff;
                for (l, b_l) in b.iter_mut().enumerate() {
                    *b_l -= a[(l, i)] * diff;
                }
                tol += (diff / (x[i] + TINY)).abs();
            }
        }
        it += 1;
    }
}

///////////
// Tests //
///////////
