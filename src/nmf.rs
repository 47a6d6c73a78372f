use faer::Mat;
use rand::prelude::*;
use rand_distr::{Distribution, Uniform};

use crate::error::NmfError;
use crate::linalg::{mean_factor_cor, row_sums, TINY};
use crate::project::{update_h, update_h_masked, update_w};
use crate::sparse::{MatrixView, SparseColumnMatrix};

////////////////////////
// Params and results //
////////////////////////

/// Parameters for matrix factorization by alternating least squares
///
/// ### Fields
///
/// * `k` - Rank of the factorization.
/// * `tol` - Stopping criterion, `1 - cor(w_i, w_{i-1})`, the mean
///   correlation distance between factors across consecutive iterations.
///   Factors are compared in retained position; no matching across
///   iterations is performed, so a factor swap can inflate the tolerance
///   for one iteration.
/// * `maxit` - Stopping criterion, maximum number of alternating updates.
/// * `verbose` - Print the tolerance after each iteration to stderr.
/// * `nonneg` - Enforce non-negativity of `w` and `h`.
/// * `l1` - L1/LASSO penalties in `[0, 1)` for `(w, h)`. The scaling
///   diagonal normalizes factors to unit row sums, which makes the
///   penalty act uniformly across factors and lets `1` correspond to a
///   fully sparse solution.
/// * `seed` - Seed for the random initialization of `w`; `None` uses 0.
/// * `diag` - Scale factor rows to sum to 1 through the diagonal `d`.
///   Enables symmetry of models on symmetric inputs, convex L1
///   regularization, and consistent factor scalings. Generally leave on.
/// * `update_in_place` - Update `w` without materializing the transpose
///   of a sparse input; slower per iteration, half the memory. Dense
///   inputs always use a (free) transposed view instead.
/// * `mask_zeros` - Treat zeros as missing values. Requires sparse input
///   and the transposed update path.
#[derive(Debug, Clone)]
pub struct NmfParams {
    pub k: usize,
    pub tol: f64,
    pub maxit: usize,
    pub verbose: bool,
    pub nonneg: bool,
    pub l1: (f64, f64),
    pub seed: Option<u64>,
    pub diag: bool,
    pub update_in_place: bool,
    pub mask_zeros: bool,
}

impl NmfParams {
    /// Default parameters for a rank-`k` factorization
    pub fn new(k: usize) -> Self {
        Self {
            k,
            tol: 1e-4,
            maxit: 100,
            verbose: true,
            nonneg: true,
            l1: (0.0, 0.0),
            seed: None,
            diag: true,
            update_in_place: false,
            mask_zeros: false,
        }
    }
}

/// A fitted factorization model `A ~ w * diag(d) * h`
///
/// ### Fields
///
/// * `w` - Feature factor matrix, features x k.
/// * `d` - Scaling diagonal of length k.
/// * `h` - Sample factor matrix, k x samples.
/// * `tol` - Tolerance history, one value per completed iteration.
/// * `iter` - Number of completed alternating updates.
#[derive(Debug, Clone)]
pub struct NmfModel {
    pub w: Mat<f64>,
    pub d: Vec<f64>,
    pub h: Mat<f64>,
    pub tol: Vec<f64>,
    pub iter: usize,
}

impl NmfModel {
    /// Mean squared reconstruction error of the model against `a`
    pub fn mse(&self, a: MatrixView, mask_zeros: bool) -> Result<f64, NmfError> {
        crate::mse::mse(a, self.w.as_ref(), &self.d, self.h.as_ref(), mask_zeros)
    }
}

////////////////
// ALS driver //
////////////////

/// Non-negative matrix factorization by alternating least squares
///
/// The model is randomly initialized, then `h` and `w` are updated
/// alternately by least squares against the columns of `A` until the
/// correlation distance between consecutive `w` falls below `tol` or
/// `maxit` is reached. Symmetric inputs are detected with a cheap probe
/// and skip transposition entirely.
#[derive(Debug, Clone)]
pub struct Nmf {
    params: NmfParams,
}

impl Nmf {
    /// Create a new factorization instance
    ///
    /// ### Params
    ///
    /// * `params` - Configuration, see `NmfParams`.
    pub fn new(params: NmfParams) -> Self {
        Self { params }
    }

    /// Fit the model
    ///
    /// ### Params
    ///
    /// * `a` - The matrix to factorize (sparse or dense view), features
    ///   as rows and samples as columns.
    ///
    /// ### Returns
    ///
    /// The fitted `NmfModel`.
    pub fn fit(&self, a: MatrixView) -> Result<NmfModel, NmfError> {
        let p = &self.params;

        if p.k == 0 {
            return Err(NmfError::ZeroRank);
        }
        for l1 in [p.l1.0, p.l1.1] {
            if !(0.0..1.0).contains(&l1) {
                return Err(NmfError::L1OutOfRange(l1));
            }
        }
        if p.mask_zeros && !a.is_sparse() {
            return Err(NmfError::MaskZerosDense);
        }
        if p.mask_zeros && p.update_in_place {
            return Err(NmfError::MaskZerosInPlace);
        }

        let m = a.nrows();
        let n = a.ncols();
        let k = p.k;

        let mut rng = StdRng::seed_from_u64(p.seed.unwrap_or(0));
        let uniform = Uniform::new(0.0, 1.0).unwrap();
        let mut w: Mat<f64> = Mat::from_fn(k, m, |_, _| uniform.sample(&mut rng));
        let mut h: Mat<f64> = Mat::zeros(k, n);
        let mut d = vec![1.0; k];

        // updating w against a symmetric matrix is just the h-update, so
        // neither a transpose nor the in-place pass is needed
        let symmetric = a.is_symmetric();
        let a_t: Option<SparseColumnMatrix> = match a {
            MatrixView::Sparse(s) if !symmetric && !p.update_in_place => Some(s.transposed()),
            _ => None,
        };

        let mut w_prev = w.clone();
        let mut tol_history = Vec::new();
        let mut iter = 0;

        if p.verbose {
            eprintln!("{:>4} | {:>8}", "iter", "tol");
            eprintln!("---------------");
        }

        for it in 1..=p.maxit {
            match (p.mask_zeros, a) {
                (true, MatrixView::Sparse(s)) => {
                    update_h_masked(s, w.as_ref(), &mut h, p.nonneg, p.l1.1)
                }
                _ => update_h(a, w.as_ref(), &mut h, p.nonneg, p.l1.1),
            }
            if p.diag {
                absorb_scale(&mut h, &mut d);
            }

            if symmetric {
                match (p.mask_zeros, a) {
                    (true, MatrixView::Sparse(s)) => {
                        update_h_masked(s, h.as_ref(), &mut w, p.nonneg, p.l1.0)
                    }
                    _ => update_h(a, h.as_ref(), &mut w, p.nonneg, p.l1.0),
                }
            } else if let Some(at) = &a_t {
                if p.mask_zeros {
                    update_h_masked(at, h.as_ref(), &mut w, p.nonneg, p.l1.0);
                } else {
                    update_h(MatrixView::Sparse(at), h.as_ref(), &mut w, p.nonneg, p.l1.0);
                }
            } else if let MatrixView::Dense(dense) = a {
                update_h(
                    MatrixView::Dense(dense.transpose()),
                    h.as_ref(),
                    &mut w,
                    p.nonneg,
                    p.l1.0,
                );
            } else {
                update_w(a, h.as_ref(), &mut w, p.nonneg, p.l1.0);
            }
            if p.diag {
                absorb_scale(&mut w, &mut d);
            }

            let tol_value = 1.0 - mean_factor_cor(w.as_ref(), w_prev.as_ref());
            if p.verbose {
                eprintln!("{:>4} | {:>8.2e}", it, tol_value);
            }
            tol_history.push(tol_value);
            w_prev.copy_from(&w);
            iter = it;

            if tol_value < p.tol {
                break;
            }
        }

        Ok(NmfModel {
            w: w.transpose().to_owned(),
            d,
            h,
            tol: tol_history,
            iter,
        })
    }
}

// pull the row sums of the just-updated factor into d and normalize. The
// solves never consult d, so the factor reappears at full scale each
// half-update and d is overwritten rather than accumulated; the product
// w * diag(d) * h is invariant under this normalization.
fn absorb_scale(mat: &mut Mat<f64>, d: &mut [f64]) {
    debug_assert_eq!(mat.nrows(), d.len());

    let sums = row_sums(mat.as_ref());
    for (i, sum) in sums.into_iter().enumerate() {
        let scale = sum + TINY;
        d[i] = scale;
        for j in 0..mat.ncols() {
            mat[(i, j)] /= scale;
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::pearson;
    use faer::mat;

    fn demo_matrix() -> Mat<f64> {
        // three feature blocks across five samples, rank >= 3
        mat![
            [4.0, 3.5, 0.2, 0.0, 0.1],
            [3.0, 4.2, 0.0, 0.3, 0.0],
            [0.1, 0.0, 5.0, 4.1, 0.2],
            [0.0, 0.2, 3.8, 4.6, 0.0],
            [0.3, 0.0, 0.0, 0.2, 6.0],
            [0.0, 0.1, 0.2, 0.0, 5.5]
        ]
    }

    fn quiet(k: usize) -> NmfParams {
        let mut p = NmfParams::new(k);
        p.verbose = false;
        p
    }

    #[test]
    fn test_seed_reproducibility() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(3);
        params.seed = Some(17);
        params.maxit = 10;
        params.tol = 1e-12;

        let m1 = Nmf::new(params.clone()).fit(MatrixView::Sparse(&a)).unwrap();
        let m2 = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        assert_eq!(m1.w, m2.w);
        assert_eq!(m1.h, m2.h);
        assert_eq!(m1.d, m2.d);
        assert_eq!(m1.iter, m2.iter);
    }

    #[test]
    fn test_nonneg_model_is_nonneg() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(3);
        params.maxit = 10;
        params.tol = 1e-12;
        let model = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        for j in 0..model.w.ncols() {
            for i in 0..model.w.nrows() {
                assert!(model.w[(i, j)] >= 0.0);
            }
        }
        for j in 0..model.h.ncols() {
            for i in 0..model.h.nrows() {
                assert!(model.h[(i, j)] >= 0.0);
            }
        }
        assert!(model.d.iter().all(|&v| v >= 0.0));
        assert_eq!(model.tol.len(), model.iter);
    }

    #[test]
    fn test_unconstrained_model_goes_negative() {
        // after one unconstrained update h = 10 * inverse(w0)^T, and the
        // inverse of a positive 2x2 matrix always carries negatives
        let dense = mat![[10.0, 0.0], [0.0, 10.0]];
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(2);
        params.nonneg = false;
        params.diag = false;
        params.maxit = 1;
        params.tol = 1e-12;
        params.seed = Some(42);
        let model = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        let mut min_h = f64::INFINITY;
        for j in 0..model.h.ncols() {
            for i in 0..model.h.nrows() {
                min_h = min_h.min(model.h[(i, j)]);
            }
        }
        assert!(min_h < 0.0);
    }

    #[test]
    fn test_diag_normalizes_factor_sums() {
        let dense = mat![
            [4.0, 3.5, 0.2, 0.1],
            [3.0, 4.2, 0.3, 0.2],
            [0.1, 0.3, 5.0, 4.1],
            [0.2, 0.1, 3.8, 4.6],
            [1.0, 0.8, 1.1, 0.9]
        ];
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(2);
        params.maxit = 5;
        params.tol = 1e-12;
        let model = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        // returned w is features x k, so factor sums are column sums
        for l in 0..2 {
            let w_sum: f64 = (0..model.w.nrows()).map(|i| model.w[(i, l)]).sum();
            let h_sum: f64 = (0..model.h.ncols()).map(|j| model.h[(l, j)]).sum();
            assert!((w_sum - 1.0).abs() < 1e-10);
            assert!((h_sum - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_more_iterations_do_not_increase_mse() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut short = quiet(3);
        short.maxit = 2;
        short.tol = 1e-15;
        short.seed = Some(7);
        let mut long = short.clone();
        long.maxit = 20;

        let mse_short = Nmf::new(short)
            .fit(MatrixView::Sparse(&a))
            .unwrap()
            .mse(MatrixView::Sparse(&a), false)
            .unwrap();
        let mse_long = Nmf::new(long)
            .fit(MatrixView::Sparse(&a))
            .unwrap()
            .mse(MatrixView::Sparse(&a), false)
            .unwrap();

        assert!(mse_long <= mse_short + 1e-9);
    }

    #[test]
    fn test_l1_increases_sparsity() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut plain = quiet(3);
        plain.maxit = 5;
        plain.tol = 1e-15;
        plain.seed = Some(3);
        let mut penalized = plain.clone();
        penalized.l1 = (0.5, 0.5);

        let zeros = |m: &Mat<f64>| {
            let mut count = 0;
            for j in 0..m.ncols() {
                for i in 0..m.nrows() {
                    if m[(i, j)] == 0.0 {
                        count += 1;
                    }
                }
            }
            count
        };

        let model_plain = Nmf::new(plain).fit(MatrixView::Sparse(&a)).unwrap();
        let model_l1 = Nmf::new(penalized).fit(MatrixView::Sparse(&a)).unwrap();

        assert!(zeros(&model_l1.w) > zeros(&model_plain.w));
    }

    #[test]
    fn test_rank1_is_seed_invariant() {
        let dense = mat![
            [4.0, 2.0, 1.0, 3.0],
            [2.0, 1.1, 0.5, 1.5],
            [6.0, 3.0, 1.6, 4.4],
            [1.0, 0.5, 0.2, 0.8],
            [3.0, 1.4, 0.8, 2.2]
        ];
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(1);
        params.tol = 1e-10;
        params.maxit = 100;

        params.seed = Some(1);
        let m1 = Nmf::new(params.clone()).fit(MatrixView::Sparse(&a)).unwrap();
        params.seed = Some(99);
        let m2 = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        let w1: Vec<f64> = (0..m1.w.nrows()).map(|i| m1.w[(i, 0)]).collect();
        let w2: Vec<f64> = (0..m2.w.nrows()).map(|i| m2.w[(i, 0)]).collect();
        assert!(pearson(&w1, &w2) > 0.999);
    }

    #[test]
    fn test_symmetric_factorization_aligns_w_and_h() {
        let b = mat![
            [1.0, 0.2, 0.1, 0.0],
            [0.3, 1.1, 0.0, 0.2],
            [0.0, 0.1, 1.2, 0.3],
            [0.2, 0.0, 0.4, 0.9]
        ];
        let sym = b.transpose() * &b;
        let a = SparseColumnMatrix::from_dense_matrix(sym.as_ref());
        assert!(a.is_symmetric());

        let mut params = quiet(2);
        params.tol = 1e-10;
        params.maxit = 500;
        params.seed = Some(5);
        let model = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        let mut vw = Vec::new();
        let mut vh = Vec::new();
        for l in 0..2 {
            for i in 0..4 {
                vw.push(model.w[(i, l)]);
                vh.push(model.h[(l, i)]);
            }
        }
        assert!(pearson(&vw, &vh) > 0.8);
    }

    #[test]
    fn test_in_place_update_matches_transposed_path() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(3);
        params.maxit = 5;
        params.tol = 1e-15;
        params.seed = Some(11);
        let transposed = Nmf::new(params.clone()).fit(MatrixView::Sparse(&a)).unwrap();

        params.update_in_place = true;
        let in_place = Nmf::new(params).fit(MatrixView::Sparse(&a)).unwrap();

        assert_eq!(transposed.w, in_place.w);
        assert_eq!(transposed.h, in_place.h);
    }

    #[test]
    fn test_validation() {
        let dense = demo_matrix();
        let a = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let mut params = quiet(0);
        assert!(matches!(
            Nmf::new(params.clone()).fit(MatrixView::Sparse(&a)),
            Err(NmfError::ZeroRank)
        ));

        params.k = 2;
        params.l1 = (1.0, 0.0);
        assert!(matches!(
            Nmf::new(params.clone()).fit(MatrixView::Sparse(&a)),
            Err(NmfError::L1OutOfRange(_))
        ));

        params.l1 = (0.0, 0.0);
        params.mask_zeros = true;
        assert!(matches!(
            Nmf::new(params.clone()).fit(MatrixView::Dense(dense.as_ref())),
            Err(NmfError::MaskZerosDense)
        ));

        params.update_in_place = true;
        assert!(matches!(
            Nmf::new(params).fit(MatrixView::Sparse(&a)),
            Err(NmfError::MaskZerosInPlace)
        ));
    }
}
