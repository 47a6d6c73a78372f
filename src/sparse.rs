use faer::{Mat, MatRef};

////////////////
// Structures //
////////////////

/// Compressed-column sparse matrix
///
/// Read-only throughout factorization. Within each column the row indices
/// are strictly increasing, and `col_ptrs` is monotone non-decreasing with
/// length `ncol + 1`.
///
/// ### Fields
///
/// * `data` - Vector with the non-zero values.
/// * `row_indices` - The row indices of the values.
/// * `col_ptrs` - The column pointers into `data` / `row_indices`.
/// * `ncol` - Number of columns.
/// * `nrow` - Number of rows.
#[derive(Debug, Clone)]
pub struct SparseColumnMatrix {
    pub data: Vec<f64>,
    pub row_indices: Vec<usize>,
    pub col_ptrs: Vec<usize>,
    pub ncol: usize,
    pub nrow: usize,
}

impl SparseColumnMatrix {
    /// Generate a new sparse column matrix from pre-computed data
    ///
    /// ### Params
    ///
    /// * `data` - Slice of the non-zero values.
    /// * `row_indices` - Slice of the row indices of the values.
    /// * `col_ptrs` - Slice of the column pointers.
    /// * `ncol` - Number of columns.
    /// * `nrow` - Number of rows.
    pub fn new(
        data: &[f64],
        row_indices: &[usize],
        col_ptrs: &[usize],
        ncol: usize,
        nrow: usize,
    ) -> Self {
        debug_assert_eq!(col_ptrs.len(), ncol + 1);
        debug_assert_eq!(data.len(), row_indices.len());

        Self {
            data: data.to_vec(),
            row_indices: row_indices.to_vec(),
            col_ptrs: col_ptrs.to_vec(),
            ncol,
            nrow,
        }
    }

    /// Convert a faer dense matrix to sparse column format
    ///
    /// ### Params
    ///
    /// * `dense` - The original dense matrix.
    pub fn from_dense_matrix(dense: MatRef<f64>) -> Self {
        let ncol = dense.ncols();
        let nrow = dense.nrows();

        let mut values = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(ncol + 1);

        col_ptrs.push(0_usize);

        for col in 0..ncol {
            for row in 0..nrow {
                let value = dense[(row, col)];
                if value != 0.0 {
                    values.push(value);
                    row_indices.push(row);
                }
            }
            col_ptrs.push(values.len());
        }

        Self {
            data: values,
            row_indices,
            col_ptrs,
            ncol,
            nrow,
        }
    }

    /// To a dense faer matrix
    ///
    /// ### Returns
    ///
    /// Returns a dense faer matrix.
    pub fn to_dense_matrix(&self) -> Mat<f64> {
        let mut dense = Mat::zeros(self.nrow, self.ncol);

        for col in 0..self.ncol {
            for idx in self.col_ptrs[col]..self.col_ptrs[col + 1] {
                dense[(self.row_indices[idx], col)] = self.data[idx];
            }
        }

        dense
    }

    /// Return the number of non-zero values
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Iterate over the stored entries of one column
    ///
    /// ### Params
    ///
    /// * `j` - The column index.
    ///
    /// ### Returns
    ///
    /// An iterator over `(row, value)` pairs in increasing row order.
    pub fn col(&self, j: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.col_ptrs[j];
        let end = self.col_ptrs[j + 1];

        self.row_indices[start..end]
            .iter()
            .copied()
            .zip(self.data[start..end].iter().copied())
    }

    /// Number of stored entries in one column
    pub fn col_nnz(&self, j: usize) -> usize {
        self.col_ptrs[j + 1] - self.col_ptrs[j]
    }

    /// Transpose into a new sparse column matrix
    ///
    /// Counting-sort transpose; entries of each transposed column come out
    /// in increasing row order, preserving the container invariants.
    ///
    /// ### Returns
    ///
    /// The transposed matrix.
    pub fn transposed(&self) -> Self {
        let nnz = self.nnz();

        let mut col_ptrs = vec![0_usize; self.nrow + 1];
        for &row in &self.row_indices {
            col_ptrs[row + 1] += 1;
        }
        for i in 0..self.nrow {
            col_ptrs[i + 1] += col_ptrs[i];
        }

        let mut next = col_ptrs.clone();
        let mut data = vec![0.0; nnz];
        let mut row_indices = vec![0_usize; nnz];

        for col in 0..self.ncol {
            for idx in self.col_ptrs[col]..self.col_ptrs[col + 1] {
                let row = self.row_indices[idx];
                let pos = next[row];
                next[row] += 1;
                row_indices[pos] = col;
                data[pos] = self.data[idx];
            }
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            ncol: self.nrow,
            nrow: self.ncol,
        }
    }

    /// Cheap symmetry probe
    ///
    /// Compares the first column against the first row, which is how the
    /// alternating updates decide whether the transposed update can reuse
    /// the matrix itself.
    ///
    /// ### Returns
    ///
    /// `true` when the matrix is square and the probe passes.
    pub fn is_symmetric(&self) -> bool {
        if self.nrow != self.ncol {
            return false;
        }

        let mut col0 = vec![0.0; self.nrow];
        for (row, value) in self.col(0) {
            col0[row] = value;
        }

        // first stored entry of each column is in row 0 if present
        let mut row0 = vec![0.0; self.ncol];
        for j in 0..self.ncol {
            let start = self.col_ptrs[j];
            if start < self.col_ptrs[j + 1] && self.row_indices[start] == 0 {
                row0[j] = self.data[start];
            }
        }

        col0 == row0
    }
}

////////////////
// Input view //
////////////////

/// Tagged view over the matrix being factorized
///
/// The projection engine and the loss evaluator pick sparse or dense
/// kernels per variant; the sparse form is the fast path.
#[derive(Clone, Copy)]
pub enum MatrixView<'a> {
    Sparse(&'a SparseColumnMatrix),
    Dense(MatRef<'a, f64>),
}

impl<'a> MatrixView<'a> {
    pub fn nrows(&self) -> usize {
        match self {
            MatrixView::Sparse(s) => s.nrow,
            MatrixView::Dense(d) => d.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            MatrixView::Sparse(s) => s.ncol,
            MatrixView::Dense(d) => d.ncols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, MatrixView::Sparse(_))
    }

    /// Symmetry probe across both storage forms
    pub fn is_symmetric(&self) -> bool {
        match self {
            MatrixView::Sparse(s) => s.is_symmetric(),
            MatrixView::Dense(d) => {
                d.nrows() == d.ncols() && (0..d.nrows()).all(|i| d[(i, 0)] == d[(0, i)])
            }
        }
    }
}

impl<'a> From<&'a SparseColumnMatrix> for MatrixView<'a> {
    fn from(s: &'a SparseColumnMatrix) -> Self {
        MatrixView::Sparse(s)
    }
}

impl<'a> From<MatRef<'a, f64>> for MatrixView<'a> {
    fn from(d: MatRef<'a, f64>) -> Self {
        MatrixView::Dense(d)
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_dense_to_sparse_conversion() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        assert_eq!(sparse.nrow, 3);
        assert_eq!(sparse.ncol, 3);
        assert_eq!(sparse.nnz(), 5);
        assert_eq!(sparse.data, vec![1.0, 4.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_dense_to_sparse_to_dense_conversion() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());
        let redense = sparse.to_dense_matrix();

        assert_eq!(dense, redense);
    }

    #[test]
    fn test_column_iterator() {
        let dense = mat![[1.0, 0.0], [0.0, 2.0], [4.0, 0.0]];
        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let col0: Vec<(usize, f64)> = sparse.col(0).collect();
        let col1: Vec<(usize, f64)> = sparse.col(1).collect();

        assert_eq!(col0, vec![(0, 1.0), (2, 4.0)]);
        assert_eq!(col1, vec![(1, 2.0)]);
        assert_eq!(sparse.col_nnz(0), 2);
    }

    #[test]
    fn test_transpose_round_trip() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0], [0.0, 6.0, 0.0]];
        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        let transposed = sparse.transposed();

        assert_eq!(transposed.nrow, 3);
        assert_eq!(transposed.ncol, 4);
        assert_eq!(transposed.to_dense_matrix(), dense.transpose().to_owned());
        assert_eq!(transposed.transposed().to_dense_matrix(), dense);
    }

    #[test]
    fn test_symmetry_probe() {
        let sym = mat![[2.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 1.0]];
        let asym = mat![[2.0, 1.0, 0.0], [0.0, 3.0, 0.5], [0.0, 0.5, 1.0]];

        assert!(SparseColumnMatrix::from_dense_matrix(sym.as_ref()).is_symmetric());
        assert!(!SparseColumnMatrix::from_dense_matrix(asym.as_ref()).is_symmetric());

        assert!(MatrixView::Dense(sym.as_ref()).is_symmetric());
        assert!(!MatrixView::Dense(asym.as_ref()).is_symmetric());
    }
}
