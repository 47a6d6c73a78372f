//! High-performance non-negative matrix factorization for large sparse
//! matrices.
//!
//! The crate factorizes a non-negative matrix `A` (features x samples)
//! as `A ~ w * diag(d) * h` by alternating least squares, built on three
//! primitives: a fast NNLS solver (forward active set tuning plus
//! sequential coordinate descent), a column-parallel projection engine
//! with rank-1 and rank-2 specializations, and a mean-squared-error loss
//! evaluator with optional zero-masking.

pub mod error;
pub mod linalg;
pub mod mse;
pub mod nmf;
pub mod nnls;
pub mod project;
pub mod sparse;
pub mod threads;
mod utils;

pub use error::NmfError;
pub use mse::mse;
pub use nmf::{Nmf, NmfModel, NmfParams};
pub use nnls::{nnls, NnlsParams};
pub use project::{project, ProjectParams};
pub use sparse::{MatrixView, SparseColumnMatrix};
pub use threads::{get_threads, set_threads};
