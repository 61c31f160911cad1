//! Sparse system builders.
//!
//! Nodal matrices are collected as `(row, col, value)` triplets, possibly
//! several per entry, and compressed to CSR once every particle has
//! contributed.

use crate::error::{Error, Result};
use nalgebra::DMatrix;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// One contribution to a matrix entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// Unordered matrix contributions; repeated entries add up on compression.
#[derive(Debug, Clone)]
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    entries: Vec<Triplet>,
}

impl TripletMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self::with_capacity(n_rows, n_cols, 0)
    }

    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            entries: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Exact zeros are not stored.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows && col < self.n_cols);
        if value != 0.0 {
            self.entries.push(Triplet { row, col, value });
        }
    }

    /// Scatter the square `block` to `indices × indices`.
    pub fn add_submatrix(&mut self, indices: &[usize], block: &DMatrix<f64>) {
        debug_assert_eq!(block.shape(), (indices.len(), indices.len()));
        for (i, &row) in indices.iter().enumerate() {
            for (j, &col) in indices.iter().enumerate() {
                self.add(row, col, block[(i, j)]);
            }
        }
    }

    pub fn try_to_csr(&self) -> Result<CsrMatrix> {
        let (rows, (cols, values)): (Vec<usize>, (Vec<usize>, Vec<f64>)) = self
            .entries
            .iter()
            .map(|t| (t.row, (t.col, t.value)))
            .unzip();
        let coo = CooMatrix::try_from_triplets(self.n_rows, self.n_cols, rows, cols, values)
            .map_err(|e| Error::Assembly(format!("invalid triplet data: {e}")))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// Dense right-hand side built by accumulation.
#[derive(Debug, Clone)]
pub struct DenseAccumulator {
    values: Vec<f64>,
}

impl DenseAccumulator {
    pub fn zeros(size: usize) -> Self {
        Self {
            values: vec![0.0; size],
        }
    }

    pub fn add(&mut self, index: usize, value: f64) {
        self.values[index] += value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }
}
