//! Background-grid cell shapes.
//!
//! Cells of the structured grid are linear Lagrange elements: a 4-node
//! quadrilateral in 2D and an 8-node hexahedron in 3D. Shape functions are
//! evaluated in natural coordinates ξ ∈ [-1, 1]^dim.
//!
//! # Node Numbering
//!
//! ```text
//!   Quad4            Hex8
//!                       7-------6
//!   3-------2          /|      /|
//!   |       |         4-------5 |
//!   |       |         | 3-----|-2
//!   0-------1         |/      |/
//!                     0-------1
//! ```

use crate::error::{Error, Result};
use nalgebra::DMatrix;

/// Natural coordinates of each corner node.
const XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

/// Supported cell types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// 4-node bilinear quadrilateral.
    Quad4,
    /// 8-node trilinear hexahedron.
    Hex8,
}

impl CellType {
    /// Cell type for a spatial dimension.
    pub fn for_dimension(dim: usize) -> Result<Self> {
        match dim {
            2 => Ok(CellType::Quad4),
            3 => Ok(CellType::Hex8),
            _ => Err(Error::Mesh(format!("unsupported dimension {dim}"))),
        }
    }

    pub fn n_nodes(self) -> usize {
        match self {
            CellType::Quad4 => 4,
            CellType::Hex8 => 8,
        }
    }

    pub fn dimension(self) -> usize {
        match self {
            CellType::Quad4 => 2,
            CellType::Hex8 => 3,
        }
    }

    /// Offsets of each cell corner in grid-index space (0 or 1 per axis).
    pub fn corner_offsets(self) -> Vec<Vec<usize>> {
        let to_offset = |v: f64| usize::from(v > 0.0);
        (0..self.n_nodes())
            .map(|i| match self {
                CellType::Quad4 => vec![to_offset(XI[i]), to_offset(ETA[i])],
                CellType::Hex8 => vec![to_offset(XI[i]), to_offset(ETA[i]), to_offset(ZETA[i])],
            })
            .collect()
    }

    /// Shape functions at natural coordinates `xi`.
    pub fn shape_functions(self, xi: &[f64]) -> Vec<f64> {
        match self {
            CellType::Quad4 => (0..4)
                .map(|i| 0.25 * (1.0 + XI[i] * xi[0]) * (1.0 + ETA[i] * xi[1]))
                .collect(),
            CellType::Hex8 => (0..8)
                .map(|i| {
                    0.125
                        * (1.0 + XI[i] * xi[0])
                        * (1.0 + ETA[i] * xi[1])
                        * (1.0 + ZETA[i] * xi[2])
                })
                .collect(),
        }
    }

    /// Shape function derivatives with respect to natural coordinates.
    ///
    /// Row `i` holds ∂N_i/∂ξ.
    pub fn natural_gradients(self, xi: &[f64]) -> DMatrix<f64> {
        match self {
            CellType::Quad4 => DMatrix::from_fn(4, 2, |i, a| match a {
                0 => 0.25 * XI[i] * (1.0 + ETA[i] * xi[1]),
                _ => 0.25 * ETA[i] * (1.0 + XI[i] * xi[0]),
            }),
            CellType::Hex8 => DMatrix::from_fn(8, 3, |i, a| {
                let (x, e, z) = (
                    1.0 + XI[i] * xi[0],
                    1.0 + ETA[i] * xi[1],
                    1.0 + ZETA[i] * xi[2],
                );
                match a {
                    0 => 0.125 * XI[i] * e * z,
                    1 => 0.125 * ETA[i] * x * z,
                    _ => 0.125 * ZETA[i] * x * e,
                }
            }),
        }
    }

    /// Physical gradients for an axis-aligned cell with edge lengths `spacing`.
    ///
    /// The Jacobian is diagonal with entries `spacing / 2`.
    pub fn physical_gradients(self, xi: &[f64], spacing: &[f64]) -> DMatrix<f64> {
        let mut grad = self.natural_gradients(xi);
        for (a, h) in spacing.iter().enumerate().take(self.dimension()) {
            grad.column_mut(a).scale_mut(2.0 / h);
        }
        grad
    }
}
