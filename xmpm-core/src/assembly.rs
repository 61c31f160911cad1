//! Parallel particle-to-node assembly.
//!
//! Particle contributions are scattered into nodal buffers (explicit
//! mapping phases) or into a sparse matrix (the consistent mass matrix used
//! by pressure smoothing), using Rayon for shared-memory parallelism.

use crate::error::Result;
use crate::halo::NodalBuffer;
use crate::node::{Node, MASS_TOLERANCE};
use crate::particle::Particle;
use crate::sparse::{CsrMatrix, DenseAccumulator, TripletMatrix};
use nalgebra::DMatrix;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Accumulate per-particle contributions into a fresh buffer.
///
/// Each Rayon task folds into its own buffer; the partial buffers are
/// summed at the end, so `scatter` never sees shared state.
pub fn map_to_nodes<F>(particles: &[Particle], nnodes: usize, width: usize, scatter: F) -> NodalBuffer
where
    F: Fn(&Particle, &mut NodalBuffer) + Send + Sync,
{
    particles
        .par_iter()
        .fold(
            || NodalBuffer::zeros(nnodes, width),
            |mut buffer, particle| {
                scatter(particle, &mut buffer);
                buffer
            },
        )
        .reduce(|| NodalBuffer::zeros(nnodes, width), |a, b| a.merged(&b))
}

/// Locally assembled system with its rank-to-global mapper.
#[derive(Debug, Clone)]
pub struct LocalSystem {
    pub matrix: CsrMatrix,
    pub rhs: Vec<f64>,
    /// Local row index → global DOF index.
    pub mapper: Vec<usize>,
    /// Local row index → mesh node id.
    pub nodes: Vec<usize>,
    pub global_size: usize,
}

/// Global DOF numbering over nodes carrying mass.
///
/// Every rank holds the same merged nodal masses, so every rank derives the
/// same numbering.
pub fn active_dof_numbering(nodes: &[Node]) -> BTreeMap<usize, usize> {
    nodes
        .iter()
        .filter(|node| node.mass() > MASS_TOLERANCE)
        .enumerate()
        .map(|(dof, node)| (node.id(), dof))
        .collect()
}

/// Assemble `M_ij = Σ m_p N_i N_j` and `b_i = Σ m_p N_i q_p` from this rank's
/// particles, where `q_p = value(p)`.
pub fn assemble_consistent_mass<F>(
    particles: &[Particle],
    numbering: &BTreeMap<usize, usize>,
    value: F,
) -> Result<LocalSystem>
where
    F: Fn(&Particle) -> f64 + Send + Sync,
{
    // Local rows: every numbered node touched by an owned particle.
    let mut local: BTreeMap<usize, usize> = BTreeMap::new();
    for particle in particles {
        for node in particle.nodes() {
            if numbering.contains_key(node) {
                let next = local.len();
                local.entry(*node).or_insert(next);
            }
        }
    }
    let nodes: Vec<usize> = {
        let mut by_row = vec![0; local.len()];
        for (&node, &row) in &local {
            by_row[row] = node;
        }
        by_row
    };
    let mapper: Vec<usize> = nodes.iter().map(|node| numbering[node]).collect();
    let size = nodes.len();

    // Estimate non-zeros: a 2D cell couples 4 nodes, a 3D cell 8.
    let nnz_estimate = particles.len() * 64;
    let triplet = Mutex::new(TripletMatrix::with_capacity(size, size, nnz_estimate));
    let rhs = Mutex::new(DenseAccumulator::zeros(size));

    particles.par_iter().for_each(|particle| {
        let rows: Vec<(usize, f64)> = particle
            .nodes()
            .iter()
            .zip(particle.shapefn())
            .filter_map(|(node, n)| local.get(node).map(|row| (*row, *n)))
            .collect();
        let indices: Vec<usize> = rows.iter().map(|(row, _)| *row).collect();
        let block = DMatrix::from_fn(rows.len(), rows.len(), |i, j| {
            particle.mass * rows[i].1 * rows[j].1
        });
        let q = value(particle);

        triplet.lock().add_submatrix(&indices, &block);
        let mut rhs = rhs.lock();
        for (row, n) in &rows {
            rhs.add(*row, particle.mass * n * q);
        }
    });

    Ok(LocalSystem {
        matrix: triplet.into_inner().try_to_csr()?,
        rhs: rhs.into_inner().into_vec(),
        mapper,
        nodes,
        global_size: numbering.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::mesh::{Grid, MeshConfig};
    use crate::types::Vector;
    use approx::assert_relative_eq;

    fn grid() -> Grid {
        Grid::new(&MeshConfig {
            origin: vec![0.0, 0.0],
            spacing: vec![1.0, 1.0],
            ncells: vec![2, 1],
            boundary_conditions: Vec::new(),
        })
        .unwrap()
    }

    fn particles(grid: &Grid, xs: &[(f64, f64)]) -> Vec<Particle> {
        let material = Material::new(0, 1.0e6, 0.2, 1000.0).unwrap();
        xs.iter()
            .enumerate()
            .map(|(id, (x, y))| {
                let mut p = Particle::new(id, 0, Vector::from_vec(vec![*x, *y]), 0.25).unwrap();
                p.assign_material(&material);
                p.assign_cell(grid.locate(&p.coordinates));
                p.compute_shapefn(grid);
                p
            })
            .collect()
    }

    #[test]
    fn test_parallel_mapping_matches_serial_sum() {
        let grid = grid();
        let ps = particles(&grid, &[(0.2, 0.3), (0.7, 0.9), (1.5, 0.5), (1.9, 0.1)]);
        let buffer = map_to_nodes(&ps, grid.nnodes(), 1, |p, buf| {
            for (node, n) in p.nodes().iter().zip(p.shapefn()) {
                buf.add(*node, &[n * p.mass]);
            }
        });
        let total: f64 = buffer.as_slice().iter().sum();
        assert_relative_eq!(total, ps.iter().map(|p| p.mass).sum::<f64>(), epsilon = 1e-9);
    }

    #[test]
    fn test_consistent_mass_row_sums_equal_lumped_mass() {
        let grid = grid();
        let ps = particles(&grid, &[(0.2, 0.3), (0.7, 0.9), (1.5, 0.5)]);
        let mut nodes = grid.create_nodes();
        for p in &ps {
            for (node, n) in p.nodes().iter().zip(p.shapefn()) {
                nodes[*node].update_mass(n * p.mass);
            }
        }
        let numbering = active_dof_numbering(&nodes);
        let system = assemble_consistent_mass(&ps, &numbering, |_| 1.0).unwrap();

        assert_eq!(system.global_size, 6);
        assert_eq!(system.matrix.nrows(), system.nodes.len());
        for (row, node) in system.nodes.iter().enumerate() {
            let row_sum: f64 = system.matrix.row(row).values().iter().sum();
            assert_relative_eq!(row_sum, nodes[*node].mass(), epsilon = 1e-9);
            // With q = 1 the right-hand side is the lumped mass too.
            assert_relative_eq!(system.rhs[row], nodes[*node].mass(), epsilon = 1e-9);
            assert_eq!(system.mapper[row], numbering[node]);
        }
    }
}
