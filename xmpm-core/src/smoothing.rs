//! Consistent-mass L2 projection of particle pressure.
//!
//! Particle pressures are projected onto the nodes by solving
//! `M p = b` with `M_ij = Σ m_p N_i N_j` and `b_i = Σ m_p N_i p_p`, then
//! interpolated back. The deviatoric stress of each particle is untouched.

use crate::assembly::{active_dof_numbering, assemble_consistent_mass};
use crate::comm::Communicator;
use crate::error::Result;
use crate::linear_solver::{DistributedLinearSolver, DivergencePolicy};
use crate::node::Node;
use crate::particle::Particle;
use rayon::prelude::*;
use std::collections::HashMap;

/// Outcome of one smoothing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingOutcome {
    /// Particle pressures replaced by the projected field.
    Applied,
    /// No node carries mass; nothing to do.
    Skipped,
    /// The solve diverged and pressures were left as they were.
    Diverged,
}

/// Smooth the pressure of `particles` over the merged nodal masses in
/// `nodes`. Collective: every rank must call it in the same step.
pub fn smooth_pressure<C: Communicator>(
    comm: &C,
    solver: &DistributedLinearSolver,
    method: &str,
    policy: DivergencePolicy,
    nodes: &[Node],
    particles: &mut [Particle],
) -> Result<SmoothingOutcome> {
    let numbering = active_dof_numbering(nodes);
    if numbering.is_empty() {
        return Ok(SmoothingOutcome::Skipped);
    }

    let system = assemble_consistent_mass(particles, &numbering, Particle::pressure)?;
    let solution = solver.solve(
        comm,
        &system.matrix,
        &system.rhs,
        &system.mapper,
        system.global_size,
        method,
    )?;

    let pressures = if solution.status.is_converged() {
        solution.x
    } else {
        match policy {
            DivergencePolicy::Abort => {
                solution.into_converged()?;
                return Ok(SmoothingOutcome::Diverged);
            }
            DivergencePolicy::Warn => {
                log::warn!(
                    "pressure smoothing skipped: {} after {} iterations",
                    solution.status.reason,
                    solution.status.iterations
                );
                return Ok(SmoothingOutcome::Diverged);
            }
        }
    };

    let nodal: HashMap<usize, f64> = system.nodes.iter().copied().zip(pressures).collect();
    particles.par_iter_mut().for_each(|particle| {
        let pressure: f64 = particle
            .nodes()
            .iter()
            .zip(particle.shapefn())
            .map(|(node, n)| n * nodal.get(node).copied().unwrap_or(0.0))
            .sum();
        particle.stress = particle.stress.with_hydrostatic(-pressure);
    });
    Ok(SmoothingOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, ThreadCommunicator};
    use crate::error::Error;
    use crate::linear_solver::LinearSolverConfig;
    use crate::material::Material;
    use crate::mesh::{Grid, MeshConfig};
    use crate::types::{StressTensor, Vector};
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

    fn particle(grid: &Grid, id: usize, x: f64, y: f64, pressure: f64) -> Particle {
        let material = Material::new(0, 1.0e6, 0.2, 1000.0).unwrap();
        let mut p = Particle::new(id, 0, Vector::from_vec(vec![x, y]), 0.25).unwrap();
        p.assign_material(&material);
        p.stress = StressTensor::new([-pressure, -pressure, -pressure, 5.0, 0.0, 0.0]);
        p.assign_cell(grid.locate(&p.coordinates));
        p.compute_shapefn(grid);
        p
    }

    fn lattice(grid: &Grid, pressure: impl Fn(f64) -> f64) -> Vec<Particle> {
        let mut ps = Vec::new();
        for i in 0..4 {
            for j in 0..2 {
                let (x, y) = (0.25 + 0.5 * i as f64, 0.25 + 0.5 * j as f64);
                ps.push(particle(grid, ps.len(), x, y, pressure(x)));
            }
        }
        ps
    }

    fn nodal_masses(grid: &Grid, particles: &[Particle]) -> Vec<Node> {
        let mut nodes = grid.create_nodes();
        for p in particles {
            for (node, n) in p.nodes().iter().zip(p.shapefn()) {
                nodes[*node].update_mass(n * p.mass);
            }
        }
        nodes
    }

    #[test]
    fn test_uniform_pressure_is_preserved() {
        let grid = grid();
        let mut ps = lattice(&grid, |_| 100.0);
        let nodes = nodal_masses(&grid, &ps);
        let outcome = smooth_pressure(
            &SingleProcess,
            &DistributedLinearSolver::default(),
            "cg",
            DivergencePolicy::Warn,
            &nodes,
            &mut ps,
        )
        .unwrap();
        assert_eq!(outcome, SmoothingOutcome::Applied);
        for p in &ps {
            assert_relative_eq!(p.pressure(), 100.0, epsilon = 1e-6);
            // Shear is untouched.
            assert_relative_eq!(p.stress.0[3], 5.0);
        }
    }

    #[test]
    fn test_linear_pressure_is_reproduced() {
        let grid = grid();
        let mut ps = lattice(&grid, |x| 10.0 * x);
        let nodes = nodal_masses(&grid, &ps);
        smooth_pressure(
            &SingleProcess,
            &DistributedLinearSolver::default(),
            "cg",
            DivergencePolicy::Warn,
            &nodes,
            &mut ps,
        )
        .unwrap();
        for p in &ps {
            assert_relative_eq!(p.pressure(), 10.0 * p.coordinates[0], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_divergence_policy() {
        let grid = grid();
        let config = LinearSolverConfig {
            max_iterations: 1,
            rtol: 1e-30,
            atol: 0.0,
            ..LinearSolverConfig::default()
        };
        let solver = DistributedLinearSolver::from_config(&config);

        let mut ps = lattice(&grid, |x| 10.0 * x * x);
        let before: Vec<f64> = ps.iter().map(Particle::pressure).collect();
        let nodes = nodal_masses(&grid, &ps);
        let outcome =
            smooth_pressure(&SingleProcess, &solver, "cg", DivergencePolicy::Warn, &nodes, &mut ps)
                .unwrap();
        assert_eq!(outcome, SmoothingOutcome::Diverged);
        let after: Vec<f64> = ps.iter().map(Particle::pressure).collect();
        assert_eq!(before, after);

        let result =
            smooth_pressure(&SingleProcess, &solver, "cg", DivergencePolicy::Abort, &nodes, &mut ps);
        assert!(matches!(result, Err(Error::Divergence { .. })));
    }

    #[test]
    fn test_empty_grid_is_skipped() {
        let grid = grid();
        let nodes = grid.create_nodes();
        let outcome = smooth_pressure(
            &SingleProcess,
            &DistributedLinearSolver::default(),
            "cg",
            DivergencePolicy::Warn,
            &nodes,
            &mut [],
        )
        .unwrap();
        assert_eq!(outcome, SmoothingOutcome::Skipped);
    }

    #[test]
    fn test_two_ranks_agree_with_one() {
        let grid = grid();
        let all = lattice(&grid, |x| 3.0 + x);
        let nodes = nodal_masses(&grid, &all);

        let mut serial = all.clone();
        smooth_pressure(
            &SingleProcess,
            &DistributedLinearSolver::default(),
            "cg",
            DivergencePolicy::Warn,
            &nodes,
            &mut serial,
        )
        .unwrap();

        let ranks = ThreadCommunicator::group(2);
        let split: Vec<Vec<Particle>> = std::thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    let nodes = &nodes;
                    let mut mine: Vec<Particle> = all
                        .iter()
                        .filter(|p| (p.coordinates[0] < 1.0) == (comm.rank() == 0))
                        .cloned()
                        .collect();
                    s.spawn(move || {
                        smooth_pressure(
                            comm,
                            &DistributedLinearSolver::default(),
                            "cg",
                            DivergencePolicy::Warn,
                            nodes,
                            &mut mine,
                        )
                        .unwrap();
                        mine
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for p in split.into_iter().flatten() {
            let reference = serial.iter().find(|q| q.id == p.id).unwrap();
            assert_relative_eq!(p.pressure(), reference.pressure(), epsilon = 1e-8);
        }
    }
}
