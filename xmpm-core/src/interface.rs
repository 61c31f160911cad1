//! Multimaterial contact at shared nodes.
//!
//! Each material keeps its own nodal mass, momentum, mass-weighted position
//! and domain gradient. Where two or more materials meet at a node, the
//! centre-of-mass velocity decides whether a material is pressing into the
//! others (its momentum is replaced by the common one) or pulling away (it
//! keeps its own velocity for that step).

use crate::assembly::map_to_nodes;
use crate::comm::Communicator;
use crate::error::Result;
use crate::halo::NodalBuffer;
use crate::node::{Node, MASS_TOLERANCE};
use crate::particle::Particle;
use crate::types::Vector;
use rayon::prelude::*;

/// Components per material: mass, momentum, m·x and Σ V ∇N.
fn block_width(dim: usize) -> usize {
    1 + 3 * dim
}

/// Scatter per-material nodal data from this rank's particles and merge it
/// over all ranks.
pub fn map_multimaterial<C: Communicator>(
    comm: &C,
    particles: &[Particle],
    nnodes: usize,
    dim: usize,
    materials: &[usize],
) -> Result<NodalBuffer> {
    let width = block_width(dim);
    let mut buffer = map_to_nodes(particles, nnodes, width * materials.len(), |p, buf| {
        let Some(slot) = materials.iter().position(|m| *m == p.material_id) else {
            return;
        };
        let offset = slot * width;
        for (i, &node) in p.nodes().iter().enumerate() {
            let nm = p.shapefn()[i] * p.mass;
            buf.add_component(node, offset, nm);
            for a in 0..dim {
                buf.add_component(node, offset + 1 + a, nm * p.velocity[a]);
                buf.add_component(node, offset + 1 + dim + a, nm * p.coordinates[a]);
                buf.add_component(node, offset + 1 + 2 * dim + a, p.volume * p.dn_dx()[(i, a)]);
            }
        }
    });
    buffer.halo_merge(comm)?;
    Ok(buffer)
}

/// Copy merged per-material values into the nodes' interface state.
pub fn assign_multimaterial(nodes: &mut [Node], buffer: &NodalBuffer, materials: &[usize]) {
    let dim = nodes.first().map_or(0, Node::dof);
    let width = block_width(dim);
    nodes.par_iter_mut().enumerate().for_each(|(n, node)| {
        let values = buffer.node(n);
        for (slot, id) in materials.iter().enumerate() {
            let block = &values[slot * width..(slot + 1) * width];
            if let Some(state) = node.interface_mut().get_mut(id) {
                state.mass = block[0];
                state.momentum = Vector::from_column_slice(&block[1..1 + dim]);
                state.displacement = Vector::from_column_slice(&block[1 + dim..1 + 2 * dim]);
                state.domain_gradient = Vector::from_column_slice(&block[1 + 2 * dim..]);
            }
        }
    });
}

/// Momentum jump, separation and normal of every material at `node`, and
/// the resulting coupling decision.
pub fn compute_multimaterial_coupling(node: &mut Node) {
    if node.nmaterials() < 2 {
        return;
    }
    let dim = node.dof();
    let mut total_mass = 0.0;
    let mut total_momentum = Vector::zeros(dim);
    let mut total_displacement = Vector::zeros(dim);
    for state in node.interface().values() {
        total_mass += state.mass;
        total_momentum += &state.momentum;
        total_displacement += &state.displacement;
    }
    let v_cm = &total_momentum / total_mass;
    let centroid = &total_displacement / total_mass;

    for state in node.interface_mut().values_mut() {
        if state.mass <= MASS_TOLERANCE {
            state.coupled = true;
            continue;
        }
        state.momentum_change = &v_cm * state.mass - &state.momentum;
        state.separation = &state.displacement / state.mass - &centroid;
        state.normal = state
            .domain_gradient
            .clone()
            .try_normalize(0.0)
            .unwrap_or_else(|| Vector::zeros(dim));

        let relative = &state.momentum / state.mass - &v_cm;
        let approaching = relative.dot(&state.normal) > 0.0;
        state.coupled = approaching;
        if approaching {
            state.momentum += &state.momentum_change;
        }
    }
}
