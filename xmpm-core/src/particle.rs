//! Material points.
//!
//! A particle carries mass, volume, kinematics and stress through the whole
//! run. Each step it caches the shape functions of the cell it sits in and
//! uses them to scatter to and gather from the grid nodes.

use crate::element::CellType;
use crate::error::{Error, Result};
use crate::halo::NodalBuffer;
use crate::material::Material;
use crate::mesh::Grid;
use crate::node::{Node, Side};
use crate::types::{StrainTensor, StressTensor, Vector};
use nalgebra::DMatrix;
use serde::Deserialize;

/// Particle velocity update scheme.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VelocityUpdate {
    /// v_p += Σ N_i a_i dt
    #[default]
    Flip,
    /// v_p = Σ N_i v_i
    Pic,
    /// α · FLIP + (1 - α) · PIC
    Blend(f64),
}

impl VelocityUpdate {
    /// FLIP fraction.
    pub fn alpha(self) -> f64 {
        match self {
            VelocityUpdate::Flip => 1.0,
            VelocityUpdate::Pic => 0.0,
            VelocityUpdate::Blend(alpha) => alpha.clamp(0.0, 1.0),
        }
    }
}

/// A material point.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: usize,
    pub material_id: usize,
    pub coordinates: Vector,
    pub displacement: Vector,
    pub velocity: Vector,
    pub mass: f64,
    pub volume: f64,
    pub stress: StressTensor,
    pub strain: StrainTensor,
    pub dstrain: StrainTensor,
    /// Traction (force per unit area) applied this step.
    pub traction: Vector,
    /// Signed distance to the nearest discontinuity, if any was assigned.
    pub levelset: Option<f64>,
    /// Unit normal of that discontinuity at the closest point.
    pub levelset_normal: Vector,
    /// Id of the discontinuity the level set refers to.
    pub discontinuity_id: Option<usize>,
    cell: Option<usize>,
    nodes: Vec<usize>,
    shapefn: Vec<f64>,
    dn_dx: DMatrix<f64>,
}

impl Particle {
    pub fn new(id: usize, material_id: usize, coordinates: Vector, volume: f64) -> Result<Self> {
        if volume <= 0.0 {
            return Err(Error::Particle(format!(
                "particle {id}: volume must be positive"
            )));
        }
        let dim = coordinates.len();
        Ok(Self {
            id,
            material_id,
            displacement: Vector::zeros(dim),
            velocity: Vector::zeros(dim),
            traction: Vector::zeros(dim),
            levelset_normal: Vector::zeros(dim),
            coordinates,
            mass: 0.0,
            volume,
            stress: StressTensor::zero(),
            strain: StrainTensor::zero(),
            dstrain: StrainTensor::zero(),
            levelset: None,
            discontinuity_id: None,
            cell: None,
            nodes: Vec::new(),
            shapefn: Vec::new(),
            dn_dx: DMatrix::zeros(0, dim),
        })
    }

    pub fn dim(&self) -> usize {
        self.coordinates.len()
    }

    pub fn cell(&self) -> Option<usize> {
        self.cell
    }

    pub fn assign_cell(&mut self, cell: Option<usize>) {
        self.cell = cell;
    }

    /// Nodes of the current cell, as cached by [`Particle::compute_shapefn`].
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn shapefn(&self) -> &[f64] {
        &self.shapefn
    }

    pub fn dn_dx(&self) -> &DMatrix<f64> {
        &self.dn_dx
    }

    /// Side of the discontinuity the particle lies on.
    pub fn side(&self) -> Option<Side> {
        self.levelset.map(Side::of)
    }

    /// Set mass from the material density.
    pub fn assign_material(&mut self, material: &Material) {
        self.material_id = material.id;
        self.mass = material.density * self.volume;
    }

    pub fn pressure(&self) -> f64 {
        -self.stress.hydrostatic()
    }

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.norm_squared()
    }

    /// Cache shape functions and gradients for the current cell.
    ///
    /// Returns `false` when the particle is not in a cell.
    pub fn compute_shapefn(&mut self, grid: &Grid) -> bool {
        let Some(cell) = self.cell else {
            self.nodes.clear();
            self.shapefn.clear();
            return false;
        };
        let xi = grid.natural_coordinates(cell, &self.coordinates);
        let cell_type: CellType = grid.cell_type();
        self.nodes = grid.cell_nodes(cell);
        self.shapefn = cell_type.shape_functions(&xi);
        self.dn_dx = cell_type.physical_gradients(&xi, grid.spacing().as_slice());
        true
    }

    /// Add `values(i)` for each cell node into the total slot of `buffer`,
    /// and into the slot of this particle's side when `enriched`.
    fn scatter(&self, buffer: &mut NodalBuffer, enriched: bool, values: impl Fn(usize) -> Vec<f64>) {
        let block = if enriched {
            buffer.width() / 3
        } else {
            buffer.width()
        };
        let side = self.side();
        for (i, &node) in self.nodes.iter().enumerate() {
            let v = values(i);
            for (c, value) in v.iter().enumerate() {
                buffer.add_component(node, c, *value);
            }
            if let (true, Some(side)) = (enriched, side) {
                let offset = block * (1 + side as usize);
                for (c, value) in v.iter().enumerate() {
                    buffer.add_component(node, offset + c, *value);
                }
            }
        }
    }

    /// Scatter `[N m, N m v]` per node.
    pub fn map_mass_momentum(&self, buffer: &mut NodalBuffer, enriched: bool) {
        self.scatter(buffer, enriched, |i| {
            let nm = self.shapefn[i] * self.mass;
            std::iter::once(nm)
                .chain(self.velocity.iter().map(|v| nm * v))
                .collect()
        });
    }

    /// Scatter `N m g + N t A` per node.
    pub fn map_external_force(&self, buffer: &mut NodalBuffer, gravity: &Vector, enriched: bool) {
        let dim = self.dim();
        let area = self.volume.powf((dim as f64 - 1.0) / dim as f64);
        let body = gravity * self.mass;
        let traction = &self.traction * area;
        let total = body + traction;
        self.scatter(buffer, enriched, |i| {
            total.iter().map(|f| self.shapefn[i] * f).collect()
        });
    }

    /// Scatter `-V σ ∇N` per node.
    pub fn map_internal_force(&self, buffer: &mut NodalBuffer, enriched: bool) {
        let dim = self.dim();
        let sigma = self.stress.to_matrix();
        self.scatter(buffer, enriched, |i| {
            (0..dim)
                .map(|a| {
                    -self.volume
                        * (0..dim)
                            .map(|b| sigma[(a, b)] * self.dn_dx[(i, b)])
                            .sum::<f64>()
                })
                .collect()
        });
    }

    /// Velocity and acceleration of node `node` as seen by this particle.
    fn nodal_kinematics(&self, node: &Node) -> (Vector, Vector) {
        let (v, a) = node.kinematics(self.side());
        match node.decoupled_velocity(self.material_id) {
            Some(decoupled) => (decoupled, a.clone()),
            None => (v.clone(), a.clone()),
        }
    }

    /// Advance velocity and position from the updated nodal fields.
    pub fn compute_updated_position(&mut self, nodes: &[Node], dt: f64, scheme: VelocityUpdate) {
        if self.nodes.is_empty() {
            return;
        }
        let dim = self.dim();
        let mut nodal_velocity = Vector::zeros(dim);
        let mut nodal_acceleration = Vector::zeros(dim);
        for (i, &n) in self.nodes.iter().enumerate() {
            let (v, a) = self.nodal_kinematics(&nodes[n]);
            nodal_velocity += v * self.shapefn[i];
            nodal_acceleration += a * self.shapefn[i];
        }
        let alpha = scheme.alpha();
        let flip = &self.velocity + &nodal_acceleration * dt;
        self.velocity = flip * alpha + &nodal_velocity * (1.0 - alpha);

        let dx = nodal_velocity * dt;
        self.coordinates += &dx;
        self.displacement += dx;
    }

    /// Strain increment from the nodal velocity gradient.
    pub fn compute_strain(&mut self, nodes: &[Node], dt: f64) {
        let dim = self.dim();
        let mut grad_v = DMatrix::zeros(dim, dim);
        for (i, &n) in self.nodes.iter().enumerate() {
            let (v, _) = self.nodal_kinematics(&nodes[n]);
            for a in 0..dim {
                for b in 0..dim {
                    grad_v[(a, b)] += v[a] * self.dn_dx[(i, b)];
                }
            }
        }
        self.dstrain = StrainTensor::from_velocity_gradient(&grad_v, dt);
        self.strain = StrainTensor(self.strain.0 + self.dstrain.0);
    }

    /// Scale the volume by the volumetric strain increment.
    pub fn update_volume(&mut self) {
        self.volume *= 1.0 + self.dstrain.volumetric();
    }

    /// Incremental stress update.
    pub fn compute_stress(&mut self, material: &Material) {
        self.stress = material.compute_stress(&self.stress, &self.dstrain);
    }

    /// Overwrite velocity component `direction`.
    pub fn apply_velocity_constraint(&mut self, direction: usize, value: f64) {
        if direction < self.dim() {
            self.velocity[direction] = value;
        }
    }
}
