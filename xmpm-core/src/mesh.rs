//! Structured background mesh.
//!
//! The grid is a regular array of linear cells described by an origin, a
//! spacing and a cell count per axis. Node and cell ids are lexicographic
//! with axis 0 varying fastest. Every rank holds the full grid and only the
//! particles it owns; partial nodal sums are merged with
//! [`Mesh::nodal_halo_exchange`] or [`NodalBuffer::halo_merge`].

use crate::comm::Communicator;
use crate::element::CellType;
use crate::error::{Error, Result};
use crate::halo::NodalBuffer;
use crate::node::Node;
use crate::particle::Particle;
use crate::partition::Partition;
use crate::types::Vector;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// `mesh` input section.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    pub origin: Vec<f64>,
    pub spacing: Vec<f64>,
    pub ncells: Vec<usize>,
    #[serde(default)]
    pub boundary_conditions: Vec<BoundaryCondition>,
}

/// Which end of an axis a boundary lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundarySide {
    Min,
    Max,
}

/// Prescribed nodal velocity on one face of the grid.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryCondition {
    pub axis: usize,
    pub side: BoundarySide,
    pub direction: usize,
    #[serde(default)]
    pub velocity: f64,
}

/// Geometry of the structured grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    origin: Vector,
    spacing: Vector,
    ncells: Vec<usize>,
    cell_type: CellType,
}

impl Grid {
    pub fn new(config: &MeshConfig) -> Result<Self> {
        let dim = config.origin.len();
        let cell_type = CellType::for_dimension(dim)?;
        if config.spacing.len() != dim || config.ncells.len() != dim {
            return Err(Error::Mesh(format!(
                "origin, spacing and ncells must all have {dim} entries"
            )));
        }
        if config.spacing.iter().any(|h| !(*h > 0.0)) {
            return Err(Error::Mesh("spacing must be positive".to_string()));
        }
        if config.ncells.iter().any(|n| *n == 0) {
            return Err(Error::Mesh("ncells must be at least 1 per axis".to_string()));
        }
        Ok(Self {
            origin: Vector::from_column_slice(&config.origin),
            spacing: Vector::from_column_slice(&config.spacing),
            ncells: config.ncells.clone(),
            cell_type,
        })
    }

    pub fn dim(&self) -> usize {
        self.origin.len()
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn origin(&self) -> &Vector {
        &self.origin
    }

    pub fn spacing(&self) -> &Vector {
        &self.spacing
    }

    /// Cells per axis.
    pub fn ncells_per_axis(&self) -> &[usize] {
        &self.ncells
    }

    pub fn ncells(&self) -> usize {
        self.ncells.iter().product()
    }

    pub fn nnodes(&self) -> usize {
        self.ncells.iter().map(|n| n + 1).product()
    }

    /// Upper corner of the domain.
    pub fn upper(&self) -> Vector {
        Vector::from_iterator(
            self.dim(),
            (0..self.dim()).map(|a| self.origin[a] + self.spacing[a] * self.ncells[a] as f64),
        )
    }

    fn node_id(&self, index: &[usize]) -> usize {
        let mut id = 0;
        for a in (0..self.dim()).rev() {
            id = id * (self.ncells[a] + 1) + index[a];
        }
        id
    }

    /// Grid index of node `id`.
    pub fn node_index(&self, mut id: usize) -> Vec<usize> {
        (0..self.dim())
            .map(|a| {
                let n = self.ncells[a] + 1;
                let i = id % n;
                id /= n;
                i
            })
            .collect()
    }

    fn cell_index(&self, mut id: usize) -> Vec<usize> {
        (0..self.dim())
            .map(|a| {
                let i = id % self.ncells[a];
                id /= self.ncells[a];
                i
            })
            .collect()
    }

    pub fn node_coordinates(&self, id: usize) -> Vector {
        let index = self.node_index(id);
        Vector::from_iterator(
            self.dim(),
            (0..self.dim()).map(|a| self.origin[a] + self.spacing[a] * index[a] as f64),
        )
    }

    /// Node ids of `cell` in element order.
    pub fn cell_nodes(&self, cell: usize) -> Vec<usize> {
        let base = self.cell_index(cell);
        self.cell_type
            .corner_offsets()
            .iter()
            .map(|offset| {
                let index: Vec<usize> = base.iter().zip(offset).map(|(b, o)| b + o).collect();
                self.node_id(&index)
            })
            .collect()
    }

    /// Cell containing `coordinates`, or `None` outside the grid.
    ///
    /// Points on the upper boundary belong to the last cell.
    pub fn locate(&self, coordinates: &Vector) -> Option<usize> {
        if coordinates.len() != self.dim() {
            return None;
        }
        let mut id = 0;
        for a in (0..self.dim()).rev() {
            let s = (coordinates[a] - self.origin[a]) / self.spacing[a];
            if !s.is_finite() || s < 0.0 || s > self.ncells[a] as f64 {
                return None;
            }
            let i = (s.floor() as usize).min(self.ncells[a] - 1);
            id = id * self.ncells[a] + i;
        }
        Some(id)
    }

    /// Natural coordinates of `coordinates` within `cell`.
    pub fn natural_coordinates(&self, cell: usize, coordinates: &Vector) -> Vec<f64> {
        let index = self.cell_index(cell);
        (0..self.dim())
            .map(|a| {
                let lower = self.origin[a] + self.spacing[a] * index[a] as f64;
                2.0 * (coordinates[a] - lower) / self.spacing[a] - 1.0
            })
            .collect()
    }

    /// One zeroed node per grid point, with `dim` degrees of freedom.
    pub fn create_nodes(&self) -> Vec<Node> {
        (0..self.nnodes())
            .map(|id| Node::new(id, self.node_coordinates(id), self.dim()))
            .collect()
    }

    /// Nodes lying on a boundary face.
    pub fn boundary_nodes(&self, axis: usize, side: BoundarySide) -> Vec<usize> {
        let target = match side {
            BoundarySide::Min => 0,
            BoundarySide::Max => self.ncells[axis],
        };
        (0..self.nnodes())
            .filter(|&id| self.node_index(id)[axis] == target)
            .collect()
    }
}

/// A background cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: usize,
    pub nodes: Vec<usize>,
    pub active: bool,
}

/// Particle selection used by loads and constraints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticleSet {
    All,
    Ids(Vec<usize>),
    Box { min: Vec<f64>, max: Vec<f64> },
}

impl ParticleSet {
    fn contains(&self, particle: &Particle) -> bool {
        match self {
            ParticleSet::All => true,
            ParticleSet::Ids(ids) => ids.contains(&particle.id),
            ParticleSet::Box { min, max } => particle
                .coordinates
                .iter()
                .zip(min.iter().zip(max))
                .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi),
        }
    }
}

/// Traction applied to a set of particles, ramped linearly over `ramp_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleTraction {
    pub ids: HashSet<usize>,
    pub direction: usize,
    pub traction: f64,
    pub ramp_time: f64,
}

impl ParticleTraction {
    fn factor(&self, time: f64) -> f64 {
        if self.ramp_time > 0.0 {
            (time / self.ramp_time).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

/// Prescribed velocity on a set of particles.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleVelocityConstraint {
    pub ids: HashSet<usize>,
    pub direction: usize,
    pub velocity: f64,
}

/// Borrowed pieces of a mesh that can be mutated independently.
pub struct MeshParts<'a> {
    pub grid: &'a Grid,
    pub nodes: &'a mut [Node],
    pub cells: &'a mut [Cell],
    pub particles: &'a mut [Particle],
}

/// Background mesh plus the particles this rank owns.
#[derive(Debug, Clone)]
pub struct Mesh {
    grid: Grid,
    nodes: Vec<Node>,
    cells: Vec<Cell>,
    particles: Vec<Particle>,
    pending: Vec<(f64, Particle)>,
    tractions: Vec<ParticleTraction>,
    velocity_constraints: Vec<ParticleVelocityConstraint>,
}

impl Mesh {
    /// Build the grid and apply nodal boundary conditions.
    pub fn new(config: &MeshConfig) -> Result<Self> {
        let grid = Grid::new(config)?;
        let mut nodes = grid.create_nodes();
        for bc in &config.boundary_conditions {
            if bc.axis >= grid.dim() {
                return Err(Error::Mesh(format!(
                    "boundary condition axis {} out of range",
                    bc.axis
                )));
            }
            for id in grid.boundary_nodes(bc.axis, bc.side) {
                nodes[id].assign_velocity_constraint(bc.direction, bc.velocity)?;
            }
        }
        let cells = (0..grid.ncells())
            .map(|id| Cell {
                id,
                nodes: grid.cell_nodes(id),
                active: false,
            })
            .collect();
        log::debug!(
            "mesh: {} nodes, {} cells, {} boundary conditions",
            grid.nnodes(),
            grid.ncells(),
            config.boundary_conditions.len()
        );
        Ok(Self {
            grid,
            nodes,
            cells,
            particles: Vec::new(),
            pending: Vec::new(),
            tractions: Vec::new(),
            velocity_constraints: Vec::new(),
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn dim(&self) -> usize {
        self.grid.dim()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn nparticles(&self) -> usize {
        self.particles.len()
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    /// Split the mesh into disjoint mutable parts.
    pub fn parts_mut(&mut self) -> MeshParts<'_> {
        MeshParts {
            grid: &self.grid,
            nodes: &mut self.nodes,
            cells: &mut self.cells,
            particles: &mut self.particles,
        }
    }

    /// Add an owned particle; ids must be unique on this rank.
    pub fn add_particle(&mut self, particle: Particle) -> Result<()> {
        if particle.dim() != self.dim() {
            return Err(Error::Particle(format!(
                "particle {} has dimension {}, mesh has {}",
                particle.id,
                particle.dim(),
                self.dim()
            )));
        }
        if self.particles.iter().any(|p| p.id == particle.id) {
            return Err(Error::Particle(format!("duplicate particle id {}", particle.id)));
        }
        self.particles.push(particle);
        Ok(())
    }

    /// Hold `particle` back until simulation time `time`.
    pub fn schedule_injection(&mut self, time: f64, particle: Particle) {
        self.pending.push((time, particle));
    }

    pub fn npending(&self) -> usize {
        self.pending.len()
    }

    /// Activate every scheduled particle whose time has come.
    pub fn inject_particles(&mut self, time: f64) -> usize {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(t, _)| *t <= time);
        self.pending = later;
        let count = due.len();
        self.particles.extend(due.into_iter().map(|(_, p)| p));
        if count > 0 {
            log::debug!("injected {count} particle(s) at t = {time}");
        }
        count
    }

    pub fn remove_particle(&mut self, id: usize) -> bool {
        let before = self.particles.len();
        self.particles.retain(|p| p.id != id);
        self.particles.len() != before
    }

    pub fn iterate_over_particles<F>(&mut self, op: F)
    where
        F: Fn(&mut Particle) + Send + Sync,
    {
        self.particles.par_iter_mut().for_each(op);
    }

    pub fn iterate_over_nodes<F>(&mut self, op: F)
    where
        F: Fn(&mut Node) + Send + Sync,
    {
        self.nodes.par_iter_mut().for_each(op);
    }

    pub fn iterate_over_nodes_predicate<F, P>(&mut self, op: F, predicate: P)
    where
        F: Fn(&mut Node) + Send + Sync,
        P: Fn(&Node) -> bool + Send + Sync,
    {
        self.nodes
            .par_iter_mut()
            .filter(|node| predicate(node))
            .for_each(op);
    }

    pub fn iterate_over_cells<F>(&mut self, op: F)
    where
        F: Fn(&mut Cell) + Send + Sync,
    {
        self.cells.par_iter_mut().for_each(op);
    }

    /// Gather `width` values per node with `getter`, sum them over ranks and
    /// hand the merged values back to `merger`.
    pub fn nodal_halo_exchange<C, G, M>(
        &mut self,
        comm: &C,
        width: usize,
        getter: G,
        merger: M,
    ) -> Result<()>
    where
        C: Communicator,
        G: Fn(&Node, &mut [f64]) + Send + Sync,
        M: Fn(&mut Node, &[f64]) + Send + Sync,
    {
        if !comm.is_distributed() {
            return Ok(());
        }
        let mut buffer = NodalBuffer::zeros(self.nodes.len(), width);
        for (i, node) in self.nodes.iter().enumerate() {
            getter(node, buffer.node_mut(i));
        }
        buffer.halo_merge(comm)?;
        self.nodes
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, node)| merger(node, buffer.node(i)));
        Ok(())
    }

    /// Assign each particle its containing cell; returns the ids of
    /// particles outside the grid.
    pub fn locate_particles_mesh(&mut self) -> Vec<usize> {
        let grid = &self.grid;
        self.particles
            .par_iter_mut()
            .filter_map(|p| {
                let cell = grid.locate(&p.coordinates);
                p.assign_cell(cell);
                cell.is_none().then_some(p.id)
            })
            .collect()
    }

    /// Hand every particle that now belongs to another rank over to it.
    ///
    /// Returns the number of particles received.
    pub fn transfer_halo_particles<C: Communicator>(
        &mut self,
        comm: &C,
        partition: &Partition,
    ) -> Result<usize> {
        if !comm.is_distributed() {
            return Ok(0);
        }
        let rank = comm.rank();
        let (stay, leave): (Vec<_>, Vec<_>) = std::mem::take(&mut self.particles)
            .into_iter()
            .partition(|p| partition.owner(&p.coordinates) == rank);
        self.particles = stay;

        let outgoing: Vec<(usize, Particle)> = leave
            .into_iter()
            .map(|p| (partition.owner(&p.coordinates), p))
            .collect();
        let sent = outgoing.len();
        let gathered = comm.all_gather(outgoing)?;
        let mut received = 0;
        for (dest, particle) in gathered.into_iter().flatten() {
            if dest == rank {
                self.add_particle(particle)?;
                received += 1;
            }
        }
        if sent > 0 || received > 0 {
            log::debug!("rank {rank}: sent {sent}, received {received} particle(s)");
        }
        Ok(received)
    }

    pub fn assign_tractions(&mut self, tractions: Vec<ParticleTraction>) {
        self.tractions = tractions;
    }

    pub fn assign_particle_velocity_constraints(
        &mut self,
        constraints: Vec<ParticleVelocityConstraint>,
    ) {
        self.velocity_constraints = constraints;
    }

    /// Resolve a particle set to ids, over owned and pending particles.
    pub fn select_particles(&self, set: &ParticleSet) -> HashSet<usize> {
        self.particles
            .iter()
            .chain(self.pending.iter().map(|(_, p)| p))
            .filter(|p| set.contains(p))
            .map(|p| p.id)
            .collect()
    }

    /// [`Mesh::select_particles`] over every rank. Collective.
    ///
    /// Loads and constraints keep these ids, so a particle that later
    /// migrates to another rank stays selected there.
    pub fn select_particles_global<C: Communicator>(
        &self,
        comm: &C,
        set: &ParticleSet,
    ) -> Result<HashSet<usize>> {
        let local: Vec<usize> = self.select_particles(set).into_iter().collect();
        Ok(comm.all_gather(local)?.into_iter().flatten().collect())
    }

    /// Set particle tractions for simulation time `time`.
    pub fn apply_traction_on_particles(&mut self, time: f64) {
        let tractions = &self.tractions;
        self.particles.par_iter_mut().for_each(|p| {
            p.traction.fill(0.0);
            for t in tractions.iter().filter(|t| t.ids.contains(&p.id)) {
                if t.direction < p.dim() {
                    p.traction[t.direction] += t.traction * t.factor(time);
                }
            }
        });
    }

    pub fn apply_particle_velocity_constraints(&mut self) {
        let constraints = &self.velocity_constraints;
        self.particles.par_iter_mut().for_each(|p| {
            let id = p.id;
            for c in constraints.iter().filter(|c| c.ids.contains(&id)) {
                p.apply_velocity_constraint(c.direction, c.velocity);
            }
        });
    }

    /// Allocate per-material interface storage on every node.
    pub fn create_nodal_properties(&mut self, material_ids: &[usize]) {
        self.nodes
            .par_iter_mut()
            .for_each(|node| node.create_interface_properties(material_ids));
    }

    /// Allocate discontinuity enrichment on every node.
    pub fn create_nodal_properties_discontinuity(&mut self) {
        self.nodes
            .par_iter_mut()
            .for_each(Node::create_discontinuity_properties);
    }

    pub fn particle_coordinates(&self) -> Vec<Vector> {
        self.particle_coordinates_from(0)
    }

    /// Coordinates of the particles from index `first` on.
    pub fn particle_coordinates_from(&self, first: usize) -> Vec<Vector> {
        self.particles
            .iter()
            .skip(first)
            .map(|p| p.coordinates.clone())
            .collect()
    }

    /// Forget every level set assigned so far.
    pub fn reset_particle_levelset(&mut self) {
        for p in self.particles.iter_mut() {
            p.levelset = None;
            p.discontinuity_id = None;
            p.levelset_normal.fill(0.0);
        }
    }

    /// Assign level-set values of discontinuity `id` to the particles from
    /// index `first` on, in [`Mesh::particle_coordinates_from`] order.
    ///
    /// A particle keeps whichever discontinuity is closest; ties go to the
    /// one assigned first.
    pub fn assign_particle_levelset(
        &mut self,
        first: usize,
        id: usize,
        values: &[f64],
        normals: &[Vector],
    ) -> Result<()> {
        let count = self.particles.len().saturating_sub(first);
        if values.len() != count || normals.len() != count {
            return Err(Error::Discontinuity(format!(
                "discontinuity {id}: {} level-set values for {count} particles",
                values.len()
            )));
        }
        let targets = self.particles.iter_mut().skip(first);
        for ((p, &phi), normal) in targets.zip(values).zip(normals) {
            let closer = p.levelset.map_or(true, |current| phi.abs() < current.abs());
            if closer {
                p.levelset = Some(phi);
                p.discontinuity_id = Some(id);
                p.levelset_normal = normal.clone();
            }
        }
        Ok(())
    }

    /// Particle count by material id.
    pub fn particles_per_material(&self) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        for p in &self.particles {
            *counts.entry(p.material_id).or_insert(0) += 1;
        }
        counts
    }
}
