//! Explicit MPM solver.
//!
//! [`ExplicitSolver`] owns the materials, mesh, partition and discontinuities
//! of one rank and advances them step by step. Initialisation is a fixed
//! sequence of stages (see [`SolverStage`]); each `initialise_*` call checks
//! that its predecessor has completed.
//!
//! # Step
//!
//! 1. Rebalance the slab partition (every `nload_balance_steps`, multi-rank).
//! 2. Inject scheduled particles and evaluate their level sets.
//! 3. In parallel: reset nodes and activate occupied cells | compute particle
//!    shape functions. Then map mass and momentum (per discontinuity side
//!    where enriched) and merge across ranks.
//! 4. Multimaterial interface coupling, if enabled.
//! 5. USF: strain, volume, optional pressure smoothing, stress.
//! 6. In parallel: external force | internal force. Merge across ranks.
//! 7. Integrate active nodes.
//! 8. Update particle velocity and position; apply particle constraints.
//! 9. USL: strain, volume, optional pressure smoothing, stress.
//! 10. Relocate particles; unlocatable ones are fatal or dropped.
//! 11. Hand particles over to the rank that now owns them.
//! 12. Output every `output_steps`.

use crate::assembly::map_to_nodes;
use crate::comm::Communicator;
use crate::config::{AnalysisConfig, LoadsConfig, ParticleSetConfig, StressUpdate};
use crate::discontinuity::{DiscontinuitySurface, DiscontinuityType};
use crate::error::{Error, Result};
use crate::interface::{assign_multimaterial, compute_multimaterial_coupling, map_multimaterial};
use crate::io::{Io, MeshReaderKind};
use crate::linear_solver::{DistributedLinearSolver, KrylovMethod, LinearSolverConfig};
use crate::material::{Material, MaterialConfig};
use crate::mesh::{Mesh, MeshConfig, MeshParts, ParticleTraction, ParticleVelocityConstraint};
use crate::node::{Node, Side, MASS_TOLERANCE};
use crate::output::{dispatch, OutputSink, StepSummary};
use crate::particle::Particle;
use crate::partition::Partition;
use crate::smoothing::smooth_pressure;
use crate::state::{SimulationClock, SolverStage};
use crate::types::Vector;
use rayon::prelude::*;
use std::collections::BTreeMap;

fn require<'a, T>(value: &'a mut Option<T>, what: &str) -> Result<&'a mut T> {
    value
        .as_mut()
        .ok_or_else(|| Error::Stage(format!("{what} is not initialised")))
}

/// Locate every particle. Unlocatable ones are fatal under `strict` (on all
/// ranks together) and removed otherwise.
fn locate_particles<C: Communicator>(comm: &C, mesh: &mut Mesh, strict: bool) -> Result<()> {
    let local = mesh.locate_particles_mesh();
    let all: Vec<usize> = comm.all_gather(local.clone())?.concat();
    if all.is_empty() {
        return Ok(());
    }
    if strict {
        return Err(Error::UnlocatableParticles { ids: all });
    }
    for id in local {
        mesh.remove_particle(id);
        log::warn!("particle {id} is outside the mesh and was removed");
    }
    Ok(())
}

/// Level sets of the particles from index `first` on; each keeps its
/// closest discontinuity.
fn assign_levelset(
    mesh: &mut Mesh,
    discontinuities: &BTreeMap<usize, DiscontinuitySurface>,
    first: usize,
) -> Result<()> {
    let coordinates = mesh.particle_coordinates_from(first);
    if coordinates.is_empty() {
        return Ok(());
    }
    for (id, surface) in discontinuities {
        let values = surface.compute_levelset(&coordinates);
        let normals = surface.compute_normals(&coordinates);
        mesh.assign_particle_levelset(first, *id, &values, &normals)?;
    }
    Ok(())
}

/// Explicit MPM solver for one rank.
pub struct ExplicitSolver<C: Communicator> {
    io: Io,
    comm: C,
    analysis: AnalysisConfig,
    linear_solver_config: LinearSolverConfig,
    linear_solver: DistributedLinearSolver,
    stage: SolverStage,
    clock: SimulationClock,
    materials: BTreeMap<usize, Material>,
    mesh: Option<Mesh>,
    partition: Option<Partition>,
    gravity: Vector,
    discontinuities: BTreeMap<usize, DiscontinuitySurface>,
    discontinuity: bool,
    sinks: Vec<Box<dyn OutputSink>>,
}

impl<C: Communicator> ExplicitSolver<C> {
    /// Read the `analysis` and `linear_solver` sections.
    pub fn new(io: Io, comm: C) -> Result<Self> {
        let analysis: AnalysisConfig = io.section("analysis")?;
        let linear_solver_config: LinearSolverConfig = io.section_or_default("linear_solver")?;
        linear_solver_config.method.parse::<KrylovMethod>()?;
        let clock = SimulationClock::new(analysis.start_step(), analysis.nsteps, analysis.dt);
        Ok(Self {
            linear_solver: DistributedLinearSolver::from_config(&linear_solver_config),
            linear_solver_config,
            io,
            comm,
            analysis,
            stage: SolverStage::Uninitialized,
            clock,
            materials: BTreeMap::new(),
            mesh: None,
            partition: None,
            gravity: Vector::zeros(0),
            discontinuities: BTreeMap::new(),
            discontinuity: false,
            sinks: Vec::new(),
        })
    }

    pub fn add_output_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn stage(&self) -> SolverStage {
        self.stage
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    pub fn materials(&self) -> &BTreeMap<usize, Material> {
        &self.materials
    }

    pub fn discontinuities(&self) -> &BTreeMap<usize, DiscontinuitySurface> {
        &self.discontinuities
    }

    /// True once at least one discontinuity has been set up.
    pub fn discontinuity_enabled(&self) -> bool {
        self.discontinuity
    }

    pub fn initialise_materials(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::Uninitialized, SolverStage::Uninitialized)?;
        let configs: Vec<MaterialConfig> = self.io.section("materials")?;
        let mut materials = BTreeMap::new();
        for config in &configs {
            let material = Material::from_config(config)?;
            if materials.insert(material.id, material).is_some() {
                return Err(Error::InvalidMaterial(format!(
                    "duplicate material id {}",
                    config.id
                )));
            }
        }
        if materials.is_empty() {
            return Err(Error::InvalidMaterial("no materials defined".to_string()));
        }
        log::info!("{} material(s)", materials.len());
        self.materials = materials;
        self.stage
            .transition(SolverStage::Uninitialized, SolverStage::MaterialsReady)
    }

    pub fn initialise_mesh(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::MaterialsReady, SolverStage::MaterialsReady)?;
        let config: MeshConfig = self.io.section("mesh")?;
        let mesh = Mesh::new(&config)?;
        let dim = mesh.dim();
        self.analysis.validate(dim)?;
        self.gravity = self.analysis.gravity_vector(dim);

        let h_min = mesh.grid().spacing().min();
        let c_max = self
            .materials
            .values()
            .map(Material::p_wave_speed)
            .fold(0.0, f64::max);
        if c_max > 0.0 && self.analysis.dt > h_min / c_max {
            log::warn!(
                "dt = {:e} exceeds the critical time step {:e} (spacing {}, wave speed {:.3e})",
                self.analysis.dt,
                h_min / c_max,
                h_min,
                c_max
            );
        }
        self.partition = Some(Partition::uniform(mesh.grid(), self.comm.size()));
        log::info!(
            "mesh: {}D, {} nodes, {} cells, {} rank(s)",
            dim,
            mesh.nnodes(),
            mesh.grid().ncells(),
            self.comm.size()
        );
        self.mesh = Some(mesh);
        self.stage
            .transition(SolverStage::MaterialsReady, SolverStage::MeshReady)
    }

    pub fn initialise_particles(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::MeshReady, SolverStage::MeshReady)?;
        let sets: Vec<ParticleSetConfig> = self.io.section("particles")?;
        let mesh = require(&mut self.mesh, "mesh")?;
        let partition = self
            .partition
            .as_ref()
            .ok_or_else(|| Error::Stage("partition is not initialised".to_string()))?;
        let rank = self.comm.rank();
        let dim = mesh.dim();
        let start_time = self.clock.time();

        let mut next_id = 0;
        for set in &sets {
            let material = self.materials.get(&set.material_id).ok_or_else(|| {
                Error::InvalidMaterial(format!("unknown material id {}", set.material_id))
            })?;
            let velocity = match &set.velocity {
                Some(v) if v.len() != dim => {
                    return Err(Error::Config(format!(
                        "particle velocity has {} components, mesh is {dim}D",
                        v.len()
                    )))
                }
                Some(v) => Vector::from_column_slice(v),
                None => Vector::zeros(dim),
            };
            let (points, volume) = set.points()?;
            for point in points {
                let id = next_id;
                next_id += 1;
                if point.len() != dim {
                    return Err(Error::Particle(format!(
                        "particle {id} has {} coordinates, mesh is {dim}D",
                        point.len()
                    )));
                }
                let coordinates = Vector::from_vec(point);
                if partition.owner(&coordinates) != rank {
                    continue;
                }
                let mut particle = Particle::new(id, material.id, coordinates, volume)?;
                particle.assign_material(material);
                particle.velocity = velocity.clone();
                match set.injection_time {
                    Some(time) if time > start_time => mesh.schedule_injection(time, particle),
                    _ => mesh.add_particle(particle)?,
                }
            }
        }

        locate_particles(&self.comm, mesh, self.analysis.locate_particles)?;
        if self.analysis.interface {
            let ids: Vec<usize> = self.materials.keys().copied().collect();
            mesh.create_nodal_properties(&ids);
        }
        for (material, count) in mesh.particles_per_material() {
            log::debug!("rank {rank}: material {material}: {count} particle(s)");
        }
        let total = self.comm.all_reduce_scalar(mesh.nparticles() as f64)?;
        log::info!(
            "rank {rank}: {} particle(s), {} scheduled; {} in total",
            mesh.nparticles(),
            mesh.npending(),
            total
        );
        self.stage
            .transition(SolverStage::MeshReady, SolverStage::ParticlesReady)
    }

    pub fn initialise_loads(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::ParticlesReady, SolverStage::ParticlesReady)?;
        let loads: LoadsConfig = self.io.section_or_default("loads")?;
        let mesh = require(&mut self.mesh, "mesh")?;
        let dim = mesh.dim();

        let mut tractions = Vec::with_capacity(loads.particle_tractions.len());
        for t in &loads.particle_tractions {
            if t.direction >= dim {
                return Err(Error::Config(format!(
                    "traction direction {} out of range",
                    t.direction
                )));
            }
            tractions.push(ParticleTraction {
                ids: mesh.select_particles_global(&self.comm, &t.set)?,
                direction: t.direction,
                traction: t.traction,
                ramp_time: t.ramp_time,
            });
        }
        let mut constraints = Vec::with_capacity(loads.particle_velocity_constraints.len());
        for c in &loads.particle_velocity_constraints {
            if c.direction >= dim {
                return Err(Error::Config(format!(
                    "velocity constraint direction {} out of range",
                    c.direction
                )));
            }
            constraints.push(ParticleVelocityConstraint {
                ids: mesh.select_particles_global(&self.comm, &c.set)?,
                direction: c.direction,
                velocity: c.velocity,
            });
        }
        log::debug!(
            "{} traction set(s), {} particle velocity constraint(s)",
            tractions.len(),
            constraints.len()
        );
        mesh.assign_tractions(tractions);
        mesh.assign_particle_velocity_constraints(constraints);
        self.stage
            .transition(SolverStage::ParticlesReady, SolverStage::LoadsReady)
    }

    /// Read, build and register every configured discontinuity.
    ///
    /// No configured discontinuity is not an error: the solver simply runs
    /// without enrichment. A repeated id fails the whole call and registers
    /// nothing.
    pub fn initialise_discontinuities(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::LoadsReady, SolverStage::LoadsReady)?;
        if self.analysis.discontinuity.is_empty() {
            log::info!("no discontinuities configured");
            self.discontinuity = false;
            return Ok(());
        }
        let mesh = require(&mut self.mesh, "mesh")?;
        let dim = mesh.dim();

        let mut surfaces = BTreeMap::new();
        for config in &self.analysis.discontinuity {
            if surfaces.contains_key(&config.id) {
                return Err(Error::DuplicateDiscontinuity(config.id));
            }
            let kind: DiscontinuityType = config.discontinuity_type.parse()?;
            let reader: MeshReaderKind = config.io_type.parse()?;
            if reader.dimension() != dim {
                return Err(Error::Discontinuity(format!(
                    "discontinuity {}: {} reader in a {dim}D mesh",
                    config.id, config.io_type
                )));
            }
            let (points, cells) = reader.read(self.io.file_name(&config.file))?;
            let mut surface = DiscontinuitySurface::new(config.id, kind, dim);
            surface.initialize(points, cells)?;
            surface.set_frictional_coef(config.frictional_coefficient);
            log::info!(
                "discontinuity {}: {:?} with {} element(s), friction {}",
                config.id,
                kind,
                surface.nelements(),
                config.frictional_coefficient
            );
            surfaces.insert(config.id, surface);
        }

        mesh.create_nodal_properties_discontinuity();
        self.discontinuities = surfaces;
        self.discontinuity = true;
        self.stage
            .transition(SolverStage::LoadsReady, SolverStage::DiscontinuitiesReady)
    }

    /// Evaluate every discontinuity's level set at the particles.
    ///
    /// Repeatable: assignments are rebuilt from scratch each call.
    pub fn initialise_levelset(&mut self) -> Result<()> {
        self.stage
            .require_between(SolverStage::DiscontinuitiesReady, SolverStage::LevelsetReady)?;
        let mesh = require(&mut self.mesh, "mesh")?;
        mesh.reset_particle_levelset();
        assign_levelset(mesh, &self.discontinuities, 0)?;
        if self.stage == SolverStage::DiscontinuitiesReady {
            self.stage
                .transition(SolverStage::DiscontinuitiesReady, SolverStage::LevelsetReady)?;
        }
        Ok(())
    }

    /// Run every initialisation stage in order.
    pub fn initialise(&mut self) -> Result<()> {
        self.initialise_materials()?;
        self.initialise_mesh()?;
        self.initialise_particles()?;
        self.initialise_loads()?;
        self.initialise_discontinuities()?;
        if self.discontinuity {
            self.initialise_levelset()?;
        }
        if self.analysis.resume.resume {
            log::info!("resuming at step {}", self.clock.step);
        }
        Ok(())
    }

    /// Initialise (if not done yet) and run every step.
    ///
    /// Returns `Ok(true)` when the last step completes.
    pub fn solve(&mut self) -> Result<bool> {
        let result = self.run();
        if let Err(e) = &result {
            log::error!("rank {}: {}", self.comm.rank(), e);
        }
        result
    }

    fn run(&mut self) -> Result<bool> {
        if self.stage == SolverStage::Uninitialized {
            self.initialise()?;
        }
        let ready = if self.discontinuity {
            SolverStage::LevelsetReady
        } else {
            SolverStage::LoadsReady
        };
        self.stage.transition(ready, SolverStage::Stepping)?;

        while !self.clock.is_finished() {
            let clock = self.clock;
            self.compute_step(&clock)?;
            self.clock.advance();
        }

        self.stage
            .transition(SolverStage::Stepping, SolverStage::Finished)?;
        Ok(true)
    }

    /// Advance the simulation by one step.
    fn compute_step(&mut self, clock: &SimulationClock) -> Result<()> {
        let dt = clock.dt;
        let time = clock.time();
        let strict = self.analysis.locate_particles;
        let enriched = self.discontinuity;
        let comm = &self.comm;
        let mesh = require(&mut self.mesh, "mesh")?;
        let partition = require(&mut self.partition, "partition")?;
        let dim = mesh.dim();
        let nnodes = mesh.nnodes();

        // 1. Rebalance
        let stride = self.analysis.nload_balance_steps;
        if comm.is_distributed() && stride > 0 && clock.step % stride == 0 {
            partition.rebalance(comm, &mesh.particle_coordinates())?;
            mesh.transfer_halo_particles(comm, partition)?;
        }

        // 2. Inject
        let injected = mesh.inject_particles(time);
        if enriched && injected > 0 {
            let first = mesh.nparticles() - injected;
            assign_levelset(mesh, &self.discontinuities, first)?;
        }
        if comm.all_reduce_scalar(injected as f64)? > 0.0 {
            locate_particles(comm, mesh, strict)?;
        }
        mesh.apply_traction_on_particles(time);

        // 3. Reset nodes and activate cells | shape functions
        let occupied: Vec<usize> = mesh.particles().iter().filter_map(Particle::cell).collect();
        mesh.iterate_over_cells(|cell| cell.active = false);
        {
            let MeshParts {
                grid,
                nodes,
                cells,
                particles,
            } = mesh.parts_mut();
            rayon::join(
                || {
                    nodes.par_iter_mut().for_each(Node::initialise);
                    for &c in &occupied {
                        cells[c].active = true;
                        for &n in &cells[c].nodes {
                            nodes[n].set_active(true);
                        }
                    }
                },
                || {
                    particles.par_iter_mut().for_each(|p| {
                        p.compute_shapefn(grid);
                    });
                },
            );
        }

        if enriched {
            let discontinuities = &self.discontinuities;
            let mut sides = map_to_nodes(mesh.particles(), nnodes, 3 + dim, |p, buf| {
                let Some(phi) = p.levelset else {
                    return;
                };
                let friction = p
                    .discontinuity_id
                    .and_then(|id| discontinuities.get(&id))
                    .map_or(0.0, DiscontinuitySurface::frictional_coefficient);
                for (node, n) in p.nodes().iter().zip(p.shapefn()) {
                    let nm = n * p.mass;
                    buf.add_component(*node, Side::of(phi) as usize, nm);
                    buf.add_component(*node, 2, nm * friction);
                    for a in 0..dim {
                        buf.add_component(*node, 3 + a, nm * p.levelset_normal[a]);
                    }
                }
            });
            sides.halo_merge(comm)?;
            mesh.iterate_over_nodes(|node| {
                let values = sides.node(node.id());
                let (negative, positive) = (values[0], values[1]);
                let split = negative > MASS_TOLERANCE && positive > MASS_TOLERANCE;
                let friction = if split {
                    values[2] / (negative + positive)
                } else {
                    0.0
                };
                node.assign_discontinuity_state(split, &values[3..], friction);
            });
        }

        let block = 1 + dim;
        let width = if enriched { 3 * block } else { block };
        let mut mass_momentum = map_to_nodes(mesh.particles(), nnodes, width, |p, buf| {
            p.map_mass_momentum(buf, enriched)
        });
        mass_momentum.halo_merge(comm)?;
        mesh.iterate_over_nodes(|node| {
            let values = mass_momentum.node(node.id());
            node.update_mass(values[0]);
            node.update_momentum(&values[1..block]);
            if enriched {
                for side in [Side::Negative, Side::Positive] {
                    let offset = block * (1 + side as usize);
                    node.update_side_mass_momentum(
                        side,
                        values[offset],
                        &values[offset + 1..offset + block],
                    );
                }
            }
            let active = node.is_active() || node.mass() > MASS_TOLERANCE;
            node.set_active(active);
            node.compute_velocity();
        });

        // 4. Multimaterial interface
        if self.analysis.interface {
            let ids: Vec<usize> = self.materials.keys().copied().collect();
            let buffer = map_multimaterial(comm, mesh.particles(), nnodes, dim, &ids)?;
            assign_multimaterial(mesh.nodes_mut(), &buffer, &ids);
            mesh.iterate_over_nodes(compute_multimaterial_coupling);
        }

        // 5. Update stress first
        if self.analysis.stress_update == StressUpdate::Usf {
            update_stress(
                comm,
                mesh,
                &self.materials,
                &self.linear_solver,
                &self.linear_solver_config,
                self.analysis.pressure_smoothing,
                dt,
            )?;
        }

        // 6. External | internal force
        let force_width = if enriched { 3 * dim } else { dim };
        let gravity = &self.gravity;
        let particles = mesh.particles();
        let (mut external, mut internal) = rayon::join(
            || {
                map_to_nodes(particles, nnodes, force_width, |p, buf| {
                    p.map_external_force(buf, gravity, enriched)
                })
            },
            || {
                map_to_nodes(particles, nnodes, force_width, |p, buf| {
                    p.map_internal_force(buf, enriched)
                })
            },
        );
        external.halo_merge(comm)?;
        internal.halo_merge(comm)?;
        let force = external.merged(&internal);
        mesh.iterate_over_nodes(|node| {
            let values = force.node(node.id());
            node.update_force(&values[..dim]);
            if enriched {
                node.update_side_force(Side::Negative, &values[dim..2 * dim]);
                node.update_side_force(Side::Positive, &values[2 * dim..]);
            }
        });

        // 7. Integrate
        mesh.iterate_over_nodes_predicate(
            |node| node.compute_acceleration_velocity(dt),
            |node| node.is_active(),
        );

        // 8. Particle kinematics
        {
            let scheme = self.analysis.velocity_update;
            let MeshParts {
                nodes, particles, ..
            } = mesh.parts_mut();
            let nodes: &[Node] = nodes;
            particles
                .par_iter_mut()
                .for_each(|p| p.compute_updated_position(nodes, dt, scheme));
        }
        mesh.apply_particle_velocity_constraints();

        // 9. Update stress last
        if self.analysis.stress_update == StressUpdate::Usl {
            update_stress(
                comm,
                mesh,
                &self.materials,
                &self.linear_solver,
                &self.linear_solver_config,
                self.analysis.pressure_smoothing,
                dt,
            )?;
        }

        // 10. Relocate
        locate_particles(comm, mesh, strict)?;

        // 11. Migrate
        if comm.is_distributed() {
            mesh.transfer_halo_particles(comm, partition)?;
        }

        // 12. Output
        if clock.on_stride(self.analysis.output_steps) {
            let summary =
                StepSummary::collect(comm, mesh, clock.step + 1, clock.nsteps, time + dt)?;
            dispatch(&mut self.sinks, &summary, mesh);
        }
        log::debug!("step {} done, {} particle(s)", clock.step, mesh.nparticles());
        Ok(())
    }
}

/// Strain, volume, optional pressure smoothing, then stress.
fn update_stress<C: Communicator>(
    comm: &C,
    mesh: &mut Mesh,
    materials: &BTreeMap<usize, Material>,
    solver: &DistributedLinearSolver,
    config: &LinearSolverConfig,
    pressure_smoothing: bool,
    dt: f64,
) -> Result<()> {
    let MeshParts {
        nodes, particles, ..
    } = mesh.parts_mut();
    let nodes: &[Node] = nodes;
    particles.par_iter_mut().for_each(|p| {
        p.compute_strain(nodes, dt);
        p.update_volume();
    });
    if pressure_smoothing {
        smooth_pressure(comm, solver, &config.method, config.divergence, nodes, particles)?;
    }
    particles.par_iter_mut().for_each(|p| {
        if let Some(material) = materials.get(&p.material_id) {
            p.compute_stress(material);
        }
    });
    Ok(())
}
