//! Background-grid node: per-DOF kinematic state.
//!
//! Every nodal field is a vector of length `dof`. Assignments with any other
//! length are rejected with [`DimensionMismatch`]: the field is left untouched
//! and a warning is logged. Accumulators are zeroed by [`Node::initialise`]
//! at the start of every step.
//!
//! Two optional extensions hang off a node:
//!
//! - discontinuity enrichment ([`Enrichment`]): when particles on both sides
//!   of an embedded surface share the node, each side keeps its own mass,
//!   momentum and force and is integrated separately, followed by frictional
//!   contact between the sides;
//! - multimaterial interface state ([`MaterialInterface`]), one entry per
//!   material id touching the node.

use crate::error::{DimensionMismatch, Error, Result};
use crate::types::Vector;
use std::collections::BTreeMap;

/// Below this mass a node (or a side of a node) carries no kinematics.
pub const MASS_TOLERANCE: f64 = f64::EPSILON;

/// Side of a discontinuity, from the sign of the level set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Negative = 0,
    Positive = 1,
}

impl Side {
    pub fn of(levelset: f64) -> Self {
        if levelset < 0.0 {
            Side::Negative
        } else {
            Side::Positive
        }
    }
}

/// Kinematic state of one side of a split node.
#[derive(Debug, Clone, PartialEq)]
pub struct SideState {
    pub mass: f64,
    pub momentum: Vector,
    pub force: Vector,
    pub velocity: Vector,
    pub acceleration: Vector,
}

impl SideState {
    fn zeros(dof: usize) -> Self {
        Self {
            mass: 0.0,
            momentum: Vector::zeros(dof),
            force: Vector::zeros(dof),
            velocity: Vector::zeros(dof),
            acceleration: Vector::zeros(dof),
        }
    }

    fn reset(&mut self) {
        self.mass = 0.0;
        self.momentum.fill(0.0);
        self.force.fill(0.0);
        self.velocity.fill(0.0);
        self.acceleration.fill(0.0);
    }
}

/// Discontinuity enrichment of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub sides: [SideState; 2],
    /// Unit normal of the discontinuity, pointing towards the positive side.
    pub normal: Vector,
    pub friction: f64,
    pub split: bool,
}

/// Per-material nodal data used for multimaterial contact.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInterface {
    pub mass: f64,
    pub momentum: Vector,
    /// Mass-weighted particle coordinates.
    pub displacement: Vector,
    /// Σ V_p ∇N_i over this material's particles.
    pub domain_gradient: Vector,
    pub momentum_change: Vector,
    pub separation: Vector,
    /// Unit outward normal of this material.
    pub normal: Vector,
    /// True when this material exchanges momentum with the others here.
    pub coupled: bool,
}

impl MaterialInterface {
    pub fn new(dof: usize) -> Self {
        Self {
            mass: 0.0,
            momentum: Vector::zeros(dof),
            displacement: Vector::zeros(dof),
            domain_gradient: Vector::zeros(dof),
            momentum_change: Vector::zeros(dof),
            separation: Vector::zeros(dof),
            normal: Vector::zeros(dof),
            coupled: true,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.momentum.len());
    }

    /// Velocity of this material alone.
    pub fn velocity(&self) -> Option<Vector> {
        (self.mass > MASS_TOLERANCE).then(|| &self.momentum / self.mass)
    }
}

/// A mesh node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: usize,
    coordinates: Vector,
    dof: usize,
    active: bool,
    mass: f64,
    momentum: Vector,
    force: Vector,
    velocity: Vector,
    acceleration: Vector,
    velocity_constraints: Vec<(usize, f64)>,
    enrichment: Option<Box<Enrichment>>,
    interface: BTreeMap<usize, MaterialInterface>,
}

impl Node {
    /// Create a node with `dof` degrees of freedom, all fields zero.
    pub fn new(id: usize, coordinates: Vector, dof: usize) -> Self {
        Self {
            id,
            coordinates,
            dof,
            active: false,
            mass: 0.0,
            momentum: Vector::zeros(dof),
            force: Vector::zeros(dof),
            velocity: Vector::zeros(dof),
            acceleration: Vector::zeros(dof),
            velocity_constraints: Vec::new(),
            enrichment: None,
            interface: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn coordinates(&self) -> &Vector {
        &self.coordinates
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn momentum(&self) -> &Vector {
        &self.momentum
    }

    pub fn force(&self) -> &Vector {
        &self.force
    }

    pub fn velocity(&self) -> &Vector {
        &self.velocity
    }

    pub fn acceleration(&self) -> &Vector {
        &self.acceleration
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Zero every accumulator and kinematic field; deactivate the node.
    pub fn initialise(&mut self) {
        self.active = false;
        self.mass = 0.0;
        self.momentum.fill(0.0);
        self.force.fill(0.0);
        self.velocity.fill(0.0);
        self.acceleration.fill(0.0);
        if let Some(enrichment) = self.enrichment.as_mut() {
            enrichment.sides.iter_mut().for_each(SideState::reset);
            enrichment.normal.fill(0.0);
            enrichment.friction = 0.0;
            enrichment.split = false;
        }
        self.interface.values_mut().for_each(MaterialInterface::reset);
    }

    fn check_len(&self, field: &str, values: &[f64]) -> std::result::Result<(), DimensionMismatch> {
        if values.len() == self.dof {
            return Ok(());
        }
        let mismatch = DimensionMismatch {
            expected: self.dof,
            actual: values.len(),
        };
        log::warn!("node {}: {} not assigned, {}", self.id, field, mismatch);
        Err(mismatch)
    }

    pub fn assign_force(&mut self, force: &[f64]) -> std::result::Result<(), DimensionMismatch> {
        self.check_len("force", force)?;
        self.force.copy_from_slice(force);
        Ok(())
    }

    pub fn assign_velocity(&mut self, velocity: &[f64]) -> std::result::Result<(), DimensionMismatch> {
        self.check_len("velocity", velocity)?;
        self.velocity.copy_from_slice(velocity);
        Ok(())
    }

    pub fn assign_momentum(&mut self, momentum: &[f64]) -> std::result::Result<(), DimensionMismatch> {
        self.check_len("momentum", momentum)?;
        self.momentum.copy_from_slice(momentum);
        Ok(())
    }

    pub fn assign_acceleration(
        &mut self,
        acceleration: &[f64],
    ) -> std::result::Result<(), DimensionMismatch> {
        self.check_len("acceleration", acceleration)?;
        self.acceleration.copy_from_slice(acceleration);
        Ok(())
    }

    pub fn update_mass(&mut self, mass: f64) {
        self.mass += mass;
    }

    pub fn update_momentum(&mut self, momentum: &[f64]) {
        for (p, dp) in self.momentum.iter_mut().zip(momentum) {
            *p += dp;
        }
    }

    pub fn update_force(&mut self, force: &[f64]) {
        for (f, df) in self.force.iter_mut().zip(force) {
            *f += df;
        }
    }

    /// Prescribe velocity `value` along `direction`.
    pub fn assign_velocity_constraint(&mut self, direction: usize, value: f64) -> Result<()> {
        if direction >= self.dof {
            return Err(Error::Config(format!(
                "node {}: velocity constraint direction {} >= dof {}",
                self.id, direction, self.dof
            )));
        }
        self.velocity_constraints.retain(|(dir, _)| *dir != direction);
        self.velocity_constraints.push((direction, value));
        Ok(())
    }

    fn apply_velocity_constraints(&mut self) {
        for &(dir, value) in &self.velocity_constraints {
            self.velocity[dir] = value;
            self.acceleration[dir] = 0.0;
            if let Some(enrichment) = self.enrichment.as_mut() {
                for side in enrichment.sides.iter_mut() {
                    side.velocity[dir] = value;
                    side.acceleration[dir] = 0.0;
                }
            }
        }
    }

    /// v = p / m (and per side for split nodes).
    pub fn compute_velocity(&mut self) {
        if self.mass > MASS_TOLERANCE {
            self.velocity = &self.momentum / self.mass;
        }
        if let Some(enrichment) = self.enrichment.as_mut() {
            for side in enrichment.sides.iter_mut() {
                if side.mass > MASS_TOLERANCE {
                    side.velocity = &side.momentum / side.mass;
                }
            }
        }
        self.apply_velocity_constraints();
    }

    /// a = f / m, v += a dt. Split nodes integrate each side and then resolve
    /// contact between them.
    pub fn compute_acceleration_velocity(&mut self, dt: f64) {
        if self.mass > MASS_TOLERANCE {
            self.acceleration = &self.force / self.mass;
            self.velocity += &self.acceleration * dt;
        }

        if let Some(enrichment) = self.enrichment.as_mut() {
            if enrichment.split {
                for side in enrichment.sides.iter_mut() {
                    if side.mass > MASS_TOLERANCE {
                        side.acceleration = &side.force / side.mass;
                        side.velocity += &side.acceleration * dt;
                    }
                }
                enrichment.apply_contact(dt);
            }
        }
        self.apply_velocity_constraints();
    }

    /// Velocity and acceleration seen by a particle on `side` of the
    /// discontinuity (regular fields unless the node is split).
    pub fn kinematics(&self, side: Option<Side>) -> (&Vector, &Vector) {
        match (self.enrichment.as_deref(), side) {
            (Some(enrichment), Some(side)) if enrichment.split => {
                let state = &enrichment.sides[side as usize];
                if state.mass > MASS_TOLERANCE {
                    return (&state.velocity, &state.acceleration);
                }
                (&self.velocity, &self.acceleration)
            }
            _ => (&self.velocity, &self.acceleration),
        }
    }

    /// Allocate enrichment storage.
    pub fn create_discontinuity_properties(&mut self) {
        if self.enrichment.is_none() {
            self.enrichment = Some(Box::new(Enrichment {
                sides: [SideState::zeros(self.dof), SideState::zeros(self.dof)],
                normal: Vector::zeros(self.dof),
                friction: 0.0,
                split: false,
            }));
        }
    }

    pub fn enrichment(&self) -> Option<&Enrichment> {
        self.enrichment.as_deref()
    }

    pub fn is_split(&self) -> bool {
        self.enrichment.as_ref().is_some_and(|e| e.split)
    }

    /// Record whether both sides of the discontinuity meet at this node.
    ///
    /// `normal` need not be normalised; a zero normal leaves the node unsplit.
    pub fn assign_discontinuity_state(&mut self, split: bool, normal: &[f64], friction: f64) {
        let Some(enrichment) = self.enrichment.as_mut() else {
            return;
        };
        let n = Vector::from_column_slice(normal);
        let norm = n.norm();
        if split && norm > 0.0 {
            enrichment.normal = n / norm;
            enrichment.split = true;
        } else {
            enrichment.normal.fill(0.0);
            enrichment.split = false;
        }
        enrichment.friction = friction;
    }

    pub fn update_side_mass_momentum(&mut self, side: Side, mass: f64, momentum: &[f64]) {
        if let Some(enrichment) = self.enrichment.as_mut() {
            let state = &mut enrichment.sides[side as usize];
            state.mass += mass;
            for (p, dp) in state.momentum.iter_mut().zip(momentum) {
                *p += dp;
            }
        }
    }

    pub fn update_side_force(&mut self, side: Side, force: &[f64]) {
        if let Some(enrichment) = self.enrichment.as_mut() {
            for (f, df) in enrichment.sides[side as usize].force.iter_mut().zip(force) {
                *f += df;
            }
        }
    }

    /// Allocate per-material interface storage for `material_ids`.
    pub fn create_interface_properties(&mut self, material_ids: &[usize]) {
        for &id in material_ids {
            self.interface
                .entry(id)
                .or_insert_with(|| MaterialInterface::new(self.dof));
        }
    }

    /// Number of materials with mass at this node.
    pub fn nmaterials(&self) -> usize {
        self.interface
            .values()
            .filter(|state| state.mass > MASS_TOLERANCE)
            .count()
    }

    pub fn interface(&self) -> &BTreeMap<usize, MaterialInterface> {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut BTreeMap<usize, MaterialInterface> {
        &mut self.interface
    }

    /// Velocity a particle of `material_id` should see from the interface
    /// state, or `None` when the regular field applies.
    pub fn decoupled_velocity(&self, material_id: usize) -> Option<Vector> {
        if self.nmaterials() < 2 {
            return None;
        }
        let state = self.interface.get(&material_id)?;
        if state.coupled {
            return None;
        }
        state.velocity()
    }
}

impl Enrichment {
    /// Frictional contact between the two sides of a split node.
    ///
    /// A side whose velocity relative to the centre of mass points along its
    /// outward normal is penetrating: the normal component is removed and the
    /// tangential slip is reduced by at most `friction` times that amount.
    fn apply_contact(&mut self, dt: f64) {
        let [negative, positive] = &self.sides;
        let total = negative.mass + positive.mass;
        if negative.mass <= MASS_TOLERANCE || positive.mass <= MASS_TOLERANCE {
            return;
        }
        let v_cm = (&negative.velocity * negative.mass + &positive.velocity * positive.mass) / total;
        let outward = [self.normal.clone(), -&self.normal];

        for (side, n) in self.sides.iter_mut().zip(outward.iter()) {
            let dv = &side.velocity - &v_cm;
            let dn = dv.dot(n);
            if dn <= 0.0 {
                continue;
            }
            let tangential = &dv - n * dn;
            let t_norm = tangential.norm();
            let mut correction = n * dn;
            if t_norm > 0.0 {
                correction += &tangential * ((self.friction * dn).min(t_norm) / t_norm);
            }
            side.velocity -= &correction;
            if dt > 0.0 {
                side.acceleration -= &correction / dt;
            }
        }
    }
}
