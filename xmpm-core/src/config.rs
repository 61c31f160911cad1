//! Input sections that drive a run.
//!
//! Each section is a `serde` struct read through [`Io`](crate::io::Io).
//! Keys with a meaningful default may be omitted; `analysis.locate_particles`
//! has none and must always be given.

use crate::discontinuity::DiscontinuityConfig;
use crate::error::{Error, Result};
use crate::mesh::ParticleSet;
use crate::particle::VelocityUpdate;
use serde::Deserialize;

/// When the constitutive update runs relative to force mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StressUpdate {
    /// Update stress first, before the internal force is mapped.
    #[default]
    Usf,
    /// Update stress last, after particles have moved.
    Usl,
}

/// Restart from a checkpointed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct ResumeConfig {
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub step: usize,
}

/// `analysis` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub dt: f64,
    pub nsteps: usize,
    #[serde(default = "default_output_steps")]
    pub output_steps: usize,
    #[serde(default)]
    pub stress_update: StressUpdate,
    #[serde(default)]
    pub velocity_update: VelocityUpdate,
    /// Unlocatable particles are fatal when true and dropped when false.
    pub locate_particles: bool,
    /// Rebalance the domain every this many steps; 0 disables.
    #[serde(default)]
    pub nload_balance_steps: usize,
    #[serde(default)]
    pub gravity: Vec<f64>,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub pressure_smoothing: bool,
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub discontinuity: Vec<DiscontinuityConfig>,
}

fn default_output_steps() -> usize {
    1
}

impl AnalysisConfig {
    pub fn validate(&self, dim: usize) -> Result<()> {
        if !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(Error::Config(format!("analysis.dt must be positive, got {}", self.dt)));
        }
        if self.output_steps == 0 {
            return Err(Error::Config("analysis.output_steps must be at least 1".to_string()));
        }
        if !self.gravity.is_empty() && self.gravity.len() != dim {
            return Err(Error::Config(format!(
                "analysis.gravity has {} components, mesh is {dim}D",
                self.gravity.len()
            )));
        }
        if self.resume.resume && self.resume.step > self.nsteps {
            return Err(Error::Config(format!(
                "resume step {} is beyond nsteps {}",
                self.resume.step, self.nsteps
            )));
        }
        if let VelocityUpdate::Blend(alpha) = self.velocity_update {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::Config(format!(
                    "velocity_update blend must be in [0, 1], got {alpha}"
                )));
            }
        }
        Ok(())
    }

    /// Gravity as a `dim` vector (zero when not given).
    pub fn gravity_vector(&self, dim: usize) -> crate::types::Vector {
        if self.gravity.is_empty() {
            crate::types::Vector::zeros(dim)
        } else {
            crate::types::Vector::from_column_slice(&self.gravity)
        }
    }

    /// First step to run.
    pub fn start_step(&self) -> usize {
        if self.resume.resume {
            self.resume.step
        } else {
            0
        }
    }
}

/// Regular lattice of particles filling a box, one per `spacing` cell.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxGenerator {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub spacing: Vec<f64>,
}

impl BoxGenerator {
    /// Particle centres and the volume each represents.
    pub fn generate(&self) -> Result<(Vec<Vec<f64>>, f64)> {
        let dim = self.min.len();
        if self.max.len() != dim || self.spacing.len() != dim {
            return Err(Error::Config(
                "generator min, max and spacing must have equal length".to_string(),
            ));
        }
        if self.spacing.iter().any(|h| !(*h > 0.0)) {
            return Err(Error::Config("generator spacing must be positive".to_string()));
        }
        let counts: Vec<usize> = (0..dim)
            .map(|a| (((self.max[a] - self.min[a]) / self.spacing[a]) + 1e-9).floor().max(0.0) as usize)
            .collect();
        let total: usize = counts.iter().product();
        let mut points = Vec::with_capacity(total);
        for mut k in 0..total {
            let mut point = Vec::with_capacity(dim);
            for a in 0..dim {
                let i = k % counts[a];
                k /= counts[a];
                point.push(self.min[a] + (i as f64 + 0.5) * self.spacing[a]);
            }
            points.push(point);
        }
        Ok((points, self.spacing.iter().product()))
    }
}

/// One entry of the `particles` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticleSetConfig {
    pub material_id: usize,
    #[serde(default)]
    pub coordinates: Vec<Vec<f64>>,
    /// Volume of each listed particle; required with `coordinates`.
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub generator: Option<BoxGenerator>,
    #[serde(default)]
    pub velocity: Option<Vec<f64>>,
    /// Particles of this set enter the simulation at this time.
    #[serde(default)]
    pub injection_time: Option<f64>,
}

impl ParticleSetConfig {
    /// Coordinates and per-particle volume.
    pub fn points(&self) -> Result<(Vec<Vec<f64>>, f64)> {
        let mut points = self.coordinates.clone();
        let mut volume = self.volume;
        if let Some(generator) = &self.generator {
            let (generated, generated_volume) = generator.generate()?;
            if !points.is_empty() && volume.is_some_and(|v| v != generated_volume) {
                return Err(Error::Config(
                    "particle set mixes coordinates and a generator with different volumes"
                        .to_string(),
                ));
            }
            points.extend(generated);
            volume = Some(generated_volume);
        }
        let volume = volume.ok_or_else(|| {
            Error::Config(format!(
                "particle set of material {} has no volume",
                self.material_id
            ))
        })?;
        Ok((points, volume))
    }
}

/// Traction on a particle set.
#[derive(Debug, Clone, Deserialize)]
pub struct TractionConfig {
    pub set: ParticleSet,
    pub direction: usize,
    pub traction: f64,
    #[serde(default)]
    pub ramp_time: f64,
}

/// Prescribed velocity on a particle set.
#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConstraintConfig {
    pub set: ParticleSet,
    pub direction: usize,
    pub velocity: f64,
}

/// `loads` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoadsConfig {
    #[serde(default)]
    pub particle_tractions: Vec<TractionConfig>,
    #[serde(default)]
    pub particle_velocity_constraints: Vec<VelocityConstraintConfig>,
}
