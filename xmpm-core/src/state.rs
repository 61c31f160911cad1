//! Simulation clock and initialisation stages.

use crate::error::{Error, Result};
use std::fmt;

/// Step counter paired with the fixed time increment.
///
/// Owned by the solver and passed explicitly into each step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    pub step: usize,
    pub nsteps: usize,
    pub dt: f64,
}

impl SimulationClock {
    pub fn new(start_step: usize, nsteps: usize, dt: f64) -> Self {
        Self {
            step: start_step,
            nsteps,
            dt,
        }
    }

    /// Time at the start of the current step.
    pub fn time(&self) -> f64 {
        self.step as f64 * self.dt
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.nsteps
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    /// True when `stride` divides the step just completed.
    pub fn on_stride(&self, stride: usize) -> bool {
        stride > 0 && (self.step + 1) % stride == 0
    }
}

/// Explicit-solver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SolverStage {
    Uninitialized,
    MaterialsReady,
    MeshReady,
    ParticlesReady,
    LoadsReady,
    DiscontinuitiesReady,
    LevelsetReady,
    Stepping,
    Finished,
}

impl fmt::Display for SolverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverStage::Uninitialized => "uninitialized",
            SolverStage::MaterialsReady => "materials ready",
            SolverStage::MeshReady => "mesh ready",
            SolverStage::ParticlesReady => "particles ready",
            SolverStage::LoadsReady => "loads ready",
            SolverStage::DiscontinuitiesReady => "discontinuities ready",
            SolverStage::LevelsetReady => "level set ready",
            SolverStage::Stepping => "stepping",
            SolverStage::Finished => "finished",
        };
        f.write_str(name)
    }
}

impl SolverStage {
    /// Move to `next`, which must be entered from `required`.
    pub fn transition(&mut self, required: SolverStage, next: SolverStage) -> Result<()> {
        if *self != required {
            return Err(Error::Stage(format!(
                "cannot enter '{next}' from '{self}', expected '{required}'"
            )));
        }
        log::info!("stage: {next}");
        *self = next;
        Ok(())
    }

    /// Check that at least `minimum` has been reached and stepping has not
    /// started.
    pub fn require_between(&self, minimum: SolverStage, maximum: SolverStage) -> Result<()> {
        if *self < minimum || *self > maximum {
            return Err(Error::Stage(format!(
                "operation needs a stage between '{minimum}' and '{maximum}', currently '{self}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clock() {
        let mut clock = SimulationClock::new(3, 5, 0.5);
        assert_relative_eq!(clock.time(), 1.5);
        assert!(!clock.is_finished());
        assert!(clock.on_stride(2));
        assert!(!clock.on_stride(0));
        clock.advance();
        clock.advance();
        assert!(clock.is_finished());
    }

    #[test]
    fn test_transitions_in_order() {
        let mut stage = SolverStage::Uninitialized;
        stage
            .transition(SolverStage::Uninitialized, SolverStage::MaterialsReady)
            .unwrap();
        let err = stage
            .transition(SolverStage::ParticlesReady, SolverStage::LoadsReady)
            .unwrap_err();
        assert!(matches!(err, Error::Stage(_)));
        assert_eq!(stage, SolverStage::MaterialsReady);
    }

    #[test]
    fn test_require_between() {
        let stage = SolverStage::LoadsReady;
        assert!(stage
            .require_between(SolverStage::ParticlesReady, SolverStage::LevelsetReady)
            .is_ok());
        assert!(stage
            .require_between(SolverStage::DiscontinuitiesReady, SolverStage::LevelsetReady)
            .is_err());
    }
}
