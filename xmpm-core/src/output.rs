//! Periodic output.
//!
//! The solver builds a [`StepSummary`] (collectively, so every rank sees
//! global totals) every `output_steps` steps and hands it to each attached
//! [`OutputSink`]. A failing sink is logged and skipped; it never touches
//! simulation state.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Global totals at an output step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepSummary {
    pub step: usize,
    pub nsteps: usize,
    pub time: f64,
    pub nparticles: usize,
    pub mass: f64,
    pub kinetic_energy: f64,
}

impl StepSummary {
    /// Reduce this rank's particle totals over all ranks.
    pub fn collect<C: Communicator>(
        comm: &C,
        mesh: &Mesh,
        step: usize,
        nsteps: usize,
        time: f64,
    ) -> Result<Self> {
        let particles = mesh.particles();
        let mut totals = [
            particles.len() as f64,
            particles.iter().map(|p| p.mass).sum(),
            particles.iter().map(|p| p.kinetic_energy()).sum(),
        ];
        comm.all_reduce_sum(&mut totals)?;
        Ok(Self {
            step,
            nsteps,
            time,
            nparticles: totals[0].round() as usize,
            mass: totals[1],
            kinetic_energy: totals[2],
        })
    }
}

/// Receiver of periodic output.
pub trait OutputSink: Send {
    fn write(&mut self, summary: &StepSummary, mesh: &Mesh) -> Result<()>;
}

/// Logs each summary at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSummary;

impl OutputSink for LogSummary {
    fn write(&mut self, summary: &StepSummary, _mesh: &Mesh) -> Result<()> {
        log::info!(
            "step {}/{} t = {:.6e}: {} particles, mass {:.6e}, kinetic energy {:.6e}",
            summary.step,
            summary.nsteps,
            summary.time,
            summary.nparticles,
            summary.mass,
            summary.kinetic_energy
        );
        Ok(())
    }
}

/// Appends one JSON object per output step to a file.
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            Error::Config(format!("cannot create output file {}: {}", path.display(), e))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl OutputSink for JsonLinesSink {
    fn write(&mut self, summary: &StepSummary, _mesh: &Mesh) -> Result<()> {
        serde_json::to_writer(&mut self.writer, summary)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Write `summary` to every sink, logging failures.
///
/// Returns the number of sinks that failed.
pub fn dispatch(sinks: &mut [Box<dyn OutputSink>], summary: &StepSummary, mesh: &Mesh) -> usize {
    let mut failures = 0;
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.write(summary, mesh) {
            log::warn!("output at step {} failed: {}", summary.step, e);
            failures += 1;
        }
    }
    failures
}
