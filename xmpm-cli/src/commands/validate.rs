//! `xmpm validate`

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use xmpm_core::{ExplicitSolver, Io, SingleProcess};

#[derive(Args)]
pub struct ValidateArgs {
    /// JSON input file
    pub input: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let io = Io::from_file(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let mut solver = ExplicitSolver::new(io, SingleProcess)?;
    solver
        .initialise()
        .with_context(|| format!("{} is not a valid input", args.input.display()))?;

    let Some(mesh) = solver.mesh() else {
        anyhow::bail!("mesh missing after initialisation");
    };
    println!("input: {}", args.input.display());
    println!(
        "  mesh: {}D, {} nodes, {} cells",
        mesh.dim(),
        mesh.nnodes(),
        mesh.grid().ncells()
    );
    println!("  materials: {}", solver.materials().len());
    println!(
        "  particles: {} ({} scheduled for injection)",
        mesh.nparticles(),
        mesh.npending()
    );
    println!("  discontinuities: {}", solver.discontinuities().len());
    for (id, surface) in solver.discontinuities() {
        println!(
            "    {id}: {:?}, {} element(s), friction {}",
            surface.kind(),
            surface.nelements(),
            surface.frictional_coefficient()
        );
    }
    println!(
        "  steps: {} from step {} (dt = {:e})",
        solver.clock().nsteps,
        solver.clock().step,
        solver.clock().dt
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::write_input;

    #[test]
    fn test_valid_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 1);
        execute(ValidateArgs { input }).unwrap();
    }

    #[test]
    fn test_invalid_input_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 1);
        std::fs::remove_file(dir.path().join("crack.txt")).unwrap();
        let err = execute(ValidateArgs { input }).unwrap_err();
        assert!(format!("{err:#}").contains("discontinuity"));
    }
}
