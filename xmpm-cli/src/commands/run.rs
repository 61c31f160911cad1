//! `xmpm run`

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use xmpm_core::{
    Communicator, ExplicitSolver, Io, JsonLinesSink, LogSummary, SingleProcess,
    ThreadCommunicator,
};

#[derive(Args)]
pub struct RunArgs {
    /// JSON input file
    pub input: PathBuf,

    /// Number of in-process ranks
    #[arg(short, long, default_value_t = 1)]
    pub ranks: usize,

    /// Append one JSON line per output step to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Seconds a rank waits in a collective before failing
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

pub fn execute(args: RunArgs) -> Result<()> {
    if args.ranks == 0 {
        bail!("--ranks must be at least 1");
    }
    let io = Io::from_file(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let summary = args.summary.as_deref();
    let start = Instant::now();

    if args.ranks == 1 {
        run_rank(io, SingleProcess, summary)?;
    } else {
        let ranks =
            ThreadCommunicator::group_with_timeout(args.ranks, Duration::from_secs(args.timeout));
        let results: Vec<Result<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|comm| {
                    let io = io.clone();
                    s.spawn(move || run_rank(io, comm, summary))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("rank panicked"))))
                .collect()
        });
        for (rank, result) in results.into_iter().enumerate() {
            result.with_context(|| format!("rank {rank} failed"))?;
        }
    }

    log::info!(
        "finished on {} rank(s) in {:.2} s",
        args.ranks,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_rank<C: Communicator>(io: Io, comm: C, summary: Option<&Path>) -> Result<()> {
    let rank = comm.rank();
    let mut solver = ExplicitSolver::new(io, comm)?;
    if rank == 0 {
        solver.add_output_sink(Box::new(LogSummary));
        if let Some(path) = summary {
            solver.add_output_sink(Box::new(JsonLinesSink::create(path)?));
        }
    }
    solver.solve()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::write_input;

    #[test]
    fn test_run_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4);
        let summary = dir.path().join("summary.jsonl");
        execute(RunArgs {
            input,
            ranks: 1,
            summary: Some(summary.clone()),
            timeout: 30,
        })
        .unwrap();
        let text = std::fs::read_to_string(summary).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["step"], 4);
        assert_eq!(last["nparticles"], 32);
    }

    #[test]
    fn test_run_on_two_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4);
        let summary = dir.path().join("summary.jsonl");
        execute(RunArgs {
            input,
            ranks: 2,
            summary: Some(summary.clone()),
            timeout: 30,
        })
        .unwrap();
        let text = std::fs::read_to_string(summary).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = execute(RunArgs {
            input: dir.path().join("absent.json"),
            ranks: 1,
            summary: None,
            timeout: 30,
        });
        assert!(result.is_err());
    }
}
