//! XMPM Core - explicit Material Point Method with embedded discontinuities
//!
//! Explicit MPM library with:
//! - Particle ↔ node transfers on a structured background grid
//! - Crack and interface discontinuities with per-side nodal kinematics
//! - Multimaterial contact at shared nodes
//! - Rank-replicated grids with collective halo merges and particle migration
//! - A distributed conjugate-gradient solve for consistent-mass projections
//!
//! # Architecture
//!
//! - [`ExplicitSolver`]: stage-checked initialisation and the step loop
//! - [`Mesh`]: grid, nodes, cells and this rank's particles
//! - [`Communicator`]: collectives over ranks ([`SingleProcess`],
//!   [`ThreadCommunicator`])
//! - [`DistributedLinearSolver`]: Krylov solve over row-partitioned systems
//! - [`DiscontinuitySurface`]: level-set geometry of a crack or interface

pub mod assembly;
pub mod comm;
pub mod config;
pub mod discontinuity;
pub mod element;
pub mod error;
pub mod halo;
pub mod interface;
pub mod io;
pub mod linear_solver;
pub mod material;
pub mod mesh;
pub mod mpm_explicit;
pub mod node;
pub mod output;
pub mod particle;
pub mod partition;
pub mod smoothing;
pub mod sparse;
pub mod state;
pub mod types;

pub use comm::{Communicator, SingleProcess, ThreadCommunicator};
pub use config::AnalysisConfig;
pub use discontinuity::{DiscontinuitySurface, DiscontinuityType};
pub use error::{DimensionMismatch, Error, Result};
pub use io::Io;
pub use linear_solver::{DistributedLinearSolver, LinearSolverConfig, SolveStatus};
pub use material::Material;
pub use mesh::Mesh;
pub use mpm_explicit::ExplicitSolver;
pub use node::Node;
pub use output::{JsonLinesSink, LogSummary, OutputSink, StepSummary};
pub use particle::Particle;
pub use sparse::CsrMatrix;
pub use state::{SimulationClock, SolverStage};
pub use types::{StrainTensor, StressTensor};
