//! Error types for xmpm operations.
//!
//! [`Error`] is the fatal channel: anything returned through it aborts the
//! run when it reaches [`ExplicitSolver::solve`](crate::mpm_explicit::ExplicitSolver::solve).
//! Soft conditions are ordinary values ([`DimensionMismatch`],
//! [`SolveStatus`](crate::linear_solver::SolveStatus)) that callers may
//! escalate if they choose.

use thiserror::Error;

/// Result type alias using the xmpm [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors.
#[derive(Error, Debug)]
pub enum Error {
    /// An initialisation stage was entered out of order or failed.
    #[error("stage error: {0}")]
    Stage(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Mesh construction or lookup errors.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Particle construction or lookup errors.
    #[error("particle error: {0}")]
    Particle(String),

    /// Particles outside the mesh while strict location is enabled.
    #[error("{} particle(s) could not be located in the mesh: {ids:?}", .ids.len())]
    UnlocatableParticles { ids: Vec<usize> },

    /// Invalid material properties or unknown material id.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Discontinuity set-up errors.
    #[error("discontinuity error: {0}")]
    Discontinuity(String),

    /// Two discontinuities share an id.
    #[error("duplicate discontinuity id {0}")]
    DuplicateDiscontinuity(usize),

    /// Distributed system assembly errors.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// Linear solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// A Krylov method name the solver does not implement.
    #[error("unsupported linear solver method '{0}'")]
    UnsupportedMethod(String),

    /// A linear solve diverged and the caller escalated it.
    #[error("linear solve diverged ({reason}) after {iterations} iterations (residual: {residual:.3e})")]
    Divergence {
        reason: String,
        iterations: usize,
        residual: f64,
    },

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// Collective communication failed or timed out.
    #[error("communication error: {0}")]
    Communication(String),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors (mesh files, input files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A vector assigned to a nodal field has the wrong number of components.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dimension mismatch: expected {expected} components, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}
