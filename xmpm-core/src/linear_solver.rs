//! Distributed Krylov solve.
//!
//! Each rank owns a locally assembled sparse system `A_local x_local = b_local`
//! together with a *mapper* from local indices to the global DOF numbering.
//! [`DistributedLinearSolver::solve`] turns those pieces into one global
//! system, solves it with a row-distributed conjugate gradient and returns
//! the solution in local order on every rank.
//!
//! # Pipeline
//!
//! 1. Validate the local system and the mapper on every rank; all ranks fail
//!    together if any rank's input is malformed.
//! 2. Scatter every local nonzero to `(mapper[row], mapper[col])` and every
//!    RHS entry to `mapper[row]`. Contributions to the same global entry are
//!    summed, never overwritten.
//! 3. Each rank keeps the global rows in its ownership range (contiguous,
//!    near-equal blocks).
//! 4. Barrier, then CG: mat-vec through an all-gather of the search
//!    direction, dot products through rank-ordered all-reduces.
//! 5. All-gather the solution and index it back through the mapper.
//!
//! A diverged solve is NOT an error: the vector comes back with a negative
//! [`ConvergedReason`] and a warning is logged. Callers decide whether to
//! escalate via [`LinearSolution::into_converged`].

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::sparse::{CsrMatrix, DenseAccumulator, Triplet, TripletMatrix};
use faer::linalg::cholesky::llt::factor::LltError;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, Triplet as FaerTriplet};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Krylov methods understood by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrylovMethod {
    /// Conjugate gradient, for symmetric positive definite systems.
    ConjugateGradient,
}

impl FromStr for KrylovMethod {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cg" | "conjugate_gradient" => Ok(Self::ConjugateGradient),
            _ => Err(Error::UnsupportedMethod(name.to_string())),
        }
    }
}

/// What to do when a solve does not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergencePolicy {
    /// Log a warning and let the caller fall back.
    #[default]
    Warn,
    /// Treat divergence as fatal.
    Abort,
}

/// Linear solver settings (`linear_solver` section of the input).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinearSolverConfig {
    /// Krylov method name.
    pub method: String,
    /// Relative residual tolerance.
    pub rtol: f64,
    /// Absolute residual tolerance.
    pub atol: f64,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Divergence handling.
    pub divergence: DivergencePolicy,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            method: "cg".to_string(),
            rtol: 1e-10,
            atol: 1e-50,
            max_iterations: 10_000,
            divergence: DivergencePolicy::Warn,
        }
    }
}

/// Why the Krylov iteration stopped. Codes follow the PETSc convention:
/// positive means converged, negative means diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedReason {
    ConvergedRtol,
    ConvergedAtol,
    DivergedIterations,
    DivergedBreakdown,
    DivergedIndefiniteMatrix,
    DivergedNanOrInf,
}

impl ConvergedReason {
    pub fn code(self) -> i32 {
        match self {
            Self::ConvergedRtol => 2,
            Self::ConvergedAtol => 3,
            Self::DivergedIterations => -3,
            Self::DivergedBreakdown => -5,
            Self::DivergedIndefiniteMatrix => -8,
            Self::DivergedNanOrInf => -9,
        }
    }

    pub fn is_converged(self) -> bool {
        self.code() > 0
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConvergedRtol => "CONVERGED_RTOL",
            Self::ConvergedAtol => "CONVERGED_ATOL",
            Self::DivergedIterations => "DIVERGED_ITS",
            Self::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            Self::DivergedIndefiniteMatrix => "DIVERGED_INDEFINITE_MAT",
            Self::DivergedNanOrInf => "DIVERGED_NANORINF",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Outcome of the iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStatus {
    pub reason: ConvergedReason,
    pub iterations: usize,
    /// Final (global) residual 2-norm.
    pub residual_norm: f64,
}

impl SolveStatus {
    pub fn is_converged(&self) -> bool {
        self.reason.is_converged()
    }
}

/// Solution in local order plus the status channel.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    pub x: Vec<f64>,
    pub status: SolveStatus,
}

impl LinearSolution {
    /// Return the vector, or [`Error::Divergence`] if the solve diverged.
    pub fn into_converged(self) -> Result<Vec<f64>> {
        if self.status.is_converged() {
            Ok(self.x)
        } else {
            Err(Error::Divergence {
                reason: self.status.reason.to_string(),
                iterations: self.status.iterations,
                residual: self.status.residual_norm,
            })
        }
    }
}

/// Contiguous block of global rows owned by `rank`.
pub fn ownership_range(global_size: usize, n_ranks: usize, rank: usize) -> std::ops::Range<usize> {
    let base = global_size / n_ranks;
    let rem = global_size % n_ranks;
    let start = rank * base + rank.min(rem);
    let len = base + usize::from(rank < rem);
    start..start + len
}

/// Bridge from locally assembled systems to one distributed solve.
#[derive(Debug, Clone)]
pub struct DistributedLinearSolver {
    rtol: f64,
    atol: f64,
    max_iterations: usize,
}

impl Default for DistributedLinearSolver {
    fn default() -> Self {
        Self::from_config(&LinearSolverConfig::default())
    }
}

impl DistributedLinearSolver {
    pub fn from_config(config: &LinearSolverConfig) -> Self {
        Self {
            rtol: config.rtol,
            atol: config.atol,
            max_iterations: config.max_iterations,
        }
    }

    /// Solve the global system assembled from every rank's local piece.
    ///
    /// # Arguments
    ///
    /// * `matrix` - Local sparse matrix (square, `local_size`)
    /// * `rhs` - Local right-hand side (`local_size`)
    /// * `mapper` - Local index -> global DOF index, injective into `[0, global_size)`
    /// * `global_size` - Number of active global DOFs
    /// * `method` - Krylov method name (only `"cg"`)
    ///
    /// # Returns
    ///
    /// The solution in local order, identical on every rank for shared DOFs.
    pub fn solve<C: Communicator>(
        &self,
        comm: &C,
        matrix: &CsrMatrix,
        rhs: &[f64],
        mapper: &[usize],
        global_size: usize,
        method: &str,
    ) -> Result<LinearSolution> {
        let method: KrylovMethod = method.parse()?;

        let local_check = validate_local_system(matrix, rhs, mapper, global_size);
        let all_ok = comm.all_gather(local_check.is_ok())?;
        local_check?;
        if let Some(rank) = all_ok.iter().position(|ok| !ok) {
            return Err(Error::Assembly(format!(
                "rank {rank} supplied an invalid local system"
            )));
        }

        // Scatter local contributions to global indices.
        let triplets: Vec<Triplet> = matrix
            .triplet_iter()
            .map(|(row, col, &value)| Triplet {
                row: mapper[row],
                col: mapper[col],
                value,
            })
            .collect();
        let rhs_entries: Vec<(usize, f64)> = mapper.iter().copied().zip(rhs.iter().copied()).collect();

        let gathered = comm.all_gather((triplets, rhs_entries))?;

        let owned = ownership_range(global_size, comm.size(), comm.rank());
        let mut block = TripletMatrix::new(owned.len(), global_size);
        let mut b_owned = DenseAccumulator::zeros(owned.len());
        for (rank_triplets, rank_rhs) in &gathered {
            for t in rank_triplets.iter().filter(|t| owned.contains(&t.row)) {
                block.add(t.row - owned.start, t.col, t.value);
            }
            for &(row, value) in rank_rhs.iter().filter(|(row, _)| owned.contains(row)) {
                b_owned.add(row - owned.start, value);
            }
        }
        let block = block.try_to_csr()?;

        // Every rank has finished contributing before the collective solve.
        comm.barrier()?;

        let (x_owned, status) = match method {
            KrylovMethod::ConjugateGradient => {
                self.conjugate_gradient(comm, &block, b_owned.as_slice())?
            }
        };

        let x_global: Vec<f64> = comm.all_gather(x_owned)?.into_iter().flatten().collect();
        let x = mapper.iter().map(|&g| x_global[g]).collect();

        if status.is_converged() {
            log::debug!(
                "CG converged: {} after {} iterations (residual {:.3e})",
                status.reason,
                status.iterations,
                status.residual_norm
            );
        } else {
            log::warn!(
                "CG did not converge: {} after {} iterations (residual {:.3e})",
                status.reason,
                status.iterations,
                status.residual_norm
            );
        }

        Ok(LinearSolution { x, status })
    }

    /// Row-distributed CG. `block` holds this rank's owned rows against all
    /// global columns; `b` is the owned slice of the RHS.
    fn conjugate_gradient<C: Communicator>(
        &self,
        comm: &C,
        block: &CsrMatrix,
        b: &[f64],
    ) -> Result<(Vec<f64>, SolveStatus)> {
        let n_owned = b.len();
        let mut x = vec![0.0; n_owned];
        let mut r = b.to_vec();
        let mut p = r.clone();

        let b_norm = global_dot(comm, b, b)?.sqrt();
        let mut rr = b_norm * b_norm;
        let tol_rtol = self.rtol * b_norm;
        let tolerance = tol_rtol.max(self.atol);

        let status = |reason, iterations, rr: f64| SolveStatus {
            reason,
            iterations,
            residual_norm: rr.sqrt(),
        };

        if !rr.is_finite() {
            return Ok((x, status(ConvergedReason::DivergedNanOrInf, 0, rr)));
        }

        for iteration in 0..self.max_iterations {
            if rr.sqrt() <= tolerance {
                let reason = if tol_rtol >= self.atol {
                    ConvergedReason::ConvergedRtol
                } else {
                    ConvergedReason::ConvergedAtol
                };
                return Ok((x, status(reason, iteration, rr)));
            }

            let p_full: Vec<f64> = comm.all_gather(p.clone())?.into_iter().flatten().collect();
            let ap = block_matvec(block, &p_full);
            let pap = global_dot(comm, &p, &ap)?;

            if !pap.is_finite() {
                return Ok((x, status(ConvergedReason::DivergedNanOrInf, iteration, rr)));
            }
            if pap < 0.0 {
                return Ok((x, status(ConvergedReason::DivergedIndefiniteMatrix, iteration, rr)));
            }
            if pap == 0.0 {
                return Ok((x, status(ConvergedReason::DivergedBreakdown, iteration, rr)));
            }

            let alpha = rr / pap;
            for i in 0..n_owned {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }

            let rr_new = global_dot(comm, &r, &r)?;
            if !rr_new.is_finite() {
                return Ok((x, status(ConvergedReason::DivergedNanOrInf, iteration + 1, rr_new)));
            }
            let beta = rr_new / rr;
            for i in 0..n_owned {
                p[i] = r[i] + beta * p[i];
            }
            rr = rr_new;
        }

        let reason = if rr.sqrt() <= tolerance {
            ConvergedReason::ConvergedRtol
        } else {
            ConvergedReason::DivergedIterations
        };
        Ok((x, status(reason, self.max_iterations, rr)))
    }
}

fn validate_local_system(
    matrix: &CsrMatrix,
    rhs: &[f64],
    mapper: &[usize],
    global_size: usize,
) -> Result<()> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(Error::Assembly(format!(
            "local matrix must be square, got {}x{}",
            n,
            matrix.ncols()
        )));
    }
    if rhs.len() != n || mapper.len() != n {
        return Err(Error::Assembly(format!(
            "local size mismatch: matrix {}, rhs {}, mapper {}",
            n,
            rhs.len(),
            mapper.len()
        )));
    }
    let mut seen = vec![false; global_size];
    for (local, &global) in mapper.iter().enumerate() {
        if global >= global_size {
            return Err(Error::Assembly(format!(
                "mapper entry {local} -> {global} outside global size {global_size}"
            )));
        }
        if std::mem::replace(&mut seen[global], true) {
            return Err(Error::Assembly(format!(
                "mapper maps two local indices to global index {global}"
            )));
        }
    }
    Ok(())
}

fn global_dot<C: Communicator>(comm: &C, a: &[f64], b: &[f64]) -> Result<f64> {
    let local: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    comm.all_reduce_scalar(local)
}

fn block_matvec(block: &CsrMatrix, x: &[f64]) -> Vec<f64> {
    block
        .row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&col, &value)| value * x[col])
                .sum()
        })
        .collect()
}

/// Direct sparse Cholesky solve of a single-process system.
///
/// Used to check the distributed CG against a factorisation; the matrix must
/// be symmetric positive definite.
pub fn reference_solve(matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
    let n = matrix.nrows();
    if n == 0 {
        return Ok(vec![]);
    }
    if n != matrix.ncols() {
        return Err(Error::Solver("Matrix must be square".into()));
    }
    if n != rhs.len() {
        return Err(Error::Solver("RHS size mismatch".into()));
    }

    let triplets: Vec<FaerTriplet<usize, usize, f64>> = matrix
        .triplet_iter()
        .map(|(row, col, &val)| FaerTriplet { row, col, val })
        .collect();
    let csc = SparseColMat::try_new_from_triplets(n, n, &triplets)
        .map_err(|e| Error::Solver(format!("failed to build CSC matrix: {e:?}")))?;

    let csc_ref = csc.as_ref();

    let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
        .map_err(|_| Error::Solver("Symbolic Cholesky analysis failed".into()))?;

    let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(
        |e| match e {
            SparseLltError::Generic(err) => {
                Error::Solver(format!("Sparse Cholesky error: {:?}", err))
            }
            SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                Error::SingularMatrix(format!(
                    "Matrix is not positive definite at pivot {}",
                    index
                ))
            }
        },
    )?;

    let b = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
    let x = llt.solve(&b);
    Ok((0..n).map(|i| x[(i, 0)]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, ThreadCommunicator};
    use approx::assert_relative_eq;

    fn tridiagonal(n: usize) -> CsrMatrix {
        let mut triplet = TripletMatrix::new(n, n);
        for i in 0..n {
            triplet.add(i, i, 4.0);
            if i + 1 < n {
                triplet.add(i, i + 1, -1.0);
                triplet.add(i + 1, i, -1.0);
            }
        }
        triplet.try_to_csr().unwrap()
    }

    fn identity_mapper(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("cg".parse::<KrylovMethod>().unwrap(), KrylovMethod::ConjugateGradient);
        assert_eq!("CG".parse::<KrylovMethod>().unwrap(), KrylovMethod::ConjugateGradient);
        assert!(matches!(
            "gmres".parse::<KrylovMethod>(),
            Err(Error::UnsupportedMethod(name)) if name == "gmres"
        ));
    }

    #[test]
    fn test_unknown_method_fails() {
        let solver = DistributedLinearSolver::default();
        let matrix = tridiagonal(2);
        let result = solver.solve(&SingleProcess, &matrix, &[1.0, 1.0], &[0, 1], 2, "bicg");
        assert!(matches!(result, Err(Error::UnsupportedMethod(_))));
    }

    #[test]
    fn test_ownership_ranges_cover_all_rows() {
        let ranges: Vec<_> = (0..3).map(|r| ownership_range(10, 3, r)).collect();
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(ownership_range(1, 2, 1), 1..1);
    }

    #[test]
    fn test_single_rank_matches_direct_solve() {
        let n = 12;
        let matrix = tridiagonal(n);
        let rhs: Vec<f64> = (0..n).map(|i| (i as f64).sin() + 1.0).collect();

        let solver = DistributedLinearSolver::default();
        let solution = solver
            .solve(&SingleProcess, &matrix, &rhs, &identity_mapper(n), n, "cg")
            .unwrap();
        assert!(solution.status.is_converged());
        assert!(solution.status.reason.code() > 0);

        let direct = reference_solve(&matrix, &rhs).unwrap();
        for (a, b) in solution.x.iter().zip(&direct) {
            assert_relative_eq!(*a, *b, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_permuted_mapper_returns_local_order() {
        // Local index i holds global dof mapper[i].
        let mapper = vec![2, 0, 1];
        let mut triplet = TripletMatrix::new(3, 3);
        triplet.add(0, 0, 2.0);
        triplet.add(1, 1, 4.0);
        triplet.add(2, 2, 8.0);
        let matrix = triplet.try_to_csr().unwrap();
        let rhs = vec![2.0, 4.0, 16.0];

        let solver = DistributedLinearSolver::default();
        let solution = solver
            .solve(&SingleProcess, &matrix, &rhs, &mapper, 3, "cg")
            .unwrap();
        assert_relative_eq!(solution.x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(solution.x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(solution.x[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_two_rank_4x4_spd_split_by_rows() {
        // A = [4 1 0 0; 1 4 1 0; 0 1 4 1; 0 0 1 4], x* = [1 2 3 4]
        let dense = [
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 4.0, 1.0, 0.0],
            [0.0, 1.0, 4.0, 1.0],
            [0.0, 0.0, 1.0, 4.0],
        ];
        let exact = [1.0, 2.0, 3.0, 4.0];
        let b: Vec<f64> = dense
            .iter()
            .map(|row| row.iter().zip(&exact).map(|(a, x)| a * x).sum())
            .collect();

        let ranks = ThreadCommunicator::group(2);
        let results: Vec<LinearSolution> = std::thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    let b = &b;
                    s.spawn(move || {
                        // Rank r contributes rows 2r, 2r+1 but lists every
                        // global dof locally, so the mapper is the identity.
                        let rows = 2 * comm.rank()..2 * comm.rank() + 2;
                        let mut triplet = TripletMatrix::new(4, 4);
                        let mut rhs = vec![0.0; 4];
                        for i in rows {
                            for j in 0..4 {
                                triplet.add(i, j, dense[i][j]);
                            }
                            rhs[i] = b[i];
                        }
                        let matrix = triplet.try_to_csr().unwrap();
                        DistributedLinearSolver::default()
                            .solve(comm, &matrix, &rhs, &[0, 1, 2, 3], 4, "cg")
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for solution in &results {
            assert!(solution.status.reason.code() > 0);
            for (x, e) in solution.x.iter().zip(&exact) {
                assert_relative_eq!(*x, *e, epsilon = 1e-8);
            }
        }
        assert_eq!(results[0].x, results[1].x);
    }

    #[test]
    fn test_shared_dofs_are_summed_and_identical_on_all_ranks() {
        // 1D chain of 5 global dofs; rank 0 owns elements (0,1),(1,2),
        // rank 1 owns (2,3),(3,4). Dof 2 is shared and receives two
        // contributions that must be added.
        let ranks = ThreadCommunicator::group(2);
        let results: Vec<(Vec<usize>, LinearSolution)> = std::thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mapper: Vec<usize> = (2 * comm.rank()..2 * comm.rank() + 3).collect();
                        let mut triplet = TripletMatrix::new(3, 3);
                        for e in 0..2 {
                            let k = nalgebra::DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
                            triplet.add_submatrix(&[e, e + 1], &k);
                        }
                        let matrix = triplet.try_to_csr().unwrap();
                        let rhs = vec![0.5, 0.5, 0.5];
                        let solution = DistributedLinearSolver::default()
                            .solve(comm, &matrix, &rhs, &mapper, 5, "cg")
                            .unwrap();
                        (mapper, solution)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Reference: assemble the same global system serially.
        let mut global = TripletMatrix::new(5, 5);
        let mut rhs = vec![0.0; 5];
        for first in [0usize, 2] {
            for e in 0..2 {
                let k = nalgebra::DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
                global.add_submatrix(&[first + e, first + e + 1], &k);
            }
            for i in 0..3 {
                rhs[first + i] += 0.5;
            }
        }
        let direct = reference_solve(&global.try_to_csr().unwrap(), &rhs).unwrap();

        for (mapper, solution) in &results {
            assert!(solution.status.is_converged());
            for (local, &g) in mapper.iter().enumerate() {
                assert_relative_eq!(solution.x[local], direct[g], max_relative = 1e-9);
            }
        }
        // Shared dof 2 is local index 2 on rank 0 and local index 0 on rank 1.
        assert_eq!(results[0].1.x[2].to_bits(), results[1].1.x[0].to_bits());
    }

    #[test]
    fn test_invalid_mapper_is_rejected() {
        let matrix = tridiagonal(2);
        let solver = DistributedLinearSolver::default();
        let duplicate = solver.solve(&SingleProcess, &matrix, &[1.0, 1.0], &[0, 0], 2, "cg");
        assert!(matches!(duplicate, Err(Error::Assembly(_))));
        let out_of_range = solver.solve(&SingleProcess, &matrix, &[1.0, 1.0], &[0, 5], 2, "cg");
        assert!(matches!(out_of_range, Err(Error::Assembly(_))));
    }

    #[test]
    fn test_indefinite_matrix_reports_divergence_but_returns_vector() {
        let mut triplet = TripletMatrix::new(2, 2);
        triplet.add(0, 0, 1.0);
        triplet.add(1, 1, -1.0);
        let matrix = triplet.try_to_csr().unwrap();

        let solution = DistributedLinearSolver::default()
            .solve(&SingleProcess, &matrix, &[1.0, 1.0], &[0, 1], 2, "cg")
            .unwrap();
        assert!(!solution.status.is_converged());
        assert!(solution.status.reason.code() < 0);
        assert_eq!(solution.x.len(), 2);
        assert!(matches!(solution.into_converged(), Err(Error::Divergence { .. })));
    }

    #[test]
    fn test_iteration_cap_reports_diverged_its() {
        let config = LinearSolverConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let matrix = tridiagonal(8);
        let rhs = vec![1.0; 8];
        let solution = DistributedLinearSolver::from_config(&config)
            .solve(&SingleProcess, &matrix, &rhs, &identity_mapper(8), 8, "cg")
            .unwrap();
        assert_eq!(solution.status.reason, ConvergedReason::DivergedIterations);
    }

    #[test]
    fn test_zero_rhs_converges_immediately() {
        let matrix = tridiagonal(3);
        let solution = DistributedLinearSolver::default()
            .solve(&SingleProcess, &matrix, &[0.0; 3], &[0, 1, 2], 3, "cg")
            .unwrap();
        assert!(solution.status.is_converged());
        assert_eq!(solution.status.iterations, 0);
        assert_eq!(solution.x, vec![0.0; 3]);
    }

    #[test]
    fn test_reference_solve_rejects_indefinite() {
        let mut triplet = TripletMatrix::new(2, 2);
        triplet.add(0, 0, 1.0);
        triplet.add(0, 1, 2.0);
        triplet.add(1, 0, 2.0);
        triplet.add(1, 1, 1.0);
        let matrix = triplet.try_to_csr().unwrap();
        assert!(reference_solve(&matrix, &[1.0, 1.0]).is_err());
    }
}
