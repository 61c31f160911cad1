//! Slab decomposition of the domain across ranks.
//!
//! The domain is cut along axis 0 into one slab per rank. A particle is
//! owned by the rank whose slab contains it. [`Partition::rebalance`] moves
//! the cuts so every rank owns roughly the same number of particles.

use crate::comm::Communicator;
use crate::error::Result;
use crate::mesh::Grid;
use crate::types::Vector;

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Interior cut positions along axis 0, ascending; `nranks - 1` entries.
    cuts: Vec<f64>,
}

impl Partition {
    /// Equal-width slabs over the grid extent.
    pub fn uniform(grid: &Grid, nranks: usize) -> Self {
        let lower = grid.origin()[0];
        let width = grid.upper()[0] - lower;
        let cuts = (1..nranks.max(1))
            .map(|k| lower + width * k as f64 / nranks as f64)
            .collect();
        Self { cuts }
    }

    pub fn nranks(&self) -> usize {
        self.cuts.len() + 1
    }

    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// Rank owning a point.
    pub fn owner(&self, coordinates: &Vector) -> usize {
        let x = coordinates[0];
        self.cuts.partition_point(|cut| *cut <= x)
    }

    /// Recompute the cuts from every rank's particle positions.
    ///
    /// Collective. Every rank derives the same cuts from the same gathered
    /// data. With no particles anywhere the partition is left unchanged.
    pub fn rebalance<C: Communicator>(&mut self, comm: &C, local: &[Vector]) -> Result<()> {
        let xs: Vec<f64> = local.iter().map(|c| c[0]).collect();
        let mut all: Vec<f64> = comm.all_gather(xs)?.into_iter().flatten().collect();
        if all.is_empty() || self.cuts.is_empty() {
            return Ok(());
        }
        all.sort_by(f64::total_cmp);
        let n = all.len();
        let nranks = self.nranks();
        let mut cuts = Vec::with_capacity(nranks - 1);
        for k in 1..nranks {
            let split = k * n / nranks;
            let cut = if split == 0 {
                all[0]
            } else if split >= n {
                all[n - 1] + f64::EPSILON.max(all[n - 1].abs() * f64::EPSILON)
            } else {
                0.5 * (all[split - 1] + all[split])
            };
            cuts.push(cut);
        }
        // Keep cuts non-decreasing when many particles share a coordinate.
        for k in 1..cuts.len() {
            if cuts[k] < cuts[k - 1] {
                cuts[k] = cuts[k - 1];
            }
        }
        log::debug!("rebalanced partition cuts: {cuts:?}");
        self.cuts = cuts;
        Ok(())
    }
}
