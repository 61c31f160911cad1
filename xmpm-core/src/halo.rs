//! Nodal halo exchange.
//!
//! Every mapping phase produces a [`NodalBuffer`] of partial sums: one slot
//! of `width` values per mesh node. Ranks share the background grid, so a
//! node touched by particles on several ranks has partial sums on each of
//! them; [`NodalBuffer::halo_merge`] all-reduces the buffer so every rank
//! holds the complete value before anything reads it.

use crate::comm::Communicator;
use crate::error::Result;
use rayon::prelude::*;

/// Per-node accumulator with a fixed number of components per node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodalBuffer {
    width: usize,
    data: Vec<f64>,
}

impl NodalBuffer {
    /// Zeroed buffer for `n_nodes` nodes.
    pub fn zeros(n_nodes: usize, width: usize) -> Self {
        Self {
            width,
            data: vec![0.0; n_nodes * width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn n_nodes(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    /// Values stored for one node.
    pub fn node(&self, node: usize) -> &[f64] {
        &self.data[node * self.width..(node + 1) * self.width]
    }

    pub fn node_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.data[node * self.width..(node + 1) * self.width]
    }

    /// Add `values` into the slot of `node`.
    pub fn add(&mut self, node: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.width);
        for (slot, v) in self.node_mut(node).iter_mut().zip(values) {
            *slot += v;
        }
    }

    /// Add a single scalar to component `component` of `node`.
    pub fn add_component(&mut self, node: usize, component: usize, value: f64) {
        self.data[node * self.width + component] += value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Merge partial sums across ranks. No-op on a single rank.
    pub fn halo_merge<C: Communicator>(&mut self, comm: &C) -> Result<()> {
        comm.all_reduce_sum(&mut self.data)
    }

    /// Element-wise sum of two buffers of the same shape.
    pub fn merged(mut self, other: &NodalBuffer) -> Self {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += b);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, ThreadCommunicator};

    #[test]
    fn test_add_and_read_back() {
        let mut buffer = NodalBuffer::zeros(3, 2);
        buffer.add(1, &[1.0, 2.0]);
        buffer.add(1, &[0.5, 0.5]);
        buffer.add_component(2, 1, 4.0);
        assert_eq!(buffer.node(0), &[0.0, 0.0]);
        assert_eq!(buffer.node(1), &[1.5, 2.5]);
        assert_eq!(buffer.node(2), &[0.0, 4.0]);
        assert_eq!(buffer.n_nodes(), 3);
    }

    #[test]
    fn test_single_rank_merge_is_noop() {
        let mut buffer = NodalBuffer::zeros(2, 1);
        buffer.add(0, &[3.0]);
        let before = buffer.clone();
        buffer.halo_merge(&SingleProcess).unwrap();
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_shared_node_is_summed_across_ranks() {
        let ranks = ThreadCommunicator::group(2);
        let merged: Vec<NodalBuffer> = std::thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        // Node 1 is the shared boundary node.
                        let mut buffer = NodalBuffer::zeros(3, 1);
                        buffer.add(comm.rank() * 2, &[1.0]);
                        buffer.add(1, &[0.25]);
                        buffer.halo_merge(comm).unwrap();
                        buffer
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for buffer in merged {
            assert_eq!(buffer.as_slice(), &[1.0, 0.5, 1.0]);
        }
    }

    #[test]
    fn test_merged_sums_elementwise() {
        let mut a = NodalBuffer::zeros(2, 1);
        let mut b = NodalBuffer::zeros(2, 1);
        a.add(0, &[1.0]);
        b.add(0, &[2.0]);
        b.add(1, &[5.0]);
        assert_eq!(a.merged(&b).as_slice(), &[3.0, 5.0]);
    }
}
