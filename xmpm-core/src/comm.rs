//! Inter-rank collectives.
//!
//! The explicit solver never talks to a transport directly: halo merges,
//! particle migration and the distributed linear solve all go through the
//! [`Communicator`] trait. Two implementations are provided:
//!
//! - [`SingleProcess`]: one rank, every collective is the identity.
//! - [`ThreadCommunicator`]: `size` ranks living in one process (one thread
//!   each), synchronised through shared `parking_lot` state. An optional
//!   deadline turns a rank that never arrives into [`Error::Communication`]
//!   instead of a hang.
//!
//! Reductions sum contributions in rank order, so every rank sees a
//! bit-identical result.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Collective operations over a fixed group of ranks.
pub trait Communicator: Send + Sync {
    /// Rank of the caller, in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Block until every rank has arrived.
    fn barrier(&self) -> Result<()>;

    /// Gather one value from every rank; the result is indexed by rank and
    /// identical on every rank.
    fn all_gather<T: Clone + Send + 'static>(&self, local: T) -> Result<Vec<T>>;

    /// True when more than one rank participates.
    fn is_distributed(&self) -> bool {
        self.size() > 1
    }

    /// Element-wise sum of `values` over all ranks, written back in place.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()> {
        if !self.is_distributed() {
            return Ok(());
        }
        let gathered = self.all_gather(values.to_vec())?;
        for (rank, contribution) in gathered.iter().enumerate() {
            if contribution.len() != values.len() {
                return Err(Error::Communication(format!(
                    "all-reduce length mismatch: rank {} sent {} values, expected {}",
                    rank,
                    contribution.len(),
                    values.len()
                )));
            }
        }
        values.iter_mut().for_each(|v| *v = 0.0);
        for contribution in &gathered {
            for (v, c) in values.iter_mut().zip(contribution) {
                *v += c;
            }
        }
        Ok(())
    }

    /// Sum of one scalar over all ranks.
    fn all_reduce_scalar(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.all_reduce_sum(&mut buf)?;
        Ok(buf[0])
    }
}

/// Single-rank communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn all_gather<T: Clone + Send + 'static>(&self, local: T) -> Result<Vec<T>> {
        Ok(vec![local])
    }
}

struct BarrierState {
    count: usize,
    generation: u64,
    broken: bool,
}

struct Shared {
    size: usize,
    timeout: Option<Duration>,
    barrier: Mutex<BarrierState>,
    arrived: Condvar,
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
}

/// One rank of an in-process group.
///
/// ```ignore
/// let ranks = ThreadCommunicator::group(2);
/// std::thread::scope(|s| {
///     for comm in &ranks {
///         s.spawn(move || comm.all_reduce_scalar(1.0));
///     }
/// });
/// ```
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadCommunicator {
    /// Create `size` connected ranks with no deadline.
    pub fn group(size: usize) -> Vec<Self> {
        Self::build(size, None)
    }

    /// Create `size` connected ranks whose collectives fail after `timeout`.
    pub fn group_with_timeout(size: usize, timeout: Duration) -> Vec<Self> {
        Self::build(size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Vec<Self> {
        assert!(size > 0, "communicator group needs at least one rank");
        let shared = Arc::new(Shared {
            size,
            timeout,
            barrier: Mutex::new(BarrierState {
                count: 0,
                generation: 0,
                broken: false,
            }),
            arrived: Condvar::new(),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<()> {
        let mut state = self.shared.barrier.lock();
        if state.broken {
            return Err(Error::Communication("communicator group is broken".into()));
        }
        let generation = state.generation;
        state.count += 1;
        if state.count == self.shared.size {
            state.count = 0;
            state.generation = state.generation.wrapping_add(1);
            self.shared.arrived.notify_all();
            return Ok(());
        }

        let deadline = self.shared.timeout.map(|t| Instant::now() + t);
        while state.generation == generation && !state.broken {
            match deadline {
                Some(deadline) => {
                    let timed_out = self
                        .shared
                        .arrived
                        .wait_until(&mut state, deadline)
                        .timed_out();
                    if timed_out && state.generation == generation {
                        state.broken = true;
                        self.shared.arrived.notify_all();
                        return Err(Error::Communication(format!(
                            "rank {} timed out waiting for {} of {} ranks",
                            self.rank,
                            self.shared.size - state.count,
                            self.shared.size
                        )));
                    }
                }
                None => self.shared.arrived.wait(&mut state),
            }
        }

        if state.generation == generation {
            return Err(Error::Communication(format!(
                "rank {} released from a broken barrier",
                self.rank
            )));
        }
        Ok(())
    }

    fn all_gather<T: Clone + Send + 'static>(&self, local: T) -> Result<Vec<T>> {
        self.shared.slots.lock()[self.rank] = Some(Box::new(local));
        self.barrier()?;

        let gathered = {
            let slots = self.shared.slots.lock();
            slots
                .iter()
                .enumerate()
                .map(|(rank, slot)| {
                    slot.as_ref()
                        .and_then(|b| b.downcast_ref::<T>())
                        .cloned()
                        .ok_or_else(|| {
                            Error::Communication(format!(
                                "rank {rank} contributed a value of a different type"
                            ))
                        })
                })
                .collect::<Result<Vec<T>>>()
        };

        // Nobody may overwrite a slot until everyone has read it.
        self.barrier()?;
        gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_on_ranks<R, F>(ranks: &[ThreadCommunicator], f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&ThreadCommunicator) -> R + Sync,
    {
        std::thread::scope(|s| {
            let handles: Vec<_> = ranks.iter().map(|comm| s.spawn(|| f(comm))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_single_process_is_identity() {
        let comm = SingleProcess;
        let mut values = [1.0, -2.0];
        comm.all_reduce_sum(&mut values).unwrap();
        assert_eq!(values, [1.0, -2.0]);
        assert_eq!(comm.all_gather(7usize).unwrap(), vec![7]);
        assert!(!comm.is_distributed());
    }

    #[test]
    fn test_all_gather_is_rank_indexed() {
        let ranks = ThreadCommunicator::group(3);
        let results = run_on_ranks(&ranks, |comm| comm.all_gather(comm.rank() * 10).unwrap());
        for gathered in results {
            assert_eq!(gathered, vec![0, 10, 20]);
        }
    }

    #[test]
    fn test_all_reduce_sum_identical_on_every_rank() {
        let ranks = ThreadCommunicator::group(4);
        let results = run_on_ranks(&ranks, |comm| {
            let mut values = vec![0.1 * (comm.rank() + 1) as f64, 1.0];
            comm.all_reduce_sum(&mut values).unwrap();
            values
        });
        for values in &results {
            assert_eq!(values, &results[0]);
            assert!((values[0] - 1.0).abs() < 1e-12);
            assert_eq!(values[1], 4.0);
        }
    }

    #[test]
    fn test_repeated_collectives_do_not_interleave() {
        let ranks = ThreadCommunicator::group(2);
        let results = run_on_ranks(&ranks, |comm| {
            (0..50)
                .map(|i| comm.all_reduce_scalar(i as f64).unwrap())
                .collect::<Vec<_>>()
        });
        let expected: Vec<f64> = (0..50).map(|i| 2.0 * i as f64).collect();
        assert_eq!(results[0], expected);
        assert_eq!(results[1], expected);
    }

    #[test]
    fn test_barrier_timeout_reports_error() {
        let ranks = ThreadCommunicator::group_with_timeout(2, Duration::from_millis(50));
        // Rank 1 never arrives.
        let result = ranks[0].barrier();
        assert!(matches!(result, Err(Error::Communication(_))));
        assert!(ranks[1].barrier().is_err());
    }
}
