//! MPI-based process group.
//!
//! This module provides an implementation of the `Comm` trait using the MPI (Message Passing Interface)
//! backend for distributed-memory parallelism. Each process of the MPI job is one rank of the
//! collective write. The implementation is only available when the `mpi` feature is enabled.
//!
//! # Usage
//!
//! - The `MpiComm` struct owns the MPI universe and wraps the world communicator.
//! - The `Comm` trait is implemented for `MpiComm`, so it can replace the in-process
//!   `ThreadComm` without touching the collective write engine.
//!
//! # References
//! - [MPI Standard](https://www.mpi-forum.org/)
//!
//! # Example
//! ```no_run
//! #[cfg(feature = "mpi")]
//! let comm = twophase::parallel::MpiComm::new().unwrap();
//! ```

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::{Comm, Exchange};
use crate::error::{CommError, Result};

/// MPI communicator wrapper for distributed parallelism.
///
/// Holds the MPI universe (finalized on drop), the world communicator, the rank of the
/// current process, and the total number of processes.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    /// The rank (ID) of this process within the communicator.
    pub rank: usize,
    /// The total number of processes in the communicator.
    pub size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm` instance.
    ///
    /// Fails if MPI was already initialized by this process.
    pub fn new() -> Result<Self> {
        let universe = mpi::initialize()
            .ok_or_else(|| CommError::Mpi("MPI is already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: universe })
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>> {
        let mut out = vec![0u64; local.len() * self.size];
        self.world.all_gather_into(local, &mut out[..]);
        Ok(out)
    }

    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>> {
        let mut out = vec![0u64; send.len()];
        self.world.all_to_all_into(send, &mut out[..]);
        Ok(out)
    }

    fn all_reduce_max(&self, x: u64) -> Result<u64> {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::max());
        Ok(y)
    }

    fn broadcast(&self, x: u64, root: usize) -> Result<u64> {
        let mut v = x;
        self.world.process_at_rank(root as i32).broadcast_into(&mut v);
        Ok(v)
    }

    /// Posts every receive and send as an immediate operation inside one request scope and
    /// waits for all of them. In ordered mode only the sends are immediate; the receives are
    /// blocking and issued one after another once every send is posted.
    fn exchange(&self, ex: Exchange<'_>) -> Result<Vec<Vec<u8>>> {
        let mut bufs: Vec<Vec<u8>> = ex.recvs.iter().map(|r| vec![0u8; r.len]).collect();
        let world = &self.world;
        if ex.ordered {
            mpi::request::scope(|scope| {
                let sends: Vec<_> = ex
                    .sends
                    .iter()
                    .map(|s| {
                        world
                            .process_at_rank(s.dest as i32)
                            .immediate_send_with_tag(scope, s.data.as_ref(), s.tag.0 as i32)
                    })
                    .collect();
                for (r, buf) in ex.recvs.iter().zip(bufs.iter_mut()) {
                    world
                        .process_at_rank(r.source as i32)
                        .receive_into_with_tag(&mut buf[..], r.tag.0 as i32);
                }
                for s in sends {
                    s.wait();
                }
            });
        } else {
            mpi::request::scope(|scope| {
                let recvs: Vec<_> = ex
                    .recvs
                    .iter()
                    .zip(bufs.iter_mut())
                    .map(|(r, buf)| {
                        world
                            .process_at_rank(r.source as i32)
                            .immediate_receive_into_with_tag(scope, &mut buf[..], r.tag.0 as i32)
                    })
                    .collect();
                let sends: Vec<_> = ex
                    .sends
                    .iter()
                    .map(|s| {
                        world
                            .process_at_rank(s.dest as i32)
                            .immediate_send_with_tag(scope, s.data.as_ref(), s.tag.0 as i32)
                    })
                    .collect();
                for r in recvs {
                    r.wait();
                }
                for s in sends {
                    s.wait();
                }
            });
        }
        Ok(bufs)
    }
}
