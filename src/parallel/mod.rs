//! Process-group communication.
//!
//! The collective write engine talks to its peers only through the [`Comm`] trait. Two
//! backends implement it: [`ThreadComm`], an in-process group whose ranks are threads, and
//! `MpiComm` (feature `mpi`), which wraps an MPI communicator.

use std::borrow::Cow;

use crate::error::Result;

pub mod thread_comm;
pub use thread_comm::{ThreadComm, ThreadGroup};

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Message tag for point-to-point traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u32);

/// Tags below this value are reserved for request-list traffic.
const FIRST_WINDOW_TAG: u32 = 16;
/// MPI guarantees at least 32767 usable tags.
const WINDOW_TAG_SPAN: u64 = 32767 - FIRST_WINDOW_TAG as u64;

impl Tag {
    /// Tag of the fragment lists exchanged while routing requests.
    pub const REQUEST_LIST: Tag = Tag(1);

    /// Tag of the data sent to `dest` during window `round`.
    pub fn window(dest: usize, round: usize, nprocs: usize) -> Tag {
        let k = (round as u64) * (nprocs as u64) + dest as u64;
        Tag(FIRST_WINDOW_TAG + (k % WINDOW_TAG_SPAN) as u32)
    }
}

/// A message to post: contiguous sources are sent straight from the user buffer.
#[derive(Debug, Clone)]
pub struct Outgoing<'a> {
    pub dest: usize,
    pub tag: Tag,
    pub data: Cow<'a, [u8]>,
}

/// A receive to post: exactly `len` bytes from `source`.
#[derive(Debug, Clone, Copy)]
pub struct Incoming {
    pub source: usize,
    pub tag: Tag,
    pub len: usize,
}

/// A batch of point-to-point transfers completed together.
#[derive(Debug, Default)]
pub struct Exchange<'a> {
    pub sends: Vec<Outgoing<'a>>,
    pub recvs: Vec<Incoming>,
    /// Post the sends first, then receive one message at a time in `recvs` order.
    pub ordered: bool,
}

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<()>;
    /// Concatenation of every rank's `local`, in rank order. All ranks pass equal lengths.
    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>>;
    /// `send` holds `size()` equal blocks; block `j` goes to rank `j`. The result holds the
    /// block each rank sent here, in rank order.
    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>>;
    fn all_reduce_max(&self, x: u64) -> Result<u64>;
    fn broadcast(&self, x: u64, root: usize) -> Result<u64>;
    /// Post every transfer of `ex` and wait for all of them. Returns the received payloads
    /// in `ex.recvs` order.
    fn exchange(&self, ex: Exchange<'_>) -> Result<Vec<Vec<u8>>>;
}

impl<C: Comm + ?Sized> Comm for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn barrier(&self) -> Result<()> {
        (**self).barrier()
    }
    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>> {
        (**self).all_gather(local)
    }
    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>> {
        (**self).all_to_all(send)
    }
    fn all_reduce_max(&self, x: u64) -> Result<u64> {
        (**self).all_reduce_max(x)
    }
    fn broadcast(&self, x: u64, root: usize) -> Result<u64> {
        (**self).broadcast(x, root)
    }
    fn exchange(&self, ex: Exchange<'_>) -> Result<Vec<Vec<u8>>> {
        (**self).exchange(ex)
    }
}
