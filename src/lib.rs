//! twophase: two-phase collective write I/O
//!
//! A group of processes, each holding a slice of a distributed array, writes the array to a
//! shared file. When the ranks' accesses interleave, a subset of aggregator ranks gathers the
//! data of contiguous file domains, window by window through a bounded buffer, and writes each
//! window with one large contiguous call. Holes in a window are filled by reading the file
//! first. Process groups are either in-process ([`ThreadGroup`]) or MPI (feature `mpi`).

pub mod parallel;

pub mod collective;
pub mod config;
pub mod context;
pub mod core;
pub mod datatype;
pub mod domain;
pub mod error;
pub mod request;
pub mod storage;
pub mod utils;
pub mod view;

// Re-exports for convenience
pub use collective::{interleave_count, write_independent, write_strided_coll};
pub use config::*;
pub use context::*;
pub use crate::core::*;
pub use datatype::Datatype;
pub use domain::{FileDomains, aggregator_ranks};
pub use error::*;
pub use parallel::{Comm, ThreadComm, ThreadGroup};
pub use request::{InboundRequestSet, OutboundRequestSet};
pub use storage::{FileStorage, MemOp, MemStorage};
pub use utils::*;
pub use view::{AccessList, FileView, calc_my_off_len};

#[cfg(feature = "mpi")]
pub use parallel::MpiComm;
