//! Two-phase collective write.
//!
//! [`write::write_strided_coll`] is the entry point. When accesses interleave, the ranks
//! route their fragments to a set of aggregators ([`crate::request`]), and each aggregator
//! collects its file domain window by window ([`exchange`], [`window`]) from contiguous user
//! buffers or packed staging buffers ([`pack`]) before writing it with one contiguous call.
//! Otherwise every rank writes on its own ([`independent`]).

pub(crate) mod exchange;
pub mod independent;
pub(crate) mod pack;
pub(crate) mod window;
pub mod write;

pub use independent::write_independent;
pub use write::{interleave_count, write_strided_coll};
