//! Storage backends implementing [`Storage`](crate::core::traits::Storage).

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::{MemOp, MemStorage};
