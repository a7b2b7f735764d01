//! Core traits and value types.

pub mod traits;
pub mod types;

pub use traits::Storage;
pub use types::{Extent, Fragment};
