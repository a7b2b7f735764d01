//! File handles.
//!
//! - [`file_context`]: [`FileContext`], one rank's view of a collectively opened file, and
//!   [`FilePointer`], which selects between explicit offsets and the individual pointer.

pub mod file_context;
pub use file_context::{FileContext, FilePointer};
