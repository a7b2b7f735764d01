//! Configuration: collective buffering hints and file access modes.

pub mod hints;
pub mod mode;

pub use hints::{DEFAULT_CB_BUFFER_SIZE, HintMode, Hints};
pub use mode::FileMode;
