pub mod heap_merge;
pub mod stats;

pub use heap_merge::{Tagged, heap_merge};
pub use stats::{Strategy, WriteStats};
