//! Outcome summary of a collective write.

/// How the bytes reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Two-phase exchange through aggregators.
    Collective,
    /// Every rank wrote its own fragments.
    Independent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteStats {
    /// Data bytes this rank contributed.
    pub bytes: u64,
    pub strategy: Strategy,
    /// Exchange rounds this rank took part in (the group-wide maximum).
    pub rounds: usize,
    /// Windows this rank wrote as an aggregator.
    pub windows_written: usize,
    /// Windows that needed a read before the write.
    pub rmw_reads: usize,
}

impl WriteStats {
    pub fn independent(bytes: u64) -> Self {
        Self {
            bytes,
            strategy: Strategy::Independent,
            rounds: 0,
            windows_written: 0,
            rmw_reads: 0,
        }
    }
}
