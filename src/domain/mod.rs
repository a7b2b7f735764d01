//! File domains: the partition of the accessed byte range among aggregator ranks.
//!
//! The range `[min_st_offset, max_end_offset]` covered by any process is cut into `naggs`
//! consecutive domains of `fd_size` bytes (the last one is clipped to the end, trailing ones
//! may be empty). Domain `i` belongs to aggregator rank `ranklist[i]`.

use crate::core::types::Extent;
use crate::error::{Result, TpError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDomains {
    min_st_offset: u64,
    fd_size: u64,
    domains: Vec<Option<Extent>>,
    ranklist: Vec<usize>,
}

/// Aggregator ranks spread evenly over a group of `nprocs`.
pub fn aggregator_ranks(nprocs: usize, naggs: usize) -> Vec<usize> {
    let naggs = naggs.clamp(1, nprocs.max(1));
    (0..naggs).map(|i| i * nprocs / naggs).collect()
}

impl FileDomains {
    /// Partition the union of `extents` among the aggregators in `ranklist`.
    ///
    /// `min_fdomain_size` is a lower bound on `fd_size`; a nonzero `striping_unit` rounds
    /// `fd_size` up to a whole number of stripes and places every inner boundary on a
    /// stripe boundary.
    pub fn partition(
        extents: &[Option<Extent>],
        ranklist: Vec<usize>,
        min_fdomain_size: u64,
        striping_unit: u64,
    ) -> Self {
        let naggs = ranklist.len().max(1) as u64;
        let present = || extents.iter().flatten();
        let (min_st, max_end) = match (present().map(|e| e.start).min(), present().map(|e| e.end).max()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Self {
                    min_st_offset: 0,
                    fd_size: 0,
                    domains: vec![None; ranklist.len()],
                    ranklist,
                };
            }
        };

        let span = Extent::new(min_st, max_end).len();
        let mut fd_size = span.div_ceil(naggs).max(min_fdomain_size).max(1);
        if striping_unit > 0 {
            fd_size = fd_size.div_ceil(striping_unit) * striping_unit;
        }

        let boundary = |i: u64| -> u64 {
            if i == 0 {
                return min_st;
            }
            let b = min_st.saturating_add(i.saturating_mul(fd_size));
            if striping_unit > 0 { b - b % striping_unit } else { b }
        };

        let domains = (0..naggs)
            .map(|i| {
                let start = boundary(i);
                let end = if i + 1 == naggs {
                    max_end
                } else {
                    (boundary(i + 1) - 1).min(max_end)
                };
                (start <= max_end && start <= end).then(|| Extent::new(start, end))
            })
            .collect();

        Self { min_st_offset: min_st, fd_size, domains, ranklist }
    }

    pub fn min_st_offset(&self) -> u64 {
        self.min_st_offset
    }

    pub fn fd_size(&self) -> u64 {
        self.fd_size
    }

    /// Aggregator ranks, indexed like the domains.
    pub fn ranklist(&self) -> &[usize] {
        &self.ranklist
    }

    pub fn domains(&self) -> &[Option<Extent>] {
        &self.domains
    }

    /// The domain owned by `rank`, if it is an aggregator with a non-empty domain.
    pub fn domain_of_rank(&self, rank: usize) -> Option<Extent> {
        self.ranklist
            .iter()
            .position(|&r| r == rank)
            .and_then(|i| self.domains[i])
    }

    /// Rank owning byte `off`, and `len` clipped to what remains of that rank's domain.
    pub fn aggregator_for(&self, off: u64, len: u64) -> Result<(usize, u64)> {
        let idx = self
            .domains
            .partition_point(|d| d.is_some_and(|e| e.end < off));
        match self.domains.get(idx).copied().flatten() {
            Some(e) if e.contains(off) => Ok((self.ranklist[idx], len.min(e.end + 1 - off))),
            _ => Err(TpError::OutsideFileDomains(off)),
        }
    }
}
