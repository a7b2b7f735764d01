//! Flattened datatypes: memory and file layouts as ordered lists of contiguous runs.
//!
//! A [`Datatype`] is kept in its flattened form only: the ordered byte runs of one instance
//! plus the extent after which the next instance starts. Buffers of `count` instances are
//! the runs replayed `count` times, each shifted by one extent; [`FlatCursor`] walks that
//! replay.
//!
//! Displacements are unsigned, so every layout has a lower bound of zero.

pub mod cursor;

pub use cursor::FlatCursor;

use crate::error::{Result, TpError};

/// One contiguous run of a flattened datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datatype {
    runs: Vec<Run>,
    extent: u64,
}

impl Datatype {
    /// `n` contiguous bytes.
    pub fn bytes(n: u64) -> Self {
        Self::from_runs(vec![Run { offset: 0, len: n }], n)
    }

    /// `count` back-to-back copies of `inner`.
    pub fn contiguous(count: u64, inner: &Datatype) -> Self {
        Self::vector(count, 1, 1, inner)
    }

    /// `count` blocks of `blocklen` copies of `inner`, block starts `stride` extents apart.
    pub fn vector(count: u64, blocklen: u64, stride: u64, inner: &Datatype) -> Self {
        let mut runs = Vec::new();
        for b in 0..count {
            let base = b * stride * inner.extent;
            for k in 0..blocklen {
                inner.push_shifted(&mut runs, base + k * inner.extent);
            }
        }
        let extent = if count == 0 {
            0
        } else {
            (count - 1) * stride * inner.extent + blocklen * inner.extent
        };
        Self::from_runs(runs, extent)
    }

    /// Blocks of `blocklens[i]` copies of `inner` at displacements counted in `inner` extents.
    pub fn indexed(blocklens: &[u64], displs: &[u64], inner: &Datatype) -> Result<Self> {
        let byte_displs: Vec<u64> = displs.iter().map(|d| d * inner.extent).collect();
        Self::hindexed(blocklens, &byte_displs, inner)
    }

    /// Blocks of `blocklens[i]` copies of `inner` at byte displacements.
    pub fn hindexed(blocklens: &[u64], displs: &[u64], inner: &Datatype) -> Result<Self> {
        if blocklens.len() != displs.len() {
            return Err(TpError::InvalidArgument(format!(
                "{} block lengths but {} displacements",
                blocklens.len(),
                displs.len()
            )));
        }
        let mut runs = Vec::new();
        let mut extent = 0;
        for (&bl, &d) in blocklens.iter().zip(displs) {
            for k in 0..bl {
                inner.push_shifted(&mut runs, d + k * inner.extent);
            }
            if bl > 0 {
                extent = extent.max(d + bl * inner.extent);
            }
        }
        Ok(Self::from_runs(runs, extent))
    }

    /// Same runs, different extent (e.g. to leave a trailing gap between instances).
    pub fn resized(mut self, extent: u64) -> Self {
        self.extent = extent;
        self
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn extent(&self) -> u64 {
        self.extent
    }

    /// Number of data bytes in one instance.
    pub fn size(&self) -> u64 {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// One run at offset zero that fills the whole extent, so `count` instances are a single
    /// contiguous byte range.
    pub fn is_contiguous(&self) -> bool {
        match self.runs.as_slice() {
            [] => true,
            [r] => r.offset == 0 && r.len == self.extent,
            _ => false,
        }
    }

    /// Bytes a buffer must span to hold `count` instances, `None` if that overflows.
    pub fn span(&self, count: u64) -> Option<u64> {
        if count == 0 || self.runs.is_empty() {
            return Some(0);
        }
        let last = self.runs.iter().map(|r| r.offset + r.len).max().unwrap_or(0);
        (count - 1).checked_mul(self.extent)?.checked_add(last)
    }

    /// Data bytes in `count` instances, `None` if that overflows.
    pub fn data_len(&self, count: u64) -> Option<u64> {
        count.checked_mul(self.size())
    }

    fn push_shifted(&self, out: &mut Vec<Run>, shift: u64) {
        for r in &self.runs {
            out.push(Run { offset: r.offset + shift, len: r.len });
        }
    }

    fn from_runs(runs: Vec<Run>, extent: u64) -> Self {
        let mut merged: Vec<Run> = Vec::with_capacity(runs.len());
        for r in runs.into_iter().filter(|r| r.len > 0) {
            match merged.last_mut() {
                Some(last) if last.offset + last.len == r.offset => last.len += r.len,
                _ => merged.push(r),
            }
        }
        Self { runs: merged, extent }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_flattens_with_gaps() {
        let int = Datatype::bytes(4);
        let v = Datatype::vector(3, 2, 4, &int);
        assert_eq!(
            v.runs(),
            &[
                Run { offset: 0, len: 8 },
                Run { offset: 16, len: 8 },
                Run { offset: 32, len: 8 }
            ]
        );
        assert_eq!(v.extent(), 40);
        assert_eq!(v.size(), 24);
        assert!(!v.is_contiguous());
    }

    #[test]
    fn adjacent_runs_coalesce() {
        let v = Datatype::vector(4, 1, 1, &Datatype::bytes(8));
        assert!(v.is_contiguous());
        assert_eq!(v.runs().len(), 1);
        assert_eq!(v.size(), 32);
    }

    #[test]
    fn hindexed_keeps_order_and_drops_empty_blocks() {
        let t = Datatype::hindexed(&[2, 0, 3], &[10, 0, 0], &Datatype::bytes(1)).unwrap();
        assert_eq!(t.runs(), &[Run { offset: 10, len: 2 }, Run { offset: 0, len: 3 }]);
        assert_eq!(t.extent(), 12);
        assert!(Datatype::hindexed(&[1], &[], &Datatype::bytes(1)).is_err());
    }

    #[test]
    fn resized_extent_breaks_contiguity() {
        let t = Datatype::bytes(6).resized(8);
        assert!(!t.is_contiguous());
        assert_eq!(t.span(3), Some(22));
    }

    #[test]
    fn huge_counts_overflow_to_none() {
        let t = Datatype::bytes(4);
        assert_eq!(t.span(u64::MAX / 2), None);
        assert_eq!(t.data_len(u64::MAX / 2), None);
        assert_eq!(t.data_len(3), Some(12));
        assert_eq!(Datatype::bytes(1).span(u64::MAX), Some(u64::MAX));
    }
}
