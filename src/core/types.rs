//! Offset/length value types shared by every layer.

/// One contiguous piece of a file access: `len` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fragment {
    pub offset: u64,
    pub len: u64,
}

impl Fragment {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Inclusive byte range `[start, end]`, as exchanged between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, off: u64) -> bool {
        self.start <= off && off <= self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Encode as `[present, start, end]` for an all-gather.
    pub(crate) fn encode(ext: Option<Extent>) -> [u64; 3] {
        match ext {
            Some(e) => [1, e.start, e.end],
            None => [0, 0, 0],
        }
    }

    pub(crate) fn decode(words: &[u64]) -> Option<Extent> {
        match words {
            [1, start, end] => Some(Extent::new(*start, *end)),
            _ => None,
        }
    }
}
