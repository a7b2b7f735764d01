//! Cursor over the cyclic replay of a flattened datatype.

use super::Datatype;

/// Position inside a buffer described by repeated instances of a [`Datatype`].
///
/// Tracks the current run, the bytes already consumed from it and how many whole instances
/// have been passed. Moving past the last run wraps to the first run of the next instance.
#[derive(Debug, Clone)]
pub struct FlatCursor<'a> {
    ty: &'a Datatype,
    run: usize,
    consumed: u64,
    repeat: u64,
}

impl<'a> FlatCursor<'a> {
    pub fn new(ty: &'a Datatype) -> Self {
        Self { ty, run: 0, consumed: 0, repeat: 0 }
    }

    /// Absolute buffer offset of the cursor and the bytes left in the current run.
    pub fn current_run(&self) -> (u64, u64) {
        match self.ty.runs().get(self.run) {
            Some(r) => (
                self.repeat * self.ty.extent() + r.offset + self.consumed,
                r.len - self.consumed,
            ),
            None => (self.repeat * self.ty.extent(), 0),
        }
    }

    /// Jump to data byte `pos`, counted from the start of the buffer.
    pub fn seek(&mut self, pos: u64) {
        let ty = self.ty;
        let size = ty.size();
        self.run = 0;
        self.consumed = 0;
        self.repeat = 0;
        if size == 0 {
            return;
        }
        self.repeat = pos / size;
        let mut rem = pos % size;
        for (i, r) in ty.runs().iter().enumerate() {
            if rem < r.len {
                self.run = i;
                self.consumed = rem;
                return;
            }
            rem -= r.len;
        }
    }

    /// Skip `n` data bytes.
    pub fn advance(&mut self, mut n: u64) {
        while n > 0 {
            let (_, left) = self.current_run();
            if left == 0 {
                // Datatype without data bytes.
                return;
            }
            let step = n.min(left);
            self.consumed += step;
            n -= step;
            if self.consumed == self.ty.runs()[self.run].len {
                self.next_run();
            }
        }
    }

    /// Append the next `n` data bytes of `src` to `out` and move past them.
    pub fn copy_into(&mut self, src: &[u8], mut n: u64, out: &mut Vec<u8>) {
        while n > 0 {
            let (at, left) = self.current_run();
            if left == 0 {
                return;
            }
            let step = n.min(left);
            let at = at as usize;
            out.extend_from_slice(&src[at..at + step as usize]);
            self.advance(step);
            n -= step;
        }
    }

    fn next_run(&mut self) {
        self.consumed = 0;
        if self.run + 1 < self.ty.runs().len() {
            self.run += 1;
        } else {
            self.run = 0;
            self.repeat += 1;
        }
    }
}
