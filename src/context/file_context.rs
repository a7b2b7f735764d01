//! Per-rank handle on a file opened collectively by a process group.
//!
//! A `FileContext` bundles what a collective write needs on one rank: the group
//! communicator, the shared storage, the hints, the file view, the atomicity flag, the
//! individual file pointer and the scratch window buffer an aggregator exchanges into.
//!
//! # Example
//! ```rust,ignore
//! let storage = Arc::new(MemStorage::new());
//! ThreadGroup::new(4).run(|comm| {
//!     let mut fh = FileContext::new(comm, Arc::clone(&storage), Hints::default());
//!     let r = fh.comm().rank() as u64;
//!     fh.write_at_all(r * 100, &[r as u8; 100], 100, &Datatype::bytes(1))
//! })?;
//! ```

use crate::collective::independent::write_independent;
use crate::collective::write::write_strided_coll;
use crate::config::Hints;
use crate::core::traits::Storage;
use crate::datatype::Datatype;
use crate::error::{Result, StorageOp, TpError};
use crate::parallel::Comm;
use crate::utils::stats::WriteStats;
use crate::view::FileView;

/// Where a write starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePointer {
    /// Explicit offset, in etypes relative to the view.
    Explicit(u64),
    /// This rank's individual file pointer, advanced by the write.
    Individual,
}

pub struct FileContext<C, S> {
    pub(crate) comm: C,
    pub(crate) storage: S,
    pub(crate) hints: Hints,
    pub(crate) view: FileView,
    pub(crate) atomicity: bool,
    /// Individual file pointer, in etypes.
    pub(crate) fp_ind: u64,
    /// Aggregator window buffer, reused across calls.
    pub(crate) io_buf: Vec<u8>,
}

impl<C: Comm, S: Storage> FileContext<C, S> {
    pub fn new(comm: C, storage: S, hints: Hints) -> Self {
        Self {
            comm,
            storage,
            hints,
            view: FileView::default(),
            atomicity: false,
            fp_ind: 0,
            io_buf: Vec::new(),
        }
    }

    /// Install a new view; the individual file pointer moves back to its start.
    pub fn set_view(&mut self, view: FileView) {
        self.view = view;
        self.fp_ind = 0;
    }

    /// Strict consistency: receives of each window complete one at a time after the sends.
    pub fn set_atomicity(&mut self, atomic: bool) {
        self.atomicity = atomic;
    }

    pub fn atomicity(&self) -> bool {
        self.atomicity
    }

    pub fn set_hints(&mut self, hints: Hints) {
        self.hints = hints;
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn view(&self) -> &FileView {
        &self.view
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Individual file pointer, in etypes.
    pub fn position(&self) -> u64 {
        self.fp_ind
    }

    pub fn seek(&mut self, offset: u64) {
        self.fp_ind = offset;
    }

    /// Collective write at an explicit offset. Every rank of the group must call it.
    pub fn write_at_all(
        &mut self,
        offset: u64,
        buf: &[u8],
        count: u64,
        datatype: &Datatype,
    ) -> Result<WriteStats> {
        write_strided_coll(self, buf, count, datatype, FilePointer::Explicit(offset))
    }

    /// Collective write at the individual file pointer.
    pub fn write_all(&mut self, buf: &[u8], count: u64, datatype: &Datatype) -> Result<WriteStats> {
        write_strided_coll(self, buf, count, datatype, FilePointer::Individual)
    }

    /// Independent write at an explicit offset; no other rank takes part.
    pub fn write_at(
        &mut self,
        offset: u64,
        buf: &[u8],
        count: u64,
        datatype: &Datatype,
    ) -> Result<WriteStats> {
        self.check_buffer(buf, count, datatype, offset)?;
        write_independent(&self.storage, &self.view, buf, count, datatype, offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.storage.sync().map_err(|source| TpError::Storage {
            op: StorageOp::Write,
            offset: 0,
            len: 0,
            source,
        })
    }

    /// Rejects buffers too short for `count` instances, sizes that are not whole etypes and
    /// accesses past the largest file offset. Returns the number of data bytes to write.
    pub(crate) fn check_buffer(
        &self,
        buf: &[u8],
        count: u64,
        datatype: &Datatype,
        offset: u64,
    ) -> Result<u64> {
        let too_large = || TpError::InvalidArgument(format!("{count} elements overflow the buffer size"));
        let span = datatype.span(count).ok_or_else(too_large)?;
        let bufsize = datatype.data_len(count).ok_or_else(too_large)?;
        if (buf.len() as u64) < span {
            return Err(TpError::InvalidArgument(format!(
                "buffer holds {} bytes, {count} elements need {span}",
                buf.len()
            )));
        }
        let etype_size = self.view.etype_size();
        if bufsize % etype_size != 0 {
            return Err(TpError::InvalidArgument(format!(
                "{bufsize} bytes is not a whole number of {etype_size}-byte etypes"
            )));
        }
        if self.view.access_end(bufsize, offset).is_none() {
            return Err(TpError::InvalidArgument(format!(
                "{bufsize} bytes at offset {offset} run past the largest file offset"
            )));
        }
        Ok(bufsize)
    }
}
