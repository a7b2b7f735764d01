//! Core storage traits for twophase.

use std::io;
use std::sync::Arc;

/// Positional byte storage: the raw contiguous read/write primitive.
///
/// Implementations must be shareable between ranks of an in-process group, so every
/// operation takes `&self`.
pub trait Storage: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`; returns how many bytes were read.
    /// A short count means end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    /// Write all of `data` at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;
    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;
    /// Flush to stable storage.
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, data)
    }
    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
    fn sync(&self) -> io::Result<()> {
        (**self).sync()
    }
}
