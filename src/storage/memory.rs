//! In-memory storage shared by the ranks of an in-process group.
//!
//! Every successful read and write is appended to an operation log, and reads or writes can
//! be made to fail on demand, which lets tests observe exactly what the aggregators did.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::traits::Storage;
use crate::core::types::Fragment;

/// A logged storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Read(Fragment),
    Write(Fragment),
}

#[derive(Debug, Default)]
pub struct MemStorage {
    data: Mutex<Vec<u8>>,
    log: Mutex<Vec<MemOp>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-filled with `len` copies of `byte`.
    pub fn filled(len: usize, byte: u8) -> Self {
        Self {
            data: Mutex::new(vec![byte; len]),
            ..Self::default()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn ops(&self) -> Vec<MemOp> {
        self.log.lock().clone()
    }

    pub fn writes(&self) -> Vec<Fragment> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MemOp::Write(f) => Some(f),
                MemOp::Read(_) => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<Fragment> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MemOp::Read(f) => Some(f),
                MemOp::Write(_) => None,
            })
            .collect()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Storage for MemStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected read failure"));
        }
        let data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.log.lock().push(MemOp::Read(Fragment::new(offset, buf.len() as u64)));
        Ok(n)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        self.log.lock().push(MemOp::Write(Fragment::new(offset, bytes.len() as u64)));
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}
