//! File-backed storage using positional reads and writes.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::config::FileMode;
use crate::core::traits::Storage;

/// A regular file accessed with `pread`/`pwrite`, so concurrent ranks never share a cursor.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(path: P, mode: FileMode) -> io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(mode.readable()).write(mode.writable());
        if mode.contains(FileMode::CREATE | FileMode::EXCL) {
            opts.create_new(true);
        } else if mode.contains(FileMode::CREATE) {
            opts.create(true);
        }
        Ok(Self { file: opts.open(path)? })
    }
}

impl Storage for FileStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_past_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStorage::open(dir.path().join("f"), FileMode::default()).unwrap();
        fs.write_at(4, b"abcd").unwrap();
        let mut buf = [0xffu8; 12];
        let n = fs.read_at(2, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..6], &[0, 0, b'a', b'b', b'c', b'd']);
        assert_eq!(fs.size().unwrap(), 8);
    }

    #[test]
    fn exclusive_create_fails_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        FileStorage::open(&path, FileMode::default()).unwrap();
        let err = FileStorage::open(&path, FileMode::RDWR | FileMode::CREATE | FileMode::EXCL);
        assert!(err.is_err());
    }
}
