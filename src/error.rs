use thiserror::Error;

// Unified error type for twophase

pub type Result<T> = std::result::Result<T, TpError>;

/// Which storage primitive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Read,
    Write,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOp::Read => f.write_str("read"),
            StorageOp::Write => f.write_str("write"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TpError {
    #[error("filetype specifies overlapping write regions (source rank {source_rank}, offset {offset})")]
    OverlappingWriteRegion { source_rank: usize, offset: u64 },
    #[error("storage {op} of {len} bytes at offset {offset} failed: {source}")]
    Storage {
        op: StorageOp,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },
    #[error("collective write failed on a peer process")]
    PeerFailed,
    #[error("communication error: {0}")]
    Comm(#[from] CommError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid hint {key}={value}: {reason}")]
    InvalidHint {
        key: String,
        value: String,
        reason: &'static str,
    },
    #[error("offset {0} lies outside every file domain")]
    OutsideFileDomains(u64),
}

/// Failures of the process-group transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("rank {0} left the group while peers still expected it")]
    PeerDeparted(usize),
    #[error("ranks entered different collectives ({first} vs {second})")]
    CollectiveMismatch {
        first: &'static str,
        second: &'static str,
    },
    #[error("message from rank {source_rank} has {actual} bytes, expected {expected}")]
    MessageLength {
        source_rank: usize,
        expected: usize,
        actual: usize,
    },
    #[error("failed to launch process group: {0}")]
    Launch(String),
    #[error("MPI error: {0}")]
    Mpi(String),
}

/// Integer error classes exchanged by the end-of-call reduction.
///
/// Ordered by severity so that a maximum reduction yields the worst class in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u64)]
pub enum ErrorClass {
    Success = 0,
    Io = 32,
}

impl ErrorClass {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            0 => ErrorClass::Success,
            _ => ErrorClass::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_codes_are_ordered_by_severity() {
        assert!(ErrorClass::Io.code() > ErrorClass::Success.code());
        assert_eq!(ErrorClass::from_code(ErrorClass::Io.code()), ErrorClass::Io);
        assert_eq!(ErrorClass::from_code(7), ErrorClass::Io);
        assert_eq!(ErrorClass::from_code(0), ErrorClass::Success);
    }

    #[test]
    fn overlap_message_names_the_source() {
        let e = TpError::OverlappingWriteRegion { source_rank: 1, offset: 50 };
        assert!(e.to_string().contains("source rank 1, offset 50"));
    }
}
