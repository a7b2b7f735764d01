//! Independent path: every rank writes its own fragments, no exchange.

use tracing::{debug, error};

use crate::core::traits::Storage;
use crate::datatype::Datatype;
use crate::datatype::cursor::FlatCursor;
use crate::error::{Result, StorageOp, TpError};
use crate::utils::stats::WriteStats;
use crate::view::{FileView, calc_my_off_len};

fn write_piece<S: Storage + ?Sized>(storage: &S, offset: u64, data: &[u8]) -> Result<()> {
    storage.write_at(offset, data).map_err(|source| {
        error!(offset, len = data.len(), %source, "independent write failed");
        TpError::Storage { op: StorageOp::Write, offset, len: data.len(), source }
    })
}

/// Write `count` instances of `datatype` from `buf` at `offset` etypes into `view`.
///
/// A contiguous buffer under a contiguous filetype goes out as one write; otherwise each
/// fragment of the access list is written on its own.
pub fn write_independent<S: Storage + ?Sized>(
    storage: &S,
    view: &FileView,
    buf: &[u8],
    count: u64,
    datatype: &Datatype,
    offset: u64,
) -> Result<WriteStats> {
    let bufsize = datatype
        .data_len(count)
        .filter(|&n| view.access_end(n, offset).is_some())
        .ok_or_else(|| TpError::InvalidArgument(format!("{count} elements at offset {offset} overflow")))?;
    if datatype.span(count).is_none_or(|span| (buf.len() as u64) < span) {
        return Err(TpError::InvalidArgument(format!(
            "buffer of {} bytes cannot hold {count} elements",
            buf.len()
        )));
    }
    let access = calc_my_off_len(view, bufsize, offset);
    debug!(bytes = bufsize, fragments = access.fragments.len(), "independent write");

    if datatype.is_contiguous() {
        let mut pos = 0usize;
        for f in &access.fragments {
            let n = f.len as usize;
            write_piece(storage, f.offset, &buf[pos..pos + n])?;
            pos += n;
        }
    } else {
        let mut cursor = FlatCursor::new(datatype);
        let mut staging = Vec::new();
        for f in &access.fragments {
            staging.clear();
            cursor.copy_into(buf, f.len, &mut staging);
            write_piece(storage, f.offset, &staging)?;
        }
    }
    Ok(WriteStats::independent(bufsize))
}
