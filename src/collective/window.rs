//! One exchange window: size metadata, hole detection, optional read-modify-write, then the
//! data transfer into the aggregator's window buffer.

use tracing::{trace, warn};

use super::pack::SendState;
use crate::core::traits::Storage;
use crate::core::types::Fragment;
use crate::error::{Result, StorageOp, TpError};
use crate::parallel::{Comm, Exchange, Incoming, Tag};
use crate::request::InboundRequestSet;
use crate::utils::heap_merge::{Tagged, heap_merge};

/// Fragments one source contributes to a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SourceWindow {
    /// Index of the first fragment taken.
    pub start_pos: usize,
    /// Number of fragments taken, including a trailing split one.
    pub count: usize,
    /// Bytes of the first fragment consumed by earlier windows.
    pub skip_first: u64,
    /// Bytes taken from the last fragment when the window end splits it.
    pub split_len: Option<u64>,
    pub recv_size: u64,
}

/// Byte range `[off, off + size)` of the current window and each source's share of it.
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowPlan {
    pub off: u64,
    pub size: u64,
    pub sources: Vec<SourceWindow>,
}

impl WindowPlan {
    /// A window this rank only takes part in: nothing is received or written.
    pub(crate) fn empty(nprocs: usize) -> Self {
        Self { off: 0, size: 0, sources: vec![SourceWindow::default(); nprocs] }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WindowResult {
    /// Some source sent data, so the window buffer must be written.
    pub received: bool,
    pub hole: bool,
    /// The window buffer was read from storage before the data landed.
    pub rmw: bool,
    pub overlap: Option<TpError>,
}

/// File-offset pieces a source delivers this window, in arrival order.
pub(crate) fn scatter_pieces(req: &InboundRequestSet, sw: &SourceWindow) -> Vec<Fragment> {
    (0..sw.count)
        .map(|k| {
            let f = req.fragments[sw.start_pos + k];
            let (mut off, mut len) = (f.offset, f.len);
            if k == 0 {
                off += sw.skip_first;
                len -= sw.skip_first;
            }
            match sw.split_len {
                Some(split) if k + 1 == sw.count => len = split,
                _ => {}
            }
            Fragment::new(off, len)
        })
        .collect()
}

/// Part of `piece` inside the window starting at `win_off`.
fn clip(piece: Fragment, win_off: u64) -> Fragment {
    let start = piece.offset.max(win_off);
    Fragment::new(start, piece.end().saturating_sub(start))
}

/// True when the merged pieces leave part of `[off, off + size)` uncovered.
pub(crate) fn has_hole(merged: &[Tagged], off: u64, size: u64) -> bool {
    let Some(first) = merged.first() else {
        return size > 0;
    };
    if first.piece.offset != off {
        return true;
    }
    let mut covered_end = first.piece.end();
    for t in &merged[1..] {
        if t.piece.offset > covered_end {
            return true;
        }
        covered_end = covered_end.max(t.piece.end());
    }
    covered_end - off != size
}

/// First piece that lands on bytes an earlier piece already covers.
pub(crate) fn find_overlap(merged: &[Tagged]) -> Option<(usize, u64)> {
    let mut covered_end = 0u64;
    for (i, t) in merged.iter().enumerate() {
        if i > 0 && t.piece.offset < covered_end {
            return Some((t.list, t.piece.offset));
        }
        covered_end = covered_end.max(t.piece.end());
    }
    None
}

/// Read `wbuf.len()` bytes at `off`; bytes past the end of storage read as zero.
fn read_window<S: Storage + ?Sized>(storage: &S, off: u64, wbuf: &mut [u8]) -> Result<()> {
    let n = storage.read_at(off, wbuf).map_err(|source| TpError::Storage {
        op: StorageOp::Read,
        offset: off,
        len: wbuf.len(),
        source,
    })?;
    wbuf[n..].fill(0);
    Ok(())
}

/// Run one window on this rank.
///
/// `wbuf` is the window buffer, exactly `plan.size` bytes. Every rank calls this the same
/// number of times; ranks with nothing to receive pass an empty plan.
#[allow(clippy::too_many_arguments)]
pub(crate) fn exchange_window<C, S>(
    comm: &C,
    storage: &S,
    sender: &mut SendState<'_>,
    others: &[InboundRequestSet],
    plan: &WindowPlan,
    wbuf: &mut [u8],
    round: usize,
    atomicity: bool,
) -> Result<WindowResult>
where
    C: Comm,
    S: Storage + ?Sized,
{
    let nprocs = comm.size();
    let recv_size: Vec<u64> = plan.sources.iter().map(|s| s.recv_size).collect();
    let send_size = comm.all_to_all(&recv_size)?;
    trace!(round, ?recv_size, ?send_size, "window sizes");

    let mut result = WindowResult::default();
    let sources: Vec<usize> = (0..nprocs).filter(|&i| recv_size[i] > 0).collect();
    let pieces: Vec<Vec<Fragment>> = (0..nprocs)
        .map(|i| {
            if recv_size[i] > 0 {
                scatter_pieces(&others[i], &plan.sources[i])
            } else {
                Vec::new()
            }
        })
        .collect();

    if !sources.is_empty() {
        result.received = true;
        let clipped: Vec<Vec<Fragment>> = pieces
            .iter()
            .map(|ps| {
                ps.iter()
                    .map(|&p| clip(p, plan.off))
                    .filter(|p| p.len > 0)
                    .collect()
            })
            .collect();
        let lists: Vec<&[Fragment]> = clipped.iter().map(Vec::as_slice).collect();
        let merged = heap_merge(&lists);
        result.hole = has_hole(&merged, plan.off, plan.size);
        if let Some((source_rank, offset)) = find_overlap(&merged) {
            warn!(source_rank, offset, "overlapping write regions in window");
            result.overlap = Some(TpError::OverlappingWriteRegion { source_rank, offset });
        }
        if result.hole {
            read_window(storage, plan.off, wbuf)?;
            result.rmw = true;
        }
    }

    let me = comm.rank();
    let sends = sender.outgoing(&send_size, round);
    let recvs = sources
        .iter()
        .map(|&source| Incoming {
            source,
            tag: Tag::window(me, round, nprocs),
            len: recv_size[source] as usize,
        })
        .collect();
    let payloads = comm.exchange(Exchange { sends, recvs, ordered: atomicity })?;

    // Ascending source order: where pieces overlap, the highest rank's bytes stay.
    for (&source, payload) in sources.iter().zip(&payloads) {
        let mut pos = 0usize;
        for &p in &pieces[source] {
            let c = clip(p, plan.off);
            let skip = (c.offset - p.offset).min(p.len) as usize;
            let at = (c.offset - plan.off) as usize;
            let n = c.len as usize;
            wbuf[at..at + n].copy_from_slice(&payload[pos + skip..pos + skip + n]);
            pos += p.len as usize;
        }
    }
    Ok(result)
}
