//! Bounded-window exchange: an aggregator walks `[st_loc, end_loc]` in windows of at most
//! `cb_buffer_size` bytes, exchanging and writing one window per round.
//!
//! Every rank runs the group-wide maximum number of rounds. A rank out of work of its own
//! still joins the remaining rounds with an empty plan, so ranks sending to a busier
//! aggregator are never left waiting.

use tracing::{debug, error, warn};

use super::pack::SendState;
use super::window::{SourceWindow, WindowPlan, exchange_window};
use crate::core::traits::Storage;
use crate::error::{Result, StorageOp, TpError};
use crate::parallel::Comm;
use crate::request::InboundRequestSet;

#[derive(Debug, Default)]
pub(crate) struct ExchangeOutcome {
    /// Rounds run by every rank.
    pub max_rounds: usize,
    pub windows_written: usize,
    pub rmw_reads: usize,
    /// First overlapping write region seen; the rounds still ran to completion.
    pub overlap: Option<TpError>,
}

/// First byte and last byte of everything this aggregator receives.
fn inbound_range(others: &[InboundRequestSet]) -> Option<(u64, u64)> {
    others
        .iter()
        .flat_map(|r| r.fragments.iter())
        .filter(|f| f.len > 0)
        .fold(None, |acc, f| {
            let (lo, hi) = (f.offset, f.end() - 1);
            Some(match acc {
                Some((a, b)) => (lo.min(a), hi.max(b)),
                None => (lo, hi),
            })
        })
}

/// Take from each source the fragments that start inside `[off, off + size)`.
///
/// Cursors advance past fully taken fragments; a fragment cut by the window end keeps the
/// cursor and records how much of it was taken. A cut fragment followed by another fragment
/// of the same source starting inside the window is an overlapping write region.
pub(crate) fn plan_window(
    others: &mut [InboundRequestSet],
    off: u64,
    size: u64,
) -> (WindowPlan, Option<TpError>) {
    let win_end = off + size;
    let mut overlap = None;
    let mut sources = Vec::with_capacity(others.len());

    for (i, req) in others.iter_mut().enumerate() {
        if req.is_empty() {
            sources.push(SourceWindow::default());
            continue;
        }
        let carried = req.partial_recv;
        let mut sw = SourceWindow { start_pos: req.cursor, skip_first: carried, ..Default::default() };
        let mut j = req.cursor;
        while let Some(f) = req.fragments.get(j).copied() {
            let consumed = if j == sw.start_pos { carried } else { 0 };
            let req_off = f.offset + consumed;
            let req_len = f.len - consumed;
            if req_off >= win_end {
                break;
            }
            sw.count += 1;
            let avail = win_end - req_off;
            if avail < req_len {
                sw.recv_size += avail;
                sw.split_len = Some(avail);
                req.partial_recv = consumed + avail;
                match req.fragments.get(j + 1) {
                    Some(next) if next.offset < win_end && overlap.is_none() => {
                        overlap = Some(TpError::OverlappingWriteRegion {
                            source_rank: i,
                            offset: next.offset,
                        });
                    }
                    _ => {}
                }
                break;
            }
            sw.recv_size += req_len;
            req.partial_recv = 0;
            j += 1;
        }
        req.cursor = j;
        sources.push(sw);
    }
    (WindowPlan { off, size, sources }, overlap)
}

/// Exchange and write every window of this aggregator's range. Collective.
///
/// `wbuf` is the scratch window buffer; it grows to `cb_buffer_size` when this rank has
/// something to write. A storage failure returns at once, leaving the remaining rounds
/// unrun on this rank while peers still expect it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn exch_and_write<C, S>(
    comm: &C,
    storage: &S,
    sender: &mut SendState<'_>,
    others: &mut [InboundRequestSet],
    cb_buffer_size: usize,
    wbuf: &mut Vec<u8>,
    atomicity: bool,
) -> Result<ExchangeOutcome>
where
    C: Comm,
    S: Storage + ?Sized,
{
    let cb = cb_buffer_size.max(1) as u64;
    let range = inbound_range(others);
    let (st_loc, total) = match range {
        Some((lo, hi)) => (lo, hi - lo + 1),
        None => (0, 0),
    };
    let rounds = total.div_ceil(cb) as usize;
    let max_rounds = comm.all_reduce_max(rounds as u64)? as usize;
    debug!(rank = comm.rank(), rounds, max_rounds, st_loc, total, "exchange rounds");

    let mut outcome = ExchangeOutcome { max_rounds, ..Default::default() };
    if rounds > 0 && wbuf.len() < cb_buffer_size {
        wbuf.resize(cb_buffer_size, 0);
    }

    let mut off = st_loc;
    let mut done = 0u64;
    for round in 0..rounds {
        let size = cb.min(total - done);
        let (plan, overlap) = plan_window(others, off, size);
        if let Some(e) = overlap {
            warn!(round, error = %e, "overlapping write regions from one source");
            outcome.overlap.get_or_insert(e);
        }

        let window = &mut wbuf[..size as usize];
        let res = exchange_window(comm, storage, sender, others, &plan, window, round, atomicity)?;
        if let Some(e) = res.overlap {
            outcome.overlap.get_or_insert(e);
        }
        if res.rmw {
            outcome.rmw_reads += 1;
        }
        if res.received {
            storage.write_at(off, window).map_err(|source| {
                error!(offset = off, len = size, %source, "window write failed");
                TpError::Storage { op: StorageOp::Write, offset: off, len: size as usize, source }
            })?;
            outcome.windows_written += 1;
        }
        debug!(round, off, size, received = res.received, hole = res.hole, "window");

        off += size;
        done += size;
    }

    let empty = WindowPlan::empty(comm.size());
    for round in rounds..max_rounds {
        exchange_window(comm, storage, sender, others, &empty, &mut [], round, atomicity)?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Fragment;

    #[test]
    fn fragment_cut_by_the_window_end_continues_next_round() {
        let mut others = vec![InboundRequestSet::new(vec![Fragment::new(0, 150)])];
        let (p0, o0) = plan_window(&mut others, 0, 100);
        assert!(o0.is_none());
        assert_eq!(p0.sources[0].recv_size, 100);
        assert_eq!(p0.sources[0].split_len, Some(100));
        assert_eq!(others[0].cursor, 0);
        assert_eq!(others[0].partial_recv, 100);

        let (p1, _) = plan_window(&mut others, 100, 50);
        assert_eq!(p1.sources[0].recv_size, 50);
        assert_eq!(p1.sources[0].skip_first, 100);
        assert_eq!(p1.sources[0].split_len, None);
        assert_eq!(others[0].cursor, 1);
        assert_eq!(others[0].partial_recv, 0);
    }

    #[test]
    fn fragments_past_the_window_wait() {
        let mut others = vec![
            InboundRequestSet::new(vec![Fragment::new(0, 10), Fragment::new(20, 10)]),
            InboundRequestSet::new(vec![Fragment::new(40, 10)]),
        ];
        let (plan, _) = plan_window(&mut others, 0, 30);
        assert_eq!(plan.sources[0].count, 2);
        assert_eq!(plan.sources[0].recv_size, 20);
        assert_eq!(plan.sources[1].count, 0);
        assert_eq!(plan.sources[1].recv_size, 0);
        assert_eq!(others[1].cursor, 0);
    }

    #[test]
    fn same_source_overlap_is_reported() {
        let mut others = vec![
            InboundRequestSet::default(),
            InboundRequestSet::new(vec![Fragment::new(0, 150), Fragment::new(50, 10)]),
        ];
        let (_, overlap) = plan_window(&mut others, 0, 100);
        assert!(matches!(
            overlap,
            Some(TpError::OverlappingWriteRegion { source_rank: 1, offset: 50 })
        ));
    }

    #[test]
    fn inbound_range_spans_every_source() {
        let others = vec![
            InboundRequestSet::new(vec![Fragment::new(100, 10)]),
            InboundRequestSet::default(),
            InboundRequestSet::new(vec![Fragment::new(40, 5), Fragment::new(300, 1)]),
        ];
        assert_eq!(inbound_range(&others), Some((40, 300)));
        assert_eq!(inbound_range(&[InboundRequestSet::default()]), None);
    }
}
