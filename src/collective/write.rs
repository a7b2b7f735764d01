//! Collective-write driver.
//!
//! Chooses between the two-phase exchange and independent writes, routes requests to the
//! aggregators, runs the bounded-window exchange and reduces the outcome across the group.

use tracing::{debug, trace, warn};

use super::exchange::{ExchangeOutcome, exch_and_write};
use super::independent::write_independent;
use super::pack::SendState;
use crate::config::HintMode;
use crate::context::file_context::{FileContext, FilePointer};
use crate::core::traits::Storage;
use crate::core::types::Extent;
use crate::datatype::Datatype;
use crate::domain::{FileDomains, aggregator_ranks};
use crate::error::{ErrorClass, Result, TpError};
use crate::parallel::Comm;
use crate::request::{calc_my_req, calc_others_req};
use crate::utils::stats::{Strategy, WriteStats};
use crate::view::{AccessList, calc_my_off_len};

/// Number of ranks whose access starts before the previous rank's access ends.
///
/// Depends only on the all-gathered extents, so every rank reaches the same answer.
pub fn interleave_count(extents: &[Option<Extent>]) -> usize {
    extents
        .windows(2)
        .filter(|w| matches!((w[0], w[1]), (Some(prev), Some(cur)) if cur.start < prev.end))
        .count()
}

/// Write `count` instances of `datatype` from `buf` through the context's view. Collective.
pub fn write_strided_coll<C: Comm, S: Storage>(
    ctx: &mut FileContext<C, S>,
    buf: &[u8],
    count: u64,
    datatype: &Datatype,
    pointer: FilePointer,
) -> Result<WriteStats> {
    let offset = match pointer {
        FilePointer::Explicit(off) => off,
        FilePointer::Individual => ctx.fp_ind,
    };
    let bufsize = ctx.check_buffer(buf, count, datatype, offset)?;

    let stats = if ctx.hints.cb_write == HintMode::Disable {
        debug!("collective buffering disabled, writing independently");
        write_independent(&ctx.storage, &ctx.view, buf, count, datatype, offset)?
    } else {
        let access = calc_my_off_len(&ctx.view, bufsize, offset);
        let words = ctx.comm.all_gather(&Extent::encode(access.extent))?;
        let extents: Vec<Option<Extent>> = words.chunks_exact(3).map(Extent::decode).collect();
        let interleave = interleave_count(&extents);

        if interleave == 0 && ctx.hints.cb_write == HintMode::Automatic {
            debug!("accesses do not interleave, writing independently");
            write_independent(&ctx.storage, &ctx.view, buf, count, datatype, offset)?
        } else {
            debug!(interleave, "two-phase collective write");
            collective(ctx, buf, datatype, &access, &extents, bufsize)?
        }
    };

    if pointer == FilePointer::Individual {
        ctx.fp_ind += bufsize / ctx.view.etype_size();
    }
    Ok(stats)
}

fn collective<C: Comm, S: Storage>(
    ctx: &mut FileContext<C, S>,
    buf: &[u8],
    datatype: &Datatype,
    access: &AccessList,
    extents: &[Option<Extent>],
    bufsize: u64,
) -> Result<WriteStats> {
    let FileContext { comm, storage, hints, atomicity, io_buf, .. } = ctx;
    let nprocs = comm.size();
    let ranklist = aggregator_ranks(nprocs, hints.aggregators(nprocs));
    let single_aggregator = ranklist.len() == 1;
    let root = ranklist[0];
    let domains = FileDomains::partition(
        extents,
        ranklist,
        hints.min_fdomain_size,
        hints.striping_unit,
    );

    debug!(
        naggs = domains.ranklist().len(),
        min_st_offset = domains.min_st_offset(),
        fd_size = domains.fd_size(),
        own = ?domains.domain_of_rank(comm.rank()),
        "file domains"
    );

    let res = route_and_exchange(
        &*comm,
        &*storage,
        hints.cb_buffer_size,
        *atomicity,
        io_buf,
        buf,
        datatype,
        access,
        &domains,
    );

    // Runs on every rank, also after local success: no rank leaves before all have drained.
    let local = match &res {
        Err(_) | Ok(ExchangeOutcome { overlap: Some(_), .. }) => ErrorClass::Io,
        Ok(_) => ErrorClass::Success,
    };
    let reduced = if single_aggregator {
        comm.broadcast(local.code(), root)
    } else {
        comm.all_reduce_max(local.code())
    };

    let outcome = res?;
    if let Some(e) = outcome.overlap {
        return Err(e);
    }
    if ErrorClass::from_code(reduced?) != ErrorClass::Success {
        warn!(rank = comm.rank(), "collective write failed on another rank");
        return Err(TpError::PeerFailed);
    }
    Ok(WriteStats {
        bytes: bufsize,
        strategy: Strategy::Collective,
        rounds: outcome.max_rounds,
        windows_written: outcome.windows_written,
        rmw_reads: outcome.rmw_reads,
    })
}

#[allow(clippy::too_many_arguments)]
fn route_and_exchange<C: Comm, S: Storage>(
    comm: &C,
    storage: &S,
    cb_buffer_size: usize,
    atomicity: bool,
    io_buf: &mut Vec<u8>,
    buf: &[u8],
    datatype: &Datatype,
    access: &AccessList,
    domains: &FileDomains,
) -> Result<ExchangeOutcome> {
    let nprocs = comm.size();
    let my_req = calc_my_req(access, domains, nprocs)?;
    trace!(
        fragments = access.fragments.len(),
        bytes = access.total_len(),
        aggregators = my_req.procs(),
        "requests routed"
    );
    let mut others = calc_others_req(comm, &my_req)?;
    let mut sender = SendState::new(buf, datatype, &my_req);
    exch_and_write(comm, storage, &mut sender, &mut others, cb_buffer_size, io_buf, atomicity)
}
