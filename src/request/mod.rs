//! Request routing between processes and aggregators.
//!
//! [`calc_my_req`] splits a process's own access list by file domain: one
//! [`OutboundRequestSet`] per aggregator. [`calc_others_req`] delivers those lists to the
//! aggregators, so each aggregator learns, per source rank, which fragments of its domain it
//! will receive: the [`InboundRequestSet`]s.

use crate::core::types::Fragment;
use crate::domain::FileDomains;
use crate::error::Result;
use crate::parallel::{Comm, Exchange, Incoming, Outgoing, Tag};
use crate::view::AccessList;

/// The part of one process's request that falls into one aggregator's domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRequestSet {
    pub fragments: Vec<Fragment>,
    /// Offset of each fragment's first byte in the packed source data stream.
    pub buf_offsets: Vec<u64>,
}

impl OutboundRequestSet {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Fragments one source rank sends into this aggregator's domain, sorted by offset.
///
/// The cursor and `partial_recv` record how far the fragments have been received across
/// exchange windows; they only move forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequestSet {
    pub fragments: Vec<Fragment>,
    /// Index of the first fragment not yet fully received.
    pub(crate) cursor: usize,
    /// Bytes of `fragments[cursor]` received by earlier windows.
    pub(crate) partial_recv: u64,
}

impl InboundRequestSet {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments, cursor: 0, partial_recv: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Outbound request sets of one process, indexed by destination rank.
#[derive(Debug, Clone, Default)]
pub struct MyRequests {
    pub per_rank: Vec<OutboundRequestSet>,
}

impl MyRequests {
    /// Number of ranks that receive anything from this process.
    pub fn procs(&self) -> usize {
        self.per_rank.iter().filter(|r| !r.is_empty()).count()
    }
}

/// Split `access` into per-aggregator request sets.
pub fn calc_my_req(access: &AccessList, domains: &FileDomains, nprocs: usize) -> Result<MyRequests> {
    let mut per_rank = vec![OutboundRequestSet::default(); nprocs];
    let mut curr_idx = 0u64;

    for frag in &access.fragments {
        let mut off = frag.offset;
        let mut rem_len = frag.len;
        while rem_len > 0 {
            let (p, len) = domains.aggregator_for(off, rem_len)?;
            let set = &mut per_rank[p];
            set.fragments.push(Fragment::new(off, len));
            set.buf_offsets.push(curr_idx);
            curr_idx += len;
            off += len;
            rem_len -= len;
        }
    }
    Ok(MyRequests { per_rank })
}

fn encode(frags: &[Fragment]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frags.len() * 16);
    for f in frags {
        out.extend_from_slice(&f.offset.to_le_bytes());
        out.extend_from_slice(&f.len.to_le_bytes());
    }
    out
}

fn decode(bytes: &[u8]) -> Vec<Fragment> {
    bytes
        .chunks_exact(16)
        .map(|c| {
            let mut off = [0u8; 8];
            let mut len = [0u8; 8];
            off.copy_from_slice(&c[..8]);
            len.copy_from_slice(&c[8..]);
            Fragment::new(u64::from_le_bytes(off), u64::from_le_bytes(len))
        })
        .collect()
}

/// Deliver every process's outbound sets to their aggregators. Collective.
///
/// Returns one inbound set per source rank; ranks that are not aggregators get all-empty sets.
pub fn calc_others_req<C: Comm>(comm: &C, my_req: &MyRequests) -> Result<Vec<InboundRequestSet>> {
    let counts: Vec<u64> = my_req
        .per_rank
        .iter()
        .map(|r| r.fragments.len() as u64)
        .collect();
    let others_counts = comm.all_to_all(&counts)?;

    let sends = my_req
        .per_rank
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_empty())
        .map(|(dest, r)| Outgoing { dest, tag: Tag::REQUEST_LIST, data: encode(&r.fragments).into() })
        .collect();
    let sources: Vec<usize> = (0..comm.size()).filter(|&i| others_counts[i] > 0).collect();
    let recvs = sources
        .iter()
        .map(|&source| Incoming {
            source,
            tag: Tag::REQUEST_LIST,
            len: others_counts[source] as usize * 16,
        })
        .collect();

    let payloads = comm.exchange(Exchange { sends, recvs, ordered: false })?;

    let mut others = vec![InboundRequestSet::default(); comm.size()];
    for (source, bytes) in sources.into_iter().zip(payloads) {
        others[source] = InboundRequestSet::new(decode(&bytes));
    }
    Ok(others)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Extent;
    use crate::domain::{FileDomains, aggregator_ranks};
    use crate::parallel::ThreadGroup;

    #[test]
    fn contiguous_write_across_a_domain_boundary_splits_in_two() {
        let ext = [Some(Extent::new(0, 499)), Some(Extent::new(500, 1499)), Some(Extent::new(1500, 1999))];
        let fd = FileDomains::partition(&ext, aggregator_ranks(3, 2), 0, 0);
        let access = AccessList::from_fragments(vec![Fragment::new(500, 1000)]);
        let my = calc_my_req(&access, &fd, 3).unwrap();
        // aggregators are ranks 0 and 1
        assert_eq!(my.per_rank[0].fragments, vec![Fragment::new(500, 500)]);
        assert_eq!(my.per_rank[1].fragments, vec![Fragment::new(1000, 500)]);
        assert!(my.per_rank[2].is_empty());
        assert_eq!(my.per_rank[0].buf_offsets, vec![0]);
        assert_eq!(my.per_rank[1].buf_offsets, vec![500]);
        assert_eq!(my.procs(), 2);
    }

    #[test]
    fn buffer_offsets_follow_the_data_stream() {
        let ext = [Some(Extent::new(0, 99))];
        let fd = FileDomains::partition(&ext, vec![0, 1], 0, 0);
        let access = AccessList::from_fragments(vec![
            Fragment::new(10, 5),
            Fragment::new(40, 20),
            Fragment::new(90, 10),
        ]);
        let my = calc_my_req(&access, &fd, 2).unwrap();
        assert_eq!(my.per_rank[0].fragments, vec![Fragment::new(10, 5), Fragment::new(40, 10)]);
        assert_eq!(my.per_rank[0].buf_offsets, vec![0, 5]);
        assert_eq!(my.per_rank[1].fragments, vec![Fragment::new(50, 10), Fragment::new(90, 10)]);
        assert_eq!(my.per_rank[1].buf_offsets, vec![15, 25]);
    }

    #[test]
    fn others_req_delivers_fragment_lists_to_aggregators() {
        let out = ThreadGroup::new(3)
            .run(|comm| {
                let r = comm.rank() as u64;
                // each rank writes 10 bytes at 10*r and 10 bytes at 100 + 10*r
                let access = AccessList::from_fragments(vec![
                    Fragment::new(10 * r, 10),
                    Fragment::new(100 + 10 * r, 10),
                ]);
                let extents: Vec<Option<Extent>> = (0..3)
                    .map(|k| Some(Extent::new(10 * k, 100 + 10 * k + 9)))
                    .collect();
                let fd = FileDomains::partition(&extents, vec![0, 2], 0, 0);
                let my = calc_my_req(&access, &fd, 3).unwrap();
                calc_others_req(&comm, &my).unwrap()
            })
            .unwrap();
        // span [0,129] in two domains of 65 bytes: rank 0 owns [0,64], rank 2 owns [65,129]
        assert_eq!(
            out[0].iter().map(|s| s.fragments.clone()).collect::<Vec<_>>(),
            vec![
                vec![Fragment::new(0, 10)],
                vec![Fragment::new(10, 10)],
                vec![Fragment::new(20, 10)]
            ]
        );
        assert!(out[1].iter().all(InboundRequestSet::is_empty));
        assert_eq!(out[2][1].fragments, vec![Fragment::new(110, 10)]);
    }
}
