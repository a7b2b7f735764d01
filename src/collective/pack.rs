//! Send side of a window: contiguous slices of the user buffer, or staging buffers packed
//! from a non-contiguous one.

use std::borrow::Cow;

use crate::datatype::Datatype;
use crate::datatype::cursor::FlatCursor;
use crate::parallel::{Outgoing, Tag};
use crate::request::{MyRequests, OutboundRequestSet};

/// How far the fragments bound for one destination have been sent.
struct Progress<'a> {
    /// Positioned at data-stream offset `pos` once the first byte has gone out.
    cursor: Option<FlatCursor<'a>>,
    pos: u64,
    /// First fragment not fully sent, and its bytes sent by earlier windows.
    frag: usize,
    partial: u64,
}

/// What a process sends, and how much of it has gone out in earlier windows.
///
/// Every destination resumes at its own fragment cursor; the buffer position of each fragment
/// comes from the request set's `buf_offsets`, so no window walks data sent before it.
pub(crate) struct SendState<'a> {
    buf: &'a [u8],
    layout: &'a Datatype,
    contiguous: bool,
    requests: &'a [OutboundRequestSet],
    progress: Vec<Progress<'a>>,
}

impl<'a> SendState<'a> {
    pub(crate) fn new(buf: &'a [u8], layout: &'a Datatype, my_req: &'a MyRequests) -> Self {
        let progress = my_req
            .per_rank
            .iter()
            .map(|_| Progress { cursor: None, pos: 0, frag: 0, partial: 0 })
            .collect();
        Self {
            buf,
            layout,
            contiguous: layout.is_contiguous(),
            requests: &my_req.per_rank,
            progress,
        }
    }

    /// Messages for window `round`, given how many bytes each destination expects.
    ///
    /// A destination asking for more than is left gets what is left; the receiver reports
    /// the length mismatch.
    pub(crate) fn outgoing(&mut self, send_size: &[u64], round: usize) -> Vec<Outgoing<'a>> {
        let nprocs = send_size.len();
        let mut sends = Vec::new();
        for (dest, &size) in send_size.iter().enumerate() {
            if size == 0 {
                continue;
            }
            sends.push(Outgoing {
                dest,
                tag: Tag::window(dest, round, nprocs),
                data: self.take(dest, size),
            });
        }
        sends
    }

    /// The next `size` data bytes bound for `dest`.
    fn take(&mut self, dest: usize, size: u64) -> Cow<'a, [u8]> {
        let (buf, layout) = (self.buf, self.layout);
        let set = &self.requests[dest];
        let prog = &mut self.progress[dest];
        let mut staging = Vec::new();
        let mut first = None;
        let mut taken = 0u64;

        while taken < size && prog.frag < set.fragments.len() {
            let frag_len = set.fragments[prog.frag].len;
            let start = set.buf_offsets[prog.frag] + prog.partial;
            let n = (frag_len - prog.partial).min(size - taken);
            if first.is_none() {
                first = Some(start);
            }
            if !self.contiguous {
                let cursor = prog.cursor.get_or_insert_with(|| {
                    let mut c = FlatCursor::new(layout);
                    c.seek(start);
                    c
                });
                if prog.pos < start {
                    cursor.advance(start - prog.pos);
                }
                cursor.copy_into(buf, n, &mut staging);
            }
            prog.pos = start + n;
            prog.partial += n;
            if prog.partial == frag_len {
                prog.frag += 1;
                prog.partial = 0;
            }
            taken += n;
        }

        if self.contiguous {
            // data for one destination is a single range of the buffer
            let start = first.unwrap_or(0) as usize;
            Cow::Borrowed(&buf[start..start + taken as usize])
        } else {
            Cow::Owned(staging)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Extent, Fragment};
    use crate::domain::FileDomains;
    use crate::request::calc_my_req;
    use crate::view::AccessList;

    fn strided() -> (Vec<u8>, Datatype) {
        // 8 instances of 4 data bytes followed by 4 padding bytes
        let layout = Datatype::bytes(4).resized(8);
        let buf: Vec<u8> = (0..64u8).collect();
        (buf, layout)
    }

    fn two_domains() -> FileDomains {
        FileDomains::partition(
            &[Some(Extent::new(0, 99)), Some(Extent::new(100, 199))],
            vec![0, 1],
            0,
            0,
        )
    }

    fn data_bytes(buf: &[u8], from: usize, n: usize) -> Vec<u8> {
        buf.chunks(8).flat_map(|c| c[..4].to_vec()).skip(from).take(n).collect()
    }

    #[test]
    fn packer_resumes_across_windows() {
        let (buf, layout) = strided();
        let access = AccessList::from_fragments(vec![Fragment::new(0, 20), Fragment::new(40, 12)]);
        let fd = FileDomains::partition(&[Some(Extent::new(0, 51))], vec![0], 0, 0);
        let my = calc_my_req(&access, &fd, 1).unwrap();
        let mut state = SendState::new(&buf, &layout, &my);

        let mut got = Vec::new();
        for (round, quota) in [10u64, 10, 12].into_iter().enumerate() {
            let sends = state.outgoing(&[quota], round);
            assert_eq!(sends.len(), 1);
            assert_eq!(sends[0].tag, Tag::window(0, round, 1));
            assert_eq!(sends[0].data.len() as u64, quota);
            got.extend_from_slice(&sends[0].data);
        }
        assert_eq!(got, data_bytes(&buf, 0, 32));
        assert!(state.outgoing(&[0], 3).is_empty());
    }

    #[test]
    fn fragment_spanning_two_domains_is_split() {
        let (buf, layout) = strided();
        let access = AccessList::from_fragments(vec![Fragment::new(90, 20)]);
        let fd = two_domains();
        let my = calc_my_req(&access, &fd, 2).unwrap();
        let sends = SendState::new(&buf, &layout, &my).outgoing(&[10, 10], 0);
        assert_eq!(sends.iter().map(|s| s.dest).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(&*sends[0].data, &data_bytes(&buf, 0, 10)[..]);
        assert_eq!(&*sends[1].data, &data_bytes(&buf, 10, 10)[..]);
    }

    #[test]
    fn idle_destinations_keep_their_progress() {
        let (buf, layout) = strided();
        let access = AccessList::from_fragments(vec![Fragment::new(90, 20)]);
        let fd = two_domains();
        let my = calc_my_req(&access, &fd, 2).unwrap();
        let mut state = SendState::new(&buf, &layout, &my);
        let first = state.outgoing(&[4, 0], 0);
        assert_eq!(first.len(), 1);
        let sends = state.outgoing(&[6, 10], 1);
        assert_eq!(&*sends[0].data, &data_bytes(&buf, 4, 6)[..]);
        assert_eq!(&*sends[1].data, &data_bytes(&buf, 10, 10)[..]);
    }

    #[test]
    fn second_destination_starts_mid_instance() {
        // the first domain takes 6 data bytes, so the second starts inside instance 1
        let (buf, layout) = strided();
        let access = AccessList::from_fragments(vec![Fragment::new(94, 6), Fragment::new(150, 9)]);
        let fd = two_domains();
        let my = calc_my_req(&access, &fd, 2).unwrap();
        let mut state = SendState::new(&buf, &layout, &my);
        let a = state.outgoing(&[0, 5], 0);
        let b = state.outgoing(&[6, 4], 1);
        assert_eq!(&*a[0].data, &data_bytes(&buf, 6, 5)[..]);
        assert_eq!(&*b[0].data, &data_bytes(&buf, 0, 6)[..]);
        assert_eq!(&*b[1].data, &data_bytes(&buf, 11, 4)[..]);
    }

    #[test]
    fn contiguous_buffers_are_sent_in_place() {
        let buf: Vec<u8> = (0..100u8).collect();
        let layout = Datatype::bytes(100);
        let access = AccessList::from_fragments(vec![Fragment::new(50, 100)]);
        let fd = FileDomains::partition(&[Some(Extent::new(0, 199))], vec![0, 1], 0, 0);
        let my = calc_my_req(&access, &fd, 2).unwrap();
        let mut state = SendState::new(&buf, &layout, &my);

        let first = state.outgoing(&[30, 20], 0);
        assert!(matches!(first[0].data, Cow::Borrowed(_)));
        assert_eq!(&*first[0].data, &buf[0..30]);
        assert_eq!(&*first[1].data, &buf[50..70]);
        let second = state.outgoing(&[20, 30], 1);
        assert_eq!(&*second[0].data, &buf[30..50]);
        assert_eq!(&*second[1].data, &buf[70..100]);
    }

    #[test]
    fn asking_for_more_than_is_left_sends_the_rest() {
        let (buf, layout) = strided();
        let access = AccessList::from_fragments(vec![Fragment::new(0, 8)]);
        let fd = FileDomains::partition(&[Some(Extent::new(0, 7))], vec![0], 0, 0);
        let my = calc_my_req(&access, &fd, 1).unwrap();
        let sends = SendState::new(&buf, &layout, &my).outgoing(&[12], 0);
        assert_eq!(&*sends[0].data, &data_bytes(&buf, 0, 8)[..]);
    }
}
