// thread-based process group

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{Comm, Exchange, Tag};
use crate::error::{CommError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectiveOp {
    Barrier,
    AllGather,
    AllToAll,
    AllReduceMax,
    Broadcast,
}

impl CollectiveOp {
    fn name(self) -> &'static str {
        match self {
            CollectiveOp::Barrier => "barrier",
            CollectiveOp::AllGather => "all_gather",
            CollectiveOp::AllToAll => "all_to_all",
            CollectiveOp::AllReduceMax => "all_reduce_max",
            CollectiveOp::Broadcast => "broadcast",
        }
    }
}

type Outcome = std::result::Result<Arc<Vec<Vec<u64>>>, CommError>;

struct State {
    /// Bumped every time a collective completes.
    generation: u64,
    arrived: usize,
    contributions: Vec<Option<(CollectiveOp, Vec<u64>)>>,
    /// Result of the last completed collective; stays valid until every rank has read it,
    /// because the next collective cannot complete before they all arrive again.
    outcome: Outcome,
    mailboxes: HashMap<(usize, usize, Tag), VecDeque<Vec<u8>>>,
    departed: Vec<bool>,
}

struct Shared {
    size: usize,
    state: Mutex<State>,
    cond: Condvar,
}

/// One rank of an in-process group.
///
/// Sends are eager: the payload is queued in the receiver's mailbox and the sender never
/// blocks. Dropping a `ThreadComm` marks its rank as departed, so peers still waiting on it
/// fail with [`CommError::PeerDeparted`] instead of blocking forever.
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create the communicators of a `size`-rank group, in rank order.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                contributions: vec![None; size],
                outcome: Ok(Arc::new(Vec::new())),
                mailboxes: HashMap::new(),
                departed: vec![false; size],
            }),
            cond: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm { rank, shared: Arc::clone(&shared) })
            .collect()
    }

    fn rendezvous(&self, op: CollectiveOp, contribution: Vec<u64>) -> Result<Arc<Vec<Vec<u64>>>> {
        let mut st = self.shared.state.lock();
        let generation = st.generation;
        st.contributions[self.rank] = Some((op, contribution));
        st.arrived += 1;

        if st.arrived == self.shared.size {
            let taken: Vec<(CollectiveOp, Vec<u64>)> =
                st.contributions.iter_mut().filter_map(Option::take).collect();
            let first = taken[0].0;
            let mismatch = taken.iter().map(|(o, _)| *o).find(|o| *o != first);
            let outcome = match mismatch {
                Some(other) => Err(CommError::CollectiveMismatch {
                    first: first.name(),
                    second: other.name(),
                }),
                None => Ok(Arc::new(taken.into_iter().map(|(_, v)| v).collect())),
            };
            st.outcome = outcome.clone();
            st.arrived = 0;
            st.generation += 1;
            self.shared.cond.notify_all();
            return Ok(outcome?);
        }
        // Wake receivers that may be waiting on a message from this rank.
        self.shared.cond.notify_all();

        loop {
            let gone = (0..self.shared.size)
                .find(|&r| st.departed[r] && st.contributions[r].is_none());
            if let Some(r) = gone {
                return Err(CommError::PeerDeparted(r).into());
            }
            self.shared.cond.wait(&mut st);
            if st.generation != generation {
                return Ok(st.outcome.clone()?);
            }
        }
    }

    fn post(&self, dest: usize, tag: Tag, data: Vec<u8>) {
        let mut st = self.shared.state.lock();
        st.mailboxes
            .entry((self.rank, dest, tag))
            .or_default()
            .push_back(data);
        self.shared.cond.notify_all();
    }

    fn take(&self, source: usize, tag: Tag, len: usize) -> Result<Vec<u8>> {
        let key = (source, self.rank, tag);
        let mut st = self.shared.state.lock();
        loop {
            if let Some(queue) = st.mailboxes.get_mut(&key) {
                if let Some(msg) = queue.pop_front() {
                    if queue.is_empty() {
                        st.mailboxes.remove(&key);
                    }
                    if msg.len() != len {
                        return Err(CommError::MessageLength {
                            source_rank: source,
                            expected: len,
                            actual: msg.len(),
                        }
                        .into());
                    }
                    return Ok(msg);
                }
            }
            if st.departed[source] {
                return Err(CommError::PeerDeparted(source).into());
            }
            // A source parked in a collective cannot send until this rank joins it.
            if let Some((op, _)) = &st.contributions[source] {
                return Err(CommError::CollectiveMismatch {
                    first: "receive",
                    second: op.name(),
                }
                .into());
            }
            self.shared.cond.wait(&mut st);
        }
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.departed[self.rank] = true;
        self.shared.cond.notify_all();
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.shared.size
    }
    fn barrier(&self) -> Result<()> {
        self.rendezvous(CollectiveOp::Barrier, Vec::new())?;
        Ok(())
    }
    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>> {
        let all = self.rendezvous(CollectiveOp::AllGather, local.to_vec())?;
        Ok(all.iter().flatten().copied().collect())
    }
    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>> {
        let all = self.rendezvous(CollectiveOp::AllToAll, send.to_vec())?;
        let block = send.len() / self.shared.size;
        let mine = self.rank * block..(self.rank + 1) * block;
        Ok(all.iter().flat_map(|v| v[mine.clone()].iter().copied()).collect())
    }
    fn all_reduce_max(&self, x: u64) -> Result<u64> {
        let all = self.rendezvous(CollectiveOp::AllReduceMax, vec![x])?;
        Ok(all.iter().map(|v| v[0]).max().unwrap_or(x))
    }
    fn broadcast(&self, x: u64, root: usize) -> Result<u64> {
        let all = self.rendezvous(CollectiveOp::Broadcast, vec![x])?;
        Ok(all[root][0])
    }
    fn exchange(&self, ex: Exchange<'_>) -> Result<Vec<Vec<u8>>> {
        // Eager sends never block, so the ordered and unordered protocols coincide here:
        // everything is queued before the first receive.
        for s in ex.sends {
            self.post(s.dest, s.tag, s.data.into_owned());
        }
        ex.recvs
            .iter()
            .map(|r| self.take(r.source, r.tag, r.len))
            .collect()
    }
}

/// Launches a closure once per rank of an in-process group and collects the results.
#[derive(Debug, Clone, Copy)]
pub struct ThreadGroup {
    size: usize,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on every rank concurrently; results are returned in rank order.
    ///
    /// Every rank needs its own thread because ranks block on each other, so the pool is
    /// sized to the group.
    pub fn run<F, T>(&self, f: F) -> Result<Vec<T>>
    where
        F: Fn(ThreadComm) -> T + Sync,
        T: Send,
    {
        let comms = ThreadComm::group(self.size);
        let mut results: Vec<Option<T>> = (0..self.size).map(|_| None).collect();
        #[cfg(feature = "rayon")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.size + 1)
                .thread_name(|i| format!("twophase-rank-{i}"))
                .build()
                .map_err(|e| CommError::Launch(e.to_string()))?;
            pool.scope(|s| {
                for (slot, comm) in results.iter_mut().zip(comms) {
                    let f = &f;
                    s.spawn(move |_| *slot = Some(f(comm)));
                }
            });
        }
        #[cfg(not(feature = "rayon"))]
        {
            std::thread::scope(|s| {
                for (slot, comm) in results.iter_mut().zip(comms) {
                    let f = &f;
                    s.spawn(move || *slot = Some(f(comm)));
                }
            });
        }
        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TpError;
    use crate::parallel::{Incoming, Outgoing};
    use std::borrow::Cow;

    #[test]
    fn collectives_agree_across_ranks() {
        let out = ThreadGroup::new(4)
            .run(|comm| {
                let r = comm.rank() as u64;
                let gathered = comm.all_gather(&[r, r * 10]).unwrap();
                let send: Vec<u64> = (0..4).map(|j| r * 100 + j).collect();
                let a2a = comm.all_to_all(&send).unwrap();
                let max = comm.all_reduce_max(r * 3).unwrap();
                let b = comm.broadcast(r + 7, 2).unwrap();
                comm.barrier().unwrap();
                (gathered, a2a, max, b)
            })
            .unwrap();
        for (rank, (gathered, a2a, max, b)) in out.into_iter().enumerate() {
            assert_eq!(gathered, vec![0, 0, 1, 10, 2, 20, 3, 30]);
            let expect: Vec<u64> = (0..4).map(|src| src * 100 + rank as u64).collect();
            assert_eq!(a2a, expect);
            assert_eq!(max, 9);
            assert_eq!(b, 9);
        }
    }

    #[test]
    fn point_to_point_ring() {
        let out = ThreadGroup::new(3)
            .run(|comm| {
                let n = comm.size();
                let next = (comm.rank() + 1) % n;
                let prev = (comm.rank() + n - 1) % n;
                let payload = vec![comm.rank() as u8; 5];
                comm.exchange(Exchange {
                    sends: vec![Outgoing { dest: next, tag: Tag(3), data: Cow::Owned(payload) }],
                    recvs: vec![Incoming { source: prev, tag: Tag(3), len: 5 }],
                    ordered: false,
                })
                .unwrap()
            })
            .unwrap();
        assert_eq!(out[0], vec![vec![2u8; 5]]);
        assert_eq!(out[1], vec![vec![0u8; 5]]);
    }

    #[test]
    fn waiting_on_a_departed_rank_fails() {
        let out = ThreadGroup::new(2)
            .run(|comm| {
                if comm.rank() == 1 {
                    return None;
                }
                Some(comm.barrier())
            })
            .unwrap();
        assert!(matches!(
            out[0],
            Some(Err(TpError::Comm(CommError::PeerDeparted(1))))
        ));
    }

    #[test]
    fn mismatched_collectives_are_detected() {
        let out = ThreadGroup::new(2)
            .run(|comm| {
                if comm.rank() == 0 {
                    comm.barrier().err()
                } else {
                    comm.all_reduce_max(1).err()
                }
            })
            .unwrap();
        for e in out {
            assert!(matches!(e, Some(TpError::Comm(CommError::CollectiveMismatch { .. }))));
        }
    }

    #[test]
    fn receiving_from_a_rank_stuck_in_a_collective_fails() {
        let out = ThreadGroup::new(2)
            .run(|comm| {
                if comm.rank() == 0 {
                    let ex = Exchange {
                        recvs: vec![Incoming { source: 1, tag: Tag(5), len: 1 }],
                        ..Exchange::default()
                    };
                    let recv = comm.exchange(ex).err();
                    // both ranks meet again so rank 1 is released
                    comm.all_reduce_max(0).unwrap();
                    recv
                } else {
                    comm.all_reduce_max(1).unwrap();
                    None
                }
            })
            .unwrap();
        assert!(matches!(
            out[0],
            Some(TpError::Comm(CommError::CollectiveMismatch { first: "receive", .. }))
        ));
    }

    #[test]
    fn wrong_message_length_is_reported() {
        let out = ThreadGroup::new(2)
            .run(|comm| {
                let ex = if comm.rank() == 0 {
                    Exchange {
                        sends: vec![Outgoing { dest: 1, tag: Tag(2), data: Cow::Borrowed(&[1, 2, 3]) }],
                        ..Exchange::default()
                    }
                } else {
                    Exchange {
                        recvs: vec![Incoming { source: 0, tag: Tag(2), len: 4 }],
                        ..Exchange::default()
                    }
                };
                comm.exchange(ex).err()
            })
            .unwrap();
        assert!(out[0].is_none());
        assert!(matches!(
            out[1],
            Some(TpError::Comm(CommError::MessageLength { expected: 4, actual: 3, .. }))
        ));
    }
}
