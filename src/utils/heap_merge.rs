//! k-way merge of offset-sorted piece lists.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::core::types::Fragment;

/// A merged piece, tagged with the index of the list it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tagged {
    pub piece: Fragment,
    pub list: usize,
}

/// Merge `lists`, each sorted by offset, into one offset-sorted sequence.
///
/// Pieces with equal offsets come out in list order.
pub fn heap_merge(lists: &[&[Fragment]]) -> Vec<Tagged> {
    let total = lists.iter().map(|l| l.len()).sum();
    let mut out = Vec::with_capacity(total);
    let mut heap: BinaryHeap<Reverse<(u64, usize, usize)>> = lists
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.first().map(|f| Reverse((f.offset, i, 0))))
        .collect();

    while let Some(Reverse((_, list, pos))) = heap.pop() {
        out.push(Tagged { piece: lists[list][pos], list });
        if let Some(next) = lists[list].get(pos + 1) {
            heap.push(Reverse((next.offset, list, pos + 1)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn merges_in_offset_order_with_ties_by_list() {
        let a = [Fragment::new(0, 5), Fragment::new(20, 5)];
        let b = [Fragment::new(10, 5), Fragment::new(20, 1)];
        let c: [Fragment; 0] = [];
        let m = heap_merge(&[&a, &b, &c]);
        let order: Vec<(u64, usize)> = m.iter().map(|t| (t.piece.offset, t.list)).collect();
        assert_eq!(order, vec![(0, 0), (10, 1), (20, 0), (20, 1)]);
    }

    #[test]
    fn random_lists_merge_sorted() {
        let mut rng = StdRng::seed_from_u64(11);
        let lists: Vec<Vec<Fragment>> = (0..6)
            .map(|_| {
                let mut off = 0;
                (0..rng.gen_range(0..20))
                    .map(|_| {
                        off += rng.gen_range(0..50u64);
                        Fragment::new(off, 1)
                    })
                    .collect()
            })
            .collect();
        let refs: Vec<&[Fragment]> = lists.iter().map(Vec::as_slice).collect();
        let m = heap_merge(&refs);
        assert_eq!(m.len(), lists.iter().map(Vec::len).sum::<usize>());
        assert!(m.windows(2).all(|w| w[0].piece.offset <= w[1].piece.offset));
    }
}
