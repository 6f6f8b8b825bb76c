//! Top-n ranking of acquisition scores with plateau detection
//!
//! **Problem**: rounded scores form plateaus, so "the n best points" is often
//! ambiguous: the n-th best score is shared by more candidates than there are
//! slots left.
//!
//! **Solution**: a bounded min-heap finds the n-th best score (the threshold)
//! in O(N log n). Everything strictly above the threshold is taken outright;
//! the candidates sitting on the threshold form the tied plateau, which the
//! caller resolves with a diversity criterion.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

// Min-heap item: smallest score at the top, so the heap keeps the largest n.
#[derive(Debug)]
struct MinHeapItem {
    score: f64,
    index: usize,
}

impl PartialEq for MinHeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MinHeapItem {}

impl Ord for MinHeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for min-heap (smallest at top)
        other.score.total_cmp(&self.score)
    }
}

impl PartialOrd for MinHeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split of the candidate set around the n-th best score.
#[derive(Debug, Clone, PartialEq)]
pub struct Plateau {
    /// Candidates scoring strictly above the threshold, best first
    /// (equal scores in ascending index order).
    pub above: Vec<usize>,
    /// Candidates scoring exactly the threshold, ascending index order.
    pub tied: Vec<usize>,
    /// The n-th best score.
    pub threshold: f64,
}

impl Plateau {
    /// Slots left for tied candidates after taking every candidate above the threshold.
    #[must_use]
    pub fn remaining(&self, n: usize) -> usize {
        n.saturating_sub(self.above.len())
    }
}

/// Indices of the `k` highest scores among `candidates`, best first.
///
/// Time complexity: O(N log K) where N = number of candidates
#[must_use]
pub fn top_k(scores: &[f64], candidates: &[usize], k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<MinHeapItem> = BinaryHeap::with_capacity(k);

    for &index in candidates {
        let score = scores[index];
        if heap.len() < k {
            heap.push(MinHeapItem { score, index });
        } else if let Some(top) = heap.peek() {
            if score > top.score {
                heap.pop();
                heap.push(MinHeapItem { score, index });
            }
        }
    }

    let mut result: Vec<_> = heap.into_vec();
    result.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    result.into_iter().map(|item| item.index).collect()
}

/// Split `candidates` around the `n`-th best score.
///
/// Returns `None` when there are no candidates or `n` is zero.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn plateau(scores: &[f64], candidates: &[usize], n: usize) -> Option<Plateau> {
    let best = top_k(scores, candidates, n);
    let threshold = scores[*best.last()?];

    let mut above: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| scores[i] > threshold)
        .collect();
    above.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut tied: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| scores[i] == threshold)
        .collect();
    tied.sort_unstable();

    Some(Plateau {
        above,
        tied,
        threshold,
    })
}
