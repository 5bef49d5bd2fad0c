use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::models::Candidate;

/// Candidate wrapper ordered by score, so the heap can hold float scores.
struct ByScore(Candidate);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.0.score.total_cmp(&other.0.score) == Ordering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.score.total_cmp(&other.0.score)
    }
}

/// Select the `k` highest-scored candidates, sorted descending.
///
/// When `k` covers the whole input a plain descending sort is cheapest. For
/// smaller `k` a bounded min-heap retains the current top `k`: a new element
/// replaces the heap minimum only when strictly greater, which keeps the work
/// at O(n log k) over discover-sized candidate sets where only one page of
/// results is ever surfaced.
pub fn select_top_k(candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    if k >= candidates.len() {
        let mut all = candidates;
        all.sort_by(|a, b| b.score.total_cmp(&a.score));
        return all;
    }

    let mut heap: BinaryHeap<Reverse<ByScore>> = BinaryHeap::with_capacity(k);
    for candidate in candidates {
        if heap.len() < k {
            heap.push(Reverse(ByScore(candidate)));
        } else if let Some(Reverse(min)) = heap.peek() {
            if candidate.score > min.0.score {
                heap.pop();
                heap.push(Reverse(ByScore(candidate)));
            }
        }
    }

    // Heap order is not sorted order; the retained set still needs the final sort.
    let mut retained: Vec<Candidate> = heap.into_iter().map(|Reverse(entry)| entry.0).collect();
    retained.sort_by(|a, b| b.score.total_cmp(&a.score));
    retained
}

/// Return the `page`-th window of `limit` candidates in top-K-first order.
///
/// Selecting the top `page * limit` and slicing keeps ordering stable across
/// pages without re-scoring; the recomputation cost is bounded by the
/// requested page depth.
pub fn paginate(candidates: Vec<Candidate>, page: u32, limit: u32) -> Vec<Candidate> {
    if page == 0 || limit == 0 {
        return Vec::new();
    }

    let start = ((page - 1) * limit) as usize;
    let end = (page as usize) * (limit as usize);
    let top = select_top_k(candidates, end);
    if start >= top.len() {
        return Vec::new();
    }
    top.into_iter().skip(start).collect()
}
