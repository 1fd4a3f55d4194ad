//! Ordering and fan-out utilities shared by the actions
//!
//! The priority queue is a plain binary heap parameterized by a
//! comparator closure; every ordering policy comes from the session's
//! plugin composition, never from the element type.

use gangway_core::{FitError, FitErrors, NodeInfo, TaskInfo};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Binary heap ordered by a caller-provided comparator. `pop` returns the
/// element that sorts first under the comparator.
pub struct PriorityQueue<'a, T> {
    heap: Vec<T>,
    cmp: Box<dyn Fn(&T, &T) -> Ordering + 'a>,
}

impl<'a, T> PriorityQueue<'a, T> {
    pub fn new(cmp: impl Fn(&T, &T) -> Ordering + 'a) -> Self {
        Self {
            heap: Vec::new(),
            cmp: Box::new(cmp),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let item = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        item
    }

    /// Drain the queue into comparator order.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.cmp)(&self.heap[a], &self.heap[b]) == Ordering::Less
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.heap.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.heap.swap(idx, smallest);
            idx = smallest;
        }
    }
}

/// Remove and return the element of `items` that sorts first under `cmp`.
///
/// The actions use this instead of a long-lived heap wherever the order
/// depends on session state that their own statements keep changing.
pub fn pop_min_by<T>(items: &mut Vec<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let mut best = 0;
    for idx in 1..items.len() {
        if cmp(&items[idx], &items[best]) == Ordering::Less {
            best = idx;
        }
    }
    Some(items.swap_remove(best))
}

/// Filter `nodes` down to the ones `fit` accepts, evaluating in parallel
/// on the shared pool and honoring cancellation between nodes. Rejections
/// come back as fit errors for the job's diagnostics.
pub fn predicate_nodes<'a>(
    task: &TaskInfo,
    nodes: &[&'a NodeInfo],
    fit: &(dyn Fn(&TaskInfo, &NodeInfo) -> Result<(), FitError> + Sync),
    cancel: &CancellationToken,
) -> (Vec<&'a NodeInfo>, FitErrors) {
    let results: Vec<(Option<&NodeInfo>, Option<FitError>)> = nodes
        .par_iter()
        .map(|node| {
            if cancel.is_cancelled() {
                return (None, None);
            }
            match fit(task, node) {
                Ok(()) => (Some(*node), None),
                Err(err) => (None, Some(err)),
            }
        })
        .collect();

    let mut fit_nodes = Vec::new();
    let mut errors = FitErrors::new();
    for (node, err) in results {
        if let Some(node) = node {
            fit_nodes.push(node);
        }
        if let Some(err) = err {
            errors.push(err);
        }
    }
    (fit_nodes, errors)
}

/// Score every node in parallel; a scorer error drops that node from the
/// result rather than failing the cycle.
pub fn score_nodes<'a>(
    task: &TaskInfo,
    nodes: &[&'a NodeInfo],
    score: &(dyn Fn(&TaskInfo, &NodeInfo) -> Option<f64> + Sync),
    cancel: &CancellationToken,
) -> HashMap<String, f64> {
    nodes
        .par_iter()
        .filter_map(|node| {
            if cancel.is_cancelled() {
                return None;
            }
            score(task, node).map(|s| (node.name.clone(), s))
        })
        .collect()
}

/// Highest total score wins; ties break to the lexicographically smallest
/// node name so repeated cycles stay deterministic.
pub fn select_best_node(scores: &HashMap<String, f64>) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for (name, score) in scores {
        best = match best {
            None => Some((name, *score)),
            Some((bn, bs)) => {
                if *score > bs || (*score == bs && name.as_str() < bn) {
                    Some((name, *score))
                } else {
                    Some((bn, bs))
                }
            }
        };
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_queue_orders_by_comparator() {
        let mut pq = PriorityQueue::new(|a: &i32, b: &i32| b.cmp(a)); // max-heap
        for v in [3, 1, 4, 1, 5, 9, 2, 6] {
            pq.push(v);
        }
        assert_eq!(pq.len(), 8);
        assert_eq!(pq.into_sorted_vec(), vec![9, 6, 5, 4, 3, 2, 1, 1]);
    }

    #[test]
    fn pop_min_by_respects_dynamic_comparator() {
        let mut items = vec!["bb".to_string(), "a".to_string(), "ccc".to_string()];
        let shortest = pop_min_by(&mut items, |a, b| a.len().cmp(&b.len()));
        assert_eq!(shortest.as_deref(), Some("a"));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn select_best_node_breaks_ties_by_name() {
        let mut scores = HashMap::new();
        scores.insert("n2".to_string(), 10.0);
        scores.insert("n1".to_string(), 10.0);
        scores.insert("n3".to_string(), 5.0);
        assert_eq!(select_best_node(&scores).as_deref(), Some("n1"));
    }
}
