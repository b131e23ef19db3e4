//! Stable priority queue: lowest priority value first, FIFO among equals.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

// `BinaryHeap` is a max-heap, so the comparison is reversed: the entry with
// the smallest (priority, seq) compares greatest.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

pub struct TaskQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: i32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Queued items in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|entry| &entry.item)
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_priority_pops_first() {
        let mut queue = TaskQueue::new();
        queue.push("low", 9);
        queue.push("high", 1);
        queue.push("mid", 5);

        assert_eq!(queue.peek(), Some(&"high"));
        assert_eq!(queue.pop(), Some("high"));
        assert_eq!(queue.pop(), Some("mid"));
        assert_eq!(queue.pop(), Some("low"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn ties_resolve_in_insertion_order() {
        let mut queue = TaskQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.push(name, 3);
        }
        queue.push("urgent", 0);
        queue.push("e", 3);

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec!["urgent", "a", "b", "c", "d", "e"]);
    }

    #[test]
    fn negative_priorities_and_clear() {
        let mut queue = TaskQueue::new();
        queue.push(1, 0);
        queue.push(2, -5);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(2));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.iter().count(), 0);
    }
}
