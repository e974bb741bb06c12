use overwatch_core::{OverwatchError, OverwatchResult, TaskRequest};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    priority: u8,
    seq: u64,
    request: TaskRequest,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority first, then the earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded queue of tasks waiting for capacity.
///
/// Ordered by priority, FIFO within a priority.
#[derive(Debug)]
pub struct PendingQueue {
    heap: BinaryHeap<Entry>,
    capacity: usize,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Enqueue a request, failing with `NoCapacity` when the queue is full.
    pub fn push(&mut self, request: TaskRequest) -> OverwatchResult<usize> {
        if self.heap.len() >= self.capacity {
            return Err(OverwatchError::NoCapacity(format!(
                "no eligible agent and pending queue is full ({} tasks)",
                self.capacity
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: request.priority,
            seq,
            request,
        });
        Ok(self.heap.len())
    }

    /// Put back a request that was popped but could not be placed, keeping
    /// its original position. Ignores the capacity bound.
    pub fn restore(&mut self, request: TaskRequest, seq: u64) {
        self.heap.push(Entry {
            priority: request.priority,
            seq,
            request,
        });
    }

    /// Remove the next request along with its sequence number.
    pub fn pop(&mut self) -> Option<(TaskRequest, u64)> {
        self.heap.pop().map(|e| (e.request, e.seq))
    }

    pub fn peek(&self) -> Option<&TaskRequest> {
        self.heap.peek().map(|e| &e.request)
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.heap.iter().any(|e| e.request.id == task_id)
    }

    /// Changes the bound; already-queued entries are kept.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(priority: u8) -> TaskRequest {
        TaskRequest::new("acme", ["rust"]).with_priority(priority)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = PendingQueue::new(10);
        let low = task(1);
        let high_a = task(5);
        let high_b = task(5);
        let (low_id, a_id, b_id) = (low.id, high_a.id, high_b.id);
        queue.push(low).unwrap();
        queue.push(high_a).unwrap();
        queue.push(high_b).unwrap();

        assert_eq!(queue.pop().unwrap().0.id, a_id);
        assert_eq!(queue.pop().unwrap().0.id, b_id);
        assert_eq!(queue.pop().unwrap().0.id, low_id);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut queue = PendingQueue::new(2);
        queue.push(task(0)).unwrap();
        queue.push(task(0)).unwrap();
        assert!(matches!(queue.push(task(9)), Err(OverwatchError::NoCapacity(_))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_restore_keeps_position() {
        let mut queue = PendingQueue::new(4);
        let first = task(3);
        let first_id = first.id;
        queue.push(first).unwrap();
        queue.push(task(3)).unwrap();

        let (request, seq) = queue.pop().unwrap();
        assert_eq!(request.id, first_id);
        queue.restore(request, seq);
        assert_eq!(queue.peek().unwrap().id, first_id);
        assert!(queue.contains(first_id));
    }
}
