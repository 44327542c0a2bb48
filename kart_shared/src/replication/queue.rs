//! Unacknowledged moves held by the controlling client.

use std::collections::VecDeque;

use tracing::warn;

use crate::movement::Move;

/// FIFO of moves sent to the authority but not yet covered by a snapshot.
///
/// Invariants: start times strictly increase front to back, and every
/// queued move is newer than the last acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingMoveQueue {
    moves: VecDeque<Move>,
    capacity: usize,
    acknowledged: Option<f64>,
}

impl PendingMoveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            moves: VecDeque::new(),
            capacity: capacity.max(1),
            acknowledged: None,
        }
    }

    /// Whether `mv` is newer than everything queued or acknowledged.
    pub fn accepts(&self, mv: &Move) -> bool {
        let newest = self
            .moves
            .back()
            .map(|m| m.start_time)
            .or(self.acknowledged);
        newest.map_or(true, |t| mv.start_time > t)
    }

    /// Appends a move. Returns `false` and leaves the queue untouched if the
    /// move is not strictly newer than the tail.
    pub fn push(&mut self, mv: Move) -> bool {
        if !self.accepts(&mv) {
            return false;
        }
        self.moves.push_back(mv);
        if self.moves.len() > self.capacity {
            if let Some(dropped) = self.moves.pop_front() {
                warn!(
                    start_time = dropped.start_time,
                    capacity = self.capacity,
                    "Pending move queue full, dropping oldest move"
                );
            }
        }
        true
    }

    /// Drops every move at or before `last`. Idempotent; an older
    /// acknowledgement than one already seen changes nothing.
    /// Returns how many moves were removed.
    pub fn prune(&mut self, last: Option<&Move>) -> usize {
        let Some(last) = last else {
            return 0;
        };
        let ack = last.start_time;
        if self.acknowledged.map_or(true, |prev| ack > prev) {
            self.acknowledged = Some(ack);
        }
        let before = self.moves.len();
        self.moves.retain(|mv| mv.start_time > ack);
        before - self.moves.len()
    }

    /// Start time of the newest acknowledgement seen.
    pub fn acknowledged_time(&self) -> Option<f64> {
        self.acknowledged
    }

    pub fn iter(&self) -> impl Iterator<Item = &Move> {
        self.moves.iter()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(t: f64) -> Move {
        Move::new(1.0, 0.0, 0.1, t)
    }

    fn times(q: &PendingMoveQueue) -> Vec<f64> {
        q.iter().map(|m| m.start_time).collect()
    }

    #[test]
    fn prune_removes_acknowledged_and_keeps_order() {
        let mut q = PendingMoveQueue::new(16);
        for t in [1.0, 2.0, 3.0, 4.0, 5.0] {
            assert!(q.push(mv(t)));
        }

        assert_eq!(q.prune(Some(&mv(3.0))), 3);
        assert_eq!(times(&q), vec![4.0, 5.0]);

        // Same acknowledgement again is a no-op.
        assert_eq!(q.prune(Some(&mv(3.0))), 0);
        assert_eq!(times(&q), vec![4.0, 5.0]);
    }

    #[test]
    fn prune_between_start_times() {
        let mut q = PendingMoveQueue::new(16);
        for t in [1.0, 2.0, 3.0] {
            q.push(mv(t));
        }
        q.prune(Some(&mv(2.5)));
        assert_eq!(times(&q), vec![3.0]);
        assert_eq!(q.acknowledged_time(), Some(2.5));
    }

    #[test]
    fn no_acknowledgement_prunes_nothing() {
        let mut q = PendingMoveQueue::new(16);
        q.push(mv(1.0));
        assert_eq!(q.prune(None), 0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn stale_acknowledgement_keeps_newest() {
        let mut q = PendingMoveQueue::new(16);
        for t in [1.0, 2.0, 3.0] {
            q.push(mv(t));
        }
        q.prune(Some(&mv(2.0)));
        q.prune(Some(&mv(1.0)));
        assert_eq!(q.acknowledged_time(), Some(2.0));
        assert_eq!(times(&q), vec![3.0]);
    }

    #[test]
    fn rejects_duplicates_and_out_of_order() {
        let mut q = PendingMoveQueue::new(16);
        assert!(q.push(mv(1.0)));
        assert!(!q.push(mv(1.0)));
        assert!(!q.push(mv(0.5)));

        q.prune(Some(&mv(1.0)));
        assert!(q.is_empty());
        // Acknowledged time still bounds new moves.
        assert!(!q.push(mv(0.9)));
        assert!(q.push(mv(1.1)));
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = PendingMoveQueue::new(2);
        q.push(mv(1.0));
        q.push(mv(2.0));
        q.push(mv(3.0));
        assert_eq!(times(&q), vec![2.0, 3.0]);
    }
}
