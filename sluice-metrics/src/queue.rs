use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::record::MetricRecord;

/// Orders queue entries by timestamp and then by insertion sequence.
#[derive(Clone, Copy, Debug)]
struct QueueKey {
    timestamp: f64,
    sequence: u64,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// A queue of metric records that yields the oldest record first.
///
/// Records are ordered by their timestamp. Records with equal timestamps are yielded in the order
/// they were pushed. The sequence number breaking those ties restarts at `1` whenever a record is
/// pushed into an empty queue.
#[derive(Debug, Default)]
pub struct BufferedQueue {
    entries: BTreeMap<QueueKey, MetricRecord>,
    sequence: u64,
}

impl BufferedQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record and returns the sequence number assigned to it.
    pub fn push(&mut self, record: MetricRecord) -> u64 {
        if self.entries.is_empty() {
            self.sequence = 0;
        }
        self.sequence += 1;

        let key = QueueKey {
            timestamp: record.timestamp(),
            sequence: self.sequence,
        };
        self.entries.insert(key, record);
        self.sequence
    }

    /// Removes and returns the oldest record.
    pub fn pop_oldest(&mut self) -> Option<MetricRecord> {
        self.entries.pop_first().map(|(_, record)| record)
    }

    /// Removes up to `max` of the oldest records, oldest first.
    pub fn pop_batch(&mut self, max: usize) -> Vec<MetricRecord> {
        let mut batch = Vec::with_capacity(max.min(self.entries.len()));
        while batch.len() < max {
            match self.pop_oldest() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        batch
    }

    /// Returns the number of queued records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no records are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sequence numbers of all entries in queue order.
    #[cfg(test)]
    fn sequences(&self) -> Vec<u64> {
        self.entries.keys().map(|key| key.sequence).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, timestamp: f64) -> MetricRecord {
        MetricRecord::new(name, 1.0).with_timestamp(timestamp)
    }

    fn names(records: &[MetricRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_orders_by_timestamp() {
        let mut queue = BufferedQueue::new();
        queue.push(record("c", 30.0));
        queue.push(record("a", 10.0));
        queue.push(record("b", 20.0));

        let batch = queue.pop_batch(10);
        assert_eq!(names(&batch), ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let mut queue = BufferedQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.push(record(name, 5.0));
        }

        assert_eq!(queue.sequences(), [1, 2, 3, 4]);
        assert_eq!(names(&queue.pop_batch(4)), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_sequence_resets_when_empty() {
        let mut queue = BufferedQueue::new();
        assert_eq!(queue.push(record("a", 1.0)), 1);
        assert_eq!(queue.push(record("b", 1.0)), 2);

        queue.pop_oldest();
        // Not empty yet, numbering continues.
        assert_eq!(queue.push(record("c", 1.0)), 3);

        queue.pop_batch(10);
        assert_eq!(queue.push(record("d", 1.0)), 1);
        assert_eq!(queue.push(record("e", 1.0)), 2);
        assert_eq!(queue.sequences(), [1, 2]);
    }

    #[test]
    fn test_pop_batch_bounds() {
        let mut queue = BufferedQueue::new();
        for i in 0..25 {
            queue.push(record("m", i as f64));
        }

        assert_eq!(queue.pop_batch(20).len(), 20);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.pop_batch(20).len(), 5);
        assert!(queue.pop_batch(20).is_empty());
        assert!(queue.pop_oldest().is_none());
    }

    #[test]
    fn test_nan_timestamps_are_ordered() {
        let mut queue = BufferedQueue::new();
        queue.push(record("nan", f64::NAN));
        queue.push(record("one", 1.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(names(&queue.pop_batch(2)), ["one", "nan"]);
    }
}
