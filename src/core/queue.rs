use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::platform::elapsed_between;

/// An item together with the time it entered the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Queued<T> {
    pub enqueued_at: DateTime<Utc>,
    pub item: T,
}

/// Result of [`BoundedQueue::push_or_drain`].
#[derive(Debug)]
pub enum PushResult<T> {
    Accepted,
    /// The queue was full. Its previous contents were drained and are
    /// returned; the new item was then accepted.
    Drained(Vec<Queued<T>>),
}

/// FIFO queue that never holds more than `capacity` items.
///
/// All operations take the single internal lock once, so a drain never
/// interleaves with a push.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<Queued<T>>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    /// Push if there is room, otherwise hand the item back.
    pub fn try_push(&self, item: T, now: DateTime<Utc>) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(Queued {
            enqueued_at: now,
            item,
        });
        Ok(())
    }

    /// Push, evicting the oldest item when full. Returns the evicted item.
    pub fn push_evicting(&self, item: T, now: DateTime<Utc>) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front().map(|queued| queued.item)
        } else {
            None
        };
        items.push_back(Queued {
            enqueued_at: now,
            item,
        });
        evicted
    }

    /// Push if there is room; if full, drain everything first and then push.
    pub fn push_or_drain(&self, item: T, now: DateTime<Utc>) -> PushResult<T> {
        let mut items = self.items.lock();
        let result = if items.len() >= self.capacity {
            PushResult::Drained(items.drain(..).collect())
        } else {
            PushResult::Accepted
        };
        items.push_back(Queued {
            enqueued_at: now,
            item,
        });
        result
    }

    pub fn drain(&self) -> Vec<Queued<T>> {
        self.items.lock().drain(..).collect()
    }

    /// Put a previously drained batch back in front of newer items.
    ///
    /// Only as many as fit are kept, newest first; the number of dropped
    /// items is returned.
    pub fn requeue_front(&self, batch: Vec<Queued<T>>) -> usize {
        let mut items = self.items.lock();
        let room = self.capacity.saturating_sub(items.len());
        let dropped = batch.len().saturating_sub(room);

        for queued in batch.into_iter().skip(dropped).rev() {
            items.push_front(queued);
        }

        if dropped > 0 {
            tracing::warn!(
                "{} queue full on requeue; dropped {} oldest records",
                self.name,
                dropped
            );
        }
        dropped
    }

    pub fn oldest_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.items
            .lock()
            .front()
            .map(|queued| elapsed_between(queued.enqueued_at, now))
    }

    /// Full, or the oldest item has waited at least `max_age`.
    pub fn should_flush(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let items = self.items.lock();
        if items.len() >= self.capacity {
            return true;
        }
        items
            .front()
            .map(|queued| elapsed_between(queued.enqueued_at, now) >= max_age)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items<T: Clone>(batch: &[Queued<T>]) -> Vec<T> {
        batch.iter().map(|q| q.item.clone()).collect()
    }

    #[test]
    fn test_try_push_respects_capacity() {
        let queue = BoundedQueue::new("test", 2);
        let now = Utc::now();
        assert!(queue.try_push(1, now).is_ok());
        assert!(queue.try_push(2, now).is_ok());
        assert_eq!(queue.try_push(3, now), Err(3));
        assert!(queue.is_full());
    }

    #[test]
    fn test_push_evicting_drops_oldest() {
        let queue = BoundedQueue::new("test", 2);
        let now = Utc::now();
        queue.push_evicting(1, now);
        queue.push_evicting(2, now);
        assert_eq!(queue.push_evicting(3, now), Some(1));
        assert_eq!(items(&queue.drain()), vec![2, 3]);
    }

    #[test]
    fn test_push_or_drain() {
        let queue = BoundedQueue::new("test", 2);
        let now = Utc::now();
        assert!(matches!(queue.push_or_drain(1, now), PushResult::Accepted));
        assert!(matches!(queue.push_or_drain(2, now), PushResult::Accepted));

        match queue.push_or_drain(3, now) {
            PushResult::Drained(batch) => assert_eq!(items(&batch), vec![1, 2]),
            PushResult::Accepted => panic!("expected drain"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_requeue_keeps_newest_and_order() {
        let queue = BoundedQueue::new("test", 3);
        let now = Utc::now();
        queue.try_push(10, now).unwrap();

        let batch = vec![1, 2, 3]
            .into_iter()
            .map(|item| Queued {
                enqueued_at: now,
                item,
            })
            .collect();
        assert_eq!(queue.requeue_front(batch), 1);
        assert_eq!(items(&queue.drain()), vec![2, 3, 10]);
    }

    #[test]
    fn test_should_flush_on_age() {
        let queue = BoundedQueue::new("test", 10);
        let start = Utc::now();
        queue.try_push(1, start).unwrap();

        let max_age = Duration::from_secs(60);
        assert!(!queue.should_flush(start + chrono::Duration::seconds(30), max_age));
        assert!(queue.should_flush(start + chrono::Duration::seconds(60), max_age));
    }
}
