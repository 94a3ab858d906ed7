use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use castellan_types::LogEvent;
use tokio::sync::{Mutex, Notify};

/// Bounded input queue with drop-oldest back-pressure: once `capacity` is
/// reached, pushing a new event evicts the oldest queued one and increments
/// [`DropOldestQueue::dropped`].
pub struct DropOldestQueue {
    inner: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl DropOldestQueue {
    /// Construct an empty queue bounded at `capacity` (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push `event`, evicting the oldest entry first if the queue is full.
    pub async fn push(&self, event: LogEvent) {
        {
            let mut queue = self.inner.lock().await;
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Pop the oldest event, waiting if the queue is currently empty.
    pub async fn pop(&self) -> LogEvent {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Number of entries evicted by back-pressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::EventLevel;
    use chrono::Utc;

    fn event(id: u32) -> LogEvent {
        LogEvent::new(Utc::now(), "H1", "Security", id, EventLevel::Information, "u", "m", "", None).unwrap()
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let queue = DropOldestQueue::new(2);
        queue.push(event(1)).await;
        queue.push(event(2)).await;
        queue.push(event(3)).await;

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len().await, 2);
        let first = queue.pop().await;
        assert_eq!(first.event_id, 2);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = std::sync::Arc::new(DropOldestQueue::new(4));
        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(event(7)).await;
        let popped = handle.await.unwrap();
        assert_eq!(popped.event_id, 7);
    }
}
