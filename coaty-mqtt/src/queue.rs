//! The offline publication queue.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::Bytes;

// Layer 3: Internal module imports
use coaty::binding::PublishCallback;

/// One deferred publication, already encoded for the wire.
#[derive(Clone)]
pub(crate) struct PendingItem {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    /// Drop this item when its topic is already queued.
    pub once: bool,
    pub done: Option<PublishCallback>,
}

impl fmt::Debug for PendingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingItem")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("retain", &self.retain)
            .field("once", &self.once)
            .finish()
    }
}

/// FIFO of publications deferred while the client is not Online.
///
/// Join events are inserted at the head in declared order on every
/// reconnect; the `once` flag keeps repeated reconnects from queueing
/// the same join event twice.
#[derive(Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<PendingItem>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Returns false when the item was dropped by its
    /// `once` flag.
    pub fn push_back(&mut self, item: PendingItem) -> bool {
        if item.once && self.contains_topic(&item.topic) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Insert items at the queue head, preserving their order and
    /// honoring `once` deduplication.
    pub fn push_front_ordered(&mut self, items: Vec<PendingItem>) {
        for item in items.into_iter().rev() {
            if item.once && self.contains_topic(&item.topic) {
                continue;
            }
            self.items.push_front(item);
        }
    }

    /// Take the next item to publish.
    pub fn pop_front(&mut self) -> Option<PendingItem> {
        self.items.pop_front()
    }

    /// Put an item back at the head after a failed publish attempt.
    pub fn push_front(&mut self, item: PendingItem) {
        self.items.push_front(item);
    }

    /// Notify every queued item's callback that publication failed.
    /// Items stay queued for the next reconnect.
    pub fn notify_all_failed(&self) {
        for item in &self.items {
            if let Some(done) = &item.done {
                done(true);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn contains_topic(&self, topic: &str) -> bool {
        self.items.iter().any(|item| item.topic == topic)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn item(topic: &str, once: bool) -> PendingItem {
        PendingItem {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"{}"),
            retain: false,
            once,
            done: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PendingQueue::new();
        queue.push_back(item("a", false));
        queue.push_back(item("b", false));
        queue.push_back(item("a", false));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().topic, "a");
        assert_eq!(queue.pop_front().unwrap().topic, "b");
        assert_eq!(queue.pop_front().unwrap().topic, "a");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_once_deduplicates_by_topic() {
        let mut queue = PendingQueue::new();
        assert!(queue.push_back(item("join", true)));
        assert!(!queue.push_back(item("join", true)));
        assert!(queue.push_back(item("user", false)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_join_events_inserted_at_head_in_order() {
        let mut queue = PendingQueue::new();
        queue.push_back(item("user-1", false));
        queue.push_back(item("user-2", false));
        queue.push_front_ordered(vec![item("join-1", true), item("join-2", true)]);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|item| item.topic)
            .collect();
        assert_eq!(order, vec!["join-1", "join-2", "user-1", "user-2"]);
    }

    #[test]
    fn test_head_insert_respects_once() {
        let mut queue = PendingQueue::new();
        queue.push_back(item("join-1", true));
        queue.push_front_ordered(vec![item("join-1", true), item("join-2", true)]);
        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|item| item.topic)
            .collect();
        assert_eq!(order, vec!["join-2", "join-1"]);
    }

    #[test]
    fn test_notify_all_failed_keeps_items() {
        let failures = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::new();
        for topic in ["a", "b"] {
            let counter = Arc::clone(&failures);
            queue.push_back(PendingItem {
                topic: topic.to_string(),
                payload: Bytes::new(),
                retain: false,
                once: false,
                done: Some(Arc::new(move |failed| {
                    if failed {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            });
        }
        queue.notify_all_failed();
        assert_eq!(failures.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 2);
    }
}
