//! Channel-backed event streams and the observer registry.
//!
//! Observers are delivered through unbounded channels; dropping a stream
//! cancels the underlying subscription. Registration and removal share a
//! single table keyed by event kind and filter.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

// Layer 2: Third-party crate imports
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::incoming::{IncomingCall, IncomingDiscover, IncomingQuery, IncomingUpdate};
use crate::event::{CommunicationEvent, CommunicationEventType, IoValuePayload};
use crate::model::CoatyObject;

/// A stream of events delivered to one observer.
///
/// Dropping the stream unsubscribes: the registration is removed and,
/// when it was the last one for its topic filter, the binding
/// subscription is released. Timeouts are the consumer's concern and are
/// layered on top with `tokio::time::timeout`.
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _guard: SubscriptionGuard,
}

impl<T> EventStream<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, guard: SubscriptionGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Receive the next event, suspending until one arrives.
    ///
    /// Returns `None` once the stream is completed (the manager stopped).
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive an already delivered event without suspending.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Explicitly unsubscribe. Equivalent to dropping the stream.
    pub fn unsubscribe(self) {}

    /// A stream fed by a background task that is aborted when the stream
    /// is dropped.
    pub(crate) fn new_with_task(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self::new(rx, SubscriptionGuard::new(Box::new(move || task.abort())))
    }
}

/// Receive from an optional stream; pending forever when absent.
///
/// Callers set the option to `None` once the stream completes, which
/// keeps completed streams from spinning inside `select!` loops.
pub(crate) async fn recv_opt<T>(stream: &mut Option<EventStream<T>>) -> Option<T> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Runs a cleanup action when the owning stream is dropped.
pub(crate) struct SubscriptionGuard {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub(crate) fn new(cleanup: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// A guard without a cleanup action.
    pub(crate) fn noop() -> Self {
        Self { cleanup: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Key of an observer registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ObserverKey {
    /// Protocol events keyed by kind and event filter.
    Event(CommunicationEventType, Option<String>),
    /// Raw observers keyed by their literal topic filter.
    Raw(String),
    /// IO value observers keyed by actor id.
    IoValue(Uuid),
    /// IO association edge observers keyed by actor id.
    Association(Uuid),
}

/// The sink of one observer registration.
pub(crate) enum ObserverSink {
    Event(mpsc::UnboundedSender<CommunicationEvent>),
    Discover(mpsc::UnboundedSender<IncomingDiscover>),
    Query(mpsc::UnboundedSender<IncomingQuery>),
    Update(mpsc::UnboundedSender<IncomingUpdate>),
    Call(mpsc::UnboundedSender<IncomingCall>),
    Raw(mpsc::UnboundedSender<(String, Bytes)>),
    IoValue(mpsc::UnboundedSender<IoValuePayload>),
    Association(mpsc::UnboundedSender<bool>),
}

pub(crate) struct ObserverEntry {
    pub id: u64,
    pub sink: ObserverSink,
    /// Context object of a Call observer, evaluated against the request's
    /// context filter.
    pub context: Option<CoatyObject>,
}

/// Table of active observer registrations.
///
/// The manager holds no back-reference to observers except through this
/// table; entries are keyed by opaque ids so guards can remove exactly
/// their own registration.
#[derive(Clone)]
pub(crate) struct ObserverRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: Mutex<HashMap<ObserverKey, Vec<ObserverEntry>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Add a registration. Returns its id and whether it is the first
    /// registration for the key (the binding subscription must then be
    /// issued).
    pub fn add(
        &self,
        key: ObserverKey,
        sink: ObserverSink,
        context: Option<CoatyObject>,
    ) -> (u64, bool) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.inner.entries.lock();
        let slot = entries.entry(key).or_default();
        let first = slot.is_empty();
        slot.push(ObserverEntry { id, sink, context });
        (id, first)
    }

    /// Remove a registration. Returns whether it was the last one for the
    /// key (the binding subscription may then be released).
    pub fn remove(&self, key: &ObserverKey, id: u64) -> bool {
        let mut entries = self.inner.entries.lock();
        let Some(slot) = entries.get_mut(key) else {
            return false;
        };
        slot.retain(|entry| entry.id != id);
        if slot.is_empty() {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Invoke `deliver` for every registration under the key.
    pub fn for_each(&self, key: &ObserverKey, mut deliver: impl FnMut(&ObserverEntry)) {
        let entries = self.inner.entries.lock();
        if let Some(slot) = entries.get(key) {
            for entry in slot {
                deliver(entry);
            }
        }
    }

    /// Number of registrations under the key.
    pub fn count(&self, key: &ObserverKey) -> usize {
        self.inner.entries.lock().get(key).map_or(0, Vec::len)
    }

    /// Drop all registrations, completing every observer stream.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event_key() -> ObserverKey {
        ObserverKey::Event(CommunicationEventType::Advertise, Some("Task".to_string()))
    }

    #[test]
    fn test_first_and_last_registration_tracking() {
        let registry = ObserverRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let (id1, first1) = registry.add(event_key(), ObserverSink::Event(tx1), None);
        assert!(first1);
        let (id2, first2) = registry.add(event_key(), ObserverSink::Event(tx2), None);
        assert!(!first2);
        assert_eq!(registry.count(&event_key()), 2);

        assert!(!registry.remove(&event_key(), id1));
        assert!(registry.remove(&event_key(), id2));
        assert_eq!(registry.count(&event_key()), 0);
    }

    #[test]
    fn test_keys_are_distinct_per_filter() {
        let registry = ObserverRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.add(event_key(), ObserverSink::Event(tx), None);

        let other = ObserverKey::Event(CommunicationEventType::Advertise, None);
        assert_eq!(registry.count(&other), 0);
    }

    #[tokio::test]
    async fn test_stream_guard_runs_cleanup_on_drop() {
        let flag = Arc::new(AtomicU64::new(0));
        let flag_clone = Arc::clone(&flag);
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let stream = EventStream::new(
            rx,
            SubscriptionGuard::new(Box::new(move || {
                flag_clone.store(1, Ordering::SeqCst);
            })),
        );
        tx.send(7).unwrap();
        drop(stream);
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_receives_until_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut stream = EventStream::new(rx, SubscriptionGuard::noop());
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(stream.recv().await, Some(1));
        assert_eq!(stream.try_recv(), Some(2));
        assert_eq!(stream.try_recv(), None);
        drop(tx);
        assert_eq!(stream.recv().await, None);
    }
}
