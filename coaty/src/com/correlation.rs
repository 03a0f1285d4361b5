//! Correlation of responses with outstanding two-way requests.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::error::CommunicationError;
use super::observers::{EventStream, SubscriptionGuard};
use crate::event::CommunicationEvent;

/// Maps correlation ids to the sinks of outstanding requests.
///
/// Responses for unknown correlation ids are dropped: they are late
/// arrivals for requests whose consumer has already closed the stream.
#[derive(Clone)]
pub(crate) struct CorrelationTable {
    map: Arc<DashMap<Uuid, mpsc::UnboundedSender<CommunicationEvent>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
        }
    }

    /// Register a fresh correlation id and return the response receiver.
    pub fn register(&self, correlation_id: Uuid) -> mpsc::UnboundedReceiver<CommunicationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.map.insert(correlation_id, tx);
        rx
    }

    /// Route a response to its request's sink, if still outstanding.
    pub fn deliver(&self, event: CommunicationEvent) {
        let Some(correlation_id) = event.correlation_id else {
            return;
        };
        match self.map.get(&correlation_id) {
            Some(sink) => {
                let _ = sink.send(event);
            }
            None => {
                debug!(%correlation_id, "dropping late response");
            }
        }
    }

    /// Remove a correlation record.
    pub fn remove(&self, correlation_id: &Uuid) {
        self.map.remove(correlation_id);
    }

    /// Drop all records, completing every open response stream.
    pub fn clear(&self) {
        self.map.clear();
    }
}

enum ObservableState {
    /// The response stream has not been handed out yet.
    Available {
        rx: mpsc::UnboundedReceiver<CommunicationEvent>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    },
    /// The response stream has been handed out (or abandoned).
    Consumed,
}

/// Handle on the responses of a published two-way request.
///
/// The response stream can be obtained exactly once over the handle's
/// lifetime; a second `subscribe` after the stream was dropped fails so
/// that responses dispatched during the gap are never silently lost.
/// Dropping the stream (or an unsubscribed handle) unsubscribes the
/// response topic and removes the correlation record.
pub struct ResponseObservable {
    correlation_id: Uuid,
    state: Mutex<ObservableState>,
}

impl ResponseObservable {
    pub(crate) fn new(
        correlation_id: Uuid,
        rx: mpsc::UnboundedReceiver<CommunicationEvent>,
        cleanup: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            correlation_id,
            state: Mutex::new(ObservableState::Available {
                rx,
                cleanup: Some(cleanup),
            }),
        }
    }

    /// The request's correlation id.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Obtain the response stream.
    ///
    /// # Errors
    ///
    /// Fails with [`CommunicationError::AlreadyConsumed`] when the stream
    /// was already obtained, whether or not it has been dropped since.
    pub fn subscribe(&self) -> Result<EventStream<CommunicationEvent>, CommunicationError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, ObservableState::Consumed) {
            ObservableState::Available { rx, cleanup } => {
                let guard = match cleanup {
                    Some(cleanup) => SubscriptionGuard::new(cleanup),
                    None => SubscriptionGuard::noop(),
                };
                Ok(EventStream::new(rx, guard))
            }
            ObservableState::Consumed => Err(CommunicationError::AlreadyConsumed),
        }
    }
}

impl Drop for ResponseObservable {
    fn drop(&mut self) {
        // Abandoning the handle without ever subscribing releases the
        // response subscription as well.
        let mut state = self.state.lock();
        if let ObservableState::Available { cleanup, .. } = &mut *state {
            if let Some(cleanup) = cleanup.take() {
                cleanup();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{CommunicationEventData, ResolveEventData};
    use crate::model::{CoatyObject, CoreType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolve_event(correlation_id: Uuid) -> CommunicationEvent {
        let object = CoatyObject::with_core_type(CoreType::CoatyObject, "resolved");
        CommunicationEvent::new(
            None,
            Uuid::new_v4(),
            Some(correlation_id),
            CommunicationEventData::Resolve(ResolveEventData::with_object(object)),
        )
    }

    #[tokio::test]
    async fn test_delivery_to_registered_sink() {
        let table = CorrelationTable::new();
        let correlation_id = Uuid::new_v4();
        let mut rx = table.register(correlation_id);

        table.deliver(resolve_event(correlation_id));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.correlation_id, Some(correlation_id));
    }

    #[tokio::test]
    async fn test_late_responses_are_dropped() {
        let table = CorrelationTable::new();
        let correlation_id = Uuid::new_v4();
        let mut rx = table.register(correlation_id);
        table.remove(&correlation_id);

        table.deliver(resolve_event(correlation_id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_subscription_rule() {
        let table = CorrelationTable::new();
        let correlation_id = Uuid::new_v4();
        let rx = table.register(correlation_id);

        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleanups);
        let observable = ResponseObservable::new(
            correlation_id,
            rx,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let stream = observable.subscribe().unwrap();
        // Second subscription fails even while the stream is alive.
        assert!(matches!(
            observable.subscribe(),
            Err(CommunicationError::AlreadyConsumed)
        ));

        drop(stream);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        // Re-subscription after unsubscription still fails.
        assert!(matches!(
            observable.subscribe(),
            Err(CommunicationError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_abandoned_observable_runs_cleanup() {
        let table = CorrelationTable::new();
        let correlation_id = Uuid::new_v4();
        let rx = table.register(correlation_id);

        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleanups);
        let observable = ResponseObservable::new(
            correlation_id,
            rx,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drop(observable);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
