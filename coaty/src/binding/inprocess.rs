//! In-process loopback binding.
//!
//! Routes publications back to matching subscriptions of all bindings
//! attached to the same [`InProcessBroker`], with broker-like semantics:
//! namespace isolation through topic filters, wildcard matching, offline
//! deferral, join-event ordering, and last-will delivery on abrupt
//! termination. Used for single-process deployments and scenario tests.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::dispatch::{classify_inbound, encode_publication};
use super::error::BindingError;
use super::traits::{
    CommunicationBinding, CommunicationState, EventPublication, EventSubscription, InboundEvent,
    JoinOptions,
};
use crate::event::CommunicationEventType;
use crate::topic::TopicStructure;

/// A process-local message broker shared by in-process bindings.
///
/// Availability can be toggled to exercise offline deferral and
/// reconnection behavior without a live broker.
#[derive(Clone)]
pub struct InProcessBroker {
    shared: Arc<BrokerShared>,
}

struct BrokerShared {
    available: Mutex<bool>,
    clients: Mutex<Vec<Arc<ClientShared>>>,
    next_client_id: AtomicU64,
}

struct ClientShared {
    id: u64,
    state_tx: watch::Sender<CommunicationState>,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    joined: Option<JoinedInfo>,
    subscriptions: Vec<EventSubscription>,
    queue: VecDeque<EventPublication>,
}

struct JoinedInfo {
    namespace: String,
    cross_namespacing: bool,
    join_events: Vec<EventPublication>,
    unjoin_event: EventPublication,
    inbound: mpsc::UnboundedSender<InboundEvent>,
}

impl InProcessBroker {
    /// Create a new, initially available broker.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                available: Mutex::new(true),
                clients: Mutex::new(Vec::new()),
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a binding attached to this broker.
    pub fn binding(&self) -> InProcessBinding {
        let (state_tx, state_rx) = watch::channel(CommunicationState::Offline);
        let client = Arc::new(ClientShared {
            id: self.shared.next_client_id.fetch_add(1, Ordering::Relaxed),
            state_tx,
            state: Mutex::new(ClientState::default()),
        });
        self.shared.clients.lock().push(Arc::clone(&client));
        InProcessBinding {
            shared: Arc::clone(&self.shared),
            client,
            state_rx,
        }
    }

    /// Toggle broker availability.
    ///
    /// Turning the broker unavailable moves every binding Offline;
    /// turning it available reconnects every joined binding, re-posts its
    /// join events, and drains its deferred publications.
    pub fn set_available(&self, available: bool) {
        {
            let mut guard = self.shared.available.lock();
            if *guard == available {
                return;
            }
            *guard = available;
        }
        let clients: Vec<_> = self.shared.clients.lock().clone();
        for client in clients {
            if available {
                BrokerShared::connect(&self.shared, &client);
            } else {
                let _ = client.state_tx.send(CommunicationState::Offline);
            }
        }
    }

    /// Whether the broker currently accepts traffic.
    pub fn is_available(&self) -> bool {
        *self.shared.available.lock()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerShared {
    /// Bring a joined client Online: join events first, then drain.
    fn connect(shared: &Arc<BrokerShared>, client: &Arc<ClientShared>) {
        {
            let mut state = client.state.lock();
            let Some(joined) = &state.joined else {
                return;
            };
            let namespace = joined.namespace.clone();
            // Insert join events at the queue head in declared order,
            // skipping topics already queued.
            let join_events: Vec<_> = joined.join_events.clone();
            for event in join_events.into_iter().rev() {
                if !Self::is_topic_queued(&state, &event, &namespace) {
                    state.queue.push_front(event);
                }
            }
        }
        let _ = client.state_tx.send(CommunicationState::Online);
        Self::drain(shared, client);
    }

    fn is_topic_queued(state: &ClientState, event: &EventPublication, namespace: &str) -> bool {
        let Ok((topic, _)) = encode_publication(&event.event, namespace) else {
            return false;
        };
        state.queue.iter().any(|queued| {
            encode_publication(&queued.event, namespace)
                .map(|(queued_topic, _)| queued_topic == topic)
                .unwrap_or(false)
        })
    }

    /// Drain a client's publication queue while the broker is available.
    fn drain(shared: &Arc<BrokerShared>, client: &Arc<ClientShared>) {
        loop {
            let (item, namespace) = {
                let mut state = client.state.lock();
                let Some(joined) = &state.joined else {
                    return;
                };
                let namespace = joined.namespace.clone();
                if !*shared.available.lock() {
                    // Broker became unavailable mid-drain: re-enable
                    // deferral and notify remaining items.
                    for pending in &state.queue {
                        if let Some(done) = &pending.done {
                            done(true);
                        }
                    }
                    return;
                }
                (state.queue.pop_front(), namespace)
            };
            let Some(item) = item else {
                return;
            };
            match encode_publication(&item.event, &namespace) {
                Ok((topic, payload)) => {
                    Self::route(shared, &topic, &payload);
                    if let Some(done) = &item.done {
                        done(false);
                    }
                }
                Err(error) => {
                    warn!(%error, "dropping unencodable publication");
                    if let Some(done) = &item.done {
                        done(true);
                    }
                }
            }
        }
    }

    /// Deliver a message to every client with a matching subscription.
    fn route(shared: &Arc<BrokerShared>, topic: &str, payload: &Bytes) {
        let clients: Vec<_> = shared.clients.lock().clone();
        for client in clients {
            let state = client.state.lock();
            let Some(joined) = &state.joined else {
                continue;
            };
            if *client.state_tx.borrow() != CommunicationState::Online {
                continue;
            }
            // A broker only delivers messages matching at least one
            // subscription filter of the client.
            let parsed_protocol = TopicStructure::parse(topic)
                .is_some_and(|s| s.event_type != CommunicationEventType::IoValue);
            if parsed_protocol {
                let subscribed = state.subscriptions.iter().any(|sub| {
                    TopicStructure::matches(
                        topic,
                        &sub.topic_filter(&joined.namespace, joined.cross_namespacing),
                    )
                });
                if !subscribed {
                    continue;
                }
            }
            for event in classify_inbound(topic, payload, state.subscriptions.iter()) {
                if joined.inbound.send(event).is_err() {
                    debug!(client = client.id, "inbound sink closed");
                    break;
                }
            }
        }
    }
}

/// A loopback binding attached to an [`InProcessBroker`].
///
/// All clones share the same client state, queue, and subscription table.
#[derive(Clone)]
pub struct InProcessBinding {
    shared: Arc<BrokerShared>,
    client: Arc<ClientShared>,
    state_rx: watch::Receiver<CommunicationState>,
}

impl InProcessBinding {
    /// Simulate abrupt termination of this agent.
    ///
    /// The broker delivers the stored unjoin event as last will, then the
    /// client's state is discarded without an orderly shutdown.
    pub fn simulate_abrupt_termination(&self) {
        let (unjoin, namespace) = {
            let mut state = self.client.state.lock();
            let Some(joined) = state.joined.take() else {
                return;
            };
            state.subscriptions.clear();
            state.queue.clear();
            (joined.unjoin_event, joined.namespace)
        };
        let _ = self.client.state_tx.send(CommunicationState::Offline);
        if *self.shared.available.lock() {
            if let Ok((topic, payload)) = encode_publication(&unjoin.event, &namespace) {
                BrokerShared::route(&self.shared, &topic, &payload);
            }
        }
    }
}

#[async_trait]
impl CommunicationBinding for InProcessBinding {
    async fn join(&self, options: JoinOptions) -> Result<(), BindingError> {
        {
            let mut state = self.client.state.lock();
            if state.joined.is_some() {
                return Err(BindingError::AlreadyJoined);
            }
            state.joined = Some(JoinedInfo {
                namespace: options.namespace,
                cross_namespacing: options.should_enable_cross_namespacing,
                join_events: options.join_events,
                unjoin_event: options.unjoin_event,
                inbound: options.inbound,
            });
        }
        if *self.shared.available.lock() {
            BrokerShared::connect(&self.shared, &self.client);
        }
        Ok(())
    }

    async fn unjoin(&self) -> Result<(), BindingError> {
        let unjoin = {
            let mut state = self.client.state.lock();
            let Some(joined) = state.joined.take() else {
                return Ok(());
            };
            state.subscriptions.clear();
            state.queue.clear();
            Some((joined.unjoin_event, joined.namespace))
        };
        if let Some((unjoin_event, namespace)) = unjoin {
            if *self.shared.available.lock() {
                match encode_publication(&unjoin_event.event, &namespace) {
                    Ok((topic, payload)) => {
                        BrokerShared::route(&self.shared, &topic, &payload);
                        if let Some(done) = &unjoin_event.done {
                            done(false);
                        }
                    }
                    Err(error) => {
                        warn!(%error, "dropping unencodable unjoin event");
                        if let Some(done) = &unjoin_event.done {
                            done(true);
                        }
                    }
                }
            } else if let Some(done) = &unjoin_event.done {
                done(true);
            }
        }
        let _ = self.client.state_tx.send(CommunicationState::Offline);
        Ok(())
    }

    fn publish(&self, publication: EventPublication) -> Result<(), BindingError> {
        let online = {
            let mut state = self.client.state.lock();
            if publication.options.once {
                if let Some(joined) = &state.joined {
                    if BrokerShared::is_topic_queued(&state, &publication, &joined.namespace) {
                        return Ok(());
                    }
                }
            }
            state.queue.push_back(publication);
            *self.client.state_tx.borrow() == CommunicationState::Online
        };
        if online {
            BrokerShared::drain(&self.shared, &self.client);
        }
        Ok(())
    }

    fn subscribe(&self, subscription: EventSubscription) -> Result<(), BindingError> {
        let mut state = self.client.state.lock();
        state.subscriptions.push(subscription);
        Ok(())
    }

    fn unsubscribe(&self, subscription: &EventSubscription) -> Result<(), BindingError> {
        let mut state = self.client.state.lock();
        if let Some(index) = state.subscriptions.iter().position(|s| s == subscription) {
            state.subscriptions.remove(index);
        }
        Ok(())
    }

    fn communication_state(&self) -> watch::Receiver<CommunicationState> {
        self.state_rx.clone()
    }
}
