//! The abstract contract between the communication manager and a broker
//! adapter.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::error::BindingError;
use crate::event::{CommunicationEvent, CommunicationEventType};
use crate::topic::TopicStructure;

/// Connectivity state of a binding towards its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunicationState {
    /// No usable broker connection; publications are deferred.
    #[default]
    Offline,
    /// Connected to the broker; publications drain immediately.
    Online,
}

/// Completion callback of a publication.
///
/// Invoked with `publish_failed = true` whenever a drain attempt fails
/// (the item stays queued for the next reconnect) and exactly once with
/// `publish_failed = false` when the publication is handed to the broker.
pub type PublishCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Options of a single publication.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Ask the broker to retain the message (external raw topics only).
    pub retain: bool,
    /// Drop this publication if one with the same topic is already
    /// queued. Used for join events re-posted on repeated reconnects.
    pub once: bool,
}

/// A publication handed to the binding.
///
/// Publishing never blocks on the network: the binding enqueues the item
/// and drains the queue while Online.
#[derive(Clone)]
pub struct EventPublication {
    /// The event envelope to publish.
    pub event: CommunicationEvent,
    /// Publication options.
    pub options: PublishOptions,
    /// Optional completion callback.
    pub done: Option<PublishCallback>,
}

impl EventPublication {
    /// A publication with default options and no completion callback.
    pub fn new(event: CommunicationEvent) -> Self {
        Self {
            event,
            options: PublishOptions::default(),
            done: None,
        }
    }

    /// Builder method: set publication options.
    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder method: set the completion callback.
    pub fn with_done(mut self, done: PublishCallback) -> Self {
        self.done = Some(done);
        self
    }
}

impl fmt::Debug for EventPublication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublication")
            .field("event", &self.event)
            .field("options", &self.options)
            .field("done", &self.done.is_some())
            .finish()
    }
}

/// A subscription descriptor registered with the binding.
///
/// The descriptor survives reconnects: the binding resubscribes all
/// registered descriptors on every (re)connection until they are
/// explicitly removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubscription {
    /// The event kind of interest.
    pub event_type: CommunicationEventType,
    /// Event filter (object type marker, channel id, operation name, IO
    /// context name) for protocol events.
    pub event_filter: Option<String>,
    /// Correlation id pinning a response subscription.
    pub correlation_id: Option<Uuid>,
    /// Concrete topic filter for raw subscriptions and IO routes.
    pub topic: Option<String>,
    /// Whether inbound payloads are decoded as JSON.
    pub decode_json: bool,
}

impl EventSubscription {
    /// Subscribe to a protocol event kind with an optional event filter.
    pub fn for_event(
        event_type: CommunicationEventType,
        event_filter: Option<String>,
    ) -> Self {
        Self {
            event_type,
            event_filter,
            correlation_id: None,
            topic: None,
            decode_json: true,
        }
    }

    /// Subscribe to the responses of a two-way request.
    pub fn for_response(event_type: CommunicationEventType, correlation_id: Uuid) -> Self {
        Self {
            event_type,
            event_filter: None,
            correlation_id: Some(correlation_id),
            topic: None,
            decode_json: true,
        }
    }

    /// Subscribe to raw messages on an arbitrary topic filter.
    pub fn raw(topic_filter: impl Into<String>) -> Self {
        Self {
            event_type: CommunicationEventType::Raw,
            event_filter: None,
            correlation_id: None,
            topic: Some(topic_filter.into()),
            decode_json: false,
        }
    }

    /// Subscribe to IO values on a route.
    pub fn io_route(route: impl Into<String>, decode_json: bool) -> Self {
        Self {
            event_type: CommunicationEventType::IoValue,
            event_filter: None,
            correlation_id: None,
            topic: Some(route.into()),
            decode_json,
        }
    }

    /// Resolve the broker-level topic filter of this subscription.
    ///
    /// `namespace` is ignored for raw and IO-route subscriptions, whose
    /// topic is given literally. Cross-namespacing substitutes the
    /// single-level wildcard for the namespace level.
    pub fn topic_filter(&self, namespace: &str, cross_namespacing: bool) -> String {
        if let Some(topic) = &self.topic {
            return topic.clone();
        }
        let namespace = if cross_namespacing {
            None
        } else {
            Some(namespace)
        };
        TopicStructure::subscription_filter(
            namespace,
            self.event_type,
            self.event_filter.as_deref(),
            self.correlation_id.as_ref(),
        )
    }
}

/// Payload of an inbound event notification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundData {
    /// Decoded JSON payload of a protocol event or decoded IO value.
    Json(Value),
    /// Raw payload of a raw or undecoded IO value subscription.
    Raw(Bytes),
}

/// An inbound event notification emitted by the binding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// The event kind.
    pub event_type: CommunicationEventType,
    /// Event filter decoded from the topic, if any.
    pub event_filter: Option<String>,
    /// Source id decoded from the topic, if the topic conforms to the
    /// protocol grammar.
    pub source_id: Option<Uuid>,
    /// Correlation id decoded from the topic, for two-way events.
    pub correlation_id: Option<Uuid>,
    /// The concrete topic the message arrived on.
    pub topic: String,
    /// The payload.
    pub data: InboundData,
}

/// Options handed to a binding on join.
///
/// The join events are published first on every (re)connect, in declared
/// order; the unjoin event is delivered as the broker-held last will and
/// as the final publication on orderly shutdown.
pub struct JoinOptions {
    /// Namespace level used for all protocol topics.
    pub namespace: String,
    /// Whether subscriptions listen across all namespaces.
    pub should_enable_cross_namespacing: bool,
    /// Identity id of the agent, used for client identification.
    pub agent_id: Uuid,
    /// Events published first on every (re)connect.
    pub join_events: Vec<EventPublication>,
    /// Event delivered as last will and on orderly shutdown.
    pub unjoin_event: EventPublication,
    /// Sink for inbound event notifications.
    pub inbound: mpsc::UnboundedSender<InboundEvent>,
}

impl fmt::Debug for JoinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinOptions")
            .field("namespace", &self.namespace)
            .field(
                "should_enable_cross_namespacing",
                &self.should_enable_cross_namespacing,
            )
            .field("agent_id", &self.agent_id)
            .field("join_events", &self.join_events.len())
            .finish()
    }
}

/// The pluggable adapter between the communication manager and a concrete
/// messaging broker.
///
/// # Implementation Requirements
///
/// - `publish`, `subscribe`, and `unsubscribe` never block on the
///   network; they enqueue and return.
/// - Publications issued while Offline are deferred in FIFO order and
///   drained on the transition to Online, after the join events.
/// - Subscriptions survive reconnects; the binding owns resubscription.
/// - Inbound dispatch is serialized per binding instance.
/// - Implementations are `Clone`; all clones share the same connection,
///   queue, and subscription table.
#[async_trait]
pub trait CommunicationBinding: Clone + Send + Sync + 'static {
    /// Join the communication infrastructure.
    ///
    /// Publishes the join events before any deferred user publications on
    /// every (re)connect and installs the unjoin event as last will.
    async fn join(&self, options: JoinOptions) -> Result<(), BindingError>;

    /// Leave the communication infrastructure.
    ///
    /// Publishes the unjoin event (when a connection is available), then
    /// closes the connection and resets internal state. Resolves once the
    /// binding has fully unjoined.
    async fn unjoin(&self) -> Result<(), BindingError>;

    /// Enqueue a publication. Never blocks on the network.
    fn publish(&self, publication: EventPublication) -> Result<(), BindingError>;

    /// Register a subscription descriptor.
    fn subscribe(&self, subscription: EventSubscription) -> Result<(), BindingError>;

    /// Remove a previously registered subscription descriptor.
    fn unsubscribe(&self, subscription: &EventSubscription) -> Result<(), BindingError>;

    /// Observe the binding's connectivity state.
    fn communication_state(&self) -> watch::Receiver<CommunicationState>;
}
