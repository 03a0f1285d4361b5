//! The communication manager: the public event API of an agent.
//!
//! Controllers invoke the manager, which validates envelopes against the
//! event model and delegates transport to the binding. Inbound events
//! flow binding -> manager -> correlation engine (responses) or observer
//! registry (requests and one-way events). Two controllers in the same
//! container communicate solely through the broker; there is no local
//! short-circuit.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::correlation::{CorrelationTable, ResponseObservable};
use super::error::CommunicationError;
use super::incoming::{
    IncomingCall, IncomingDiscover, IncomingQuery, IncomingUpdate, ResponsePublisher,
};
use super::observers::{
    EventStream, ObserverKey, ObserverRegistry, ObserverSink, SubscriptionGuard,
};
use super::state::OperatingState;
use crate::binding::{
    CommunicationBinding, CommunicationState, EventPublication, EventSubscription, InboundData,
    InboundEvent, JoinOptions, PublishOptions,
};
use crate::event::{
    AdvertiseEventData, CallEventData, ChannelEventData, CommunicationEvent,
    CommunicationEventData, CommunicationEventType, DeadvertiseEventData, DiscoverEventData,
    IoValueEventData, IoValuePayload, QueryEventData, RawEventData, ResolveEventData,
    UpdateEventData, ValidationError,
};
use crate::model::{
    CoatyObject, CoreType, Identity, IoActor, IoNode, IoSource, ObjectMatcher,
    CORE_OBJECT_TYPE_PREFIX,
};
use crate::runtime::config::CommunicationOptions;
use crate::topic::TopicStructure;

/// The communication manager of an agent.
///
/// Cheap to clone; all clones share the same binding, observer registry,
/// and correlation state.
///
/// # Lifecycle
///
/// `start` builds the ordered join-event list (agent identity advertise,
/// per-controller identity advertises, IO node advertises) and the unjoin
/// event (a Deadvertise of those ids), then hands them to the binding's
/// `join`. While not Joined, publications are accepted and queued by the
/// binding.
pub struct CommunicationManager<B: CommunicationBinding> {
    inner: Arc<ManagerInner<B>>,
}

impl<B: CommunicationBinding> Clone for CommunicationManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ManagerInner<B: CommunicationBinding> {
    binding: B,
    identity: CoatyObject,
    options: Mutex<CommunicationOptions>,
    io_nodes: Mutex<Vec<IoNode>>,
    controller_identities: Mutex<Vec<CoatyObject>>,
    operating_state_tx: watch::Sender<OperatingState>,
    observers: ObserverRegistry,
    correlations: CorrelationTable,
    io: Mutex<IoState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    response_publisher: ResponsePublisher,
}

#[derive(Default)]
struct IoState {
    own_sources: HashMap<Uuid, IoSource>,
    own_actors: HashMap<Uuid, IoActor>,
    /// Route of each known (source, actor) association.
    associations: HashMap<(Uuid, Uuid), String>,
    /// Current route of each of our associated sources.
    source_routes: HashMap<Uuid, String>,
    /// Routes per own actor with the number of associations using each.
    actor_routes: HashMap<Uuid, HashMap<String, usize>>,
    /// Binding-level route subscriptions, refcounted per (route, decode).
    route_subscriptions: HashMap<(String, bool), usize>,
    /// Last emitted association edge per own actor.
    actor_associated: HashMap<Uuid, bool>,
}

impl IoState {
    fn reset(&mut self) {
        self.associations.clear();
        self.source_routes.clear();
        self.actor_routes.clear();
        self.route_subscriptions.clear();
        self.actor_associated.clear();
    }
}

impl<B: CommunicationBinding> CommunicationManager<B> {
    /// Create a manager for the given identity over the given binding.
    ///
    /// `io_nodes` are the agent's IO nodes from configuration; they are
    /// advertised as part of the join events.
    pub fn new(
        identity: Identity,
        options: CommunicationOptions,
        io_nodes: Vec<IoNode>,
        binding: B,
    ) -> Self {
        let (operating_state_tx, _) = watch::channel(OperatingState::Initial);
        let publisher_binding = binding.clone();
        let source_id = identity.id();
        let response_publisher: ResponsePublisher = Arc::new(move |data, correlation_id| {
            let event = CommunicationEvent::new(None, source_id, Some(correlation_id), data);
            publisher_binding.publish(EventPublication::new(event))?;
            Ok(())
        });
        Self {
            inner: Arc::new(ManagerInner {
                binding,
                identity: identity.0,
                options: Mutex::new(options),
                io_nodes: Mutex::new(io_nodes),
                controller_identities: Mutex::new(Vec::new()),
                operating_state_tx,
                observers: ObserverRegistry::new(),
                correlations: CorrelationTable::new(),
                io: Mutex::new(IoState::default()),
                tasks: Mutex::new(Vec::new()),
                response_publisher,
            }),
        }
    }

    /// The agent identity advertised on join.
    pub fn identity(&self) -> &CoatyObject {
        &self.inner.identity
    }

    /// The namespace used on the wire.
    pub fn namespace(&self) -> String {
        self.inner.options.lock().effective_namespace()
    }

    /// Set the controller identities advertised after the agent identity
    /// on every (re)connect. Takes effect on the next `start`.
    pub fn set_controller_identities(&self, identities: Vec<CoatyObject>) {
        *self.inner.controller_identities.lock() = identities;
    }

    /// Current lifecycle state.
    pub fn operating_state(&self) -> OperatingState {
        *self.inner.operating_state_tx.borrow()
    }

    /// Observe lifecycle state transitions.
    pub fn observe_operating_state(&self) -> watch::Receiver<OperatingState> {
        self.inner.operating_state_tx.subscribe()
    }

    /// Observe the binding's connectivity state.
    pub fn observe_communication_state(&self) -> watch::Receiver<CommunicationState> {
        self.inner.binding.communication_state()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start communication: join the infrastructure.
    pub async fn start(&self) -> Result<(), CommunicationError> {
        self.start_with(None).await
    }

    /// Start communication, optionally replacing the communication
    /// options first.
    ///
    /// When already started, the manager is fully stopped (complete
    /// unjoin) before re-joining, so hot reconfiguration via `start_with`
    /// and `restart` behave identically.
    pub async fn start_with(
        &self,
        overrides: Option<CommunicationOptions>,
    ) -> Result<(), CommunicationError> {
        if matches!(
            self.operating_state(),
            OperatingState::Starting | OperatingState::Joined
        ) {
            self.stop().await?;
        }
        if let Some(overrides) = overrides {
            *self.inner.options.lock() = overrides;
        }
        self.inner
            .operating_state_tx
            .send_replace(OperatingState::Starting);

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();

        let dispatch_inner = Arc::clone(&self.inner);
        let dispatch_task = tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                dispatch_inner.dispatch(inbound);
            }
        });

        // Joined is entered on the binding's first Online transition.
        let watcher_inner = Arc::clone(&self.inner);
        let mut state_rx = self.inner.binding.communication_state();
        let watcher_task = tokio::spawn(async move {
            loop {
                if *state_rx.borrow() == CommunicationState::Online {
                    if *watcher_inner.operating_state_tx.borrow() == OperatingState::Starting {
                        watcher_inner
                            .operating_state_tx
                            .send_replace(OperatingState::Joined);
                    }
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        });
        *self.inner.tasks.lock() = vec![dispatch_task, watcher_task];

        self.init_io_state()?;

        let join_events = self.build_join_events()?;
        let unjoin_event = self.build_unjoin_event();
        let options = self.inner.options.lock().clone();
        self.inner
            .binding
            .join(JoinOptions {
                namespace: options.effective_namespace(),
                should_enable_cross_namespacing: options.should_enable_cross_namespacing,
                agent_id: self.inner.identity.object_id,
                join_events,
                unjoin_event,
                inbound: inbound_tx,
            })
            .await?;
        // Bindings that connect during join transition Online before the
        // watcher task first polls; pick that up here.
        if *self.inner.binding.communication_state().borrow() == CommunicationState::Online
            && self.operating_state() == OperatingState::Starting
        {
            self.inner
                .operating_state_tx
                .send_replace(OperatingState::Joined);
        }
        Ok(())
    }

    /// Stop communication: orderly unjoin.
    ///
    /// Publishes the unjoin event, closes the connection, and completes
    /// all observer and response streams.
    pub async fn stop(&self) -> Result<(), CommunicationError> {
        if matches!(
            self.operating_state(),
            OperatingState::Initial | OperatingState::Stopped
        ) {
            return Ok(());
        }
        self.inner
            .operating_state_tx
            .send_replace(OperatingState::Stopping);
        self.inner.binding.unjoin().await?;
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.observers.clear();
        self.inner.correlations.clear();
        self.inner.io.lock().reset();
        self.inner
            .operating_state_tx
            .send_replace(OperatingState::Stopped);
        Ok(())
    }

    /// Stop and start again, optionally with replaced communication
    /// options. Equivalent to `stop` followed by `start_with`.
    pub async fn restart(
        &self,
        overrides: Option<CommunicationOptions>,
    ) -> Result<(), CommunicationError> {
        self.stop().await?;
        self.start_with(overrides).await
    }

    // ------------------------------------------------------------------
    // Advertise / Deadvertise
    // ------------------------------------------------------------------

    /// Advertise an object to interested parties.
    ///
    /// The event is published under the object's core type filter and,
    /// for non-canonical object types, additionally under its object type
    /// filter, so both observation kinds receive it.
    pub fn publish_advertise(&self, object: CoatyObject) -> Result<(), CommunicationError> {
        let data = AdvertiseEventData::new(object)?;
        for event in self.inner.advertise_events(data)? {
            self.inner.binding.publish(EventPublication::new(event))?;
        }
        Ok(())
    }

    /// Observe Advertise events for a core type.
    pub fn observe_advertise_with_core_type(
        &self,
        core_type: CoreType,
    ) -> EventStream<CommunicationEvent> {
        let filter = core_type.name().to_string();
        self.observe_event(CommunicationEventType::Advertise, Some(filter))
    }

    /// Observe Advertise events for an object type.
    pub fn observe_advertise_with_object_type(
        &self,
        object_type: &str,
    ) -> Result<EventStream<CommunicationEvent>, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(object_type) {
            return Err(ValidationError::InvalidObjectType(object_type.to_string()).into());
        }
        let filter = advertise_filter_for_object_type(object_type);
        Ok(self.observe_event(CommunicationEventType::Advertise, Some(filter)))
    }

    /// Deadvertise objects by id.
    pub fn publish_deadvertise(&self, object_ids: Vec<Uuid>) -> Result<(), CommunicationError> {
        self.publish_one_way(
            None,
            CommunicationEventData::Deadvertise(DeadvertiseEventData::new(object_ids)),
        )
    }

    /// Observe Deadvertise events.
    pub fn observe_deadvertise(&self) -> EventStream<CommunicationEvent> {
        self.observe_event(CommunicationEventType::Deadvertise, None)
    }

    // ------------------------------------------------------------------
    // Channel
    // ------------------------------------------------------------------

    /// Deliver objects on a named channel.
    pub fn publish_channel(
        &self,
        channel_id: &str,
        data: ChannelEventData,
    ) -> Result<(), CommunicationError> {
        if !TopicStructure::is_valid_event_filter(channel_id) {
            return Err(ValidationError::InvalidChannelId(channel_id.to_string()).into());
        }
        self.publish_one_way(
            Some(channel_id.to_string()),
            CommunicationEventData::Channel(data),
        )
    }

    /// Observe Channel events for a channel id.
    pub fn observe_channel(
        &self,
        channel_id: &str,
    ) -> Result<EventStream<CommunicationEvent>, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(channel_id) {
            return Err(ValidationError::InvalidChannelId(channel_id.to_string()).into());
        }
        Ok(self.observe_event(
            CommunicationEventType::Channel,
            Some(channel_id.to_string()),
        ))
    }

    // ------------------------------------------------------------------
    // Discover / Resolve
    // ------------------------------------------------------------------

    /// Publish a Discover request and obtain the Resolve response handle.
    ///
    /// The response subscription is issued immediately, even while
    /// offline, so no response is lost to a subscription race; the
    /// request itself is deferred until Online.
    pub fn publish_discover(
        &self,
        data: DiscoverEventData,
    ) -> Result<ResponseObservable, CommunicationError> {
        data.validate()?;
        self.publish_request(vec![None], CommunicationEventData::Discover(data))
    }

    /// Observe incoming Discover requests.
    pub fn observe_discover(&self) -> EventStream<IncomingDiscover> {
        self.register(
            ObserverKey::Event(CommunicationEventType::Discover, None),
            Some(EventSubscription::for_event(
                CommunicationEventType::Discover,
                None,
            )),
            None,
            ObserverSink::Discover,
            None,
        )
    }

    // ------------------------------------------------------------------
    // Query / Retrieve
    // ------------------------------------------------------------------

    /// Publish a Query request and obtain the Retrieve response handle.
    pub fn publish_query(
        &self,
        data: QueryEventData,
    ) -> Result<ResponseObservable, CommunicationError> {
        data.validate()?;
        self.publish_request(vec![None], CommunicationEventData::Query(data))
    }

    /// Observe incoming Query requests.
    pub fn observe_query(&self) -> EventStream<IncomingQuery> {
        self.register(
            ObserverKey::Event(CommunicationEventType::Query, None),
            Some(EventSubscription::for_event(
                CommunicationEventType::Query,
                None,
            )),
            None,
            ObserverSink::Query,
            None,
        )
    }

    // ------------------------------------------------------------------
    // Update / Complete
    // ------------------------------------------------------------------

    /// Publish an Update request and obtain the Complete response handle.
    ///
    /// Like Advertise, the request is published under the object's core
    /// type filter and, for non-canonical object types, additionally
    /// under its object type filter, sharing one correlation id.
    pub fn publish_update(
        &self,
        object: CoatyObject,
    ) -> Result<ResponseObservable, CommunicationError> {
        let data = UpdateEventData::new(object)?;
        let mut filters = vec![Some(data.object.core_type.name().to_string())];
        if !data.object.has_canonical_object_type() {
            filters.push(Some(format!(":{}", data.object.object_type)));
        }
        self.publish_request(filters, CommunicationEventData::Update(data))
    }

    /// Observe incoming Update requests for a core type.
    pub fn observe_update_with_core_type(
        &self,
        core_type: CoreType,
    ) -> EventStream<IncomingUpdate> {
        let filter = core_type.name().to_string();
        self.register(
            ObserverKey::Event(CommunicationEventType::Update, Some(filter.clone())),
            Some(EventSubscription::for_event(
                CommunicationEventType::Update,
                Some(filter),
            )),
            None,
            ObserverSink::Update,
            None,
        )
    }

    /// Observe incoming Update requests for an object type.
    pub fn observe_update_with_object_type(
        &self,
        object_type: &str,
    ) -> Result<EventStream<IncomingUpdate>, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(object_type) {
            return Err(ValidationError::InvalidObjectType(object_type.to_string()).into());
        }
        let filter = advertise_filter_for_object_type(object_type);
        Ok(self.register(
            ObserverKey::Event(CommunicationEventType::Update, Some(filter.clone())),
            Some(EventSubscription::for_event(
                CommunicationEventType::Update,
                Some(filter),
            )),
            None,
            ObserverSink::Update,
            None,
        ))
    }

    // ------------------------------------------------------------------
    // Call / Return
    // ------------------------------------------------------------------

    /// Publish a Call request and obtain the Return response handle.
    pub fn publish_call(
        &self,
        operation: &str,
        data: CallEventData,
    ) -> Result<ResponseObservable, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(operation) {
            return Err(ValidationError::InvalidOperationName(operation.to_string()).into());
        }
        self.publish_request(
            vec![Some(operation.to_string())],
            CommunicationEventData::Call(data),
        )
    }

    /// Observe incoming Call requests for an operation.
    ///
    /// Only requests whose context filter evaluates to true for the
    /// supplied context object are delivered; requests without a context
    /// filter are delivered exactly when no context is supplied.
    pub fn observe_call(
        &self,
        operation: &str,
        context: Option<CoatyObject>,
    ) -> Result<EventStream<IncomingCall>, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(operation) {
            return Err(ValidationError::InvalidOperationName(operation.to_string()).into());
        }
        let filter = operation.to_string();
        Ok(self.register(
            ObserverKey::Event(CommunicationEventType::Call, Some(filter.clone())),
            Some(EventSubscription::for_event(
                CommunicationEventType::Call,
                Some(filter),
            )),
            context,
            ObserverSink::Call,
            None,
        ))
    }

    // ------------------------------------------------------------------
    // Raw
    // ------------------------------------------------------------------

    /// Publish an opaque payload on an arbitrary broker topic.
    pub fn publish_raw(&self, topic: &str, payload: Bytes) -> Result<(), CommunicationError> {
        self.publish_raw_with_options(topic, payload, PublishOptions::default())
    }

    /// Publish an opaque payload with explicit publication options.
    pub fn publish_raw_with_options(
        &self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), CommunicationError> {
        if !TopicStructure::is_valid_publish_topic(topic) {
            return Err(ValidationError::InvalidTopic(topic.to_string()).into());
        }
        let event = CommunicationEvent::new(
            None,
            self.inner.identity.object_id,
            None,
            CommunicationEventData::Raw(RawEventData {
                topic: topic.to_string(),
                payload,
            }),
        );
        self.inner
            .binding
            .publish(EventPublication::new(event).with_options(options))?;
        Ok(())
    }

    /// Observe raw messages matching a topic filter, delivered as
    /// (topic, payload) pairs.
    pub fn observe_raw(
        &self,
        topic_filter: &str,
    ) -> Result<EventStream<(String, Bytes)>, CommunicationError> {
        if !TopicStructure::is_valid_topic_filter(topic_filter) {
            return Err(ValidationError::InvalidTopicFilter(topic_filter.to_string()).into());
        }
        Ok(self.register(
            ObserverKey::Raw(topic_filter.to_string()),
            Some(EventSubscription::raw(topic_filter)),
            None,
            ObserverSink::Raw,
            None,
        ))
    }

    // ------------------------------------------------------------------
    // IO routing
    // ------------------------------------------------------------------

    /// Publish an IO value on a route.
    pub fn publish_io_value(
        &self,
        route: &str,
        payload: IoValuePayload,
    ) -> Result<(), CommunicationError> {
        if !TopicStructure::is_valid_publish_topic(route) {
            return Err(ValidationError::InvalidTopic(route.to_string()).into());
        }
        let event = CommunicationEvent::new(
            None,
            self.inner.identity.object_id,
            None,
            CommunicationEventData::IoValue(IoValueEventData {
                route: route.to_string(),
                payload,
            }),
        );
        self.inner.binding.publish(EventPublication::new(event))?;
        Ok(())
    }

    /// Publish an IO value for one of this agent's IO sources.
    ///
    /// The value travels on the route currently associated with the
    /// source; it is silently dropped while the source is unassociated.
    pub fn publish_io_value_for_source(
        &self,
        source: &IoSource,
        payload: IoValuePayload,
    ) -> Result<(), CommunicationError> {
        let route = self.inner.io.lock().source_routes.get(&source.id()).cloned();
        match route {
            Some(route) => self.publish_io_value(&route, payload),
            None => {
                debug!(source = %source.id(), "dropping IO value of unassociated source");
                Ok(())
            }
        }
    }

    /// Observe IO values delivered to one of this agent's IO actors.
    ///
    /// Values are decoded as JSON unless the actor declares raw values.
    pub fn observe_io_value(&self, actor: &IoActor) -> EventStream<IoValuePayload> {
        let external_cleanup = self.inner.track_actor(actor);
        self.register(
            ObserverKey::IoValue(actor.id()),
            None,
            None,
            ObserverSink::IoValue,
            external_cleanup,
        )
    }

    /// Observe the association edge of one of this agent's IO actors.
    ///
    /// Emits `true` when the actor becomes associated with at least one
    /// source and `false` when its last association is dissolved; two
    /// consecutive emissions never carry the same value.
    pub fn observe_io_association(&self, actor: &IoActor) -> EventStream<bool> {
        let external_cleanup = self.inner.track_actor(actor);
        self.register(
            ObserverKey::Association(actor.id()),
            None,
            None,
            ObserverSink::Association,
            external_cleanup,
        )
    }

    /// Observe Associate events of an IO context.
    pub fn observe_associate(
        &self,
        io_context_name: &str,
    ) -> Result<EventStream<CommunicationEvent>, CommunicationError> {
        if !TopicStructure::is_valid_event_filter(io_context_name) {
            return Err(ValidationError::InvalidContextName(io_context_name.to_string()).into());
        }
        Ok(self.observe_event(
            CommunicationEventType::Associate,
            Some(io_context_name.to_string()),
        ))
    }

    /// Publish an Associate event for an IO context.
    ///
    /// Used by IO routers to establish or dissolve associations.
    pub fn publish_associate(
        &self,
        io_context_name: &str,
        data: crate::event::AssociateEventData,
    ) -> Result<(), CommunicationError> {
        if !TopicStructure::is_valid_event_filter(io_context_name) {
            return Err(ValidationError::InvalidContextName(io_context_name.to_string()).into());
        }
        self.publish_one_way(
            Some(io_context_name.to_string()),
            CommunicationEventData::Associate(data),
        )
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn observe_event(
        &self,
        event_type: CommunicationEventType,
        event_filter: Option<String>,
    ) -> EventStream<CommunicationEvent> {
        self.register(
            ObserverKey::Event(event_type, event_filter.clone()),
            Some(EventSubscription::for_event(event_type, event_filter)),
            None,
            ObserverSink::Event,
            None,
        )
    }

    fn register<T>(
        &self,
        key: ObserverKey,
        subscription: Option<EventSubscription>,
        context: Option<CoatyObject>,
        make_sink: impl FnOnce(mpsc::UnboundedSender<T>) -> ObserverSink,
        extra_cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id, first) = self.inner.observers.add(key.clone(), make_sink(tx), context);
        if first {
            if let Some(subscription) = &subscription {
                if let Err(error) = self.inner.binding.subscribe(subscription.clone()) {
                    warn!(%error, "binding rejected subscription");
                }
            }
        }
        let observers = self.inner.observers.clone();
        let binding = self.inner.binding.clone();
        let guard = SubscriptionGuard::new(Box::new(move || {
            if observers.remove(&key, id) {
                if let Some(subscription) = subscription {
                    let _ = binding.unsubscribe(&subscription);
                }
            }
            if let Some(cleanup) = extra_cleanup {
                cleanup();
            }
        }));
        EventStream::new(rx, guard)
    }

    fn publish_one_way(
        &self,
        event_filter: Option<String>,
        data: CommunicationEventData,
    ) -> Result<(), CommunicationError> {
        let event =
            CommunicationEvent::new(event_filter, self.inner.identity.object_id, None, data);
        self.inner.binding.publish(EventPublication::new(event))?;
        Ok(())
    }

    fn publish_request(
        &self,
        event_filters: Vec<Option<String>>,
        data: CommunicationEventData,
    ) -> Result<ResponseObservable, CommunicationError> {
        let request_type = data.event_type();
        let response_type = match request_type.response_type() {
            Some(response_type) => response_type,
            None => unreachable!("publish_request is only invoked for request kinds"),
        };
        let correlation_id = Uuid::new_v4();
        let rx = self.inner.correlations.register(correlation_id);
        let response_sub = EventSubscription::for_response(response_type, correlation_id);
        // Subscribe before publishing so no response is lost to a
        // subscription race, even while the request itself is deferred.
        self.inner.binding.subscribe(response_sub.clone())?;
        for event_filter in event_filters {
            let event = CommunicationEvent::new(
                event_filter,
                self.inner.identity.object_id,
                Some(correlation_id),
                data.clone(),
            );
            self.inner.binding.publish(EventPublication::new(event))?;
        }
        let binding = self.inner.binding.clone();
        let correlations = self.inner.correlations.clone();
        Ok(ResponseObservable::new(
            correlation_id,
            rx,
            Box::new(move || {
                let _ = binding.unsubscribe(&response_sub);
                correlations.remove(&correlation_id);
            }),
        ))
    }

    fn init_io_state(&self) -> Result<(), CommunicationError> {
        let nodes = self.inner.io_nodes.lock().clone();
        let mut io = self.inner.io.lock();
        for node in &nodes {
            for source in node.io_sources() {
                io.own_sources.insert(source.id(), source);
            }
            for actor in node.io_actors() {
                io.own_actors.insert(actor.id(), actor);
            }
        }
        drop(io);
        // Track associations of our IO nodes' contexts from the start.
        for node in &nodes {
            self.inner.binding.subscribe(EventSubscription::for_event(
                CommunicationEventType::Associate,
                Some(node.context_name().to_string()),
            ))?;
        }
        // The agent's identity and IO nodes are discoverable without any
        // user-level observer, so peers joining later still find them.
        self.inner.binding.subscribe(EventSubscription::for_event(
            CommunicationEventType::Discover,
            None,
        ))?;
        Ok(())
    }

    fn build_join_events(&self) -> Result<Vec<EventPublication>, CommunicationError> {
        let mut events = Vec::new();
        let identity_data = AdvertiseEventData::new(self.inner.identity.clone())?;
        events.extend(self.inner.advertise_events(identity_data)?);
        for identity in self.inner.controller_identities.lock().iter() {
            let data = AdvertiseEventData::new(identity.clone())?;
            events.extend(self.inner.advertise_events(data)?);
        }
        for node in self.inner.io_nodes.lock().iter() {
            let data = AdvertiseEventData::new(node.object().clone())?;
            events.extend(self.inner.advertise_events(data)?);
        }
        Ok(events
            .into_iter()
            .map(|event| {
                EventPublication::new(event).with_options(PublishOptions {
                    retain: false,
                    once: true,
                })
            })
            .collect())
    }

    fn build_unjoin_event(&self) -> EventPublication {
        let mut object_ids = vec![self.inner.identity.object_id];
        object_ids.extend(
            self.inner
                .controller_identities
                .lock()
                .iter()
                .map(|identity| identity.object_id),
        );
        object_ids.extend(self.inner.io_nodes.lock().iter().map(IoNode::id));
        EventPublication::new(CommunicationEvent::new(
            None,
            self.inner.identity.object_id,
            None,
            CommunicationEventData::Deadvertise(DeadvertiseEventData::new(object_ids)),
        ))
    }
}

impl<B: CommunicationBinding> ManagerInner<B> {
    fn advertise_events(
        &self,
        data: AdvertiseEventData,
    ) -> Result<Vec<CommunicationEvent>, CommunicationError> {
        let core_filter = data.object.core_type.name().to_string();
        let canonical = data.object.has_canonical_object_type();
        let object_type = data.object.object_type.clone();
        let mut events = vec![CommunicationEvent::new(
            Some(core_filter),
            self.identity.object_id,
            None,
            CommunicationEventData::Advertise(data.clone()),
        )];
        if !canonical {
            events.push(CommunicationEvent::new(
                Some(format!(":{object_type}")),
                self.identity.object_id,
                None,
                CommunicationEventData::Advertise(data),
            ));
        }
        Ok(events)
    }

    /// Register an actor as one of ours; returns the cleanup releasing
    /// its external route subscription, if it declares one.
    fn track_actor(self: &Arc<Self>, actor: &IoActor) -> Option<Box<dyn FnOnce() + Send>> {
        let decode = !actor.use_raw_values();
        let mut io = self.io.lock();
        io.own_actors.entry(actor.id()).or_insert_with(|| actor.clone());
        let route = actor.external_route()?.to_string();
        Self::acquire_actor_route(self, &mut io, actor.id(), &route, decode);
        drop(io);
        let inner = Arc::clone(self);
        let actor_id = actor.id();
        Some(Box::new(move || {
            let mut io = inner.io.lock();
            Self::release_actor_route(&inner, &mut io, actor_id, &route, decode);
        }))
    }

    fn acquire_actor_route(
        inner: &Arc<Self>,
        io: &mut IoState,
        actor_id: Uuid,
        route: &str,
        decode: bool,
    ) {
        let counts = io.actor_routes.entry(actor_id).or_default();
        let count = counts.entry(route.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            let refcount = io
                .route_subscriptions
                .entry((route.to_string(), decode))
                .or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                if let Err(error) = inner
                    .binding
                    .subscribe(EventSubscription::io_route(route, decode))
                {
                    warn!(%error, route, "binding rejected IO route subscription");
                }
            }
        }
        Self::emit_association_edge(inner, io, actor_id);
    }

    fn release_actor_route(
        inner: &Arc<Self>,
        io: &mut IoState,
        actor_id: Uuid,
        route: &str,
        decode: bool,
    ) {
        let mut released = false;
        if let Some(counts) = io.actor_routes.get_mut(&actor_id) {
            if let Some(count) = counts.get_mut(route) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(route);
                    released = true;
                }
            }
        }
        if released {
            if let Some(refcount) = io
                .route_subscriptions
                .get_mut(&(route.to_string(), decode))
            {
                *refcount -= 1;
                if *refcount == 0 {
                    io.route_subscriptions.remove(&(route.to_string(), decode));
                    let _ = inner
                        .binding
                        .unsubscribe(&EventSubscription::io_route(route, decode));
                }
            }
        }
        Self::emit_association_edge(inner, io, actor_id);
    }

    fn emit_association_edge(inner: &Arc<Self>, io: &mut IoState, actor_id: Uuid) {
        let associated = io
            .actor_routes
            .get(&actor_id)
            .is_some_and(|routes| !routes.is_empty());
        let previous = io.actor_associated.insert(actor_id, associated);
        if previous.unwrap_or(false) != associated {
            inner
                .observers
                .for_each(&ObserverKey::Association(actor_id), |entry| {
                    if let ObserverSink::Association(tx) = &entry.sink {
                        let _ = tx.send(associated);
                    }
                });
        }
    }

    fn dispatch(self: &Arc<Self>, inbound: InboundEvent) {
        use CommunicationEventType as T;
        match inbound.event_type {
            T::Raw => self.dispatch_raw(inbound),
            T::IoValue => self.dispatch_io_value(inbound),
            T::Discover | T::Query | T::Update | T::Call => self.dispatch_request(inbound),
            T::Resolve | T::Retrieve | T::Complete | T::Return => {
                if let Some(event) = decode_inbound(inbound) {
                    self.correlations.deliver(event);
                }
            }
            T::Advertise | T::Deadvertise | T::Channel => {
                if let Some(event) = decode_inbound(inbound) {
                    self.dispatch_event(event);
                }
            }
            T::Associate => {
                if let Some(event) = decode_inbound(inbound) {
                    self.handle_associate(&event);
                    self.dispatch_event(event);
                }
            }
        }
    }

    fn dispatch_event(&self, event: CommunicationEvent) {
        let key = ObserverKey::Event(event.event_type, event.event_filter.clone());
        self.observers.for_each(&key, |entry| {
            if let ObserverSink::Event(tx) = &entry.sink {
                let _ = tx.send(event.clone());
            }
        });
    }

    fn dispatch_request(self: &Arc<Self>, inbound: InboundEvent) {
        let Some(event) = decode_inbound(inbound) else {
            return;
        };
        let key = ObserverKey::Event(event.event_type, event.event_filter.clone());
        let publisher = Arc::clone(&self.response_publisher);
        match event.event_type {
            CommunicationEventType::Discover => {
                self.observers.for_each(&key, |entry| {
                    if let ObserverSink::Discover(tx) = &entry.sink {
                        let _ = tx.send(IncomingDiscover {
                            event: event.clone(),
                            publisher: Arc::clone(&publisher),
                        });
                    }
                });
                self.auto_resolve_discover(&event);
            }
            CommunicationEventType::Query => self.observers.for_each(&key, |entry| {
                if let ObserverSink::Query(tx) = &entry.sink {
                    let _ = tx.send(IncomingQuery {
                        event: event.clone(),
                        publisher: Arc::clone(&publisher),
                    });
                }
            }),
            CommunicationEventType::Update => self.observers.for_each(&key, |entry| {
                if let ObserverSink::Update(tx) = &entry.sink {
                    let _ = tx.send(IncomingUpdate {
                        event: event.clone(),
                        publisher: Arc::clone(&publisher),
                    });
                }
            }),
            CommunicationEventType::Call => {
                let context_filter = event.call().and_then(|data| data.filter.clone());
                self.observers.for_each(&key, |entry| {
                    // A request is eligible when its context filter
                    // evaluates to true for the observer's context, or
                    // when neither side supplies one.
                    let eligible = match (&context_filter, &entry.context) {
                        (None, None) => true,
                        (Some(filter), Some(context)) => {
                            ObjectMatcher::matches_object(filter, context)
                        }
                        _ => false,
                    };
                    if eligible {
                        if let ObserverSink::Call(tx) = &entry.sink {
                            let _ = tx.send(IncomingCall {
                                event: event.clone(),
                                publisher: Arc::clone(&publisher),
                            });
                        }
                    }
                });
            }
            _ => {}
        }
    }

    /// Resolve Discover requests that target this agent's identity or
    /// one of its IO nodes.
    fn auto_resolve_discover(&self, event: &CommunicationEvent) {
        let Some(data) = event.discover() else {
            return;
        };
        let Some(correlation_id) = event.correlation_id else {
            return;
        };
        let mut resolved = Vec::new();
        if data.matches(&self.identity) {
            resolved.push(self.identity.clone());
        }
        for node in self.io_nodes.lock().iter() {
            if data.matches(node.object()) {
                resolved.push(node.object().clone());
            }
        }
        for object in resolved {
            let response = (self.response_publisher)(
                CommunicationEventData::Resolve(ResolveEventData::with_object(object)),
                correlation_id,
            );
            if let Err(error) = response {
                warn!(%error, "failed to resolve discover for own objects");
            }
        }
    }

    fn dispatch_raw(&self, inbound: InboundEvent) {
        let Some(filter) = inbound.event_filter else {
            return;
        };
        let InboundData::Raw(payload) = inbound.data else {
            return;
        };
        self.observers.for_each(&ObserverKey::Raw(filter), |entry| {
            if let ObserverSink::Raw(tx) = &entry.sink {
                let _ = tx.send((inbound.topic.clone(), payload.clone()));
            }
        });
    }

    fn dispatch_io_value(&self, inbound: InboundEvent) {
        let payload = match inbound.data {
            InboundData::Json(value) => IoValuePayload::Json(value),
            InboundData::Raw(bytes) => IoValuePayload::Raw(bytes),
        };
        let decoded = matches!(payload, IoValuePayload::Json(_));
        let recipients: Vec<Uuid> = {
            let io = self.io.lock();
            io.actor_routes
                .iter()
                .filter(|(actor_id, routes)| {
                    routes.contains_key(&inbound.topic)
                        && io
                            .own_actors
                            .get(actor_id)
                            .is_some_and(|actor| !actor.use_raw_values() == decoded)
                })
                .map(|(actor_id, _)| *actor_id)
                .collect()
        };
        for actor_id in recipients {
            self.observers
                .for_each(&ObserverKey::IoValue(actor_id), |entry| {
                    if let ObserverSink::IoValue(tx) = &entry.sink {
                        let _ = tx.send(payload.clone());
                    }
                });
        }
    }

    fn handle_associate(self: &Arc<Self>, event: &CommunicationEvent) {
        let Some(data) = event.associate() else {
            return;
        };
        let mut io = self.io.lock();
        let pair = (data.io_source_id, data.io_actor_id);
        if let Some(route) = &data.associating_route {
            let previous = io.associations.insert(pair, route.clone());
            if previous.as_deref() == Some(route.as_str()) {
                // Redundant association, suppressed.
                return;
            }
            let own_actor_decode = io
                .own_actors
                .get(&pair.1)
                .map(|actor| !actor.use_raw_values());
            if let (Some(previous_route), Some(decode)) = (previous, own_actor_decode) {
                Self::release_actor_route(self, &mut io, pair.1, &previous_route, decode);
            }
            if io.own_sources.contains_key(&pair.0) {
                io.source_routes.insert(pair.0, route.clone());
            }
            if let Some(decode) = own_actor_decode {
                Self::acquire_actor_route(self, &mut io, pair.1, route, decode);
            }
        } else {
            let Some(route) = io.associations.remove(&pair) else {
                return;
            };
            if io.own_sources.contains_key(&pair.0) {
                let still_associated = io.associations.keys().any(|(source, _)| *source == pair.0);
                if !still_associated {
                    io.source_routes.remove(&pair.0);
                }
            }
            let own_actor_decode = io
                .own_actors
                .get(&pair.1)
                .map(|actor| !actor.use_raw_values());
            if let Some(decode) = own_actor_decode {
                Self::release_actor_route(self, &mut io, pair.1, &route, decode);
            }
        }
    }
}

fn decode_inbound(inbound: InboundEvent) -> Option<CommunicationEvent> {
    let InboundData::Json(value) = inbound.data else {
        return None;
    };
    let source_id = inbound.source_id?;
    match CommunicationEventData::decode_typed(inbound.event_type, value) {
        Ok(data) => Some(CommunicationEvent::new(
            inbound.event_filter,
            source_id,
            inbound.correlation_id,
            data,
        )),
        Err(error) => {
            warn!(topic = inbound.topic, %error, "dropping inbound event with invalid payload");
            None
        }
    }
}

/// Map an object type onto the advertise event filter: canonical core
/// object types collapse onto their core type filter so that core-type
/// and object-type observers share one topic.
fn advertise_filter_for_object_type(object_type: &str) -> String {
    if let Some(core_name) = object_type.strip_prefix(CORE_OBJECT_TYPE_PREFIX) {
        if CoreType::from_name(core_name).is_some() {
            return core_name.to_string();
        }
    }
    format!(":{object_type}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::binding::InProcessBroker;

    fn manager(broker: &InProcessBroker, name: &str) -> CommunicationManager<crate::binding::InProcessBinding> {
        CommunicationManager::new(
            Identity::new(name),
            CommunicationOptions::default(),
            Vec::new(),
            broker.binding(),
        )
    }

    #[test]
    fn test_advertise_filter_mapping() {
        assert_eq!(advertise_filter_for_object_type("coaty.CoatyObject"), "CoatyObject");
        assert_eq!(advertise_filter_for_object_type("coaty.Task"), "Task");
        assert_eq!(
            advertise_filter_for_object_type("com.mydomain.MyCustom"),
            ":com.mydomain.MyCustom"
        );
        // A "coaty."-prefixed type that is not a core type is an object
        // type like any other.
        assert_eq!(
            advertise_filter_for_object_type("coaty.test.MockObject"),
            ":coaty.test.MockObject"
        );
    }

    #[tokio::test]
    async fn test_start_reaches_joined() {
        let broker = InProcessBroker::new();
        let manager = manager(&broker, "Agent");
        assert_eq!(manager.operating_state(), OperatingState::Initial);
        manager.start().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(manager.operating_state(), OperatingState::Joined);
        manager.stop().await.unwrap();
        assert_eq!(manager.operating_state(), OperatingState::Stopped);
    }

    #[tokio::test]
    async fn test_identity_is_advertised_on_join() {
        let broker = InProcessBroker::new();
        let observer = manager(&broker, "Observer");
        observer.start().await.unwrap();
        let mut identities = observer.observe_advertise_with_core_type(CoreType::Identity);

        let agent = manager(&broker, "Agent");
        agent.start().await.unwrap();

        let event = identities.recv().await.unwrap();
        assert_eq!(event.advertise().unwrap().object.name, "Agent");
        assert_eq!(event.source_id, agent.identity().object_id);
    }

    #[tokio::test]
    async fn test_stop_publishes_unjoin_deadvertise() {
        let broker = InProcessBroker::new();
        let observer = manager(&broker, "Observer");
        observer.start().await.unwrap();
        let mut deadvertises = observer.observe_deadvertise();

        let agent = manager(&broker, "Agent");
        let agent_id = agent.identity().object_id;
        agent.start().await.unwrap();
        agent.stop().await.unwrap();

        let event = deadvertises.recv().await.unwrap();
        assert!(event
            .deadvertise()
            .unwrap()
            .object_ids
            .contains(&agent_id));
    }

    #[tokio::test]
    async fn test_invalid_inputs_fail_synchronously() {
        let broker = InProcessBroker::new();
        let manager = manager(&broker, "Agent");

        assert!(manager
            .publish_channel("a/b", ChannelEventData::with_objects(vec![]))
            .is_err());
        assert!(manager.observe_channel("a+b").is_err());
        assert!(manager.observe_advertise_with_object_type("a#b").is_err());
        assert!(manager.publish_raw("", Bytes::new()).is_err());
        assert!(manager.observe_raw("a/#/b").is_err());
        assert!(manager.publish_call("bad/op", CallEventData::new()).is_err());
        assert!(manager.publish_discover(DiscoverEventData::default()).is_err());
    }
}
