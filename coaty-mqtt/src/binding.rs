//! The MQTT communication binding.
//!
//! A driver task owns the client and its event loop and selects over the
//! command channel and the broker connection. The binding connects with
//! a clean session at QoS 0, installs the unjoin event as last will,
//! owns resubscription and republication across reconnects, and defers
//! publications in FIFO order while not Online.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, NetworkOptions, Outgoing, Packet,
    QoS, SubscribeFilter,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::options::{client_id, MqttBindingOptions};
use crate::queue::{PendingItem, PendingQueue};
use crate::table::SubscriptionTable;
use coaty::binding::dispatch::{classify_inbound, encode_publication};
use coaty::binding::{
    BindingError, CommunicationBinding, CommunicationState, EventPublication, EventSubscription,
    JoinOptions,
};

/// How long an orderly unjoin waits for the unjoin event and the
/// disconnect packet to flush.
const UNJOIN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the client library's request channel. The binding drains
/// its own queue only while Online, so this never builds up.
const CLIENT_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Join {
        options: JoinOptions,
        done: oneshot::Sender<Result<(), BindingError>>,
    },
    Unjoin {
        done: oneshot::Sender<Result<(), BindingError>>,
    },
    Publish(EventPublication),
    Subscribe(EventSubscription),
    Unsubscribe(EventSubscription),
}

/// The MQTT binding handle.
///
/// Cheap to clone; all clones address the same driver task, connection,
/// queue, and subscription table.
#[derive(Clone)]
pub struct MqttBinding {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<CommunicationState>,
}

impl MqttBinding {
    /// Create a binding for the given broker options.
    ///
    /// No connection is attempted until `join`.
    pub fn new(options: MqttBindingOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CommunicationState::Offline);
        tokio::spawn(
            Driver {
                options,
                cmd_rx,
                state_tx,
                joined: None,
                connection: None,
                table: SubscriptionTable::new(),
                queue: PendingQueue::new(),
                prejoin_publications: Vec::new(),
                prejoin_subscriptions: Vec::new(),
            }
            .run(),
        );
        Self { cmd_tx, state_rx }
    }

    fn send(&self, command: Command) -> Result<(), BindingError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| BindingError::DriverGone)
    }
}

#[async_trait]
impl CommunicationBinding for MqttBinding {
    async fn join(&self, options: JoinOptions) -> Result<(), BindingError> {
        let (done, result) = oneshot::channel();
        self.send(Command::Join { options, done })?;
        result.await.map_err(|_| BindingError::DriverGone)?
    }

    async fn unjoin(&self) -> Result<(), BindingError> {
        let (done, result) = oneshot::channel();
        self.send(Command::Unjoin { done })?;
        result.await.map_err(|_| BindingError::DriverGone)?
    }

    fn publish(&self, publication: EventPublication) -> Result<(), BindingError> {
        self.send(Command::Publish(publication))
    }

    fn subscribe(&self, subscription: EventSubscription) -> Result<(), BindingError> {
        self.send(Command::Subscribe(subscription))
    }

    fn unsubscribe(&self, subscription: &EventSubscription) -> Result<(), BindingError> {
        self.send(Command::Unsubscribe(subscription.clone()))
    }

    fn communication_state(&self) -> watch::Receiver<CommunicationState> {
        self.state_rx.clone()
    }
}

struct Joined {
    namespace: String,
    cross_namespacing: bool,
    inbound: mpsc::UnboundedSender<coaty::binding::InboundEvent>,
    join_events: Vec<EventPublication>,
    unjoin_event: EventPublication,
}

struct Connection {
    client: AsyncClient,
    eventloop: EventLoop,
}

enum Step {
    Command(Option<Command>),
    Mqtt(Result<Event, ConnectionError>),
}

struct Driver {
    options: MqttBindingOptions,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<CommunicationState>,
    joined: Option<Joined>,
    connection: Option<Connection>,
    table: SubscriptionTable,
    queue: PendingQueue,
    /// Publications accepted before join; encoded once the namespace is
    /// known.
    prejoin_publications: Vec<EventPublication>,
    /// Subscriptions registered before join.
    prejoin_subscriptions: Vec<EventSubscription>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let step = match self.connection.as_mut() {
                Some(connection) => tokio::select! {
                    command = self.cmd_rx.recv() => Step::Command(command),
                    event = connection.eventloop.poll() => Step::Mqtt(event),
                },
                None => Step::Command(self.cmd_rx.recv().await),
            };
            match step {
                // All binding handles dropped.
                Step::Command(None) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Mqtt(Ok(event)) => self.handle_event(event).await,
                Step::Mqtt(Err(error)) => {
                    warn!(%error, "MQTT connection error");
                    self.set_state(CommunicationState::Offline);
                    tokio::time::sleep(self.options.reconnect_period()).await;
                }
            }
        }
        if let Some(connection) = self.connection.take() {
            let _ = connection.client.disconnect().await;
        }
    }

    fn is_online(&self) -> bool {
        *self.state_tx.borrow() == CommunicationState::Online
    }

    fn set_state(&self, state: CommunicationState) {
        self.state_tx.send_replace(state);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { options, done } => {
                let _ = done.send(self.handle_join(options));
            }
            Command::Unjoin { done } => {
                self.handle_unjoin().await;
                let _ = done.send(Ok(()));
            }
            Command::Publish(publication) => self.handle_publish(publication).await,
            Command::Subscribe(subscription) => self.handle_subscribe(subscription).await,
            Command::Unsubscribe(subscription) => self.handle_unsubscribe(subscription).await,
        }
    }

    fn handle_join(&mut self, options: JoinOptions) -> Result<(), BindingError> {
        if self.joined.is_some() {
            return Err(BindingError::AlreadyJoined);
        }

        // The unjoin event is encoded once here and installed as the
        // broker-held last will, so abrupt disconnection still produces
        // a deadvertise to peers.
        let (will_topic, will_payload) =
            encode_publication(&options.unjoin_event.event, &options.namespace)
                .map_err(|error| BindingError::Encode(error.to_string()))?;
        let last_will = LastWill::new(will_topic, will_payload, QoS::AtMostOnce, false);

        let client_id = client_id(&options.agent_id);
        let mqtt_options = self.options.to_mqtt_options(&client_id, last_will)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, CLIENT_CHANNEL_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.options.connect_timeout().as_secs().max(1));
        eventloop.network_options = network_options;

        let joined = Joined {
            namespace: options.namespace,
            cross_namespacing: options.should_enable_cross_namespacing,
            inbound: options.inbound,
            join_events: options.join_events,
            unjoin_event: options.unjoin_event,
        };

        // Move pre-join registrations into the live tables.
        for subscription in self.prejoin_subscriptions.drain(..) {
            self.table
                .add(subscription, &joined.namespace, joined.cross_namespacing);
        }
        for publication in std::mem::take(&mut self.prejoin_publications) {
            if let Some(item) = encode_item(&publication, &joined.namespace) {
                self.queue.push_back(item);
            }
        }

        self.joined = Some(joined);
        self.connection = Some(Connection { client, eventloop });
        info!(client_id, "joining broker");
        Ok(())
    }

    async fn handle_unjoin(&mut self) {
        let Some(joined) = self.joined.take() else {
            return;
        };
        if let Some(mut connection) = self.connection.take() {
            if self.is_online() {
                match encode_publication(&joined.unjoin_event.event, &joined.namespace) {
                    Ok((topic, payload)) => {
                        let _ = connection
                            .client
                            .publish_bytes(topic, QoS::AtMostOnce, false, payload)
                            .await;
                    }
                    Err(error) => warn!(%error, "dropping unencodable unjoin event"),
                }
                let _ = connection.client.disconnect().await;
                // Pump the event loop until the disconnect flushes, then
                // force-close by dropping the connection.
                let flush = async {
                    loop {
                        match connection.eventloop.poll().await {
                            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                            _ => {}
                        }
                    }
                };
                if tokio::time::timeout(UNJOIN_FLUSH_TIMEOUT, flush).await.is_err() {
                    warn!("timed out flushing unjoin event");
                }
                if let Some(done) = &joined.unjoin_event.done {
                    done(false);
                }
            } else if let Some(done) = &joined.unjoin_event.done {
                done(true);
            }
        }
        self.table.clear();
        self.queue.clear();
        self.prejoin_publications.clear();
        self.prejoin_subscriptions.clear();
        self.set_state(CommunicationState::Offline);
    }

    async fn handle_publish(&mut self, publication: EventPublication) {
        let Some(joined) = &self.joined else {
            self.prejoin_publications.push(publication);
            return;
        };
        let namespace = joined.namespace.clone();
        if let Some(item) = encode_item(&publication, &namespace) {
            self.queue.push_back(item);
        }
        if self.is_online() {
            self.drain().await;
        }
    }

    async fn handle_subscribe(&mut self, subscription: EventSubscription) {
        let Some(joined) = &self.joined else {
            self.prejoin_subscriptions.push(subscription);
            return;
        };
        let filter = self
            .table
            .add(subscription, &joined.namespace, joined.cross_namespacing);
        let client = self.connection.as_ref().map(|c| c.client.clone());
        if let (Some(filter), Some(client), true) = (filter, client, self.is_online()) {
            if let Err(error) = client.subscribe(filter, QoS::AtMostOnce).await {
                warn!(%error, "broker subscribe failed");
            }
        }
    }

    async fn handle_unsubscribe(&mut self, subscription: EventSubscription) {
        let Some(joined) = &self.joined else {
            self.prejoin_subscriptions
                .retain(|registered| registered != &subscription);
            return;
        };
        let filter =
            self.table
                .remove(&subscription, &joined.namespace, joined.cross_namespacing);
        let client = self.connection.as_ref().map(|c| c.client.clone());
        if let (Some(filter), Some(client), true) = (filter, client, self.is_online()) {
            if let Err(error) = client.unsubscribe(filter).await {
                warn!(%error, "broker unsubscribe failed");
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => self.on_connected().await,
            Event::Incoming(Packet::Publish(publish)) => {
                let Some(joined) = &self.joined else {
                    return;
                };
                for inbound in
                    classify_inbound(&publish.topic, &publish.payload, self.table.iter())
                {
                    if joined.inbound.send(inbound).is_err() {
                        debug!("inbound sink closed");
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    /// (Re)connection: resubscribe everything in one batch, then publish
    /// the join events ahead of the deferred user publications.
    async fn on_connected(&mut self) {
        let Some(joined) = &self.joined else {
            return;
        };
        info!("broker connection established");
        self.set_state(CommunicationState::Online);

        let filters = self
            .table
            .unique_filters(&joined.namespace, joined.cross_namespacing);
        if !filters.is_empty() {
            let subscriptions: Vec<SubscribeFilter> = filters
                .into_iter()
                .map(|filter| SubscribeFilter::new(filter, QoS::AtMostOnce))
                .collect();
            if let Some(client) = self.connection.as_ref().map(|c| c.client.clone()) {
                if let Err(error) = client.subscribe_many(subscriptions).await {
                    warn!(%error, "batched resubscription failed");
                }
            }
        }

        let join_items: Vec<PendingItem> = joined
            .join_events
            .iter()
            .filter_map(|publication| {
                encode_item(publication, &joined.namespace).map(|mut item| {
                    item.once = true;
                    item
                })
            })
            .collect();
        self.queue.push_front_ordered(join_items);
        self.drain().await;
    }

    /// Drain the pending queue sequentially while Online.
    ///
    /// A failed handoff re-enables deferral: the item stays at the queue
    /// head, every queued item's callback fires with publish_failed, and
    /// the connection error surfaces through the event loop.
    async fn drain(&mut self) {
        let Some(client) = self.connection.as_ref().map(|c| c.client.clone()) else {
            return;
        };
        while self.is_online() {
            let Some(item) = self.queue.pop_front() else {
                return;
            };
            match client
                .publish_bytes(
                    item.topic.clone(),
                    QoS::AtMostOnce,
                    item.retain,
                    item.payload.clone(),
                )
                .await
            {
                Ok(()) => {
                    if let Some(done) = &item.done {
                        done(false);
                    }
                }
                Err(error) => {
                    warn!(%error, "publication handoff failed; deferring");
                    self.queue.push_front(item);
                    self.queue.notify_all_failed();
                    self.set_state(CommunicationState::Offline);
                    return;
                }
            }
        }
    }
}

fn encode_item(publication: &EventPublication, namespace: &str) -> Option<PendingItem> {
    match encode_publication(&publication.event, namespace) {
        Ok((topic, payload)) => Some(PendingItem {
            topic,
            payload,
            retain: publication.options.retain,
            once: publication.options.once,
            done: publication.done.clone(),
        }),
        Err(error) => {
            warn!(%error, "dropping unencodable publication");
            if let Some(done) = &publication.done {
                done(true);
            }
            None
        }
    }
}
