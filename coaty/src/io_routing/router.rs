//! Context-driven association of IO sources with IO actors.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::rules::IoAssociationRule;
use crate::binding::CommunicationBinding;
use crate::com::observers::recv_opt;
use crate::com::{CommunicationManager, IncomingDiscover, IncomingUpdate};
use crate::event::{
    AssociateEventData, CompleteEventData, DiscoverEventData, ResolveEventData,
};
use crate::model::{CoreType, IoContext, IoNode};
use crate::runtime::{Container, Controller};
use crate::topic::TopicStructure;

/// A controller that associates IO sources with IO actors based on an IO
/// context and an ordered list of rules.
///
/// The router tracks IO nodes of its context through their Advertise and
/// Deadvertise events plus an initial Discover, makes the context object
/// discoverable and mutable through Update, and recomputes associations
/// on every change. For each newly associated (source, actor) pair it
/// publishes an Associate event carrying the pair's IO route; for each
/// removed pair it publishes a disassociating Associate event. Redundant
/// events are suppressed, so the per-pair association sequence is
/// strictly alternating.
pub struct RuleBasedIoRouter<B: CommunicationBinding> {
    shared: Arc<RouterShared>,
    manager: Option<CommunicationManager<B>>,
    tasks: Vec<JoinHandle<()>>,
}

struct RouterShared {
    rules: Vec<IoAssociationRule>,
    state: Mutex<RouterState>,
}

struct RouterState {
    context: IoContext,
    nodes: HashMap<Uuid, IoNode>,
    /// Currently published associations with their routes.
    associations: HashMap<(Uuid, Uuid), String>,
}

impl<B: CommunicationBinding> RuleBasedIoRouter<B> {
    /// Create a router for the given context with an ordered rule list.
    pub fn new(context: IoContext, rules: Vec<IoAssociationRule>) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                rules,
                state: Mutex::new(RouterState {
                    context,
                    nodes: HashMap::new(),
                    associations: HashMap::new(),
                }),
            }),
            manager: None,
            tasks: Vec::new(),
        }
    }

    /// Create a basic router: a single rule associating every compatible
    /// value-type pair of the context.
    pub fn basic(context: IoContext) -> Self {
        Self::new(
            context,
            vec![IoAssociationRule::for_any_value_type(
                "compatible-value-types",
                |_, _, _, _, _| true,
            )],
        )
    }

    /// The router's current IO context object.
    pub fn context(&self) -> IoContext {
        self.shared.state.lock().context.clone()
    }
}

impl RouterShared {
    /// Recompute desired associations and publish the difference.
    fn reevaluate<B: CommunicationBinding>(self: &Arc<Self>, manager: &CommunicationManager<B>) {
        let namespace = manager.namespace();
        let mut state = self.state.lock();
        let context_name = state.context.name().to_string();

        let mut desired: HashMap<(Uuid, Uuid), (String, Option<u64>)> = HashMap::new();
        for source_node in state.nodes.values() {
            for source in source_node.io_sources() {
                for actor_node in state.nodes.values() {
                    for actor in actor_node.io_actors() {
                        if source.value_type() != actor.value_type() {
                            continue;
                        }
                        let applies = self.rules.iter().any(|rule| {
                            rule.applies(&source, source_node, &actor, actor_node, &state.context)
                        });
                        if applies {
                            let route = source
                                .external_route()
                                .map(str::to_string)
                                .unwrap_or_else(|| {
                                    TopicStructure::io_route(&namespace, &source.id())
                                });
                            desired
                                .insert((source.id(), actor.id()), (route, source.update_rate()));
                        }
                    }
                }
            }
        }

        let mut disassociate = Vec::new();
        for (pair, _route) in state.associations.iter() {
            if !desired.contains_key(pair) {
                disassociate.push(*pair);
            }
        }
        let mut associate = Vec::new();
        for (pair, (route, update_rate)) in desired.iter() {
            if state.associations.get(pair) != Some(route) {
                associate.push((*pair, route.clone(), *update_rate));
            }
        }

        for pair in &disassociate {
            state.associations.remove(pair);
        }
        for (pair, route, _) in &associate {
            state.associations.insert(*pair, route.clone());
        }
        drop(state);

        for (source_id, actor_id) in disassociate {
            let data = AssociateEventData::disassociating(source_id, actor_id);
            if let Err(error) = manager.publish_associate(&context_name, data) {
                warn!(%error, "failed to publish disassociating event");
            }
        }
        for ((source_id, actor_id), route, update_rate) in associate {
            let mut data = AssociateEventData::associating(source_id, actor_id, route);
            data.update_rate = update_rate;
            if let Err(error) = manager.publish_associate(&context_name, data) {
                warn!(%error, "failed to publish associating event");
            }
        }
    }

    /// Incorporate an advertised or resolved IO node.
    ///
    /// A node of our context with neither sources nor actors revokes its
    /// membership.
    fn upsert_node<B: CommunicationBinding>(
        self: &Arc<Self>,
        manager: &CommunicationManager<B>,
        node: IoNode,
    ) {
        let changed = {
            let mut state = self.state.lock();
            if node.context_name() != state.context.name() {
                false
            } else if node.io_sources().is_empty() && node.io_actors().is_empty() {
                state.nodes.remove(&node.id()).is_some()
            } else {
                state.nodes.insert(node.id(), node);
                true
            }
        };
        if changed {
            self.reevaluate(manager);
        }
    }

    fn remove_nodes<B: CommunicationBinding>(
        self: &Arc<Self>,
        manager: &CommunicationManager<B>,
        object_ids: &[Uuid],
    ) {
        let changed = {
            let mut state = self.state.lock();
            let before = state.nodes.len();
            for object_id in object_ids {
                state.nodes.remove(object_id);
            }
            state.nodes.len() != before
        };
        if changed {
            self.reevaluate(manager);
        }
    }

    fn answer_discover(&self, incoming: &IncomingDiscover) {
        let context_object = {
            let state = self.state.lock();
            if !incoming.data().matches(state.context.object()) {
                return;
            }
            state.context.object().clone()
        };
        if let Err(error) = incoming.resolve(ResolveEventData::with_object(context_object)) {
            warn!(%error, "failed to resolve IO context discover");
        }
    }

    fn apply_context_update<B: CommunicationBinding>(
        self: &Arc<Self>,
        manager: &CommunicationManager<B>,
        incoming: &IncomingUpdate,
    ) {
        let updated = {
            let mut state = self.state.lock();
            let update = &incoming.data().object;
            if update.object_id != state.context.object().object_id {
                return;
            }
            match IoContext::from_object(update.clone()) {
                Some(context) => {
                    state.context = context;
                    state.context.object().clone()
                }
                None => return,
            }
        };
        if let Err(error) = incoming.complete(CompleteEventData::new(updated)) {
            warn!(%error, "failed to complete IO context update");
        }
        self.reevaluate(manager);
    }
}

#[async_trait]
impl<B: CommunicationBinding> Controller<B> for RuleBasedIoRouter<B> {
    async fn on_container_resolved(&mut self, container: &Container<B>) {
        self.manager = Some(container.communication_manager());
    }

    async fn on_communication_manager_starting(&mut self) {
        let Some(manager) = self.manager.clone() else {
            warn!("IO router started outside a resolved container");
            return;
        };
        let shared = Arc::clone(&self.shared);

        let task = tokio::spawn(async move {
            let mut advertises = manager.observe_advertise_with_core_type(CoreType::IoNode);
            let mut deadvertises = manager.observe_deadvertise();
            let mut discovers = manager.observe_discover();
            let mut updates = manager.observe_update_with_core_type(CoreType::IoContext);

            // Discover IO nodes already present in the network.
            let node_discovery =
                manager.publish_discover(DiscoverEventData::with_core_types(vec![CoreType::IoNode]));
            let mut resolves = match node_discovery {
                Ok(observable) => match observable.subscribe() {
                    Ok(stream) => Some(stream),
                    Err(error) => {
                        warn!(%error, "IO node discovery unavailable");
                        None
                    }
                },
                Err(error) => {
                    warn!(%error, "failed to publish IO node discovery");
                    None
                }
            };

            loop {
                tokio::select! {
                    event = advertises.recv() => {
                        let Some(event) = event else { break };
                        if let Some(data) = event.advertise() {
                            if let Some(node) = IoNode::from_object(data.object.clone()) {
                                shared.upsert_node(&manager, node);
                            }
                        }
                    }
                    event = deadvertises.recv() => {
                        let Some(event) = event else { break };
                        if let Some(data) = event.deadvertise() {
                            shared.remove_nodes(&manager, &data.object_ids);
                        }
                    }
                    resolve = recv_opt(&mut resolves) => {
                        let Some(event) = resolve else {
                            resolves = None;
                            continue;
                        };
                        if let Some(data) = event.resolve() {
                            let objects = data
                                .object
                                .iter()
                                .chain(data.related_objects.iter().flatten());
                            for object in objects {
                                if let Some(node) = IoNode::from_object(object.clone()) {
                                    shared.upsert_node(&manager, node);
                                }
                            }
                        }
                    }
                    incoming = discovers.recv() => {
                        let Some(incoming) = incoming else { break };
                        shared.answer_discover(&incoming);
                    }
                    incoming = updates.recv() => {
                        let Some(incoming) = incoming else { break };
                        shared.apply_context_update(&manager, &incoming);
                    }
                }
            }
            debug!("IO router event loop terminated");
        });
        self.tasks.push(task);
    }

    async fn on_communication_manager_stopping(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let mut state = self.shared.state.lock();
        state.nodes.clear();
        state.associations.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::binding::InProcessBroker;
    use crate::model::{IoActor, IoSource};
    use crate::runtime::CommunicationOptions;
    use serde_json::{json, Map};

    #[test]
    fn test_basic_router_has_catch_all_rule() {
        let router: RuleBasedIoRouter<crate::binding::InProcessBinding> =
            RuleBasedIoRouter::basic(IoContext::new("ctx"));
        assert_eq!(router.shared.rules.len(), 1);
        assert_eq!(router.shared.rules[0].value_type(), "");
    }

    #[tokio::test]
    async fn test_reevaluate_publishes_association_diff() {
        let broker = InProcessBroker::new();
        let manager = CommunicationManager::new(
            crate::model::Identity::new("router-agent"),
            CommunicationOptions::default(),
            Vec::new(),
            broker.binding(),
        );
        manager.start().await.expect("manager starts");
        let mut associates = manager.observe_associate("ctx").expect("valid context");

        let source = IoSource::new("S1", "temp[C]");
        let actor = IoActor::new("A1", "temp[C]");
        let node = IoNode::new(
            "ctx",
            vec![source.clone()],
            vec![actor.clone()],
            Map::new(),
        );

        let router: RuleBasedIoRouter<crate::binding::InProcessBinding> =
            RuleBasedIoRouter::basic(IoContext::new("ctx").with_property("state", json!("on")));
        router.shared.upsert_node(&manager, node.clone());

        let event = associates.recv().await.expect("associate event");
        let data = event.associate().expect("associate data");
        assert_eq!(data.io_source_id, source.id());
        assert_eq!(data.io_actor_id, actor.id());
        assert!(data.is_associating());

        // Re-adding the same node yields no redundant event.
        router.shared.upsert_node(&manager, node.clone());
        assert!(associates.try_recv().is_none());

        // Removing the node dissolves the association.
        router.shared.remove_nodes(&manager, &[node.id()]);
        let event = associates.recv().await.expect("disassociate event");
        assert!(!event.associate().expect("associate data").is_associating());
    }
}
