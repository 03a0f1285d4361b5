//! Cross-agent object lifecycle tracking.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::binding::CommunicationBinding;
use crate::com::{CommunicationError, CommunicationManager, EventStream};
use crate::event::DiscoverEventData;
use crate::model::{CoatyObject, CoreType};
use crate::runtime::{Container, Controller};

/// Predicate narrowing the set of tracked objects.
pub type ObjectPredicate = Arc<dyn Fn(&CoatyObject) -> bool + Send + Sync>;

/// One lifecycle change of the tracked object set, in time order.
///
/// Exactly one of the fields is populated per emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectLifecycleInfo {
    /// Objects that entered the tracked set.
    pub added: Option<Vec<CoatyObject>>,
    /// Tracked objects re-advertised with changed content.
    pub changed: Option<Vec<CoatyObject>>,
    /// Objects that left the tracked set.
    pub removed: Option<Vec<CoatyObject>>,
}

/// Lifecycle tracking failure.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The controller has not been resolved inside a container yet.
    #[error("lifecycle controller is not attached to a container")]
    NotResolved,

    /// A communication operation failed.
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

/// A controller utility maintaining a live set of remote objects.
///
/// Combines an initial Discover-by-type request, a standing Advertise
/// subscription, and a Deadvertise subscription into ordered
/// added/changed/removed diffs.
pub struct ObjectLifecycleController<B: CommunicationBinding> {
    manager: Option<CommunicationManager<B>>,
}

impl<B: CommunicationBinding> Default for ObjectLifecycleController<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CommunicationBinding> ObjectLifecycleController<B> {
    /// Create an unresolved controller for registration with a container.
    pub fn new() -> Self {
        Self { manager: None }
    }

    /// Create a controller over an existing manager handle, outside a
    /// container.
    pub fn with_manager(manager: CommunicationManager<B>) -> Self {
        Self {
            manager: Some(manager),
        }
    }

    /// Track objects of the given core type.
    pub fn observe_object_lifecycle_info_by_core_type(
        &self,
        core_type: CoreType,
        predicate: Option<ObjectPredicate>,
    ) -> Result<EventStream<ObjectLifecycleInfo>, TrackingError> {
        let manager = self.manager.clone().ok_or(TrackingError::NotResolved)?;
        let advertises = manager.observe_advertise_with_core_type(core_type);
        let discover = DiscoverEventData::with_core_types(vec![core_type]);
        Self::track(manager, advertises, discover, predicate)
    }

    /// Track objects of the given object type.
    pub fn observe_object_lifecycle_info_by_object_type(
        &self,
        object_type: &str,
        predicate: Option<ObjectPredicate>,
    ) -> Result<EventStream<ObjectLifecycleInfo>, TrackingError> {
        let manager = self.manager.clone().ok_or(TrackingError::NotResolved)?;
        let advertises = manager
            .observe_advertise_with_object_type(object_type)
            .map_err(CommunicationError::from)?;
        let discover = DiscoverEventData::with_object_types(vec![object_type.to_string()])
            .map_err(CommunicationError::from)?;
        Self::track(manager, advertises, discover, predicate)
    }

    fn track(
        manager: CommunicationManager<B>,
        mut advertises: EventStream<crate::event::CommunicationEvent>,
        discover: DiscoverEventData,
        predicate: Option<ObjectPredicate>,
    ) -> Result<EventStream<ObjectLifecycleInfo>, TrackingError> {
        let mut deadvertises = manager.observe_deadvertise();
        let response = manager
            .publish_discover(discover)
            .map_err(TrackingError::Communication)?;
        let mut resolves = Some(
            response
                .subscribe()
                .map_err(TrackingError::Communication)?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let task: JoinHandle<()> = tokio::spawn(async move {
            let mut registry: HashMap<Uuid, CoatyObject> = HashMap::new();
            let accepts = |object: &CoatyObject| match &predicate {
                Some(predicate) => predicate(object),
                None => true,
            };
            loop {
                tokio::select! {
                    event = advertises.recv() => {
                        let Some(event) = event else { break };
                        let Some(data) = event.advertise() else { continue };
                        let object = data.object.clone();
                        if !accepts(&object) {
                            continue;
                        }
                        let info = match registry.insert(object.object_id, object.clone()) {
                            // Advertise for an already-tracked id.
                            Some(_) => ObjectLifecycleInfo {
                                changed: Some(vec![object]),
                                ..ObjectLifecycleInfo::default()
                            },
                            None => ObjectLifecycleInfo {
                                added: Some(vec![object]),
                                ..ObjectLifecycleInfo::default()
                            },
                        };
                        if tx.send(info).is_err() {
                            break;
                        }
                    }
                    event = deadvertises.recv() => {
                        let Some(event) = event else { break };
                        let Some(data) = event.deadvertise() else { continue };
                        let removed: Vec<CoatyObject> = data
                            .object_ids
                            .iter()
                            .filter_map(|object_id| registry.remove(object_id))
                            .collect();
                        if removed.is_empty() {
                            continue;
                        }
                        let info = ObjectLifecycleInfo {
                            removed: Some(removed),
                            ..ObjectLifecycleInfo::default()
                        };
                        if tx.send(info).is_err() {
                            break;
                        }
                    }
                    event = crate::com::observers::recv_opt(&mut resolves) => {
                        let Some(event) = event else {
                            resolves = None;
                            continue;
                        };
                        let Some(data) = event.resolve() else { continue };
                        let objects: Vec<CoatyObject> = data
                            .object
                            .iter()
                            .chain(data.related_objects.iter().flatten())
                            .cloned()
                            .collect();
                        let mut added = Vec::new();
                        let mut changed = Vec::new();
                        for object in objects {
                            if !accepts(&object) {
                                continue;
                            }
                            match registry.insert(object.object_id, object.clone()) {
                                None => added.push(object),
                                Some(previous) if previous != object => changed.push(object),
                                Some(_) => {}
                            }
                        }
                        for info in [
                            (!added.is_empty()).then(|| ObjectLifecycleInfo {
                                added: Some(added.clone()),
                                ..ObjectLifecycleInfo::default()
                            }),
                            (!changed.is_empty()).then(|| ObjectLifecycleInfo {
                                changed: Some(changed.clone()),
                                ..ObjectLifecycleInfo::default()
                            }),
                        ]
                        .into_iter()
                        .flatten()
                        {
                            if tx.send(info).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(EventStream::new_with_task(rx, task))
    }
}

#[async_trait]
impl<B: CommunicationBinding> Controller<B> for ObjectLifecycleController<B> {
    async fn on_container_resolved(&mut self, container: &Container<B>) {
        self.manager = Some(container.communication_manager());
    }
}
