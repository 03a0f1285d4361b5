//! The controller capability set driven by the container.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

// Layer 3: Internal module imports
use super::container::Container;
use crate::binding::CommunicationBinding;
use crate::model::CoatyObject;

/// A controller registered with a container.
///
/// Controllers implement domain logic on top of the communication
/// manager. The container drives the lifecycle hooks in a deterministic
/// order: registration order for initialization and starting, reverse
/// order for stopping. All hooks default to no-ops.
#[async_trait]
pub trait Controller<B: CommunicationBinding>: Send + Sync {
    /// Called once when the controller is instantiated inside its
    /// container, with the controller's configured options.
    ///
    /// Communication is not yet available here.
    async fn on_init(&mut self, _options: &Value) {}

    /// Called once after all container components have been resolved.
    ///
    /// The usual place to take a handle on the communication manager.
    async fn on_container_resolved(&mut self, _container: &Container<B>) {}

    /// Called whenever the communication manager is about to start.
    async fn on_communication_manager_starting(&mut self) {}

    /// Called whenever the communication manager is about to stop.
    async fn on_communication_manager_stopping(&mut self) {}

    /// Identity advertised for this controller as part of the agent's
    /// join events, if any.
    fn identity(&self) -> Option<CoatyObject> {
        None
    }
}

/// A controller shared between the registering code and the container.
pub type SharedController<B> = Arc<Mutex<dyn Controller<B>>>;

/// Wrap a controller for registration.
pub fn shared<B: CommunicationBinding, C: Controller<B> + 'static>(
    controller: C,
) -> SharedController<B> {
    Arc::new(Mutex::new(controller))
}
