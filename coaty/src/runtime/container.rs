//! The agent container: dependency wiring and lifecycle orchestration.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

// Layer 3: Internal module imports
use super::config::Configuration;
use super::controller::SharedController;
use super::info::{AgentInfo, Runtime};
use crate::binding::CommunicationBinding;
use crate::com::{CommunicationError, CommunicationManager};
use crate::model::{Identity, IoNode};
use crate::runtime::config::IoNodeDefinition;

/// Container resolution or shutdown failure.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The configuration tree failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A communication operation failed.
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

/// The controllers to be registered with a container.
pub struct Components<B: CommunicationBinding> {
    controllers: Vec<(String, SharedController<B>)>,
}

impl<B: CommunicationBinding> Components<B> {
    /// No controllers.
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
        }
    }

    /// Builder method: register a controller under a name.
    pub fn with_controller(
        mut self,
        name: impl Into<String>,
        controller: SharedController<B>,
    ) -> Self {
        self.controllers.push((name.into(), controller));
        self
    }
}

impl<B: CommunicationBinding> Default for Components<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// An agent container.
///
/// Owns the runtime, the configuration, the communication manager, and
/// the registered controllers, and drives controller lifecycle hooks in
/// deterministic order. Containers are not safe for concurrent shutdown.
pub struct Container<B: CommunicationBinding> {
    inner: Arc<ContainerInner<B>>,
}

impl<B: CommunicationBinding> Clone for Container<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ContainerInner<B: CommunicationBinding> {
    runtime: Runtime,
    configuration: Configuration,
    manager: CommunicationManager<B>,
    controllers: Mutex<Vec<(String, SharedController<B>)>>,
}

impl<B: CommunicationBinding> Container<B> {
    /// Resolve a container from components, configuration, and a binding.
    ///
    /// Controllers are initialized in registration order (`on_init`, then
    /// `on_container_resolved` once all components exist). When the
    /// configuration requests auto-start, communication is started as
    /// part of resolution.
    pub async fn resolve(
        components: Components<B>,
        configuration: Configuration,
        binding: B,
    ) -> Result<Self, ContainerError> {
        configuration
            .validate()
            .map_err(ContainerError::InvalidConfiguration)?;

        let agent_info = AgentInfo::from_crate();
        let runtime = Runtime::new(agent_info.clone());

        let mut identity = Identity::new(
            configuration
                .common
                .agent_identity_name
                .clone()
                .unwrap_or(agent_info.package_name),
        );
        identity
            .0
            .extra
            .extend(configuration.common.agent_identity_extra.clone());

        let io_nodes: Vec<IoNode> = configuration
            .common
            .io_context_nodes
            .iter()
            .map(|(context_name, definition)| io_node_from_definition(context_name, definition))
            .collect();

        let manager = CommunicationManager::new(
            identity,
            configuration.communication.clone(),
            io_nodes,
            binding,
        );

        let container = Self {
            inner: Arc::new(ContainerInner {
                runtime,
                configuration,
                manager,
                controllers: Mutex::new(components.controllers),
            }),
        };

        {
            let controllers = container.inner.controllers.lock().await;
            for (name, controller) in controllers.iter() {
                let options = container
                    .inner
                    .configuration
                    .controller_options(name)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                controller.lock().await.on_init(&options).await;
                debug!(controller = name.as_str(), "controller initialized");
            }
            for (_, controller) in controllers.iter() {
                controller
                    .lock()
                    .await
                    .on_container_resolved(&container)
                    .await;
            }
            let mut identities = Vec::new();
            for (_, controller) in controllers.iter() {
                if let Some(identity) = controller.lock().await.identity() {
                    identities.push(identity);
                }
            }
            container.inner.manager.set_controller_identities(identities);
        }

        if container
            .inner
            .configuration
            .communication
            .should_auto_start
        {
            container.start_communication().await?;
        }
        Ok(container)
    }

    /// The container's runtime facilities.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// The container's configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.inner.configuration
    }

    /// A handle on the communication manager.
    pub fn communication_manager(&self) -> CommunicationManager<B> {
        self.inner.manager.clone()
    }

    /// Register a controller dynamically after resolution.
    ///
    /// The controller's `on_init` and `on_container_resolved` hooks run
    /// immediately. Must not be invoked from within a controller hook.
    pub async fn register_controller(
        &self,
        name: impl Into<String>,
        controller: SharedController<B>,
    ) {
        let name = name.into();
        let options = self
            .inner
            .configuration
            .controller_options(&name)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        {
            let mut guard = controller.lock().await;
            guard.on_init(&options).await;
            guard.on_container_resolved(self).await;
        }
        self.inner.controllers.lock().await.push((name, controller));
    }

    /// Names of all registered controllers, in registration order.
    pub async fn registered_controller_names(&self) -> Vec<String> {
        self.inner
            .controllers
            .lock()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Start communication: starting hooks in registration order, then
    /// the manager's join sequence.
    pub async fn start_communication(&self) -> Result<(), ContainerError> {
        {
            let controllers = self.inner.controllers.lock().await;
            for (_, controller) in controllers.iter() {
                controller
                    .lock()
                    .await
                    .on_communication_manager_starting()
                    .await;
            }
        }
        self.inner.manager.start().await?;
        Ok(())
    }

    /// Stop communication: stopping hooks in reverse registration order,
    /// then the manager's orderly unjoin.
    pub async fn stop_communication(&self) -> Result<(), ContainerError> {
        {
            let controllers = self.inner.controllers.lock().await;
            for (_, controller) in controllers.iter().rev() {
                controller
                    .lock()
                    .await
                    .on_communication_manager_stopping()
                    .await;
            }
        }
        self.inner.manager.stop().await?;
        Ok(())
    }

    /// Shut the container down: stop communication and release the
    /// controllers.
    pub async fn shut_down(&self) -> Result<(), ContainerError> {
        self.stop_communication().await?;
        self.inner.controllers.lock().await.clear();
        Ok(())
    }
}

fn io_node_from_definition(context_name: &str, definition: &IoNodeDefinition) -> IoNode {
    IoNode::new(
        context_name,
        definition.io_sources.clone(),
        definition.io_actors.clone(),
        definition.characteristics.clone(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::binding::{InProcessBinding, InProcessBroker};
    use crate::com::OperatingState;
    use crate::runtime::controller::Controller;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ProbeController {
        init_order: Option<usize>,
        resolved: bool,
        starting: usize,
        stopping: usize,
        options: Option<Value>,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Controller<InProcessBinding> for ProbeController {
        async fn on_init(&mut self, options: &Value) {
            self.init_order = Some(self.counter.fetch_add(1, Ordering::SeqCst));
            self.options = Some(options.clone());
        }

        async fn on_container_resolved(&mut self, _container: &Container<InProcessBinding>) {
            self.resolved = true;
        }

        async fn on_communication_manager_starting(&mut self) {
            self.starting += 1;
        }

        async fn on_communication_manager_stopping(&mut self) {
            self.stopping += 1;
        }
    }

    #[tokio::test]
    async fn test_resolution_invokes_hooks_in_order() {
        let broker = InProcessBroker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(Mutex::new(ProbeController {
            counter: Arc::clone(&counter),
            ..ProbeController::default()
        }));
        let second = Arc::new(Mutex::new(ProbeController {
            counter: Arc::clone(&counter),
            ..ProbeController::default()
        }));

        let configuration = Configuration::builder()
            .with_identity_name("TestAgent")
            .with_controller_options("first", json!({"x": 1}))
            .build()
            .unwrap();
        let first_shared: SharedController<InProcessBinding> = first.clone();
        let second_shared: SharedController<InProcessBinding> = second.clone();
        let container = Container::resolve(
            Components::new()
                .with_controller("first", first_shared)
                .with_controller("second", second_shared),
            configuration,
            broker.binding(),
        )
        .await
        .unwrap();

        assert_eq!(first.lock().await.init_order, Some(0));
        assert_eq!(second.lock().await.init_order, Some(1));
        assert!(first.lock().await.resolved);
        assert_eq!(first.lock().await.options, Some(json!({"x": 1})));
        assert_eq!(second.lock().await.options, Some(Value::Null));
        assert_eq!(
            container.registered_controller_names().await,
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_start_stop_hooks() {
        let broker = InProcessBroker::new();
        let probe = Arc::new(Mutex::new(ProbeController::default()));
        let probe_shared: SharedController<InProcessBinding> = probe.clone();
        let container = Container::resolve(
            Components::new().with_controller("probe", probe_shared),
            Configuration::default(),
            broker.binding(),
        )
        .await
        .unwrap();

        container.start_communication().await.unwrap();
        assert_eq!(probe.lock().await.starting, 1);
        assert_eq!(
            container.communication_manager().operating_state(),
            OperatingState::Joined
        );

        container.shut_down().await.unwrap();
        assert_eq!(probe.lock().await.stopping, 1);
        assert_eq!(
            container.communication_manager().operating_state(),
            OperatingState::Stopped
        );
    }

    #[tokio::test]
    async fn test_auto_start() {
        let broker = InProcessBroker::new();
        let configuration = Configuration::builder()
            .with_auto_start(true)
            .build()
            .unwrap();
        let container = Container::resolve(Components::new(), configuration, broker.binding())
            .await
            .unwrap();
        assert_eq!(
            container.communication_manager().operating_state(),
            OperatingState::Joined
        );
        container.shut_down().await.unwrap();
    }

    #[tokio::test]
    async fn test_dynamic_registration() {
        let broker = InProcessBroker::new();
        let container =
            Container::resolve(Components::new(), Configuration::default(), broker.binding())
                .await
                .unwrap();
        let probe = Arc::new(Mutex::new(ProbeController::default()));
        let probe_shared: SharedController<InProcessBinding> = probe.clone();
        container.register_controller("late", probe_shared).await;
        assert!(probe.lock().await.resolved);
        assert_eq!(
            container.registered_controller_names().await,
            vec!["late".to_string()]
        );
    }

    #[tokio::test]
    async fn test_identity_name_from_configuration() {
        let broker = InProcessBroker::new();
        let configuration = Configuration::builder()
            .with_identity_name("NamedAgent")
            .build()
            .unwrap();
        let container = Container::resolve(Components::new(), configuration, broker.binding())
            .await
            .unwrap();
        assert_eq!(container.communication_manager().identity().name, "NamedAgent");
    }
}
