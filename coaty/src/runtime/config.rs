//! Agent configuration with sensible defaults.
//!
//! Configuration is a plain value tree; loading it from files or URLs is
//! the concern of external collaborators.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use crate::model::{CoatyObject, IoActor, IoSource};
use crate::topic::{TopicStructure, DEFAULT_NAMESPACE};

/// Definition of one IO node: the sources and actors an agent exposes
/// for an IO context, plus the characteristics read by routing rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoNodeDefinition {
    /// IO sources of this node.
    #[serde(default)]
    pub io_sources: Vec<IoSource>,
    /// IO actors of this node.
    #[serde(default)]
    pub io_actors: Vec<IoActor>,
    /// Characteristics evaluated by routing rules.
    #[serde(default)]
    pub characteristics: Map<String, Value>,
}

/// Options shared by all components of an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonOptions {
    /// Name of the auto-generated agent identity. Defaults to the
    /// package name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identity_name: Option<String>,

    /// Extra properties merged into the agent identity object.
    #[serde(default)]
    pub agent_identity_extra: Map<String, Value>,

    /// The user associated with this agent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_user: Option<CoatyObject>,

    /// IO nodes keyed by the IO context name they belong to.
    #[serde(default)]
    pub io_context_nodes: HashMap<String, IoNodeDefinition>,
}

/// Options of the communication manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationOptions {
    /// Namespace isolating this deployment. Defaults to `-`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Whether subscriptions listen across all namespaces.
    #[serde(default)]
    pub should_enable_cross_namespacing: bool,

    /// Whether the container starts communication as part of resolution.
    #[serde(default)]
    pub should_auto_start: bool,
}

impl Default for CommunicationOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            should_enable_cross_namespacing: false,
            should_auto_start: false,
        }
    }
}

impl CommunicationOptions {
    /// The namespace to use on the wire.
    ///
    /// Falls back to the default namespace when unset or unusable as a
    /// topic level.
    pub fn effective_namespace(&self) -> String {
        match &self.namespace {
            Some(namespace)
                if TopicStructure::is_valid_event_filter(namespace) =>
            {
                namespace.clone()
            }
            _ => DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// The configuration tree of an agent container.
///
/// # Examples
///
/// ```rust
/// use coaty::runtime::Configuration;
///
/// let config = Configuration::builder()
///     .with_identity_name("LightAgent")
///     .with_namespace("building-7")
///     .with_auto_start(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.communication.effective_namespace(), "building-7");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Options shared by all components.
    #[serde(default)]
    pub common: CommonOptions,
    /// Communication manager options.
    #[serde(default)]
    pub communication: CommunicationOptions,
    /// Controller options keyed by controller name.
    #[serde(default)]
    pub controllers: HashMap<String, Value>,
}

impl Configuration {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(namespace) = &self.communication.namespace {
            if !TopicStructure::is_valid_event_filter(namespace) {
                return Err(format!("namespace {namespace:?} is not a valid topic level"));
            }
        }
        for context_name in self.common.io_context_nodes.keys() {
            if !TopicStructure::is_valid_event_filter(context_name) {
                return Err(format!(
                    "IO context name {context_name:?} is not a valid topic level"
                ));
            }
        }
        Ok(())
    }

    /// Options of the named controller, if configured.
    pub fn controller_options(&self, name: &str) -> Option<&Value> {
        self.controllers.get(name)
    }
}

/// Builder for [`Configuration`] with fluent API.
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    /// Set the agent identity name.
    pub fn with_identity_name(mut self, name: impl Into<String>) -> Self {
        self.config.common.agent_identity_name = Some(name.into());
        self
    }

    /// Merge an extra property into the agent identity.
    pub fn with_identity_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.common.agent_identity_extra.insert(key.into(), value);
        self
    }

    /// Set the associated user.
    pub fn with_associated_user(mut self, user: CoatyObject) -> Self {
        self.config.common.associated_user = Some(user);
        self
    }

    /// Add an IO node for the given context name.
    pub fn with_io_node(mut self, context_name: impl Into<String>, node: IoNodeDefinition) -> Self {
        self.config
            .common
            .io_context_nodes
            .insert(context_name.into(), node);
        self
    }

    /// Set the communication namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.communication.namespace = Some(namespace.into());
        self
    }

    /// Enable or disable cross-namespace observation.
    pub fn with_cross_namespacing(mut self, enabled: bool) -> Self {
        self.config.communication.should_enable_cross_namespacing = enabled;
        self
    }

    /// Enable or disable communication auto-start on resolution.
    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.config.communication.should_auto_start = enabled;
        self
    }

    /// Set options of the named controller.
    pub fn with_controller_options(mut self, name: impl Into<String>, options: Value) -> Self {
        self.config.controllers.insert(name.into(), options);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Configuration, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert_eq!(config.communication.effective_namespace(), "-");
        assert!(!config.communication.should_auto_start);
        assert!(!config.communication.should_enable_cross_namespacing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Configuration::builder()
            .with_identity_name("Agent-1")
            .with_namespace("plant")
            .with_cross_namespacing(true)
            .with_auto_start(true)
            .with_controller_options("LightController", json!({"floor": 7}))
            .build()
            .unwrap();

        assert_eq!(config.common.agent_identity_name.as_deref(), Some("Agent-1"));
        assert_eq!(config.communication.effective_namespace(), "plant");
        assert!(config.communication.should_enable_cross_namespacing);
        assert!(config.communication.should_auto_start);
        assert_eq!(
            config.controller_options("LightController"),
            Some(&json!({"floor": 7}))
        );
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        assert!(Configuration::builder()
            .with_namespace("a/b")
            .build()
            .is_err());
        assert!(Configuration::builder().with_namespace("").build().is_err());
    }

    #[test]
    fn test_unusable_namespace_falls_back_at_runtime() {
        let options = CommunicationOptions {
            namespace: Some("a+b".to_string()),
            ..CommunicationOptions::default()
        };
        assert_eq!(options.effective_namespace(), "-");
    }

    #[test]
    fn test_io_node_definition() {
        let node = IoNodeDefinition {
            io_sources: vec![IoSource::new("S1", "temp[C]")],
            io_actors: vec![IoActor::new("A1", "temp[C]")],
            characteristics: Map::new(),
        };
        let config = Configuration::builder()
            .with_io_node("plantControl", node)
            .build()
            .unwrap();
        assert_eq!(config.common.io_context_nodes.len(), 1);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = Configuration::builder()
            .with_namespace("plant")
            .with_identity_extra("site", json!("north"))
            .build()
            .unwrap();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: Configuration = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.communication.namespace.as_deref(), Some("plant"));
        assert_eq!(decoded.common.agent_identity_extra["site"], json!("north"));
    }
}
