//! Typed views over IO-related objects.
//!
//! IO sources, actors, contexts, and nodes travel on the wire as plain
//! objects; these newtypes expose their well-known properties without
//! introducing a parallel representation.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::object::{CoatyObject, CoreType};

/// A producer of IO values of a declared value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoSource(pub CoatyObject);

impl IoSource {
    /// Create an IO source producing values of the given value type.
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self(
            CoatyObject::with_core_type(CoreType::IoSource, name)
                .with_extra("valueType", Value::String(value_type.into())),
        )
    }

    /// Builder method: route values over an externally defined topic
    /// instead of a generated IO route.
    pub fn with_external_route(mut self, route: impl Into<String>) -> Self {
        self.0
            .extra
            .insert("externalRoute".to_string(), Value::String(route.into()));
        self
    }

    /// Builder method: recommended update rate in milliseconds.
    pub fn with_update_rate(mut self, millis: u64) -> Self {
        self.0.extra.insert("updateRate".to_string(), json!(millis));
        self
    }

    /// View an object as an IO source, if its core type fits.
    pub fn from_object(object: CoatyObject) -> Option<Self> {
        (object.core_type == CoreType::IoSource).then_some(Self(object))
    }

    /// The source's object id.
    pub fn id(&self) -> Uuid {
        self.0.object_id
    }

    /// The declared value type.
    pub fn value_type(&self) -> &str {
        self.0
            .extra_property("valueType")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The externally defined route, if any.
    pub fn external_route(&self) -> Option<&str> {
        self.0.extra_property("externalRoute").and_then(Value::as_str)
    }

    /// The recommended update rate in milliseconds, if any.
    pub fn update_rate(&self) -> Option<u64> {
        self.0.extra_property("updateRate").and_then(Value::as_u64)
    }

    /// The wrapped object.
    pub fn object(&self) -> &CoatyObject {
        &self.0
    }
}

/// A consumer of IO values of a declared value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoActor(pub CoatyObject);

impl IoActor {
    /// Create an IO actor consuming values of the given value type.
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self(
            CoatyObject::with_core_type(CoreType::IoActor, name)
                .with_extra("valueType", Value::String(value_type.into())),
        )
    }

    /// Builder method: consume values from an externally defined topic.
    pub fn with_external_route(mut self, route: impl Into<String>) -> Self {
        self.0
            .extra
            .insert("externalRoute".to_string(), Value::String(route.into()));
        self
    }

    /// Builder method: deliver values as raw bytes instead of decoding
    /// them as JSON.
    pub fn with_raw_values(mut self) -> Self {
        self.0
            .extra
            .insert("useRawIoValues".to_string(), Value::Bool(true));
        self
    }

    /// View an object as an IO actor, if its core type fits.
    pub fn from_object(object: CoatyObject) -> Option<Self> {
        (object.core_type == CoreType::IoActor).then_some(Self(object))
    }

    /// The actor's object id.
    pub fn id(&self) -> Uuid {
        self.0.object_id
    }

    /// The declared value type.
    pub fn value_type(&self) -> &str {
        self.0
            .extra_property("valueType")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The externally defined route, if any.
    pub fn external_route(&self) -> Option<&str> {
        self.0.extra_property("externalRoute").and_then(Value::as_str)
    }

    /// Whether values are delivered undecoded.
    pub fn use_raw_values(&self) -> bool {
        self.0
            .extra_property("useRawIoValues")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The wrapped object.
    pub fn object(&self) -> &CoatyObject {
        &self.0
    }
}

/// A shared, mutable domain descriptor evaluated by IO routers.
///
/// The object's name is the context name; routing rules read arbitrary
/// extra properties such as an operating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoContext(pub CoatyObject);

impl IoContext {
    /// Canonical object type of IO context objects.
    pub const OBJECT_TYPE: &'static str = "coaty.IoContext";

    /// Create an IO context with the given context name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(CoatyObject::with_core_type(CoreType::IoContext, name))
    }

    /// Builder method: set a context property.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.extra.insert(key.into(), value);
        self
    }

    /// View an object as an IO context, if its core type fits.
    pub fn from_object(object: CoatyObject) -> Option<Self> {
        (object.core_type == CoreType::IoContext).then_some(Self(object))
    }

    /// The context name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Read a context property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.0.extra_property(key)
    }

    /// The wrapped object.
    pub fn object(&self) -> &CoatyObject {
        &self.0
    }
}

/// A grouping of IO sources and actors belonging to one agent.
///
/// The node's name is the name of the IO context it belongs to; its
/// characteristics are an arbitrary key-value map read by routing rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoNode(pub CoatyObject);

impl IoNode {
    /// Create an IO node for the given context name.
    pub fn new(
        context_name: impl Into<String>,
        sources: Vec<IoSource>,
        actors: Vec<IoActor>,
        characteristics: Map<String, Value>,
    ) -> Self {
        let sources: Vec<Value> = sources
            .into_iter()
            .map(|s| serde_json::to_value(s.0).unwrap_or(Value::Null))
            .collect();
        let actors: Vec<Value> = actors
            .into_iter()
            .map(|a| serde_json::to_value(a.0).unwrap_or(Value::Null))
            .collect();
        Self(
            CoatyObject::with_core_type(CoreType::IoNode, context_name)
                .with_extra("ioSources", Value::Array(sources))
                .with_extra("ioActors", Value::Array(actors))
                .with_extra("characteristics", Value::Object(characteristics)),
        )
    }

    /// View an object as an IO node, if its core type fits.
    pub fn from_object(object: CoatyObject) -> Option<Self> {
        (object.core_type == CoreType::IoNode).then_some(Self(object))
    }

    /// The node's object id.
    pub fn id(&self) -> Uuid {
        self.0.object_id
    }

    /// The name of the IO context this node belongs to.
    pub fn context_name(&self) -> &str {
        &self.0.name
    }

    /// The node's IO sources.
    pub fn io_sources(&self) -> Vec<IoSource> {
        self.typed_items("ioSources", |o| IoSource::from_object(o))
    }

    /// The node's IO actors.
    pub fn io_actors(&self) -> Vec<IoActor> {
        self.typed_items("ioActors", |o| IoActor::from_object(o))
    }

    /// The node's characteristics map.
    pub fn characteristics(&self) -> Map<String, Value> {
        self.0
            .extra_property("characteristics")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Read one characteristic.
    pub fn characteristic(&self, key: &str) -> Option<Value> {
        self.0
            .extra_property("characteristics")
            .and_then(Value::as_object)
            .and_then(|map| map.get(key))
            .cloned()
    }

    /// The wrapped object.
    pub fn object(&self) -> &CoatyObject {
        &self.0
    }

    fn typed_items<T>(&self, key: &str, view: impl Fn(CoatyObject) -> Option<T>) -> Vec<T> {
        self.0
            .extra_property(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .filter_map(&view)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_source_accessors() {
        let source = IoSource::new("S1", "temp[C]")
            .with_external_route("/plant/temp")
            .with_update_rate(500);
        assert_eq!(source.value_type(), "temp[C]");
        assert_eq!(source.external_route(), Some("/plant/temp"));
        assert_eq!(source.update_rate(), Some(500));
        assert_eq!(source.object().core_type, CoreType::IoSource);
    }

    #[test]
    fn test_io_actor_accessors() {
        let actor = IoActor::new("A1", "temp[C]").with_raw_values();
        assert_eq!(actor.value_type(), "temp[C]");
        assert!(actor.use_raw_values());
        assert_eq!(actor.external_route(), None);
    }

    #[test]
    fn test_view_rejects_wrong_core_type() {
        let obj = CoatyObject::with_core_type(CoreType::Task, "task");
        assert!(IoSource::from_object(obj.clone()).is_none());
        assert!(IoActor::from_object(obj.clone()).is_none());
        assert!(IoContext::from_object(obj.clone()).is_none());
        assert!(IoNode::from_object(obj).is_none());
    }

    #[test]
    fn test_io_context_properties() {
        let context = IoContext::new("plantControl").with_property("operatingState", json!("normal"));
        assert_eq!(context.name(), "plantControl");
        assert_eq!(context.property("operatingState"), Some(&json!("normal")));
    }

    #[test]
    fn test_io_node_round_trips_items() {
        let source = IoSource::new("S1", "temp[C]");
        let actor = IoActor::new("A1", "temp[C]");
        let mut characteristics = Map::new();
        characteristics.insert("role".to_string(), json!("normal"));

        let node = IoNode::new(
            "plantControl",
            vec![source.clone()],
            vec![actor.clone()],
            characteristics,
        );
        assert_eq!(node.context_name(), "plantControl");
        assert_eq!(node.io_sources(), vec![source]);
        assert_eq!(node.io_actors(), vec![actor]);
        assert_eq!(node.characteristic("role"), Some(json!("normal")));
        assert_eq!(node.characteristic("missing"), None);

        // Wire round trip preserves everything.
        let value = serde_json::to_value(node.object()).unwrap();
        let back = IoNode::from_object(serde_json::from_value(value).unwrap()).unwrap();
        assert_eq!(back.io_sources().len(), 1);
        assert_eq!(back.io_actors().len(), 1);
    }
}
