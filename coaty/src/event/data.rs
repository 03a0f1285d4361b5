//! Typed payloads for each communication event kind.
//!
//! Constructors validate their inputs and fail with a
//! [`ValidationError`] before any I/O occurs.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::error::ValidationError;
use crate::model::{CoatyObject, ContextFilter, CoreType};
use crate::topic::TopicStructure;

fn check_object_type(object_type: &str) -> Result<(), ValidationError> {
    if TopicStructure::is_valid_event_filter(object_type) {
        Ok(())
    } else {
        Err(ValidationError::InvalidObjectType(object_type.to_string()))
    }
}

/// Payload of an Advertise event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertiseEventData {
    /// The advertised object.
    pub object: CoatyObject,
    /// Application-specific side data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Map<String, Value>>,
}

impl AdvertiseEventData {
    /// Advertise the given object.
    ///
    /// Fails when the object's type violates the topic grammar's filter
    /// charset.
    pub fn new(object: CoatyObject) -> Result<Self, ValidationError> {
        check_object_type(&object.object_type)?;
        Ok(Self {
            object,
            private_data: None,
        })
    }
}

/// Payload of a Deadvertise event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadvertiseEventData {
    /// Ids of the objects to deadvertise.
    pub object_ids: Vec<Uuid>,
}

impl DeadvertiseEventData {
    /// Deadvertise the objects with the given ids.
    pub fn new(object_ids: Vec<Uuid>) -> Self {
        Self { object_ids }
    }
}

/// Payload of a Channel event. The channel id travels in the event
/// filter, not in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEventData {
    /// The delivered objects.
    pub objects: Vec<CoatyObject>,
    /// Application-specific side data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Map<String, Value>>,
}

impl ChannelEventData {
    /// Deliver a single object on a channel.
    pub fn with_object(object: CoatyObject) -> Self {
        Self {
            objects: vec![object],
            private_data: None,
        }
    }

    /// Deliver multiple objects on a channel.
    pub fn with_objects(objects: Vec<CoatyObject>) -> Self {
        Self {
            objects,
            private_data: None,
        }
    }
}

/// Payload of a Discover request.
///
/// Exactly one discriminator group must be present: the object id, the
/// external id, or a set of core/object type filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverEventData {
    /// Discover by external id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Discover by object id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<Uuid>,
    /// Restrict by object types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_types: Option<Vec<String>>,
    /// Restrict by core types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_types: Option<Vec<CoreType>>,
}

impl DiscoverEventData {
    /// Discover the object with the given object id.
    pub fn with_object_id(object_id: Uuid) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::default()
        }
    }

    /// Discover objects with the given external id.
    pub fn with_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::default()
        }
    }

    /// Discover objects of the given object types.
    pub fn with_object_types(object_types: Vec<String>) -> Result<Self, ValidationError> {
        for object_type in &object_types {
            check_object_type(object_type)?;
        }
        Ok(Self {
            object_types: Some(object_types),
            ..Self::default()
        })
    }

    /// Discover objects of the given core types.
    pub fn with_core_types(core_types: Vec<CoreType>) -> Self {
        Self {
            core_types: Some(core_types),
            ..Self::default()
        }
    }

    /// Validate the discriminator rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let by_id = self.object_id.is_some();
        let by_external = self.external_id.is_some();
        let by_types = self.object_types.is_some() || self.core_types.is_some();
        let groups = [by_id, by_external, by_types].iter().filter(|g| **g).count();
        if groups == 1 {
            Ok(())
        } else {
            Err(ValidationError::MissingDiscriminator(
                "discover requires exactly one of object id, external id, or type filters",
            ))
        }
    }

    /// Whether a given object satisfies this discover request.
    pub fn matches(&self, object: &CoatyObject) -> bool {
        if let Some(object_id) = self.object_id {
            return object.object_id == object_id;
        }
        if let Some(external_id) = &self.external_id {
            return object.external_id.as_deref() == Some(external_id.as_str());
        }
        let type_match = self
            .object_types
            .as_ref()
            .is_some_and(|types| types.iter().any(|t| *t == object.object_type));
        let core_match = self
            .core_types
            .as_ref()
            .is_some_and(|types| types.contains(&object.core_type));
        type_match || core_match
    }
}

/// Payload of a Resolve response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveEventData {
    /// The resolved object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<CoatyObject>,
    /// Objects related to the resolved one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_objects: Option<Vec<CoatyObject>>,
    /// Application-specific side data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Map<String, Value>>,
}

impl ResolveEventData {
    /// Resolve with a single object.
    pub fn with_object(object: CoatyObject) -> Self {
        Self {
            object: Some(object),
            ..Self::default()
        }
    }

    /// Resolve with related objects only.
    pub fn with_related_objects(related_objects: Vec<CoatyObject>) -> Self {
        Self {
            related_objects: Some(related_objects),
            ..Self::default()
        }
    }

    /// Validate that the response carries content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.object.is_none() && self.related_objects.is_none() {
            return Err(ValidationError::EmptyResponse(
                "resolve requires an object or related objects",
            ));
        }
        Ok(())
    }
}

/// A join condition instructing storage collaborators to resolve related
/// objects into query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectJoinCondition {
    /// Property of the queried object holding the related id(s).
    pub local_property: String,
    /// Property under which resolved objects are attached.
    pub as_property: String,
    /// Whether the local property holds an array of ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_local_property_array: Option<bool>,
    /// Whether the relation resolves to at most one object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_one_to_one_relation: Option<bool>,
}

/// Payload of a Query request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEventData {
    /// Restrict by object types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_types: Option<Vec<String>>,
    /// Restrict by core types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_types: Option<Vec<CoreType>>,
    /// Declarative filter evaluated by the responder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_filter: Option<crate::model::ObjectFilter>,
    /// Join conditions for storage collaborators; opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_join_conditions: Option<Vec<ObjectJoinCondition>>,
}

impl QueryEventData {
    /// Query objects of the given object types.
    pub fn with_object_types(object_types: Vec<String>) -> Result<Self, ValidationError> {
        for object_type in &object_types {
            check_object_type(object_type)?;
        }
        Ok(Self {
            object_types: Some(object_types),
            ..Self::default()
        })
    }

    /// Query objects of the given core types.
    pub fn with_core_types(core_types: Vec<CoreType>) -> Self {
        Self {
            core_types: Some(core_types),
            ..Self::default()
        }
    }

    /// Builder method: attach an object filter.
    pub fn with_filter(mut self, object_filter: crate::model::ObjectFilter) -> Self {
        self.object_filter = Some(object_filter);
        self
    }

    /// Validate that at least one type restriction is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.object_types.is_none() && self.core_types.is_none() {
            return Err(ValidationError::MissingDiscriminator(
                "query requires object types or core types",
            ));
        }
        Ok(())
    }
}

/// Payload of a Retrieve response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveEventData {
    /// The retrieved objects.
    pub objects: Vec<CoatyObject>,
    /// Application-specific side data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Map<String, Value>>,
}

impl RetrieveEventData {
    /// Retrieve with the given objects.
    pub fn new(objects: Vec<CoatyObject>) -> Self {
        Self {
            objects,
            private_data: None,
        }
    }
}

/// Payload of an Update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventData {
    /// The full object to be updated.
    pub object: CoatyObject,
}

impl UpdateEventData {
    /// Request an update of the given object.
    pub fn new(object: CoatyObject) -> Result<Self, ValidationError> {
        check_object_type(&object.object_type)?;
        Ok(Self { object })
    }
}

/// Payload of a Complete response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteEventData {
    /// The object in its updated state.
    pub object: CoatyObject,
    /// Application-specific side data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Map<String, Value>>,
}

impl CompleteEventData {
    /// Complete with the given object.
    pub fn new(object: CoatyObject) -> Self {
        Self {
            object,
            private_data: None,
        }
    }
}

/// Parameters of a Call request: by-position or by-name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallParameters {
    /// Positional parameters.
    ByPosition(Vec<Value>),
    /// Keyword parameters.
    ByName(Map<String, Value>),
}

/// Payload of a Call request. The operation name travels in the event
/// filter, not in the payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEventData {
    /// Operation parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<CallParameters>,
    /// Context filter restricting eligible executors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ContextFilter>,
}

impl CallEventData {
    /// A call without parameters or context filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: keyword parameters.
    pub fn with_parameters_by_name(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = Some(CallParameters::ByName(parameters));
        self
    }

    /// Builder method: positional parameters.
    pub fn with_parameters_by_position(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = Some(CallParameters::ByPosition(parameters));
        self
    }

    /// Builder method: context filter.
    pub fn with_filter(mut self, filter: ContextFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Look up a keyword parameter.
    pub fn parameter_by_name(&self, name: &str) -> Option<&Value> {
        match &self.parameters {
            Some(CallParameters::ByName(map)) => map.get(name),
            _ => None,
        }
    }

    /// Look up a positional parameter.
    pub fn parameter_at(&self, index: usize) -> Option<&Value> {
        match &self.parameters {
            Some(CallParameters::ByPosition(values)) => values.get(index),
            _ => None,
        }
    }
}

/// Error object delivered by a failed remote operation.
///
/// The code set is fixed for protocol-defined failures; application
/// specific codes live outside the reserved range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCallError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

impl RemoteCallError {
    /// Code of the invalid-parameters protocol error.
    pub const INVALID_PARAMETERS: i64 = -32602;
    /// Code of the method-not-found protocol error.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Bounds of the reserved code range; application codes must lie
    /// outside of it.
    pub const RESERVED_RANGE: (i64, i64) = (-32768, -32000);

    /// The invalid-parameters protocol error.
    pub fn invalid_parameters() -> Self {
        Self {
            code: Self::INVALID_PARAMETERS,
            message: "Invalid params".to_string(),
        }
    }

    /// The method-not-found protocol error.
    pub fn method_not_found() -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: "Method not found".to_string(),
        }
    }

    /// An application-defined error outside the reserved code range.
    pub fn application_defined(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the code lies in the reserved protocol range.
    pub fn is_protocol_error(&self) -> bool {
        let (low, high) = Self::RESERVED_RANGE;
        (low..=high).contains(&self.code)
    }
}

/// Payload of a Return response: either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnEventData {
    /// Result value of a successful operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error of a failed operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteCallError>,
    /// Application-specific execution metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_info: Option<Value>,
}

impl ReturnEventData {
    /// A successful return with the given result.
    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            execution_info: None,
        }
    }

    /// A failed return with the given error.
    pub fn with_error(error: RemoteCallError) -> Self {
        Self {
            result: None,
            error: Some(error),
            execution_info: None,
        }
    }

    /// Builder method: attach execution metadata.
    pub fn with_execution_info(mut self, execution_info: Value) -> Self {
        self.execution_info = Some(execution_info);
        self
    }

    /// Whether this return carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Payload of an Associate event. The IO context name travels in the
/// event filter, not in the payload.
///
/// The association is established when `associating_route` is present and
/// dissolved when it is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateEventData {
    /// Id of the IO source of the association.
    pub io_source_id: Uuid,
    /// Id of the IO actor of the association.
    pub io_actor_id: Uuid,
    /// Route reserved for the association's IO values, if associating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associating_route: Option<String>,
    /// Recommended update rate in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_rate: Option<u64>,
}

impl AssociateEventData {
    /// Associate a source with an actor on the given route.
    pub fn associating(io_source_id: Uuid, io_actor_id: Uuid, route: impl Into<String>) -> Self {
        Self {
            io_source_id,
            io_actor_id,
            associating_route: Some(route.into()),
            update_rate: None,
        }
    }

    /// Dissolve the association between a source and an actor.
    pub fn disassociating(io_source_id: Uuid, io_actor_id: Uuid) -> Self {
        Self {
            io_source_id,
            io_actor_id,
            associating_route: None,
            update_rate: None,
        }
    }

    /// Whether this event establishes (rather than dissolves) the
    /// association.
    pub fn is_associating(&self) -> bool {
        self.associating_route.is_some()
    }
}

/// Value carried by an IO value or raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum IoValuePayload {
    /// A JSON value.
    Json(Value),
    /// An opaque byte buffer.
    Raw(Bytes),
}

impl IoValuePayload {
    /// View the payload as a JSON value, if it is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// View the payload as raw bytes, if it is such.
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Self::Json(_) => None,
            Self::Raw(bytes) => Some(bytes),
        }
    }
}

/// Payload of an IoValue event, published on an IO route.
#[derive(Debug, Clone, PartialEq)]
pub struct IoValueEventData {
    /// The route (topic) the value travels on.
    pub route: String,
    /// The value itself.
    pub payload: IoValuePayload,
}

/// Payload of a Raw event on an arbitrary broker topic.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventData {
    /// The concrete publication topic.
    pub topic: String,
    /// The opaque payload bytes.
    pub payload: Bytes,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(object_type: &str) -> CoatyObject {
        CoatyObject::new(CoreType::CoatyObject, object_type, "test")
    }

    #[test]
    fn test_advertise_validates_object_type() {
        assert!(AdvertiseEventData::new(object("coaty.CoatyObject")).is_ok());
        assert!(matches!(
            AdvertiseEventData::new(object("bad/type")),
            Err(ValidationError::InvalidObjectType(_))
        ));
        assert!(AdvertiseEventData::new(object("bad+type")).is_err());
        assert!(AdvertiseEventData::new(object("")).is_err());
    }

    #[test]
    fn test_discover_discriminator_rule() {
        assert!(DiscoverEventData::with_object_id(Uuid::new_v4())
            .validate()
            .is_ok());
        assert!(DiscoverEventData::with_external_id("ext").validate().is_ok());
        assert!(
            DiscoverEventData::with_core_types(vec![CoreType::IoNode])
                .validate()
                .is_ok()
        );

        // No discriminator at all.
        assert!(DiscoverEventData::default().validate().is_err());

        // More than one discriminator group.
        let mut data = DiscoverEventData::with_object_id(Uuid::new_v4());
        data.external_id = Some("ext".to_string());
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_discover_matching() {
        let mut obj = object("coaty.test.MockObject");
        obj.external_id = Some("ext-7".to_string());

        assert!(DiscoverEventData::with_object_id(obj.object_id).matches(&obj));
        assert!(!DiscoverEventData::with_object_id(Uuid::new_v4()).matches(&obj));
        assert!(DiscoverEventData::with_external_id("ext-7").matches(&obj));
        assert!(DiscoverEventData::with_object_types(vec!["coaty.test.MockObject".to_string()])
            .unwrap()
            .matches(&obj));
        assert!(DiscoverEventData::with_core_types(vec![CoreType::CoatyObject]).matches(&obj));
        assert!(!DiscoverEventData::with_core_types(vec![CoreType::Task]).matches(&obj));
    }

    #[test]
    fn test_resolve_requires_content() {
        assert!(ResolveEventData::default().validate().is_err());
        assert!(ResolveEventData::with_object(object("coaty.CoatyObject"))
            .validate()
            .is_ok());
        assert!(ResolveEventData::with_related_objects(vec![])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_query_requires_types() {
        assert!(QueryEventData::default().validate().is_err());
        assert!(QueryEventData::with_core_types(vec![CoreType::Task])
            .validate()
            .is_ok());
        assert!(QueryEventData::with_object_types(vec!["a+b".to_string()]).is_err());
    }

    #[test]
    fn test_call_parameters() {
        let by_name = CallEventData::new().with_parameters_by_name(
            [("state".to_string(), json!("on"))].into_iter().collect(),
        );
        assert_eq!(by_name.parameter_by_name("state"), Some(&json!("on")));
        assert_eq!(by_name.parameter_by_name("color"), None);
        assert_eq!(by_name.parameter_at(0), None);

        let by_position =
            CallEventData::new().with_parameters_by_position(vec![json!(1), json!(2)]);
        assert_eq!(by_position.parameter_at(1), Some(&json!(2)));
        assert_eq!(by_position.parameter_by_name("state"), None);
    }

    #[test]
    fn test_call_parameters_wire_shape() {
        let by_name = CallEventData::new().with_parameters_by_name(
            [("state".to_string(), json!("on"))].into_iter().collect(),
        );
        let value = serde_json::to_value(&by_name).unwrap();
        assert_eq!(value["parameters"], json!({"state": "on"}));

        let decoded: CallEventData = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, by_name);
    }

    #[test]
    fn test_remote_call_error_codes() {
        assert!(RemoteCallError::invalid_parameters().is_protocol_error());
        assert!(RemoteCallError::method_not_found().is_protocol_error());
        assert!(!RemoteCallError::application_defined(4711, "oops").is_protocol_error());
    }

    #[test]
    fn test_return_outcomes() {
        let success = ReturnEventData::with_result(json!({"state": "on"}))
            .with_execution_info(json!({"duration": 4711}));
        assert!(!success.is_error());

        let failure = ReturnEventData::with_error(RemoteCallError::invalid_parameters());
        assert!(failure.is_error());

        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["error"]["code"], json!(-32602));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_associate_direction() {
        let source = Uuid::new_v4();
        let actor = Uuid::new_v4();
        assert!(AssociateEventData::associating(source, actor, "coaty/3/-/IOV/x").is_associating());
        assert!(!AssociateEventData::disassociating(source, actor).is_associating());
    }

    #[test]
    fn test_deadvertise_wire_shape() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let data = DeadvertiseEventData::new(ids.clone());
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["objectIds"].as_array().unwrap().len(), 2);
        let decoded: DeadvertiseEventData = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.object_ids, ids);
    }
}
