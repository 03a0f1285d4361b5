//! Event envelopes: the unit handed between manager and binding.
//!
//! Envelopes are created by the communication manager per publish call,
//! serialized at the binding, and destroyed after dispatch.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::data::{
    AdvertiseEventData, AssociateEventData, CallEventData, ChannelEventData, CompleteEventData,
    DeadvertiseEventData, DiscoverEventData, IoValueEventData, QueryEventData, RawEventData,
    ResolveEventData, RetrieveEventData, ReturnEventData, UpdateEventData,
};
use super::types::CommunicationEventType;

/// Discriminated union over the typed payloads of all event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum CommunicationEventData {
    /// Advertise payload.
    Advertise(AdvertiseEventData),
    /// Deadvertise payload.
    Deadvertise(DeadvertiseEventData),
    /// Channel payload.
    Channel(ChannelEventData),
    /// Discover request payload.
    Discover(DiscoverEventData),
    /// Resolve response payload.
    Resolve(ResolveEventData),
    /// Query request payload.
    Query(QueryEventData),
    /// Retrieve response payload.
    Retrieve(RetrieveEventData),
    /// Update request payload.
    Update(UpdateEventData),
    /// Complete response payload.
    Complete(CompleteEventData),
    /// Call request payload.
    Call(CallEventData),
    /// Return response payload.
    Return(ReturnEventData),
    /// Associate payload.
    Associate(AssociateEventData),
    /// IO value payload.
    IoValue(IoValueEventData),
    /// Raw payload.
    Raw(RawEventData),
}

impl CommunicationEventData {
    /// The event kind this payload belongs to.
    pub fn event_type(&self) -> CommunicationEventType {
        match self {
            Self::Advertise(_) => CommunicationEventType::Advertise,
            Self::Deadvertise(_) => CommunicationEventType::Deadvertise,
            Self::Channel(_) => CommunicationEventType::Channel,
            Self::Discover(_) => CommunicationEventType::Discover,
            Self::Resolve(_) => CommunicationEventType::Resolve,
            Self::Query(_) => CommunicationEventType::Query,
            Self::Retrieve(_) => CommunicationEventType::Retrieve,
            Self::Update(_) => CommunicationEventType::Update,
            Self::Complete(_) => CommunicationEventType::Complete,
            Self::Call(_) => CommunicationEventType::Call,
            Self::Return(_) => CommunicationEventType::Return,
            Self::Associate(_) => CommunicationEventType::Associate,
            Self::IoValue(_) => CommunicationEventType::IoValue,
            Self::Raw(_) => CommunicationEventType::Raw,
        }
    }

    /// Encode this payload for the wire: UTF-8 JSON for protocol events,
    /// the opaque buffer for raw payloads.
    pub fn encode_payload(&self) -> Result<Bytes, serde_json::Error> {
        let json = match self {
            Self::Advertise(data) => serde_json::to_vec(data)?,
            Self::Deadvertise(data) => serde_json::to_vec(data)?,
            Self::Channel(data) => serde_json::to_vec(data)?,
            Self::Discover(data) => serde_json::to_vec(data)?,
            Self::Resolve(data) => serde_json::to_vec(data)?,
            Self::Query(data) => serde_json::to_vec(data)?,
            Self::Retrieve(data) => serde_json::to_vec(data)?,
            Self::Update(data) => serde_json::to_vec(data)?,
            Self::Complete(data) => serde_json::to_vec(data)?,
            Self::Call(data) => serde_json::to_vec(data)?,
            Self::Return(data) => serde_json::to_vec(data)?,
            Self::Associate(data) => serde_json::to_vec(data)?,
            Self::IoValue(data) => match &data.payload {
                super::data::IoValuePayload::Json(value) => serde_json::to_vec(value)?,
                super::data::IoValuePayload::Raw(bytes) => return Ok(bytes.clone()),
            },
            Self::Raw(data) => return Ok(data.payload.clone()),
        };
        Ok(Bytes::from(json))
    }

    /// Decode a JSON payload value into the typed payload of the given
    /// protocol event kind.
    ///
    /// IO value and raw payloads are not decoded here; their shape is
    /// determined by the matching subscription, at the binding.
    pub fn decode_typed(
        event_type: CommunicationEventType,
        value: Value,
    ) -> Result<Self, serde_json::Error> {
        use serde::de::Error;
        match event_type {
            CommunicationEventType::Advertise => {
                Ok(Self::Advertise(serde_json::from_value(value)?))
            }
            CommunicationEventType::Deadvertise => {
                Ok(Self::Deadvertise(serde_json::from_value(value)?))
            }
            CommunicationEventType::Channel => Ok(Self::Channel(serde_json::from_value(value)?)),
            CommunicationEventType::Discover => Ok(Self::Discover(serde_json::from_value(value)?)),
            CommunicationEventType::Resolve => Ok(Self::Resolve(serde_json::from_value(value)?)),
            CommunicationEventType::Query => Ok(Self::Query(serde_json::from_value(value)?)),
            CommunicationEventType::Retrieve => Ok(Self::Retrieve(serde_json::from_value(value)?)),
            CommunicationEventType::Update => Ok(Self::Update(serde_json::from_value(value)?)),
            CommunicationEventType::Complete => Ok(Self::Complete(serde_json::from_value(value)?)),
            CommunicationEventType::Call => Ok(Self::Call(serde_json::from_value(value)?)),
            CommunicationEventType::Return => Ok(Self::Return(serde_json::from_value(value)?)),
            CommunicationEventType::Associate => {
                Ok(Self::Associate(serde_json::from_value(value)?))
            }
            CommunicationEventType::IoValue | CommunicationEventType::Raw => Err(
                serde_json::Error::custom("io value and raw payloads are decoded at the binding"),
            ),
        }
    }
}

/// A communication event envelope.
///
/// Carries the event kind, the optional event filter (object type,
/// channel id, operation name, or IO context name), the id of the
/// publishing agent, the correlation id for two-way events, and the typed
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationEvent {
    /// The event kind.
    pub event_type: CommunicationEventType,
    /// Optional sub-selector encoded in the topic's event level.
    pub event_filter: Option<String>,
    /// Identity id of the publishing agent (or IO source id for IO value
    /// events).
    pub source_id: Uuid,
    /// Correlation id, present for two-way events.
    pub correlation_id: Option<Uuid>,
    /// The typed payload.
    pub data: CommunicationEventData,
}

impl CommunicationEvent {
    /// Assemble an envelope.
    ///
    /// Used by the communication manager when publishing and when
    /// dispatching decoded inbound events; not part of the application
    /// API.
    pub fn new(
        event_filter: Option<String>,
        source_id: Uuid,
        correlation_id: Option<Uuid>,
        data: CommunicationEventData,
    ) -> Self {
        Self {
            event_type: data.event_type(),
            event_filter,
            source_id,
            correlation_id,
            data,
        }
    }

    /// The Advertise payload, if this is an Advertise event.
    pub fn advertise(&self) -> Option<&AdvertiseEventData> {
        match &self.data {
            CommunicationEventData::Advertise(data) => Some(data),
            _ => None,
        }
    }

    /// The Deadvertise payload, if this is a Deadvertise event.
    pub fn deadvertise(&self) -> Option<&DeadvertiseEventData> {
        match &self.data {
            CommunicationEventData::Deadvertise(data) => Some(data),
            _ => None,
        }
    }

    /// The Channel payload, if this is a Channel event.
    pub fn channel(&self) -> Option<&ChannelEventData> {
        match &self.data {
            CommunicationEventData::Channel(data) => Some(data),
            _ => None,
        }
    }

    /// The Discover payload, if this is a Discover event.
    pub fn discover(&self) -> Option<&DiscoverEventData> {
        match &self.data {
            CommunicationEventData::Discover(data) => Some(data),
            _ => None,
        }
    }

    /// The Resolve payload, if this is a Resolve event.
    pub fn resolve(&self) -> Option<&ResolveEventData> {
        match &self.data {
            CommunicationEventData::Resolve(data) => Some(data),
            _ => None,
        }
    }

    /// The Query payload, if this is a Query event.
    pub fn query(&self) -> Option<&QueryEventData> {
        match &self.data {
            CommunicationEventData::Query(data) => Some(data),
            _ => None,
        }
    }

    /// The Retrieve payload, if this is a Retrieve event.
    pub fn retrieve(&self) -> Option<&RetrieveEventData> {
        match &self.data {
            CommunicationEventData::Retrieve(data) => Some(data),
            _ => None,
        }
    }

    /// The Update payload, if this is an Update event.
    pub fn update(&self) -> Option<&UpdateEventData> {
        match &self.data {
            CommunicationEventData::Update(data) => Some(data),
            _ => None,
        }
    }

    /// The Complete payload, if this is a Complete event.
    pub fn complete(&self) -> Option<&CompleteEventData> {
        match &self.data {
            CommunicationEventData::Complete(data) => Some(data),
            _ => None,
        }
    }

    /// The Call payload, if this is a Call event.
    pub fn call(&self) -> Option<&CallEventData> {
        match &self.data {
            CommunicationEventData::Call(data) => Some(data),
            _ => None,
        }
    }

    /// The Return payload, if this is a Return event.
    pub fn return_data(&self) -> Option<&ReturnEventData> {
        match &self.data {
            CommunicationEventData::Return(data) => Some(data),
            _ => None,
        }
    }

    /// The Associate payload, if this is an Associate event.
    pub fn associate(&self) -> Option<&AssociateEventData> {
        match &self.data {
            CommunicationEventData::Associate(data) => Some(data),
            _ => None,
        }
    }

    /// The IO value payload, if this is an IoValue event.
    pub fn io_value(&self) -> Option<&IoValueEventData> {
        match &self.data {
            CommunicationEventData::IoValue(data) => Some(data),
            _ => None,
        }
    }

    /// The raw payload, if this is a Raw event.
    pub fn raw(&self) -> Option<&RawEventData> {
        match &self.data {
            CommunicationEventData::Raw(data) => Some(data),
            _ => None,
        }
    }

    /// The Call operation name, if this is a Call event.
    pub fn operation(&self) -> Option<&str> {
        match self.event_type {
            CommunicationEventType::Call => self.event_filter.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{CoatyObject, CoreType};

    #[test]
    fn test_envelope_type_follows_data() {
        let object = CoatyObject::with_core_type(CoreType::CoatyObject, "thing");
        let data = CommunicationEventData::Advertise(
            AdvertiseEventData::new(object).unwrap(),
        );
        let event = CommunicationEvent::new(
            Some("CoatyObject".to_string()),
            Uuid::new_v4(),
            None,
            data,
        );
        assert_eq!(event.event_type, CommunicationEventType::Advertise);
        assert!(event.advertise().is_some());
        assert!(event.deadvertise().is_none());
        assert!(event.operation().is_none());
    }

    #[test]
    fn test_payload_encoding_round_trip() {
        let object = CoatyObject::with_core_type(CoreType::Task, "task");
        let data = CommunicationEventData::Advertise(
            AdvertiseEventData::new(object.clone()).unwrap(),
        );
        let payload = data.encode_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        let decoded =
            CommunicationEventData::decode_typed(CommunicationEventType::Advertise, value).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_raw_payload_passes_through() {
        let data = CommunicationEventData::Raw(RawEventData {
            topic: "/test/42/".to_string(),
            payload: Bytes::from_static(&[1, 2, 3]),
        });
        assert_eq!(data.encode_payload().unwrap(), Bytes::from_static(&[1, 2, 3]));
    }

    #[test]
    fn test_io_value_payload_encoding() {
        use super::super::data::IoValuePayload;

        let json = CommunicationEventData::IoValue(IoValueEventData {
            route: "coaty/3/-/IOV/x".to_string(),
            payload: IoValuePayload::Json(serde_json::json!(21.5)),
        });
        assert_eq!(&json.encode_payload().unwrap()[..], b"21.5");

        let raw = CommunicationEventData::IoValue(IoValueEventData {
            route: "/external/route".to_string(),
            payload: IoValuePayload::Raw(Bytes::from_static(&[7])),
        });
        assert_eq!(raw.encode_payload().unwrap(), Bytes::from_static(&[7]));
    }

    #[test]
    fn test_decode_rejects_binding_level_kinds() {
        assert!(CommunicationEventData::decode_typed(
            CommunicationEventType::Raw,
            Value::Null
        )
        .is_err());
        assert!(CommunicationEventData::decode_typed(
            CommunicationEventType::IoValue,
            Value::Null
        )
        .is_err());
    }

    #[test]
    fn test_operation_accessor() {
        let data = CommunicationEventData::Call(CallEventData::new());
        let event = CommunicationEvent::new(
            Some("switchLight".to_string()),
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            data,
        );
        assert_eq!(event.operation(), Some("switchLight"));
    }
}
