//! Typed event model: event kinds, validated payloads, and envelopes.

pub mod data;
pub mod envelope;
pub mod error;
pub mod types;

pub use data::{
    AdvertiseEventData, AssociateEventData, CallEventData, CallParameters, ChannelEventData,
    CompleteEventData, DeadvertiseEventData, DiscoverEventData, IoValueEventData, IoValuePayload,
    ObjectJoinCondition, QueryEventData, RawEventData, RemoteCallError, ResolveEventData,
    RetrieveEventData, ReturnEventData, UpdateEventData,
};
pub use envelope::{CommunicationEvent, CommunicationEventData};
pub use error::ValidationError;
pub use types::CommunicationEventType;
