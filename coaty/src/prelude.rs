//! Convenience re-exports for agent applications.

pub use crate::binding::{
    CommunicationBinding, CommunicationState, InProcessBinding, InProcessBroker,
};
pub use crate::com::{
    CommunicationError, CommunicationManager, EventStream, OperatingState, ResponseObservable,
};
pub use crate::event::{
    AdvertiseEventData, CallEventData, ChannelEventData, DiscoverEventData, IoValuePayload,
    QueryEventData, RemoteCallError, ResolveEventData, RetrieveEventData, ReturnEventData,
    UpdateEventData, ValidationError,
};
pub use crate::io_routing::{IoAssociationRule, RuleBasedIoRouter};
pub use crate::model::{
    CoatyObject, ContextFilter, CoreType, FilterCondition, FilterExpression, Identity, IoActor,
    IoContext, IoNode, IoSource, ObjectFilter, ObjectMatcher,
};
pub use crate::runtime::{
    shared, Components, Configuration, Container, Controller, IoNodeDefinition, Runtime,
};
pub use crate::tracking::{ObjectLifecycleController, ObjectLifecycleInfo};
