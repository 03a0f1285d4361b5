//! Incoming two-way requests with their reply capability.
//!
//! Observers of Discover, Query, Update, and Call receive these wrappers
//! instead of bare envelopes; the reply methods route the response
//! through the manager with the request's correlation id pinned.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde_json::Value;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::error::CommunicationError;
use crate::event::{
    CommunicationEvent, CommunicationEventData, CompleteEventData, DiscoverEventData,
    QueryEventData, RemoteCallError, ResolveEventData, RetrieveEventData, ReturnEventData,
    UpdateEventData,
};

/// Publishes response envelopes for incoming requests.
///
/// Created once per manager; captures the binding handle and the agent's
/// source id so reply capabilities stay free of the binding type.
pub(crate) type ResponsePublisher =
    Arc<dyn Fn(CommunicationEventData, Uuid) -> Result<(), CommunicationError> + Send + Sync>;

fn reply_with(
    publisher: &ResponsePublisher,
    correlation_id: Uuid,
    data: CommunicationEventData,
) -> Result<(), CommunicationError> {
    publisher(data, correlation_id)
}

/// An incoming Discover request.
pub struct IncomingDiscover {
    pub(crate) event: CommunicationEvent,
    pub(crate) publisher: ResponsePublisher,
}

impl IncomingDiscover {
    /// The request envelope.
    pub fn event(&self) -> &CommunicationEvent {
        &self.event
    }

    /// The request payload.
    pub fn data(&self) -> &DiscoverEventData {
        match &self.event.data {
            CommunicationEventData::Discover(data) => data,
            _ => unreachable!("incoming discover always wraps discover data"),
        }
    }

    /// Reply with a Resolve response.
    pub fn resolve(&self, data: ResolveEventData) -> Result<(), CommunicationError> {
        data.validate()?;
        let correlation_id = self.event.correlation_id.unwrap_or_default();
        reply_with(
            &self.publisher,
            correlation_id,
            CommunicationEventData::Resolve(data),
        )
    }
}

impl fmt::Debug for IncomingDiscover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingDiscover")
            .field("event", &self.event)
            .finish()
    }
}

/// An incoming Query request.
pub struct IncomingQuery {
    pub(crate) event: CommunicationEvent,
    pub(crate) publisher: ResponsePublisher,
}

impl IncomingQuery {
    /// The request envelope.
    pub fn event(&self) -> &CommunicationEvent {
        &self.event
    }

    /// The request payload.
    pub fn data(&self) -> &QueryEventData {
        match &self.event.data {
            CommunicationEventData::Query(data) => data,
            _ => unreachable!("incoming query always wraps query data"),
        }
    }

    /// Reply with a Retrieve response.
    pub fn retrieve(&self, data: RetrieveEventData) -> Result<(), CommunicationError> {
        let correlation_id = self.event.correlation_id.unwrap_or_default();
        reply_with(
            &self.publisher,
            correlation_id,
            CommunicationEventData::Retrieve(data),
        )
    }
}

impl fmt::Debug for IncomingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingQuery")
            .field("event", &self.event)
            .finish()
    }
}

/// An incoming Update request.
pub struct IncomingUpdate {
    pub(crate) event: CommunicationEvent,
    pub(crate) publisher: ResponsePublisher,
}

impl IncomingUpdate {
    /// The request envelope.
    pub fn event(&self) -> &CommunicationEvent {
        &self.event
    }

    /// The request payload.
    pub fn data(&self) -> &UpdateEventData {
        match &self.event.data {
            CommunicationEventData::Update(data) => data,
            _ => unreachable!("incoming update always wraps update data"),
        }
    }

    /// Reply with a Complete response.
    pub fn complete(&self, data: CompleteEventData) -> Result<(), CommunicationError> {
        let correlation_id = self.event.correlation_id.unwrap_or_default();
        reply_with(
            &self.publisher,
            correlation_id,
            CommunicationEventData::Complete(data),
        )
    }
}

impl fmt::Debug for IncomingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingUpdate")
            .field("event", &self.event)
            .finish()
    }
}

/// An incoming Call request that passed the observer's context filter
/// evaluation.
pub struct IncomingCall {
    pub(crate) event: CommunicationEvent,
    pub(crate) publisher: ResponsePublisher,
}

impl IncomingCall {
    /// The request envelope.
    pub fn event(&self) -> &CommunicationEvent {
        &self.event
    }

    /// The request payload.
    pub fn data(&self) -> &crate::event::CallEventData {
        match &self.event.data {
            CommunicationEventData::Call(data) => data,
            _ => unreachable!("incoming call always wraps call data"),
        }
    }

    /// The invoked operation name.
    pub fn operation(&self) -> &str {
        self.event.operation().unwrap_or_default()
    }

    /// Reply with the given Return payload.
    pub fn reply(&self, data: ReturnEventData) -> Result<(), CommunicationError> {
        let correlation_id = self.event.correlation_id.unwrap_or_default();
        reply_with(
            &self.publisher,
            correlation_id,
            CommunicationEventData::Return(data),
        )
    }

    /// Reply with a successful result.
    pub fn return_result(
        &self,
        result: Value,
        execution_info: Option<Value>,
    ) -> Result<(), CommunicationError> {
        let mut data = ReturnEventData::with_result(result);
        if let Some(info) = execution_info {
            data = data.with_execution_info(info);
        }
        self.reply(data)
    }

    /// Reply with an error.
    pub fn return_error(
        &self,
        error: RemoteCallError,
        execution_info: Option<Value>,
    ) -> Result<(), CommunicationError> {
        let mut data = ReturnEventData::with_error(error);
        if let Some(info) = execution_info {
            data = data.with_execution_info(info);
        }
        self.reply(data)
    }
}

impl fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingCall")
            .field("event", &self.event)
            .finish()
    }
}
