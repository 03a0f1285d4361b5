//! Wire codec and inbound dispatch shared by binding implementations.
//!
//! Bindings differ in transport plumbing, not in how envelopes map onto
//! topics and payloads; that mapping lives here so every binding speaks
//! the identical protocol.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

// Layer 3: Internal module imports
use super::error::BindingError;
use super::traits::{EventSubscription, InboundData, InboundEvent};
use crate::event::{CommunicationEvent, CommunicationEventType};
use crate::topic::TopicStructure;

/// Encode an envelope into its concrete publication topic and payload.
///
/// Raw events publish on their literal topic with their opaque payload;
/// IO values publish on their route; all other kinds publish on a
/// protocol topic with a UTF-8 JSON payload.
pub fn encode_publication(
    event: &CommunicationEvent,
    namespace: &str,
) -> Result<(String, Bytes), BindingError> {
    let topic = match &event.data {
        crate::event::CommunicationEventData::Raw(data) => data.topic.clone(),
        crate::event::CommunicationEventData::IoValue(data) => data.route.clone(),
        _ => TopicStructure::publish_topic(
            namespace,
            event.event_type,
            event.event_filter.as_deref(),
            &event.source_id,
            event.correlation_id.as_ref(),
        ),
    };
    let payload = event
        .data
        .encode_payload()
        .map_err(|e| BindingError::Encode(e.to_string()))?;
    Ok((topic, payload))
}

/// Classify an inbound broker message into inbound event notifications.
///
/// When the topic conforms to the protocol grammar and is not an IO value
/// topic, a single notification is emitted. Otherwise the registered
/// subscription items are walked and one notification is emitted per
/// matching item: wildcard matching for raw items, exact matching for IO
/// routes. Payloads are decoded as JSON unless the matching subscription
/// was declared raw; decode failures are logged and dropped, since the
/// sender cannot be notified.
pub fn classify_inbound<'a>(
    topic: &str,
    payload: &Bytes,
    items: impl Iterator<Item = &'a EventSubscription>,
) -> Vec<InboundEvent> {
    let parsed = TopicStructure::parse(topic);

    if let Some(structure) = &parsed {
        if structure.event_type != CommunicationEventType::IoValue {
            let Some(value) = decode_json(topic, payload) else {
                return Vec::new();
            };
            return vec![InboundEvent {
                event_type: structure.event_type,
                event_filter: structure.event_filter.clone(),
                source_id: Some(structure.source_id),
                correlation_id: structure.correlation_id,
                topic: topic.to_string(),
                data: InboundData::Json(value),
            }];
        }
    }

    // IO value topics and topics outside the protocol grammar: one
    // notification per matching subscription item.
    let source_id = parsed.as_ref().map(|s| s.source_id);
    let mut events = Vec::new();
    for item in items {
        let Some(item_topic) = &item.topic else {
            continue;
        };
        match item.event_type {
            CommunicationEventType::Raw => {
                if TopicStructure::matches(topic, item_topic) {
                    events.push(InboundEvent {
                        event_type: CommunicationEventType::Raw,
                        event_filter: Some(item_topic.clone()),
                        source_id: None,
                        correlation_id: None,
                        topic: topic.to_string(),
                        data: InboundData::Raw(payload.clone()),
                    });
                }
            }
            CommunicationEventType::IoValue => {
                if topic == item_topic {
                    let data = if item.decode_json {
                        match decode_json(topic, payload) {
                            Some(value) => InboundData::Json(value),
                            None => continue,
                        }
                    } else {
                        InboundData::Raw(payload.clone())
                    };
                    events.push(InboundEvent {
                        event_type: CommunicationEventType::IoValue,
                        event_filter: None,
                        source_id,
                        correlation_id: None,
                        topic: topic.to_string(),
                        data,
                    });
                }
            }
            _ => {}
        }
    }
    events
}

fn decode_json(topic: &str, payload: &Bytes) -> Option<Value> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(topic, %error, "dropping inbound message with undecodable payload");
            None
        }
    }
}
