//! Structured topic names for the communication protocol.
//!
//! A topic name encodes up to six levels:
//!
//! ```text
//! coaty/<version>/<namespace>/<event-code>[:<event-filter>]/<source-id>[/<correlation-id>]
//! ```
//!
//! The correlation level is present exactly when the event is two-way.
//! Topics that do not start with the protocol prefix are not errors; they
//! are external topics handled by raw and external-IO-value subscriptions.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::event::CommunicationEventType;

/// First topic level of every protocol topic.
pub const PROTOCOL_NAME: &str = "coaty";

/// Protocol version published in the second topic level.
///
/// Subscriptions pin this version so that agents speaking an incompatible
/// protocol revision never see each other's events.
pub const PROTOCOL_VERSION: u32 = 3;

/// Default namespace level used when configuration specifies none.
pub const DEFAULT_NAMESPACE: &str = "-";

/// Maximum UTF-8 byte length of an MQTT topic name or filter.
const MAX_TOPIC_LENGTH: usize = 65_535;

/// Separator between event code and event filter inside the event level.
const EVENT_FILTER_SEPARATOR: char = ':';

/// The decoded six-tuple of a protocol topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStructure {
    /// Protocol version from the second level.
    pub version: u32,
    /// Namespace from the third level.
    pub namespace: String,
    /// Event kind decoded from the event code.
    pub event_type: CommunicationEventType,
    /// Optional event filter following the event code.
    pub event_filter: Option<String>,
    /// Id of the publishing agent (or IO source, for IO value topics).
    pub source_id: Uuid,
    /// Correlation id, present for two-way events only.
    pub correlation_id: Option<Uuid>,
}

impl TopicStructure {
    /// Build a concrete publication topic name.
    ///
    /// `correlation_id` must be given exactly when `event_type` is
    /// two-way; a mismatch yields an unparseable topic, so callers
    /// validate envelopes first.
    pub fn publish_topic(
        namespace: &str,
        event_type: CommunicationEventType,
        event_filter: Option<&str>,
        source_id: &Uuid,
        correlation_id: Option<&Uuid>,
    ) -> String {
        let event = event_level(event_type, event_filter);
        match correlation_id {
            Some(correlation_id) => format!(
                "{PROTOCOL_NAME}/{PROTOCOL_VERSION}/{namespace}/{event}/{source_id}/{correlation_id}"
            ),
            None => format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION}/{namespace}/{event}/{source_id}"),
        }
    }

    /// Build a subscription filter for the given event kind.
    ///
    /// Unknown levels are substituted with the single-level wildcard `+`:
    /// the source level always, the namespace level when `namespace` is
    /// `None` (cross-namespacing), and the correlation level for request
    /// subscriptions. Response subscriptions pin their correlation id.
    pub fn subscription_filter(
        namespace: Option<&str>,
        event_type: CommunicationEventType,
        event_filter: Option<&str>,
        correlation_id: Option<&Uuid>,
    ) -> String {
        let namespace = namespace.unwrap_or("+");
        let event = event_level(event_type, event_filter);
        if event_type.is_two_way() {
            let correlation = correlation_id
                .map(Uuid::to_string)
                .unwrap_or_else(|| "+".to_string());
            format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION}/{namespace}/{event}/+/{correlation}")
        } else {
            format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION}/{namespace}/{event}/+")
        }
    }

    /// Build the IO route topic reserved for one IO source's values.
    ///
    /// The source level carries the IO source's object id rather than an
    /// agent id; actors subscribe to the route by exact match.
    pub fn io_route(namespace: &str, source_id: &Uuid) -> String {
        Self::publish_topic(namespace, CommunicationEventType::IoValue, None, source_id, None)
    }

    /// Decode a topic name into its six-tuple.
    ///
    /// Returns `None` when the topic does not conform to the protocol
    /// grammar (wrong prefix, malformed levels, level-count mismatch).
    /// Such topics are treated as external raw topics, not as errors.
    pub fn parse(topic: &str) -> Option<Self> {
        let levels: Vec<&str> = topic.split('/').collect();
        if levels.len() != 5 && levels.len() != 6 {
            return None;
        }
        if levels[0] != PROTOCOL_NAME {
            return None;
        }
        let version: u32 = levels[1].parse().ok()?;
        let namespace = levels[2];
        if namespace.is_empty() {
            return None;
        }
        let (code, event_filter) = match levels[3].split_once(EVENT_FILTER_SEPARATOR) {
            Some((code, filter)) if !filter.is_empty() => (code, Some(filter.to_string())),
            Some(_) | None => (levels[3], None),
        };
        let event_type = CommunicationEventType::from_code(code)?;
        if event_type.is_two_way() != (levels.len() == 6) {
            return None;
        }
        let source_id = Uuid::parse_str(levels[4]).ok()?;
        let correlation_id = match levels.get(5) {
            Some(level) => Some(Uuid::parse_str(level).ok()?),
            None => None,
        };
        Some(Self {
            version,
            namespace: namespace.to_string(),
            event_type,
            event_filter,
            source_id,
            correlation_id,
        })
    }

    /// Whether a string is usable as a concrete publication topic.
    ///
    /// Rejects empty strings, embedded null bytes, wildcard characters,
    /// and strings whose UTF-8 length exceeds 65535 bytes.
    pub fn is_valid_publish_topic(topic: &str) -> bool {
        !topic.is_empty()
            && topic.len() <= MAX_TOPIC_LENGTH
            && !topic.contains(['\0', '+', '#'])
    }

    /// Whether a string is usable as a subscription topic filter.
    ///
    /// `+` must occupy a whole level; `#` must occupy the final level.
    pub fn is_valid_topic_filter(filter: &str) -> bool {
        if filter.is_empty() || filter.len() > MAX_TOPIC_LENGTH || filter.contains('\0') {
            return false;
        }
        let levels: Vec<&str> = filter.split('/').collect();
        let last = levels.len() - 1;
        levels.iter().enumerate().all(|(i, level)| {
            if level.contains('#') {
                *level == "#" && i == last
            } else if level.contains('+') {
                *level == "+"
            } else {
                true
            }
        })
    }

    /// Whether a string is usable as an event filter component
    /// (object type, channel id, operation name, IO context name).
    ///
    /// The charset excludes characters that would break the topic grammar.
    pub fn is_valid_event_filter(filter: &str) -> bool {
        !filter.is_empty()
            && filter.len() <= MAX_TOPIC_LENGTH
            && !filter.contains(['\0', '+', '#', '/'])
    }

    /// Match a concrete topic name against a subscription filter using
    /// standard MQTT wildcard semantics.
    ///
    /// `+` matches exactly one level; `#` matches the remaining levels
    /// (including the parent level itself) and is only significant as the
    /// final filter level.
    pub fn matches(topic: &str, filter: &str) -> bool {
        let mut topic_levels = topic.split('/');
        let mut filter_levels = filter.split('/').peekable();

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => continue,
                (Some(expected), Some(level)) => {
                    if expected != level {
                        return false;
                    }
                }
                (Some(expected), None) => {
                    // "sport/#" also matches the parent topic "sport".
                    return expected == "#" && filter_levels.peek().is_none();
                }
                (None, Some(_)) => return false,
                (None, None) => return true,
            }
        }
    }
}

impl Display for TopicStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            Self::publish_topic(
                &self.namespace,
                self.event_type,
                self.event_filter.as_deref(),
                &self.source_id,
                self.correlation_id.as_ref(),
            )
        )
    }
}

fn event_level(event_type: CommunicationEventType, event_filter: Option<&str>) -> String {
    let code = event_type.code().unwrap_or("RAW");
    match event_filter {
        Some(filter) => format!("{code}{EVENT_FILTER_SEPARATOR}{filter}"),
        None => code.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_tuples() -> Vec<TopicStructure> {
        let source_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let mut tuples = Vec::new();
        for event_type in CommunicationEventType::CODED {
            for event_filter in [None, Some("Task"), Some(":com.mydomain.MyCustom")] {
                tuples.push(TopicStructure {
                    version: PROTOCOL_VERSION,
                    namespace: "production".to_string(),
                    event_type,
                    event_filter: event_filter.map(str::to_string),
                    source_id,
                    correlation_id: event_type.is_two_way().then_some(correlation_id),
                });
            }
        }
        tuples
    }

    #[test]
    fn test_parse_round_trips_losslessly() {
        for tuple in sample_tuples() {
            let topic = tuple.to_string();
            let parsed = TopicStructure::parse(&topic).unwrap();
            assert_eq!(parsed, tuple, "round trip failed for {topic}");
        }
    }

    #[test]
    fn test_publish_topic_matches_own_subscription_filter() {
        for tuple in sample_tuples() {
            let topic = tuple.to_string();
            // Request-style filter: wildcard correlation level.
            let filter = TopicStructure::subscription_filter(
                Some(&tuple.namespace),
                tuple.event_type,
                tuple.event_filter.as_deref(),
                None,
            );
            assert!(
                TopicStructure::matches(&topic, &filter),
                "{topic} does not match {filter}"
            );
            // Response-style filter: pinned correlation level.
            let pinned = TopicStructure::subscription_filter(
                Some(&tuple.namespace),
                tuple.event_type,
                tuple.event_filter.as_deref(),
                tuple.correlation_id.as_ref(),
            );
            assert!(TopicStructure::matches(&topic, &pinned));
        }
    }

    #[test]
    fn test_cross_namespace_filter_uses_wildcard() {
        let source_id = Uuid::new_v4();
        let topic = TopicStructure::publish_topic(
            "site-a",
            CommunicationEventType::Advertise,
            Some("Task"),
            &source_id,
            None,
        );
        let filter = TopicStructure::subscription_filter(
            None,
            CommunicationEventType::Advertise,
            Some("Task"),
            None,
        );
        assert!(TopicStructure::matches(&topic, &filter));

        let pinned = TopicStructure::subscription_filter(
            Some("site-b"),
            CommunicationEventType::Advertise,
            Some("Task"),
            None,
        );
        assert!(!TopicStructure::matches(&topic, &pinned));
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert!(TopicStructure::parse("/test/42/").is_none());
        assert!(TopicStructure::parse("sensors/temperature").is_none());
        assert!(TopicStructure::parse("").is_none());
        assert!(TopicStructure::parse("coaty/3/ns").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_levels() {
        let id = Uuid::new_v4();
        // Bad version.
        assert!(TopicStructure::parse(&format!("coaty/x/ns/ADV/{id}")).is_none());
        // Unknown event code.
        assert!(TopicStructure::parse(&format!("coaty/3/ns/XYZ/{id}")).is_none());
        // Bad source id.
        assert!(TopicStructure::parse("coaty/3/ns/ADV/not-a-uuid").is_none());
        // Empty namespace.
        assert!(TopicStructure::parse(&format!("coaty/3//ADV/{id}")).is_none());
        // One-way event with a correlation level.
        assert!(TopicStructure::parse(&format!("coaty/3/ns/ADV/{id}/{id}")).is_none());
        // Two-way event without a correlation level.
        assert!(TopicStructure::parse(&format!("coaty/3/ns/DSC/{id}")).is_none());
    }

    #[test]
    fn test_valid_publish_topic() {
        assert!(TopicStructure::is_valid_publish_topic("/test/42/"));
        assert!(TopicStructure::is_valid_publish_topic("a"));
        assert!(!TopicStructure::is_valid_publish_topic(""));
        assert!(!TopicStructure::is_valid_publish_topic("a/+/b"));
        assert!(!TopicStructure::is_valid_publish_topic("a/#"));
        assert!(!TopicStructure::is_valid_publish_topic("a\0b"));
        assert!(!TopicStructure::is_valid_publish_topic(&"x".repeat(65_536)));
    }

    #[test]
    fn test_valid_topic_filter() {
        assert!(TopicStructure::is_valid_topic_filter("a/+/b"));
        assert!(TopicStructure::is_valid_topic_filter("a/#"));
        assert!(TopicStructure::is_valid_topic_filter("#"));
        assert!(!TopicStructure::is_valid_topic_filter("a/#/b"));
        assert!(!TopicStructure::is_valid_topic_filter("a/b+/c"));
        assert!(!TopicStructure::is_valid_topic_filter("a/#b"));
        assert!(!TopicStructure::is_valid_topic_filter(""));
        assert!(!TopicStructure::is_valid_topic_filter("a\0b"));
    }

    #[test]
    fn test_valid_event_filter() {
        assert!(TopicStructure::is_valid_event_filter("com.mydomain.MyCustom"));
        assert!(TopicStructure::is_valid_event_filter("switchLight"));
        assert!(!TopicStructure::is_valid_event_filter(""));
        assert!(!TopicStructure::is_valid_event_filter("a/b"));
        assert!(!TopicStructure::is_valid_event_filter("a+b"));
        assert!(!TopicStructure::is_valid_event_filter("a#b"));
        assert!(!TopicStructure::is_valid_event_filter("a\0b"));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(TopicStructure::matches("a/b/c", "a/b/c"));
        assert!(TopicStructure::matches("a/b/c", "a/+/c"));
        assert!(TopicStructure::matches("a/b/c", "a/#"));
        assert!(TopicStructure::matches("a/b/c", "#"));
        assert!(TopicStructure::matches("a", "a/#"));
        assert!(!TopicStructure::matches("a/b/c", "a/b"));
        assert!(!TopicStructure::matches("a/b", "a/b/c"));
        assert!(!TopicStructure::matches("a/b/c", "a/+"));
        assert!(!TopicStructure::matches("b/b/c", "a/#"));
        assert!(TopicStructure::matches("/test/42/", "/test/42/"));
        assert!(TopicStructure::matches("/test/42/", "/test/+/+"));
    }

    #[test]
    fn test_io_route_shape() {
        let source_id = Uuid::new_v4();
        let route = TopicStructure::io_route("plant", &source_id);
        let parsed = TopicStructure::parse(&route).unwrap();
        assert_eq!(parsed.event_type, CommunicationEventType::IoValue);
        assert_eq!(parsed.source_id, source_id);
        assert_eq!(parsed.correlation_id, None);
    }

    #[test]
    fn test_event_filter_with_marker_survives_round_trip() {
        let source_id = Uuid::new_v4();
        let topic = TopicStructure::publish_topic(
            "-",
            CommunicationEventType::Advertise,
            Some(":com.mydomain.MyCustom"),
            &source_id,
            None,
        );
        let parsed = TopicStructure::parse(&topic).unwrap();
        assert_eq!(parsed.event_filter.as_deref(), Some(":com.mydomain.MyCustom"));
    }
}
