//! Communication event kinds and their wire-level classification.
//!
//! The event kinds form a closed set. Request/response pairs are modelled
//! as sibling variants linked by a correlation id in the envelope, not as
//! a type hierarchy.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Kind of a communication event.
///
/// Twelve kinds map onto the topic grammar's three-letter event codes;
/// `Raw` covers publications and subscriptions on arbitrary broker topics
/// outside the protocol grammar and has no event code of its own.
///
/// # Example
/// ```rust
/// use coaty::event::CommunicationEventType;
///
/// assert_eq!(CommunicationEventType::Advertise.code(), Some("ADV"));
/// assert_eq!(CommunicationEventType::from_code("RSV"),
///            Some(CommunicationEventType::Resolve));
/// assert!(CommunicationEventType::Discover.is_request());
/// assert!(CommunicationEventType::Resolve.is_response());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationEventType {
    /// One-way event advertising an object to interested parties.
    Advertise,
    /// One-way event revoking previously advertised objects by id.
    Deadvertise,
    /// One-way event delivering objects on a named channel.
    Channel,
    /// One-way event associating or disassociating an IO source with an
    /// IO actor.
    Associate,
    /// One-way event carrying a value from an IO source on an IO route.
    IoValue,
    /// Two-way request to discover objects by id, external id, or type.
    Discover,
    /// Response to a [`Discover`](Self::Discover) request.
    Resolve,
    /// Two-way request to query objects by filter.
    Query,
    /// Response to a [`Query`](Self::Query) request.
    Retrieve,
    /// Two-way request to update an object.
    Update,
    /// Response to an [`Update`](Self::Update) request.
    Complete,
    /// Two-way request to invoke a remote operation.
    Call,
    /// Response to a [`Call`](Self::Call) request.
    Return,
    /// Publication or subscription on an arbitrary broker topic outside
    /// the protocol grammar.
    Raw,
}

impl CommunicationEventType {
    /// All event kinds that carry a protocol event code.
    pub const CODED: [CommunicationEventType; 13] = [
        Self::Advertise,
        Self::Deadvertise,
        Self::Channel,
        Self::Associate,
        Self::IoValue,
        Self::Discover,
        Self::Resolve,
        Self::Query,
        Self::Retrieve,
        Self::Update,
        Self::Complete,
        Self::Call,
        Self::Return,
    ];

    /// The three-letter topic event code, or `None` for `Raw`.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Advertise => Some("ADV"),
            Self::Deadvertise => Some("DAD"),
            Self::Channel => Some("CHN"),
            Self::Associate => Some("ASC"),
            Self::IoValue => Some("IOV"),
            Self::Discover => Some("DSC"),
            Self::Resolve => Some("RSV"),
            Self::Query => Some("QRY"),
            Self::Retrieve => Some("RTV"),
            Self::Update => Some("UPD"),
            Self::Complete => Some("CPL"),
            Self::Call => Some("CLL"),
            Self::Return => Some("RTN"),
            Self::Raw => None,
        }
    }

    /// Look up an event kind by its three-letter topic event code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::CODED
            .iter()
            .find(|t| t.code() == Some(code))
            .copied()
    }

    /// Whether this kind is the request side of a two-way pair.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Discover | Self::Query | Self::Update | Self::Call)
    }

    /// Whether this kind is the response side of a two-way pair.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Resolve | Self::Retrieve | Self::Complete | Self::Return
        )
    }

    /// Whether the topic for this kind carries a correlation id level.
    ///
    /// True for both sides of a two-way pair; the correlation level is the
    /// sixth topic level.
    pub fn is_two_way(&self) -> bool {
        self.is_request() || self.is_response()
    }

    /// The response kind paired with this request kind, if any.
    pub fn response_type(&self) -> Option<Self> {
        match self {
            Self::Discover => Some(Self::Resolve),
            Self::Query => Some(Self::Retrieve),
            Self::Update => Some(Self::Complete),
            Self::Call => Some(Self::Return),
            _ => None,
        }
    }
}

impl Display for CommunicationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code}"),
            None => write!(f, "RAW"),
        }
    }
}
